use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Days, FixedOffset, NaiveDate, Utc};
use models::RateProviderSettings;
use reqwest::blocking::Client;
use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, info};

use crate::resolver::{round_rate, HistoricalRateProvider};

const RUB: &str = "RUB";

#[derive(Debug, Deserialize)]
struct DailyJson {
    #[serde(rename = "Valute", default)]
    valute: HashMap<String, Valute>,
}

#[derive(Debug, Deserialize)]
struct Valute {
    #[serde(rename = "Nominal")]
    nominal: u32,
    #[serde(rename = "Value")]
    value: f64,
}

/// Official Bank of Russia rates for one day, in roubles per unit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DailyRates {
    rub_per_unit: HashMap<String, Decimal>,
}

impl DailyRates {
    /// Parses a `daily_json.js` document.
    pub fn parse(json: &str) -> Result<Self> {
        let daily: DailyJson = serde_json::from_str(json).context("Parsing CBR daily rates JSON")?;
        Self::from_daily(daily)
    }

    fn from_daily(daily: DailyJson) -> Result<Self> {
        let mut rub_per_unit = HashMap::new();
        for (code, valute) in daily.valute {
            if valute.nominal == 0 {
                continue;
            }
            let value = Decimal::from_str(&valute.value.to_string())
                .with_context(|| format!("Rate of {} is not a decimal: {}", code, valute.value))?;
            rub_per_unit.insert(code.to_uppercase(), value / Decimal::from(valute.nominal));
        }

        if rub_per_unit.is_empty() {
            return Err(anyhow!("CBR daily rates document has no currencies"));
        }
        Ok(Self { rub_per_unit })
    }

    pub fn rub_per_unit(&self, currency: &str) -> Option<Decimal> {
        let currency = currency.trim().to_uppercase();
        if currency == RUB {
            return Some(Decimal::ONE);
        }
        self.rub_per_unit.get(&currency).copied()
    }

    /// Units of `quote` per unit of `base`, crossed through the rouble.
    pub fn cross(&self, base: &str, quote: &str) -> Option<Decimal> {
        let base = self.rub_per_unit(base)?;
        let quote = self.rub_per_unit(quote)?;
        base.checked_div(quote).map(round_rate)
    }
}

/// Historical rates from the CBR daily archive (`{base_url}/YYYY/MM/DD/daily_json.js`).
///
/// Days without a document (weekends, holidays) fall back to the previous
/// published day, at most `max_lookback_days` back.
pub struct CbrRateProvider {
    http: Client,
    base_url: String,
    max_lookback_days: u32,
    cache: Mutex<HashMap<NaiveDate, DailyRates>>,
}

impl CbrRateProvider {
    pub fn new(settings: &RateProviderSettings) -> Result<Self> {
        let http = Client::builder().build().context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            max_lookback_days: settings.max_lookback_days,
            cache: Mutex::new(HashMap::new()),
        })
    }

    pub fn daily_url(&self, date: NaiveDate) -> String {
        format!("{}/{}/daily_json.js", self.base_url, date.format("%Y/%m/%d"))
    }

    /// Rates published for `date`, `None` when there is no document that day.
    fn fetch_day(&self, date: NaiveDate) -> Result<Option<DailyRates>> {
        if let Some(rates) = self.cache.lock().ok().and_then(|c| c.get(&date).cloned()) {
            return Ok(Some(rates));
        }

        let url = self.daily_url(date);
        let response = self.http.get(&url).send().with_context(|| format!("GET {url} failed"))?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!("No CBR rates published on {}", date);
            return Ok(None);
        }

        let daily: DailyJson = response
            .error_for_status()
            .with_context(|| format!("GET {url} returned non-success status"))?
            .json()
            .with_context(|| format!("Failed to parse CBR rates from {url}"))?;
        let rates = DailyRates::from_daily(daily)?;

        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(date, rates.clone());
        }
        Ok(Some(rates))
    }

    fn rates_on_or_before(&self, date: NaiveDate) -> Result<(NaiveDate, DailyRates)> {
        for back in 0..=u64::from(self.max_lookback_days) {
            let Some(day) = date.checked_sub_days(Days::new(back)) else {
                break;
            };
            if let Some(rates) = self.fetch_day(day)? {
                return Ok((day, rates));
            }
        }
        Err(anyhow!(
            "No CBR rates within {} days before {}",
            self.max_lookback_days,
            date
        ))
    }
}

impl HistoricalRateProvider for CbrRateProvider {
    fn get_rate(&self, base: &str, quote: &str, instant: DateTime<Utc>, zone: FixedOffset) -> Result<Decimal> {
        let date = instant.with_timezone(&zone).date_naive();
        let (published, rates) = self.rates_on_or_before(date)?;
        let rate = rates
            .cross(base, quote)
            .ok_or_else(|| anyhow!("CBR has no {}/{} rate on {}", base, quote, published))?;
        info!("CBR rate {}/{} on {}: {}", base, quote, published, rate);
        Ok(rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAILY: &str = r#"{
        "Date": "2020-03-31T11:30:00+03:00",
        "PreviousDate": "2020-03-28T11:30:00+03:00",
        "Timestamp": "2020-03-31T14:00:00+03:00",
        "Valute": {
            "USD": {"ID": "R01235", "NumCode": "840", "CharCode": "USD", "Nominal": 1, "Name": "Доллар США", "Value": 77.7325, "Previous": 78.0443},
            "EUR": {"ID": "R01239", "NumCode": "978", "CharCode": "EUR", "Nominal": 1, "Name": "Евро", "Value": 85.7389, "Previous": 86.0017},
            "JPY": {"ID": "R01820", "NumCode": "392", "CharCode": "JPY", "Nominal": 100, "Name": "Японских иен", "Value": 71.9312, "Previous": 72.0000}
        }
    }"#;

    #[test]
    fn test_parse_daily_rates() {
        let rates = DailyRates::parse(DAILY).unwrap();
        let dec = |s: &str| Decimal::from_str(s).unwrap();
        assert_eq!(rates.rub_per_unit("usd"), Some(dec("77.7325")));
        assert_eq!(rates.rub_per_unit("JPY"), Some(dec("0.719312")));
        assert_eq!(rates.rub_per_unit("RUB"), Some(Decimal::ONE));
        assert_eq!(rates.rub_per_unit("CHF"), None);
    }

    #[test]
    fn test_cross_rates() {
        let rates = DailyRates::parse(DAILY).unwrap();
        assert_eq!(rates.cross("USD", "RUB").unwrap().to_string(), "77.732500");
        assert_eq!(rates.cross("RUB", "USD").unwrap().to_string(), "0.012865");
        assert_eq!(rates.cross("EUR", "USD").unwrap().to_string(), "1.102999");
        assert_eq!(rates.cross("USD", "CHF"), None);
    }

    #[test]
    fn test_parse_rejects_empty_document() {
        assert!(DailyRates::parse(r#"{"Valute": {}}"#).is_err());
        assert!(DailyRates::parse("not json").is_err());
    }

    #[test]
    fn test_rates_from_decoded_document() {
        let daily: DailyJson = serde_json::from_str(
            r#"{"Valute": {"HUF": {"Nominal": 100, "Value": 23.1}, "XDR": {"Nominal": 0, "Value": 1.0}}}"#,
        )
        .unwrap();
        let rates = DailyRates::from_daily(daily).unwrap();
        assert_eq!(rates.rub_per_unit("HUF"), Some(Decimal::from_str("0.231").unwrap()));
        assert_eq!(rates.rub_per_unit("XDR"), None);
    }

    #[test]
    fn test_daily_url() {
        let provider = CbrRateProvider::new(&RateProviderSettings {
            base_url: "https://www.cbr-xml-daily.ru/archive/".to_string(),
            max_lookback_days: 3,
        })
        .unwrap();
        let date = NaiveDate::from_ymd_opt(2020, 3, 31).unwrap();
        assert_eq!(
            provider.daily_url(date),
            "https://www.cbr-xml-daily.ru/archive/2020/03/31/daily_json.js"
        );
    }
}
