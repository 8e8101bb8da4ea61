use std::str::FromStr;

use anyhow::Result;
use chrono::{DateTime, FixedOffset, Utc};
use models::PortfolioPropertyKind;
use rust_decimal::{Decimal, RoundingStrategy};
use tracing::debug;

use crate::store::PropertyStore;

/// Fractional digits of every computed (crossed or inverted) rate.
pub const RATE_SCALE: u32 = 6;

/// External source of historical rates, asked only when the report has none.
pub trait HistoricalRateProvider {
    /// Units of `quote` per unit of `base` at `instant`; `zone` is the
    /// report's time zone, which decides the calendar day.
    fn get_rate(&self, base: &str, quote: &str, instant: DateTime<Utc>, zone: FixedOffset) -> Result<Decimal>;
}

/// Rounds half away from zero to [`RATE_SCALE`] digits, keeping trailing zeros.
pub fn round_rate(value: Decimal) -> Decimal {
    let mut rounded = value.round_dp_with_strategy(RATE_SCALE, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(RATE_SCALE);
    rounded
}

pub struct ExchangeRateResolver<'a, S: ?Sized, P: ?Sized> {
    store: &'a S,
    provider: &'a P,
    pivot: String,
}

impl<'a, S, P> ExchangeRateResolver<'a, S, P>
where
    S: PropertyStore + ?Sized,
    P: HistoricalRateProvider + ?Sized,
{
    pub fn new(store: &'a S, provider: &'a P, pivot: &str) -> Self {
        Self {
            store,
            provider,
            pivot: pivot.trim().to_uppercase(),
        }
    }

    pub fn pivot(&self) -> &str {
        &self.pivot
    }

    /// Rate such that `quote_amount = base_amount * rate`.
    ///
    /// Report rates are used as extracted when one side is the pivot and are
    /// crossed otherwise; anything unknown goes to the external provider,
    /// whose errors are returned as is.
    pub fn resolve(&self, base: &str, quote: &str, instant: DateTime<Utc>, zone: FixedOffset) -> Result<Decimal> {
        if base.trim().eq_ignore_ascii_case(quote.trim()) {
            return Ok(Decimal::ONE);
        }

        let from_report = if quote.trim().eq_ignore_ascii_case(&self.pivot) {
            self.report_rate(base)
        } else if base.trim().eq_ignore_ascii_case(&self.pivot) {
            self.report_rate(quote).and_then(|r| Decimal::ONE.checked_div(r)).map(round_rate)
        } else {
            match (self.report_rate(base), self.report_rate(quote)) {
                (Some(b), Some(q)) => b.checked_div(q).map(round_rate),
                _ => None,
            }
        };

        match from_report {
            Some(rate) if rate > Decimal::ZERO => Ok(rate),
            _ => {
                debug!("No report rate for {}/{}, asking external provider", base, quote);
                self.provider.get_rate(base, quote, instant, zone)
            }
        }
    }

    /// Report rate of `currency` against the pivot. Missing, unparsable and
    /// non-positive values are unknown.
    pub fn report_rate(&self, currency: &str) -> Option<Decimal> {
        let wanted = PortfolioPropertyKind::exchange_rate_for(currency);
        let text = self.store.find_first(&|kind| *kind == wanted)?;
        let text = text.trim();
        let rate = Decimal::from_str(text)
            .or_else(|_| Decimal::from_scientific(text))
            .ok()?;
        (rate > Decimal::ZERO).then_some(rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use chrono::TimeZone;
    use models::PortfolioProperty;
    use std::cell::Cell;

    struct CountingProvider {
        calls: Cell<usize>,
        rate: Decimal,
    }

    impl CountingProvider {
        fn new(rate: &str) -> Self {
            Self {
                calls: Cell::new(0),
                rate: Decimal::from_str(rate).unwrap(),
            }
        }
    }

    impl HistoricalRateProvider for CountingProvider {
        fn get_rate(&self, _: &str, _: &str, _: DateTime<Utc>, _: FixedOffset) -> Result<Decimal> {
            self.calls.set(self.calls.get() + 1);
            Ok(self.rate)
        }
    }

    struct FailingProvider;

    impl HistoricalRateProvider for FailingProvider {
        fn get_rate(&self, base: &str, quote: &str, _: DateTime<Utc>, _: FixedOffset) -> Result<Decimal> {
            Err(anyhow!("no rate for {base}/{quote}"))
        }
    }

    fn rates(pairs: &[(&str, &str)]) -> Vec<PortfolioProperty> {
        pairs
            .iter()
            .map(|(currency, value)| PortfolioProperty {
                portfolio: "1234".to_string(),
                property: PortfolioPropertyKind::exchange_rate_for(currency),
                value: value.to_string(),
                timestamp: instant(),
            })
            .collect()
    }

    fn instant() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 3, 31, 20, 59, 59).unwrap()
    }

    fn zone() -> FixedOffset {
        FixedOffset::east_opt(3 * 3600).unwrap()
    }

    #[test]
    fn test_same_currency_is_one() {
        let store = rates(&[]);
        let provider = CountingProvider::new("5");
        let resolver = ExchangeRateResolver::new(&store, &provider, "RUB");

        for code in ["USD", "EUR", "RUB", "CNY"] {
            assert_eq!(resolver.resolve(code, code, instant(), zone()).unwrap(), Decimal::ONE);
        }
        assert_eq!(resolver.resolve("usd", "USD", instant(), zone()).unwrap(), Decimal::ONE);
        assert_eq!(provider.calls.get(), 0);
    }

    #[test]
    fn test_cross_rate_through_pivot() {
        let store = rates(&[("USD", "90.0"), ("EUR", "100.0")]);
        let provider = CountingProvider::new("5");
        let resolver = ExchangeRateResolver::new(&store, &provider, "RUB");

        let rate = resolver.resolve("USD", "EUR", instant(), zone()).unwrap();

        assert_eq!(rate.to_string(), "0.900000");
        assert_eq!(provider.calls.get(), 0);
    }

    #[test]
    fn test_inverse_rate() {
        let store = rates(&[("USD", "90.0")]);
        let provider = CountingProvider::new("5");
        let resolver = ExchangeRateResolver::new(&store, &provider, "RUB");

        assert_eq!(resolver.resolve("RUB", "USD", instant(), zone()).unwrap().to_string(), "0.011111");
        assert_eq!(resolver.resolve("rub", "usd", instant(), zone()).unwrap().to_string(), "0.011111");
    }

    #[test]
    fn test_report_rate_to_pivot_keeps_precision() {
        let store = rates(&[("USD", "73.8757123")]);
        let provider = CountingProvider::new("5");
        let resolver = ExchangeRateResolver::new(&store, &provider, "RUB");

        assert_eq!(resolver.resolve("USD", "RUB", instant(), zone()).unwrap().to_string(), "73.8757123");
    }

    #[test]
    fn test_missing_rate_asks_provider_once() {
        let store = rates(&[("USD", "90.0")]);
        let provider = CountingProvider::new("1.23456789");
        let resolver = ExchangeRateResolver::new(&store, &provider, "RUB");

        let rate = resolver.resolve("USD", "CHF", instant(), zone()).unwrap();

        assert_eq!(rate.to_string(), "1.23456789");
        assert_eq!(provider.calls.get(), 1);
    }

    #[test]
    fn test_zero_and_garbage_rates_are_unknown() {
        let store = rates(&[("USD", "0"), ("EUR", "abc"), ("CNY", "-1.5")]);
        let provider = CountingProvider::new("2");
        let resolver = ExchangeRateResolver::new(&store, &provider, "RUB");

        assert_eq!(resolver.resolve("USD", "RUB", instant(), zone()).unwrap(), Decimal::from(2));
        assert_eq!(resolver.resolve("RUB", "EUR", instant(), zone()).unwrap(), Decimal::from(2));
        assert_eq!(resolver.resolve("CNY", "USD", instant(), zone()).unwrap(), Decimal::from(2));
        assert_eq!(provider.calls.get(), 3);
    }

    #[test]
    fn test_provider_errors_propagate() {
        let store = rates(&[]);
        let resolver = ExchangeRateResolver::new(&store, &FailingProvider, "RUB");

        let err = resolver.resolve("USD", "EUR", instant(), zone()).unwrap_err();
        assert!(err.to_string().contains("USD/EUR"));
    }

    #[test]
    fn test_round_rate_half_up() {
        assert_eq!(round_rate(Decimal::from_str("0.0000005").unwrap()).to_string(), "0.000001");
        assert_eq!(round_rate(Decimal::from_str("-0.0000005").unwrap()).to_string(), "-0.000001");
        assert_eq!(round_rate(Decimal::from(2)).to_string(), "2.000000");
    }
}
