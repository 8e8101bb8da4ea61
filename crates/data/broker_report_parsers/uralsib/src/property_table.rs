use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, Utc};
use fx_rates::{ExchangeRateResolver, HistoricalRateProvider};
use models::{PortfolioProperty, PortfolioPropertyKind};
use rust_decimal::Decimal;
use table_wrapper::{HeaderVariant, TableColumn, TableLocator, TableSpec};
use tracing::{debug, info};

use crate::UralsibReport;

const ASSETS_TABLE: &str = "ОЦЕНКА АКТИВОВ";
const TABLE_FIRST_HEADER_LINE: &str = "На конец отчетного периода";
const TABLE_SECOND_HEADER_LINE: &str = "по цене закрытия";
const RUB_CURRENCY_HEADER: &str = "RUR";
const ASSETS: &str = "Общая стоимость активов:";
const EXCHANGE_RATE: &str = "Официальный обменный курс";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryColumn {
    Rub,
}

fn summary_spec() -> TableSpec<SummaryColumn> {
    TableSpec {
        name: ASSETS_TABLE.to_string(),
        anchors: vec![ASSETS_TABLE.to_string()],
        variants: vec![
            HeaderVariant::new(TABLE_FIRST_HEADER_LINE, 3),
            HeaderVariant::new(TABLE_SECOND_HEADER_LINE, 2),
        ],
        columns: vec![(
            SummaryColumn::Rub,
            TableColumn::any_of(vec![
                TableColumn::multi_line(&[TABLE_FIRST_HEADER_LINE, TABLE_SECOND_HEADER_LINE, RUB_CURRENCY_HEADER]),
                TableColumn::multi_line(&[TABLE_SECOND_HEADER_LINE, RUB_CURRENCY_HEADER]),
            ]),
        )],
    }
}

/// Portfolio-level facts of one report: total assets in roubles and the
/// official rates printed under the assets table.
#[derive(Debug, Clone)]
pub struct PortfolioPropertyTable {
    properties: Vec<PortfolioProperty>,
    pivot: String,
    zone: FixedOffset,
}

impl PortfolioPropertyTable {
    /// Extracts every property the report carries. A failing section is
    /// logged and skipped, the other sections are still extracted.
    pub fn parse(report: &UralsibReport) -> Self {
        let mut properties = Vec::new();

        match total_assets(report) {
            Ok(Some(property)) => properties.push(property),
            Ok(None) => {}
            Err(e) => info!("Total assets not extracted from {}: {:#}", report.name(), e),
        }

        let rates = exchange_rates(report);
        debug!("{} exchange rates found in {}", rates.len(), report.name());
        properties.extend(rates);

        Self {
            properties,
            pivot: report.pivot().to_string(),
            zone: report.zone(),
        }
    }

    pub fn properties(&self) -> &[PortfolioProperty] {
        &self.properties
    }

    pub fn into_properties(self) -> Vec<PortfolioProperty> {
        self.properties
    }

    pub fn pivot(&self) -> &str {
        &self.pivot
    }

    /// Rate such that `quote_amount = base_amount * rate`, preferring the
    /// rates printed in the report over `provider`.
    pub fn exchange_rate<P>(&self, provider: &P, base: &str, quote: &str, instant: DateTime<Utc>) -> Result<Decimal>
    where
        P: HistoricalRateProvider + ?Sized,
    {
        ExchangeRateResolver::new(self.properties.as_slice(), provider, &self.pivot)
            .resolve(base, quote, instant, self.zone)
    }
}

fn total_assets(report: &UralsibReport) -> Result<Option<PortfolioProperty>> {
    let table = TableLocator::default().locate(report.page(), &summary_spec());
    if table.is_empty() {
        return Ok(None);
    }

    let Some(row) = table.find_row(ASSETS) else {
        info!("Row '{}' not found in '{}'", ASSETS, table.name());
        return Ok(None);
    };

    let value = table
        .currency_value(row, SummaryColumn::Rub)
        .with_context(|| format!("Reading '{}'", ASSETS))?;
    Ok(Some(PortfolioProperty {
        portfolio: report.portfolio().to_string(),
        property: PortfolioPropertyKind::TotalAssets,
        value: value.to_string(),
        timestamp: report.report_end(),
    }))
}

fn exchange_rates(report: &UralsibReport) -> Vec<PortfolioProperty> {
    let page = report.page();
    let Some(label) = page.find(EXCHANGE_RATE) else {
        info!("'{}' not found in {}", EXCHANGE_RATE, report.name());
        return Vec::new();
    };

    parse_exchange_rates(&page.cell_text(label.row + 1, 0))
        .into_iter()
        .map(|(currency, rate)| PortfolioProperty {
            portfolio: report.portfolio().to_string(),
            property: PortfolioPropertyKind::exchange_rate_for(&currency),
            value: rate.to_string(),
            timestamp: report.report_end(),
        })
        .collect()
}

/// Reads `CUR = rate` pairs from free text such as
/// `"USD = 77,7325; EUR = 85,7389"`. Windows that do not hold a currency
/// code and a decimal are skipped.
pub fn parse_exchange_rates(text: &str) -> Vec<(String, Decimal)> {
    let words: Vec<&str> = text.split_whitespace().collect();
    let mut rates = Vec::new();

    for i in 1..words.len().saturating_sub(1) {
        if words[i] != "=" {
            continue;
        }
        let currency = words[i - 1].trim_matches(|c: char| c == ';' || c == ',' || c == ':');
        let rate = words[i + 1]
            .trim_end_matches([';', ',', '.'])
            .replace(',', ".");

        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
            debug!("Skipping rate window '{} = {}': not a currency code", words[i - 1], words[i + 1]);
            continue;
        }
        match Decimal::from_str(&rate) {
            Ok(value) => rates.push((currency.to_uppercase(), value)),
            Err(_) => debug!("Skipping rate window '{} = {}': not a number", words[i - 1], words[i + 1]),
        }
    }

    rates
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use chrono::TimeZone;
    use formula_eval::{Cell, CellValue, Sheet, Workbook};
    use models::Settings;
    use std::cell::Cell as Counter;

    fn text(s: &str) -> Cell {
        Cell::value(CellValue::text(s))
    }

    fn number(n: f64) -> Cell {
        Cell::value(CellValue::Number(n))
    }

    fn banner() -> Vec<Vec<Cell>> {
        vec![
            vec![text("Отчет брокера за период с 01.03.2020 по 31.03.2020")],
            vec![text("Номер счета:"), Cell::default(), text("1234567")],
            vec![],
        ]
    }

    fn rates_block() -> Vec<Vec<Cell>> {
        vec![
            vec![],
            vec![text("Официальный обменный курс ЦБ РФ на конец периода:")],
            vec![text("USD = 77,7325; EUR = 85,7389; bad = ; JPY = x")],
        ]
    }

    fn report(rows: Vec<Vec<Cell>>) -> UralsibReport {
        let mut workbook = Workbook::new();
        workbook.add_sheet(Sheet::from_rows("Отчет", rows));
        UralsibReport::from_workbook("report.xls", workbook, &Settings::default()).unwrap()
    }

    fn full_report() -> UralsibReport {
        let mut rows = banner();
        rows.extend(vec![
            vec![text("ОЦЕНКА АКТИВОВ, руб.")],
            vec![Cell::default(), text(TABLE_FIRST_HEADER_LINE)],
            vec![Cell::default(), text(TABLE_SECOND_HEADER_LINE)],
            vec![Cell::default(), text("RUR")],
            vec![text("Денежные средства"), number(10.0)],
            vec![
                text("Общая стоимость активов:"),
                Cell::formula("IFERROR(B8+1490.5, 0)", CellValue::Empty),
            ],
        ]);
        rows.extend(rates_block());
        report(rows)
    }

    struct CountingProvider {
        calls: Counter<usize>,
    }

    impl HistoricalRateProvider for CountingProvider {
        fn get_rate(&self, base: &str, quote: &str, _: DateTime<Utc>, _: FixedOffset) -> Result<Decimal> {
            self.calls.set(self.calls.get() + 1);
            if quote == "CHF" {
                Ok(Decimal::from_str("0.0123").unwrap())
            } else {
                Err(anyhow!("no rate for {base}/{quote}"))
            }
        }
    }

    #[test]
    fn test_parse_full_report() {
        let table = PortfolioPropertyTable::parse(&full_report());
        let props = table.properties();

        assert_eq!(props.len(), 3);
        assert_eq!(props[0].property, PortfolioPropertyKind::TotalAssets);
        assert_eq!(props[0].value, "1500.5");
        assert_eq!(props[0].portfolio, "1234567");
        assert_eq!(props[0].timestamp, Utc.with_ymd_and_hms(2020, 3, 31, 20, 59, 59).unwrap());
        assert_eq!(props[1].property, PortfolioPropertyKind::exchange_rate_for("USD"));
        assert_eq!(props[1].value, "77.7325");
        assert_eq!(props[2].property.to_string(), "EUR_EXCHANGE_RATE");
        assert_eq!(props[2].value, "85.7389");
    }

    #[test]
    fn test_second_header_variant() {
        let mut rows = banner();
        rows.extend(vec![
            vec![text("ОЦЕНКА АКТИВОВ")],
            vec![Cell::default(), Cell::default(), text("по цене закрытия")],
            vec![Cell::default(), text("USD"), text("RUR")],
            vec![text("Общая стоимость активов:"), number(1.0), text("1 234 567,89")],
        ]);
        let table = PortfolioPropertyTable::parse(&report(rows));

        assert_eq!(table.properties().len(), 1);
        assert_eq!(table.properties()[0].value, "1234567.89");
    }

    #[test]
    fn test_absent_sections_give_no_properties() {
        let mut rows = banner();
        rows.push(vec![text("Движение денежных средств")]);
        let table = PortfolioPropertyTable::parse(&report(rows));

        assert!(table.into_properties().is_empty());
    }

    #[test]
    fn test_failing_section_does_not_stop_others() {
        let mut rows = banner();
        rows.extend(vec![
            vec![text("ОЦЕНКА АКТИВОВ")],
            vec![Cell::default(), text("по цене закрытия")],
            vec![Cell::default(), text("RUR")],
            vec![text("Общая стоимость активов:"), text("н/д")],
        ]);
        rows.extend(rates_block());
        let table = PortfolioPropertyTable::parse(&report(rows));

        let kinds: Vec<String> = table.properties().iter().map(|p| p.property.to_string()).collect();
        assert_eq!(kinds, vec!["USD_EXCHANGE_RATE", "EUR_EXCHANGE_RATE"]);
    }

    #[test]
    fn test_exchange_rate_prefers_report() {
        let report = full_report();
        let table = PortfolioPropertyTable::parse(&report);
        let provider = CountingProvider { calls: Counter::new(0) };
        let at = report.report_end();

        assert_eq!(table.exchange_rate(&provider, "USD", "RUB", at).unwrap().to_string(), "77.7325");
        assert_eq!(table.exchange_rate(&provider, "RUB", "EUR", at).unwrap().to_string(), "0.011663");
        assert_eq!(table.exchange_rate(&provider, "USD", "EUR", at).unwrap().to_string(), "0.906619");
        assert_eq!(provider.calls.get(), 0);

        assert_eq!(table.exchange_rate(&provider, "USD", "CHF", at).unwrap().to_string(), "0.0123");
        assert!(table.exchange_rate(&provider, "USD", "GBP", at).is_err());
        assert_eq!(provider.calls.get(), 2);
        assert_eq!(table.pivot(), "RUB");
    }

    #[test]
    fn test_parse_exchange_rates() {
        let rates = parse_exchange_rates("Курс: usd = 73,8757, EUR = 80.0. CNY =");
        assert_eq!(
            rates,
            vec![
                ("USD".to_string(), Decimal::from_str("73.8757").unwrap()),
                ("EUR".to_string(), Decimal::from_str("80.0").unwrap()),
            ]
        );
        assert!(parse_exchange_rates("").is_empty());
        assert!(parse_exchange_rates("= 1").is_empty());
        assert!(parse_exchange_rates("Доллар = 70").is_empty());
    }
}
