use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};
use formula_eval::{CellValue, FormulaRepairEvaluator, Workbook};
use models::Settings;
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;
use table_wrapper::ReportPage;
use tracing::{debug, info};

mod property_table;

pub use property_table::{parse_exchange_rates, PortfolioPropertyTable, SummaryColumn};

pub const PARSER_NAME: &str = "uralsib";

const PORTFOLIO_LABELS: &[&str] = &["Номер счета", "Договор"];

static PERIOD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)за период с\s+(\d{2}\.\d{2}\.\d{4})\s+по\s+(\d{2}\.\d{2}\.\d{4})")
        .expect("valid period regex")
});

/// A loaded Uralsib broker report: the first sheet with all formulas
/// evaluated, the account it belongs to and the end of its period.
#[derive(Debug, Clone)]
pub struct UralsibReport {
    name: String,
    page: ReportPage,
    portfolio: String,
    report_end: DateTime<Utc>,
    zone: FixedOffset,
    pivot: String,
}

impl UralsibReport {
    /// Opens an `.xls`/`.xlsx` report.
    pub fn open<P: AsRef<Path>>(path: P, settings: &Settings) -> Result<Self> {
        let path = path.as_ref();
        let workbook = Workbook::open(path)
            .with_context(|| format!("Failed to open report: {}", path.display()))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        Self::from_workbook(&name, workbook, settings)
    }

    pub fn from_workbook(name: &str, mut workbook: Workbook, settings: &Settings) -> Result<Self> {
        let summary = FormulaRepairEvaluator::new().evaluate_all(&mut workbook);
        debug!("{}: {:?}", name, summary);

        let sheet = workbook
            .sheet(0)
            .ok_or_else(|| anyhow!("Report {} has no sheets", name))?;
        let page = ReportPage::from_sheet(sheet);
        let zone = settings.zone();

        let end_date = report_end_date(&page)
            .ok_or_else(|| anyhow!("Report period not found in {}", name))?;
        let report_end = end_of_day(end_date, zone)
            .ok_or_else(|| anyhow!("Invalid report end date {} in {}", end_date, name))?;

        let portfolio = find_portfolio(&page)
            .or_else(|| settings.portfolio.clone())
            .ok_or_else(|| anyhow!("Portfolio not found in {} and none configured", name))?;

        info!("Report {}: portfolio {}, period end {}", name, portfolio, report_end);
        Ok(Self {
            name: name.to_string(),
            page,
            portfolio,
            report_end,
            zone,
            pivot: settings.pivot_currency.trim().to_uppercase(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn page(&self) -> &ReportPage {
        &self.page
    }

    pub fn portfolio(&self) -> &str {
        &self.portfolio
    }

    pub fn report_end(&self) -> DateTime<Utc> {
        self.report_end
    }

    pub fn zone(&self) -> FixedOffset {
        self.zone
    }

    /// Currency the report's exchange rates are quoted in.
    pub fn pivot(&self) -> &str {
        &self.pivot
    }
}

fn text_cells(page: &ReportPage) -> impl Iterator<Item = (usize, usize, &str)> + '_ {
    (0..page.row_count()).flat_map(move |row| {
        page.row(row)
            .unwrap_or_default()
            .iter()
            .enumerate()
            .filter_map(move |(col, value)| match value {
                CellValue::Text(text) => Some((row, col, text.as_str())),
                _ => None,
            })
    })
}

/// Last day of the "за период с DD.MM.YYYY по DD.MM.YYYY" banner.
fn report_end_date(page: &ReportPage) -> Option<NaiveDate> {
    text_cells(page).find_map(|(_, _, text)| {
        let caps = PERIOD_RE.captures(text)?;
        NaiveDate::parse_from_str(caps.get(2)?.as_str(), "%d.%m.%Y").ok()
    })
}

fn end_of_day(date: NaiveDate, zone: FixedOffset) -> Option<DateTime<Utc>> {
    let time = NaiveTime::from_hms_opt(23, 59, 59)?;
    zone.from_local_datetime(&date.and_time(time))
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Account number next to a "Номер счета" / "Договор" label, either after a
/// colon in the same cell or in the next non-blank cell of the row.
fn find_portfolio(page: &ReportPage) -> Option<String> {
    let label = PORTFOLIO_LABELS.iter().find_map(|l| page.find(l))?;

    let text = page.cell_text(label.row, label.col);
    let inline = text
        .split_once(':')
        .and_then(|(_, rest)| rest.split_whitespace().next())
        .map(str::to_string);
    if inline.is_some() {
        return inline;
    }

    page.row(label.row)?
        .iter()
        .skip(label.col + 1)
        .find(|value| !value.is_blank())
        .map(|value| value.display_text().trim().to_string())
}
