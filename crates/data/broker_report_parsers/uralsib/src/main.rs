use anyhow::{Context, Result};
use fx_rates::CbrRateProvider;
use std::env;
use std::path::PathBuf;
use uralsib_parser::{PortfolioPropertyTable, UralsibReport, PARSER_NAME};

/// Currencies whose rate against the pivot is shown for every report.
const SUMMARY_CURRENCIES: &[&str] = &["USD", "EUR"];

fn main() -> Result<()> {
    // Usage:
    //   uralsib_parser <report1.xls report2.xlsx ...> [settings.json] [database_path]
    //
    // Defaults:
    //   settings: ./settings.json when present, built-in defaults otherwise
    //   database_path: ../../../../database

    logger::init();

    let args: Vec<String> = env::args().collect();

    let mut report_files: Vec<String> = Vec::new();
    let mut other_args: Vec<String> = Vec::new();

    for arg in args.iter().skip(1) {
        let lower = arg.to_lowercase();
        if lower.ends_with(".xlsx") || lower.ends_with(".xls") {
            report_files.push(arg.clone());
        } else {
            other_args.push(arg.clone());
        }
    }

    if report_files.is_empty() {
        println!("❌ No report files given.");
        println!("   Usage: uralsib_parser <report.xls[x] ...> [settings.json] [database_path]");
        return Ok(());
    }

    let settings_path = other_args.first().map(PathBuf::from);
    let database_path = other_args
        .get(1)
        .map(|s| s.as_str())
        .unwrap_or("../../../../database");

    let settings = settings_loader::load_effective_settings(settings_path.as_ref())?;
    let provider = CbrRateProvider::new(&settings.rate_provider)?;

    println!("📖 Parsing {} {} report(s)", report_files.len(), PARSER_NAME);

    let mut all_properties = Vec::new();

    for file_path in &report_files {
        println!("  • Processing: {}", file_path);

        let report = UralsibReport::open(file_path, &settings)
            .with_context(|| format!("Failed parsing {}", file_path))?;
        let table = PortfolioPropertyTable::parse(&report);

        println!(
            "    → Portfolio {} at {} ({} properties)",
            report.portfolio(),
            report.report_end().format("%Y-%m-%d %H:%M:%S UTC"),
            table.properties().len()
        );
        for property in table.properties() {
            println!("      {} = {}", property.property, property.value);
        }

        for currency in SUMMARY_CURRENCIES {
            match table.exchange_rate(&provider, currency, table.pivot(), report.report_end()) {
                Ok(rate) => println!("    → {}/{}: {}", currency, table.pivot(), rate),
                Err(e) => println!("    ⚠️  {}/{} unavailable: {:#}", currency, table.pivot(), e),
            }
        }

        all_properties.extend(table.into_properties());
    }

    if all_properties.is_empty() {
        println!("❌ No portfolio properties found.");
        return Ok(());
    }

    println!("📖 Reading database from: {}", database_path);
    let database = utils::read_database(database_path)?;

    let (merged, stats) = utils::merge_properties_with_deduplication(database, &all_properties)?;
    let written = utils::write_database(database_path, &merged)?;

    println!("\n📊 Summary:");
    println!("─────────────────────────────────────────");
    println!(
        "✓ Portfolio properties: {} added, {} skipped (duplicates)",
        stats.added, stats.skipped
    );
    println!(
        "✓ Total properties in database: {}",
        merged
            .get(utils::PROPERTIES_KEY)
            .and_then(|p| p.as_array())
            .map(|a| a.len())
            .unwrap_or(0)
    );
    println!("─────────────────────────────────────────");
    println!("✅ Database written to: {}", written.display());

    Ok(())
}
