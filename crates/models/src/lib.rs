
use chrono::{DateTime, FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_PIVOT_CURRENCY: &str = "RUB";
pub const DEFAULT_REPORT_ZONE: &str = "+03:00";
pub const DEFAULT_RATE_PROVIDER_URL: &str = "https://www.cbr-xml-daily.ru/archive";
pub const DEFAULT_MAX_LOOKBACK_DAYS: u32 = 10;

const EXCHANGE_RATE_SUFFIX: &str = "_EXCHANGE_RATE";

// Settings models
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateProviderSettings {
	#[serde(default = "default_rate_provider_url")]
	pub base_url: String,
	#[serde(default = "default_max_lookback_days")]
	pub max_lookback_days: u32,
}

impl Default for RateProviderSettings {
	fn default() -> Self {
		Self {
			base_url: default_rate_provider_url(),
			max_lookback_days: default_max_lookback_days(),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
	#[serde(default = "default_pivot_currency")]
	pub pivot_currency: String,
	/// UTC offset of the broker's reports, e.g. `+03:00`.
	#[serde(default = "default_report_zone")]
	pub report_zone: String,
	#[serde(default)]
	pub portfolio: Option<String>,
	#[serde(default)]
	pub rate_provider: RateProviderSettings,
}

impl Default for Settings {
	fn default() -> Self {
		Self {
			pivot_currency: default_pivot_currency(),
			report_zone: default_report_zone(),
			portfolio: None,
			rate_provider: RateProviderSettings::default(),
		}
	}
}

impl Settings {
	/// Parsed `report_zone`, falling back to the default offset when malformed.
	pub fn zone(&self) -> FixedOffset {
		self.report_zone
			.trim()
			.parse::<FixedOffset>()
			.ok()
			.or_else(|| DEFAULT_REPORT_ZONE.parse().ok())
			.unwrap_or_else(|| Utc.fix())
	}
}

fn default_pivot_currency() -> String { DEFAULT_PIVOT_CURRENCY.to_string() }
fn default_report_zone() -> String { DEFAULT_REPORT_ZONE.to_string() }
fn default_rate_provider_url() -> String { DEFAULT_RATE_PROVIDER_URL.to_string() }
fn default_max_lookback_days() -> u32 { DEFAULT_MAX_LOOKBACK_DAYS }

// Extracted report facts
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum PortfolioPropertyKind {
	TotalAssets,
	/// Rate of `currency` against the report's pivot currency.
	ExchangeRate { currency: String },
}

impl PortfolioPropertyKind {
	pub fn exchange_rate_for(currency: &str) -> Self {
		Self::ExchangeRate { currency: currency.trim().to_uppercase() }
	}
}

impl fmt::Display for PortfolioPropertyKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::TotalAssets => f.write_str("TOTAL_ASSETS"),
			Self::ExchangeRate { currency } => write!(f, "{currency}{EXCHANGE_RATE_SUFFIX}"),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownPropertyKind(pub String);

impl fmt::Display for UnknownPropertyKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "unknown portfolio property kind: {}", self.0)
	}
}

impl std::error::Error for UnknownPropertyKind {}

impl FromStr for PortfolioPropertyKind {
	type Err = UnknownPropertyKind;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let s = s.trim();
		if s.eq_ignore_ascii_case("TOTAL_ASSETS") {
			return Ok(Self::TotalAssets);
		}
		match s.to_uppercase().strip_suffix(EXCHANGE_RATE_SUFFIX) {
			Some(currency) if !currency.is_empty() && currency.chars().all(|c| c.is_ascii_alphabetic()) => {
				Ok(Self::exchange_rate_for(currency))
			}
			_ => Err(UnknownPropertyKind(s.to_string())),
		}
	}
}

impl From<PortfolioPropertyKind> for String {
	fn from(kind: PortfolioPropertyKind) -> Self { kind.to_string() }
}

impl TryFrom<String> for PortfolioPropertyKind {
	type Error = UnknownPropertyKind;

	fn try_from(value: String) -> Result<Self, Self::Error> { value.parse() }
}

/// A single fact extracted from a broker report. `value` keeps the exact
/// decimal text so no precision is lost between extraction and valuation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortfolioProperty {
	pub portfolio: String,
	pub property: PortfolioPropertyKind,
	pub value: String,
	pub timestamp: DateTime<Utc>,
}
