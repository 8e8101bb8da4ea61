//! Exchange rates for report valuation.
//!
//! [`ExchangeRateResolver`] answers "how many units of quote per unit of
//! base" at an instant, preferring rates printed in the report itself and
//! crossing them through the pivot currency. Only when the report is silent
//! does it ask a [`HistoricalRateProvider`], such as [`CbrRateProvider`].

mod cbr;
mod resolver;
mod store;

pub use cbr::{CbrRateProvider, DailyRates};
pub use resolver::{round_rate, ExchangeRateResolver, HistoricalRateProvider, RATE_SCALE};
pub use store::PropertyStore;
