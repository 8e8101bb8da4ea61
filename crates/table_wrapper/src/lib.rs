//! Locating named tables on loosely formatted report pages.
//!
//! A report page is searched for a section anchor, then for one of several
//! accepted header wordings below it. Columns are described as data
//! ([`TableColumn`]) so header drift between report versions is handled by
//! adding variants.

mod column;
mod error;
mod locator;
mod page;
mod table;

pub use column::TableColumn;
pub use error::TableError;
pub use locator::{HeaderVariant, TableLocator, TableSpec, DEFAULT_HEADER_SEARCH_ROWS};
pub use page::{normalize, CellAddress, ReportPage};
pub use table::{parse_amount, Table, TableRow};
