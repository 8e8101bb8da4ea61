//! Workbook loading and formula evaluation for broker reports.
//!
//! [`Workbook::open`] reads any spreadsheet format `calamine` understands,
//! keeping formula text next to cached results. [`FormulaRepairEvaluator`]
//! then recomputes every formula cell, rewriting error-guard calls the
//! [`FormulaEngine`] has no implementation for.

mod engine;
mod error;
mod functions;
mod parser;
mod repair;
mod workbook;

pub use engine::{Evaluation, FormulaEngine};
pub use error::{FormulaError, Result};
pub use parser::parse_a1;
pub use repair::{index_of_close_brace, index_of_second_arg, EvaluationSummary, FormulaRepairEvaluator};
pub use workbook::{number_to_text, Cell, CellError, CellKey, CellValue, Sheet, Workbook};
