use thiserror::Error;

pub type Result<T> = std::result::Result<T, FormulaError>;

#[derive(Debug, Error)]
pub enum FormulaError {
    #[error("Cannot open workbook {path}")]
    Open {
        path: String,
        #[source]
        source: calamine::Error,
    },

    #[error("Cannot read sheet '{sheet}'")]
    ReadSheet {
        sheet: String,
        #[source]
        source: calamine::Error,
    },

    #[error("Cannot parse formula '{formula}': {message}")]
    Parse { formula: String, message: String },

    #[error("Sheet index {0} is out of range")]
    SheetIndex(usize),
}
