use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum TableError {
    #[error("Column {0} is not part of table '{1}'")]
    MissingColumn(String, String),

    #[error("Row {row} has no cell in column {col}")]
    CellOutOfRow { row: usize, col: usize },

    #[error("Cell ({row}, {col}) is not a currency amount: '{text}'")]
    NotNumeric { row: usize, col: usize, text: String },
}
