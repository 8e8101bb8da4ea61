//! In-memory workbook model.
//!
//! Cells keep both the typed value (a constant, or the cached result of a
//! formula) and the formula text when there is one. Workbooks are loaded
//! through `calamine`, which already exposes cached results and formula text
//! for the legacy binary and the XML-zip formats alike.

use std::fmt;
use std::path::Path;

use calamine::{open_workbook_auto, CellErrorType, Data, Range, Reader};
use tracing::{debug, warn};

use crate::error::{FormulaError, Result};

/// Spreadsheet error values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CellError {
    Null,
    Div0,
    Value,
    Ref,
    Name,
    Num,
    Na,
}

impl CellError {
    pub fn as_str(&self) -> &'static str {
        match self {
            CellError::Null => "#NULL!",
            CellError::Div0 => "#DIV/0!",
            CellError::Value => "#VALUE!",
            CellError::Ref => "#REF!",
            CellError::Name => "#NAME?",
            CellError::Num => "#NUM!",
            CellError::Na => "#N/A",
        }
    }
}

impl fmt::Display for CellError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&CellErrorType> for CellError {
    fn from(e: &CellErrorType) -> Self {
        match e {
            CellErrorType::Div0 => CellError::Div0,
            CellErrorType::NA => CellError::Na,
            CellErrorType::Name => CellError::Name,
            CellErrorType::Null => CellError::Null,
            CellErrorType::Num => CellError::Num,
            CellErrorType::Ref => CellError::Ref,
            CellErrorType::Value => CellError::Value,
            CellErrorType::GettingData => CellError::Na,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum CellValue {
    #[default]
    Empty,
    Bool(bool),
    Number(f64),
    Text(String),
    Error(CellError),
}

impl CellValue {
    pub fn text(s: impl Into<String>) -> Self {
        CellValue::Text(s.into())
    }

    /// Empty cells and empty strings.
    pub fn is_blank(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, CellValue::Error(_))
    }

    /// Text as a report reader sees it; numbers use the shortest general form.
    pub fn display_text(&self) -> String {
        match self {
            CellValue::Empty => String::new(),
            CellValue::Bool(true) => "TRUE".to_string(),
            CellValue::Bool(false) => "FALSE".to_string(),
            CellValue::Number(n) => number_to_text(*n),
            CellValue::Text(s) => s.clone(),
            CellValue::Error(e) => e.as_str().to_string(),
        }
    }
}

impl From<&Data> for CellValue {
    fn from(data: &Data) -> Self {
        match data {
            Data::Empty => CellValue::Empty,
            Data::Int(i) => CellValue::Number(*i as f64),
            Data::Float(f) => CellValue::Number(*f),
            Data::Bool(b) => CellValue::Bool(*b),
            Data::String(s) => CellValue::Text(s.clone()),
            // calamine DateTime is the Excel serial number (days since 1899-12-30)
            Data::DateTime(dt) => CellValue::Number(dt.as_f64()),
            Data::Error(e) => CellValue::Error(e.into()),
            other => CellValue::Text(other.to_string()),
        }
    }
}

/// Integers print without a fractional part, everything else as the shortest
/// round-trip decimal.
pub fn number_to_text(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Cell {
    /// Constant value, or the cached result when `formula` is set.
    pub value: CellValue,
    /// Formula text without the leading `=`.
    pub formula: Option<String>,
}

impl Cell {
    pub fn value(value: CellValue) -> Self {
        Self { value, formula: None }
    }

    pub fn formula(formula: impl Into<String>, cached: CellValue) -> Self {
        Self {
            value: cached,
            formula: Some(formula.into()),
        }
    }

    pub fn is_formula(&self) -> bool {
        self.formula.is_some()
    }
}

/// Zero-based position of a cell inside a workbook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellKey {
    pub sheet: usize,
    pub row: usize,
    pub col: usize,
}

impl CellKey {
    pub fn new(sheet: usize, row: usize, col: usize) -> Self {
        Self { sheet, row, col }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Sheet {
    name: String,
    rows: Vec<Vec<Cell>>,
}

impl Sheet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rows: Vec::new(),
        }
    }

    /// Builds a sheet from literal rows, handy for hand-made reports.
    pub fn from_rows(name: impl Into<String>, rows: Vec<Vec<Cell>>) -> Self {
        Self {
            name: name.into(),
            rows,
        }
    }

    /// Combines calamine's cached values and formula text, which may cover
    /// different areas of the sheet, into one grid with absolute positions.
    pub fn from_ranges(
        name: impl Into<String>,
        values: &Range<Data>,
        formulas: Option<&Range<String>>,
    ) -> Self {
        let mut sheet = Sheet::new(name);

        if let Some((start_row, start_col)) = values.start() {
            for (r, c, data) in values.used_cells() {
                let row = start_row as usize + r;
                let col = start_col as usize + c;
                sheet.set_cell(row, col, Cell::value(CellValue::from(data)));
            }
        }

        if let Some(formulas) = formulas {
            if let Some((start_row, start_col)) = formulas.start() {
                for (r, c, text) in formulas.used_cells() {
                    let text = text.trim();
                    if text.is_empty() {
                        continue;
                    }
                    let row = start_row as usize + r;
                    let col = start_col as usize + c;
                    let text = text.strip_prefix('=').unwrap_or(text).to_string();
                    sheet.cell_entry(row, col).formula = Some(text);
                }
            }
        }

        sheet
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn cell(&self, row: usize, col: usize) -> Option<&Cell> {
        self.rows.get(row)?.get(col)
    }

    pub fn cell_mut(&mut self, row: usize, col: usize) -> Option<&mut Cell> {
        self.rows.get_mut(row)?.get_mut(col)
    }

    /// Places a cell, growing the grid as needed.
    pub fn set_cell(&mut self, row: usize, col: usize, cell: Cell) {
        *self.cell_entry(row, col) = cell;
    }

    fn cell_entry(&mut self, row: usize, col: usize) -> &mut Cell {
        if self.rows.len() <= row {
            self.rows.resize_with(row + 1, Vec::new);
        }
        let cells = &mut self.rows[row];
        if cells.len() <= col {
            cells.resize_with(col + 1, Cell::default);
        }
        &mut cells[col]
    }
}

#[derive(Debug, Clone, Default)]
pub struct Workbook {
    sheets: Vec<Sheet>,
}

impl Workbook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens `.xls`, `.xlsx`, `.xlsb` or `.ods`. A sheet whose formulas cannot
    /// be read keeps its cached values.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut source = open_workbook_auto(path).map_err(|source| FormulaError::Open {
            path: path.display().to_string(),
            source,
        })?;

        let mut workbook = Workbook::new();
        for name in source.sheet_names() {
            let values = source
                .worksheet_range(&name)
                .map_err(|source| FormulaError::ReadSheet {
                    sheet: name.clone(),
                    source,
                })?;

            let formulas = match source.worksheet_formula(&name) {
                Ok(formulas) => Some(formulas),
                Err(e) => {
                    warn!("Cannot read formulas of sheet '{}', keeping cached values: {}", name, e);
                    None
                }
            };

            let sheet = Sheet::from_ranges(name, &values, formulas.as_ref());
            debug!("Loaded sheet '{}' with {} rows", sheet.name(), sheet.row_count());
            workbook.add_sheet(sheet);
        }

        Ok(workbook)
    }

    pub fn add_sheet(&mut self, sheet: Sheet) {
        self.sheets.push(sheet);
    }

    pub fn sheets(&self) -> &[Sheet] {
        &self.sheets
    }

    pub fn sheet(&self, index: usize) -> Option<&Sheet> {
        self.sheets.get(index)
    }

    pub fn sheet_mut(&mut self, index: usize) -> Option<&mut Sheet> {
        self.sheets.get_mut(index)
    }

    /// Sheet names compare case-insensitively, as in spreadsheet formulas.
    pub fn sheet_index(&self, name: &str) -> Option<usize> {
        let name = name.to_lowercase();
        self.sheets.iter().position(|s| s.name().to_lowercase() == name)
    }

    pub fn cell(&self, key: CellKey) -> Option<&Cell> {
        self.sheet(key.sheet)?.cell(key.row, key.col)
    }

    pub fn cell_mut(&mut self, key: CellKey) -> Option<&mut Cell> {
        self.sheet_mut(key.sheet)?.cell_mut(key.row, key.col)
    }

    /// Every formula cell in sheet, row, column order.
    pub fn formula_cells(&self) -> Vec<CellKey> {
        let mut keys = Vec::new();
        for (sheet_idx, sheet) in self.sheets.iter().enumerate() {
            for (row, cells) in sheet.rows().iter().enumerate() {
                for (col, cell) in cells.iter().enumerate() {
                    if cell.is_formula() {
                        keys.push(CellKey::new(sheet_idx, row, col));
                    }
                }
            }
        }
        keys
    }
}
