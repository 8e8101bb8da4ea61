use formula_eval::{CellValue, Sheet};

/// Zero-based address of a cell on a [`ReportPage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellAddress {
    pub row: usize,
    pub col: usize,
}

/// Read-only grid of cell values for one report sheet.
///
/// Formula cells contribute their cached result, so the page should be taken
/// after the workbook went through the evaluation pass.
#[derive(Debug, Clone, Default)]
pub struct ReportPage {
    rows: Vec<Vec<CellValue>>,
}

impl ReportPage {
    pub fn from_sheet(sheet: &Sheet) -> Self {
        let rows = sheet
            .rows()
            .iter()
            .map(|cells| cells.iter().map(|c| c.value.clone()).collect())
            .collect();
        Self { rows }
    }

    pub fn from_rows(rows: Vec<Vec<CellValue>>) -> Self {
        Self { rows }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn row(&self, row: usize) -> Option<&[CellValue]> {
        self.rows.get(row).map(Vec::as_slice)
    }

    pub fn cell(&self, row: usize, col: usize) -> Option<&CellValue> {
        self.rows.get(row)?.get(col)
    }

    /// Display text of a cell, empty when the cell does not exist.
    pub fn cell_text(&self, row: usize, col: usize) -> String {
        self.cell(row, col).map(CellValue::display_text).unwrap_or_default()
    }

    pub fn is_blank_row(&self, row: usize) -> bool {
        self.row(row)
            .map(|cells| cells.iter().all(CellValue::is_blank))
            .unwrap_or(true)
    }

    /// First cell, in row-major order, whose text starts with `needle`
    /// (case and whitespace insensitive).
    pub fn find(&self, needle: &str) -> Option<CellAddress> {
        self.find_from(needle, 0)
    }

    pub fn find_from(&self, needle: &str, start_row: usize) -> Option<CellAddress> {
        self.find_in_rows(needle, start_row, self.rows.len())
    }

    /// Like [`ReportPage::find_from`] but only looks at rows before `end_row`.
    pub fn find_in_rows(&self, needle: &str, start_row: usize, end_row: usize) -> Option<CellAddress> {
        let needle = normalize(needle);
        if needle.is_empty() {
            return None;
        }

        let end_row = end_row.min(self.rows.len());
        for row in start_row..end_row {
            for (col, value) in self.rows[row].iter().enumerate() {
                if let CellValue::Text(text) = value {
                    if normalize(text).starts_with(&needle) {
                        return Some(CellAddress { row, col });
                    }
                }
            }
        }
        None
    }
}

/// Lower-cases, turns non-breaking spaces into spaces and collapses runs of
/// whitespace.
pub fn normalize(text: &str) -> String {
    text.replace('\u{a0}', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page() -> ReportPage {
        ReportPage::from_rows(vec![
            vec![CellValue::text("Брокерский отчет")],
            vec![],
            vec![
                CellValue::Number(1.0),
                CellValue::text("ОЦЕНКА\u{a0}АКТИВОВ,  руб."),
            ],
            vec![CellValue::text("Оценка активов")],
        ])
    }

    #[test]
    fn test_find_is_prefix_and_case_insensitive() {
        let page = page();
        assert_eq!(page.find("оценка активов"), Some(CellAddress { row: 2, col: 1 }));
        assert_eq!(page.find_from("ОЦЕНКА АКТИВОВ", 3), Some(CellAddress { row: 3, col: 0 }));
        assert_eq!(page.find("активов"), None);
        assert_eq!(page.find("  "), None);
    }

    #[test]
    fn test_find_in_rows_respects_bound() {
        let page = page();
        assert_eq!(page.find_in_rows("Оценка", 0, 2), None);
    }

    #[test]
    fn test_blank_rows_and_text() {
        let page = page();
        assert!(page.is_blank_row(1));
        assert!(page.is_blank_row(99));
        assert!(!page.is_blank_row(0));
        assert_eq!(page.cell_text(2, 0), "1");
        assert_eq!(page.cell_text(7, 7), "");
    }
}
