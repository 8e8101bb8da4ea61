use std::fmt::Debug;
use std::str::FromStr;

use formula_eval::{number_to_text, CellValue};
use rust_decimal::Decimal;

use crate::error::TableError;
use crate::page::normalize;

/// One data row of a located table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableRow {
    /// Row index on the report page.
    pub index: usize,
    pub cells: Vec<CellValue>,
}

impl TableRow {
    /// Text of the first non-blank cell.
    pub fn leading_text(&self) -> Option<String> {
        self.cells
            .iter()
            .find(|c| !c.is_blank())
            .map(CellValue::display_text)
    }
}

/// A located table with its columns bound to keys of type `K`.
///
/// An empty table is a normal result: the section may simply be missing from
/// the report.
#[derive(Debug, Clone)]
pub struct Table<K> {
    name: String,
    columns: Vec<(K, usize)>,
    rows: Vec<TableRow>,
}

impl<K: Copy + PartialEq + Debug> Table<K> {
    pub fn new(name: impl Into<String>, columns: Vec<(K, usize)>, rows: Vec<TableRow>) -> Self {
        Self {
            name: name.into(),
            columns,
            rows,
        }
    }

    pub fn empty(name: impl Into<String>) -> Self {
        Self::new(name, Vec::new(), Vec::new())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[TableRow] {
        &self.rows
    }

    pub fn column_index(&self, column: K) -> Option<usize> {
        self.columns.iter().find(|(k, _)| *k == column).map(|(_, i)| *i)
    }

    /// Row whose leading text equals `text` (case and whitespace insensitive).
    pub fn find_row(&self, text: &str) -> Option<&TableRow> {
        let wanted = normalize(text);
        self.rows
            .iter()
            .find(|row| row.leading_text().map(|t| normalize(&t) == wanted).unwrap_or(false))
    }

    fn cell<'a>(&self, row: &'a TableRow, column: K) -> Result<(usize, &'a CellValue), TableError> {
        let col = self
            .column_index(column)
            .ok_or_else(|| TableError::MissingColumn(format!("{:?}", column), self.name.clone()))?;
        let value = row
            .cells
            .get(col)
            .ok_or(TableError::CellOutOfRow { row: row.index, col })?;
        Ok((col, value))
    }

    /// Amount in `column`. Blank cells and a lone dash read as zero; text such
    /// as `"1 234 567,89"` is accepted.
    pub fn currency_value(&self, row: &TableRow, column: K) -> Result<Decimal, TableError> {
        let (col, value) = self.cell(row, column)?;
        let not_numeric = || TableError::NotNumeric {
            row: row.index,
            col,
            text: value.display_text(),
        };

        match value {
            CellValue::Empty => Ok(Decimal::ZERO),
            CellValue::Number(n) => Decimal::from_str(&number_to_text(*n)).map_err(|_| not_numeric()),
            CellValue::Text(text) => parse_amount(text).ok_or_else(not_numeric),
            CellValue::Bool(_) | CellValue::Error(_) => Err(not_numeric()),
        }
    }

    pub fn string_value(&self, row: &TableRow, column: K) -> Result<String, TableError> {
        let (_, value) = self.cell(row, column)?;
        Ok(value.display_text().trim().to_string())
    }
}

/// Parses report amounts written with spaces between thousands and a comma
/// or dot as decimal separator.
pub fn parse_amount(text: &str) -> Option<Decimal> {
    let compact: String = text
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '\u{a0}')
        .map(|c| if c == ',' { '.' } else { c })
        .collect();

    if compact.is_empty() || compact == "-" {
        return Some(Decimal::ZERO);
    }
    Decimal::from_str(&compact).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Column {
        Name,
        Amount,
        Comment,
    }

    fn table() -> Table<Column> {
        let rows = vec![
            TableRow {
                index: 5,
                cells: vec![
                    CellValue::Empty,
                    CellValue::text("Денежные средства"),
                    CellValue::Number(1500.25),
                ],
            },
            TableRow {
                index: 6,
                cells: vec![
                    CellValue::text(" Общая  стоимость активов: "),
                    CellValue::Empty,
                    CellValue::text("1 234 567,89"),
                ],
            },
            TableRow {
                index: 7,
                cells: vec![CellValue::text("Прочее"), CellValue::Empty, CellValue::text("-")],
            },
            TableRow {
                index: 8,
                cells: vec![CellValue::text("Ошибка"), CellValue::Empty, CellValue::text("n/a")],
            },
        ];
        Table::new("ОЦЕНКА АКТИВОВ", vec![(Column::Name, 0), (Column::Amount, 2)], rows)
    }

    #[test]
    fn test_find_row_by_leading_text() {
        let table = table();
        assert_eq!(table.find_row("Общая стоимость активов:").map(|r| r.index), Some(6));
        assert_eq!(table.find_row("денежные средства").map(|r| r.index), Some(5));
        assert!(table.find_row("Итого").is_none());
    }

    #[test]
    fn test_currency_value() {
        let table = table();
        let rows = table.rows();
        assert_eq!(table.currency_value(&rows[0], Column::Amount).unwrap().to_string(), "1500.25");
        assert_eq!(table.currency_value(&rows[1], Column::Amount).unwrap().to_string(), "1234567.89");
        assert_eq!(table.currency_value(&rows[2], Column::Amount).unwrap(), Decimal::ZERO);
        assert!(matches!(
            table.currency_value(&rows[3], Column::Amount),
            Err(TableError::NotNumeric { row: 8, col: 2, .. })
        ));
        assert!(matches!(
            table.currency_value(&rows[0], Column::Comment),
            Err(TableError::MissingColumn(..))
        ));
    }

    #[test]
    fn test_string_value_and_empty_table() {
        let table = table();
        assert_eq!(table.string_value(&table.rows()[0], Column::Name).unwrap(), "");
        assert_eq!(table.string_value(&table.rows()[2], Column::Amount).unwrap(), "-");

        let empty: Table<Column> = Table::empty("missing");
        assert!(empty.is_empty());
        assert!(empty.find_row("anything").is_none());
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("\u{a0}12\u{a0}000,5").unwrap().to_string(), "12000.5");
        assert_eq!(parse_amount("").unwrap(), Decimal::ZERO);
        assert!(parse_amount("USD").is_none());
    }
}
