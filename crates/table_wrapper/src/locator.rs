use std::fmt::Debug;

use tracing::{debug, info};

use crate::column::TableColumn;
use crate::page::{normalize, CellAddress, ReportPage};
use crate::table::{Table, TableRow};

/// Rows below the anchor searched for the first header line.
pub const DEFAULT_HEADER_SEARCH_ROWS: usize = 10;

/// One accepted wording of a table header: the text that opens it and the
/// number of physical header lines.
#[derive(Debug, Clone, PartialEq)]
pub struct HeaderVariant {
    pub first_line: String,
    pub header_rows: usize,
}

impl HeaderVariant {
    pub fn new(first_line: &str, header_rows: usize) -> Self {
        Self {
            first_line: first_line.to_string(),
            header_rows,
        }
    }
}

/// Where a table is and what its header looks like.
#[derive(Debug, Clone)]
pub struct TableSpec<K> {
    pub name: String,
    /// Section titles; the first one found on the page wins.
    pub anchors: Vec<String>,
    /// Tried in order.
    pub variants: Vec<HeaderVariant>,
    pub columns: Vec<(K, TableColumn)>,
}

#[derive(Debug, Clone)]
pub struct TableLocator {
    header_search_rows: usize,
}

impl Default for TableLocator {
    fn default() -> Self {
        Self {
            header_search_rows: DEFAULT_HEADER_SEARCH_ROWS,
        }
    }
}

impl TableLocator {
    pub fn new(header_search_rows: usize) -> Self {
        Self { header_search_rows }
    }

    /// Finds the table described by `spec`. A missing anchor or a header that
    /// matches none of the variants yields an empty table.
    pub fn locate<K: Copy + PartialEq + Debug>(&self, page: &ReportPage, spec: &TableSpec<K>) -> Table<K> {
        let Some(anchor) = spec.anchors.iter().find_map(|a| page.find(a)) else {
            info!("Table '{}' not found in report", spec.name);
            return Table::empty(spec.name.clone());
        };

        for variant in &spec.variants {
            if let Some(table) = self.locate_variant(page, spec, anchor, variant) {
                debug!(
                    "Table '{}' located with header '{}', {} rows",
                    spec.name,
                    variant.first_line,
                    table.rows().len()
                );
                return table;
            }
        }

        info!("Table '{}' found but no known header matched", spec.name);
        Table::empty(spec.name.clone())
    }

    fn locate_variant<K: Copy + PartialEq + Debug>(
        &self,
        page: &ReportPage,
        spec: &TableSpec<K>,
        anchor: CellAddress,
        variant: &HeaderVariant,
    ) -> Option<Table<K>> {
        let search_end = anchor.row + 1 + self.header_search_rows;
        let first = page.find_in_rows(&variant.first_line, anchor.row + 1, search_end)?;
        let header_end = first.row + variant.header_rows;
        if variant.header_rows == 0 || header_end > page.row_count() {
            return None;
        }

        let header: Vec<Vec<String>> = (first.row..header_end)
            .map(|r| {
                page.row(r)
                    .unwrap_or_default()
                    .iter()
                    .map(|cell| normalize(&cell.display_text()))
                    .collect()
            })
            .collect();

        let mut columns = Vec::with_capacity(spec.columns.len());
        for (key, column) in &spec.columns {
            match column.find_in(&header) {
                Some(index) => columns.push((*key, index)),
                None => {
                    debug!("Column {:?} of '{}' missing under '{}'", key, spec.name, variant.first_line);
                    return None;
                }
            }
        }

        let rows = (header_end..page.row_count())
            .take_while(|&r| !page.is_blank_row(r))
            .map(|r| TableRow {
                index: r,
                cells: page.row(r).unwrap_or_default().to_vec(),
            })
            .collect();

        Some(Table::new(spec.name.clone(), columns, rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use formula_eval::CellValue;

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Summary {
        Rub,
    }

    const FIRST: &str = "На конец отчетного периода";
    const SECOND: &str = "по цене закрытия";

    fn spec() -> TableSpec<Summary> {
        TableSpec {
            name: "ОЦЕНКА АКТИВОВ".to_string(),
            anchors: vec!["ОЦЕНКА АКТИВОВ".to_string()],
            variants: vec![HeaderVariant::new(FIRST, 3), HeaderVariant::new(SECOND, 2)],
            columns: vec![(
                Summary::Rub,
                TableColumn::any_of(vec![
                    TableColumn::multi_line(&[FIRST, SECOND, "RUR"]),
                    TableColumn::multi_line(&[SECOND, "RUR"]),
                ]),
            )],
        }
    }

    fn text(s: &str) -> CellValue {
        CellValue::text(s)
    }

    fn page(header: Vec<Vec<CellValue>>) -> ReportPage {
        let mut rows = vec![vec![text("ОЦЕНКА АКТИВОВ, руб.")], vec![]];
        rows.extend(header);
        rows.push(vec![text("Денежные средства"), CellValue::Number(10.0)]);
        rows.push(vec![text("Общая стоимость активов:"), CellValue::Number(1500.5)]);
        rows.push(vec![]);
        rows.push(vec![text("Прочие данные"), CellValue::Number(1.0)]);
        ReportPage::from_rows(rows)
    }

    #[test]
    fn test_locate_first_variant() {
        let page = page(vec![
            vec![CellValue::Empty, text(FIRST)],
            vec![CellValue::Empty, text(SECOND)],
            vec![CellValue::Empty, text("RUR")],
        ]);

        let table = TableLocator::default().locate(&page, &spec());

        assert_eq!(table.rows().len(), 2);
        assert_eq!(table.column_index(Summary::Rub), Some(1));
        let row = table.find_row("Общая стоимость активов:").unwrap();
        assert_eq!(table.currency_value(row, Summary::Rub).unwrap().to_string(), "1500.5");
    }

    #[test]
    fn test_second_variant_is_tried_when_first_is_absent() {
        let page = page(vec![
            vec![CellValue::Empty, text("по цене закрытия")],
            vec![CellValue::Empty, text("RUR")],
        ]);

        let table = TableLocator::default().locate(&page, &spec());

        assert!(!table.is_empty());
        assert_eq!(table.rows()[0].index, 4);
        assert!(table.find_row("Прочие данные").is_none());
    }

    #[test]
    fn test_missing_anchor_gives_empty_table() {
        let page = ReportPage::from_rows(vec![
            vec![text("Движение денежных средств")],
            vec![text(SECOND)],
            vec![text("RUR")],
        ]);

        let table = TableLocator::default().locate(&page, &spec());

        assert!(table.is_empty());
        assert!(table.find_row("Общая стоимость активов:").is_none());
    }

    #[test]
    fn test_unknown_header_gives_empty_table() {
        let page = page(vec![vec![CellValue::Empty, text("Стоимость, USD")]]);
        assert!(TableLocator::default().locate(&page, &spec()).is_empty());
    }

    #[test]
    fn test_ambiguous_header_gives_empty_table() {
        let page = page(vec![
            vec![CellValue::Empty, text(SECOND), CellValue::Empty, text(SECOND)],
            vec![CellValue::Empty, text("RUR"), text("USD"), text("RUR")],
        ]);
        assert!(TableLocator::default().locate(&page, &spec()).is_empty());
    }

    #[test]
    fn test_header_search_is_bounded() {
        let mut header = vec![vec![]; 5];
        header.push(vec![text(SECOND)]);
        header.push(vec![text("RUR")]);
        let page = page(header);

        assert!(TableLocator::new(3).locate(&page, &spec()).is_empty());
        assert!(!TableLocator::new(10).locate(&page, &spec()).is_empty());
    }
}
