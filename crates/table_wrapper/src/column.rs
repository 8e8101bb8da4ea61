use std::collections::BTreeSet;

use tracing::debug;

use crate::page::normalize;

/// Header text a table column is recognised by.
///
/// Broker formats are described as data: a new wording is one more
/// `AnyOf` option, not new code.
#[derive(Debug, Clone, PartialEq)]
pub enum TableColumn {
    /// A header cell containing this text. Two such cells in the same
    /// header row make the match ambiguous and the column is not found.
    Text(String),
    /// One text per consecutive header line, each at or to the right of the
    /// previous one; the column is where the last line is found. Paths that
    /// end in different columns make the match ambiguous.
    MultiLine(Vec<String>),
    /// The first option that matches.
    AnyOf(Vec<TableColumn>),
}

impl TableColumn {
    pub fn text(text: &str) -> Self {
        TableColumn::Text(text.to_string())
    }

    pub fn multi_line(lines: &[&str]) -> Self {
        TableColumn::MultiLine(lines.iter().map(|l| l.to_string()).collect())
    }

    pub fn any_of(options: Vec<TableColumn>) -> Self {
        TableColumn::AnyOf(options)
    }

    /// Column index of this column in `header`, a grid of normalised header
    /// texts (one inner vector per header line).
    pub fn find_in(&self, header: &[Vec<String>]) -> Option<usize> {
        match self {
            TableColumn::Text(text) => {
                let text = normalize(text);
                for line in header {
                    let hits: Vec<usize> = matching_columns(line, &text, 0).collect();
                    match hits.as_slice() {
                        [] => continue,
                        [col] => return Some(*col),
                        _ => {
                            debug!("Header '{}' is ambiguous, found in columns {:?}", text, hits);
                            return None;
                        }
                    }
                }
                None
            }
            TableColumn::MultiLine(lines) => {
                let lines: Vec<String> = lines.iter().map(|l| normalize(l)).collect();
                if lines.is_empty() || lines.len() > header.len() {
                    return None;
                }
                let mut ends = BTreeSet::new();
                for start in 0..=header.len() - lines.len() {
                    collect_line_ends(header, start, &lines, 0, &mut ends);
                }
                match ends.len() {
                    0 => None,
                    1 => ends.first().copied(),
                    _ => {
                        debug!("Header {:?} is ambiguous, found in columns {:?}", lines, ends);
                        None
                    }
                }
            }
            TableColumn::AnyOf(options) => options.iter().find_map(|option| option.find_in(header)),
        }
    }
}

fn matching_columns<'a>(line: &'a [String], text: &'a str, min_col: usize) -> impl Iterator<Item = usize> + 'a {
    line.iter()
        .enumerate()
        .skip(min_col)
        .filter(move |(_, cell)| !cell.is_empty() && cell.contains(text))
        .map(|(col, _)| col)
}

fn collect_line_ends(header: &[Vec<String>], row: usize, lines: &[String], min_col: usize, ends: &mut BTreeSet<usize>) {
    let Some((first, rest)) = lines.split_first() else {
        return;
    };
    let Some(line) = header.get(row) else {
        return;
    };
    for col in matching_columns(line, first, min_col) {
        if rest.is_empty() {
            ends.insert(col);
        } else {
            collect_line_ends(header, row + 1, rest, col, ends);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(lines: &[&[&str]]) -> Vec<Vec<String>> {
        lines
            .iter()
            .map(|line| line.iter().map(|cell| normalize(cell)).collect())
            .collect()
    }

    #[test]
    fn test_text_column() {
        let header = header(&[&["", "Наименование", "Количество, шт."]]);
        assert_eq!(TableColumn::text("количество").find_in(&header), Some(2));
        assert_eq!(TableColumn::text("Цена").find_in(&header), None);
    }

    #[test]
    fn test_text_column_is_ambiguous_within_a_row() {
        let header = header(&[&["RUR", "USD", "RUR"]]);
        assert_eq!(TableColumn::text("RUR").find_in(&header), None);
        assert_eq!(TableColumn::text("USD").find_in(&header), Some(1));
    }

    #[test]
    fn test_multi_line_moves_right() {
        let header = header(&[
            &["", "На начало периода", "", "На конец отчетного периода", ""],
            &["", "по цене закрытия", "", "по цене закрытия", ""],
            &["", "RUR", "USD", "RUR", "USD"],
        ]);
        let column = TableColumn::multi_line(&["На конец отчетного периода", "по цене закрытия", "RUR"]);
        assert_eq!(column.find_in(&header), Some(3));

        // Start and end of period both match the two-line wording
        let short = TableColumn::multi_line(&["по цене закрытия", "RUR"]);
        assert_eq!(short.find_in(&header), None);
    }

    #[test]
    fn test_multi_line_is_ambiguous_across_columns() {
        let header = header(&[
            &["", "по цене закрытия", "", "по цене закрытия"],
            &["", "rur", "usd", "rur"],
        ]);
        let column = TableColumn::multi_line(&["по цене закрытия", "RUR"]);
        assert_eq!(column.find_in(&header), None);
    }

    #[test]
    fn test_multi_line_single_path() {
        let header = header(&[&["", "", "по цене закрытия"], &["", "USD", "RUR"]]);
        let column = TableColumn::multi_line(&["по цене закрытия", "RUR"]);
        assert_eq!(column.find_in(&header), Some(2));
    }

    #[test]
    fn test_any_of_takes_first_matching_option() {
        let header = header(&[&["", "по цене закрытия"], &["", "RUR"]]);
        let column = TableColumn::any_of(vec![
            TableColumn::multi_line(&["На конец отчетного периода", "по цене закрытия", "RUR"]),
            TableColumn::multi_line(&["по цене закрытия", "RUR"]),
        ]);
        assert_eq!(column.find_in(&header), Some(1));
    }
}
