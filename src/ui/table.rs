use tabled::{settings::Style, Table, Tabled};

use crate::storage::TableCount;

#[derive(Tabled)]
pub struct TableRow {
    #[tabled(rename = "Table")]
    pub label: String,
    #[tabled(rename = "Rows")]
    pub value: String,
}

#[derive(Default)]
pub struct TableBuilder {
    rows: Vec<TableRow>,
}

impl TableBuilder {
    pub fn new() -> Self {
        Self { rows: Vec::new() }
    }

    pub fn add_row(&mut self, label: &str, value: &str) {
        self.rows.push(TableRow {
            label: label.to_string(),
            value: value.to_string(),
        });
    }

    pub fn build(&self) -> String {
        if self.rows.is_empty() {
            return String::new();
        }

        Table::new(&self.rows).with(Style::rounded()).to_string()
    }
}

/// Rounded table of per-table row counts with a total line
pub fn counts_table(counts: &[TableCount]) -> String {
    let mut builder = TableBuilder::new();
    for count in counts {
        builder.add_row(&count.table, &count.rows.to_string());
    }
    if !counts.is_empty() {
        let total: usize = counts.iter().map(|c| c.rows).sum();
        builder.add_row("total", &total.to_string());
    }
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_table_is_blank() {
        assert_eq!(counts_table(&[]), "");
    }

    #[test]
    fn test_counts_and_total() {
        let rendered = counts_table(&[
            TableCount {
                table: "resource".to_string(),
                rows: 3,
            },
            TableCount {
                table: "url".to_string(),
                rows: 2,
            },
        ]);
        assert!(rendered.contains("Table"));
        assert!(rendered.contains("resource"));
        assert!(rendered.contains("total"));
        assert!(rendered.contains('5'));
    }
}
