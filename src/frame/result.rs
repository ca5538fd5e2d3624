use crate::core::{RowKey, Value};
use std::fmt;

/// Rows read through a frame: one line per key, one cell per requested column.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameRows {
    index: Vec<String>,
    columns: Vec<String>,
    keys: Vec<RowKey>,
    rows: Vec<Vec<Value>>,
}

impl FrameRows {
    pub fn empty(index: Vec<String>, columns: Vec<String>) -> Self {
        Self::new(index, columns, Vec::new(), Vec::new())
    }

    pub fn new(index: Vec<String>, columns: Vec<String>, keys: Vec<RowKey>, rows: Vec<Vec<Value>>) -> Self {
        Self {
            index,
            columns,
            keys,
            rows,
        }
    }

    pub fn index(&self) -> &[String] {
        &self.index
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn keys(&self) -> &[RowKey] {
        &self.keys
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, key: &RowKey, column: &str) -> Option<&Value> {
        let row = self.keys.iter().position(|k| k == key)?;
        let col = self.columns.iter().position(|c| c == column)?;
        self.rows.get(row)?.get(col)
    }

    pub fn column(&self, column: &str) -> Option<Vec<&Value>> {
        let col = self.columns.iter().position(|c| c == column)?;
        Some(self.rows.iter().filter_map(|row| row.get(col)).collect())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RowKey, &[Value])> {
        self.keys.iter().zip(self.rows.iter().map(Vec::as_slice))
    }

    pub fn print(&self) {
        println!("{}", self);
    }
}

impl fmt::Display for FrameRows {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.columns.is_empty() && self.index.is_empty() {
            return write!(f, "Empty result set");
        }

        let header: Vec<&str> = self.index.iter().chain(&self.columns).map(String::as_str).collect();
        let lines: Vec<Vec<String>> = self
            .iter()
            .map(|(key, row)| {
                (0..key.arity())
                    .filter_map(|level| key.level(level))
                    .map(|v| v.to_string())
                    .chain(row.iter().map(|v| v.to_string()))
                    .collect()
            })
            .collect();

        // Calculate column widths
        let mut widths: Vec<usize> = header.iter().map(|c| c.len()).collect();
        for line in &lines {
            for (i, cell) in line.iter().enumerate() {
                if let Some(w) = widths.get_mut(i) {
                    *w = (*w).max(cell.len());
                }
            }
        }

        let header: Vec<String> = header
            .iter()
            .zip(&widths)
            .map(|(col, width)| format!("{:width$}", col, width = width))
            .collect();
        writeln!(f, "{}", header.join(" | "))?;

        let separator: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
        writeln!(f, "{}", separator.join("-+-"))?;

        for line in &lines {
            let cells: Vec<String> = line
                .iter()
                .zip(&widths)
                .map(|(cell, width)| format!("{:width$}", cell, width = width))
                .collect();
            writeln!(f, "{}", cells.join(" | "))?;
        }

        write!(f, "\n{} row(s)", self.rows.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows() -> FrameRows {
        FrameRows::new(
            vec!["spineID".into()],
            vec!["z".into(), "note".into()],
            vec![RowKey::Single(0), RowKey::Single(4)],
            vec![
                vec![Value::Integer(3), Value::Text("a".into())],
                vec![Value::Integer(12), Value::Text("bb".into())],
            ],
        )
    }

    #[test]
    fn test_lookup() {
        let rows = rows();
        assert_eq!(rows.get(&RowKey::Single(4), "z"), Some(&Value::Integer(12)));
        assert_eq!(rows.get(&RowKey::Single(1), "z"), None);
        assert_eq!(rows.column("note").map(|c| c.len()), Some(2));
    }

    #[test]
    fn test_render_aligns_columns() {
        let text = rows().to_string();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "spineID | z  | note");
        assert_eq!(lines[1], "--------+----+-----");
        assert_eq!(lines[3], "4       | 12 | bb  ");
        assert!(text.ends_with("2 row(s)"));
    }
}
