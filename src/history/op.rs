// ============================================================================
// Row Diff
// ============================================================================
//
// An Op is the before/after picture of one table mutation, split into rows
// that disappeared, rows that appeared and rows whose stored fields
// changed. Replaying it backwards or forwards is how undo/redo work.
//
// ============================================================================

use crate::core::{Result, RowKey, StoreError, Value};
use crate::storage::Table;
use std::collections::{BTreeMap, BTreeSet};

/// Stored field values of one row, in schema column order.
pub type StoredRow = Vec<Value>;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Op {
    schema: String,
    deleted: BTreeMap<RowKey, StoredRow>,
    added: BTreeMap<RowKey, StoredRow>,
    changed: BTreeMap<RowKey, BTreeMap<String, (Value, Value)>>,
}

impl Op {
    /// Diff of the touched rows. Keys absent from `before` were added, keys
    /// absent from `after` were deleted; only differing columns are recorded
    /// for keys present in both.
    pub fn between(
        schema: &str,
        columns: &[String],
        before: &BTreeMap<RowKey, StoredRow>,
        after: &BTreeMap<RowKey, StoredRow>,
    ) -> Self {
        let mut op = Op {
            schema: schema.to_string(),
            ..Default::default()
        };

        for (key, old) in before {
            match after.get(key) {
                None => {
                    op.deleted.insert(*key, old.clone());
                }
                Some(new) => {
                    let diff: BTreeMap<String, (Value, Value)> = columns
                        .iter()
                        .zip(old.iter().zip(new))
                        .filter(|(_, (a, b))| a != b)
                        .map(|(name, (a, b))| (name.clone(), (a.clone(), b.clone())))
                        .collect();
                    if !diff.is_empty() {
                        op.changed.insert(*key, diff);
                    }
                }
            }
        }

        for (key, new) in after {
            if !before.contains_key(key) {
                op.added.insert(*key, new.clone());
            }
        }
        op
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn is_empty(&self) -> bool {
        self.deleted.is_empty() && self.added.is_empty() && self.changed.is_empty()
    }

    pub fn deleted(&self) -> &BTreeMap<RowKey, StoredRow> {
        &self.deleted
    }

    pub fn added(&self) -> &BTreeMap<RowKey, StoredRow> {
        &self.added
    }

    pub fn changed(&self) -> &BTreeMap<RowKey, BTreeMap<String, (Value, Value)>> {
        &self.changed
    }

    /// Keys whose whole row appeared or disappeared.
    pub fn structural_keys(&self) -> BTreeSet<RowKey> {
        self.deleted.keys().chain(self.added.keys()).copied().collect()
    }

    /// Changed column names per key.
    pub fn changed_columns(&self) -> BTreeMap<RowKey, BTreeSet<String>> {
        self.changed
            .iter()
            .map(|(key, cols)| (*key, cols.keys().cloned().collect()))
            .collect()
    }

    /// Folds a newer op on the same rows into this one, keeping the oldest
    /// "before" values. Returns false, leaving `self` untouched, when the two
    /// ops don't cover the same schema and the same row partitions.
    pub fn merge(&mut self, newer: &Op) -> bool {
        let same_rows = self.schema == newer.schema
            && self.deleted.keys().eq(newer.deleted.keys())
            && self.added.keys().eq(newer.added.keys())
            && self.changed.keys().eq(newer.changed.keys());
        if !same_rows {
            return false;
        }

        for (key, row) in &newer.added {
            self.added.insert(*key, row.clone());
        }
        for (key, cols) in &newer.changed {
            let entry = self.changed.entry(*key).or_default();
            for (name, (before, after)) in cols {
                match entry.get_mut(name) {
                    Some(pair) => pair.1 = after.clone(),
                    None => {
                        entry.insert(name.clone(), (before.clone(), after.clone()));
                    }
                }
            }
        }
        true
    }

    /// Undo: drop added rows, restore changed fields, re-insert deleted rows.
    pub fn reverse(&self, table: &mut Table) -> Result<()> {
        self.check_table(table)?;
        for key in self.added.keys() {
            table.remove_row(key);
        }
        for (key, cols) in &self.changed {
            for (name, (before, _)) in cols {
                table.set_stored(key, name, before.clone())?;
            }
        }
        for (key, row) in &self.deleted {
            table.insert_row(*key, row.clone())?;
        }
        Ok(())
    }

    /// Redo: drop deleted rows, set changed fields, insert added rows.
    pub fn apply(&self, table: &mut Table) -> Result<()> {
        self.check_table(table)?;
        for key in self.deleted.keys() {
            table.remove_row(key);
        }
        for (key, cols) in &self.changed {
            for (name, (_, after)) in cols {
                table.set_stored(key, name, after.clone())?;
            }
        }
        for (key, row) in &self.added {
            table.insert_row(*key, row.clone())?;
        }
        Ok(())
    }

    fn check_table(&self, table: &Table) -> Result<()> {
        if table.schema().name() != self.schema {
            return Err(StoreError::InvalidSchema(format!(
                "op recorded on '{}' replayed against '{}'",
                self.schema,
                table.schema().name()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols() -> Vec<String> {
        vec!["a".to_string(), "b".to_string()]
    }

    fn rows(entries: &[(i64, i64, i64)]) -> BTreeMap<RowKey, StoredRow> {
        entries
            .iter()
            .map(|&(id, a, b)| (RowKey::Single(id), vec![Value::Integer(a), Value::Integer(b)]))
            .collect()
    }

    #[test]
    fn test_partitions() {
        let before = rows(&[(0, 1, 1), (1, 2, 2)]);
        let after = rows(&[(1, 2, 5), (2, 7, 7)]);
        let op = Op::between("T", &cols(), &before, &after);

        assert_eq!(op.deleted().keys().collect::<Vec<_>>(), vec![&RowKey::Single(0)]);
        assert_eq!(op.added().keys().collect::<Vec<_>>(), vec![&RowKey::Single(2)]);
        let changed = &op.changed()[&RowKey::Single(1)];
        assert_eq!(changed.len(), 1);
        assert_eq!(changed["b"], (Value::Integer(2), Value::Integer(5)));
    }

    #[test]
    fn test_identical_rows_make_empty_op() {
        let same = rows(&[(0, 1, 1)]);
        assert!(Op::between("T", &cols(), &same, &same).is_empty());
    }

    #[test]
    fn test_merge_keeps_oldest_before() {
        let mut first = Op::between("T", &cols(), &rows(&[(0, 1, 1)]), &rows(&[(0, 2, 1)]));
        let second = Op::between("T", &cols(), &rows(&[(0, 2, 1)]), &rows(&[(0, 3, 4)]));
        assert!(first.merge(&second));

        let changed = &first.changed()[&RowKey::Single(0)];
        assert_eq!(changed["a"], (Value::Integer(1), Value::Integer(3)));
        assert_eq!(changed["b"], (Value::Integer(1), Value::Integer(4)));
    }

    #[test]
    fn test_merge_rejects_other_rows() {
        let mut first = Op::between("T", &cols(), &rows(&[(0, 1, 1)]), &rows(&[(0, 2, 1)]));
        let other = Op::between("T", &cols(), &rows(&[(1, 1, 1)]), &rows(&[(1, 2, 1)]));
        let snapshot = first.clone();
        assert!(!first.merge(&other));
        assert_eq!(first, snapshot);
    }
}
