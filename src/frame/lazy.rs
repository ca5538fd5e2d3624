// ============================================================================
// Lazy Frame
// ============================================================================
//
// Read/write handle on one table of a shared store. Reads compute stale
// cells on demand; writes go through the store so logging and invalidation
// always run. A filtered frame restricts the visible keys without copying
// any rows.
//
// ============================================================================

use super::result::FrameRows;
use crate::core::{Ids, Result, RowKey, StoreError, Value};
use crate::storage::{ColumnAttributes, Schema, SharedStore, UpdateOptions};
use std::collections::BTreeSet;
use std::rc::Rc;

#[derive(Clone)]
pub struct LazyFrame {
    store: SharedStore,
    schema: Rc<Schema>,
    restriction: Option<Rc<BTreeSet<RowKey>>>,
}

impl LazyFrame {
    pub fn new(store: SharedStore, name: &str) -> Result<Self> {
        let schema = store.borrow().schema(name)?;
        Ok(Self {
            store,
            schema,
            restriction: None,
        })
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn schema(&self) -> &Rc<Schema> {
        &self.schema
    }

    pub fn name(&self) -> &str {
        self.schema.name()
    }

    /// Visible keys that currently exist, in key order.
    pub fn keys(&self) -> Result<Vec<RowKey>> {
        let keys = self.store.borrow().keys(self.name())?;
        Ok(match &self.restriction {
            Some(allowed) => keys.into_iter().filter(|k| allowed.contains(k)).collect(),
            None => keys,
        })
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.keys()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn contains(&self, key: &RowKey) -> Result<bool> {
        let visible = self.restriction.as_ref().is_none_or(|allowed| allowed.contains(key));
        Ok(visible && self.store.borrow().table(self.name())?.contains(key))
    }

    /// A view restricted to `keys` (intersected with any existing restriction).
    pub fn filter<I>(&self, keys: I) -> Self
    where
        I: IntoIterator<Item = RowKey>,
    {
        let keys: BTreeSet<RowKey> = keys
            .into_iter()
            .filter(|k| self.restriction.as_ref().is_none_or(|allowed| allowed.contains(k)))
            .collect();
        Self {
            store: Rc::clone(&self.store),
            schema: Rc::clone(&self.schema),
            restriction: Some(Rc::new(keys)),
        }
    }

    /// A view of the visible rows matching `predicate`.
    pub fn filter_by<F>(&self, predicate: F) -> Result<Self>
    where
        F: Fn(&RowKey) -> bool,
    {
        let keys: Vec<RowKey> = self.keys()?.into_iter().filter(|k| predicate(k)).collect();
        Ok(self.filter(keys))
    }

    pub fn get(&self, key: impl Into<RowKey>, column: &str) -> Result<Value> {
        let key = key.into();
        if !self.contains(&key)? {
            return Err(StoreError::RowNotFound {
                schema: self.name().to_string(),
                key: key.to_string(),
            });
        }
        self.store.borrow_mut().get(self.name(), key, column)
    }

    /// One column over every visible row, aligned with [`keys`](Self::keys).
    pub fn column(&self, column: &str) -> Result<Vec<Value>> {
        let keys = self.keys()?;
        self.store.borrow_mut().column(self.name(), &keys, column)
    }

    pub fn columns(&self, columns: &[&str]) -> Result<FrameRows> {
        let keys = self.keys()?;
        self.read(keys, columns)
    }

    /// Every declared column, stored then computed.
    pub fn all(&self) -> Result<FrameRows> {
        let names = self.schema.column_names();
        let columns: Vec<&str> = names.iter().map(String::as_str).collect();
        self.columns(&columns)
    }

    pub(crate) fn read(&self, keys: Vec<RowKey>, columns: &[&str]) -> Result<FrameRows> {
        let names: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
        for name in &names {
            if !self.schema.has_column(name) {
                return Err(StoreError::UnknownColumn {
                    column: name.clone(),
                    schema: self.name().to_string(),
                });
            }
        }

        let mut store = self.store.borrow_mut();
        store.ensure_computed(self.name(), &keys, &names)?;
        let rows = keys
            .iter()
            .map(|key| {
                names
                    .iter()
                    .map(|column| store.field(self.name(), key, column))
                    .collect::<Result<Vec<_>>>()
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(FrameRows::new(self.schema.index().to_vec(), names, keys, rows))
    }

    pub fn is_valid(&self, key: impl Into<RowKey>, column: &str) -> Result<bool> {
        self.store.borrow().is_valid(self.name(), &key.into(), column)
    }

    pub fn attributes(&self, column: &str) -> Option<ColumnAttributes> {
        self.schema.attributes(column).cloned()
    }

    pub fn new_unassigned_id(&self) -> Result<i64> {
        self.store.borrow().new_unassigned_id(self.name())
    }

    pub fn update<I, K>(&self, ids: impl Into<Ids>, values: I) -> Result<bool>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        self.update_with(ids, values, UpdateOptions::default())
    }

    pub fn update_with<I, K>(&self, ids: impl Into<Ids>, values: I, options: UpdateOptions) -> Result<bool>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        self.store.borrow_mut().update(self.name(), ids, values, options)
    }

    pub fn drop(&self, ids: impl Into<Ids>) -> Result<bool> {
        self.store.borrow_mut().drop(self.name(), ids)
    }

    pub fn undo(&self) -> Result<bool> {
        self.store.borrow_mut().undo()
    }

    pub fn redo(&self) -> Result<bool> {
        self.store.borrow_mut().redo()
    }

    pub fn version(&self) -> u64 {
        self.store.borrow().version()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DataType;
    use crate::storage::{ColumnDef, ComputedColumn, FrameStore};

    fn frame() -> LazyFrame {
        let mut store = FrameStore::new();
        store
            .register(
                Schema::builder("Point")
                    .index(["pointID"])
                    .column(ColumnDef::new("x", DataType::Float).default_value(0.0))
                    .computed(ComputedColumn::per_row("x2", DataType::Float, ["x"], |row| {
                        Ok(Value::Float(row.f64("x")?.unwrap_or(0.0) * 2.0))
                    }))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        let frame = LazyFrame::new(store.shared(), "Point").unwrap();
        for id in 0..3i64 {
            frame.update(RowKey::Single(id), [("x", Value::Float(id as f64))]).unwrap();
        }
        frame
    }

    #[test]
    fn test_reads_compute_on_demand() {
        let frame = frame();
        assert!(!frame.is_valid(RowKey::Single(2), "x2").unwrap());
        assert_eq!(frame.get(RowKey::Single(2), "x2").unwrap(), Value::Float(4.0));
        assert!(frame.is_valid(RowKey::Single(2), "x2").unwrap());
        assert_eq!(
            frame.column("x2").unwrap(),
            vec![Value::Float(0.0), Value::Float(2.0), Value::Float(4.0)]
        );
    }

    #[test]
    fn test_filter_is_a_view() {
        let frame = frame();
        let view = frame.filter([RowKey::Single(1), RowKey::Single(2)]);
        assert_eq!(view.len().unwrap(), 2);

        frame.update(RowKey::Single(1), [("x", Value::Float(10.0))]).unwrap();
        assert_eq!(view.get(RowKey::Single(1), "x2").unwrap(), Value::Float(20.0));

        frame.drop(RowKey::Single(2)).unwrap();
        assert_eq!(view.keys().unwrap(), vec![RowKey::Single(1)]);
        assert!(matches!(view.get(RowKey::Single(0), "x"), Err(StoreError::RowNotFound { .. })));
    }

    #[test]
    fn test_all_lists_every_column() {
        let rows = frame().all().unwrap();
        assert_eq!(rows.columns(), &["x".to_string(), "x2".to_string()]);
        assert_eq!(rows.get(&RowKey::Single(1), "x2"), Some(&Value::Float(2.0)));
    }
}
