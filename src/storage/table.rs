use super::schema::{Schema, Slot};
use crate::core::{Result, RowKey, StoreError, Value};
use std::collections::BTreeMap;
use std::rc::Rc;

/// One physical row: stored fields, cached computed values and their
/// validity flags.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    stored: Vec<Value>,
    computed: Vec<Value>,
    valid: Vec<bool>,
}

impl Row {
    fn new(stored: Vec<Value>, computed_len: usize) -> Self {
        Self {
            stored,
            computed: vec![Value::Null; computed_len],
            valid: vec![false; computed_len],
        }
    }

    pub fn stored(&self) -> &[Value] {
        &self.stored
    }
}

#[derive(Debug, Clone)]
pub struct Table {
    schema: Rc<Schema>,
    rows: BTreeMap<RowKey, Row>,
}

impl Table {
    pub fn new(schema: Rc<Schema>) -> Self {
        Self {
            schema,
            rows: BTreeMap::new(),
        }
    }

    pub fn schema(&self) -> &Rc<Schema> {
        &self.schema
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &RowKey> {
        self.rows.keys()
    }

    pub fn contains(&self, key: &RowKey) -> bool {
        self.rows.contains_key(key)
    }

    pub fn row(&self, key: &RowKey) -> Option<&Row> {
        self.rows.get(key)
    }

    pub fn max_id(&self) -> Option<i64> {
        self.rows.keys().map(RowKey::id).max()
    }

    pub fn check_key(&self, key: &RowKey) -> Result<()> {
        if key.arity() != self.schema.index().len() {
            return Err(StoreError::InvalidKey(format!(
                "{} does not match index ({}) of '{}'",
                key,
                self.schema.index().join(", "),
                self.schema.name()
            )));
        }
        Ok(())
    }

    /// Stored values of the given keys that exist.
    pub fn snapshot<'a, I>(&self, keys: I) -> BTreeMap<RowKey, Vec<Value>>
    where
        I: IntoIterator<Item = &'a RowKey>,
    {
        keys.into_iter()
            .filter_map(|k| self.rows.get(k).map(|row| (*k, row.stored.clone())))
            .collect()
    }

    /// Inserts (or replaces) a row; its computed cells start invalid.
    pub fn insert_row(&mut self, key: RowKey, stored: Vec<Value>) -> Result<()> {
        self.check_key(&key)?;
        if stored.len() != self.schema.columns().len() {
            return Err(StoreError::InvalidSchema(format!(
                "row {} has {} values, '{}' stores {}",
                key,
                stored.len(),
                self.schema.name(),
                self.schema.columns().len()
            )));
        }
        self.rows.insert(key, Row::new(stored, self.schema.computed().len()));
        Ok(())
    }

    pub fn remove_row(&mut self, key: &RowKey) -> Option<Row> {
        self.rows.remove(key)
    }

    /// Overwrites the stored fields of an existing row, keeping its cache;
    /// unknown keys get a fresh row.
    pub fn put_stored(&mut self, key: RowKey, stored: Vec<Value>) -> Result<()> {
        match self.rows.get_mut(&key) {
            Some(row) => {
                row.stored = stored;
                Ok(())
            }
            None => self.insert_row(key, stored),
        }
    }

    pub fn set_stored(&mut self, key: &RowKey, column: &str, value: Value) -> Result<()> {
        let idx = self.schema.stored_index(column).ok_or_else(|| StoreError::UnknownColumn {
            column: column.to_string(),
            schema: self.schema.name().to_string(),
        })?;
        let row = self.rows.get_mut(key).ok_or_else(|| StoreError::RowNotFound {
            schema: self.schema.name().to_string(),
            key: key.to_string(),
        })?;
        row.stored[idx] = value;
        Ok(())
    }

    /// Any readable field: index level, stored or cached computed value.
    /// Computed cells are returned as cached, valid or not.
    pub fn field(&self, key: &RowKey, column: &str) -> Option<Value> {
        let row = self.rows.get(key)?;
        match self.schema.slot(column)? {
            Slot::Index(level) => key.level(level).map(Value::Integer),
            Slot::Stored(i) => row.stored.get(i).cloned(),
            Slot::Computed(i) => row.computed.get(i).cloned(),
        }
    }

    pub fn is_valid(&self, key: &RowKey, computed: usize) -> bool {
        self.rows
            .get(key)
            .and_then(|row| row.valid.get(computed).copied())
            .unwrap_or(false)
    }

    pub fn set_computed(&mut self, key: &RowKey, computed: usize, value: Value) {
        if let Some(row) = self.rows.get_mut(key)
            && computed < row.computed.len()
        {
            row.computed[computed] = value;
            row.valid[computed] = true;
        }
    }

    pub fn invalidate(&mut self, key: &RowKey, computed: usize) {
        if let Some(flag) = self.rows.get_mut(key).and_then(|row| row.valid.get_mut(computed)) {
            *flag = false;
        }
    }

    pub fn invalidate_row(&mut self, key: &RowKey) {
        if let Some(row) = self.rows.get_mut(key) {
            row.valid.iter_mut().for_each(|flag| *flag = false);
        }
    }

    /// Drops every cached value, e.g. after the stored data was replaced wholesale.
    pub fn invalidate_all(&mut self) {
        for row in self.rows.values_mut() {
            row.valid.iter_mut().for_each(|flag| *flag = false);
        }
    }
}
