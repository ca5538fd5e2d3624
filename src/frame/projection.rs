use super::lazy::LazyFrame;
use super::result::FrameRows;
use crate::core::{Ids, Result, RowKey, StoreError, Value};
use crate::storage::UpdateOptions;
use std::cell::RefCell;

/// A `(id, t)` frame seen at a single `t`, keyed by id alone.
///
/// The set of rows at `t` is cached together with the store version it was
/// taken at and rebuilt on the first read after the version moves.
pub struct TimeProjection {
    frame: LazyFrame,
    t: i64,
    cached: RefCell<Option<(u64, Vec<RowKey>)>>,
}

impl TimeProjection {
    pub fn new(frame: LazyFrame, t: i64) -> Result<Self> {
        if frame.schema().index().len() != 2 {
            return Err(StoreError::InvalidKey(format!(
                "'{}' has no time level to project",
                frame.name()
            )));
        }
        Ok(Self {
            frame,
            t,
            cached: RefCell::new(None),
        })
    }

    pub fn t(&self) -> i64 {
        self.t
    }

    pub fn frame(&self) -> &LazyFrame {
        &self.frame
    }

    /// Store version the cached restriction was taken at.
    pub fn cached_version(&self) -> Option<u64> {
        self.cached.borrow().as_ref().map(|(version, _)| *version)
    }

    fn restriction(&self) -> Result<Vec<RowKey>> {
        let version = self.frame.version();
        if let Some((seen, keys)) = self.cached.borrow().as_ref()
            && *seen == version
        {
            return Ok(keys.clone());
        }

        let keys: Vec<RowKey> = self
            .frame
            .keys()?
            .into_iter()
            .filter(|key| key.t() == Some(self.t))
            .collect();
        *self.cached.borrow_mut() = Some((version, keys.clone()));
        Ok(keys)
    }

    fn full_key(&self, id: i64) -> RowKey {
        RowKey::Pair(id, self.t)
    }

    /// Ids present at this time. Empty for a time with no rows.
    pub fn ids(&self) -> Result<Vec<i64>> {
        Ok(self.restriction()?.iter().map(RowKey::id).collect())
    }

    pub fn keys(&self) -> Result<Vec<RowKey>> {
        Ok(self.ids()?.into_iter().map(RowKey::Single).collect())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.restriction()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn contains(&self, id: i64) -> Result<bool> {
        Ok(self.restriction()?.contains(&self.full_key(id)))
    }

    pub fn get(&self, id: i64, column: &str) -> Result<Value> {
        self.frame.get(self.full_key(id), column)
    }

    pub fn column(&self, column: &str) -> Result<Vec<Value>> {
        let keys = self.restriction()?;
        self.frame.store().borrow_mut().column(self.frame.name(), &keys, column)
    }

    /// Rows at this time keyed by id alone.
    pub fn columns(&self, columns: &[&str]) -> Result<FrameRows> {
        let rows = self.frame.read(self.restriction()?, columns)?;
        let index = self.frame.schema().index()[..1].to_vec();
        let keys = rows.keys().iter().map(|key| RowKey::Single(key.id())).collect();
        Ok(FrameRows::new(
            index,
            rows.columns().to_vec(),
            keys,
            rows.rows().to_vec(),
        ))
    }

    pub fn all(&self) -> Result<FrameRows> {
        let names = self.frame.schema().column_names();
        let columns: Vec<&str> = names.iter().map(String::as_str).collect();
        self.columns(&columns)
    }

    pub fn new_unassigned_id(&self) -> Result<i64> {
        self.frame.new_unassigned_id()
    }

    /// Attaches this projection's `t` to bare ids.
    fn attach(&self, ids: Ids) -> Ids {
        match ids {
            Ids::One(key) => Ids::One(key.with_time(self.t)),
            Ids::Many(keys) => Ids::Many(keys.iter().map(|k| k.with_time(self.t)).collect()),
            ranged @ Ids::FromTime { .. } => ranged,
        }
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
        self.frame.update_with(self.attach(ids.into()), values, options)
    }

    pub fn drop(&self, ids: impl Into<Ids>) -> Result<bool> {
        self.frame.drop(self.attach(ids.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DataType;
    use crate::storage::{ColumnDef, FrameStore, Schema};

    fn frame() -> LazyFrame {
        let mut store = FrameStore::new();
        store
            .register(
                Schema::builder("Spine")
                    .index(["spineID", "t"])
                    .column(ColumnDef::new("z", DataType::Integer).default_value(Value::Integer(0)))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        LazyFrame::new(store.shared(), "Spine").unwrap()
    }

    #[test]
    fn test_projection_sees_one_time() {
        let frame = frame();
        frame.update(RowKey::Pair(0, 0), [("z", Value::Integer(1))]).unwrap();
        frame.update(RowKey::Pair(1, 1), [("z", Value::Integer(2))]).unwrap();

        let at_one = TimeProjection::new(frame.clone(), 1).unwrap();
        assert_eq!(at_one.ids().unwrap(), vec![1]);
        assert_eq!(at_one.get(1, "z").unwrap(), Value::Integer(2));

        let at_nine = TimeProjection::new(frame, 9).unwrap();
        assert!(at_nine.is_empty().unwrap());
        assert!(at_nine.all().unwrap().is_empty());
    }

    #[test]
    fn test_writes_attach_time() {
        let frame = frame();
        let view = TimeProjection::new(frame.clone(), 3).unwrap();
        view.update(RowKey::Single(7), [("z", Value::Integer(5))]).unwrap();
        assert_eq!(frame.get(RowKey::Pair(7, 3), "z").unwrap(), Value::Integer(5));
        assert_eq!(view.ids().unwrap(), vec![7]);
    }

    #[test]
    fn test_restriction_follows_version() {
        let frame = frame();
        let view = TimeProjection::new(frame.clone(), 0).unwrap();
        view.ids().unwrap();
        let first = view.cached_version();

        view.ids().unwrap();
        assert_eq!(view.cached_version(), first);

        frame.update(RowKey::Pair(4, 0), [("z", Value::Integer(1))]).unwrap();
        assert_eq!(view.ids().unwrap(), vec![4]);
        assert_eq!(view.cached_version(), Some(frame.version()));
        assert_ne!(view.cached_version(), first);
    }
}
