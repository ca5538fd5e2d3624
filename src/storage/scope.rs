//! What a computed-column function sees while it runs.
//!
//! The store makes every declared dependency fresh before calling the
//! function, so reads through a scope never trigger computation; they return
//! what is stored or cached.

use super::schema::Schema;
use super::store::FrameStore;
use crate::core::{Result, RowKey, StoreError, Value};
use crate::geometry::{Point2, Point3, Polyline};
use crate::image::ImageVolume;
use geo::MultiPolygon;

pub struct ComputeScope<'a> {
    store: &'a FrameStore,
    schema: &'a Schema,
    keys: &'a [RowKey],
    pending: &'a [String],
}

impl<'a> ComputeScope<'a> {
    pub(crate) fn new(store: &'a FrameStore, schema: &'a Schema, keys: &'a [RowKey], pending: &'a [String]) -> Self {
        Self {
            store,
            schema,
            keys,
            pending,
        }
    }

    /// Rows to compute, in the order results must be returned.
    pub fn keys(&self) -> &[RowKey] {
        self.keys
    }

    /// Columns the caller is waiting for. For grouped columns this is the
    /// subset of the group that is stale.
    pub fn pending(&self) -> &[String] {
        self.pending
    }

    pub fn schema(&self) -> &Schema {
        self.schema
    }

    pub fn value(&self, key: &RowKey, column: &str) -> Result<Value> {
        self.store.field(self.schema.name(), key, column)
    }

    /// `column` of the `target` row this row references; `Null` when the
    /// reference is unset or dangling.
    pub fn related(&self, target: &str, key: &RowKey, column: &str) -> Result<Value> {
        match self.store.map_key(self.schema.name(), key, target)? {
            Some(foreign) if self.store.table(target)?.contains(&foreign) => {
                self.store.field(target, &foreign, column)
            }
            _ => Ok(Value::Null),
        }
    }

    pub fn images(&self) -> Result<&dyn ImageVolume> {
        self.store
            .images()
            .ok_or_else(|| StoreError::Image("no image volume attached to the store".into()))
    }

    pub fn rows(&self) -> impl Iterator<Item = RowScope<'_, 'a>> {
        self.keys.iter().map(move |key| RowScope { scope: self, key: *key })
    }
}

/// One row of a [`ComputeScope`].
pub struct RowScope<'s, 'a> {
    scope: &'s ComputeScope<'a>,
    key: RowKey,
}

impl RowScope<'_, '_> {
    pub fn key(&self) -> RowKey {
        self.key
    }

    pub fn get(&self, column: &str) -> Result<Value> {
        self.scope.value(&self.key, column)
    }

    pub fn related(&self, target: &str, column: &str) -> Result<Value> {
        self.scope.related(target, &self.key, column)
    }

    pub fn images(&self) -> Result<&dyn ImageVolume> {
        self.scope.images()
    }

    pub fn i64(&self, column: &str) -> Result<Option<i64>> {
        Ok(self.get(column)?.as_i64())
    }

    pub fn f64(&self, column: &str) -> Result<Option<f64>> {
        Ok(self.get(column)?.as_f64())
    }

    pub fn point2(&self, column: &str) -> Result<Option<Point2>> {
        Ok(self.get(column)?.as_point2())
    }

    pub fn point3(&self, column: &str) -> Result<Option<Point3>> {
        Ok(self.get(column)?.as_point3())
    }

    pub fn polyline(&self, column: &str) -> Result<Option<Polyline>> {
        Ok(self.get(column)?.as_polyline().cloned())
    }

    pub fn polygon(&self, column: &str) -> Result<Option<MultiPolygon<f64>>> {
        Ok(self.get(column)?.as_polygon().cloned())
    }

    pub fn related_f64(&self, target: &str, column: &str) -> Result<Option<f64>> {
        Ok(self.related(target, column)?.as_f64())
    }

    pub fn related_polyline(&self, target: &str, column: &str) -> Result<Option<Polyline>> {
        Ok(self.related(target, column)?.as_polyline().cloned())
    }
}
