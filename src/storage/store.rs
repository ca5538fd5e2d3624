// ============================================================================
// Frame Store
// ============================================================================
//
// Owns one table per registered schema, the dependents graph, the operation
// log and the version counter every view compares against. All writes go
// through `update`/`drop`/`undo`/`redo`, which validate first, apply a diff,
// invalidate exactly the dependent cells and bump the version.
//
// ============================================================================

use super::catalog::Catalog;
use super::dependents::Dependents;
use super::persistence;
use super::schema::{ComputedValues, Schema, Slot};
use super::scope::ComputeScope;
use super::table::Table;
use crate::core::{Ids, Result, RowKey, StoreError, Value};
use crate::history::{Op, RecordLog};
use crate::image::ImageVolume;
use chrono::Utc;
use log::{debug, info, warn};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

/// Handle shared by every frame and view of one store.
pub type SharedStore = Rc<RefCell<FrameStore>>;

/// How a write is recorded in the operation log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Fold into the previous step when the log allows it.
    pub replace_log: bool,
    /// Leave the log untouched.
    pub skip_log: bool,
    /// Record as part of the previous step, so one undo reverts both.
    pub link_log: bool,
}

impl UpdateOptions {
    pub fn replace() -> Self {
        Self {
            replace_log: true,
            ..Self::default()
        }
    }

    pub fn unlogged() -> Self {
        Self {
            skip_log: true,
            ..Self::default()
        }
    }

    pub fn linked() -> Self {
        Self {
            link_log: true,
            ..Self::default()
        }
    }
}

#[derive(Default)]
pub struct FrameStore {
    catalog: Catalog,
    tables: BTreeMap<String, Table>,
    dependents: Dependents,
    log: RecordLog,
    version: u64,
    images: Option<Rc<dyn ImageVolume>>,
}

impl FrameStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose pixel columns read from `images`. Pixel columns are
    /// expanded per channel at registration, so attach the volume first.
    pub fn with_images(images: Rc<dyn ImageVolume>) -> Self {
        Self {
            images: Some(images),
            ..Self::default()
        }
    }

    pub fn shared(self) -> SharedStore {
        Rc::new(RefCell::new(self))
    }

    pub fn images(&self) -> Option<&dyn ImageVolume> {
        self.images.as_deref()
    }

    /// Swaps the image volume. Cached values are dropped; the channel count
    /// may only change while no schema declares pixel columns.
    pub fn set_images(&mut self, images: Rc<dyn ImageVolume>) -> Result<()> {
        let current = self.images.as_ref().map_or(0, |v| v.channel_count());
        let has_pixels = self
            .catalog
            .list_schemas()
            .into_iter()
            .filter_map(|name| self.catalog.get_schema(name).ok())
            .any(|schema| !schema.pixel_columns().is_empty());
        if has_pixels && images.channel_count() != current {
            return Err(StoreError::Image(format!(
                "volume has {} channel(s), pixel columns were expanded for {}",
                images.channel_count(),
                current
            )));
        }

        self.images = Some(images);
        for table in self.tables.values_mut() {
            table.invalidate_all();
        }
        self.version += 1;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Schemas
    // ------------------------------------------------------------------------

    /// Registers `schema` and creates its empty table. Relationship and
    /// dependency targets must already be registered.
    pub fn register(&mut self, schema: Schema) -> Result<Rc<Schema>> {
        let name = schema.name().to_string();
        if self.catalog.schema_exists(&name) {
            return Err(StoreError::SchemaExists(name));
        }

        for target in schema.relationships().keys() {
            if *target != name && !self.catalog.schema_exists(target) {
                return Err(StoreError::UnknownSchema(target.clone()));
            }
        }
        for col in schema.computed() {
            for (target, columns) in col.dependencies.resolve(&name) {
                if target == name {
                    continue;
                }
                let foreign = self.catalog.get_schema(&target)?;
                if let Some(missing) = columns.iter().find(|c| !foreign.has_column(c)) {
                    return Err(StoreError::UnknownColumn {
                        column: missing.clone(),
                        schema: target,
                    });
                }
            }
        }

        let schema = if schema.pixel_columns().is_empty() {
            schema
        } else {
            let channels = self.images.as_ref().map_or(0, |v| v.channel_count());
            if channels == 0 {
                warn!("'{}' declares pixel columns but no image channels are attached", name);
            }
            schema.with_pixel_channels(channels)?
        };

        self.dependents.register(&schema)?;
        self.catalog = self.catalog.clone().with_schema(schema)?;
        let schema = Rc::clone(self.catalog.get_schema(&name)?);
        self.tables.insert(name.clone(), Table::new(Rc::clone(&schema)));

        info!(
            "registered schema '{}': {} stored, {} computed column(s)",
            name,
            schema.columns().len(),
            schema.computed().len()
        );
        Ok(schema)
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn schema(&self, name: &str) -> Result<Rc<Schema>> {
        self.catalog.get_schema(name).map(Rc::clone)
    }

    pub fn table(&self, name: &str) -> Result<&Table> {
        self.tables
            .get(name)
            .ok_or_else(|| StoreError::UnknownSchema(name.to_string()))
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut Table> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| StoreError::UnknownSchema(name.to_string()))
    }

    /// Monotonic counter, advanced by every mutation that changed something.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn log(&self) -> &RecordLog {
        &self.log
    }

    pub fn keys(&self, name: &str) -> Result<Vec<RowKey>> {
        Ok(self.table(name)?.keys().copied().collect())
    }

    /// Max existing id + 1, or 0 for an empty table.
    pub fn new_unassigned_id(&self, name: &str) -> Result<i64> {
        Ok(self.table(name)?.max_id().map_or(0, |id| id + 1))
    }

    // ------------------------------------------------------------------------
    // Relationships
    // ------------------------------------------------------------------------

    /// Key of the `target` row referenced by `key` of `name`.
    pub fn map_key(&self, name: &str, key: &RowKey, target: &str) -> Result<Option<RowKey>> {
        let schema = self.catalog.get_schema(name)?;
        if schema.relationship(target).is_none() {
            return Err(StoreError::InvalidSchema(format!(
                "'{}' has no relationship to '{}'",
                name, target
            )));
        }
        let table = self.table(name)?;
        let stored = table.row(key).map(|row| row.stored()).unwrap_or_default();
        Ok(schema.foreign_key(target, key, stored))
    }

    /// For each row of `name`, the `target` key it references.
    pub fn map_ids(&self, name: &str, keys: &[RowKey], target: &str) -> Result<Vec<Option<RowKey>>> {
        keys.iter().map(|key| self.map_key(name, key, target)).collect()
    }

    /// For each `target` key, the rows of `name` that reference it.
    pub fn reverse_map_ids(&self, name: &str, target: &str, target_keys: &[RowKey]) -> Result<Vec<BTreeSet<RowKey>>> {
        let schema = self.catalog.get_schema(name)?;
        if schema.relationship(target).is_none() {
            return Err(StoreError::InvalidSchema(format!(
                "'{}' has no relationship to '{}'",
                name, target
            )));
        }

        let mut by_target: BTreeMap<RowKey, BTreeSet<RowKey>> = BTreeMap::new();
        let table = self.table(name)?;
        for key in table.keys() {
            if let Some(row) = table.row(key)
                && let Some(foreign) = schema.foreign_key(target, key, row.stored())
            {
                by_target.entry(foreign).or_default().insert(*key);
            }
        }
        Ok(target_keys
            .iter()
            .map(|key| by_target.get(key).cloned().unwrap_or_default())
            .collect())
    }

    /// Rows of `target` a change to `keys` of `name` can reach: mapped
    /// through whichever side declares the relationship, or every row when
    /// neither does.
    fn related_keys(&self, name: &str, keys: &[RowKey], target: &str) -> Result<Vec<RowKey>> {
        let schema = self.schema(name)?;
        let target_schema = self.schema(target)?;

        let mut related = BTreeSet::new();
        if schema.relationship(target).is_some() {
            related.extend(self.map_ids(name, keys, target)?.into_iter().flatten());
        } else if target_schema.relationship(name).is_some() {
            for set in self.reverse_map_ids(target, name, keys)? {
                related.extend(set);
            }
        } else {
            related.extend(self.table(target)?.keys().copied());
        }
        Ok(related.into_iter().collect())
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    /// Stored or cached value, without computing anything.
    pub fn field(&self, name: &str, key: &RowKey, column: &str) -> Result<Value> {
        let table = self.table(name)?;
        if !table.schema().has_column(column) {
            return Err(StoreError::UnknownColumn {
                column: column.to_string(),
                schema: name.to_string(),
            });
        }
        table.field(key, column).ok_or_else(|| StoreError::RowNotFound {
            schema: name.to_string(),
            key: key.to_string(),
        })
    }

    /// Fresh value of one cell, computing it first when stale.
    pub fn get(&mut self, name: &str, key: RowKey, column: &str) -> Result<Value> {
        self.ensure_computed(name, &[key], &[column.to_string()])?;
        self.field(name, &key, column)
    }

    /// Fresh values of one column for `keys`, in order.
    pub fn column(&mut self, name: &str, keys: &[RowKey], column: &str) -> Result<Vec<Value>> {
        self.ensure_computed(name, keys, &[column.to_string()])?;
        keys.iter().map(|key| self.field(name, key, column)).collect()
    }

    /// Whether `column` of `key` is current. Stored columns always are.
    pub fn is_valid(&self, name: &str, key: &RowKey, column: &str) -> Result<bool> {
        let table = self.table(name)?;
        match table.schema().slot(column) {
            Some(Slot::Computed(i)) => Ok(table.is_valid(key, i)),
            Some(_) => Ok(table.contains(key)),
            None => Err(StoreError::UnknownColumn {
                column: column.to_string(),
                schema: name.to_string(),
            }),
        }
    }

    /// Computes every stale cell of the computed `columns` for `keys`,
    /// making their dependencies fresh first. Stored columns are ignored.
    pub fn ensure_computed(&mut self, name: &str, keys: &[RowKey], columns: &[String]) -> Result<()> {
        let schema = self.schema(name)?;

        // Grouped columns are produced together by one call.
        let mut units: BTreeMap<(bool, String), Vec<usize>> = BTreeMap::new();
        for column in columns {
            let Some(idx) = schema.computed_index(column) else {
                continue;
            };
            let col = &schema.computed()[idx];
            let unit = match &col.group {
                Some(group) => (true, group.clone()),
                None => (false, col.name.clone()),
            };
            let members = units.entry(unit).or_default();
            if !members.contains(&idx) {
                members.push(idx);
            }
        }

        for members in units.into_values() {
            self.compute_unit(&schema, keys, &members)?;
        }
        Ok(())
    }

    fn compute_unit(&mut self, schema: &Rc<Schema>, keys: &[RowKey], members: &[usize]) -> Result<()> {
        let name = schema.name();
        let table = self.table(name)?;
        let mut stale: Vec<RowKey> = keys
            .iter()
            .filter(|key| table.contains(key) && members.iter().any(|&i| !table.is_valid(key, i)))
            .copied()
            .collect();
        stale.sort();
        stale.dedup();
        if stale.is_empty() {
            return Ok(());
        }

        let mut manifest: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for &i in members {
            for (target, cols) in schema.computed()[i].dependencies.resolve(name) {
                manifest.entry(target).or_default().extend(cols);
            }
        }
        for (target, cols) in manifest {
            let target_schema = self.schema(&target)?;
            let computed: Vec<String> = cols.into_iter().filter(|c| target_schema.is_computed(c)).collect();
            if computed.is_empty() {
                continue;
            }
            if target == name {
                self.ensure_computed(name, &stale, &computed)?;
            } else {
                let related = self.related_keys(name, &stale, &target)?;
                self.ensure_computed(&target, &related, &computed)?;
            }
        }

        let pending: Vec<String> = members.iter().map(|&i| schema.computed()[i].name.clone()).collect();
        let func = Rc::clone(&schema.computed()[members[0]].func);
        let produced = {
            let scope = ComputeScope::new(self, schema, &stale, &pending);
            (*func)(&scope)?
        };

        let columns: Vec<(usize, Vec<Value>)> = match produced {
            ComputedValues::Column(values) if members.len() == 1 => vec![(members[0], values)],
            ComputedValues::Column(_) => {
                return Err(StoreError::Compute(format!(
                    "group {:?} returned a single column",
                    pending
                )));
            }
            ComputedValues::Columns(mut map) => members
                .iter()
                .map(|&i| {
                    let column = &schema.computed()[i].name;
                    map.remove(column)
                        .map(|values| (i, values))
                        .ok_or_else(|| StoreError::Compute(format!("'{}' was not produced", column)))
                })
                .collect::<Result<_>>()?,
        };

        let mut writes = Vec::with_capacity(columns.len());
        for (i, values) in columns {
            let col = &schema.computed()[i];
            if values.len() != stale.len() {
                return Err(StoreError::Compute(format!(
                    "'{}' returned {} value(s) for {} row(s)",
                    col.name,
                    values.len(),
                    stale.len()
                )));
            }
            let values = values
                .into_iter()
                .map(|v| {
                    let found = v.type_name();
                    col.data_type.coerce(v).ok_or_else(|| StoreError::TypeMismatch {
                        column: col.name.clone(),
                        expected: col.data_type.to_string(),
                        found: found.to_string(),
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            writes.push((i, values));
        }

        let table = self.table_mut(name)?;
        for (i, values) in writes {
            for (key, value) in stale.iter().zip(values) {
                table.set_computed(key, i, value);
            }
        }
        debug!("computed {:?} on '{}' for {} row(s)", pending, name, stale.len());
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------------

    /// Writes `values` to the rows selected by `ids`, creating rows that
    /// don't exist yet. Writing an index field moves the row to its new key.
    ///
    /// Every value is validated before anything changes. Returns whether
    /// any stored field changed.
    pub fn update<I, K>(&mut self, name: &str, ids: impl Into<Ids>, values: I, options: UpdateOptions) -> Result<bool>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let schema = self.schema(name)?;
        let ids = ids.into();

        let mut stored: Vec<(usize, Value)> = Vec::new();
        let mut rekey: Vec<(usize, i64)> = Vec::new();
        for (column, value) in values {
            let column = column.into();
            let value = schema.coerce(&column, value)?;
            match (schema.slot(&column), value) {
                (Some(Slot::Index(level)), Value::Integer(v)) => rekey.push((level, v)),
                (Some(Slot::Stored(i)), value) => stored.push((i, value)),
                _ => {}
            }
        }

        let table = self.table(name)?;
        let keys = resolve_ids(table, &ids)?;
        if keys.is_empty() {
            debug!("update on '{}' selected no rows", name);
            return Ok(false);
        }
        let moves = keys
            .iter()
            .map(|key| rekeyed(key, &rekey).map(|to| (*key, to)))
            .collect::<Result<Vec<_>>>()?;
        for (_, to) in &moves {
            table.check_key(to)?;
        }
        let targets: BTreeSet<RowKey> = moves.iter().map(|(_, to)| *to).collect();
        let vacated: BTreeSet<RowKey> = moves
            .iter()
            .filter(|(from, to)| from != to && table.contains(from) && !targets.contains(from))
            .map(|(from, _)| *from)
            .collect();
        self.check_unreferenced(name, &vacated)?;
        let table = self.table(name)?;

        let before = table.snapshot(keys.iter().chain(moves.iter().map(|(_, to)| to)));
        let mut after = before.clone();
        let mut moved = Vec::with_capacity(moves.len());
        for (from, to) in &moves {
            let mut row = after.remove(from).unwrap_or_else(|| schema.defaults());
            for (i, value) in &stored {
                row[*i] = value.clone();
            }
            moved.push((*to, row));
        }
        for (to, row) in moved {
            if after.insert(to, row).is_some() {
                return Err(StoreError::InvalidKey(format!("row {} already exists in '{}'", to, name)));
            }
        }

        let columns = schema.stored_names();
        let mut op = Op::between(name, &columns, &before, &after);
        if op.is_empty() {
            debug!("update on '{}' changed nothing", name);
            if !options.skip_log && !options.replace_log && !options.link_log {
                self.log.create_state();
            }
            return Ok(false);
        }

        if let Some(idx) = schema.modified_column().and_then(|c| schema.stored_index(c)) {
            let now = Value::Timestamp(Utc::now());
            for key in op.added().keys().chain(op.changed().keys()) {
                if let Some(row) = after.get_mut(key) {
                    row[idx] = now.clone();
                }
            }
            op = Op::between(name, &columns, &before, &after);
        }

        op.apply(self.table_mut(name)?)?;
        self.invalidate_op(&op)?;
        self.version += 1;
        debug!(
            "update on '{}': {} added, {} changed, {} removed",
            name,
            op.added().len(),
            op.changed().len(),
            op.deleted().len()
        );

        if options.skip_log {
            return Ok(true);
        }
        if options.link_log {
            self.log.push_linked(op);
        } else {
            self.log.push(op, options.replace_log);
        }
        Ok(true)
    }

    /// Removes the selected rows. Rejected while rows of another schema
    /// still reference any of them.
    pub fn drop(&mut self, name: &str, ids: impl Into<Ids>) -> Result<bool> {
        let table = self.table(name)?;
        let keys: BTreeSet<RowKey> = resolve_ids(table, &ids.into())?
            .into_iter()
            .filter(|key| table.contains(key))
            .collect();
        if keys.is_empty() {
            return Ok(false);
        }

        self.check_unreferenced(name, &keys)?;

        let table = self.table(name)?;
        let schema = self.schema(name)?;
        let before = table.snapshot(&keys);
        let op = Op::between(name, &schema.stored_names(), &before, &BTreeMap::new());

        op.apply(self.table_mut(name)?)?;
        self.invalidate_op(&op)?;
        self.version += 1;
        debug!("dropped {} row(s) from '{}'", keys.len(), name);

        self.log.push(op, false);
        Ok(true)
    }

    /// Reverses the most recent step. `false` when there is nothing to undo.
    pub fn undo(&mut self) -> Result<bool> {
        let Some(ops) = self.log.undo() else {
            debug!("nothing to undo");
            return Ok(false);
        };
        for op in &ops {
            op.reverse(self.table_mut(op.schema())?)?;
            self.invalidate_op(op)?;
        }
        self.version += 1;
        Ok(true)
    }

    /// Re-applies the most recently undone step. `false` when there is none.
    pub fn redo(&mut self) -> Result<bool> {
        let Some(ops) = self.log.redo() else {
            debug!("nothing to redo");
            return Ok(false);
        };
        for op in &ops {
            op.apply(self.table_mut(op.schema())?)?;
            self.invalidate_op(op)?;
        }
        self.version += 1;
        Ok(true)
    }

    /// Closes the current undo step so the next replaceable write starts a
    /// new one.
    pub fn create_state(&mut self) {
        self.log.create_state();
    }

    /// Rejects removing `keys` from `name` while rows of another schema
    /// reference any of them.
    fn check_unreferenced(&self, name: &str, keys: &BTreeSet<RowKey>) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        for referencing in self.catalog.referencing(name) {
            let other = self.table(referencing.name())?;
            for key in other.keys() {
                if referencing.name() == name && keys.contains(key) {
                    continue;
                }
                if let Some(row) = other.row(key)
                    && let Some(target) = referencing.foreign_key(name, key, row.stored())
                    && keys.contains(&target)
                {
                    return Err(StoreError::ConstraintViolation(format!(
                        "{} {} still references {} {}",
                        referencing.name(),
                        key,
                        name,
                        target
                    )));
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Invalidation
    // ------------------------------------------------------------------------

    /// Marks stale every computed cell that reads a field touched by `op`,
    /// in every schema, for the rows reachable from the touched rows.
    fn invalidate_op(&mut self, op: &Op) -> Result<()> {
        let name = op.schema();
        let schema = self.schema(name)?;

        let whole_row: Vec<String> = schema
            .index()
            .iter()
            .cloned()
            .chain(schema.stored_names())
            .collect();
        let mut touched: Vec<(RowKey, Vec<String>)> = op
            .structural_keys()
            .into_iter()
            .map(|key| (key, whole_row.clone()))
            .collect();
        touched.extend(
            op.changed_columns()
                .into_iter()
                .map(|(key, cols)| (key, cols.into_iter().collect())),
        );

        // dependent schema → computed column → touched keys
        let mut stale: BTreeMap<String, BTreeMap<String, BTreeSet<RowKey>>> = BTreeMap::new();
        for (key, cols) in &touched {
            let invalidation = self.dependents.of_columns(name, cols.iter().map(String::as_str));
            for (dependent, columns) in invalidation {
                let entry = stale.entry(dependent).or_default();
                for column in columns {
                    entry.entry(column).or_default().insert(*key);
                }
            }
        }
        if stale.is_empty() {
            return Ok(());
        }

        let images = row_images(op, &schema, self.table(name)?);
        for (dependent, columns) in stale {
            let dependent_schema = self.schema(&dependent)?;
            for (column, sources) in columns {
                let Some(idx) = dependent_schema.computed_index(&column) else {
                    continue;
                };
                let targets = self.dependent_rows(&schema, &dependent_schema, &sources, &images)?;
                let table = self.table_mut(&dependent)?;
                for key in &targets {
                    table.invalidate(key, idx);
                }
                debug!("invalidated {}.{} on {} row(s)", dependent, column, targets.len());
            }
        }
        Ok(())
    }

    fn dependent_rows(
        &self,
        source: &Schema,
        dependent: &Schema,
        sources: &BTreeSet<RowKey>,
        images: &[(RowKey, Vec<Value>)],
    ) -> Result<Vec<RowKey>> {
        if dependent.name() == source.name() {
            return Ok(sources.iter().copied().collect());
        }

        let table = self.table(dependent.name())?;
        if dependent.relationship(source.name()).is_some() {
            return Ok(table
                .keys()
                .filter(|key| {
                    table
                        .row(key)
                        .and_then(|row| dependent.foreign_key(source.name(), key, row.stored()))
                        .is_some_and(|target| sources.contains(&target))
                })
                .copied()
                .collect());
        }

        if source.relationship(dependent.name()).is_some() {
            let targets: BTreeSet<RowKey> = images
                .iter()
                .filter(|(key, _)| sources.contains(key))
                .filter_map(|(key, stored)| source.foreign_key(dependent.name(), key, stored))
                .collect();
            return Ok(targets.into_iter().collect());
        }

        debug!(
            "no relationship between '{}' and '{}'; invalidating every row",
            source.name(),
            dependent.name()
        );
        Ok(table.keys().copied().collect())
    }

    // ------------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------------

    /// Stored columns of one table as a MessagePack blob.
    pub fn serialize_table(&self, name: &str) -> Result<Vec<u8>> {
        persistence::to_bytes(self.table(name)?)
    }

    /// Replaces a table with the rows of a blob. Caches everywhere are
    /// dropped and the history is cleared.
    pub fn load_table(&mut self, name: &str, bytes: &[u8]) -> Result<()> {
        let table = persistence::from_bytes(self.schema(name)?, bytes)?;
        let rows = table.len();
        self.tables.insert(name.to_string(), table);
        for table in self.tables.values_mut() {
            table.invalidate_all();
        }
        self.log.clear();
        self.version += 1;
        info!("loaded {} row(s) into '{}'", rows, name);
        Ok(())
    }
}

/// Concrete keys selected by `ids`, deduplicated, in selection order.
fn resolve_ids(table: &Table, ids: &Ids) -> Result<Vec<RowKey>> {
    let keys = match ids {
        Ids::One(key) => vec![*key],
        Ids::Many(keys) => keys.clone(),
        Ids::FromTime { t, .. } => {
            if table.schema().index().len() != 2 {
                return Err(StoreError::InvalidKey(format!(
                    "'{}' has no time level to select from t={}",
                    table.schema().name(),
                    t
                )));
            }
            table.keys().filter(|key| ids.matches(key)).copied().collect()
        }
    };

    let mut seen = BTreeSet::new();
    let mut out = Vec::with_capacity(keys.len());
    for key in keys {
        table.check_key(&key)?;
        if seen.insert(key) {
            out.push(key);
        }
    }
    Ok(out)
}

fn rekeyed(key: &RowKey, rekey: &[(usize, i64)]) -> Result<RowKey> {
    let mut levels: Vec<i64> = (0..key.arity()).filter_map(|level| key.level(level)).collect();
    for (level, value) in rekey {
        match levels.get_mut(*level) {
            Some(slot) => *slot = *value,
            None => return Err(StoreError::InvalidKey(format!("{} has no level {}", key, level))),
        }
    }
    RowKey::from_levels(&levels).ok_or_else(|| StoreError::InvalidKey(format!("{:?}", levels)))
}

/// Every version of the rows `op` touched, as needed to follow their
/// foreign keys: removed and added rows as recorded, changed rows both
/// before and after the change.
fn row_images(op: &Op, schema: &Schema, table: &Table) -> Vec<(RowKey, Vec<Value>)> {
    let mut images: Vec<(RowKey, Vec<Value>)> = op
        .deleted()
        .iter()
        .chain(op.added())
        .map(|(key, row)| (*key, row.clone()))
        .collect();

    for (key, cols) in op.changed() {
        let Some(row) = table.row(key) else {
            continue;
        };
        let mut old = row.stored().to_vec();
        let mut new = row.stored().to_vec();
        for (column, (before, after)) in cols {
            if let Some(i) = schema.stored_index(column) {
                old[i] = before.clone();
                new[i] = after.clone();
            }
        }
        images.push((*key, old));
        images.push((*key, new));
    }
    images
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DataType;
    use crate::storage::schema::{ColumnDef, ComputedColumn, Dependencies};
    use std::cell::Cell;

    fn store() -> (FrameStore, Rc<Cell<usize>>) {
        let calls = Rc::new(Cell::new(0));
        let counter = Rc::clone(&calls);

        let mut store = FrameStore::new();
        store
            .register(
                Schema::builder("Parent")
                    .index(["parentID", "t"])
                    .column(ColumnDef::new("width", DataType::Float).default_value(1.0))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        store
            .register(
                Schema::builder("Child")
                    .index(["childID", "t"])
                    .column(ColumnDef::new("parentID", DataType::Integer))
                    .column(ColumnDef::new("a", DataType::Float).default_value(0.0))
                    .relationship("Parent", ["parentID", "t"])
                    .computed(ComputedColumn::per_row(
                        "scaled",
                        DataType::Float,
                        Dependencies::local(["a"]).on("Parent", ["width"]),
                        move |row| {
                            counter.set(counter.get() + 1);
                            let a = row.f64("a")?.unwrap_or(0.0);
                            let width = row.related_f64("Parent", "width")?.unwrap_or(0.0);
                            Ok(Value::Float(a * width))
                        },
                    ))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        (store, calls)
    }

    fn set(store: &mut FrameStore, name: &str, key: (i64, i64), column: &str, value: Value) -> bool {
        store
            .update(name, RowKey::from(key), [(column, value)], UpdateOptions::default())
            .unwrap()
    }

    #[test]
    fn test_computed_value_is_cached() {
        let (mut store, calls) = store();
        set(&mut store, "Parent", (0, 0), "width", Value::Float(2.0));
        set(&mut store, "Child", (0, 0), "parentID", Value::Integer(0));
        set(&mut store, "Child", (0, 0), "a", Value::Float(3.0));

        let key = RowKey::Pair(0, 0);
        assert_eq!(store.get("Child", key, "scaled").unwrap(), Value::Float(6.0));
        assert_eq!(store.get("Child", key, "scaled").unwrap(), Value::Float(6.0));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_foreign_change_invalidates_only_matching_time() {
        let (mut store, _) = store();
        for t in 0..2 {
            set(&mut store, "Parent", (0, t), "width", Value::Float(2.0));
            set(&mut store, "Child", (5, t), "parentID", Value::Integer(0));
        }
        store.column("Child", &[RowKey::Pair(5, 0), RowKey::Pair(5, 1)], "scaled").unwrap();

        set(&mut store, "Parent", (0, 0), "width", Value::Float(4.0));
        assert!(!store.is_valid("Child", &RowKey::Pair(5, 0), "scaled").unwrap());
        assert!(store.is_valid("Child", &RowKey::Pair(5, 1), "scaled").unwrap());
    }

    #[test]
    fn test_failed_validation_leaves_store_untouched() {
        let (mut store, _) = store();
        let version = store.version();
        let result = store.update(
            "Child",
            RowKey::Pair(0, 0),
            [("a", Value::Float(1.0)), ("bogus", Value::Float(2.0))],
            UpdateOptions::default(),
        );
        assert!(matches!(result, Err(StoreError::UnknownColumn { .. })));
        assert!(store.table("Child").unwrap().is_empty());
        assert_eq!(store.version(), version);
        assert!(!store.log().can_undo());
    }

    #[test]
    fn test_drop_referenced_parent_is_rejected() {
        let (mut store, _) = store();
        set(&mut store, "Parent", (0, 0), "width", Value::Float(2.0));
        set(&mut store, "Child", (1, 0), "parentID", Value::Integer(0));

        let result = store.drop("Parent", RowKey::Pair(0, 0));
        assert!(matches!(result, Err(StoreError::ConstraintViolation(_))));
        assert!(store.table("Parent").unwrap().contains(&RowKey::Pair(0, 0)));

        assert!(store.drop("Child", RowKey::Pair(1, 0)).unwrap());
        assert!(store.drop("Parent", RowKey::Pair(0, 0)).unwrap());
    }

    #[test]
    fn test_rekey_moves_row() {
        let (mut store, _) = store();
        set(&mut store, "Child", (1, 0), "a", Value::Float(7.0));
        store
            .update("Child", RowKey::Pair(1, 0), [("childID", Value::Integer(9))], UpdateOptions::default())
            .unwrap();

        let table = store.table("Child").unwrap();
        assert!(!table.contains(&RowKey::Pair(1, 0)));
        assert_eq!(table.field(&RowKey::Pair(9, 0), "a"), Some(Value::Float(7.0)));

        store.undo().unwrap();
        assert!(store.table("Child").unwrap().contains(&RowKey::Pair(1, 0)));
    }

    #[test]
    fn test_rekey_onto_existing_row_is_rejected() {
        let (mut store, _) = store();
        set(&mut store, "Child", (1, 0), "a", Value::Float(1.0));
        set(&mut store, "Child", (2, 0), "a", Value::Float(2.0));
        let result = store.update(
            "Child",
            RowKey::Pair(1, 0),
            [("childID", Value::Integer(2))],
            UpdateOptions::default(),
        );
        assert!(matches!(result, Err(StoreError::InvalidKey(_))));
        assert_eq!(store.table("Child").unwrap().len(), 2);
    }

    #[test]
    fn test_update_from_time_selects_later_rows() {
        let (mut store, _) = store();
        for t in 0..4 {
            set(&mut store, "Child", (3, t), "a", Value::Float(0.5));
        }
        store
            .update("Child", Ids::from_time(3, 2), [("a", Value::Float(9.0))], UpdateOptions::default())
            .unwrap();

        let table = store.table("Child").unwrap();
        let values: Vec<Value> = (0..4).filter_map(|t| table.field(&RowKey::Pair(3, t), "a")).collect();
        assert_eq!(
            values,
            vec![Value::Float(0.5), Value::Float(0.5), Value::Float(9.0), Value::Float(9.0)]
        );
    }

    #[test]
    fn test_registration_requires_related_schema() {
        let mut store = FrameStore::new();
        let orphan = Schema::builder("Child")
            .index(["childID"])
            .column(ColumnDef::new("parentID", DataType::Integer))
            .relationship("Parent", ["parentID"])
            .build()
            .unwrap();
        assert!(matches!(store.register(orphan), Err(StoreError::UnknownSchema(_))));
    }
}
