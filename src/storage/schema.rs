// ============================================================================
// Schema Model
// ============================================================================
//
// Declarative description of one frame: its index, stored columns with
// types and defaults, foreign-key relationships and computed columns with
// their dependency manifests. Built once through `SchemaBuilder`; column
// names are resolved to slots at build time so reads never search.
//
// ============================================================================

use super::scope::{ComputeScope, RowScope};
use crate::core::{DataType, Result, RowKey, StoreError, Value};
use crate::image::{Aggregate, Shape, ShapeRequest, gather_pixels};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::rc::Rc;

/// Display metadata for a column, consumed by legends and tables.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnAttributes {
    pub title: String,
    pub description: String,
    pub group: Option<String>,
    pub categorical: bool,
    pub divergent: bool,
    pub plot: bool,
}

impl Default for ColumnAttributes {
    fn default() -> Self {
        Self {
            title: String::new(),
            description: String::new(),
            group: None,
            categorical: false,
            divergent: false,
            plot: true,
        }
    }
}

impl ColumnAttributes {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn categorical(mut self) -> Self {
        self.categorical = true;
        self
    }

    pub fn divergent(mut self) -> Self {
        self.divergent = true;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.plot = false;
        self
    }
}

/// Value constraints checked when a write is validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Constraint {
    Positive,
    NonSelfIntersecting,
}

impl Constraint {
    pub fn check(&self, column: &str, value: &Value) -> Result<()> {
        let ok = match (self, value) {
            (_, Value::Null) => true,
            (Self::Positive, v) => v.as_f64().is_some_and(|n| n > 0.0),
            (Self::NonSelfIntersecting, Value::Polyline(line)) => line.is_simple(),
            (Self::NonSelfIntersecting, _) => true,
        };
        if ok {
            return Ok(());
        }
        Err(StoreError::ConstraintViolation(match self {
            Self::Positive => format!("'{}' must be positive, got {}", column, value),
            Self::NonSelfIntersecting => format!("'{}' must not intersect itself", column),
        }))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: DataType,
    pub default: Option<Value>,
    pub attributes: ColumnAttributes,
    pub constraint: Option<Constraint>,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            default: None,
            attributes: ColumnAttributes::default(),
            constraint: None,
        }
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn attributes(mut self, attributes: ColumnAttributes) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn constraint(mut self, constraint: Constraint) -> Self {
        self.constraint = Some(constraint);
        self
    }

    /// Default cell value; `Null` when none was declared.
    pub fn default_cell(&self) -> Value {
        self.default.clone().unwrap_or(Value::Null)
    }
}

/// Columns a computed column reads: some in its own schema, some in others.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dependencies {
    local: Vec<String>,
    foreign: BTreeMap<String, Vec<String>>,
}

impl Dependencies {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn local<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            local: columns.into_iter().map(Into::into).collect(),
            foreign: BTreeMap::new(),
        }
    }

    pub fn on<I, S>(mut self, schema: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.foreign
            .entry(schema.into())
            .or_default()
            .extend(columns.into_iter().map(Into::into));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.local.is_empty() && self.foreign.values().all(Vec::is_empty)
    }

    /// Normalized manifest: schema name → columns, local columns filed under `own`.
    pub fn resolve(&self, own: &str) -> BTreeMap<String, Vec<String>> {
        let mut resolved = self.foreign.clone();
        if !self.local.is_empty() {
            resolved
                .entry(own.to_string())
                .or_default()
                .extend(self.local.iter().cloned());
        }
        resolved.retain(|_, cols| !cols.is_empty());
        resolved
    }
}

impl<const N: usize> From<[&str; N]> for Dependencies {
    fn from(columns: [&str; N]) -> Self {
        Self::local(columns)
    }
}

/// What a computed column function returns for the rows it was asked for.
#[derive(Debug, Clone, PartialEq)]
pub enum ComputedValues {
    /// One value per key, aligned with [`ComputeScope::keys`].
    Column(Vec<Value>),
    /// Several physical columns at once, each aligned with the keys.
    Columns(BTreeMap<String, Vec<Value>>),
}

pub type ComputeFn = Rc<dyn Fn(&ComputeScope<'_>) -> Result<ComputedValues>>;

#[derive(Clone)]
pub struct ComputedColumn {
    pub name: String,
    pub data_type: DataType,
    pub dependencies: Dependencies,
    pub attributes: ColumnAttributes,
    /// Columns sharing a group are produced by one call.
    pub group: Option<String>,
    pub func: ComputeFn,
}

impl ComputedColumn {
    pub fn new<F>(name: impl Into<String>, data_type: DataType, dependencies: impl Into<Dependencies>, func: F) -> Self
    where
        F: Fn(&ComputeScope<'_>) -> Result<Vec<Value>> + 'static,
    {
        Self {
            name: name.into(),
            data_type,
            dependencies: dependencies.into(),
            attributes: ColumnAttributes::default(),
            group: None,
            func: Rc::new(move |scope: &ComputeScope<'_>| func(scope).map(ComputedValues::Column)),
        }
    }

    /// A column computed independently for each row.
    pub fn per_row<F>(name: impl Into<String>, data_type: DataType, dependencies: impl Into<Dependencies>, func: F) -> Self
    where
        F: Fn(&RowScope<'_, '_>) -> Result<Value> + 'static,
    {
        Self::new(name, data_type, dependencies, move |scope| {
            scope.rows().map(|row| func(&row)).collect()
        })
    }

    pub fn attributes(mut self, attributes: ColumnAttributes) -> Self {
        self.attributes = attributes;
        self
    }
}

impl fmt::Debug for ComputedColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputedColumn")
            .field("name", &self.name)
            .field("data_type", &self.data_type)
            .field("dependencies", &self.dependencies)
            .field("group", &self.group)
            .finish_non_exhaustive()
    }
}

/// Intensity statistics under a shape column, fanned out into one physical
/// column per `(channel, aggregate)` named `{name}_ch{channel}_{aggregate}`
/// (channels counted from 1).
#[derive(Debug, Clone, PartialEq)]
pub struct PixelColumn {
    pub name: String,
    pub shape_column: String,
    pub z_column: String,
    pub aggregates: Vec<Aggregate>,
    pub z_spread: i64,
    pub time_field: String,
    pub attributes: ColumnAttributes,
}

impl PixelColumn {
    pub fn new(name: impl Into<String>, shape_column: impl Into<String>, z_column: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            shape_column: shape_column.into(),
            z_column: z_column.into(),
            aggregates: vec![Aggregate::Sum, Aggregate::Max],
            z_spread: 0,
            time_field: "t".to_string(),
            attributes: ColumnAttributes::default(),
        }
    }

    pub fn aggregates(mut self, aggregates: Vec<Aggregate>) -> Self {
        self.aggregates = aggregates;
        self
    }

    pub fn z_spread(mut self, z_spread: i64) -> Self {
        self.z_spread = z_spread;
        self
    }

    pub fn attributes(mut self, attributes: ColumnAttributes) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn column_name(&self, channel: usize, aggregate: Aggregate) -> String {
        format!("{}_ch{}_{}", self.name, channel + 1, aggregate)
    }

    /// Physical columns for a volume with `channels` channels. They share a
    /// single function that computes only the pending channel/aggregate pairs.
    pub fn expand(&self, channels: usize) -> Vec<ComputedColumn> {
        let pixel = Rc::new(self.clone());
        let func: ComputeFn = Rc::new(move |scope: &ComputeScope<'_>| compute_pixel_group(&pixel, scope));

        let mut columns = Vec::with_capacity(channels * self.aggregates.len());
        for channel in 0..channels {
            for aggregate in &self.aggregates {
                let title = if self.attributes.title.is_empty() { &self.name } else { &self.attributes.title };
                let mut name = aggregate.name().to_string();
                if let Some(first) = name.get_mut(0..1) {
                    first.make_ascii_uppercase();
                }
                columns.push(ComputedColumn {
                    name: self.column_name(channel, *aggregate),
                    data_type: DataType::Float,
                    dependencies: Dependencies::local([self.shape_column.clone(), self.z_column.clone()]),
                    attributes: ColumnAttributes {
                        title: format!("{} Channel {} - {}", title, channel + 1, name),
                        ..self.attributes.clone()
                    },
                    group: Some(self.name.clone()),
                    func: Rc::clone(&func),
                });
            }
        }
        columns
    }

    /// Channels and aggregates named by the pending columns of this group.
    fn parse_pending(&self, pending: &[String]) -> (BTreeSet<usize>, BTreeSet<Aggregate>) {
        let prefix = format!("{}_ch", self.name);
        let mut channels = BTreeSet::new();
        let mut aggregates = BTreeSet::new();
        for column in pending {
            let Some(rest) = column.strip_prefix(&prefix) else {
                continue;
            };
            let Some((channel, aggregate)) = rest.split_once('_') else {
                continue;
            };
            if let (Ok(channel), Ok(aggregate)) = (channel.parse::<usize>(), aggregate.parse::<Aggregate>())
                && channel > 0
            {
                channels.insert(channel - 1);
                aggregates.insert(aggregate);
            }
        }
        (channels, aggregates)
    }
}

fn compute_pixel_group(pixel: &PixelColumn, scope: &ComputeScope<'_>) -> Result<ComputedValues> {
    let (channels, aggregates) = pixel.parse_pending(scope.pending());
    let mut out = BTreeMap::new();
    if channels.is_empty() || aggregates.is_empty() {
        return Ok(ComputedValues::Columns(out));
    }

    let requests = scope
        .rows()
        .map(|row| {
            let shape = Shape::from_value(&row.get(&pixel.shape_column)?);
            let z = row.get(&pixel.z_column)?.as_i64().unwrap_or(0);
            let t = row.get(&pixel.time_field)?.as_i64().unwrap_or(0);
            Ok(ShapeRequest { t, z, shape })
        })
        .collect::<Result<Vec<_>>>()?;

    let images = scope.images()?;
    for channel in channels {
        let gathered = gather_pixels(images, &requests, channel, pixel.z_spread)?;
        for aggregate in &aggregates {
            let values = gathered.iter().map(|px| aggregate.apply(px)).collect();
            out.insert(pixel.column_name(channel, *aggregate), values);
        }
    }
    Ok(ComputedValues::Columns(out))
}

/// Where a column name lives in a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Index(usize),
    Stored(usize),
    Computed(usize),
}

#[derive(Debug, Clone)]
pub struct Schema {
    name: String,
    index: Vec<String>,
    index_attributes: BTreeMap<String, ColumnAttributes>,
    columns: Vec<ColumnDef>,
    relationships: BTreeMap<String, Vec<String>>,
    computed: Vec<ComputedColumn>,
    pixel_columns: Vec<PixelColumn>,
    modified: Option<String>,
    slots: HashMap<String, Slot>,
}

impl Schema {
    pub fn builder(name: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index(&self) -> &[String] {
        &self.index
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn stored_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn computed(&self) -> &[ComputedColumn] {
        &self.computed
    }

    pub fn pixel_columns(&self) -> &[PixelColumn] {
        &self.pixel_columns
    }

    pub fn relationships(&self) -> &BTreeMap<String, Vec<String>> {
        &self.relationships
    }

    /// Local fields that, read in order, form `target`'s key.
    pub fn relationship(&self, target: &str) -> Option<&[String]> {
        self.relationships.get(target).map(Vec::as_slice)
    }

    /// Key of the `target` row referenced by a row of this schema, read from
    /// its key and stored fields. `None` if any field is null.
    pub fn foreign_key(&self, target: &str, key: &RowKey, stored: &[Value]) -> Option<RowKey> {
        let levels = self
            .relationship(target)?
            .iter()
            .map(|field| match self.slot(field)? {
                Slot::Index(level) => key.level(level),
                Slot::Stored(i) => stored.get(i)?.as_i64(),
                Slot::Computed(_) => None,
            })
            .collect::<Option<Vec<i64>>>()?;
        RowKey::from_levels(&levels)
    }

    pub fn modified_column(&self) -> Option<&str> {
        self.modified.as_deref()
    }

    pub fn slot(&self, column: &str) -> Option<Slot> {
        self.slots.get(column).copied()
    }

    pub fn stored_index(&self, column: &str) -> Option<usize> {
        match self.slot(column) {
            Some(Slot::Stored(i)) => Some(i),
            _ => None,
        }
    }

    pub fn computed_index(&self, column: &str) -> Option<usize> {
        match self.slot(column) {
            Some(Slot::Computed(i)) => Some(i),
            _ => None,
        }
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.slots.contains_key(column)
    }

    pub fn is_computed(&self, column: &str) -> bool {
        matches!(self.slot(column), Some(Slot::Computed(_)))
    }

    /// Every non-index column: stored first, then computed.
    pub fn column_names(&self) -> Vec<String> {
        self.columns
            .iter()
            .map(|c| c.name.clone())
            .chain(self.computed.iter().map(|c| c.name.clone()))
            .collect()
    }

    pub fn column_type(&self, column: &str) -> Option<DataType> {
        match self.slot(column)? {
            Slot::Index(_) => Some(DataType::Integer),
            Slot::Stored(i) => Some(self.columns[i].data_type),
            Slot::Computed(i) => Some(self.computed[i].data_type),
        }
    }

    pub fn attributes(&self, column: &str) -> Option<&ColumnAttributes> {
        match self.slot(column)? {
            Slot::Index(_) => self.index_attributes.get(column),
            Slot::Stored(i) => Some(&self.columns[i].attributes),
            Slot::Computed(i) => Some(&self.computed[i].attributes),
        }
    }

    /// A fresh row of stored defaults.
    pub fn defaults(&self) -> Vec<Value> {
        self.columns.iter().map(ColumnDef::default_cell).collect()
    }

    /// Validates and casts a value written to `column`, filling defaults for
    /// `Null`. Index fields must be integers; computed and `modified` columns
    /// are read-only.
    pub fn coerce(&self, column: &str, value: Value) -> Result<Value> {
        let slot = self.slot(column).ok_or_else(|| StoreError::UnknownColumn {
            column: column.to_string(),
            schema: self.name.clone(),
        })?;

        let def = match slot {
            Slot::Computed(_) => return Err(self.read_only(column)),
            Slot::Stored(_) if self.modified.as_deref() == Some(column) => {
                return Err(self.read_only(column));
            }
            Slot::Index(_) => {
                return match DataType::Integer.coerce(value.clone()) {
                    Some(v @ Value::Integer(_)) => Ok(v),
                    _ => Err(StoreError::InvalidKey(format!(
                        "index field '{}' of '{}' needs an integer, got {}",
                        column,
                        self.name,
                        value.type_name()
                    ))),
                };
            }
            Slot::Stored(i) => &self.columns[i],
        };

        let found = value.type_name();
        let coerced = def
            .data_type
            .coerce(value)
            .ok_or_else(|| StoreError::TypeMismatch {
                column: column.to_string(),
                expected: def.data_type.to_string(),
                found: found.to_string(),
            })?;
        let filled = if coerced.is_null() { def.default_cell() } else { coerced };

        if let Some(constraint) = def.constraint {
            constraint.check(column, &filled)?;
        }
        Ok(filled)
    }

    /// Copy of this schema with pixel columns fanned out for `channels`.
    pub fn with_pixel_channels(&self, channels: usize) -> Result<Schema> {
        let mut builder = SchemaBuilder {
            schema: Schema {
                computed: self
                    .computed
                    .iter()
                    .filter(|c| c.group.is_none())
                    .cloned()
                    .collect(),
                ..self.clone()
            },
        };
        for pixel in &self.pixel_columns {
            builder.schema.computed.extend(pixel.expand(channels));
        }
        builder.build()
    }

    fn read_only(&self, column: &str) -> StoreError {
        StoreError::ReadOnlyColumn {
            column: column.to_string(),
            schema: self.name.clone(),
        }
    }

    fn rebuild_slots(&mut self) -> Result<()> {
        let mut slots = HashMap::new();
        let named = self
            .index
            .iter()
            .enumerate()
            .map(|(i, n)| (n, Slot::Index(i)))
            .chain(self.columns.iter().enumerate().map(|(i, c)| (&c.name, Slot::Stored(i))))
            .chain(self.computed.iter().enumerate().map(|(i, c)| (&c.name, Slot::Computed(i))));

        for (name, slot) in named {
            if slots.insert(name.clone(), slot).is_some() {
                return Err(StoreError::InvalidSchema(format!(
                    "column '{}' declared twice in '{}'",
                    name, self.name
                )));
            }
        }
        self.slots = slots;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(StoreError::InvalidSchema(format!("{}: {}", self.name, msg)));

        if self.index.is_empty() || self.index.len() > 2 {
            return invalid(format!("index needs 1 or 2 fields, got {}", self.index.len()));
        }

        for def in &self.columns {
            if let Some(default) = &def.default
                && !def.data_type.is_compatible(default)
            {
                return invalid(format!("default of '{}' is not a {}", def.name, def.data_type));
            }
        }

        if let Some(modified) = &self.modified
            && self.column_type(modified) != Some(DataType::Timestamp)
        {
            return invalid(format!("modified column '{}' must be a stored timestamp", modified));
        }

        for (target, fields) in &self.relationships {
            if fields.is_empty() || fields.len() > 2 {
                return invalid(format!("relationship to '{}' needs 1 or 2 fields", target));
            }
            for field in fields {
                if self.column_type(field) != Some(DataType::Integer) || self.is_computed(field) {
                    return invalid(format!(
                        "relationship field '{}' must be an index field or stored integer",
                        field
                    ));
                }
            }
        }

        for col in &self.computed {
            for dep in &col.dependencies.local {
                if !self.has_column(dep) {
                    return invalid(format!("'{}' depends on unknown column '{}'", col.name, dep));
                }
            }
        }

        for pixel in &self.pixel_columns {
            for dep in [&pixel.shape_column, &pixel.z_column, &pixel.time_field] {
                if !self.has_column(dep) {
                    return invalid(format!("'{}' depends on unknown column '{}'", pixel.name, dep));
                }
            }
        }
        Ok(())
    }
}

pub struct SchemaBuilder {
    schema: Schema,
}

impl SchemaBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            schema: Schema {
                name: name.into(),
                index: Vec::new(),
                index_attributes: BTreeMap::new(),
                columns: Vec::new(),
                relationships: BTreeMap::new(),
                computed: Vec::new(),
                pixel_columns: Vec::new(),
                modified: None,
                slots: HashMap::new(),
            },
        }
    }

    pub fn index<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.schema.index = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn index_attributes(mut self, field: impl Into<String>, attributes: ColumnAttributes) -> Self {
        self.schema.index_attributes.insert(field.into(), attributes);
        self
    }

    pub fn column(mut self, column: ColumnDef) -> Self {
        self.schema.columns.push(column);
        self
    }

    pub fn relationship<I, S>(mut self, target: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.schema
            .relationships
            .insert(target.into(), fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn computed(mut self, column: ComputedColumn) -> Self {
        self.schema.computed.push(column);
        self
    }

    pub fn pixels(mut self, column: PixelColumn) -> Self {
        self.schema.pixel_columns.push(column);
        self
    }

    /// Stored timestamp column the store stamps on every changing write.
    pub fn modified(mut self, column: impl Into<String>) -> Self {
        self.schema.modified = Some(column.into());
        self
    }

    pub fn build(mut self) -> Result<Schema> {
        self.schema.rebuild_slots()?;
        self.schema.validate()?;
        Ok(self.schema)
    }
}
