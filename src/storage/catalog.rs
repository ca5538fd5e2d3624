use super::schema::Schema;
use crate::core::{Result, StoreError};
use std::collections::BTreeMap;
use std::rc::Rc;

/// Registered schemas. Immutable once built: adding a schema returns a new
/// catalog and leaves the old one untouched, so handles that cloned it keep
/// a consistent view.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    schemas: Rc<BTreeMap<String, Rc<Schema>>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_schema(self, schema: Schema) -> Result<Self> {
        let name = schema.name().to_string();
        if self.schemas.contains_key(&name) {
            return Err(StoreError::SchemaExists(name));
        }

        // Copy-on-write
        let mut schemas = (*self.schemas).clone();
        schemas.insert(name, Rc::new(schema));
        Ok(Self {
            schemas: Rc::new(schemas),
        })
    }

    pub fn get_schema(&self, name: &str) -> Result<&Rc<Schema>> {
        self.schemas
            .get(name)
            .ok_or_else(|| StoreError::UnknownSchema(name.to_string()))
    }

    pub fn schema_exists(&self, name: &str) -> bool {
        self.schemas.contains_key(name)
    }

    pub fn list_schemas(&self) -> Vec<&str> {
        self.schemas.keys().map(String::as_str).collect()
    }

    /// Schemas holding a relationship to `target`.
    pub fn referencing(&self, target: &str) -> Vec<&Rc<Schema>> {
        self.schemas
            .values()
            .filter(|s| s.relationship(target).is_some())
            .collect()
    }
}
