//! Table blobs handed to the persistence collaborator.
//!
//! Only stored columns travel; computed caches are rebuilt lazily after a
//! load. Columns are matched by name, so a blob written before a column was
//! added still loads (the new column takes its default).

use crate::core::{Result, RowKey, StoreError, Value};
use crate::storage::schema::Schema;
use crate::storage::table::Table;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::Path;
use std::rc::Rc;
use tempfile::NamedTempFile;

pub const FORMAT_VERSION: u32 = 1;

// ============================================================================
// Table Snapshot
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSnapshot {
    pub version: u32,
    pub schema: String,
    pub columns: Vec<String>,
    pub rows: Vec<(RowKey, Vec<Value>)>,
}

impl TableSnapshot {
    pub fn capture(table: &Table) -> Self {
        let rows = table
            .keys()
            .filter_map(|key| table.row(key).map(|row| (*key, row.stored().to_vec())))
            .collect();
        Self {
            version: FORMAT_VERSION,
            schema: table.schema().name().to_string(),
            columns: table.schema().stored_names(),
            rows,
        }
    }

    /// Rebuilds a table for `schema`, realigning columns by name.
    pub fn restore(self, schema: Rc<Schema>) -> Result<Table> {
        if self.schema != schema.name() {
            return Err(StoreError::Serialization(format!(
                "blob holds '{}', expected '{}'",
                self.schema,
                schema.name()
            )));
        }

        let positions: Vec<Option<usize>> = schema
            .stored_names()
            .iter()
            .map(|name| self.columns.iter().position(|c| c == name))
            .collect();
        for column in &self.columns {
            if schema.stored_index(column).is_none() {
                warn!("dropping column '{}' unknown to '{}'", column, schema.name());
            }
        }

        let defaults = schema.defaults();
        let mut table = Table::new(Rc::clone(&schema));
        for (key, values) in self.rows {
            let stored = positions
                .iter()
                .zip(&defaults)
                .map(|(pos, default)| {
                    pos.and_then(|i| values.get(i).cloned())
                        .unwrap_or_else(|| default.clone())
                })
                .collect();
            table.insert_row(key, stored)?;
        }
        debug!("restored {} row(s) into '{}'", table.len(), schema.name());
        Ok(table)
    }
}

pub fn to_bytes(table: &Table) -> Result<Vec<u8>> {
    let snapshot = TableSnapshot::capture(table);
    Ok(rmp_serde::to_vec(&snapshot)?)
}

pub fn from_bytes(schema: Rc<Schema>, bytes: &[u8]) -> Result<Table> {
    let snapshot: TableSnapshot = rmp_serde::from_slice(bytes)?;
    if snapshot.version > FORMAT_VERSION {
        return Err(StoreError::Serialization(format!(
            "blob format {} is newer than {}",
            snapshot.version, FORMAT_VERSION
        )));
    }
    snapshot.restore(schema)
}

// ============================================================================
// Files
// ============================================================================

/// Writes `bytes` next to `path` and renames over it, so a crash never
/// leaves a half-written file behind.
pub fn write_atomic<P: AsRef<Path>>(path: P, bytes: &[u8]) -> Result<()> {
    let path = path.as_ref();
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| StoreError::Io(e.error.to_string()))?;
    Ok(())
}

pub fn read_file<P: AsRef<Path>>(path: P) -> Result<Vec<u8>> {
    Ok(fs::read(path)?)
}
