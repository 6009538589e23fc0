//! In-memory catalog backend.
//!
//! Thread-safe map of table name to frame snapshot. It is intended for
//! embedded usage, tests and as a reference implementation.

use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

use polars::prelude::DataFrame;
use tracing::debug;

use crate::catalog::traits::ReferenceCatalog;
use crate::error::CatalogError;
use crate::table::from_json_records;

fn lock_err(context: &'static str) -> CatalogError {
    CatalogError::BackendError(format!("poisoned lock: {context}"))
}

fn normalize_key(s: &str) -> String {
    s.trim().to_ascii_lowercase()
}

/// Thread-safe in-memory catalog.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    tables: RwLock<HashMap<String, DataFrame>>,
}

impl InMemoryCatalog {
    /// Create a new empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) a table under `name`.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the lock is poisoned.
    pub fn register(&self, name: &str, frame: DataFrame) -> Result<(), CatalogError> {
        let mut tables = self.tables.write().map_err(|_| lock_err("catalog.register"))?;
        tables.insert(normalize_key(name), frame);
        Ok(())
    }

    /// Loads every `<table>.json` file in `dir`. Each file holds a JSON
    /// array of objects; the file stem becomes the table name.
    ///
    /// # Errors
    ///
    /// Returns a backend error for unreadable files or malformed tables.
    pub fn load_dir(dir: &Path) -> Result<Self, CatalogError> {
        let catalog = Self::new();
        let entries = std::fs::read_dir(dir).map_err(|e| {
            CatalogError::BackendError(format!("cannot read {}: {e}", dir.display()))
        })?;

        for entry in entries {
            let path = entry
                .map_err(|e| CatalogError::BackendError(e.to_string()))?
                .path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };

            let raw = std::fs::read_to_string(&path).map_err(|e| {
                CatalogError::BackendError(format!("cannot read {}: {e}", path.display()))
            })?;
            let records: Vec<serde_json::Map<String, serde_json::Value>> =
                serde_json::from_str(&raw).map_err(|e| {
                    CatalogError::BackendError(format!("invalid table {}: {e}", path.display()))
                })?;
            let frame = from_json_records(&records).map_err(|e| {
                CatalogError::BackendError(format!("invalid table {}: {e}", path.display()))
            })?;
            debug!(table = name, rows = frame.height(), "loaded reference table");
            catalog.register(name, frame)?;
        }

        Ok(catalog)
    }
}

impl ReferenceCatalog for InMemoryCatalog {
    fn table(&self, name: &str) -> Result<DataFrame, CatalogError> {
        let tables = self.tables.read().map_err(|_| lock_err("catalog.table"))?;
        tables
            .get(&normalize_key(name))
            .cloned()
            .ok_or_else(|| CatalogError::TableNotFound(name.to_string()))
    }

    fn contains(&self, name: &str) -> Result<bool, CatalogError> {
        let tables = self.tables.read().map_err(|_| lock_err("catalog.contains"))?;
        Ok(tables.contains_key(&normalize_key(name)))
    }

    fn table_names(&self) -> Result<Vec<String>, CatalogError> {
        let tables = self.tables.read().map_err(|_| lock_err("catalog.table_names"))?;
        let mut names: Vec<String> = tables.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}
