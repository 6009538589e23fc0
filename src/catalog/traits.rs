//! Abstract catalog trait.
//!
//! Backends only need to hand out immutable table snapshots by name. By
//! using a trait, we enable:
//! - In-memory catalogs for testing and embedded use
//! - Lakehouse or warehouse-backed catalogs in production

use std::sync::OnceLock;

use polars::prelude::DataFrame;
use regex::Regex;

use crate::error::CatalogError;

/// Read-only lookup of reference tables by fully qualified name.
///
/// # Safety Considerations
/// - Returned frames are snapshots; later registrations must not affect
///   a frame already handed out
/// - Implementations should handle concurrent access safely
pub trait ReferenceCatalog: Send + Sync {
    /// Get a table by name. Names are case-insensitive.
    ///
    /// Polars frames share their column buffers, so the returned clone is
    /// cheap and unaffected by later registrations.
    fn table(&self, name: &str) -> Result<DataFrame, CatalogError>;

    /// Returns true if a table with this name exists.
    fn contains(&self, name: &str) -> Result<bool, CatalogError>;

    /// Lists every table name known to the catalog.
    fn table_names(&self) -> Result<Vec<String>, CatalogError>;
}

static TABLE_NAME: OnceLock<Option<Regex>> = OnceLock::new();

/// Checks that a table name is a plain identifier.
///
/// Entity type names discovered in data are turned into table names, so they
/// are checked before use.
///
/// # Errors
///
/// Returns [`CatalogError::InvalidTableName`] for anything but
/// `[A-Za-z_][A-Za-z0-9_]*`.
pub fn validate_table_name(name: &str) -> Result<(), CatalogError> {
    let pattern = TABLE_NAME
        .get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").ok())
        .as_ref()
        .ok_or_else(|| CatalogError::BackendError("table name pattern failed to compile".to_string()))?;

    if pattern.is_match(name) {
        Ok(())
    } else {
        Err(CatalogError::InvalidTableName(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Compile-time test: ensure the trait is object-safe
    fn _assert_catalog_object_safe(_: &dyn ReferenceCatalog) {}

    #[test]
    fn test_validate_table_name() {
        assert!(validate_table_name("dev_contact").is_ok());
        assert!(validate_table_name("_x1").is_ok());
        assert!(validate_table_name("").is_err());
        assert!(validate_table_name("1abc").is_err());
        assert!(validate_table_name("contact; drop").is_err());
        assert!(validate_table_name("a.b").is_err());
    }
}
