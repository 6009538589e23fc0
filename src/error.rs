//! Error types for rowmatch.
//!
//! All errors in rowmatch are strongly typed using thiserror.
//! Row-level match failures are *not* errors: they are captured as
//! [`FailureRecord`](crate::failure::FailureRecord)s and the batch continues.
//! The types here cover structural problems only (a missing table, an
//! unknown column, malformed rule metadata).

use polars::prelude::PolarsError;
use thiserror::Error;

/// Errors raised by reference-data catalogs.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Table not found.
    #[error("Table not found: {0}")]
    TableNotFound(String),

    /// The table name is not a plain identifier.
    #[error("Invalid table name: {0}")]
    InvalidTableName(String),

    /// Backend error.
    #[error("Catalog backend error: {0}")]
    BackendError(String),
}

/// Errors in rule metadata that cannot be normalised to a default.
#[derive(Debug, Error)]
pub enum RuleError {
    /// A field the rule cannot run without is absent or empty.
    #[error("Rule '{rule}' is missing required field '{field}'")]
    MissingField {
        /// Rule name.
        rule: String,
        /// Field name.
        field: String,
    },

    /// A type rule named both or neither of parent and group.
    #[error("Rule '{rule}' must supply exactly one of parent or group")]
    InvalidTypeScope {
        /// Rule name.
        rule: String,
    },

    /// The metadata document itself is malformed.
    #[error("Invalid rule metadata: {reason}")]
    InvalidMetadata {
        /// Parser message.
        reason: String,
    },
}

/// Top-level error type for rowmatch.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The dataframe engine rejected a plan (unknown column, bad dtype).
    #[error("Dataframe error: {0}")]
    Polars(#[from] PolarsError),

    /// Reference data could not be loaded.
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// Rule metadata is unusable.
    #[error("Rule error: {0}")]
    Rule(#[from] RuleError),
}

impl ResolveError {
    /// Returns true if this is a dataframe engine error.
    #[must_use]
    pub const fn is_polars(&self) -> bool {
        matches!(self, Self::Polars(_))
    }

    /// Returns true if this is a catalog error.
    #[must_use]
    pub const fn is_catalog(&self) -> bool {
        matches!(self, Self::Catalog(_))
    }

    /// Returns true if this is a rule metadata error.
    #[must_use]
    pub const fn is_rule(&self) -> bool {
        matches!(self, Self::Rule(_))
    }
}

/// Result type alias for rowmatch operations.
pub type ResolveResult<T> = Result<T, ResolveError>;
