//! # rowmatch - Metadata-driven record resolution
//!
//! rowmatch resolves incoming source records against a master-data store.
//! Every row gets a content-derived identity, and declarative rules then
//! look up foreign keys, translate labels to codes and follow polymorphic
//! external references. All of it runs as bulk set operations over the
//! whole dataset.
//!
//! ## Core Concepts
//!
//! - **DataFrame**: the polars working dataset every step consumes and returns
//! - **ReferenceCatalog**: read-only, environment-qualified reference tables
//! - **RuleSpec**: one declarative resolution step from mapping metadata
//! - **FailureRecord**: an attributable row-level failure; the batch continues
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use rowmatch::{InMemoryCatalog, MappingMetadata, Resolver, ResolverConfig};
//!
//! let catalog = InMemoryCatalog::load_dir("reference/".as_ref())?;
//! let metadata = MappingMetadata::from_json(&std::fs::read_to_string("mapping.json")?)?;
//!
//! let resolver = Resolver::new(Arc::new(catalog), ResolverConfig::from_env());
//! let resolved = resolver.run(&dataset, &metadata)?;
//! let clean = resolver.exclude_failed(&resolved, &metadata.id_column)?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Data model
pub mod error;
pub mod table;

// Reference data and configuration
pub mod catalog;
pub mod config;
pub mod rule;

// Resolution steps
pub mod external_ref;
pub mod failure;
pub mod identity;
pub mod matcher;
pub mod optionset;
pub mod pipeline;

// Re-export primary types at crate root for convenience
pub use catalog::{InMemoryCatalog, ReferenceCatalog};
pub use config::{ResolverConfig, SchemaNames};
pub use error::{CatalogError, ResolveError, ResolveResult, RuleError};
pub use failure::{ErrorCollector, FailureCause, FailureRecord, Stage, ValidationKind};
pub use identity::assign_row_ids;
pub use pipeline::Resolver;
pub use rule::{
    Behaviour, Condition, EntityRule, ExternalReferenceRule, FoundMultiple, FoundNone,
    MappingMetadata, MatchFilter, OptionSetRule, OutputColumn, RuleSpec, TypeRule, TypeScope,
};
pub use table::{from_json_records, to_json_records};
