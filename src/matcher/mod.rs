//! Reference-entity matching.
//!
//! [`match_to_entity`] is the central lookup algorithm; [`match_to_type`]
//! specialises it for name lookups scoped to a parent type or an optionset
//! group. Both take a [`MatchContext`] carrying everything a resolution step
//! reads or appends to outside the working dataset.

mod entity;
mod typed;

pub use entity::match_to_entity;
pub use typed::match_to_type;

use polars::prelude::DataFrame;

use crate::catalog::ReferenceCatalog;
use crate::config::ResolverConfig;
use crate::error::ResolveResult;
use crate::failure::ErrorCollector;

/// Shared inputs of a single resolution step.
#[derive(Clone, Copy)]
pub struct MatchContext<'a> {
    /// Source of reference tables.
    pub catalog: &'a dyn ReferenceCatalog,
    /// Environment, schema names and logging flag.
    pub config: &'a ResolverConfig,
    /// Sink for row-level failures.
    pub errors: &'a ErrorCollector,
    /// Name of the row identity column.
    pub id_column: &'a str,
}

impl<'a> MatchContext<'a> {
    /// Bundles the inputs of one resolution step.
    #[must_use]
    pub fn new(
        catalog: &'a dyn ReferenceCatalog,
        config: &'a ResolverConfig,
        errors: &'a ErrorCollector,
        id_column: &'a str,
    ) -> Self {
        Self {
            catalog,
            config,
            errors,
            id_column,
        }
    }

    /// Loads an environment-qualified reference table.
    ///
    /// # Errors
    ///
    /// Returns a catalog error when the table does not exist.
    pub fn reference_table(&self, entity: &str) -> ResolveResult<DataFrame> {
        Ok(self.catalog.table(&self.config.qualify(entity))?)
    }

    pub(crate) fn verbose(&self) -> bool {
        self.config.verbose_logging
    }
}

impl std::fmt::Debug for MatchContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatchContext")
            .field("environment", &self.config.environment)
            .field("id_column", &self.id_column)
            .finish_non_exhaustive()
    }
}
