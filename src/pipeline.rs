//! Rule pipeline.
//!
//! [`Resolver`] is the entry point for resolving a whole dataset: it assigns
//! row identities once, then applies each configured rule in declaration
//! order, threading the growing frame through every step.

use std::sync::Arc;
use std::time::Instant;

use polars::prelude::DataFrame;
use tracing::{debug, info};

use crate::catalog::ReferenceCatalog;
use crate::config::ResolverConfig;
use crate::error::ResolveResult;
use crate::external_ref::match_to_external_reference;
use crate::failure::{ErrorCollector, FailureRecord};
use crate::identity::assign_row_ids;
use crate::matcher::{match_to_entity, match_to_type, MatchContext};
use crate::optionset::match_to_optionset;
use crate::rule::{MappingMetadata, RuleSpec};

/// Runs mapping metadata against a dataset.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
///
/// use polars::prelude::*;
/// use rowmatch::rule::{EntityRule, MatchFilter};
/// use rowmatch::table::text_values;
/// use rowmatch::{InMemoryCatalog, MappingMetadata, Resolver, ResolverConfig, RuleSpec};
///
/// let catalog = InMemoryCatalog::new();
/// catalog.register("dev_account", df!("Id" => ["a-1"], "name" => ["Acme"])?)?;
///
/// let metadata = MappingMetadata::default().rule(RuleSpec::MatchToEntity(
///     EntityRule::new("account", "account")
///         .filter(MatchFilter::column("name", "company"))
///         .output("Id", "account_id"),
/// ));
///
/// let resolver = Resolver::new(Arc::new(catalog), ResolverConfig::default());
/// let data = df!("company" => ["ACME"])?;
/// let resolved = resolver.run(&data, &metadata)?;
///
/// assert_eq!(text_values(&resolved, "account_id")?, vec![Some("a-1".to_string())]);
/// assert!(resolver.failures().is_empty());
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct Resolver {
    catalog: Arc<dyn ReferenceCatalog>,
    config: ResolverConfig,
    errors: Arc<ErrorCollector>,
}

impl Resolver {
    /// Creates a resolver with a fresh error collector.
    #[must_use]
    pub fn new(catalog: Arc<dyn ReferenceCatalog>, config: ResolverConfig) -> Self {
        Self {
            catalog,
            config,
            errors: Arc::new(ErrorCollector::new()),
        }
    }

    /// Shares an existing collector, e.g. across resolvers for several
    /// datasets.
    #[must_use]
    pub fn with_collector(mut self, errors: Arc<ErrorCollector>) -> Self {
        self.errors = errors;
        self
    }

    /// Configuration the resolver runs with.
    #[must_use]
    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Collector receiving every row-level failure.
    #[must_use]
    pub fn collector(&self) -> &Arc<ErrorCollector> {
        &self.errors
    }

    /// All failures recorded so far.
    #[must_use]
    pub fn failures(&self) -> Vec<FailureRecord> {
        self.errors.records()
    }

    /// Context for invoking a single resolution step directly.
    #[must_use]
    pub fn context<'a>(&'a self, id_column: &'a str) -> MatchContext<'a> {
        MatchContext::new(self.catalog.as_ref(), &self.config, &self.errors, id_column)
    }

    /// Applies one rule. The frame must already carry `id_column`.
    ///
    /// # Errors
    ///
    /// Returns the structural error of the underlying resolution step.
    pub fn apply_rule(
        &self,
        frame: &DataFrame,
        rule: &RuleSpec,
        id_column: &str,
    ) -> ResolveResult<DataFrame> {
        let ctx = self.context(id_column);
        let started = Instant::now();
        let out = match rule {
            RuleSpec::MatchToEntity(r) => match_to_entity(&ctx, frame, r, rule.validation())?,
            RuleSpec::MatchToOptionset(r) => match_to_optionset(&ctx, frame, r)?,
            RuleSpec::MatchToType(r) => match_to_type(&ctx, frame, r)?,
            RuleSpec::MatchToExternalReference(r) => match_to_external_reference(&ctx, frame, r)?,
        };
        debug!(
            rule = rule.rule_name(),
            validation = %rule.validation(),
            elapsed = ?started.elapsed(),
            "rule applied"
        );
        Ok(out)
    }

    /// Assigns identities to `frame`, then applies every rule of `metadata`
    /// in order.
    ///
    /// Row-level failures are recorded and do not stop the run; structural
    /// errors such as a missing table or an unknown column abort it.
    ///
    /// # Errors
    ///
    /// Returns the first structural error raised by a step.
    pub fn run(&self, frame: &DataFrame, metadata: &MappingMetadata) -> ResolveResult<DataFrame> {
        let started = Instant::now();
        let failures_before = self.errors.len();

        let mut current = assign_row_ids(frame, &metadata.id_column)?;
        for rule in &metadata.rules {
            current = self.apply_rule(&current, rule, &metadata.id_column)?;
        }

        info!(
            environment = %self.config.environment,
            rows = current.height(),
            rules = metadata.rules.len(),
            failures = self.errors.len().saturating_sub(failures_before),
            elapsed = ?started.elapsed(),
            "resolution run complete"
        );
        Ok(current)
    }

    /// Removes rows whose identity has at least one failure record.
    ///
    /// # Errors
    ///
    /// Returns an error when `frame` has no `id_column`.
    pub fn exclude_failed(&self, frame: &DataFrame, id_column: &str) -> ResolveResult<DataFrame> {
        Ok(self.errors.exclude_failed(frame, id_column)?)
    }
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("config", &self.config)
            .field("failures", &self.errors.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::InMemoryCatalog;
    use crate::rule::{EntityRule, MatchFilter, OptionSetRule};
    use crate::table::{column_names, text_values};
    use polars::prelude::*;

    fn resolver() -> Resolver {
        let catalog = InMemoryCatalog::new();
        catalog
            .register("dev_account", df!("Id" => ["a-1"], "name" => ["Acme"]).unwrap())
            .unwrap();
        catalog
            .register(
                "dev_GlobalOptionSetMetadata",
                df!(
                    "EntityName" => ["account"],
                    "OptionSetName" => ["tier"],
                    "Option" => [100i64],
                    "LocalizedLabel" => ["Gold"],
                )
                .unwrap(),
            )
            .unwrap();
        Resolver::new(Arc::new(catalog), ResolverConfig::default())
    }

    fn metadata() -> MappingMetadata {
        MappingMetadata::default()
            .rule(RuleSpec::MatchToOptionset(OptionSetRule::new(
                "tier", "account", "tier", "tier", "tier_code",
            )))
            .rule(RuleSpec::MatchToEntity(
                EntityRule::new("account", "account")
                    .filter(MatchFilter::column("name", "company"))
                    .output("Id", "account_id"),
            ))
    }

    fn data() -> DataFrame {
        df!(
            "company" => ["acme", "Initech"],
            "tier" => ["gold", "tin"],
        )
        .unwrap()
    }

    #[test]
    fn test_run_applies_rules_in_order() {
        let resolver = resolver();
        let out = resolver.run(&data(), &metadata()).unwrap();
        assert_eq!(
            column_names(&out),
            vec!["company", "tier", "row_id", "tier_code", "account_id"]
        );
        assert_eq!(
            text_values(&out, "tier_code").unwrap(),
            vec![Some("100".to_string()), None]
        );
        assert_eq!(
            text_values(&out, "account_id").unwrap(),
            vec![Some("a-1".to_string()), None]
        );

        let failures = resolver.failures();
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].rule_name, "tier");
        assert_eq!(failures[1].rule_name, "account");
        assert_eq!(failures[0].row_id, failures[1].row_id);
    }

    #[test]
    fn test_exclude_failed_is_explicit() {
        let resolver = resolver();
        let out = resolver.run(&data(), &metadata()).unwrap();
        assert_eq!(out.height(), 2);

        let clean = resolver.exclude_failed(&out, "row_id").unwrap();
        assert_eq!(clean.height(), 1);
        assert_eq!(
            text_values(&clean, "company").unwrap(),
            vec![Some("acme".to_string())]
        );
    }

    #[test]
    fn test_shared_collector() {
        let shared = Arc::new(ErrorCollector::new());
        let resolver = resolver().with_collector(Arc::clone(&shared));
        resolver.run(&data(), &metadata()).unwrap();
        assert_eq!(shared.len(), 2);
    }

    #[test]
    fn test_structural_error_aborts_run() {
        let resolver = resolver();
        let metadata = MappingMetadata::default().rule(RuleSpec::MatchToEntity(
            EntityRule::new("missing", "nowhere").output("Id", "x"),
        ));
        assert!(resolver.run(&data(), &metadata).unwrap_err().is_catalog());
    }
}
