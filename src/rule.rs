//! Declarative rule metadata.
//!
//! Each rule describes one resolution step. Rules are plain data
//! (deserialised from JSON metadata or assembled with the builder methods)
//! and are interpreted by the resolvers. Unknown behaviour keywords and
//! comparison operators are not errors: they fall back to `fail_row` or are
//! ignored, with a warning.

use polars::prelude::{col, DataType, Expr};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::error::RuleError;
use crate::failure::ValidationKind;
use crate::table::{literal_text, text_lit};

/// Default name of the engine-assigned identity column.
pub const DEFAULT_ID_COLUMN: &str = "row_id";

fn default_id_column() -> String {
    DEFAULT_ID_COLUMN.to_string()
}

/// Reports a configuration anomaly that was normalised to a default.
pub(crate) fn config_warning(verbose: bool, rule_name: &str, message: &str) {
    if verbose {
        warn!(rule = rule_name, "{message}");
    } else {
        debug!(rule = rule_name, "{message}");
    }
}

/// Outcome when a lookup finds no candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FoundNone {
    /// Record a failure for the row.
    #[default]
    FailRow,
    /// Leave the outputs null and record nothing.
    ReturnNull,
}

impl FoundNone {
    /// Parses a behaviour keyword.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "fail_row" => Some(Self::FailRow),
            "return_null" => Some(Self::ReturnNull),
            _ => None,
        }
    }

    /// Metadata keyword.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::FailRow => "fail_row",
            Self::ReturnNull => "return_null",
        }
    }
}

/// Outcome when a lookup finds more than one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FoundMultiple {
    /// Keep the newest candidate and record a failure.
    #[default]
    FailRow,
    /// Keep the earliest candidate by recency.
    Oldest,
    /// Keep the latest candidate by recency.
    Newest,
    /// Deterministic: behaves exactly like `Oldest`.
    Any,
}

impl FoundMultiple {
    /// Parses a behaviour keyword.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "fail_row" => Some(Self::FailRow),
            "oldest" => Some(Self::Oldest),
            "newest" => Some(Self::Newest),
            "any" => Some(Self::Any),
            _ => None,
        }
    }

    /// Metadata keyword.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::FailRow => "fail_row",
            Self::Oldest => "oldest",
            Self::Newest => "newest",
            Self::Any => "any",
        }
    }

    /// Whether the surviving candidate is the most recent one.
    #[must_use]
    pub const fn keeps_newest(&self) -> bool {
        matches!(self, Self::Newest | Self::FailRow)
    }
}

/// Raw behaviour keywords as written in metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Behaviour {
    /// Keyword for the no-match policy.
    #[serde(default)]
    pub found_none_behaviour: Option<String>,
    /// Keyword for the multiple-match policy.
    #[serde(default)]
    pub found_multiple_behaviour: Option<String>,
}

impl Behaviour {
    /// Behaviour spelled from typed policies.
    #[must_use]
    pub fn new(found_none: FoundNone, found_multiple: FoundMultiple) -> Self {
        Self {
            found_none_behaviour: Some(found_none.as_str().to_string()),
            found_multiple_behaviour: Some(found_multiple.as_str().to_string()),
        }
    }

    /// Normalised found-none policy; unknown or missing keywords become
    /// `fail_row`.
    /// Sets the found-none policy.
    #[must_use]
    pub fn found_none(&self, rule_name: &str, verbose: bool) -> FoundNone {
        match self.found_none_behaviour.as_deref() {
            None => FoundNone::default(),
            Some(raw) => FoundNone::parse(raw).unwrap_or_else(|| {
                config_warning(
                    verbose,
                    rule_name,
                    &format!("Received unexpected found_none_behaviour '{raw}', using fail_row"),
                );
                FoundNone::default()
            }),
        }
    }

    /// Normalised found-multiple policy; unknown or missing keywords become
    /// `fail_row`.
    #[must_use]
    pub fn found_multiple(&self, rule_name: &str, verbose: bool) -> FoundMultiple {
        match self.found_multiple_behaviour.as_deref() {
            None => FoundMultiple::default(),
            Some(raw) => FoundMultiple::parse(raw).unwrap_or_else(|| {
                config_warning(
                    verbose,
                    rule_name,
                    &format!("Received unexpected found_multiple_behaviour '{raw}', using fail_row"),
                );
                FoundMultiple::default()
            }),
        }
    }
}

/// Where the left-hand side of a filter predicate comes from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FilterSource<'a> {
    /// A column of the working dataset.
    Column(&'a str),
    /// A literal value.
    Value(&'a JsonValue),
}

/// One conjunct of a match: `<source> = reference.<filter_on>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchFilter {
    /// Column of the reference entity.
    pub filter_on: String,
    /// Source column compared with `filter_on`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_by_column: Option<String>,
    /// Literal compared with `filter_on` when no column is given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_by_value: Option<JsonValue>,
}

impl MatchFilter {
    /// `source_column = reference.filter_on`
    #[must_use]
    pub fn column(filter_on: impl Into<String>, source_column: impl Into<String>) -> Self {
        Self {
            filter_on: filter_on.into(),
            filter_by_column: Some(source_column.into()),
            filter_by_value: None,
        }
    }

    /// `value = reference.filter_on`
    #[must_use]
    pub fn value(filter_on: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Self {
            filter_on: filter_on.into(),
            filter_by_column: None,
            filter_by_value: Some(value.into()),
        }
    }

    /// Resolves the left-hand side. A column takes precedence over a value.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::MissingField`] when neither side is set.
    pub fn source(&self, rule_name: &str) -> Result<FilterSource<'_>, RuleError> {
        match (&self.filter_by_column, &self.filter_by_value) {
            (Some(column), _) => Ok(FilterSource::Column(column)),
            (None, Some(value)) => Ok(FilterSource::Value(value)),
            (None, None) => Err(RuleError::MissingField {
                rule: rule_name.to_string(),
                field: format!("filter_by_column or filter_by_value for '{}'", self.filter_on),
            }),
        }
    }
}

/// A reference column to copy into the working dataset under an alias.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputColumn {
    /// Column read from the reference entity.
    #[serde(alias = "column_name_in_scrm")]
    pub reference_column: String,
    /// Column written to the working dataset.
    pub output: String,
}

impl OutputColumn {
    /// `reference_column` copied as `output`.
    #[must_use]
    pub fn new(reference_column: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            reference_column: reference_column.into(),
            output: output.into(),
        }
    }
}

/// Supported condition operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    /// Column equals the value.
    Eq,
    /// Column differs from the value or is null.
    Ne,
}

impl Comparison {
    /// Parses an operator keyword; `None` when unsupported.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "eq" => Some(Self::Eq),
            "ne" => Some(Self::Ne),
            _ => None,
        }
    }
}

/// A validity condition gating no-match failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Column of the working dataset.
    pub column: String,
    /// Operator keyword (`eq` or `ne`).
    pub comparison: String,
    /// Literal compared against, by string form.
    #[serde(default)]
    pub value: JsonValue,
}

impl Condition {
    /// Condition `column <comparison> value`.
    #[must_use]
    pub fn new(column: impl Into<String>, comparison: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        Self {
            column: column.into(),
            comparison: comparison.into(),
            value: value.into(),
        }
    }

    /// The condition as a predicate, or `None` for an unsupported operator.
    ///
    /// Values compare by their string form. `ne` also holds when the
    /// column is null.
    #[must_use]
    pub fn to_expr(&self) -> Option<Expr> {
        let column = || col(self.column.as_str());
        let value = text_lit(literal_text(&self.value));
        match Comparison::parse(&self.comparison)? {
            Comparison::Eq => Some(column().cast(DataType::String).eq(value)),
            Comparison::Ne => Some(
                column()
                    .cast(DataType::String)
                    .neq(value)
                    .or(column().is_null()),
            ),
        }
    }
}

/// Folds conditions into one predicate, warning about and skipping
/// unsupported operators.
pub(crate) fn conditions_expr(conditions: &[Condition], rule_name: &str, verbose: bool) -> Option<Expr> {
    conditions
        .iter()
        .filter_map(|c| {
            let expr = c.to_expr();
            if expr.is_none() {
                config_warning(
                    verbose,
                    rule_name,
                    &format!("Unsupported comparison operator: {} in {rule_name}", c.comparison),
                );
            }
            expr
        })
        .reduce(|l, r| l.and(r))
}

/// Generic entity lookup rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRule {
    /// Rule name, copied into failure records.
    pub rule_name: String,
    /// Reference entity (unqualified table name).
    pub entity: String,
    /// Conjunctive lookup predicates.
    #[serde(default)]
    pub match_filters: Vec<MatchFilter>,
    /// Reference columns copied into the dataset.
    #[serde(default)]
    pub output_columns: Vec<OutputColumn>,
    /// None/multiple-match policies.
    #[serde(default)]
    pub behaviour: Behaviour,
    /// Every condition must hold for a no-match failure to be recorded.
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// When false, a null last comparison column suppresses the failure.
    #[serde(default)]
    pub validate_null: bool,
    /// Message used instead of the standard one.
    #[serde(default)]
    pub custom_error: Option<String>,
}

impl EntityRule {
    /// Rule with no filters or outputs yet.
    #[must_use]
    pub fn new(rule_name: impl Into<String>, entity: impl Into<String>) -> Self {
        Self {
            rule_name: rule_name.into(),
            entity: entity.into(),
            match_filters: Vec::new(),
            output_columns: Vec::new(),
            behaviour: Behaviour::default(),
            conditions: Vec::new(),
            validate_null: false,
            custom_error: None,
        }
    }

    /// Adds a lookup predicate.
    #[must_use]
    pub fn filter(mut self, filter: MatchFilter) -> Self {
        self.match_filters.push(filter);
        self
    }

    /// Adds an output column.
    #[must_use]
    pub fn output(mut self, reference_column: impl Into<String>, alias: impl Into<String>) -> Self {
        self.output_columns.push(OutputColumn::new(reference_column, alias));
        self
    }

    /// Sets both match policies.
    #[must_use]
    pub fn behaviour(mut self, found_none: FoundNone, found_multiple: FoundMultiple) -> Self {
        self.behaviour = Behaviour::new(found_none, found_multiple);
        self
    }

    /// Adds a validity condition.
    #[must_use]
    pub fn condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Sets `validate_null`.
    #[must_use]
    pub fn validate_null(mut self, validate_null: bool) -> Self {
        self.validate_null = validate_null;
        self
    }

    /// Replaces the standard failure message.
    #[must_use]
    pub fn custom_error(mut self, message: impl Into<String>) -> Self {
        self.custom_error = Some(message.into());
        self
    }
}

/// Label to code translation rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionSetRule {
    /// Rule name.
    pub rule_name: String,
    /// Entity the optionset belongs to.
    pub entity_name: String,
    /// Optionset name within the entity.
    pub optionset_name: String,
    /// Column holding labels.
    pub source_column: String,
    /// Column receiving codes.
    pub output_column: String,
    /// Only the found-none keyword applies.
    #[serde(default)]
    pub behaviour: Behaviour,
    /// Message used instead of the standard one.
    #[serde(default)]
    pub custom_error: Option<String>,
}

impl OptionSetRule {
    /// Rule translating `source_column` into `output_column`.
    #[must_use]
    pub fn new(
        rule_name: impl Into<String>,
        entity_name: impl Into<String>,
        optionset_name: impl Into<String>,
        source_column: impl Into<String>,
        output_column: impl Into<String>,
    ) -> Self {
        Self {
            rule_name: rule_name.into(),
            entity_name: entity_name.into(),
            optionset_name: optionset_name.into(),
            source_column: source_column.into(),
            output_column: output_column.into(),
            behaviour: Behaviour::default(),
            custom_error: None,
        }
    }

    /// Sets the found-none policy.
    #[must_use]
    pub fn found_none(mut self, found_none: FoundNone) -> Self {
        self.behaviour.found_none_behaviour = Some(found_none.as_str().to_string());
        self
    }

    /// Replaces the standard failure message.
    #[must_use]
    pub fn custom_error(mut self, message: impl Into<String>) -> Self {
        self.custom_error = Some(message.into());
        self
    }
}

/// Scope of a typed-entity lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeScope {
    /// Types under a parent type id.
    Parent(String),
    /// Types in an optionset group.
    Group(String),
}

/// Name-scoped type lookup rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeRule {
    /// Rule name.
    pub rule_name: String,
    /// Type registry entity.
    pub entity: String,
    /// Source column holding the type name.
    pub column: String,
    /// Column receiving the type id.
    pub output: String,
    /// Parent type id scope.
    #[serde(default)]
    pub parent: Option<String>,
    /// Optionset group id scope.
    #[serde(default)]
    pub group: Option<String>,
    /// Validity conditions, as for entity rules.
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Message used instead of the standard one.
    #[serde(default)]
    pub custom_error: Option<String>,
}

impl TypeRule {
    /// Rule looking `column` up within `scope`.
    #[must_use]
    pub fn new(
        rule_name: impl Into<String>,
        entity: impl Into<String>,
        column: impl Into<String>,
        output: impl Into<String>,
        scope: TypeScope,
    ) -> Self {
        let (parent, group) = match scope {
            TypeScope::Parent(id) => (Some(id), None),
            TypeScope::Group(id) => (None, Some(id)),
        };
        Self {
            rule_name: rule_name.into(),
            entity: entity.into(),
            column: column.into(),
            output: output.into(),
            parent,
            group,
            conditions: Vec::new(),
            custom_error: None,
        }
    }

    /// Adds a validity condition.
    #[must_use]
    pub fn condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Replaces the standard failure message.
    #[must_use]
    pub fn custom_error(mut self, message: impl Into<String>) -> Self {
        self.custom_error = Some(message.into());
        self
    }

    /// Exactly one of `parent` / `group` must be set.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::InvalidTypeScope`] otherwise.
    pub fn scope(&self) -> Result<TypeScope, RuleError> {
        let non_empty = |s: &Option<String>| s.as_ref().filter(|v| !v.trim().is_empty()).cloned();
        match (non_empty(&self.parent), non_empty(&self.group)) {
            (Some(parent), None) => Ok(TypeScope::Parent(parent)),
            (None, Some(group)) => Ok(TypeScope::Group(group)),
            _ => Err(RuleError::InvalidTypeScope {
                rule: self.rule_name.clone(),
            }),
        }
    }
}

/// Two-stage polymorphic external-reference rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalReferenceRule {
    /// Rule name.
    pub rule_name: String,
    /// Source column naming the data source.
    pub data_source_column: String,
    /// Fixed data-source detail literal.
    pub data_source_detail: String,
    /// Restricts candidates to one target entity type.
    #[serde(default)]
    pub target_entity: Option<String>,
    /// Column receiving the resolved id.
    pub output_column: String,
    /// Source column holding the external id.
    pub ext_reference_column: String,
    /// Only the found-none keyword applies.
    #[serde(default)]
    pub behaviour: Behaviour,
    /// Message used instead of the generic one.
    #[serde(default)]
    pub custom_error: Option<String>,
}

impl ExternalReferenceRule {
    /// Rule resolving `ext_reference_column` under `data_source_detail`.
    #[must_use]
    pub fn new(
        rule_name: impl Into<String>,
        data_source_column: impl Into<String>,
        data_source_detail: impl Into<String>,
        ext_reference_column: impl Into<String>,
        output_column: impl Into<String>,
    ) -> Self {
        Self {
            rule_name: rule_name.into(),
            data_source_column: data_source_column.into(),
            data_source_detail: data_source_detail.into(),
            target_entity: None,
            output_column: output_column.into(),
            ext_reference_column: ext_reference_column.into(),
            behaviour: Behaviour::default(),
            custom_error: None,
        }
    }

    /// Restricts stage one to a single target type.
    #[must_use]
    pub fn target_entity(mut self, entity: impl Into<String>) -> Self {
        self.target_entity = Some(entity.into());
        self
    }

    /// Sets the found-none policy.
    #[must_use]
    pub fn found_none(mut self, found_none: FoundNone) -> Self {
        self.behaviour.found_none_behaviour = Some(found_none.as_str().to_string());
        self
    }

    /// Replaces the standard failure message.
    #[must_use]
    pub fn custom_error(mut self, message: impl Into<String>) -> Self {
        self.custom_error = Some(message.into());
        self
    }
}

/// One configured resolution step, tagged by its validation kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "validation", rename_all = "snake_case")]
pub enum RuleSpec {
    /// Entity lookup.
    MatchToEntity(EntityRule),
    /// Optionset translation.
    MatchToOptionset(OptionSetRule),
    /// Typed-entity lookup.
    MatchToType(TypeRule),
    /// External-reference resolution.
    MatchToExternalReference(ExternalReferenceRule),
}

impl RuleSpec {
    /// Name of the wrapped rule.
    #[must_use]
    pub fn rule_name(&self) -> &str {
        match self {
            Self::MatchToEntity(r) => &r.rule_name,
            Self::MatchToOptionset(r) => &r.rule_name,
            Self::MatchToType(r) => &r.rule_name,
            Self::MatchToExternalReference(r) => &r.rule_name,
        }
    }

    /// Validation kind reported by the wrapped rule.
    #[must_use]
    pub const fn validation(&self) -> ValidationKind {
        match self {
            Self::MatchToEntity(_) => ValidationKind::MatchToEntity,
            Self::MatchToOptionset(_) => ValidationKind::MatchToOptionset,
            Self::MatchToType(_) => ValidationKind::MatchToType,
            Self::MatchToExternalReference(_) => ValidationKind::MatchToExternalReference,
        }
    }
}

/// Mapping metadata for one dataset: the identity column and the ordered
/// rules to apply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingMetadata {
    /// Identity column assigned before any rule runs.
    #[serde(default = "default_id_column")]
    pub id_column: String,
    /// Rules, applied in order.
    #[serde(default)]
    pub rules: Vec<RuleSpec>,
}

impl Default for MappingMetadata {
    fn default() -> Self {
        Self {
            id_column: default_id_column(),
            rules: Vec::new(),
        }
    }
}

impl MappingMetadata {
    /// Parses metadata from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::InvalidMetadata`] with the parser message.
    pub fn from_json(raw: &str) -> Result<Self, RuleError> {
        serde_json::from_str(raw).map_err(|e| RuleError::InvalidMetadata {
            reason: e.to_string(),
        })
    }

    /// Appends a rule.
    #[must_use]
    pub fn rule(mut self, rule: RuleSpec) -> Self {
        self.rules.push(rule);
        self
    }
}
