//! Name lookups scoped to a parent type or an optionset group.

use polars::prelude::DataFrame;

use crate::error::ResolveResult;
use crate::failure::ValidationKind;
use crate::rule::{Behaviour, EntityRule, FoundMultiple, FoundNone, MatchFilter, TypeRule, TypeScope};

use super::{match_to_entity, MatchContext};

/// Expands a [`TypeRule`] into the equivalent entity lookup.
///
/// The scope is a literal filter, the type name a column filter, and the
/// single output is the type id. Ambiguous names resolve to the oldest type.
///
/// # Errors
///
/// Returns [`RuleError::InvalidTypeScope`](crate::error::RuleError) unless
/// exactly one scope is set.
pub fn entity_rule_for(ctx: &MatchContext<'_>, rule: &TypeRule) -> ResolveResult<EntityRule> {
    let columns = &ctx.config.schema.typed_entity;
    let scope_filter = match rule.scope()? {
        TypeScope::Parent(id) => MatchFilter::value(columns.parent_column.as_str(), id),
        TypeScope::Group(id) => MatchFilter::value(columns.group_column.as_str(), id),
    };

    Ok(EntityRule {
        rule_name: rule.rule_name.clone(),
        entity: rule.entity.clone(),
        match_filters: vec![
            scope_filter,
            MatchFilter::column(columns.name_column.as_str(), rule.column.as_str()),
        ],
        output_columns: Vec::new(),
        behaviour: Behaviour::new(FoundNone::FailRow, FoundMultiple::Any),
        conditions: rule.conditions.clone(),
        validate_null: false,
        custom_error: rule.custom_error.clone(),
    }
    .output(columns.type_id_column.as_str(), rule.output.as_str()))
}

/// Resolves a type name column to type ids, recording failures as
/// `Match to Type`.
///
/// # Errors
///
/// Returns the same structural errors as [`match_to_entity`].
pub fn match_to_type(ctx: &MatchContext<'_>, frame: &DataFrame, rule: &TypeRule) -> ResolveResult<DataFrame> {
    let entity_rule = entity_rule_for(ctx, rule)?;
    match_to_entity(ctx, frame, &entity_rule, ValidationKind::MatchToType)
}
