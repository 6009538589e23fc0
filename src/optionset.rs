//! Label to code translation against optionset metadata.
//!
//! The (entity, optionset) slice of the optionset table is loaded once per
//! rule and turned into a lowercase label to code mapping frame, which is
//! left-joined onto the working dataset.

use polars::prelude::*;
use tracing::debug;

use crate::error::ResolveResult;
use crate::failure::{FailureCause, FailureContext, Stage, ValidationKind};
use crate::matcher::MatchContext;
use crate::rule::{FoundNone, OptionSetRule};
use crate::table::{column_names, lower_text};

const ROW_INDEX: &str = "__row_index";
const LABEL_KEY: &str = "__label_key";
const SOURCE_KEY: &str = "__source_key";

fn no_match_message(rule: &OptionSetRule) -> String {
    format!(
        "The value in '{}' does not match an option in the optionset '{}' in entity '{}'.",
        rule.source_column, rule.optionset_name, rule.entity_name
    )
}

/// Loads the label to code mapping for one optionset.
///
/// The result has a lowercase label key column and the code under the
/// rule's output name. When a label appears more than once the first option
/// in table order wins.
///
/// # Errors
///
/// Returns an error when the optionset table or one of its columns is
/// missing.
pub fn load_options(ctx: &MatchContext<'_>, rule: &OptionSetRule) -> ResolveResult<DataFrame> {
    let schema = &ctx.config.schema.optionset;
    let table = ctx.reference_table(&schema.table)?;

    let mapping = table
        .lazy()
        .filter(
            col(schema.entity_column.as_str())
                .eq(lit(rule.entity_name.as_str()))
                .and(col(schema.name_column.as_str()).eq(lit(rule.optionset_name.as_str()))),
        )
        .select([
            lower_text(col(schema.label_column.as_str())).alias(LABEL_KEY),
            col(schema.value_column.as_str()).alias(rule.output_column.as_str()),
        ])
        .filter(col(LABEL_KEY).is_not_null())
        .group_by_stable([col(LABEL_KEY)])
        .agg([col(rule.output_column.as_str()).first()])
        .collect()?;
    Ok(mapping)
}

/// Writes the code for each row's label into the rule's output column.
///
/// Matching is case-insensitive. An existing output column is replaced, so
/// applying the same rule twice yields the same values. Rows with a label but
/// no matching option are recorded under `fail_row`.
///
/// # Errors
///
/// Returns an error when the identity or source column is missing, or when
/// the options cannot be loaded.
pub fn match_to_optionset(
    ctx: &MatchContext<'_>,
    frame: &DataFrame,
    rule: &OptionSetRule,
) -> ResolveResult<DataFrame> {
    frame.column(ctx.id_column)?;
    let found_none = rule.behaviour.found_none(&rule.rule_name, ctx.verbose());

    let mapping = load_options(ctx, rule)?;
    let options = mapping.height();

    let mut working: Vec<Expr> = column_names(frame)
        .iter()
        .filter(|name| **name != rule.output_column)
        .map(|name| col(name.as_str()))
        .collect();
    working.extend([col(ROW_INDEX), col(SOURCE_KEY)]);

    let joined = frame
        .clone()
        .lazy()
        .with_row_index(ROW_INDEX, None)
        .with_column(lower_text(col(rule.source_column.as_str())).alias(SOURCE_KEY))
        .select(working)
        .join(
            mapping.lazy(),
            [col(SOURCE_KEY)],
            [col(LABEL_KEY)],
            JoinArgs::new(JoinType::Left),
        )
        .sort_by_exprs([col(ROW_INDEX)], SortMultipleOptions::default())
        .collect()?;

    let mut unmatched_rows = 0;
    if found_none == FoundNone::FailRow {
        let unmatched = joined
            .clone()
            .lazy()
            .filter(
                col(SOURCE_KEY)
                    .is_not_null()
                    .and(col(rule.output_column.as_str()).is_null()),
            )
            .collect()?;
        let message = rule
            .custom_error
            .clone()
            .unwrap_or_else(|| no_match_message(rule));
        unmatched_rows = ctx.errors.log_failed_rows(
            &unmatched,
            ctx.id_column,
            &FailureContext {
                validation: ValidationKind::MatchToOptionset,
                rule_name: &rule.rule_name,
                stage: Stage::RowProcessing,
                cause: FailureCause::NoMatch,
                error_message: &message,
            },
            &[ctx.id_column, rule.source_column.as_str(), rule.output_column.as_str()],
        )?;
    }

    debug!(
        rule = %rule.rule_name,
        optionset = %rule.optionset_name,
        options,
        unmatched = unmatched_rows,
        "optionset resolved"
    );

    Ok(joined.drop_many([ROW_INDEX, SOURCE_KEY, LABEL_KEY]))
}
