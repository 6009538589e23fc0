//! Two-stage resolution of business keys through the external-reference
//! table.
//!
//! Stage 1 maps `(data source, external id)` to a polymorphic target
//! `(entity type, row id)`. Stage 2 discovers which entity types actually
//! occur and, for each one, joins that entity's active rows to confirm the
//! target, coalescing the confirmed id into the output column.

use polars::prelude::*;
use tracing::debug;

use crate::catalog::validate_table_name;
use crate::error::ResolveResult;
use crate::failure::{FailureCause, FailureContext, Stage, ValidationKind};
use crate::matcher::MatchContext;
use crate::rule::{ExternalReferenceRule, FoundNone};
use crate::table::{column_names, lower_text, text_values};

const ROW_INDEX: &str = "__ext_row_index";
const SOURCE_KEY: &str = "__ext_source_key";
const EXTERNAL_KEY: &str = "__ext_external_key";
const LINK_SOURCE: &str = "__ext_link_source";
const LINK_EXTERNAL: &str = "__ext_link_external";
const TARGET_TYPE: &str = "__ext_target_type";
const TARGET_ID: &str = "__ext_target_id";
const CANDIDATE_TYPE: &str = "__ext_candidate_type";
const CANDIDATE_ID: &str = "__ext_candidate_id";
const RESOLVED: &str = "__ext_resolved";

fn no_match_message(rule: &ExternalReferenceRule) -> String {
    format!(
        "No matching External Reference for an active record can be found with data source: {}, \
         data source detail: {} and external reference: {}. \
         Create one or alter the information in those columns to address the error.",
        rule.data_source_column, rule.data_source_detail, rule.ext_reference_column
    )
}

/// Stage 1: attaches lowercased target type and target id columns.
fn attach_targets(
    ctx: &MatchContext<'_>,
    frame: &DataFrame,
    rule: &ExternalReferenceRule,
) -> ResolveResult<DataFrame> {
    let schema = &ctx.config.schema.external_reference;
    let table = ctx.reference_table(&schema.table)?;

    let mut predicate = lower_text(col(schema.data_source_detail_column.as_str()))
        .eq(lit(rule.data_source_detail.to_lowercase()));
    if let Some(target) = &rule.target_entity {
        predicate = predicate.and(
            lower_text(col(schema.target_type_column.as_str())).eq(lit(target.to_lowercase())),
        );
    }

    let links = table
        .lazy()
        .filter(predicate)
        .select([
            lower_text(col(schema.data_source_column.as_str())).alias(LINK_SOURCE),
            lower_text(col(schema.external_id_column.as_str())).alias(LINK_EXTERNAL),
            lower_text(col(schema.target_type_column.as_str())).alias(TARGET_TYPE),
            lower_text(col(schema.target_id_column.as_str())).alias(TARGET_ID),
        ])
        .unique_stable(None, UniqueKeepStrategy::First);

    let mut working: Vec<Expr> = column_names(frame)
        .iter()
        .filter(|name| **name != rule.output_column)
        .map(|name| col(name.as_str()))
        .collect();
    working.extend([col(ROW_INDEX), col(SOURCE_KEY), col(EXTERNAL_KEY)]);

    Ok(frame
        .clone()
        .lazy()
        .with_row_index(ROW_INDEX, None)
        .with_columns([
            lower_text(col(rule.data_source_column.as_str())).alias(SOURCE_KEY),
            lower_text(col(rule.ext_reference_column.as_str())).alias(EXTERNAL_KEY),
        ])
        .select(working)
        .join(
            links,
            [col(SOURCE_KEY), col(EXTERNAL_KEY)],
            [col(LINK_SOURCE), col(LINK_EXTERNAL)],
            JoinArgs::new(JoinType::Left),
        )
        .collect()?)
}

/// Stage 2: confirms targets against each discovered entity's active rows.
///
/// Returns the frame and the names of the per-entity scratch columns.
fn confirm_targets(
    ctx: &MatchContext<'_>,
    linked: DataFrame,
    output: &str,
) -> ResolveResult<(DataFrame, Vec<String>)> {
    let schema = &ctx.config.schema;
    let discovered = linked
        .clone()
        .lazy()
        .select([col(TARGET_TYPE).drop_nulls().unique_stable()])
        .collect()?;
    let entity_types: Vec<String> = text_values(&discovered, TARGET_TYPE)?
        .into_iter()
        .flatten()
        .collect();

    let mut resolved = linked
        .lazy()
        .with_column(lit(NULL).cast(DataType::String).alias(output));
    let mut scratch = Vec::with_capacity(entity_types.len() * 3);
    for (i, entity_type) in entity_types.iter().enumerate() {
        validate_table_name(entity_type)?;
        let entity = ctx.reference_table(entity_type)?;
        let candidate_type = format!("{CANDIDATE_TYPE}_{i}");
        let candidate_id = format!("{CANDIDATE_ID}_{i}");
        let found = format!("{RESOLVED}_{i}");

        let candidates = entity
            .lazy()
            .filter(col(schema.state_column.as_str()).eq(lit(schema.active_state)))
            .select([
                lit(entity_type.as_str()).alias(candidate_type.as_str()),
                lower_text(col(schema.entity_id_column.as_str())).alias(candidate_id.as_str()),
                col(schema.entity_id_column.as_str())
                    .cast(DataType::String)
                    .alias(found.as_str()),
            ])
            .unique_stable(Some(vec![candidate_id.as_str().into()]), UniqueKeepStrategy::First);

        resolved = resolved
            .join(
                candidates,
                [col(TARGET_TYPE), col(TARGET_ID)],
                [col(candidate_type.as_str()), col(candidate_id.as_str())],
                JoinArgs::new(JoinType::Left),
            )
            .with_column(
                when(col(output).is_null())
                    .then(col(found.as_str()))
                    .otherwise(col(output))
                    .alias(output),
            );
        scratch.extend([candidate_type, candidate_id, found]);
    }

    let resolved = resolved
        .sort_by_exprs(
            [col(ROW_INDEX)],
            SortMultipleOptions::default().with_maintain_order(true),
        )
        .collect()?;
    debug!(
        entity_types = ?entity_types,
        "confirmed external reference targets"
    );
    Ok((resolved, scratch))
}

/// Resolves `rule.ext_reference_column` to the id of an active record in
/// whichever entity the external-reference table points at.
///
/// Only the output column is added; the data-source and external-id input
/// columns stay, so several rules can share one data-source column. A key
/// linked to more than one target yields one row per target. Under
/// `fail_row` every row left without a confirmed target is recorded.
///
/// # Errors
///
/// Returns an error when a table or named column is missing, or when a
/// discovered entity type is not a valid table name.
pub fn match_to_external_reference(
    ctx: &MatchContext<'_>,
    frame: &DataFrame,
    rule: &ExternalReferenceRule,
) -> ResolveResult<DataFrame> {
    frame.column(ctx.id_column)?;
    let found_none = rule.behaviour.found_none(&rule.rule_name, ctx.verbose());

    let linked = attach_targets(ctx, frame, rule)?;
    let (resolved, scratch) = confirm_targets(ctx, linked, &rule.output_column)?;

    let mut unmatched_rows = 0;
    if found_none == FoundNone::FailRow {
        let unmatched = resolved
            .clone()
            .lazy()
            .filter(col(rule.output_column.as_str()).is_null())
            .collect()?;
        let message = rule
            .custom_error
            .clone()
            .unwrap_or_else(|| no_match_message(rule));
        unmatched_rows = ctx.errors.log_failed_rows(
            &unmatched,
            ctx.id_column,
            &FailureContext {
                validation: ValidationKind::MatchToExternalReference,
                rule_name: &rule.rule_name,
                stage: Stage::Matching,
                cause: FailureCause::NoMatch,
                error_message: &message,
            },
            &[
                ctx.id_column,
                rule.data_source_column.as_str(),
                rule.ext_reference_column.as_str(),
                rule.output_column.as_str(),
            ],
        )?;
    }

    debug!(
        rule = %rule.rule_name,
        rows = resolved.height(),
        unmatched = unmatched_rows,
        "external reference resolved"
    );

    let mut internal = vec![
        ROW_INDEX,
        SOURCE_KEY,
        EXTERNAL_KEY,
        LINK_SOURCE,
        LINK_EXTERNAL,
        TARGET_TYPE,
        TARGET_ID,
    ];
    internal.extend(scratch.iter().map(String::as_str));
    Ok(resolved.drop_many(internal))
}
