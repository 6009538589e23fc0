//! Generic filter-based lookup against a reference entity.
//!
//! The lookup is one left join of the working dataset against a projection
//! of the reference table:
//!
//! - column filters become join keys (compared case-insensitively)
//! - literal filters pre-filter the reference table
//! - requested outputs are renamed to their aliases
//! - the recency column rides along under an internal name and is dropped
//!   once multiple matches have been ranked
//!
//! Failures are detected with whole-frame predicates and window ranking;
//! nothing here walks rows.

use polars::prelude::*;
use tracing::debug;

use crate::error::{ResolveResult, RuleError};
use crate::failure::{FailureCause, FailureContext, Stage, ValidationKind};
use crate::rule::{conditions_expr, EntityRule, FilterSource, FoundMultiple, FoundNone};
use crate::table::{column_names, literal_text, lower_text, parse_instant, text_lit};

use super::MatchContext;

const ROW_INDEX: &str = "__row_index";
const CANDIDATE_INDEX: &str = "__candidate_index";
const RECENCY: &str = "__recency";
const RECENCY_AT: &str = "__recency_at";
const ROW_NUM: &str = "__row_num";
const MATCH_COUNT: &str = "__match_count";
const ALL_ROWS_KEY: &str = "__match_all";

pub(crate) fn no_match_message(entity: &str) -> String {
    format!(
        "No matching record can be found in the {entity} table in the SCRM that match this row. \
         Create a matching row and resubmit"
    )
}

pub(crate) fn multiple_match_message(entity: &str) -> String {
    format!(
        "Multiple matching records in {entity} were returned for this row. \
         Fix the duplicated rows in the SCRM and resubmit."
    )
}

/// Reference rows prepared for the join.
struct Lookup {
    frame: DataFrame,
    /// Key expressions evaluated on the working dataset, aligned with
    /// `key_names`.
    source_keys: Vec<Expr>,
    key_names: Vec<String>,
    /// Source columns compared against the reference, in filter order.
    source_columns: Vec<String>,
}

/// Recency as a sortable integer: parsed instants for text, the raw
/// physical value for temporal and numeric columns.
fn recency_instants(recency: &Column) -> PolarsResult<Series> {
    let series = recency.as_materialized_series();
    let instants = if series.dtype() == &DataType::String {
        series
            .str()?
            .into_iter()
            .map(|raw| raw.and_then(parse_instant))
            .collect::<Int64Chunked>()
            .into_series()
    } else {
        series.cast(&DataType::Int64)?
    };
    Ok(instants.with_name(RECENCY_AT.into()))
}

fn build_lookup(ctx: &MatchContext<'_>, reference: DataFrame, rule: &EntityRule) -> ResolveResult<Lookup> {
    let mut literal_filters = Vec::new();
    let mut projection = Vec::with_capacity(rule.match_filters.len() + rule.output_columns.len() + 2);
    let mut source_keys = Vec::new();
    let mut key_names = Vec::new();
    let mut source_columns = Vec::new();
    for filter in &rule.match_filters {
        match filter.source(&rule.rule_name)? {
            FilterSource::Column(source) => {
                let key = format!("__match_key_{}", key_names.len());
                projection.push(lower_text(col(filter.filter_on.as_str())).alias(key.as_str()));
                source_keys.push(lower_text(col(source)).alias(key.as_str()));
                source_columns.push(source.to_string());
                key_names.push(key);
            }
            FilterSource::Value(value) => literal_filters.push(
                lower_text(col(filter.filter_on.as_str()))
                    .eq(text_lit(literal_text(value).map(|text| text.to_lowercase()))),
            ),
        }
    }
    if key_names.is_empty() {
        // Literal-only rules pair every row with every remaining candidate.
        projection.push(lit(true).alias(ALL_ROWS_KEY));
        source_keys.push(lit(true).alias(ALL_ROWS_KEY));
        key_names.push(ALL_ROWS_KEY.to_string());
    }
    for output in &rule.output_columns {
        projection.push(col(output.reference_column.as_str()).alias(output.output.as_str()));
    }

    let recency_column = ctx.config.schema.recency_column.as_str();
    if reference.get_column_index(recency_column).is_some() {
        projection.push(col(recency_column).alias(RECENCY));
    } else {
        debug!(
            entity = %rule.entity,
            column = %recency_column,
            "reference table has no recency column; ties keep table order"
        );
        projection.push(lit(NULL).cast(DataType::String).alias(RECENCY));
    }
    projection.push(col(CANDIDATE_INDEX));

    let mut candidates = reference.lazy().with_row_index(CANDIDATE_INDEX, None);
    if let Some(predicate) = literal_filters.into_iter().reduce(|l, r| l.and(r)) {
        candidates = candidates.filter(predicate);
    }
    let mut frame = candidates.select(projection).collect()?;
    let instants = recency_instants(frame.column(RECENCY)?)?;
    frame.with_column(instants)?;

    Ok(Lookup {
        frame: frame.drop_many([RECENCY]),
        source_keys,
        key_names,
        source_columns,
    })
}

/// Resolves every row of `frame` against the reference entity named by
/// `rule`, appending the rule's output columns.
///
/// Afterwards each row identity appears exactly once. Rows that break a
/// `fail_row` policy are recorded in the context's collector under
/// `validation` and stay in the returned frame.
///
/// # Errors
///
/// Returns an error when the reference table or a named column does not
/// exist, when the identity column is missing, or when the rule has no
/// output columns.
pub fn match_to_entity(
    ctx: &MatchContext<'_>,
    frame: &DataFrame,
    rule: &EntityRule,
    validation: ValidationKind,
) -> ResolveResult<DataFrame> {
    frame.column(ctx.id_column)?;
    if rule.output_columns.is_empty() {
        return Err(RuleError::MissingField {
            rule: rule.rule_name.clone(),
            field: "output_columns".to_string(),
        }
        .into());
    }

    let verbose = ctx.verbose();
    let found_none = rule.behaviour.found_none(&rule.rule_name, verbose);
    let found_multiple = rule.behaviour.found_multiple(&rule.rule_name, verbose);

    let reference = ctx.reference_table(&rule.entity)?;
    let lookup = build_lookup(ctx, reference, rule)?;

    // Output aliases replace same-named columns of the working dataset.
    let outputs: Vec<&str> = rule.output_columns.iter().map(|o| o.output.as_str()).collect();
    let mut working: Vec<Expr> = column_names(frame)
        .iter()
        .filter(|name| !outputs.contains(&name.as_str()))
        .map(|name| col(name.as_str()))
        .collect();
    working.push(col(ROW_INDEX));
    working.extend(lookup.key_names.iter().map(|key| col(key.as_str())));
    let keys: Vec<Expr> = lookup.key_names.iter().map(|key| col(key.as_str())).collect();

    // Rank candidates per identity and keep rank 1. Descending order puts
    // missing recency last, ascending puts it first.
    let keeps_newest = found_multiple.keeps_newest();
    let recency_rank = if keeps_newest {
        lit(0i64) - col(RECENCY_AT)
    } else {
        col(RECENCY_AT)
    };
    let id = || col(ctx.id_column);
    let ranked = frame
        .clone()
        .lazy()
        .with_row_index(ROW_INDEX, None)
        .with_columns(lookup.source_keys)
        .select(working)
        .join(lookup.frame.lazy(), keys.clone(), keys, JoinArgs::new(JoinType::Left))
        .with_column(len().over([id()]).alias(MATCH_COUNT))
        .sort_by_exprs(
            [recency_rank, col(CANDIDATE_INDEX)],
            SortMultipleOptions::default()
                .with_nulls_last(keeps_newest)
                .with_maintain_order(true),
        )
        .with_column(id().cum_count(false).over([id()]).alias(ROW_NUM))
        .filter(col(ROW_NUM).eq(lit(1)))
        .sort_by_exprs([col(ROW_INDEX)], SortMultipleOptions::default())
        .collect()?;

    let mut snapshot: Vec<&str> = vec![ctx.id_column];
    snapshot.extend(lookup.source_columns.iter().map(String::as_str));
    snapshot.extend(outputs.iter().copied());
    snapshot.extend(rule.conditions.iter().map(|c| c.column.as_str()));

    let ambiguous = ranked
        .clone()
        .lazy()
        .filter(col(MATCH_COUNT).gt(lit(1)))
        .collect()?;
    if found_multiple == FoundMultiple::FailRow {
        let message = rule
            .custom_error
            .clone()
            .unwrap_or_else(|| multiple_match_message(&rule.entity));
        ctx.errors.log_failed_rows(
            &ambiguous,
            ctx.id_column,
            &FailureContext {
                validation,
                rule_name: &rule.rule_name,
                stage: Stage::Matching,
                cause: FailureCause::MultipleMatch,
                error_message: &message,
            },
            &snapshot,
        )?;
    }

    let mut internal = vec![ROW_INDEX, CANDIDATE_INDEX, RECENCY_AT, MATCH_COUNT, ROW_NUM];
    internal.extend(lookup.key_names.iter().map(String::as_str));
    let resolved = ranked.drop_many(internal);

    // No match: every output null while every compared source value is set.
    let mut unmatched_rows = 0;
    if found_none == FoundNone::FailRow {
        let mut guards: Vec<Expr> = outputs.iter().map(|output| col(*output).is_null()).collect();
        guards.extend(
            lookup
                .source_columns
                .iter()
                .map(|source| col(source.as_str()).is_not_null()),
        );
        if !rule.validate_null {
            if let Some(last) = lookup.source_columns.last() {
                guards.push(col(last.as_str()).is_not_null());
            }
        }
        if let Some(conditions) = conditions_expr(&rule.conditions, &rule.rule_name, verbose) {
            guards.push(conditions);
        }

        if let Some(predicate) = guards.into_iter().reduce(|l, r| l.and(r)) {
            let unmatched = resolved.clone().lazy().filter(predicate).collect()?;
            let message = rule
                .custom_error
                .clone()
                .unwrap_or_else(|| no_match_message(&rule.entity));
            unmatched_rows = ctx.errors.log_failed_rows(
                &unmatched,
                ctx.id_column,
                &FailureContext {
                    validation,
                    rule_name: &rule.rule_name,
                    stage: Stage::Matching,
                    cause: FailureCause::NoMatch,
                    error_message: &message,
                },
                &snapshot,
            )?;
        }
    }

    debug!(
        rule = %rule.rule_name,
        entity = %rule.entity,
        rows = resolved.height(),
        ambiguous = ambiguous.height(),
        unmatched = unmatched_rows,
        "entity match complete"
    );

    Ok(resolved)
}
