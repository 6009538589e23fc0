//! Row-level failure records and the collector that accumulates them.
//!
//! A failed match never halts the batch. Each resolution step hands the
//! rows that broke a `fail_row` policy to the [`ErrorCollector`], which turns
//! them into attributable [`FailureRecord`]s. The rows stay in the working
//! dataset; removing them is a separate, explicit step
//! ([`ErrorCollector::exclude_failed`]).

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::table::{json_cell, text_values};

/// The resolution step that produced a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationKind {
    /// Foreign-key lookup against a reference entity.
    MatchToEntity,
    /// Label to code translation.
    MatchToOptionset,
    /// Type-name lookup in the type registry.
    MatchToType,
    /// Polymorphic external-reference resolution.
    MatchToExternalReference,
}

impl fmt::Display for ValidationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MatchToEntity => write!(f, "Match to Entity"),
            Self::MatchToOptionset => write!(f, "Match to Optionset"),
            Self::MatchToType => write!(f, "Match to Type"),
            Self::MatchToExternalReference => write!(f, "Match to External Reference"),
        }
    }
}

/// Pipeline stage a failure was raised in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Raised while matching against reference data.
    Matching,
    /// Raised while translating row values.
    RowProcessing,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Matching => write!(f, "matching"),
            Self::RowProcessing => write!(f, "row processing"),
        }
    }
}

/// Why a row failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCause {
    /// No candidate matched the row.
    NoMatch,
    /// More than one candidate matched the row.
    MultipleMatch,
}

/// One structured, attributable row failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Step that raised the failure.
    pub validation: ValidationKind,
    /// Rule name from the mapping metadata.
    pub rule_name: String,
    /// Pipeline stage.
    pub stage: Stage,
    /// Failure kind.
    pub cause: FailureCause,
    /// Custom or standard message.
    pub error_message: String,
    /// Identity of the originating row.
    pub row_id: String,
    /// Values of the columns relevant to the rule, as seen when it failed.
    pub snapshot: BTreeMap<String, JsonValue>,
    /// When the record was written.
    pub recorded_at: DateTime<Utc>,
}

/// Attribution shared by every row in one batch of failures.
#[derive(Debug, Clone)]
pub struct FailureContext<'a> {
    /// Step that raised the failures.
    pub validation: ValidationKind,
    /// Rule name.
    pub rule_name: &'a str,
    /// Pipeline stage.
    pub stage: Stage,
    /// Failure kind.
    pub cause: FailureCause,
    /// Message copied into every record.
    pub error_message: &'a str,
}

/// Append-only accumulator of failure records.
///
/// Safe to share between threads; concurrent appends never lose records.
#[derive(Debug, Default)]
pub struct ErrorCollector {
    records: Mutex<Vec<FailureRecord>>,
}

impl ErrorCollector {
    /// Create a new empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> MutexGuard<'_, Vec<FailureRecord>> {
        // A panicked writer can only have pushed whole records.
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records one failure per row of `failed`.
    ///
    /// `snapshot_columns` selects the columns copied into each record; when
    /// it is empty every column is copied. Returns the number of records
    /// written.
    ///
    /// # Errors
    ///
    /// Returns `ColumnNotFound` when `failed` has no `id_column`.
    pub fn log_failed_rows(
        &self,
        failed: &DataFrame,
        id_column: &str,
        context: &FailureContext<'_>,
        snapshot_columns: &[&str],
    ) -> PolarsResult<usize> {
        let ids = text_values(failed, id_column)?;
        if ids.is_empty() {
            return Ok(0);
        }

        let columns: Vec<&Column> = if snapshot_columns.is_empty() {
            failed.get_columns().iter().collect()
        } else {
            let mut seen = HashSet::new();
            snapshot_columns
                .iter()
                .filter(|name| seen.insert(**name))
                .filter_map(|name| failed.column(name).ok())
                .collect()
        };

        let now = Utc::now();
        let mut batch = Vec::with_capacity(ids.len());
        for (row, id) in ids.into_iter().enumerate() {
            let snapshot = columns
                .iter()
                .map(|column| {
                    let cell = column.as_materialized_series().get(row)?;
                    Ok((column.name().to_string(), json_cell(&cell)))
                })
                .collect::<PolarsResult<BTreeMap<_, _>>>()?;
            batch.push(FailureRecord {
                validation: context.validation,
                rule_name: context.rule_name.to_string(),
                stage: context.stage,
                cause: context.cause,
                error_message: context.error_message.to_string(),
                row_id: id.unwrap_or_default(),
                snapshot,
                recorded_at: now,
            });
        }

        let written = batch.len();
        self.guard().extend(batch);
        Ok(written)
    }

    /// Snapshot of all records collected so far.
    #[must_use]
    pub fn records(&self) -> Vec<FailureRecord> {
        self.guard().clone()
    }

    /// Number of records collected so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.guard().len()
    }

    /// Returns true if nothing has failed yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.guard().is_empty()
    }

    /// Distinct row identities that have at least one failure.
    #[must_use]
    pub fn failed_row_ids(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.guard()
            .iter()
            .filter(|r| seen.insert(r.row_id.clone()))
            .map(|r| r.row_id.clone())
            .collect()
    }

    /// Removes every row of `frame` whose identity has a failure record.
    ///
    /// # Errors
    ///
    /// Returns `ColumnNotFound` when `frame` has no `id_column`.
    pub fn exclude_failed(&self, frame: &DataFrame, id_column: &str) -> PolarsResult<DataFrame> {
        let failed = self.failed_row_ids();
        if failed.is_empty() {
            return Ok(frame.clone());
        }
        let failed = Series::new(PlSmallStr::from_static("failed_row_ids"), failed);
        frame
            .clone()
            .lazy()
            .filter(
                col(id_column)
                    .cast(DataType::String)
                    .is_in(lit(failed))
                    .fill_null(lit(false))
                    .not(),
            )
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn failed_rows() -> DataFrame {
        df!(
            "row_id" => ["r1", "r2"],
            "name" => ["Ada", "Alan"],
            "noise" => [1i64, 2],
        )
        .unwrap()
    }

    fn context() -> FailureContext<'static> {
        FailureContext {
            validation: ValidationKind::MatchToEntity,
            rule_name: "contact_lookup",
            stage: Stage::Matching,
            cause: FailureCause::NoMatch,
            error_message: "no contact",
        }
    }

    #[test]
    fn test_display_names() {
        assert_eq!(ValidationKind::MatchToOptionset.to_string(), "Match to Optionset");
        assert_eq!(Stage::RowProcessing.to_string(), "row processing");
    }

    #[test]
    fn test_log_failed_rows_one_record_per_row() {
        let collector = ErrorCollector::new();
        let n = collector
            .log_failed_rows(&failed_rows(), "row_id", &context(), &["name", "name"])
            .unwrap();
        assert_eq!(n, 2);

        let records = collector.records();
        assert_eq!(records[0].row_id, "r1");
        assert_eq!(records[0].rule_name, "contact_lookup");
        assert_eq!(records[0].snapshot.len(), 1);
        assert_eq!(records[0].snapshot["name"], JsonValue::from("Ada"));
    }

    #[test]
    fn test_empty_snapshot_list_copies_all_columns() {
        let collector = ErrorCollector::new();
        collector
            .log_failed_rows(&failed_rows(), "row_id", &context(), &[])
            .unwrap();
        let snapshot = &collector.records()[1].snapshot;
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot["noise"], JsonValue::from(2));
    }

    #[test]
    fn test_missing_id_column_is_error() {
        let collector = ErrorCollector::new();
        let err = collector
            .log_failed_rows(&failed_rows(), "nope", &context(), &[])
            .unwrap_err();
        assert!(matches!(err, PolarsError::ColumnNotFound(_)));
    }

    #[test]
    fn test_exclude_failed_removes_rows_by_identity() {
        let collector = ErrorCollector::new();
        let only_r1 = failed_rows()
            .lazy()
            .filter(col("row_id").eq(lit("r1")))
            .collect()
            .unwrap();
        collector
            .log_failed_rows(&only_r1, "row_id", &context(), &[])
            .unwrap();

        let kept = collector.exclude_failed(&failed_rows(), "row_id").unwrap();
        assert_eq!(
            text_values(&kept, "row_id").unwrap(),
            vec![Some("r2".to_string())]
        );
    }

    #[test]
    fn test_exclude_failed_keeps_rows_without_identity() {
        let collector = ErrorCollector::new();
        collector
            .log_failed_rows(&failed_rows(), "row_id", &context(), &[])
            .unwrap();

        let frame = df!("row_id" => [Some("r1"), None]).unwrap();
        let kept = collector.exclude_failed(&frame, "row_id").unwrap();
        assert_eq!(kept.height(), 1);
    }

    #[test]
    fn test_concurrent_appends_are_not_lost() {
        let collector = Arc::new(ErrorCollector::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let collector = Arc::clone(&collector);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        collector
                            .log_failed_rows(&failed_rows(), "row_id", &context(), &[])
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(collector.len(), 8 * 50 * 2);
        assert_eq!(collector.failed_row_ids().len(), 2);
    }
}
