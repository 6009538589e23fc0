//! Glue between JSON records and polars frames.
//!
//! Source extracts and catalog files are arrays of JSON objects; the engine
//! works on [`DataFrame`]s. This module converts between the two and holds
//! the key normalisation every lookup shares: join keys are the lowercased
//! string form of a column, and a null key never matches.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use polars::prelude::*;
use serde_json::{Map, Value as JsonValue};

/// Formats accepted for naive (offset-free) recency values, read as UTC.
const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

/// Case-insensitive join key: the string form of `expr`, lowercased.
#[must_use]
pub fn lower_text(expr: Expr) -> Expr {
    expr.cast(DataType::String).str().to_lowercase()
}

/// String form of a JSON literal; `None` for null.
#[must_use]
pub fn literal_text(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::Null => None,
        JsonValue::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}

/// A string literal, or a string-typed null.
#[must_use]
pub fn text_lit(value: Option<String>) -> Expr {
    value.map_or_else(|| lit(NULL).cast(DataType::String), lit)
}

/// Parse a recency value into microseconds since the epoch.
///
/// RFC 3339 with any offset is normalised to UTC; naive date-times and plain
/// dates are read as UTC. Anything else is `None`.
#[must_use]
pub fn parse_instant(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Some(at.timestamp_micros());
    }
    for format in NAIVE_FORMATS {
        if let Ok(at) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(at.and_utc().timestamp_micros());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|at| at.and_utc().timestamp_micros())
}

/// Build a frame from JSON objects.
///
/// Columns appear in first-seen key order. A column whose non-null cells are
/// all booleans becomes `Boolean`, all integers `Int64`, all numbers
/// `Float64`; anything else is stored as its string form.
///
/// # Errors
///
/// Returns the polars error if the columns cannot form a frame.
pub fn from_json_records(records: &[Map<String, JsonValue>]) -> PolarsResult<DataFrame> {
    let mut names: Vec<&str> = Vec::new();
    for record in records {
        for key in record.keys() {
            if !names.contains(&key.as_str()) {
                names.push(key);
            }
        }
    }

    let columns = names
        .iter()
        .map(|name| {
            let cells: Vec<&JsonValue> = records
                .iter()
                .map(|record| record.get(*name).unwrap_or(&JsonValue::Null))
                .collect();
            Column::from(json_series(name, &cells))
        })
        .collect();
    DataFrame::new(columns)
}

fn json_series(name: &str, cells: &[&JsonValue]) -> Series {
    let name = PlSmallStr::from(name);
    let present: Vec<&&JsonValue> = cells.iter().filter(|cell| !cell.is_null()).collect();

    if !present.is_empty() && present.iter().all(|cell| cell.is_boolean()) {
        let values: Vec<Option<bool>> = cells.iter().map(|cell| cell.as_bool()).collect();
        Series::new(name, values)
    } else if !present.is_empty() && present.iter().all(|cell| cell.is_i64()) {
        let values: Vec<Option<i64>> = cells.iter().map(|cell| cell.as_i64()).collect();
        Series::new(name, values)
    } else if !present.is_empty() && present.iter().all(|cell| cell.is_number()) {
        let values: Vec<Option<f64>> = cells.iter().map(|cell| cell.as_f64()).collect();
        Series::new(name, values)
    } else {
        let values: Vec<Option<String>> = cells.iter().map(|cell| literal_text(cell)).collect();
        Series::new(name, values)
    }
}

/// Render a frame as JSON objects, one per row.
///
/// # Errors
///
/// Returns the polars error if a cell cannot be read.
pub fn to_json_records(frame: &DataFrame) -> PolarsResult<Vec<Map<String, JsonValue>>> {
    let columns = frame.get_columns();
    (0..frame.height())
        .map(|row| {
            columns
                .iter()
                .map(|column| {
                    let cell = column.as_materialized_series().get(row)?;
                    Ok((column.name().to_string(), json_cell(&cell)))
                })
                .collect()
        })
        .collect()
}

/// JSON form of one cell.
#[must_use]
pub fn json_cell(cell: &AnyValue<'_>) -> JsonValue {
    match cell {
        AnyValue::Null => JsonValue::Null,
        AnyValue::Boolean(flag) => JsonValue::Bool(*flag),
        AnyValue::String(text) => JsonValue::String((*text).to_string()),
        AnyValue::StringOwned(text) => JsonValue::String(text.to_string()),
        other if other.dtype().is_integer() => other
            .extract::<i64>()
            .map_or(JsonValue::Null, JsonValue::from),
        other if other.dtype().is_float() => other
            .extract::<f64>()
            .map_or(JsonValue::Null, JsonValue::from),
        other => JsonValue::String(other.to_string()),
    }
}

/// Column names of `frame`, in order.
#[must_use]
pub fn column_names(frame: &DataFrame) -> Vec<String> {
    frame
        .get_column_names()
        .into_iter()
        .map(ToString::to_string)
        .collect()
}

/// Every cell of `column` in its string form.
///
/// # Errors
///
/// Returns `ColumnNotFound` when the frame has no such column.
pub fn text_values(frame: &DataFrame, column: &str) -> PolarsResult<Vec<Option<String>>> {
    let text = frame
        .column(column)?
        .as_materialized_series()
        .cast(&DataType::String)?;
    Ok(text
        .str()?
        .into_iter()
        .map(|cell| cell.map(str::to_string))
        .collect())
}
