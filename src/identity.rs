//! Content-addressed row identity.
//!
//! Every row gets an identifier derived from its content rather than from a
//! business key: rows are hashed (BLAKE3 over the `||`-joined text of every
//! non-identity column, nulls rendered empty) and one UUID v4 is allocated per
//! distinct digest. Fully duplicate rows therefore share an identifier.

use polars::prelude::*;
use tracing::debug;
use uuid::Uuid;

use crate::table::column_names;

/// Delimiter placed between column values before hashing.
pub const HASH_DELIMITER: &str = "||";

const ROW_TEXT: &str = "__row_text";
const ROW_HASH: &str = "__row_hash";

fn digest(text: &str) -> String {
    blake3::hash(text.as_bytes()).to_hex().to_string()
}

/// Assigns `id_column` to every row of `frame`.
///
/// An existing `id_column` is excluded from hashing and replaced; the new
/// column is appended last.
///
/// # Errors
///
/// Returns the polars error if a column cannot be cast to its string form.
pub fn assign_row_ids(frame: &DataFrame, id_column: &str) -> PolarsResult<DataFrame> {
    let base = frame.drop_many([id_column]);
    let parts: Vec<Expr> = column_names(&base)
        .iter()
        .map(|name| col(name.as_str()).cast(DataType::String).fill_null(lit("")))
        .collect();
    if parts.is_empty() {
        // Nothing to hash: every row has the same (empty) content.
        return frame
            .clone()
            .lazy()
            .with_column(lit(Uuid::new_v4().to_string()).alias(id_column))
            .collect();
    }

    let text = base
        .clone()
        .lazy()
        .select([concat_str(parts, HASH_DELIMITER, false).alias(ROW_TEXT)])
        .collect()?;
    let digests: StringChunked = text
        .column(ROW_TEXT)?
        .as_materialized_series()
        .str()?
        .into_iter()
        .map(|row| row.map(digest))
        .collect();

    let mut hashed = base;
    hashed.with_column(digests.with_name(ROW_HASH.into()).into_series())?;

    let mut lookup = hashed
        .clone()
        .lazy()
        .select([col(ROW_HASH).unique_stable()])
        .collect()?;
    let ids: StringChunked = (0..lookup.height())
        .map(|_| Some(Uuid::new_v4().to_string()))
        .collect();
    lookup.with_column(ids.with_name(id_column.into()).into_series())?;

    debug!(
        rows = frame.height(),
        distinct = lookup.height(),
        "assigned row identities"
    );

    let joined = hashed
        .lazy()
        .join(
            lookup.lazy(),
            [col(ROW_HASH)],
            [col(ROW_HASH)],
            JoinArgs::new(JoinType::Left),
        )
        .collect()?;
    Ok(joined.drop_many([ROW_HASH]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::text_values;

    fn dataset() -> DataFrame {
        df!(
            "name" => ["Ada", "Ada", "Ada"],
            "email" => [Some("ada@example.com"), Some("ada@example.com"), None],
        )
        .unwrap()
    }

    fn ids(frame: &DataFrame) -> Vec<String> {
        text_values(frame, "row_id")
            .unwrap()
            .into_iter()
            .map(Option::unwrap)
            .collect()
    }

    #[test]
    fn test_duplicate_rows_share_identity() {
        let out = assign_row_ids(&dataset(), "row_id").unwrap();
        assert_eq!(out.height(), 3);
        assert_eq!(column_names(&out), vec!["name", "email", "row_id"]);

        let ids = ids(&out);
        assert_eq!(ids[0], ids[1]);
        assert_ne!(ids[0], ids[2]);
    }

    #[test]
    fn test_ids_are_uuids() {
        let out = assign_row_ids(&dataset(), "row_id").unwrap();
        assert!(Uuid::parse_str(&ids(&out)[2]).is_ok());
    }

    #[test]
    fn test_existing_identity_is_ignored_and_replaced() {
        let mut with_ids = dataset();
        with_ids
            .with_column(Series::new("row_id".into(), ["x", "y", "z"]))
            .unwrap();

        let out = assign_row_ids(&with_ids, "row_id").unwrap();
        assert_eq!(out.width(), 3);
        let ids = ids(&out);
        assert_eq!(ids[0], ids[1]);
        assert_ne!(ids[0], "x");
    }

    #[test]
    fn test_empty_frame() {
        let empty = df!("name" => Vec::<&str>::new()).unwrap();
        let out = assign_row_ids(&empty, "row_id").unwrap();
        assert_eq!(out.height(), 0);
        assert!(out.get_column_index("row_id").is_some());
    }

    #[test]
    fn test_digest_is_hex_blake3() {
        let hex = digest("Ada||");
        assert_eq!(hex.len(), 64);
        assert_eq!(hex, blake3::hash(b"Ada||").to_hex().to_string());
    }
}
