//! Helpers for decoding chain rows from SQLite.
//!
//! These convert decode failures into `rusqlite::Error` instead of panicking,
//! since ledger rows may be hand-edited or written by older versions.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;

use javelin_types::LedgerError;

/// Parse a text column into one of the ledger's string-coded enums.
pub(crate) fn parse_text<T>(s: &str, col: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = LedgerError>,
{
    s.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(col, Type::Text, Box::new(e)))
}

/// Decode a microsecond Unix timestamp column.
pub(crate) fn parse_micros(us: i64, col: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(us).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            col,
            Type::Integer,
            Box::new(LedgerError::Storage(format!("timestamp out of range: {us}"))),
        )
    })
}
