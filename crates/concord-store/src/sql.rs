//! Row-mapping helpers shared by the CRUD modules.

use chrono::{DateTime, Utc};
use serde_json::Value;

/// Parse an RFC-3339 timestamp column inside a row mapper.
pub(crate) fn parse_ts(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

/// Parse an optional RFC-3339 timestamp column.
pub(crate) fn parse_opt_ts(idx: usize, s: Option<&str>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    s.map(|s| parse_ts(idx, s)).transpose()
}

/// Parse a JSON column inside a row mapper.
pub(crate) fn parse_json(idx: usize, s: &str) -> rusqlite::Result<Value> {
    serde_json::from_str(s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}
