//! Low-level SQL per entity. All functions take a borrowed connection;
//! transactional grouping is the store's concern.

pub mod message;
pub mod profile;
pub mod quiz;

use chrono::{DateTime, NaiveDateTime, Utc};
use uuid::Uuid;

use super::DatabaseError;

/// Write format for timestamp columns. Fixed width so lexicographic
/// ordering in SQL matches chronological ordering.
const TS_WRITE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";
/// Read format; tolerates any sub-second precision.
const TS_READ_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.fZ";

pub(crate) fn ts_to_sql(ts: &DateTime<Utc>) -> String {
    ts.format(TS_WRITE_FORMAT).to_string()
}

pub(crate) fn ts_from_sql(field: &str, value: &str) -> Result<DateTime<Utc>, DatabaseError> {
    NaiveDateTime::parse_from_str(value, TS_READ_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|_| DatabaseError::InvalidTimestamp {
            field: field.to_string(),
            value: value.to_string(),
        })
}

pub(crate) fn uuid_from_sql(field: &str, value: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(value).map_err(|_| DatabaseError::ConstraintViolation(format!(
        "{field} is not a valid UUID: {value}"
    )))
}
