//! Column encodings shared by the table modules

use crate::error::StorageError;
use crate::types::Origin;
use chrono::{DateTime, TimeDelta, Utc};

pub(crate) fn to_micros(time: DateTime<Utc>) -> i64 {
    time.timestamp_micros()
}

pub(crate) fn from_micros(table: &'static str, micros: i64) -> Result<DateTime<Utc>, StorageError> {
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| StorageError::corrupt(table, format!("timestamp out of range: {}", micros)))
}

/// Drops sub-microsecond precision so in-memory times equal stored times.
pub(crate) fn truncate_to_micros(time: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(time.timestamp_micros()).unwrap_or(time)
}

/// Start of a sliding window ending at `now`; saturates for unbounded windows.
pub(crate) fn window_start(now: DateTime<Utc>, window: TimeDelta) -> i64 {
    now.checked_sub_signed(window)
        .map(to_micros)
        .unwrap_or(i64::MIN)
}

// SQLite has no unsigned 64-bit type; ids and keys round-trip bit-for-bit.
pub(crate) fn u64_to_sql(value: u64) -> i64 {
    value as i64
}

pub(crate) fn u64_from_sql(value: i64) -> u64 {
    value as u64
}

pub(crate) fn parse_origin(table: &'static str, value: &str) -> Result<Origin, StorageError> {
    Origin::parse(value).map_err(|e| StorageError::corrupt(table, format!("origin '{}': {}", value, e)))
}
