//! Embedded schema and version check
//!
//! Files under `sql/` are applied in name order. Every statement uses
//! `IF NOT EXISTS`, so applying them to an existing database is a no-op.

use crate::error::StorageError;
use rusqlite::{params, Connection, OptionalExtension};

pub(crate) const CURRENT_VERSION: i64 = 1;

const VERSION_KEY: &str = "version";

const SCHEMA_FILES: [(&str, &str); 5] = [
    ("00_meta.sql", include_str!("../../sql/00_meta.sql")),
    ("01_sources.sql", include_str!("../../sql/01_sources.sql")),
    ("02_dedup_keys.sql", include_str!("../../sql/02_dedup_keys.sql")),
    ("03_reports.sql", include_str!("../../sql/03_reports.sql")),
    ("04_rate_limits.sql", include_str!("../../sql/04_rate_limits.sql")),
];

/// Creates missing tables and records the schema version.
///
/// Fails with [`StorageError::IncompatibleVersion`] if the database was
/// written by a newer schema.
pub(crate) fn initialize(conn: &mut Connection) -> Result<(), StorageError> {
    let tx = conn.transaction()?;

    for (name, sql) in SCHEMA_FILES {
        log::debug!("   ├─ Applying: {}", name);
        tx.execute_batch(sql)?;
    }

    let stored: Option<i64> = tx
        .query_row(
            "SELECT value FROM meta WHERE key = ?1",
            params![VERSION_KEY],
            |row| row.get(0),
        )
        .optional()?;

    match stored {
        Some(found) if found > CURRENT_VERSION => {
            return Err(StorageError::IncompatibleVersion {
                found,
                supported: CURRENT_VERSION,
            });
        }
        Some(found) if found == CURRENT_VERSION => {}
        _ => {
            tx.execute(
                "INSERT INTO meta (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![VERSION_KEY, CURRENT_VERSION],
            )?;
        }
    }

    tx.commit()?;
    Ok(())
}
