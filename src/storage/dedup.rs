//! Deduplication ledger
//!
//! Two key sets per source, one per report type. Keys outlive the reports
//! they produced, so a trigger replayed after its report was sent is still
//! recognized.

use super::sql_util::{u64_from_sql, u64_to_sql};
use crate::error::StorageError;
use crate::types::{ReportType, SourceId};
use rusqlite::{params, Connection};

/// Keys for one source and report type, in match order.
pub(crate) fn keys_for_source(
    conn: &Connection,
    source_id: SourceId,
    report_type: ReportType,
) -> Result<Vec<u64>, StorageError> {
    let mut stmt = conn.prepare_cached(
        "SELECT dedup_key FROM dedup_keys
         WHERE source_id = ?1 AND report_type = ?2
         ORDER BY rowid",
    )?;
    let keys = stmt
        .query_map(params![source_id.0, report_type.to_sql()], |row| {
            row.get::<_, i64>(0).map(u64_from_sql)
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(keys)
}

pub(crate) fn store_dedup_key(
    conn: &Connection,
    source_id: SourceId,
    report_type: ReportType,
    dedup_key: u64,
) -> Result<(), StorageError> {
    conn.execute(
        "INSERT OR IGNORE INTO dedup_keys (source_id, report_type, dedup_key)
         VALUES (?1, ?2, ?3)",
        params![source_id.0, report_type.to_sql(), u64_to_sql(dedup_key)],
    )?;
    Ok(())
}

pub(crate) fn delete_for_sources(conn: &Connection, source_ids: &[SourceId]) -> Result<usize, StorageError> {
    let mut stmt = conn.prepare("DELETE FROM dedup_keys WHERE source_id = ?1")?;
    let mut deleted = 0;
    for source_id in source_ids {
        deleted += stmt.execute(params![source_id.0])?;
    }
    Ok(deleted)
}

pub(crate) fn delete_all(conn: &Connection) -> Result<usize, StorageError> {
    Ok(conn.execute("DELETE FROM dedup_keys", [])?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::schema;

    #[test]
    fn test_key_sets_are_independent_and_ordered() {
        let mut conn = Connection::open_in_memory().unwrap();
        schema::initialize(&mut conn).unwrap();
        let source = SourceId(7);

        store_dedup_key(&conn, source, ReportType::EventLevel, 3).unwrap();
        store_dedup_key(&conn, source, ReportType::EventLevel, 1).unwrap();
        store_dedup_key(&conn, source, ReportType::EventLevel, 3).unwrap();
        store_dedup_key(&conn, source, ReportType::Aggregatable, u64::MAX).unwrap();

        assert_eq!(keys_for_source(&conn, source, ReportType::EventLevel).unwrap(), vec![3, 1]);
        assert_eq!(
            keys_for_source(&conn, source, ReportType::Aggregatable).unwrap(),
            vec![u64::MAX]
        );

        delete_for_sources(&conn, &[source]).unwrap();
        assert!(keys_for_source(&conn, source, ReportType::EventLevel).unwrap().is_empty());
    }
}
