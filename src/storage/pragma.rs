use rusqlite::Connection;

/// Connection settings for the attribution database.
///
/// WAL + NORMAL sync for file databases; in-memory databases keep SQLite's
/// default journal. Cascades are done in code, so foreign keys stay off.
pub(crate) fn apply_pragmas(conn: &Connection, in_memory: bool) -> rusqlite::Result<()> {
    if !in_memory {
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        if !mode.eq_ignore_ascii_case("wal") {
            log::warn!("⚠️  journal_mode is '{}', expected WAL", mode);
        }
    }
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "OFF")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    Ok(())
}
