//! Shared SQLite connection tuning

use rusqlite::Connection;

/// Apply the pragmas every writer connection uses
///
/// - WAL journal so readers never block the writer
/// - NORMAL sync (safe with WAL, far fewer fsyncs)
/// - in-memory temp store
/// - 1000-page autocheckpoint to bound WAL growth
pub fn apply_optimized_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    conn.pragma_update(None, "busy_timeout", 5_000)?;
    conn.pragma_update(None, "wal_autocheckpoint", 1_000)?;
    Ok(())
}
