//! Connection tuning shared by every database handle the crate opens.

use rusqlite::Connection;
use std::time::Duration;

/// How long a writer waits on a locked database before giving up.
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Apply the pragmas the reconciler relies on.
///
/// - `journal_mode = WAL` so readers never block the single writer
/// - `synchronous = NORMAL` (safe with WAL)
/// - `foreign_keys = ON` so node → thread references are enforced
/// - busy timeout so concurrent openers wait instead of failing immediately
///
/// In-memory databases report `memory` for the journal mode; that is accepted.
pub fn apply_optimized_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    let mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    log::debug!("📊 SQLite journal_mode = {}", mode);

    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", true)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_wal_and_foreign_keys_enabled() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("pragma.db");
        let conn = Connection::open(&db_path).unwrap();

        apply_optimized_pragmas(&conn).unwrap();

        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(journal_mode.to_lowercase(), "wal");

        let foreign_keys: i64 = conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert_eq!(foreign_keys, 1);
    }

    #[test]
    fn test_in_memory_database_accepted() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(apply_optimized_pragmas(&conn).is_ok());
    }
}
