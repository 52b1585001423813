//! Opening the single `SQLite` connection a backend owns.
//!
//! Pragmas come from [`SqliteSettings`]. WAL is only requested for
//! file-backed databases; in-memory and temporary databases report `memory`
//! or `delete` and that is fine.

use std::path::Path;

use rusqlite::{Connection, OpenFlags};
use tracing::debug;

use recall_settings::SqliteSettings;

use crate::errors::EngineResult;

/// Open (creating if needed) a database file.
pub(crate) fn open_file(path: &Path, settings: &SqliteSettings) -> EngineResult<Connection> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX
            | OpenFlags::SQLITE_OPEN_URI,
    )?;
    apply_pragmas(&conn, settings, settings.wal)?;
    debug!(?path, "opened sqlite database");
    Ok(conn)
}

/// Open a private in-memory database.
pub(crate) fn open_in_memory(settings: &SqliteSettings) -> EngineResult<Connection> {
    let conn = Connection::open_in_memory()?;
    apply_pragmas(&conn, settings, false)?;
    Ok(conn)
}

/// Open a private on-disk temporary database, deleted when closed.
pub(crate) fn open_temporary(settings: &SqliteSettings) -> EngineResult<Connection> {
    let conn = Connection::open("")?;
    apply_pragmas(&conn, settings, false)?;
    Ok(conn)
}

fn apply_pragmas(conn: &Connection, settings: &SqliteSettings, wal: bool) -> EngineResult<()> {
    if wal {
        // journal_mode returns the resulting mode as a row.
        let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    }
    conn.execute_batch(&format!(
        "PRAGMA busy_timeout = {};\
         PRAGMA cache_size = -{};\
         PRAGMA synchronous = NORMAL;\
         PRAGMA foreign_keys = ON;",
        settings.busy_timeout_ms, settings.cache_size_kib
    ))?;
    Ok(())
}

/// Pragma state as read back from an open connection.
#[derive(Debug)]
pub struct PragmaState {
    /// Journal mode (`wal` for file-backed databases by default).
    pub journal_mode: String,
    /// Busy timeout in milliseconds.
    pub busy_timeout_ms: i64,
}

/// Read back the pragmas that matter.
pub(crate) fn verify_pragmas(conn: &Connection) -> EngineResult<PragmaState> {
    let journal_mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
    let busy_timeout_ms: i64 = conn.query_row("PRAGMA busy_timeout", [], |row| row.get(0))?;
    Ok(PragmaState {
        journal_mode,
        busy_timeout_ms,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_database_uses_wal() {
        let dir = tempfile::tempdir().unwrap();
        let settings = SqliteSettings {
            busy_timeout_ms: 1234,
            ..SqliteSettings::default()
        };
        let conn = open_file(&dir.path().join("test.db"), &settings).unwrap();
        let pragmas = verify_pragmas(&conn).unwrap();
        assert_eq!(pragmas.journal_mode, "wal");
        assert_eq!(pragmas.busy_timeout_ms, 1234);
    }

    #[test]
    fn wal_can_be_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let settings = SqliteSettings {
            wal: false,
            ..SqliteSettings::default()
        };
        let conn = open_file(&dir.path().join("test.db"), &settings).unwrap();
        assert_eq!(verify_pragmas(&conn).unwrap().journal_mode, "delete");
    }

    #[test]
    fn in_memory_and_temporary_open() {
        let settings = SqliteSettings::default();
        let mem = open_in_memory(&settings).unwrap();
        assert_eq!(verify_pragmas(&mem).unwrap().journal_mode, "memory");
        let tmp = open_temporary(&settings).unwrap();
        assert_eq!(verify_pragmas(&tmp).unwrap().busy_timeout_ms, 5_000);
    }
}
