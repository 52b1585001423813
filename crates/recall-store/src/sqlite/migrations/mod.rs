//! Schema migration runner for the `SQLite` backend.
//!
//! Migrations are embedded at compile time via [`include_str!`] and executed
//! in version order. The current version lives in the `metadata` table under
//! [`SCHEMA_VERSION_KEY`]; each applied migration also leaves a completion
//! marker (`_recall.migration.vNNN.appliedAtMillis`).
//!
//! Each migration runs in its own `BEGIN IMMEDIATE` transaction, which takes
//! `SQLite`'s write lock up front. The version is re-read after the lock is
//! held and the migration is skipped if another process already applied it.
//! DDL and the version bump commit together, so a migration is either fully
//! applied or not at all. A process that cannot get the lock within the busy
//! timeout fails with [`StoreError::Migration`].

use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tracing::{debug, info};

pub use crate::backend::SCHEMA_VERSION_KEY;
use crate::backend::migration_marker_key;
use crate::errors::{Result, StoreError};

/// A single migration with a version number and SQL to execute.
struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

/// All migrations in version order.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "entities and events tables",
        sql: include_str!("v001_core_tables.sql"),
    },
    Migration {
        version: 2,
        description: "derived task component due-time index",
        sql: include_str!("v002_derived_task_components.sql"),
    },
];

/// Run all pending migrations. Returns how many were applied.
///
/// # Errors
///
/// Returns [`StoreError::Migration`] if any migration SQL fails, if the write
/// lock cannot be taken, or if the database was written by a newer schema.
pub fn run_migrations(conn: &mut Connection) -> Result<u32> {
    run_migrations_to(conn, latest_version())
}

/// Run pending migrations up to and including `target`.
pub(crate) fn run_migrations_to(conn: &mut Connection, target: u32) -> Result<u32> {
    ensure_metadata_table(conn)?;

    let found = current_version(conn)?;
    if found > latest_version() {
        return Err(StoreError::Migration {
            message: format!(
                "database schema v{found} is newer than the supported v{}",
                latest_version()
            ),
        });
    }

    let mut applied = 0;
    for migration in MIGRATIONS.iter().filter(|m| m.version <= target) {
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| migration_error(migration, "failed to begin transaction", &e))?;

        // Re-read under the write lock: another process may have migrated
        // since `found` was read.
        let current = read_version(&tx)?;
        if migration.version <= current {
            debug!(
                version = migration.version,
                description = migration.description,
                "migration already applied, skipping"
            );
            continue;
        }

        info!(
            version = migration.version,
            description = migration.description,
            "applying migration"
        );

        tx.execute_batch(migration.sql)
            .map_err(|e| migration_error(migration, "failed", &e))?;
        record_version(&tx, migration.version)
            .map_err(|e| migration_error(migration, "failed to record version", &e))?;
        tx.commit()
            .map_err(|e| migration_error(migration, "failed to commit", &e))?;

        applied += 1;
    }

    if applied > 0 {
        info!(applied, "migrations complete");
    }

    Ok(applied)
}

/// Return the applied schema version, or 0 for a fresh database.
pub fn current_version(conn: &Connection) -> Result<u32> {
    read_version(conn)
}

/// Return the latest migration version defined in code.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map_or(0, |m| m.version)
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal
// ─────────────────────────────────────────────────────────────────────────────

fn ensure_metadata_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS metadata (
           key   TEXT PRIMARY KEY NOT NULL,
           value TEXT NOT NULL
         );",
    )
    .map_err(|e| StoreError::Migration {
        message: format!("failed to create metadata table: {e}"),
    })
}

fn read_version(conn: &Connection) -> Result<u32> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM metadata WHERE key = ?1",
            params![SCHEMA_VERSION_KEY],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| StoreError::Migration {
            message: format!("failed to read schema version: {e}"),
        })?;

    match value {
        None => Ok(0),
        Some(v) => v.parse().map_err(|_| StoreError::Migration {
            message: format!("schema version {v:?} is not a number"),
        }),
    }
}

fn record_version(conn: &Connection, version: u32) -> rusqlite::Result<()> {
    let marker = migration_marker_key(version);
    let now = chrono::Utc::now().timestamp_millis();
    let _ = conn.execute(
        "INSERT INTO metadata (key, value) VALUES (?1, ?2), (?3, ?4)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![SCHEMA_VERSION_KEY, version.to_string(), marker, now.to_string()],
    )?;
    Ok(())
}

fn migration_error(migration: &Migration, what: &str, err: &rusqlite::Error) -> StoreError {
    StoreError::Migration {
        message: format!(
            "v{} ({}) {what}: {err}",
            migration.version, migration.description
        ),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
