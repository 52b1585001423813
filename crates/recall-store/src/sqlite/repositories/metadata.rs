//! Metadata repository: a flat, last-write-wins string map.

use std::collections::{BTreeMap, HashMap};

use rusqlite::{params, params_from_iter, Connection};

use super::MAX_ROWS_PER_STATEMENT;
use crate::errors::EngineResult;
use crate::query::sql::placeholders;

/// Metadata repository. Stateless; every method takes `&Connection`.
pub struct MetadataRepo;

impl MetadataRepo {
    /// Values for the given keys; missing keys are absent.
    pub fn get(conn: &Connection, keys: &[String]) -> EngineResult<HashMap<String, String>> {
        let mut values = HashMap::with_capacity(keys.len());
        for chunk in keys.chunks(MAX_ROWS_PER_STATEMENT) {
            let sql = format!(
                "SELECT key, value FROM metadata WHERE key IN ({})",
                placeholders(chunk.len())
            );
            let mut stmt = conn.prepare_cached(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(chunk.iter()), |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            values.extend(rows);
        }
        Ok(values)
    }

    /// Upsert `Some` values and delete keys mapped to `None`.
    pub fn set(conn: &Connection, values: &BTreeMap<String, Option<String>>) -> EngineResult<()> {
        let mut upsert = conn.prepare_cached(
            "INSERT INTO metadata (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )?;
        let mut delete = conn.prepare_cached("DELETE FROM metadata WHERE key = ?1")?;
        for (key, value) in values {
            let _ = match value {
                Some(value) => upsert.execute(params![key, value])?,
                None => delete.execute(params![key])?,
            };
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
