//! Event repository: the append-only log.
//!
//! Events are keyed by their content hash. Re-inserting a stored event is a
//! silent no-op (`ON CONFLICT(id) DO NOTHING`); rows are never updated or
//! deleted.

use std::collections::{HashMap, HashSet};

use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};

use recall_core::{Event, EventId};

use super::MAX_ROWS_PER_STATEMENT;
use crate::errors::{EngineError, EngineResult};
use crate::query::sql::{compile_event_query, placeholders, row_placeholders};
use crate::query::EventQuery;

/// Event repository. Stateless; every method takes `&Connection`.
pub struct EventRepo;

impl EventRepo {
    /// Events for the given IDs; missing IDs are absent.
    pub fn get_by_ids(conn: &Connection, ids: &[EventId]) -> EngineResult<HashMap<EventId, Event>> {
        let mut events = HashMap::with_capacity(ids.len());
        for chunk in ids.chunks(MAX_ROWS_PER_STATEMENT) {
            let sql = format!(
                "SELECT data FROM events WHERE id IN ({})",
                placeholders(chunk.len())
            );
            for event in Self::query_data(conn, &sql, chunk.iter().map(EventId::as_str))? {
                let _ = events.insert(event.id.clone(), event);
            }
        }
        Ok(events)
    }

    /// The subset of `ids` already stored.
    pub fn existing_ids(conn: &Connection, ids: &[EventId]) -> EngineResult<HashSet<EventId>> {
        let mut found = HashSet::new();
        for chunk in ids.chunks(MAX_ROWS_PER_STATEMENT) {
            let sql = format!(
                "SELECT id FROM events WHERE id IN ({})",
                placeholders(chunk.len())
            );
            let mut stmt = conn.prepare_cached(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(chunk.iter().map(EventId::as_str)), |row| {
                    row.get::<_, String>(0)
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            found.extend(rows.into_iter().map(EventId::from));
        }
        Ok(found)
    }

    /// Run a compiled event listing.
    pub fn list(conn: &Connection, query: &EventQuery) -> EngineResult<Vec<Event>> {
        let compiled = compile_event_query(query);
        Self::query_data(conn, &compiled.statement, compiled.args.iter())
    }

    /// Insert events, ignoring IDs already stored. Returns the number of
    /// rows actually inserted.
    pub fn insert_batch(conn: &Connection, events: &[Event]) -> EngineResult<usize> {
        let mut inserted = 0;
        for chunk in events.chunks(MAX_ROWS_PER_STATEMENT) {
            let sql = format!(
                "INSERT INTO events (id, entity_id, data) VALUES {} ON CONFLICT(id) DO NOTHING",
                row_placeholders(chunk.len(), 3)
            );
            let mut args = Vec::with_capacity(chunk.len() * 3);
            for event in chunk {
                args.push(Value::Text(event.id.to_string()));
                args.push(Value::Text(event.entity_id.to_string()));
                args.push(Value::Text(serde_json::to_string(event)?));
            }
            inserted += conn.prepare_cached(&sql)?.execute(params_from_iter(args))?;
        }
        Ok(inserted)
    }

    fn query_data<P>(conn: &Connection, sql: &str, args: P) -> EngineResult<Vec<Event>>
    where
        P: IntoIterator,
        P::Item: rusqlite::ToSql,
    {
        let mut stmt = conn.prepare_cached(sql)?;
        let rows = stmt
            .query_map(params_from_iter(args), |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.iter()
            .map(|data| serde_json::from_str::<Event>(data).map_err(EngineError::from))
            .collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
