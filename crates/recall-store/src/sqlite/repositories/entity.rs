//! Entity repository: point lookups, listings and the batched upsert.

use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, Row};

use recall_core::{Entity, EntityId, EntityRecord, EventId};

use super::MAX_ROWS_PER_STATEMENT;
use crate::backend::RecordMap;
use crate::errors::{EngineError, EngineResult};
use crate::query::sql::{compile_entity_query, placeholders, row_placeholders, ENTITY_COLUMNS};
use crate::query::EntityQuery;

/// Raw row in [`ENTITY_COLUMNS`] order.
struct EntityRow {
    id: String,
    last_event_id: String,
    last_event_timestamp_millis: i64,
    data: String,
}

impl EntityRow {
    fn map_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            last_event_id: row.get(1)?,
            last_event_timestamp_millis: row.get(2)?,
            data: row.get(3)?,
        })
    }

    fn into_record(self) -> EngineResult<EntityRecord> {
        let entity: Entity = serde_json::from_str(&self.data)?;
        if entity.id().as_str() != self.id {
            return Err(EngineError::Other(format!(
                "entity row {} holds the payload of {}",
                self.id,
                entity.id()
            )));
        }
        Ok(EntityRecord {
            entity,
            last_event_id: EventId::from(self.last_event_id),
            last_event_timestamp_millis: self.last_event_timestamp_millis,
        })
    }
}

/// Entity repository. Stateless; every method takes `&Connection`.
pub struct EntityRepo;

impl EntityRepo {
    /// Records for the given IDs; missing IDs are absent.
    pub fn get_by_ids(conn: &Connection, ids: &[EntityId]) -> EngineResult<RecordMap> {
        let mut records = RecordMap::with_capacity(ids.len());
        for chunk in ids.chunks(MAX_ROWS_PER_STATEMENT) {
            let sql = format!(
                "SELECT {ENTITY_COLUMNS} FROM entities WHERE id IN ({})",
                placeholders(chunk.len())
            );
            let mut stmt = conn.prepare_cached(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(chunk.iter().map(EntityId::as_str)), EntityRow::map_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            for row in rows {
                let record = row.into_record()?;
                let _ = records.insert(record.entity.id().clone(), record);
            }
        }
        Ok(records)
    }

    /// Run a compiled entity listing.
    pub fn list(conn: &Connection, query: &EntityQuery) -> EngineResult<Vec<EntityRecord>> {
        let compiled = compile_entity_query(query);
        let mut stmt = conn.prepare_cached(&compiled.statement)?;
        let rows = stmt
            .query_map(params_from_iter(compiled.args.iter()), EntityRow::map_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(EntityRow::into_record).collect()
    }

    /// Insert new records and overwrite the provenance and payload of
    /// existing ones. Identity, type and `row_id` are never touched.
    pub fn upsert_batch(conn: &Connection, records: &[&EntityRecord]) -> EngineResult<usize> {
        let mut written = 0;
        for chunk in records.chunks(MAX_ROWS_PER_STATEMENT) {
            let sql = format!(
                "INSERT INTO entities (id, entity_type, last_event_id, last_event_timestamp_millis, data) \
                 VALUES {} \
                 ON CONFLICT(id) DO UPDATE SET \
                   last_event_id = excluded.last_event_id, \
                   last_event_timestamp_millis = excluded.last_event_timestamp_millis, \
                   data = excluded.data",
                row_placeholders(chunk.len(), 5)
            );
            let mut args = Vec::with_capacity(chunk.len() * 5);
            for record in chunk {
                args.push(Value::Text(record.entity.id().to_string()));
                args.push(Value::Text(record.entity.entity_type().as_str().to_string()));
                args.push(Value::Text(record.last_event_id.to_string()));
                args.push(Value::Integer(record.last_event_timestamp_millis));
                args.push(Value::Text(serde_json::to_string(&record.entity)?));
            }
            written += conn.prepare_cached(&sql)?.execute(params_from_iter(args))?;
        }
        Ok(written)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::ComparisonOperator;
    use crate::sqlite::migrations::run_migrations;
    use recall_core::{fold, Event, EventPayload, EntityType};

    fn setup() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        let _ = run_migrations(&mut conn).unwrap();
        conn
    }

    fn task(id: &str, due: i64) -> EntityRecord {
        fold(
            &[Event::new(
                id,
                1,
                EventPayload::TaskIngest {
                    spec: serde_json::json!({}),
                    provenance: None,
                    metadata: Default::default(),
                    component_ids: vec!["main".into()],
                    due_timestamp_millis: Some(due),
                },
            )],
            None,
        )
        .unwrap()
    }

    fn ids(records: &[EntityRecord]) -> Vec<&str> {
        records.iter().map(|r| r.entity.id().as_str()).collect()
    }

    #[test]
    fn upsert_then_get() {
        let conn = setup();
        let a = task("task-a", 100);
        let b = task("task-b", 200);
        assert_eq!(EntityRepo::upsert_batch(&conn, &[&a, &b]).unwrap(), 2);

        let found = EntityRepo::get_by_ids(&conn, &["task-a".into(), "missing".into()]).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[&EntityId::from("task-a")], a);
    }

    #[test]
    fn upsert_keeps_insertion_order() {
        let conn = setup();
        let a = task("task-a", 100);
        let b = task("task-b", 200);
        let _ = EntityRepo::upsert_batch(&conn, &[&a, &b]).unwrap();

        let mut a2 = a.clone();
        a2.last_event_timestamp_millis = 99;
        let _ = EntityRepo::upsert_batch(&conn, &[&a2]).unwrap();

        let listed = EntityRepo::list(&conn, &EntityQuery::new(EntityType::Task)).unwrap();
        assert_eq!(ids(&listed), vec!["task-a", "task-b"]);
        assert_eq!(listed[0].last_event_timestamp_millis, 99);
    }

    #[test]
    fn chunked_lookup_handles_large_batches() {
        let conn = setup();
        let records: Vec<EntityRecord> = (0..(MAX_ROWS_PER_STATEMENT + 7))
            .map(|i| task(&format!("task-{i:04}"), i as i64))
            .collect();
        let refs: Vec<&EntityRecord> = records.iter().collect();
        assert_eq!(EntityRepo::upsert_batch(&conn, &refs).unwrap(), records.len());

        let wanted: Vec<EntityId> = records.iter().map(|r| r.entity.id().clone()).collect();
        assert_eq!(EntityRepo::get_by_ids(&conn, &wanted).unwrap().len(), records.len());
    }

    #[test]
    fn due_listing_uses_derived_index() {
        let conn = setup();
        let records = [task("t1", 100), task("t2", 300), task("t3", 200)];
        let refs: Vec<&EntityRecord> = records.iter().collect();
        let _ = EntityRepo::upsert_batch(&conn, &refs).unwrap();

        let due = EntityRepo::list(
            &conn,
            &EntityQuery::new(EntityType::Task).due(ComparisonOperator::Lt, 250),
        )
        .unwrap();
        assert_eq!(ids(&due), vec!["t1", "t3"]);
    }
}
