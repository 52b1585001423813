//! [`SqliteBackend`]: the [`DatabaseBackend`] over one `rusqlite` connection.
//!
//! Lifecycle is `Constructed → Migrating → Ready → Closed`. The constructor
//! opens the handle and immediately starts the migration on the blocking
//! pool; every operation awaits that shared future first. All engine work
//! runs in `spawn_blocking` against the single connection, which lives behind
//! a mutex and is taken out on `close()`.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use rusqlite::{Connection, TransactionBehavior};
use tracing::{debug, instrument, warn};

use recall_core::{EntityId, EntityRecord, Event, EventId};
use recall_settings::SqliteSettings;

use super::connection::{self, PragmaState};
use super::migrations;
use super::repositories::entity::EntityRepo;
use super::repositories::event::EventRepo;
use super::repositories::metadata::MetadataRepo;
use crate::backend::{
    check_record_scope, distinct_entity_ids, DatabaseBackend, EventHistory, RecordMap, Transformer,
};
use crate::errors::{EngineError, EngineResult, Result, StoreError};
use crate::query::{EntityQuery, EventQuery};

type SharedConnection = Arc<Mutex<Option<Connection>>>;
type MigrationFuture = Shared<BoxFuture<'static, Result<u32>>>;

/// `SQLite`-backed store.
pub struct SqliteBackend {
    conn: SharedConnection,
    closed: AtomicBool,
    migration: MigrationFuture,
}

impl SqliteBackend {
    /// Open (creating if needed) a database file.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(path: impl AsRef<Path>, settings: &SqliteSettings) -> Result<Self> {
        let conn = connection::open_file(path.as_ref(), settings)
            .map_err(|e| e.into_store("open"))?;
        Self::start(conn)
    }

    /// Open a private in-memory database.
    pub fn in_memory() -> Result<Self> {
        let conn = connection::open_in_memory(&SqliteSettings::default())
            .map_err(|e| e.into_store("open"))?;
        Self::start(conn)
    }

    /// Open a private on-disk database that is deleted on close.
    pub fn temporary() -> Result<Self> {
        let conn = connection::open_temporary(&SqliteSettings::default())
            .map_err(|e| e.into_store("open"))?;
        Self::start(conn)
    }

    fn start(conn: Connection) -> Result<Self> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| StoreError::Engine {
            operation: "open",
            message: e.to_string(),
        })?;
        let conn: SharedConnection = Arc::new(Mutex::new(Some(conn)));

        let handle = Arc::clone(&conn);
        let task = runtime.spawn_blocking(move || {
            let mut guard = handle.lock();
            let conn = guard.as_mut().ok_or(StoreError::BackendClosed {
                operation: "migrate",
            })?;
            migrations::run_migrations(conn)
        });
        let migration = async move {
            task.await.unwrap_or_else(|e| {
                Err(StoreError::Migration {
                    message: format!("migration task failed: {e}"),
                })
            })
        }
        .boxed()
        .shared();

        Ok(Self {
            conn,
            closed: AtomicBool::new(false),
            migration,
        })
    }

    /// Current pragma values of the connection.
    pub async fn pragmas(&self) -> Result<PragmaState> {
        self.run("pragmas", |conn| connection::verify_pragmas(conn)).await
    }

    async fn ensure_ready(&self, operation: &'static str) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::BackendClosed { operation });
        }
        match self.migration.clone().await {
            Ok(_) => Ok(()),
            Err(StoreError::Migration { message }) => Err(StoreError::Migration { message }),
            Err(other) => Err(StoreError::Migration {
                message: other.to_string(),
            }),
        }
    }

    /// Run `f` on the blocking pool with the connection, after migration.
    async fn with_connection<T, F>(&self, operation: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        self.ensure_ready(operation).await?;
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            let conn = guard
                .as_mut()
                .ok_or(StoreError::BackendClosed { operation })?;
            f(conn)
        })
        .await
        .map_err(|e| StoreError::Engine {
            operation,
            message: format!("blocking task failed: {e}"),
        })?
    }

    /// [`Self::with_connection`] for read and bookkeeping operations.
    async fn run<T, F>(&self, operation: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> EngineResult<T> + Send + 'static,
    {
        self.with_connection(operation, move |conn| {
            f(conn).map_err(|e| e.into_store(operation))
        })
        .await
    }
}

/// Stored-event reads bound to the open write transaction.
struct SqliteHistory<'a> {
    conn: &'a Connection,
}

impl EventHistory for SqliteHistory<'_> {
    fn stored_event_ids(&self, ids: &[EventId]) -> Result<HashSet<EventId>> {
        EventRepo::existing_ids(self.conn, ids).map_err(|e| e.into_store("stored_event_ids"))
    }
}

/// The whole write path, inside one `BEGIN IMMEDIATE` transaction.
fn write_batch(
    conn: &mut Connection,
    events: &[Event],
    entity_ids: &[EntityId],
    transformer: Transformer,
) -> Result<()> {
    const OPERATION: &str = "update_entities";
    let engine = |e: EngineError| e.into_transaction(OPERATION, entity_ids);

    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|e| engine(e.into()))?;

    let current = EntityRepo::get_by_ids(&tx, entity_ids).map_err(engine)?;
    let updated = transformer(events, current, &SqliteHistory { conn: &*tx })?;
    check_record_scope(&updated, entity_ids).map_err(|message| engine(EngineError::Other(message)))?;

    let inserted = EventRepo::insert_batch(&tx, events).map_err(engine)?;
    // New entities get row_ids in the order the batch first references them.
    let records: Vec<&EntityRecord> = entity_ids.iter().filter_map(|id| updated.get(id)).collect();
    let written = EntityRepo::upsert_batch(&tx, &records).map_err(engine)?;

    tx.commit().map_err(|e| engine(e.into()))?;
    debug!(
        events = events.len(),
        inserted,
        entities = written,
        "committed write batch"
    );
    Ok(())
}

#[async_trait]
impl DatabaseBackend for SqliteBackend {
    async fn get_entities(&self, ids: &[EntityId]) -> Result<RecordMap> {
        let ids = ids.to_vec();
        self.run("get_entities", move |conn| EntityRepo::get_by_ids(conn, &ids))
            .await
    }

    #[instrument(skip_all, fields(events = events.len()))]
    async fn update_entities(&self, events: Vec<Event>, transformer: Transformer) -> Result<()> {
        let entity_ids = distinct_entity_ids(&events);
        let result = self
            .with_connection("update_entities", move |conn| {
                write_batch(conn, &events, &entity_ids, transformer)
            })
            .await;
        if let Err(e) = &result {
            warn!(error = %e, "write batch rolled back");
        }
        result
    }

    async fn get_events(&self, ids: &[EventId]) -> Result<HashMap<EventId, Event>> {
        let ids = ids.to_vec();
        self.run("get_events", move |conn| EventRepo::get_by_ids(conn, &ids))
            .await
    }

    async fn list_events(&self, query: &EventQuery) -> Result<Vec<Event>> {
        let query = query.clone();
        self.run("list_events", move |conn| EventRepo::list(conn, &query))
            .await
    }

    async fn list_entities(&self, query: &EntityQuery) -> Result<Vec<EntityRecord>> {
        let query = query.clone();
        self.run("list_entities", move |conn| EntityRepo::list(conn, &query))
            .await
    }

    async fn get_metadata_values(&self, keys: &[String]) -> Result<HashMap<String, String>> {
        let keys = keys.to_vec();
        self.run("get_metadata_values", move |conn| MetadataRepo::get(conn, &keys))
            .await
    }

    async fn set_metadata_values(&self, values: BTreeMap<String, Option<String>>) -> Result<()> {
        self.with_connection("set_metadata_values", move |conn| {
            let operation = "set_metadata_values";
            let tx = conn
                .transaction()
                .map_err(|e| EngineError::from(e).into_store(operation))?;
            MetadataRepo::set(&tx, &values).map_err(|e| e.into_store(operation))?;
            tx.commit()
                .map_err(|e| EngineError::from(e).into_store(operation))
        })
        .await
    }

    async fn schema_version(&self) -> Result<u32> {
        self.with_connection("schema_version", |conn| migrations::current_version(conn))
            .await
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(StoreError::BackendClosed { operation: "close" });
        }
        // Let an in-flight migration finish before the handle goes away.
        let _ = self.migration.clone().await;

        let conn = Arc::clone(&self.conn);
        let taken = tokio::task::spawn_blocking(move || conn.lock().take())
            .await
            .map_err(|e| StoreError::Engine {
                operation: "close",
                message: e.to_string(),
            })?;
        if let Some(conn) = taken {
            conn.close().map_err(|(_, e)| StoreError::Engine {
                operation: "close",
                message: e.to_string(),
            })?;
        }
        debug!("sqlite backend closed");
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use recall_core::{fold, EntityType, EventPayload};

    fn ingest(entity: &str, at: i64, due: i64) -> Event {
        Event::new(
            entity,
            at,
            EventPayload::TaskIngest {
                spec: serde_json::json!({}),
                provenance: None,
                metadata: BTreeMap::new(),
                component_ids: vec!["main".into()],
                due_timestamp_millis: Some(due),
            },
        )
    }

    fn folding() -> Transformer {
        Box::new(|events: &[Event], mut records: RecordMap, _: &dyn EventHistory| -> Result<RecordMap> {
            for event in events {
                let prior = records.remove(&event.entity_id);
                let record = fold(std::slice::from_ref(event), prior)?;
                let _ = records.insert(event.entity_id.clone(), record);
            }
            Ok(records)
        })
    }

    #[tokio::test]
    async fn migrates_on_open() {
        let backend = SqliteBackend::in_memory().unwrap();
        assert_eq!(backend.schema_version().await.unwrap(), migrations::latest_version());
    }

    #[tokio::test]
    async fn file_backend_reopens_with_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recall.db");
        let settings = SqliteSettings::default();

        let backend = SqliteBackend::open(&path, &settings).unwrap();
        backend
            .update_entities(vec![ingest("task-1", 1, 100)], folding())
            .await
            .unwrap();
        assert_eq!(backend.pragmas().await.unwrap().journal_mode, "wal");
        backend.close().await.unwrap();

        let reopened = SqliteBackend::open(&path, &settings).unwrap();
        let records = reopened.get_entities(&["task-1".into()]).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(reopened.schema_version().await.unwrap(), migrations::latest_version());
    }

    #[tokio::test]
    async fn temporary_backend_works() {
        let backend = SqliteBackend::temporary().unwrap();
        backend
            .update_entities(vec![ingest("task-1", 1, 100)], folding())
            .await
            .unwrap();
        let listed = backend
            .list_entities(&EntityQuery::new(EntityType::Task))
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn engine_failure_mid_batch_rolls_back() {
        let backend = SqliteBackend::in_memory().unwrap();
        // Make the entity upsert fail after the events were inserted.
        backend
            .with_connection("test_setup", |conn| {
                conn.execute_batch(
                    "CREATE TRIGGER fail_task_2 BEFORE INSERT ON entities
                     WHEN new.id = 'task-2'
                     BEGIN SELECT RAISE(ABORT, 'simulated engine failure'); END;",
                )
                .map_err(|e| EngineError::from(e).into_store("test_setup"))
            })
            .await
            .unwrap();

        let err = backend
            .update_entities(
                vec![ingest("task-1", 1, 100), ingest("task-2", 2, 200)],
                folding(),
            )
            .await
            .unwrap_err();
        assert_matches!(
            err,
            StoreError::Transaction { operation: "update_entities", ref entity_ids, ref message }
                if entity_ids.len() == 2 && message.contains("simulated engine failure")
        );

        assert!(backend.get_entities(&["task-1".into()]).await.unwrap().is_empty());
        assert!(backend.list_events(&EventQuery::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_migration_poisons_every_call() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch("CREATE TABLE events (x INTEGER);").unwrap();
        }

        let backend = SqliteBackend::open(&path, &SqliteSettings::default()).unwrap();
        assert_matches!(
            backend.get_entities(&["task-1".into()]).await,
            Err(StoreError::Migration { .. })
        );
        assert_matches!(
            backend.get_metadata_values(&["k".into()]).await,
            Err(StoreError::Migration { .. })
        );
    }

    #[tokio::test]
    async fn close_is_terminal() {
        let backend = SqliteBackend::in_memory().unwrap();
        backend.close().await.unwrap();
        assert_matches!(
            backend.get_entities(&[]).await,
            Err(StoreError::BackendClosed { operation: "get_entities" })
        );
        assert_matches!(
            backend.close().await,
            Err(StoreError::BackendClosed { operation: "close" })
        );
    }
}
