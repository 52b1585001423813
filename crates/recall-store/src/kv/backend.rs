//! [`KvBackend`]: the [`DatabaseBackend`] over a `native_db` database.
//!
//! Same lifecycle as the `SQLite` backend: the constructor opens the
//! database and starts the migration on the blocking pool, every operation
//! awaits it, and `close()` drops the handle. Reads share the handle behind a
//! read lock; `redb` serializes write transactions itself.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use native_db::transaction::RwTransaction;
use native_db::{Builder, Database};
use parking_lot::RwLock;
use tracing::{debug, instrument, warn};

use recall_core::{EntityId, EntityRecord, Event, EventId};

use super::migrations;
use super::models::models;
use super::store;
use crate::backend::{
    check_record_scope, distinct_entity_ids, DatabaseBackend, EventHistory, RecordMap, Transformer,
};
use crate::errors::{EngineError, EngineResult, Result, StoreError};
use crate::query::{EntityQuery, EventQuery};

type SharedDatabase = Arc<RwLock<Option<Database<'static>>>>;
type MigrationFuture = Shared<BoxFuture<'static, Result<u32>>>;

/// Key-value store backed by `native_db`.
pub struct KvBackend {
    db: SharedDatabase,
    closed: AtomicBool,
    migration: MigrationFuture,
}

impl KvBackend {
    /// Open (creating if needed) a database file.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let open = || -> EngineResult<Database<'static>> {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .map_err(|e| EngineError::Other(format!("create {}: {e}", parent.display())))?;
            }
            Ok(Builder::new().create(models()?, path)?)
        };
        let db = open().map_err(|e| e.into_store("open"))?;
        debug!(?path, "opened kv database");
        Self::start(db)
    }

    /// Open a private in-memory database.
    pub fn in_memory() -> Result<Self> {
        let open = || -> EngineResult<Database<'static>> {
            Ok(Builder::new().create_in_memory(models()?)?)
        };
        Self::start(open().map_err(|e| e.into_store("open"))?)
    }

    fn start(db: Database<'static>) -> Result<Self> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| StoreError::Engine {
            operation: "open",
            message: e.to_string(),
        })?;
        let db: SharedDatabase = Arc::new(RwLock::new(Some(db)));

        let handle = Arc::clone(&db);
        let task = runtime.spawn_blocking(move || {
            let guard = handle.read();
            let db = guard.as_ref().ok_or(StoreError::BackendClosed {
                operation: "migrate",
            })?;
            migrations::run_migrations(db)
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
            db,
            closed: AtomicBool::new(false),
            migration,
        })
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

    /// Run `f` on the blocking pool with the database, after migration.
    async fn with_database<T, F>(&self, operation: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Database<'static>) -> Result<T> + Send + 'static,
    {
        self.ensure_ready(operation).await?;
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            let guard = db.read();
            let db = guard
                .as_ref()
                .ok_or(StoreError::BackendClosed { operation })?;
            f(db)
        })
        .await
        .map_err(|e| StoreError::Engine {
            operation,
            message: format!("blocking task failed: {e}"),
        })?
    }

    /// [`Self::with_database`] for a single read transaction.
    async fn read<T, F>(&self, operation: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&native_db::transaction::RTransaction<'_>) -> EngineResult<T> + Send + 'static,
    {
        self.with_database(operation, move |db| {
            let run = || -> EngineResult<T> {
                let r = db.r_transaction()?;
                f(&r)
            };
            run().map_err(|e| e.into_store(operation))
        })
        .await
    }
}

/// Stored-event reads bound to the open write transaction.
struct KvHistory<'a, 'db> {
    rw: &'a RwTransaction<'db>,
}

impl EventHistory for KvHistory<'_, '_> {
    fn stored_event_ids(&self, ids: &[EventId]) -> Result<HashSet<EventId>> {
        store::stored_event_ids(self.rw, ids).map_err(|e| e.into_store("stored_event_ids"))
    }
}

/// The whole write path, inside one write transaction.
fn write_batch(
    db: &Database<'static>,
    events: &[Event],
    entity_ids: &[EntityId],
    transformer: Transformer,
) -> Result<()> {
    const OPERATION: &str = "update_entities";
    let engine = |e: EngineError| e.into_transaction(OPERATION, entity_ids);

    let rw = db.rw_transaction().map_err(|e| engine(e.into()))?;

    let current = store::load_entities(&rw, entity_ids).map_err(engine)?;
    let updated = transformer(events, current, &KvHistory { rw: &rw })?;
    check_record_scope(&updated, entity_ids).map_err(|message| engine(EngineError::Other(message)))?;

    let inserted = store::insert_events(&rw, events).map_err(engine)?;
    let records: Vec<&EntityRecord> = entity_ids.iter().filter_map(|id| updated.get(id)).collect();
    let written = store::upsert_records(&rw, &records).map_err(engine)?;

    rw.commit().map_err(|e| engine(e.into()))?;
    debug!(
        events = events.len(),
        inserted,
        entities = written,
        "committed write batch"
    );
    Ok(())
}

#[async_trait]
impl DatabaseBackend for KvBackend {
    async fn get_entities(&self, ids: &[EntityId]) -> Result<RecordMap> {
        let ids = ids.to_vec();
        self.read("get_entities", move |r| store::get_entities(r, &ids))
            .await
    }

    #[instrument(skip_all, fields(events = events.len()))]
    async fn update_entities(&self, events: Vec<Event>, transformer: Transformer) -> Result<()> {
        let entity_ids = distinct_entity_ids(&events);
        let result = self
            .with_database("update_entities", move |db| {
                write_batch(db, &events, &entity_ids, transformer)
            })
            .await;
        if let Err(e) = &result {
            warn!(error = %e, "write batch rolled back");
        }
        result
    }

    async fn get_events(&self, ids: &[EventId]) -> Result<HashMap<EventId, Event>> {
        let ids = ids.to_vec();
        self.read("get_events", move |r| store::get_events(r, &ids))
            .await
    }

    async fn list_events(&self, query: &EventQuery) -> Result<Vec<Event>> {
        let query = query.clone();
        self.read("list_events", move |r| store::list_events(r, &query))
            .await
    }

    async fn list_entities(&self, query: &EntityQuery) -> Result<Vec<EntityRecord>> {
        let query = query.clone();
        self.read("list_entities", move |r| store::list_entities(r, &query))
            .await
    }

    async fn get_metadata_values(&self, keys: &[String]) -> Result<HashMap<String, String>> {
        let keys = keys.to_vec();
        self.read("get_metadata_values", move |r| store::get_metadata(r, &keys))
            .await
    }

    async fn set_metadata_values(&self, values: BTreeMap<String, Option<String>>) -> Result<()> {
        self.with_database("set_metadata_values", move |db| {
            let write = || -> EngineResult<()> {
                let rw = db.rw_transaction()?;
                store::set_metadata(&rw, &values)?;
                rw.commit()?;
                Ok(())
            };
            write().map_err(|e| e.into_store("set_metadata_values"))
        })
        .await
    }

    async fn schema_version(&self) -> Result<u32> {
        self.with_database("schema_version", migrations::current_version).await
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(StoreError::BackendClosed { operation: "close" });
        }
        // Let an in-flight migration finish before the handle goes away.
        let _ = self.migration.clone().await;

        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || drop(db.write().take()))
            .await
            .map_err(|e| StoreError::Engine {
                operation: "close",
                message: e.to_string(),
            })?;
        debug!("kv backend closed");
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
        let backend = KvBackend::in_memory().unwrap();
        assert_eq!(backend.schema_version().await.unwrap(), migrations::latest_version());
    }

    #[tokio::test]
    async fn file_backend_reopens_with_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("recall.kv");

        let backend = KvBackend::open(&path).unwrap();
        backend
            .update_entities(vec![ingest("task-1", 1, 100)], folding())
            .await
            .unwrap();
        backend.close().await.unwrap();

        let reopened = KvBackend::open(&path).unwrap();
        let records = reopened.get_entities(&["task-1".into()]).await.unwrap();
        assert_eq!(records.len(), 1);
        let listed = reopened
            .list_entities(&EntityQuery::new(EntityType::Task))
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn rejected_transformer_output_rolls_back() {
        let backend = KvBackend::in_memory().unwrap();
        let stray: Transformer = Box::new(|events: &[Event], _: RecordMap, _: &dyn EventHistory| -> Result<RecordMap> {
            let record = fold(events, None)?;
            let mut out = RecordMap::new();
            let _ = out.insert("somewhere-else".into(), record);
            Ok(out)
        });

        let err = backend
            .update_entities(vec![ingest("task-1", 1, 100)], stray)
            .await
            .unwrap_err();
        assert_matches!(err, StoreError::Transaction { operation: "update_entities", .. });
        assert!(backend.list_events(&EventQuery::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn newer_schema_poisons_every_call() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("future.kv");
        {
            let db = Builder::new().create(models().unwrap(), &path).unwrap();
            let rw = db.rw_transaction().unwrap();
            let mut values = BTreeMap::new();
            let _ = values.insert(crate::backend::SCHEMA_VERSION_KEY.to_string(), Some("42".into()));
            store::set_metadata(&rw, &values).unwrap();
            rw.commit().unwrap();
        }

        let backend = KvBackend::open(&path).unwrap();
        assert_matches!(
            backend.get_entities(&["task-1".into()]).await,
            Err(StoreError::Migration { .. })
        );
        assert_matches!(
            backend.list_events(&EventQuery::new()).await,
            Err(StoreError::Migration { .. })
        );
    }

    #[tokio::test]
    async fn close_is_terminal() {
        let backend = KvBackend::in_memory().unwrap();
        backend.close().await.unwrap();
        assert_matches!(
            backend.get_metadata_values(&[]).await,
            Err(StoreError::BackendClosed { operation: "get_metadata_values" })
        );
        assert_matches!(
            backend.close().await,
            Err(StoreError::BackendClosed { operation: "close" })
        );
    }
}
