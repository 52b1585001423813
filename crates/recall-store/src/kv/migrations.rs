//! Schema versioning for the key-value backend.
//!
//! Models carry their own layout, so a KV migration is a data step rather
//! than DDL. The version and completion markers live in the metadata model
//! under the same keys the `SQLite` backend uses. Each migration runs in its
//! own write transaction; `redb` serializes writers, and the version is
//! re-read inside the transaction before anything is applied.

use std::collections::BTreeMap;

use native_db::transaction::RwTransaction;
use native_db::Database;
use tracing::{debug, info};

use super::models::StoredMetadata;
use super::store;
use crate::backend::{migration_marker_key, SCHEMA_VERSION_KEY};
use crate::errors::{EngineError, EngineResult, Result, StoreError};

struct Migration {
    version: u32,
    description: &'static str,
    apply: fn(&RwTransaction<'_>) -> EngineResult<()>,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "entity, event and metadata models",
        apply: establish_models,
    },
    Migration {
        version: 2,
        description: "derived task component due-time index",
        apply: rebuild_component_index,
    },
];

/// Run all pending migrations. Returns how many were applied.
pub fn run_migrations(db: &Database<'_>) -> Result<u32> {
    run_migrations_to(db, latest_version())
}

/// Run pending migrations up to and including `target`.
pub(crate) fn run_migrations_to(db: &Database<'_>, target: u32) -> Result<u32> {
    let found = current_version(db)?;
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
        let fail = |what: &str, e: EngineError| StoreError::Migration {
            message: format!(
                "v{} ({}) {what}: {}",
                migration.version,
                migration.description,
                e.into_store("migrate")
            ),
        };

        let rw = db
            .rw_transaction()
            .map_err(|e| fail("failed to begin transaction", e.into()))?;
        let current = parse_version(
            store::read_metadata(&rw, SCHEMA_VERSION_KEY)
                .map_err(|e| fail("failed to read version", e))?,
        )?;
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
        (migration.apply)(&rw).map_err(|e| fail("failed", e))?;

        let now = chrono::Utc::now().timestamp_millis();
        let mut values = BTreeMap::new();
        let _ = values.insert(SCHEMA_VERSION_KEY.to_string(), Some(migration.version.to_string()));
        let _ = values.insert(migration_marker_key(migration.version), Some(now.to_string()));
        store::set_metadata(&rw, &values).map_err(|e| fail("failed to record version", e))?;
        rw.commit().map_err(|e| fail("failed to commit", e.into()))?;

        applied += 1;
    }

    if applied > 0 {
        info!(applied, "migrations complete");
    }
    Ok(applied)
}

/// Return the applied schema version, or 0 for a fresh database.
pub fn current_version(db: &Database<'_>) -> Result<u32> {
    let read = || -> EngineResult<Option<String>> {
        let r = db.r_transaction()?;
        let stored: Option<StoredMetadata> = r.get().primary(SCHEMA_VERSION_KEY.to_string())?;
        Ok(stored.map(|s| s.value))
    };
    let value = read().map_err(|e| StoreError::Migration {
        message: format!("failed to read schema version: {}", e.into_store("migrate")),
    })?;
    parse_version(value)
}

/// Return the latest migration version defined in code.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map_or(0, |m| m.version)
}

fn parse_version(value: Option<String>) -> Result<u32> {
    match value {
        None => Ok(0),
        Some(v) => v.parse().map_err(|_| StoreError::Migration {
            message: format!("schema version {v:?} is not a number"),
        }),
    }
}

// Models are created lazily by `native_db`; v1 only stamps the version.
fn establish_models(_: &RwTransaction<'_>) -> EngineResult<()> {
    Ok(())
}

fn rebuild_component_index(rw: &RwTransaction<'_>) -> EngineResult<()> {
    let entities = store::all_entities(rw)?;
    for stored in &entities {
        store::replace_components(rw, &stored.to_record()?, stored.sequence)?;
    }
    debug!(entities = entities.len(), "rebuilt task component index");
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::models::{models, StoredEntity};
    use crate::query::{ComparisonOperator, EntityQuery};
    use assert_matches::assert_matches;
    use native_db::Builder;
    use recall_core::{fold, EntityType, Event, EventPayload};

    fn open() -> Database<'static> {
        Builder::new().create_in_memory(models().unwrap()).unwrap()
    }

    #[test]
    fn fresh_database_reaches_latest() {
        let db = open();
        assert_eq!(current_version(&db).unwrap(), 0);
        assert_eq!(run_migrations(&db).unwrap(), latest_version());
        assert_eq!(current_version(&db).unwrap(), latest_version());
        assert_eq!(run_migrations(&db).unwrap(), 0);
    }

    #[test]
    fn markers_are_recorded() {
        let db = open();
        let _ = run_migrations(&db).unwrap();
        let r = db.r_transaction().unwrap();
        let keys: Vec<String> = (1..=latest_version()).map(migration_marker_key).collect();
        let values = store::get_metadata(&r, &keys).unwrap();
        assert_eq!(values.len(), keys.len());
        assert!(values.values().all(|v| v.parse::<i64>().unwrap() > 0));
    }

    #[test]
    fn skips_versions_applied_by_another_migrator() {
        let db = open();
        // Another process already advanced the version but wrote no markers.
        let rw = db.rw_transaction().unwrap();
        let mut values = BTreeMap::new();
        let _ = values.insert(SCHEMA_VERSION_KEY.to_string(), Some("2".to_string()));
        store::set_metadata(&rw, &values).unwrap();
        rw.commit().unwrap();

        assert_eq!(run_migrations(&db).unwrap(), 0);
        assert_eq!(current_version(&db).unwrap(), 2);
        let r = db.r_transaction().unwrap();
        let markers: Vec<String> = (1..=latest_version()).map(migration_marker_key).collect();
        assert!(store::get_metadata(&r, &markers).unwrap().is_empty());
    }

    #[test]
    fn newer_schema_is_rejected() {
        let db = open();
        let rw = db.rw_transaction().unwrap();
        let mut values = BTreeMap::new();
        let _ = values.insert(SCHEMA_VERSION_KEY.to_string(), Some("99".to_string()));
        store::set_metadata(&rw, &values).unwrap();
        rw.commit().unwrap();

        assert_matches!(run_migrations(&db), Err(StoreError::Migration { message }) if message.contains("v99"));
    }

    #[test]
    fn v2_backfills_component_index() {
        let db = open();
        assert_eq!(run_migrations_to(&db, 1).unwrap(), 1);

        // An entity written before the index existed.
        let ingest = Event::new(
            "t1",
            1,
            EventPayload::TaskIngest {
                spec: serde_json::json!({}),
                provenance: None,
                metadata: BTreeMap::new(),
                component_ids: vec!["main".into()],
                due_timestamp_millis: Some(100),
            },
        );
        let record = fold(&[ingest], None).unwrap();
        let rw = db.rw_transaction().unwrap();
        rw.insert(StoredEntity::from_record(&record, 1).unwrap()).unwrap();
        rw.commit().unwrap();

        let query = EntityQuery::new(EntityType::Task).due(ComparisonOperator::Le, 100);
        let before = store::list_entities(&db.r_transaction().unwrap(), &query).unwrap();
        assert!(before.is_empty());

        assert_eq!(run_migrations(&db).unwrap(), 1);
        let after = store::list_entities(&db.r_transaction().unwrap(), &query).unwrap();
        assert_eq!(after, vec![record]);
    }
}
