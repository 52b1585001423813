//! The storage contract every engine implements.
//!
//! [`DatabaseBackend`] is engine-agnostic: the [`crate::Database`] façade and
//! the conformance suite only ever see `Arc<dyn DatabaseBackend>`.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;

use recall_core::{EntityId, EntityRecord, Event, EventId};

use crate::errors::Result;
use crate::query::{EntityQuery, EventQuery};

/// Prefix of metadata keys owned by the store itself.
pub const RESERVED_METADATA_PREFIX: &str = "_recall.";

/// Metadata key holding the applied schema version.
pub const SCHEMA_VERSION_KEY: &str = "_recall.schemaVersion";

/// Metadata key recording when migration `version` was applied.
pub fn migration_marker_key(version: u32) -> String {
    format!("_recall.migration.v{version:03}.appliedAtMillis")
}

/// Entity records keyed by entity ID.
pub type RecordMap = HashMap<EntityId, EntityRecord>;

/// Read access to stored events from inside a write transaction.
///
/// Handed to the [`Transformer`] so it can deduplicate against exactly the
/// state the transaction will commit over.
pub trait EventHistory {
    /// The subset of `ids` already stored.
    fn stored_event_ids(&self, ids: &[EventId]) -> Result<HashSet<EventId>>;
}

/// Computes new records from the batch and the current records.
///
/// Receives only records that exist; a missing entity is absent from the map.
/// Must return records only for entities referenced by the batch. An error
/// aborts the transaction and is returned from `update_entities` unchanged.
pub type Transformer =
    Box<dyn FnOnce(&[Event], RecordMap, &dyn EventHistory) -> Result<RecordMap> + Send>;

/// A physical storage engine.
#[async_trait]
pub trait DatabaseBackend: Send + Sync {
    /// Point lookups. Missing IDs are absent from the result.
    async fn get_entities(&self, ids: &[EntityId]) -> Result<RecordMap>;

    /// Atomically persist `events` and the records `transformer` derives.
    ///
    /// Inside one write transaction: load the records of every entity the
    /// batch references, run `transformer`, insert the events (ignoring IDs
    /// already stored) and upsert the returned records. Either everything
    /// commits or nothing does.
    async fn update_entities(&self, events: Vec<Event>, transformer: Transformer) -> Result<()>;

    /// Point lookups. Missing IDs are absent from the result.
    async fn get_events(&self, ids: &[EventId]) -> Result<HashMap<EventId, Event>>;

    /// Events in acceptance order.
    async fn list_events(&self, query: &EventQuery) -> Result<Vec<Event>>;

    /// Entities of one type in insertion order.
    async fn list_entities(&self, query: &EntityQuery) -> Result<Vec<EntityRecord>>;

    /// Values for the given keys. Missing keys are absent from the result.
    async fn get_metadata_values(&self, keys: &[String]) -> Result<HashMap<String, String>>;

    /// Set (`Some`) or delete (`None`) metadata keys, atomically.
    async fn set_metadata_values(&self, values: BTreeMap<String, Option<String>>) -> Result<()>;

    /// Applied schema version, after waiting for the migration.
    async fn schema_version(&self) -> Result<u32>;

    /// Release the engine handle. Every later call, including a second
    /// `close`, fails with [`crate::StoreError::BackendClosed`].
    async fn close(&self) -> Result<()>;
}

/// Distinct entity IDs referenced by `events`, in first-seen order.
pub fn distinct_entity_ids(events: &[Event]) -> Vec<EntityId> {
    let mut seen = HashSet::new();
    events
        .iter()
        .filter(|event| seen.insert(&event.entity_id))
        .map(|event| event.entity_id.clone())
        .collect()
}

/// Reject records for entities the batch does not reference.
pub(crate) fn check_record_scope(
    records: &RecordMap,
    entity_ids: &[EntityId],
) -> std::result::Result<(), String> {
    let referenced: HashSet<&EntityId> = entity_ids.iter().collect();
    match records.keys().find(|id| !referenced.contains(id)) {
        Some(stray) => Err(format!(
            "transformer returned a record for unreferenced entity {stray}"
        )),
        None => Ok(()),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
