//! `native_db` models for the key-value backend.
//!
//! Payloads are stored as the same JSON the SQL backend writes, so both
//! engines share one serialize/deserialize boundary. Every ordered key is a
//! string built by [`super::keys`] so that byte order equals logical order.

use std::sync::OnceLock;

use native_db::*;
use native_model::{native_model, Model};
use serde::{Deserialize, Serialize};

use recall_core::{EntityRecord, EntityType, Event, EventId};

use super::keys;
use crate::errors::{EngineError, EngineResult};

static MODELS: OnceLock<Models> = OnceLock::new();

/// The model registry every KV database is opened with.
pub fn models() -> EngineResult<&'static Models> {
    if let Some(models) = MODELS.get() {
        return Ok(models);
    }
    let mut models = Models::new();
    models.define::<StoredEntity>()?;
    models.define::<StoredEvent>()?;
    models.define::<StoredTaskComponent>()?;
    models.define::<StoredMetadata>()?;
    models.define::<StoredSequence>()?;
    Ok(MODELS.get_or_init(|| models))
}

/// One entity aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[native_model(id = 1, version = 1)]
#[native_db]
pub struct StoredEntity {
    /// Primary key - entity ID.
    #[primary_key]
    pub id: String,
    /// Global insertion order.
    #[secondary_key(unique)]
    pub sequence_key: String,
    /// `{type}/{sequence}`: type filter plus insertion order.
    #[secondary_key]
    pub type_order: String,
    /// Insertion-order sequence, assigned once on first write.
    pub sequence: u64,
    /// Entity type tag.
    pub entity_type: String,
    /// ID of the last folded event.
    pub last_event_id: String,
    /// Timestamp of the last folded event.
    pub last_event_timestamp_millis: i64,
    /// Entity payload JSON.
    pub data: String,
}

impl StoredEntity {
    /// Encode a record at the given insertion sequence.
    pub fn from_record(record: &EntityRecord, sequence: u64) -> EngineResult<Self> {
        let entity_type = record.entity.entity_type();
        Ok(Self {
            id: record.entity.id().to_string(),
            sequence_key: keys::sequence_key(sequence),
            type_order: keys::entity_type_key(entity_type, sequence),
            sequence,
            entity_type: entity_type.as_str().to_string(),
            last_event_id: record.last_event_id.to_string(),
            last_event_timestamp_millis: record.last_event_timestamp_millis,
            data: serde_json::to_string(&record.entity)?,
        })
    }

    /// Decode into a record.
    pub fn to_record(&self) -> EngineResult<EntityRecord> {
        let entity: recall_core::Entity = serde_json::from_str(&self.data)?;
        if entity.id().as_str() != self.id {
            return Err(EngineError::Other(format!(
                "entity {} holds the payload of {}",
                self.id,
                entity.id()
            )));
        }
        Ok(EntityRecord {
            entity,
            last_event_id: EventId::from(self.last_event_id.clone()),
            last_event_timestamp_millis: self.last_event_timestamp_millis,
        })
    }

    /// Whether this entity has the given type.
    pub fn is_type(&self, entity_type: EntityType) -> bool {
        self.entity_type == entity_type.as_str()
    }
}

/// One accepted event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[native_model(id = 2, version = 1)]
#[native_db]
pub struct StoredEvent {
    /// Primary key - content-derived event ID.
    #[primary_key]
    pub id: String,
    /// Global acceptance order.
    #[secondary_key(unique)]
    pub sequence_key: String,
    /// `{entityID}\0{sequence}`: per-entity acceptance order.
    #[secondary_key]
    pub entity_order: String,
    /// Acceptance sequence.
    pub sequence: u64,
    /// Target entity.
    pub entity_id: String,
    /// Full event JSON.
    pub data: String,
}

impl StoredEvent {
    /// Encode an event at the given acceptance sequence.
    pub fn from_event(event: &Event, sequence: u64) -> EngineResult<Self> {
        Ok(Self {
            id: event.id.to_string(),
            sequence_key: keys::sequence_key(sequence),
            entity_order: keys::entity_event_key(&event.entity_id, sequence),
            sequence,
            entity_id: event.entity_id.to_string(),
            data: serde_json::to_string(event)?,
        })
    }

    /// Decode the event.
    pub fn to_event(&self) -> EngineResult<Event> {
        Ok(serde_json::from_str(&self.data)?)
    }
}

/// Derived due-time index row for one live task component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[native_model(id = 3, version = 1)]
#[native_db]
pub struct StoredTaskComponent {
    /// Primary key - `{taskID}\0{componentID}`.
    #[primary_key]
    pub id: String,
    /// `{due}\0{entitySequence}\0{componentID}`, ordered by due time.
    #[secondary_key]
    pub due_order: String,
    /// Owning task.
    pub task_id: String,
    /// Due time of the component.
    pub due_timestamp_millis: i64,
}

/// One metadata entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[native_model(id = 4, version = 1)]
#[native_db]
pub struct StoredMetadata {
    /// Primary key - metadata key.
    #[primary_key]
    pub key: String,
    /// Metadata value.
    pub value: String,
}

/// A monotonic counter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[native_model(id = 5, version = 1)]
#[native_db]
pub struct StoredSequence {
    /// Primary key - counter name.
    #[primary_key]
    pub name: String,
    /// Last value handed out.
    pub value: u64,
}

/// Counter names.
pub const ENTITY_SEQUENCE: &str = "entities";
/// Counter names.
pub const EVENT_SEQUENCE: &str = "events";
