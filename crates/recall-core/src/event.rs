//! Immutable, content-addressed events.
//!
//! Each [`Event`] targets exactly one entity. The wire form is a flat JSON
//! object: `{ "id", "entityID", "timestampMillis", "type", ...payload }`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entity::EntityType;
use crate::ids::{ComponentId, EntityId, EventId};
use crate::identity::{EventIdentifier, Sha256EventIdentifier};

/// Outcome of a review, as reported by the scheduler.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RepetitionOutcome {
    /// The learner recalled the prompt.
    Remembered,
    /// The learner did not recall the prompt.
    Forgotten,
    /// The learner skipped the prompt.
    Skipped,
}

fn default_component_ids() -> Vec<ComponentId> {
    vec![ComponentId::from("main")]
}

/// The state change an event describes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EventPayload {
    /// Create a task.
    #[serde(rename_all = "camelCase")]
    TaskIngest {
        /// Prompt content.
        spec: Value,
        /// Origin of the task.
        #[serde(default)]
        provenance: Option<Value>,
        /// Initial metadata.
        #[serde(default)]
        metadata: BTreeMap<String, String>,
        /// Components to create.
        #[serde(rename = "componentIDs", default = "default_component_ids")]
        component_ids: Vec<ComponentId>,
        /// Initial due time; defaults to the event timestamp.
        #[serde(default)]
        due_timestamp_millis: Option<i64>,
    },
    /// Record a review and the scheduler's resulting decision.
    #[serde(rename_all = "camelCase")]
    TaskRepetition {
        /// Reviewed component.
        #[serde(rename = "componentID")]
        component_id: ComponentId,
        /// Review session the repetition belongs to.
        #[serde(rename = "reviewSessionID")]
        review_session_id: String,
        /// Outcome reported by the learner.
        outcome: RepetitionOutcome,
        /// Next due time chosen by the scheduler.
        new_due_timestamp_millis: i64,
        /// Next interval chosen by the scheduler.
        new_interval_millis: i64,
    },
    /// Move a component's due time.
    #[serde(rename_all = "camelCase")]
    TaskReschedule {
        /// Rescheduled component.
        #[serde(rename = "componentID")]
        component_id: ComponentId,
        /// New due time.
        new_due_timestamp_millis: i64,
    },
    /// Set or clear the logical deletion flag.
    #[serde(rename_all = "camelCase")]
    TaskUpdateDeleted {
        /// New flag value.
        is_deleted: bool,
    },
    /// Replace the task content.
    TaskUpdateSpec {
        /// New content.
        spec: Value,
    },
    /// Replace the task provenance.
    TaskUpdateProvenance {
        /// New provenance; `null` clears it.
        provenance: Option<Value>,
    },
    /// Set (`Some`) or remove (`None`) metadata keys.
    TaskUpdateMetadata {
        /// Per-key updates.
        metadata: BTreeMap<String, Option<String>>,
    },
    /// Create an attachment reference.
    #[serde(rename_all = "camelCase")]
    AttachmentIngest {
        /// MIME type of the attachment.
        mime_type: String,
    },
}

impl EventPayload {
    /// Wire name of the event type.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::TaskIngest { .. } => "taskIngest",
            Self::TaskRepetition { .. } => "taskRepetition",
            Self::TaskReschedule { .. } => "taskReschedule",
            Self::TaskUpdateDeleted { .. } => "taskUpdateDeleted",
            Self::TaskUpdateSpec { .. } => "taskUpdateSpec",
            Self::TaskUpdateProvenance { .. } => "taskUpdateProvenance",
            Self::TaskUpdateMetadata { .. } => "taskUpdateMetadata",
            Self::AttachmentIngest { .. } => "attachmentIngest",
        }
    }

    /// Entity type this payload applies to.
    #[must_use]
    pub const fn target_type(&self) -> EntityType {
        match self {
            Self::AttachmentIngest { .. } => EntityType::AttachmentReference,
            _ => EntityType::Task,
        }
    }

    /// Whether this payload can create its entity.
    #[must_use]
    pub const fn is_ingest(&self) -> bool {
        matches!(self, Self::TaskIngest { .. } | Self::AttachmentIngest { .. })
    }
}

/// An immutable fact about one entity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Content-derived identifier.
    pub id: EventId,
    /// The entity this event mutates.
    #[serde(rename = "entityID")]
    pub entity_id: EntityId,
    /// When the event happened, in Unix milliseconds.
    pub timestamp_millis: i64,
    /// The state change.
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl Event {
    /// Build an event whose ID is computed with [`Sha256EventIdentifier`].
    #[must_use]
    pub fn new(entity_id: impl Into<EntityId>, timestamp_millis: i64, payload: EventPayload) -> Self {
        Self::with_identifier(&Sha256EventIdentifier, entity_id, timestamp_millis, payload)
    }

    /// Build an event whose ID is computed by `identifier`.
    #[must_use]
    pub fn with_identifier(
        identifier: &dyn EventIdentifier,
        entity_id: impl Into<EntityId>,
        timestamp_millis: i64,
        payload: EventPayload,
    ) -> Self {
        let entity_id = entity_id.into();
        let id = identifier.event_id(&entity_id, timestamp_millis, &payload);
        Self {
            id,
            entity_id,
            timestamp_millis,
            payload,
        }
    }

    /// Fold order key: timestamp first, ID as tiebreaker.
    #[must_use]
    pub fn order_key(&self) -> (i64, &EventId) {
        (self.timestamp_millis, &self.id)
    }
}
