//! Entity shapes and the materialized [`EntityRecord`].
//!
//! Entities are only ever produced by folding events (see [`crate::reducer`]).
//! The serialized form is camelCase JSON with a `type` discriminator; the
//! storage backends persist exactly this JSON as the entity payload.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{ComponentId, EntityId, EventId};

/// Discriminator for entity variants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityType {
    /// A reviewable task (flashcard-like prompt).
    Task,
    /// A reference to an attachment blob stored elsewhere.
    AttachmentReference,
}

impl EntityType {
    /// All entity types, in declaration order.
    pub const ALL: [EntityType; 2] = [EntityType::Task, EntityType::AttachmentReference];

    /// Wire name, identical to the serialized `type` tag.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::AttachmentReference => "attachmentReference",
        }
    }

    /// Parse a wire name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scheduling state of one task component.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskComponentState {
    /// When the component was created.
    pub created_at_timestamp_millis: i64,
    /// When the component was last reviewed, if ever.
    #[serde(default)]
    pub last_repetition_timestamp_millis: Option<i64>,
    /// When the component is next due for review.
    pub due_timestamp_millis: i64,
    /// Current review interval chosen by the scheduler.
    pub interval_millis: i64,
}

/// A reviewable task.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Task identifier.
    pub id: EntityId,
    /// Timestamp of the ingest event.
    pub created_at_timestamp_millis: i64,
    /// Logical deletion flag.
    #[serde(default)]
    pub is_deleted: bool,
    /// Prompt content; opaque to the store.
    pub spec: Value,
    /// Where the task came from; opaque to the store.
    #[serde(default)]
    pub provenance: Option<Value>,
    /// Free-form string metadata.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// Per-component scheduling state.
    pub component_states: BTreeMap<ComponentId, TaskComponentState>,
}

/// Reference to an attachment whose bytes live outside the store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentReference {
    /// Attachment identifier.
    pub id: EntityId,
    /// Timestamp of the ingest event.
    pub created_at_timestamp_millis: i64,
    /// MIME type of the attachment, e.g. `image/png`.
    pub mime_type: String,
}

/// An event-derived aggregate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Entity {
    /// See [`Task`].
    Task(Task),
    /// See [`AttachmentReference`].
    AttachmentReference(AttachmentReference),
}

impl Entity {
    /// The entity's identifier.
    #[must_use]
    pub fn id(&self) -> &EntityId {
        match self {
            Self::Task(task) => &task.id,
            Self::AttachmentReference(attachment) => &attachment.id,
        }
    }

    /// The entity's type tag.
    #[must_use]
    pub fn entity_type(&self) -> EntityType {
        match self {
            Self::Task(_) => EntityType::Task,
            Self::AttachmentReference(_) => EntityType::AttachmentReference,
        }
    }

    /// Borrow as a task, if it is one.
    #[must_use]
    pub fn as_task(&self) -> Option<&Task> {
        match self {
            Self::Task(task) => Some(task),
            Self::AttachmentReference(_) => None,
        }
    }

    /// `(component, due)` pairs feeding the derived due-time index.
    ///
    /// Deleted tasks and non-task entities contribute nothing.
    #[must_use]
    pub fn due_index_entries(&self) -> Vec<(&ComponentId, i64)> {
        match self {
            Self::Task(task) if !task.is_deleted => task
                .component_states
                .iter()
                .map(|(id, state)| (id, state.due_timestamp_millis))
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Materialized entity state plus provenance of the last folded event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRecord {
    /// Current entity state.
    pub entity: Entity,
    /// ID of the most recently folded event.
    #[serde(rename = "lastEventID")]
    pub last_event_id: EventId,
    /// Timestamp of that event.
    pub last_event_timestamp_millis: i64,
}

impl EntityRecord {
    /// Whether an event with the given order key sorts before this record's
    /// last folded event, i.e. it was delivered out of order.
    #[must_use]
    pub fn precedes_last_event(&self, timestamp_millis: i64, event_id: &EventId) -> bool {
        (timestamp_millis, event_id) < (self.last_event_timestamp_millis, &self.last_event_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn task(deleted: bool) -> Entity {
        let mut components = BTreeMap::new();
        let _ = components.insert(
            ComponentId::from("main"),
            TaskComponentState {
                created_at_timestamp_millis: 10,
                last_repetition_timestamp_millis: None,
                due_timestamp_millis: 100,
                interval_millis: 0,
            },
        );
        Entity::Task(Task {
            id: EntityId::from("task-1"),
            created_at_timestamp_millis: 10,
            is_deleted: deleted,
            spec: json!({"type": "memory", "body": "2 + 2?"}),
            provenance: None,
            metadata: BTreeMap::new(),
            component_states: components,
        })
    }

    #[test]
    fn task_wire_format() {
        let value = serde_json::to_value(task(false)).unwrap();
        assert_eq!(value["type"], "task");
        assert_eq!(value["id"], "task-1");
        assert_eq!(value["isDeleted"], false);
        assert_eq!(value["componentStates"]["main"]["dueTimestampMillis"], 100);
    }

    #[test]
    fn entity_round_trips_through_json() {
        let entity = task(false);
        let text = serde_json::to_string(&entity).unwrap();
        let back: Entity = serde_json::from_str(&text).unwrap();
        assert_eq!(back, entity);
    }

    #[test]
    fn entity_type_names() {
        assert_eq!(EntityType::Task.as_str(), "task");
        assert_eq!(
            EntityType::parse("attachmentReference"),
            Some(EntityType::AttachmentReference)
        );
        assert_eq!(EntityType::parse("bogus"), None);
        assert_eq!(
            serde_json::to_string(&EntityType::AttachmentReference).unwrap(),
            "\"attachmentReference\""
        );
    }

    #[test]
    fn deleted_tasks_have_no_index_entries() {
        assert_eq!(task(false).due_index_entries().len(), 1);
        assert!(task(true).due_index_entries().is_empty());
    }

    #[test]
    fn record_wire_format() {
        let record = EntityRecord {
            entity: task(false),
            last_event_id: EventId::from("e1"),
            last_event_timestamp_millis: 10,
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["lastEventID"], "e1");
        assert_eq!(value["lastEventTimestampMillis"], 10);
    }

    #[test]
    fn precedes_last_event_orders_by_time_then_id() {
        let record = EntityRecord {
            entity: task(false),
            last_event_id: EventId::from("m"),
            last_event_timestamp_millis: 50,
        };
        assert!(record.precedes_last_event(49, &EventId::from("z")));
        assert!(record.precedes_last_event(50, &EventId::from("a")));
        assert!(!record.precedes_last_event(50, &EventId::from("z")));
        assert!(!record.precedes_last_event(51, &EventId::from("a")));
    }
}
