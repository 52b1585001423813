//! Error types for the entity/event model.

use thiserror::Error;

use crate::entity::EntityType;
use crate::ids::{ComponentId, EntityId, EventId};

/// An event cannot be applied to the entity it targets.
///
/// Never retried: resubmitting the same event fails the same way.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum MalformedEventError {
    /// The event targets a different entity than the one being folded.
    #[error("event {event_id} targets entity {found}, but entity {expected} is being folded")]
    EntityMismatch {
        /// Offending event.
        event_id: EventId,
        /// Entity being folded.
        expected: EntityId,
        /// Entity named by the event.
        found: EntityId,
    },

    /// The event type does not apply to the existing entity's type.
    #[error("event {event_id} ({event_type}) cannot apply to {entity_type} entity {entity_id}")]
    TypeMismatch {
        /// Offending event.
        event_id: EventId,
        /// Wire name of the event type.
        event_type: &'static str,
        /// Target entity.
        entity_id: EntityId,
        /// Type of the existing entity.
        entity_type: EntityType,
    },

    /// A non-ingest event targets an entity that does not exist yet.
    #[error("event {event_id} ({event_type}) targets missing entity {entity_id}")]
    MissingEntity {
        /// Offending event.
        event_id: EventId,
        /// Wire name of the event type.
        event_type: &'static str,
        /// Target entity.
        entity_id: EntityId,
    },

    /// A component-scoped event names a component the task does not have.
    #[error("event {event_id} references unknown component {component_id} of task {entity_id}")]
    UnknownComponent {
        /// Offending event.
        event_id: EventId,
        /// Target task.
        entity_id: EntityId,
        /// Missing component.
        component_id: ComponentId,
    },

    /// The declared event ID does not match the event's contents.
    #[error("event {event_id} does not match its contents (computed {computed})")]
    IdMismatch {
        /// Declared ID.
        event_id: EventId,
        /// ID derived from the contents.
        computed: EventId,
    },

    /// Nothing to fold and no prior record to return.
    #[error("cannot fold an empty event sequence without a prior record")]
    Empty,
}

/// Convenience alias for fold results.
pub type Result<T> = std::result::Result<T, MalformedEventError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_mismatch_display() {
        let err = MalformedEventError::EntityMismatch {
            event_id: "e1".into(),
            expected: "task-1".into(),
            found: "task-2".into(),
        };
        assert_eq!(
            err.to_string(),
            "event e1 targets entity task-2, but entity task-1 is being folded"
        );
    }

    #[test]
    fn type_mismatch_display() {
        let err = MalformedEventError::TypeMismatch {
            event_id: "e1".into(),
            event_type: "taskReschedule",
            entity_id: "att-1".into(),
            entity_type: EntityType::AttachmentReference,
        };
        assert_eq!(
            err.to_string(),
            "event e1 (taskReschedule) cannot apply to attachmentReference entity att-1"
        );
    }

    #[test]
    fn empty_display() {
        assert_eq!(
            MalformedEventError::Empty.to_string(),
            "cannot fold an empty event sequence without a prior record"
        );
    }
}
