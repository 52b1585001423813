//! The pure fold from events to entity state.
//!
//! [`apply_event`] is a single step; [`fold`] threads a sequence of events
//! through it and tracks provenance. Both are deterministic and perform no
//! I/O. Ordering is the caller's responsibility.

use crate::entity::{AttachmentReference, Entity, EntityRecord, Task, TaskComponentState};
use crate::errors::{MalformedEventError, Result};
use crate::event::{Event, EventPayload};
use crate::ids::ComponentId;

/// Apply one event to the current state of its entity.
pub fn apply_event(prior: Option<&Entity>, event: &Event) -> Result<Entity> {
    let payload = &event.payload;

    if let Some(entity) = prior {
        if entity.id() != &event.entity_id {
            return Err(MalformedEventError::EntityMismatch {
                event_id: event.id.clone(),
                expected: entity.id().clone(),
                found: event.entity_id.clone(),
            });
        }
        if entity.entity_type() != payload.target_type() {
            return Err(MalformedEventError::TypeMismatch {
                event_id: event.id.clone(),
                event_type: payload.type_name(),
                entity_id: event.entity_id.clone(),
                entity_type: entity.entity_type(),
            });
        }
    }

    match (prior, payload) {
        // Re-ingesting an existing entity leaves it untouched.
        (Some(entity), p) if p.is_ingest() => Ok(entity.clone()),
        (None, _) => ingest(event).ok_or_else(|| MalformedEventError::MissingEntity {
            event_id: event.id.clone(),
            event_type: payload.type_name(),
            entity_id: event.entity_id.clone(),
        }),
        (Some(Entity::Task(task)), _) => apply_to_task(task.clone(), event).map(Entity::Task),
        (Some(entity @ Entity::AttachmentReference(_)), _) => Err(MalformedEventError::TypeMismatch {
            event_id: event.id.clone(),
            event_type: payload.type_name(),
            entity_id: event.entity_id.clone(),
            entity_type: entity.entity_type(),
        }),
    }
}

/// Fold `events` over `prior`, producing the new record.
///
/// Every event must target the same entity as `prior` (or as the first event
/// when there is no prior record).
pub fn fold(events: &[Event], prior: Option<EntityRecord>) -> Result<EntityRecord> {
    let Some(first) = events.first() else {
        return prior.ok_or(MalformedEventError::Empty);
    };

    let expected = prior
        .as_ref()
        .map_or(&first.entity_id, |record| record.entity.id())
        .clone();

    let mut entity = prior.map(|record| record.entity);
    let mut last = first;
    for event in events {
        if event.entity_id != expected {
            return Err(MalformedEventError::EntityMismatch {
                event_id: event.id.clone(),
                expected,
                found: event.entity_id.clone(),
            });
        }
        entity = Some(apply_event(entity.as_ref(), event)?);
        last = event;
    }

    // The loop ran at least once, so `entity` is populated.
    let entity = entity.ok_or(MalformedEventError::Empty)?;
    Ok(EntityRecord {
        entity,
        last_event_id: last.id.clone(),
        last_event_timestamp_millis: last.timestamp_millis,
    })
}

/// Create the entity an ingest event describes; `None` for any other event.
fn ingest(event: &Event) -> Option<Entity> {
    let entity = match &event.payload {
        EventPayload::AttachmentIngest { mime_type } => {
            Entity::AttachmentReference(AttachmentReference {
                id: event.entity_id.clone(),
                created_at_timestamp_millis: event.timestamp_millis,
                mime_type: mime_type.clone(),
            })
        }
        EventPayload::TaskIngest {
            spec,
            provenance,
            metadata,
            component_ids,
            due_timestamp_millis,
        } => {
            let due = due_timestamp_millis.unwrap_or(event.timestamp_millis);
            let component_states = component_ids
                .iter()
                .map(|id| {
                    (
                        id.clone(),
                        TaskComponentState {
                            created_at_timestamp_millis: event.timestamp_millis,
                            last_repetition_timestamp_millis: None,
                            due_timestamp_millis: due,
                            interval_millis: 0,
                        },
                    )
                })
                .collect();
            Entity::Task(Task {
                id: event.entity_id.clone(),
                created_at_timestamp_millis: event.timestamp_millis,
                is_deleted: false,
                spec: spec.clone(),
                provenance: provenance.clone(),
                metadata: metadata.clone(),
                component_states,
            })
        }
        _ => return None,
    };
    Some(entity)
}

fn apply_to_task(mut task: Task, event: &Event) -> Result<Task> {
    match &event.payload {
        EventPayload::TaskRepetition {
            component_id,
            new_due_timestamp_millis,
            new_interval_millis,
            ..
        } => {
            let state = component_mut(&mut task, event, component_id)?;
            state.last_repetition_timestamp_millis = Some(event.timestamp_millis);
            state.due_timestamp_millis = *new_due_timestamp_millis;
            state.interval_millis = *new_interval_millis;
        }
        EventPayload::TaskReschedule {
            component_id,
            new_due_timestamp_millis,
        } => {
            component_mut(&mut task, event, component_id)?.due_timestamp_millis =
                *new_due_timestamp_millis;
        }
        EventPayload::TaskUpdateDeleted { is_deleted } => task.is_deleted = *is_deleted,
        EventPayload::TaskUpdateSpec { spec } => task.spec = spec.clone(),
        EventPayload::TaskUpdateProvenance { provenance } => task.provenance = provenance.clone(),
        EventPayload::TaskUpdateMetadata { metadata } => {
            for (key, value) in metadata {
                match value {
                    Some(value) => {
                        let _ = task.metadata.insert(key.clone(), value.clone());
                    }
                    None => {
                        let _ = task.metadata.remove(key);
                    }
                }
            }
        }
        EventPayload::TaskIngest { .. } | EventPayload::AttachmentIngest { .. } => {}
    }
    Ok(task)
}

fn component_mut<'a>(
    task: &'a mut Task,
    event: &Event,
    component_id: &ComponentId,
) -> Result<&'a mut TaskComponentState> {
    task.component_states
        .get_mut(component_id)
        .ok_or_else(|| MalformedEventError::UnknownComponent {
            event_id: event.id.clone(),
            entity_id: event.entity_id.clone(),
            component_id: component_id.clone(),
        })
}
