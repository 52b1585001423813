//! Reads and writes against `native_db` transactions.
//!
//! Read operations take an [`RTransaction`]; everything the write path needs
//! takes the open [`RwTransaction`] so the transformer sees uncommitted state.
//! Scans are always collected before the next write: `redb` keeps a table
//! open for as long as its iterator lives.

use std::collections::{BTreeMap, HashMap, HashSet};

use native_db::transaction::{RTransaction, RwTransaction};

use recall_core::{EntityId, EntityRecord, Event, EventId};

use super::keys;
use super::models::{
    StoredEntity, StoredEntityKey, StoredEvent, StoredEventKey, StoredMetadata, StoredSequence,
    StoredTaskComponent, StoredTaskComponentKey, ENTITY_SEQUENCE, EVENT_SEQUENCE,
};
use crate::backend::RecordMap;
use crate::errors::EngineResult;
use crate::query::{EntityPredicate, EntityQuery, EventPredicate, EventQuery};

fn limit_of(limit: Option<u32>) -> usize {
    limit.map_or(usize::MAX, |l| usize::try_from(l).unwrap_or(usize::MAX))
}

// ─────────────────────────────────────────────────────────────────────────────
// Reads
// ─────────────────────────────────────────────────────────────────────────────

/// Records for the given IDs; missing IDs are absent.
pub fn get_entities(r: &RTransaction<'_>, ids: &[EntityId]) -> EngineResult<RecordMap> {
    let mut records = RecordMap::with_capacity(ids.len());
    for id in ids {
        let stored: Option<StoredEntity> = r.get().primary(id.to_string())?;
        if let Some(stored) = stored {
            let _ = records.insert(id.clone(), stored.to_record()?);
        }
    }
    Ok(records)
}

/// Entities of one type in insertion order.
pub fn list_entities(r: &RTransaction<'_>, query: &EntityQuery) -> EngineResult<Vec<EntityRecord>> {
    let after_sequence = match &query.after_id {
        Some(id) => {
            let cursor: Option<StoredEntity> = r.get().primary(id.to_string())?;
            match cursor {
                Some(cursor) => Some(cursor.sequence),
                None => return Ok(Vec::new()),
            }
        }
        None => None,
    };
    let limit = limit_of(query.limit);

    let stored: Vec<StoredEntity> = match query.predicate {
        None => {
            let scan = r.scan().secondary::<StoredEntity>(StoredEntityKey::type_order)?;
            let rows = scan
                .range(keys::entity_type_range(query.entity_type, after_sequence))?
                .take(limit)
                .collect::<Result<Vec<_>, _>>()?;
            rows
        }
        Some(EntityPredicate::DueTimestampMillis(op, value)) => {
            let components: Vec<StoredTaskComponent> = {
                let scan = r
                    .scan()
                    .secondary::<StoredTaskComponent>(StoredTaskComponentKey::due_order)?;
                let rows = scan
                    .range(keys::due_range(op, value))?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            };
            let mut seen = HashSet::new();
            let mut matched = Vec::new();
            for component in components {
                debug_assert!(op.matches(component.due_timestamp_millis, value));
                if !seen.insert(component.task_id.clone()) {
                    continue;
                }
                let entity: Option<StoredEntity> = r.get().primary(component.task_id)?;
                if let Some(entity) = entity.filter(|e| {
                    e.is_type(query.entity_type) && after_sequence.map_or(true, |s| e.sequence > s)
                }) {
                    matched.push(entity);
                }
            }
            matched.sort_by_key(|e| e.sequence);
            matched.truncate(limit);
            matched
        }
    };

    stored.iter().map(StoredEntity::to_record).collect()
}

/// Events for the given IDs; missing IDs are absent.
pub fn get_events(r: &RTransaction<'_>, ids: &[EventId]) -> EngineResult<HashMap<EventId, Event>> {
    let mut events = HashMap::with_capacity(ids.len());
    for id in ids {
        let stored: Option<StoredEvent> = r.get().primary(id.to_string())?;
        if let Some(stored) = stored {
            let _ = events.insert(id.clone(), stored.to_event()?);
        }
    }
    Ok(events)
}

/// Events in acceptance order.
pub fn list_events(r: &RTransaction<'_>, query: &EventQuery) -> EngineResult<Vec<Event>> {
    let after_sequence = match &query.after_id {
        Some(id) => {
            let cursor: Option<StoredEvent> = r.get().primary(id.to_string())?;
            match cursor {
                Some(cursor) => Some(cursor.sequence),
                None => return Ok(Vec::new()),
            }
        }
        None => None,
    };
    let limit = limit_of(query.limit);

    let stored: Vec<StoredEvent> = match &query.predicate {
        Some(EventPredicate::EntityId(entity_id)) => {
            let scan = r.scan().secondary::<StoredEvent>(StoredEventKey::entity_order)?;
            let rows = scan
                .range(keys::entity_event_range(entity_id, after_sequence))?
                .take(limit)
                .collect::<Result<Vec<_>, _>>()?;
            rows
        }
        None => {
            let scan = r.scan().secondary::<StoredEvent>(StoredEventKey::sequence_key)?;
            let rows = scan
                .range(keys::sequence_range(after_sequence))?
                .take(limit)
                .collect::<Result<Vec<_>, _>>()?;
            rows
        }
    };

    stored.iter().map(StoredEvent::to_event).collect()
}

/// Metadata values for the given keys; missing keys are absent.
pub fn get_metadata(r: &RTransaction<'_>, keys: &[String]) -> EngineResult<HashMap<String, String>> {
    let mut values = HashMap::with_capacity(keys.len());
    for key in keys {
        let stored: Option<StoredMetadata> = r.get().primary(key.clone())?;
        if let Some(stored) = stored {
            let _ = values.insert(stored.key, stored.value);
        }
    }
    Ok(values)
}

// ─────────────────────────────────────────────────────────────────────────────
// Write transaction
// ─────────────────────────────────────────────────────────────────────────────

/// Current records of the given entities, as seen by the write transaction.
pub fn load_entities(rw: &RwTransaction<'_>, ids: &[EntityId]) -> EngineResult<RecordMap> {
    let mut records = RecordMap::with_capacity(ids.len());
    for id in ids {
        let stored: Option<StoredEntity> = rw.get().primary(id.to_string())?;
        if let Some(stored) = stored {
            let _ = records.insert(id.clone(), stored.to_record()?);
        }
    }
    Ok(records)
}

/// The subset of `ids` already stored.
pub fn stored_event_ids(rw: &RwTransaction<'_>, ids: &[EventId]) -> EngineResult<HashSet<EventId>> {
    let mut found = HashSet::new();
    for id in ids {
        let stored: Option<StoredEvent> = rw.get().primary(id.to_string())?;
        if stored.is_some() {
            let _ = found.insert(id.clone());
        }
    }
    Ok(found)
}

/// Insert events whose IDs are not stored yet. Returns how many were new.
pub fn insert_events(rw: &RwTransaction<'_>, events: &[Event]) -> EngineResult<usize> {
    let mut sequence = read_counter(rw, EVENT_SEQUENCE)?;
    let mut inserted = 0;
    for event in events {
        // The transaction sees its own inserts, which covers in-batch repeats.
        let existing: Option<StoredEvent> = rw.get().primary(event.id.to_string())?;
        if existing.is_some() {
            continue;
        }
        sequence += 1;
        rw.insert(StoredEvent::from_event(event, sequence)?)?;
        inserted += 1;
    }
    write_counter(rw, EVENT_SEQUENCE, sequence)?;
    Ok(inserted)
}

/// Upsert records in the given order and rebuild their due-index rows.
///
/// An existing entity keeps its insertion sequence; a new one takes the next.
pub fn upsert_records(rw: &RwTransaction<'_>, records: &[&EntityRecord]) -> EngineResult<usize> {
    let mut next = read_counter(rw, ENTITY_SEQUENCE)?;
    for record in records {
        let id = record.entity.id();
        let existing: Option<StoredEntity> = rw.get().primary(id.to_string())?;
        let sequence = match existing {
            Some(existing) => existing.sequence,
            None => {
                next += 1;
                next
            }
        };
        let _ = rw.upsert(StoredEntity::from_record(record, sequence)?)?;
        replace_components(rw, record, sequence)?;
    }
    write_counter(rw, ENTITY_SEQUENCE, next)?;
    Ok(records.len())
}

/// Replace the due-index rows of one entity with its current components.
pub fn replace_components(
    rw: &RwTransaction<'_>,
    record: &EntityRecord,
    entity_sequence: u64,
) -> EngineResult<()> {
    let task_id = record.entity.id();
    let stale: Vec<StoredTaskComponent> = {
        let scan = rw.scan().primary::<StoredTaskComponent>()?;
        let rows = scan
            .range(keys::component_prefix_range(task_id))?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };
    for row in stale {
        let _ = rw.remove(row)?;
    }
    for (component_id, due) in record.entity.due_index_entries() {
        rw.insert(StoredTaskComponent {
            id: keys::component_key(task_id, component_id),
            due_order: keys::due_key(due, entity_sequence, component_id),
            task_id: task_id.to_string(),
            due_timestamp_millis: due,
        })?;
    }
    Ok(())
}

/// Every stored entity, in primary-key order.
pub fn all_entities(rw: &RwTransaction<'_>) -> EngineResult<Vec<StoredEntity>> {
    let scan = rw.scan().primary::<StoredEntity>()?;
    let rows = scan.all()?.collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Set (`Some`) or delete (`None`) metadata keys.
pub fn set_metadata(
    rw: &RwTransaction<'_>,
    values: &BTreeMap<String, Option<String>>,
) -> EngineResult<()> {
    for (key, value) in values {
        match value {
            Some(value) => {
                let _ = rw.upsert(StoredMetadata {
                    key: key.clone(),
                    value: value.clone(),
                })?;
            }
            None => {
                let existing: Option<StoredMetadata> = rw.get().primary(key.clone())?;
                if let Some(existing) = existing {
                    let _ = rw.remove(existing)?;
                }
            }
        }
    }
    Ok(())
}

/// One metadata value, as seen by the write transaction.
pub fn read_metadata(rw: &RwTransaction<'_>, key: &str) -> EngineResult<Option<String>> {
    let stored: Option<StoredMetadata> = rw.get().primary(key.to_string())?;
    Ok(stored.map(|s| s.value))
}

fn read_counter(rw: &RwTransaction<'_>, name: &str) -> EngineResult<u64> {
    let stored: Option<StoredSequence> = rw.get().primary(name.to_string())?;
    Ok(stored.map_or(0, |s| s.value))
}

fn write_counter(rw: &RwTransaction<'_>, name: &str, value: u64) -> EngineResult<()> {
    let _ = rw.upsert(StoredSequence {
        name: name.to_string(),
        value,
    })?;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
