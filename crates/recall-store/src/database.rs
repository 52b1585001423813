//! [`Database`]: the application-facing façade over one backend.
//!
//! The façade owns the write semantics the backends stay agnostic of:
//! event ID verification, deduplication against stored history, folding in
//! acceptance order and post-commit notification. Backends only see a
//! [`Transformer`] and persist what it returns.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, instrument};

use recall_core::{
    fold, Entity, EntityId, EntityRecord, Event, EventId, EventIdentifier, MalformedEventError,
};

use crate::attachment::AttachmentResolver;
use crate::backend::{
    DatabaseBackend, EventHistory, RecordMap, Transformer, RESERVED_METADATA_PREFIX,
};
use crate::errors::{Result, StoreError};
use crate::observer::{Commit, CommitObserver, TracingObserver};
use crate::query::{EntityQuery, EventQuery};

/// What the transformer decided, captured for observers and the caller.
#[derive(Debug, Default)]
struct Outcome {
    accepted: Vec<EventId>,
    duplicates: usize,
    records: Vec<EntityRecord>,
    out_of_order: Vec<EntityId>,
}

type OutcomeSlot = Arc<Mutex<Option<Outcome>>>;

/// Event-sourced entity store over an injected backend.
pub struct Database {
    backend: Arc<dyn DatabaseBackend>,
    identifier: Option<Arc<dyn EventIdentifier>>,
    observers: Vec<Arc<dyn CommitObserver>>,
    attachments: Option<Arc<dyn AttachmentResolver>>,
}

impl Database {
    /// Wrap a backend. Commits are logged by a [`TracingObserver`].
    pub fn new(backend: Arc<dyn DatabaseBackend>) -> Self {
        Self {
            backend,
            identifier: None,
            observers: vec![Arc::new(TracingObserver)],
            attachments: None,
        }
    }

    /// Reject events whose declared ID does not match `identifier`.
    #[must_use]
    pub fn with_event_identifier(mut self, identifier: Arc<dyn EventIdentifier>) -> Self {
        self.identifier = Some(identifier);
        self
    }

    /// Notify `observer` after every successful write.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn CommitObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Resolve attachment URLs through `resolver`.
    #[must_use]
    pub fn with_attachment_resolver(mut self, resolver: Arc<dyn AttachmentResolver>) -> Self {
        self.attachments = Some(resolver);
        self
    }

    /// The underlying backend.
    pub fn backend(&self) -> &Arc<dyn DatabaseBackend> {
        &self.backend
    }

    /// Apply `events` atomically and return the records they changed, in
    /// the order the batch first references each entity.
    ///
    /// Events already stored, or repeated within the batch, are skipped.
    /// Submitting only duplicates changes nothing and returns no records.
    #[instrument(skip_all, fields(events = events.len()))]
    pub async fn put_events(&self, events: Vec<Event>) -> Result<Vec<EntityRecord>> {
        if let Some(identifier) = &self.identifier {
            for event in &events {
                identifier.verify(event).map_err(|computed| {
                    StoreError::MalformedEvent(MalformedEventError::IdMismatch {
                        event_id: event.id.clone(),
                        computed,
                    })
                })?;
            }
        }

        let slot: OutcomeSlot = Arc::new(Mutex::new(None));
        self.backend
            .update_entities(events, fold_transformer(Arc::clone(&slot)))
            .await?;

        let outcome = slot.lock().take().unwrap_or_default();
        let commit = Commit {
            accepted: &outcome.accepted,
            duplicates: outcome.duplicates,
            records: &outcome.records,
            out_of_order: &outcome.out_of_order,
        };
        for observer in &self.observers {
            debug!(observer = observer.name(), "notifying commit observer");
            observer.on_commit(&commit);
        }
        Ok(outcome.records)
    }

    /// Point lookups. Missing IDs are absent from the result.
    pub async fn get_entities(&self, ids: &[EntityId]) -> Result<RecordMap> {
        self.backend.get_entities(ids).await
    }

    /// Entities of one type in insertion order.
    pub async fn list_entities(&self, query: &EntityQuery) -> Result<Vec<EntityRecord>> {
        self.backend.list_entities(query).await
    }

    /// Point lookups. Missing IDs are absent from the result.
    pub async fn get_events(&self, ids: &[EventId]) -> Result<HashMap<EventId, Event>> {
        self.backend.get_events(ids).await
    }

    /// Events in acceptance order.
    pub async fn list_events(&self, query: &EventQuery) -> Result<Vec<Event>> {
        self.backend.list_events(query).await
    }

    /// Values for the given keys. Missing keys are absent from the result.
    pub async fn get_metadata_values(&self, keys: &[String]) -> Result<HashMap<String, String>> {
        self.backend.get_metadata_values(keys).await
    }

    /// Set (`Some`) or delete (`None`) metadata keys.
    ///
    /// Keys under `_recall.` belong to schema bookkeeping and are rejected.
    pub async fn set_metadata_values(&self, values: BTreeMap<String, Option<String>>) -> Result<()> {
        if let Some(key) = values.keys().find(|k| k.starts_with(RESERVED_METADATA_PREFIX)) {
            return Err(StoreError::ReservedMetadataKey { key: key.clone() });
        }
        self.backend.set_metadata_values(values).await
    }

    /// URL of a stored attachment reference.
    ///
    /// `None` when no resolver is configured, the entity does not exist, or
    /// it is not an attachment reference.
    pub async fn attachment_url(&self, id: &EntityId) -> Result<Option<String>> {
        let Some(resolver) = &self.attachments else {
            return Ok(None);
        };
        let mut records = self.backend.get_entities(std::slice::from_ref(id)).await?;
        match records.remove(id).map(|r| r.entity) {
            Some(Entity::AttachmentReference(reference)) => {
                Ok(resolver.attachment_url(&reference).await)
            }
            _ => Ok(None),
        }
    }

    /// Applied schema version of the backend.
    pub async fn schema_version(&self) -> Result<u32> {
        self.backend.schema_version().await
    }

    /// Close the backend. Every later call fails.
    pub async fn close(&self) -> Result<()> {
        self.backend.close().await
    }
}

/// The write-path transformer: dedupe, then fold in acceptance order.
fn fold_transformer(slot: OutcomeSlot) -> Transformer {
    Box::new(move |events: &[Event], mut current: RecordMap, history: &dyn EventHistory| -> Result<RecordMap> {
        let ids: Vec<EventId> = events.iter().map(|e| e.id.clone()).collect();
        let stored = history.stored_event_ids(&ids)?;

        let mut seen = HashSet::new();
        let fresh: Vec<&Event> = events
            .iter()
            .filter(|e| !stored.contains(&e.id) && seen.insert(&e.id))
            .collect();

        let mut outcome = Outcome {
            accepted: fresh.iter().map(|e| e.id.clone()).collect(),
            duplicates: events.len() - fresh.len(),
            ..Outcome::default()
        };

        // Group by entity, keeping first-referenced order.
        let mut order: Vec<EntityId> = Vec::new();
        let mut by_entity: HashMap<EntityId, Vec<Event>> = HashMap::new();
        for event in &fresh {
            by_entity
                .entry(event.entity_id.clone())
                .or_insert_with(|| {
                    order.push(event.entity_id.clone());
                    Vec::new()
                })
                .push((*event).clone());
        }

        let mut updated = RecordMap::with_capacity(order.len());
        for entity_id in order {
            let Some(batch) = by_entity.remove(&entity_id) else {
                continue;
            };
            let prior = current.remove(&entity_id);
            if arrives_out_of_order(prior.as_ref(), &batch) {
                debug!(entity_id = %entity_id, "event older than the entity's last event");
                outcome.out_of_order.push(entity_id.clone());
            }

            let record = fold(&batch, prior)?;
            outcome.records.push(record.clone());
            let _ = updated.insert(entity_id, record);
        }

        *slot.lock() = Some(outcome);
        Ok(updated)
    })
}

/// Whether any event sorts before the one folded just ahead of it.
///
/// Provenance on the record covers the first event; the rest compare with
/// their predecessor in the batch.
fn arrives_out_of_order(prior: Option<&EntityRecord>, batch: &[Event]) -> bool {
    let behind_record = match (prior, batch.first()) {
        (Some(record), Some(first)) => record.precedes_last_event(first.timestamp_millis, &first.id),
        _ => false,
    };
    behind_record || batch.windows(2).any(|pair| pair[1].order_key() < pair[0].order_key())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::SqliteBackend;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use recall_core::{AttachmentReference, EventPayload, Sha256EventIdentifier};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn database() -> Database {
        Database::new(Arc::new(SqliteBackend::in_memory().unwrap()))
    }

    fn ingest(entity: &str, at: i64, due: i64) -> Event {
        Event::new(
            entity,
            at,
            EventPayload::TaskIngest {
                spec: serde_json::json!({"prompt": entity}),
                provenance: None,
                metadata: BTreeMap::new(),
                component_ids: vec!["main".into()],
                due_timestamp_millis: Some(due),
            },
        )
    }

    fn reschedule(entity: &str, at: i64, due: i64) -> Event {
        Event::new(
            entity,
            at,
            EventPayload::TaskReschedule {
                component_id: "main".into(),
                new_due_timestamp_millis: due,
            },
        )
    }

    fn due_of(record: &EntityRecord) -> i64 {
        record.entity.as_task().unwrap().component_states[&recall_core::ComponentId::from("main")].due_timestamp_millis
    }

    #[derive(Default)]
    struct Counting {
        commits: AtomicUsize,
        accepted: AtomicUsize,
        out_of_order: AtomicUsize,
    }

    impl CommitObserver for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        fn on_commit(&self, commit: &Commit<'_>) {
            let _ = self.commits.fetch_add(1, Ordering::SeqCst);
            let _ = self.accepted.fetch_add(commit.accepted.len(), Ordering::SeqCst);
            let _ = self
                .out_of_order
                .fetch_add(commit.out_of_order.len(), Ordering::SeqCst);
        }
    }

    struct StaticResolver;

    #[async_trait]
    impl AttachmentResolver for StaticResolver {
        async fn attachment_url(&self, reference: &AttachmentReference) -> Option<String> {
            Some(format!("file:///attachments/{}", reference.id))
        }
    }

    #[tokio::test]
    async fn put_events_returns_changed_records() {
        let db = database();
        let records = db
            .put_events(vec![ingest("b", 1, 100), ingest("a", 2, 200)])
            .await
            .unwrap();
        let ids: Vec<&str> = records.iter().map(|r| r.entity.id().as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);

        let again = db.put_events(vec![ingest("b", 1, 100)]).await.unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn batch_is_folded_in_submission_order() {
        let db = database();
        let records = db
            .put_events(vec![
                ingest("t", 10, 100),
                reschedule("t", 30, 300),
                reschedule("t", 20, 200),
            ])
            .await
            .unwrap();
        assert_eq!(due_of(&records[0]), 200);
        assert_eq!(records[0].last_event_timestamp_millis, 20);
    }

    #[tokio::test]
    async fn skewed_clock_update_applies_after_ingest() {
        let db = database();
        let records = db
            .put_events(vec![ingest("t", 10, 100), reschedule("t", 5, 200)])
            .await
            .unwrap();
        assert_eq!(due_of(&records[0]), 200);
        assert_eq!(records[0].last_event_timestamp_millis, 5);
    }

    #[tokio::test]
    async fn older_event_is_applied_and_reported() {
        let counting = Arc::new(Counting::default());
        let db = database().with_observer(Arc::clone(&counting) as Arc<dyn CommitObserver>);
        let _ = db.put_events(vec![ingest("t", 10, 100)]).await.unwrap();
        let _ = db.put_events(vec![reschedule("t", 30, 300)]).await.unwrap();
        assert_eq!(counting.out_of_order.load(Ordering::SeqCst), 0);

        let records = db.put_events(vec![reschedule("t", 20, 200)]).await.unwrap();
        assert_eq!(due_of(&records[0]), 200);
        assert_eq!(records[0].last_event_timestamp_millis, 20);
        assert_eq!(counting.out_of_order.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn out_of_order_detection() {
        let ingested = fold(&[ingest("t", 10, 100)], None).unwrap();
        assert!(!arrives_out_of_order(None, &[ingest("t", 10, 100)]));
        assert!(!arrives_out_of_order(Some(&ingested), &[reschedule("t", 11, 1)]));
        assert!(arrives_out_of_order(Some(&ingested), &[reschedule("t", 9, 1)]));
        assert!(arrives_out_of_order(
            None,
            &[ingest("t", 10, 100), reschedule("t", 5, 1)]
        ));
    }

    #[tokio::test]
    async fn mismatched_id_is_rejected_before_writing() {
        let db = database().with_event_identifier(Arc::new(Sha256EventIdentifier));
        let mut event = ingest("t", 1, 100);
        event.id = "forged".into();

        let err = db.put_events(vec![event]).await.unwrap_err();
        assert_matches!(
            err,
            StoreError::MalformedEvent(MalformedEventError::IdMismatch { ref event_id, .. })
                if event_id.as_str() == "forged"
        );
        assert!(db.list_events(&EventQuery::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_batch_writes_nothing() {
        let db = database();
        let err = db
            .put_events(vec![ingest("ok", 1, 100), reschedule("missing", 2, 200)])
            .await
            .unwrap_err();
        assert_matches!(
            err,
            StoreError::MalformedEvent(MalformedEventError::MissingEntity { .. })
        );
        assert!(db.get_entities(&["ok".into()]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn observers_see_each_commit() {
        let counting = Arc::new(Counting::default());
        let db = database().with_observer(Arc::clone(&counting) as Arc<dyn CommitObserver>);

        let _ = db.put_events(vec![ingest("t", 1, 100)]).await.unwrap();
        let _ = db
            .put_events(vec![ingest("t", 1, 100), reschedule("t", 2, 5)])
            .await
            .unwrap();

        assert_eq!(counting.commits.load(Ordering::SeqCst), 2);
        assert_eq!(counting.accepted.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn reserved_metadata_keys_are_rejected() {
        let db = database();
        let mut values = BTreeMap::new();
        let _ = values.insert("_recall.schemaVersion".to_string(), Some("0".to_string()));
        assert_matches!(
            db.set_metadata_values(values).await,
            Err(StoreError::ReservedMetadataKey { ref key }) if key == "_recall.schemaVersion"
        );
    }

    #[tokio::test]
    async fn attachment_url_only_for_attachment_references() {
        let db = database().with_attachment_resolver(Arc::new(StaticResolver));
        let attachment = Event::new(
            "img-1",
            1,
            EventPayload::AttachmentIngest {
                mime_type: "image/png".into(),
            },
        );
        let _ = db
            .put_events(vec![attachment, ingest("t", 1, 100)])
            .await
            .unwrap();

        assert_eq!(
            db.attachment_url(&"img-1".into()).await.unwrap().as_deref(),
            Some("file:///attachments/img-1")
        );
        assert_eq!(db.attachment_url(&"t".into()).await.unwrap(), None);
        assert_eq!(db.attachment_url(&"nope".into()).await.unwrap(), None);
    }
}
