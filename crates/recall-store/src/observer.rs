//! Post-commit notification.
//!
//! Observers run synchronously on the caller's task after a write batch has
//! committed. They see what changed but cannot affect it; a panicking or slow
//! observer is the caller's problem, not the store's.

use tracing::{debug, info};

use recall_core::{EntityId, EntityRecord, EventId};

/// What one committed `put_events` call changed.
#[derive(Debug, Clone, Copy)]
pub struct Commit<'a> {
    /// IDs of events stored for the first time, in submission order.
    pub accepted: &'a [EventId],
    /// Number of submitted events that were already stored or repeated.
    pub duplicates: usize,
    /// Records written by this commit, in first-referenced order.
    pub records: &'a [EntityRecord],
    /// Entities that received an event older than their last folded one.
    /// Such events are still applied in acceptance order.
    pub out_of_order: &'a [EntityId],
}

/// Receives a [`Commit`] after every successful write.
pub trait CommitObserver: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Called once per committed batch.
    fn on_commit(&self, commit: &Commit<'_>);
}

/// Logs each commit through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl CommitObserver for TracingObserver {
    fn name(&self) -> &str {
        "tracing"
    }

    fn on_commit(&self, commit: &Commit<'_>) {
        if commit.accepted.is_empty() {
            debug!(duplicates = commit.duplicates, "commit contained only duplicates");
            return;
        }
        info!(
            accepted = commit.accepted.len(),
            duplicates = commit.duplicates,
            entities = commit.records.len(),
            out_of_order = commit.out_of_order.len(),
            "events committed"
        );
    }
}
