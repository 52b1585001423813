//! Error types for the store.
//!
//! [`StoreError`] is the only error type that crosses the public API. Engine
//! errors (`rusqlite`, `native_db`, `serde_json`) are captured internally as
//! [`EngineError`] and flattened into strings with the operation name and the
//! affected entity IDs before they reach callers.

use thiserror::Error;

use recall_core::{EntityId, MalformedEventError};

/// Errors returned by backends and the [`crate::Database`] façade.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum StoreError {
    /// An event could not be folded onto its entity.
    #[error(transparent)]
    MalformedEvent(#[from] MalformedEventError),

    /// A batched write could not commit. Nothing was persisted; the whole
    /// `update_entities` call may be retried.
    #[error("{operation} failed for entities [{}]: {message}", join_ids(.entity_ids))]
    Transaction {
        /// Backend operation that failed.
        operation: &'static str,
        /// Entities touched by the failed batch.
        entity_ids: Vec<EntityId>,
        /// Engine error text.
        message: String,
    },

    /// Schema migration failed; the backend instance is unusable.
    #[error("migration error: {message}")]
    Migration {
        /// Describes which migration failed and why.
        message: String,
    },

    /// An operation was attempted after `close()`.
    #[error("{operation} called on a closed backend")]
    BackendClosed {
        /// The rejected operation.
        operation: &'static str,
    },

    /// A read or bookkeeping operation failed inside the engine.
    #[error("{operation} failed: {message}")]
    Engine {
        /// Backend operation that failed.
        operation: &'static str,
        /// Engine error text.
        message: String,
    },

    /// A stored payload could not be encoded or decoded.
    #[error("{operation} could not (de)serialize a payload: {message}")]
    Serialization {
        /// Backend operation that failed.
        operation: &'static str,
        /// Serializer error text.
        message: String,
    },

    /// Metadata keys under the reserved prefix are managed by the store.
    #[error("metadata key {key:?} is reserved for schema bookkeeping")]
    ReservedMetadataKey {
        /// The rejected key.
        key: String,
    },

    /// The operation did not finish in time. It may still have committed.
    #[error("{operation} timed out after {timeout_ms}ms; outcome unknown")]
    OutcomeUnknown {
        /// The operation that was raced against the timer.
        operation: &'static str,
        /// The timeout that expired.
        timeout_ms: u64,
    },
}

impl StoreError {
    /// Whether retrying the same call can succeed.
    ///
    /// Writes are dedupe-safe, so a failed or timed-out `put_events` may be
    /// resubmitted as-is.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transaction { .. } | Self::OutcomeUnknown { .. } | Self::Engine { .. }
        )
    }
}

fn join_ids(ids: &[EntityId]) -> String {
    ids.iter().map(EntityId::as_str).collect::<Vec<_>>().join(", ")
}

/// Convenience type alias for store results.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Engine-level failure, kept inside the crate.
#[derive(Debug, Error)]
pub(crate) enum EngineError {
    #[error("{0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("{0}")]
    Kv(#[from] native_db::db_type::Error),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Other(String),
}

impl EngineError {
    /// Flatten into a [`StoreError`] for a read or bookkeeping operation.
    pub(crate) fn into_store(self, operation: &'static str) -> StoreError {
        match self {
            Self::Json(e) => StoreError::Serialization {
                operation,
                message: e.to_string(),
            },
            other => StoreError::Engine {
                operation,
                message: other.to_string(),
            },
        }
    }

    /// Flatten into a [`StoreError::Transaction`] for a failed write.
    pub(crate) fn into_transaction(
        self,
        operation: &'static str,
        entity_ids: &[EntityId],
    ) -> StoreError {
        StoreError::Transaction {
            operation,
            entity_ids: entity_ids.to_vec(),
            message: self.to_string(),
        }
    }
}

/// Result alias for engine-level helpers.
pub(crate) type EngineResult<T> = std::result::Result<T, EngineError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
