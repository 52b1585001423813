//! # recall-store
//!
//! Persistence for the recall entity store, behind one engine-agnostic
//! contract:
//!
//! - **[`DatabaseBackend`]**: the async storage contract, implemented by
//!   [`SqliteBackend`] (`rusqlite`) and [`KvBackend`] (`native_db`)
//! - **[`query`]**: structured entity/event queries and their compilers
//! - **[`Database`]**: the façade applications use; dedupes, folds and
//!   notifies [`CommitObserver`]s
//! - **[`with_timeout`]**: races a call against a timer
//!
//! Engine errors never leave this crate: everything surfaces as
//! [`StoreError`].

#![deny(unsafe_code)]

pub mod attachment;
pub mod backend;
pub mod database;
pub mod errors;
pub mod kv;
pub mod observer;
pub mod query;
pub mod sqlite;
pub mod timeout;

pub use attachment::AttachmentResolver;
pub use backend::{
    distinct_entity_ids, migration_marker_key, DatabaseBackend, EventHistory, RecordMap,
    Transformer, RESERVED_METADATA_PREFIX, SCHEMA_VERSION_KEY,
};
pub use database::Database;
pub use errors::{Result, StoreError};
pub use kv::KvBackend;
pub use observer::{Commit, CommitObserver, TracingObserver};
pub use query::{
    ComparisonOperator, EntityPredicate, EntityQuery, EventPredicate, EventQuery,
};
pub use sqlite::SqliteBackend;
pub use timeout::with_timeout;
