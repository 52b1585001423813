//! Key-value backend on `native_db` (embedded `redb`).
//!
//! # Architecture
//!
//! - **[`models`]**: the stored models and their ordered secondary keys.
//! - **[`keys`]**: string key encodings whose byte order is the logical
//!   order (insertion sequence, due time).
//! - **[`store`]**: reads over `RTransaction` and the write-path steps over
//!   `RwTransaction`.
//! - **[`migrations`]**: versioned data steps sharing the `SQLite` backend's
//!   metadata keys.
//! - **[`backend`]**: [`KvBackend`], the async [`crate::DatabaseBackend`]
//!   implementation.

pub mod backend;
pub mod keys;
pub mod migrations;
pub mod models;
pub mod store;

pub use backend::KvBackend;
pub use migrations::{current_version, latest_version};
