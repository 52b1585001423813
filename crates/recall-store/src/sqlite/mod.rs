//! `SQLite` backend.
//!
//! # Architecture
//!
//! - **[`connection`]**: opens the single connection and applies pragmas
//!   (WAL, busy timeout, cache size) from settings.
//! - **[`migrations`]**: version-tracked schema evolution with a
//!   compare-and-set guard against concurrent migrators.
//! - **[`repositories`]**: stateless repositories, each method takes
//!   `&Connection` and executes SQL.
//! - **[`backend`]**: [`SqliteBackend`], the async [`crate::DatabaseBackend`]
//!   implementation.

pub mod backend;
pub mod connection;
pub mod migrations;
pub mod repositories;

pub use backend::SqliteBackend;
pub use connection::PragmaState;
pub use migrations::{current_version, latest_version, SCHEMA_VERSION_KEY};
