//! Repository implementations for `SQLite` operations.
//!
//! Each repository is a stateless struct whose methods take a `&Connection`
//! (or a `Transaction`, which derefs to one). Engine errors come back as
//! [`crate::errors::EngineError`]; the backend attaches operation context.

pub mod entity;
pub mod event;
pub mod metadata;

/// Upper bound on rows per multi-row statement or `IN (...)` list, keeping
/// every statement well under `SQLite`'s bound-parameter limit.
pub const MAX_ROWS_PER_STATEMENT: usize = 400;
