//! # recall-core
//!
//! The data model of the recall store, free of any I/O:
//!
//! - **Branded IDs**: `EntityId`, `EventId`, `ComponentId`
//! - **Entities**: `Entity` (tasks and attachment references) and the
//!   materialized `EntityRecord`
//! - **Events**: `Event` with a typed `EventPayload`, content-addressed via
//!   an injectable `EventIdentifier`
//! - **Reducer**: `fold` / `apply_event`, the deterministic left-fold from
//!   events to entity state
//! - **Errors**: `MalformedEventError`

#![deny(unsafe_code)]

pub mod entity;
pub mod errors;
pub mod event;
pub mod identity;
pub mod ids;
pub mod reducer;

pub use entity::{AttachmentReference, Entity, EntityRecord, EntityType, Task, TaskComponentState};
pub use errors::MalformedEventError;
pub use event::{Event, EventPayload, RepetitionOutcome};
pub use identity::{EventIdentifier, Sha256EventIdentifier};
pub use ids::{ComponentId, EntityId, EventId};
pub use reducer::{apply_event, fold};
