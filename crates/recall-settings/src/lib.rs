//! # recall-settings
//!
//! Configuration for the recall store, loaded from three layers (in priority
//! order):
//! 1. **Compiled defaults**: [`StoreSettings::default()`]
//! 2. **Settings file**: `$RECALL_SETTINGS` or `~/.recall/settings.json`,
//!    deep-merged over the defaults
//! 3. **Environment variables**: `RECALL_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
