//! Settings error types.

use std::path::PathBuf;

use thiserror::Error;

/// Why settings could not be loaded.
///
/// A missing settings file is not an error; defaults apply.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("cannot read settings file {}: {source}", path.display())]
    Read {
        /// File that was being read.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// The file is not JSON, or does not fit the settings shape once merged
    /// over the defaults.
    #[error("malformed settings: {0}")]
    Malformed(#[from] serde_json::Error),
    /// A backend name other than `sqlite` or `kv`.
    #[error("unknown backend {0:?}, expected \"sqlite\" or \"kv\"")]
    UnknownBackend(String),
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
