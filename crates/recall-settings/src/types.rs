//! Settings type definitions.
//!
//! Every struct uses `#[serde(default)]` so a partial settings file only
//! needs to mention the keys it changes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::SettingsError;

/// Root settings object.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreSettings {
    /// Which storage engine to open.
    pub backend: BackendKind,
    /// Database location. `None` resolves to `~/.recall/recall.<ext>`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Upper bound for a single store operation awaited by the CLI.
    pub operation_timeout_ms: u64,
    /// SQL engine tuning.
    pub sqlite: SqliteSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: BackendKind::Sqlite,
            path: None,
            operation_timeout_ms: 30_000,
            sqlite: SqliteSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl StoreSettings {
    /// The configured path, or the default location for the backend.
    #[must_use]
    pub fn resolved_path(&self) -> String {
        self.path.clone().unwrap_or_else(|| {
            crate::loader::recall_dir()
                .join(format!("recall.{}", self.backend.file_extension()))
                .to_string_lossy()
                .into_owned()
        })
    }
}

/// Storage engine selector.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Embedded SQL engine.
    #[default]
    Sqlite,
    /// Embedded transactional key-value engine.
    Kv,
}

impl BackendKind {
    /// Conventional file extension for the engine's database file.
    #[must_use]
    pub const fn file_extension(self) -> &'static str {
        match self {
            Self::Sqlite => "db",
            Self::Kv => "kv",
        }
    }

    /// Settings/CLI spelling.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Kv => "kv",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" | "sql" => Ok(Self::Sqlite),
            "kv" | "native_db" => Ok(Self::Kv),
            other => Err(SettingsError::UnknownBackend(other.to_string())),
        }
    }
}

/// Pragmas applied when the SQL backend opens its connection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SqliteSettings {
    /// How long a writer waits for the database lock.
    pub busy_timeout_ms: u64,
    /// Page cache size in KiB.
    pub cache_size_kib: u64,
    /// Use write-ahead logging (file-backed databases only).
    pub wal: bool,
}

impl Default for SqliteSettings {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5_000,
            cache_size_kib: 64 * 1024,
            wal: true,
        }
    }
}

/// Logging configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default `tracing` filter when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of the human-readable format.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let s = StoreSettings::default();
        assert_eq!(s.backend, BackendKind::Sqlite);
        assert!(s.path.is_none());
        assert_eq!(s.sqlite.busy_timeout_ms, 5_000);
        assert!(s.sqlite.wal);
        assert_eq!(s.logging.level, "info");
    }

    #[test]
    fn json_field_names_are_camel_case() {
        let json = serde_json::to_value(StoreSettings::default()).unwrap();
        assert_eq!(json["backend"], "sqlite");
        assert!(json.get("operationTimeoutMs").is_some());
        assert!(json["sqlite"].get("busyTimeoutMs").is_some());
        assert!(json["sqlite"].get("cacheSizeKib").is_some());
        // Optional path omitted when None
        assert!(json.get("path").is_none());
    }

    #[test]
    fn empty_json_produces_defaults() {
        let settings: StoreSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings, StoreSettings::default());
    }

    #[test]
    fn backend_kind_parsing() {
        assert_eq!("sqlite".parse::<BackendKind>().unwrap(), BackendKind::Sqlite);
        assert_eq!("KV".parse::<BackendKind>().unwrap(), BackendKind::Kv);
        assert!(matches!(
            "redis".parse::<BackendKind>(),
            Err(SettingsError::UnknownBackend(name)) if name == "redis"
        ));
    }

    #[test]
    fn resolved_path_prefers_explicit_path() {
        let settings = StoreSettings {
            path: Some("/data/app.db".to_string()),
            ..StoreSettings::default()
        };
        assert_eq!(settings.resolved_path(), "/data/app.db");
    }

    #[test]
    fn resolved_path_uses_backend_extension() {
        let settings = StoreSettings {
            backend: BackendKind::Kv,
            ..StoreSettings::default()
        };
        assert!(settings.resolved_path().ends_with("recall.kv"));
    }
}
