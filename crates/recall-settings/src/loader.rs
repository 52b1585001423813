//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`StoreSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `RECALL_*` environment variable overrides (highest priority)
//!
//! The settings file is `$RECALL_SETTINGS` if set, else
//! `~/.recall/settings.json`.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::{BackendKind, StoreSettings};

/// Directory holding the settings file and default database files.
pub fn recall_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".recall")
}

/// Resolve the path to the settings file.
pub fn settings_path() -> PathBuf {
    read_env_string("RECALL_SETTINGS")
        .map_or_else(|| recall_dir().join("settings.json"), PathBuf::from)
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<StoreSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<StoreSettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Defaults merged with the settings file, without env overrides.
pub fn load_file_layer(path: &Path) -> Result<StoreSettings> {
    let defaults = serde_json::to_value(StoreSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply process environment overrides to loaded settings.
pub fn apply_env_overrides(settings: &mut StoreSettings) {
    apply_overrides_with(settings, |name| {
        std::env::var(name).ok().filter(|v| !v.is_empty())
    });
}

/// Apply overrides read through `lookup`.
///
/// Invalid values are logged and ignored (the file/default value stays).
pub fn apply_overrides_with(settings: &mut StoreSettings, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("RECALL_DB_PATH") {
        settings.path = Some(v);
    }
    if let Some(v) = lookup("RECALL_BACKEND") {
        match v.parse::<BackendKind>() {
            Ok(kind) => settings.backend = kind,
            Err(_) => warn!(key = "RECALL_BACKEND", value = %v, "invalid backend env var, ignoring"),
        }
    }
    if let Some(v) = read_u64(&lookup, "RECALL_BUSY_TIMEOUT_MS", 0, 600_000) {
        settings.sqlite.busy_timeout_ms = v;
    }
    if let Some(v) = read_u64(&lookup, "RECALL_CACHE_SIZE_KIB", 64, 16 * 1024 * 1024) {
        settings.sqlite.cache_size_kib = v;
    }
    if let Some(v) = read_bool(&lookup, "RECALL_SQLITE_WAL") {
        settings.sqlite.wal = v;
    }
    if let Some(v) = read_u64(&lookup, "RECALL_OPERATION_TIMEOUT_MS", 1, 3_600_000) {
        settings.operation_timeout_ms = v;
    }
    if let Some(v) = lookup("RECALL_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_bool(&lookup, "RECALL_LOG_JSON") {
        settings.logging.json = v;
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_bool(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<bool> {
    let val = lookup(name)?;
    let result = parse_bool(&val);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
}

fn read_u64(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    min: u64,
    max: u64,
) -> Option<u64> {
    let val = lookup(name)?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid u64 env var, ignoring");
    }
    result
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
