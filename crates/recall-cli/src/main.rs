//! # recall
//!
//! Admin CLI for a recall store: inspect entities and events, ingest event
//! files, edit metadata and run migrations against either backend.

#![deny(unsafe_code)]

mod commands;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use recall_settings::{BackendKind, LoggingSettings, StoreSettings};
use recall_store::{Database, DatabaseBackend, KvBackend, SqliteBackend};

/// Inspect and feed a recall store.
#[derive(Parser, Debug)]
#[command(name = "recall", about = "Inspect and feed a recall store")]
struct Cli {
    /// Database file (overrides settings and `RECALL_DB_PATH`).
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Storage engine (overrides settings and `RECALL_BACKEND`).
    #[arg(long, global = true)]
    backend: Option<BackendKind>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List entities of one type in insertion order.
    Entities {
        /// Entity type.
        #[arg(long = "type", default_value = "task")]
        entity_type: String,
        /// Due-time filter, e.g. `--due '<' 1700000000000`.
        #[arg(long, num_args = 2, value_names = ["OP", "MILLIS"], allow_hyphen_values = true)]
        due: Option<Vec<String>>,
        /// Continue after this entity ID.
        #[arg(long)]
        after: Option<String>,
        /// Page size.
        #[arg(long)]
        limit: Option<u32>,
    },
    /// Print entities by ID.
    Get {
        /// Entity IDs.
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// List events in acceptance order.
    Events {
        /// Only events of this entity.
        #[arg(long)]
        entity: Option<String>,
        /// Continue after this event ID.
        #[arg(long)]
        after: Option<String>,
        /// Page size.
        #[arg(long)]
        limit: Option<u32>,
    },
    /// Apply events from a JSON file (an array, or one event per line).
    Ingest {
        /// Event file.
        file: PathBuf,
    },
    /// Read or edit metadata.
    Meta {
        #[command(subcommand)]
        action: MetaAction,
    },
    /// Run pending migrations and print the schema version.
    Migrate,
}

#[derive(Subcommand, Debug)]
enum MetaAction {
    /// Print values.
    Get {
        /// Keys.
        #[arg(required = true)]
        keys: Vec<String>,
    },
    /// Set one value.
    Set {
        /// Key.
        key: String,
        /// Value.
        value: String,
    },
    /// Delete keys.
    Delete {
        /// Keys.
        #[arg(required = true)]
        keys: Vec<String>,
    },
}

/// Initialize the global tracing subscriber on stderr.
///
/// `RUST_LOG` wins over the configured level.
fn init_logging(logging: &LoggingSettings) {
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    // try_init is a no-op if a subscriber is already set
    let _ = if logging.json {
        builder.json().try_init()
    } else {
        builder.compact().try_init()
    };
}

fn apply_flags(mut settings: StoreSettings, cli: &Cli) -> StoreSettings {
    if let Some(backend) = cli.backend {
        settings.backend = backend;
    }
    if let Some(db) = &cli.db {
        settings.path = Some(db.to_string_lossy().into_owned());
    }
    settings
}

fn open_backend(settings: &StoreSettings) -> Result<Arc<dyn DatabaseBackend>> {
    let path = settings.resolved_path();
    let backend: Arc<dyn DatabaseBackend> = match settings.backend {
        BackendKind::Sqlite => {
            if let Some(parent) = std::path::Path::new(&path).parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
            }
            Arc::new(
                SqliteBackend::open(&path, &settings.sqlite)
                    .with_context(|| format!("Failed to open sqlite store at {path}"))?,
            )
        }
        BackendKind::Kv => Arc::new(
            KvBackend::open(&path).with_context(|| format!("Failed to open kv store at {path}"))?,
        ),
    };
    tracing::debug!(backend = %settings.backend, path = %path, "store opened");
    Ok(backend)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = recall_settings::load_settings().context("Failed to load settings")?;
    let settings = apply_flags(settings, &cli);
    init_logging(&settings.logging);

    let timeout = Duration::from_millis(settings.operation_timeout_ms);
    let db = Database::new(open_backend(&settings)?)
        .with_event_identifier(Arc::new(recall_core::Sha256EventIdentifier));

    let result = commands::run(&db, &settings, cli.command, timeout).await;
    if let Err(e) = db.close().await {
        tracing::warn!(error = %e, "close failed");
    }
    result
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["recall", "migrate", "--backend", "kv", "--db", "/tmp/x.kv"])
            .unwrap();
        assert_eq!(cli.backend, Some(BackendKind::Kv));
        let settings = apply_flags(StoreSettings::default(), &cli);
        assert_eq!(settings.resolved_path(), "/tmp/x.kv");
        assert_eq!(settings.backend, BackendKind::Kv);
    }

    #[test]
    fn parses_due_filter() {
        let cli = Cli::try_parse_from(["recall", "entities", "--due", "<=", "250", "--limit", "5"])
            .unwrap();
        match cli.command {
            Command::Entities { due, limit, .. } => {
                assert_eq!(due, Some(vec!["<=".to_string(), "250".to_string()]));
                assert_eq!(limit, Some(5));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn meta_delete_requires_keys() {
        assert!(Cli::try_parse_from(["recall", "meta", "delete"]).is_err());
    }
}
