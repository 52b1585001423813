//! Subcommand implementations. Results go to stdout as JSON.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde::Serialize;

use recall_core::{EntityId, EntityType, Event, EventId};
use recall_settings::StoreSettings;
use recall_store::{with_timeout, ComparisonOperator, Database, EntityQuery, EventQuery};

use crate::{Command, MetaAction};

pub(crate) async fn run(
    db: &Database,
    settings: &StoreSettings,
    command: Command,
    timeout: Duration,
) -> Result<()> {
    match command {
        Command::Entities {
            entity_type,
            due,
            after,
            limit,
        } => {
            let query = entity_query(&entity_type, due.as_deref(), after, limit)?;
            let records = with_timeout(timeout, "list_entities", db.list_entities(&query)).await?;
            print_json(&records)
        }
        Command::Get { ids } => {
            let ids: Vec<EntityId> = ids.into_iter().map(EntityId::from).collect();
            let found = with_timeout(timeout, "get_entities", db.get_entities(&ids)).await?;
            let ordered: Vec<_> = ids.iter().filter_map(|id| found.get(id)).collect();
            print_json(&ordered)
        }
        Command::Events {
            entity,
            after,
            limit,
        } => {
            let mut query = entity.map_or_else(EventQuery::new, EventQuery::for_entity);
            if let Some(after) = after {
                query = query.after(EventId::from(after));
            }
            if let Some(limit) = limit {
                query = query.limit(limit);
            }
            let events = with_timeout(timeout, "list_events", db.list_events(&query)).await?;
            print_json(&events)
        }
        Command::Ingest { file } => {
            let events = read_events(&file)?;
            let submitted = events.len();
            let records = with_timeout(timeout, "put_events", db.put_events(events)).await?;
            tracing::info!(submitted, updated = records.len(), "ingest complete");
            print_json(&records)
        }
        Command::Meta { action } => run_meta(db, action, timeout).await,
        Command::Migrate => migrate(db, settings, timeout).await,
    }
}

async fn run_meta(db: &Database, action: MetaAction, timeout: Duration) -> Result<()> {
    match action {
        MetaAction::Get { keys } => {
            let values =
                with_timeout(timeout, "get_metadata_values", db.get_metadata_values(&keys)).await?;
            let sorted: BTreeMap<_, _> = values.into_iter().collect();
            print_json(&sorted)
        }
        MetaAction::Set { key, value } => {
            let values = BTreeMap::from([(key, Some(value))]);
            with_timeout(timeout, "set_metadata_values", db.set_metadata_values(values)).await?;
            Ok(())
        }
        MetaAction::Delete { keys } => {
            let values = keys.into_iter().map(|k| (k, None)).collect();
            with_timeout(timeout, "set_metadata_values", db.set_metadata_values(values)).await?;
            Ok(())
        }
    }
}

/// Migrations run on open; this reports where the store ended up.
async fn migrate(db: &Database, settings: &StoreSettings, timeout: Duration) -> Result<()> {
    let version = with_timeout(timeout, "schema_version", db.schema_version()).await?;
    print_json(&serde_json::json!({
        "backend": settings.backend.as_str(),
        "path": settings.resolved_path(),
        "schemaVersion": version,
    }))
}

fn entity_query(
    entity_type: &str,
    due: Option<&[String]>,
    after: Option<String>,
    limit: Option<u32>,
) -> Result<EntityQuery> {
    let entity_type =
        EntityType::parse(entity_type).ok_or_else(|| anyhow!("unknown entity type {entity_type:?}"))?;
    let mut query = EntityQuery::new(entity_type);
    if let Some(due) = due {
        let [op, value] = due else {
            bail!("--due takes an operator and a timestamp");
        };
        let op = ComparisonOperator::parse(op).ok_or_else(|| anyhow!("unknown operator {op:?}"))?;
        let value: i64 = value
            .parse()
            .with_context(|| format!("invalid due timestamp {value:?}"))?;
        query = query.due(op, value);
    }
    if let Some(after) = after {
        query = query.after(after);
    }
    if let Some(limit) = limit {
        query = query.limit(limit);
    }
    Ok(query)
}

/// Parse a JSON array of events, or newline-delimited events.
fn read_events(path: &Path) -> Result<Vec<Event>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    if text.trim_start().starts_with('[') {
        return serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse events in {}", path.display()));
    }
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("{}:{}: invalid event", path.display(), n + 1))
        })
        .collect()
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
