//! Content addressing for events.
//!
//! An event's ID is a deterministic hash of everything except the ID itself,
//! so resubmitting the same fact always collides with the stored copy. The
//! hash function is a collaborator: callers may inject their own
//! [`EventIdentifier`]; [`Sha256EventIdentifier`] is the default.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::event::{Event, EventPayload};
use crate::ids::{EntityId, EventId};

/// Computes the content-derived ID of an event.
pub trait EventIdentifier: Send + Sync {
    /// Derive the ID for an event with these contents.
    fn event_id(&self, entity_id: &EntityId, timestamp_millis: i64, payload: &EventPayload) -> EventId;

    /// Whether `event.id` matches its contents.
    fn verify(&self, event: &Event) -> Result<(), EventId> {
        let computed = self.event_id(&event.entity_id, event.timestamp_millis, &event.payload);
        if computed == event.id {
            Ok(())
        } else {
            Err(computed)
        }
    }
}

/// SHA-256 over canonical JSON (object keys sorted recursively), hex encoded.
#[derive(Clone, Copy, Debug, Default)]
pub struct Sha256EventIdentifier;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct IdentifiedContents<'a> {
    #[serde(rename = "entityID")]
    entity_id: &'a EntityId,
    timestamp_millis: i64,
    #[serde(flatten)]
    payload: &'a EventPayload,
}

impl EventIdentifier for Sha256EventIdentifier {
    fn event_id(&self, entity_id: &EntityId, timestamp_millis: i64, payload: &EventPayload) -> EventId {
        let contents = IdentifiedContents {
            entity_id,
            timestamp_millis,
            payload,
        };
        // Serializing plain data into a `Value` cannot fail.
        let value = serde_json::to_value(&contents).unwrap_or(Value::Null);
        let mut canonical = String::new();
        write_canonical(&value, &mut canonical);
        EventId::from_string(hex_sha256(canonical.as_bytes()))
    }
}

/// Write `value` as JSON with object keys in sorted order at every depth.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, child)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(child, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, child) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(child, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}
