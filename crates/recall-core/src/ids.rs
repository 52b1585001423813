//! Branded ID newtypes for type safety.
//!
//! Entity, event, and component identifiers are distinct newtypes around
//! `String` so an event ID can never be passed where an entity ID is expected.
//! IDs are opaque: entity IDs are chosen by the application, event IDs are
//! derived from event contents (see [`crate::identity`]).

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create from an existing string value.
            #[must_use]
            pub fn from_string(s: String) -> Self {
                Self(s)
            }

            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

branded_id! {
    /// Identifier of an entity, unique within its entity type.
    EntityId
}

branded_id! {
    /// Content-derived identifier of an event.
    EventId
}

branded_id! {
    /// Identifier of one reviewable component of a task (e.g. `main`, a cloze index).
    ComponentId
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_transparently() {
        let id = EntityId::from("task-1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"task-1\"");
        let back: EntityId = serde_json::from_str("\"task-1\"").unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn deref_and_display() {
        let id = EventId::from_string("abc".to_string());
        assert_eq!(&*id, "abc");
        assert_eq!(id.to_string(), "abc");
        assert_eq!(id.into_inner(), "abc");
    }

    #[test]
    fn usable_as_json_map_key() {
        let mut map = std::collections::BTreeMap::new();
        let _ = map.insert(ComponentId::from("main"), 1);
        assert_eq!(serde_json::to_string(&map).unwrap(), r#"{"main":1}"#);
    }
}
