//! Structured queries over entities and events.
//!
//! Callers never write engine-native queries. They describe what they want
//! with [`EntityQuery`] / [`EventQuery`], and each backend compiles that into
//! its own plan: SQL text with bound parameters ([`sql`]) or key ranges over
//! native indices ([`crate::kv::keys`]).
//!
//! Pagination is cursor-based. `after_id` names the last row of the previous
//! page; the next page starts strictly after that row's internal order key
//! (insertion order), so concurrent inserts never shift page boundaries. A
//! cursor that names no stored row yields an empty page.

pub mod sql;

use recall_core::{EntityId, EntityType, EventId};

/// Ordered comparison used by field predicates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ComparisonOperator {
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `=`
    Eq,
}

impl ComparisonOperator {
    /// SQL spelling of the operator.
    #[must_use]
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Eq => "=",
        }
    }

    /// Evaluate `lhs op rhs`.
    #[must_use]
    pub fn matches(self, lhs: i64, rhs: i64) -> bool {
        match self {
            Self::Lt => lhs < rhs,
            Self::Le => lhs <= rhs,
            Self::Gt => lhs > rhs,
            Self::Ge => lhs >= rhs,
            Self::Eq => lhs == rhs,
        }
    }

    /// Parse the symbolic spelling (`<`, `<=`, `>`, `>=`, `=`).
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "<" => Some(Self::Lt),
            "<=" => Some(Self::Le),
            ">" => Some(Self::Gt),
            ">=" => Some(Self::Ge),
            "=" | "==" => Some(Self::Eq),
            _ => None,
        }
    }
}

impl std::fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// Field predicate for entity listings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EntityPredicate {
    /// Any live component of the task is due `op` the given time.
    ///
    /// Served from the derived due-time index, never by scanning payloads.
    DueTimestampMillis(ComparisonOperator, i64),
}

/// Entity listing: one type, at most one predicate, cursor and limit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntityQuery {
    /// Type filter; always applied.
    pub entity_type: EntityType,
    /// Optional field predicate.
    pub predicate: Option<EntityPredicate>,
    /// Return rows strictly after this entity.
    pub after_id: Option<EntityId>,
    /// Maximum number of rows.
    pub limit: Option<u32>,
}

impl EntityQuery {
    /// All entities of a type, in insertion order.
    #[must_use]
    pub fn new(entity_type: EntityType) -> Self {
        Self {
            entity_type,
            predicate: None,
            after_id: None,
            limit: None,
        }
    }

    /// Filter by component due time.
    #[must_use]
    pub fn due(mut self, op: ComparisonOperator, timestamp_millis: i64) -> Self {
        self.predicate = Some(EntityPredicate::DueTimestampMillis(op, timestamp_millis));
        self
    }

    /// Continue after `id`.
    #[must_use]
    pub fn after(mut self, id: impl Into<EntityId>) -> Self {
        self.after_id = Some(id.into());
        self
    }

    /// Cap the page size.
    #[must_use]
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Field predicate for event listings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EventPredicate {
    /// Events targeting one entity.
    EntityId(EntityId),
}

/// Event listing in acceptance order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EventQuery {
    /// Optional field predicate.
    pub predicate: Option<EventPredicate>,
    /// Return rows strictly after this event.
    pub after_id: Option<EventId>,
    /// Maximum number of rows.
    pub limit: Option<u32>,
}

impl EventQuery {
    /// All events.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Events of one entity.
    #[must_use]
    pub fn for_entity(entity_id: impl Into<EntityId>) -> Self {
        Self {
            predicate: Some(EventPredicate::EntityId(entity_id.into())),
            ..Self::default()
        }
    }

    /// Continue after `id`.
    #[must_use]
    pub fn after(mut self, id: impl Into<EventId>) -> Self {
        self.after_id = Some(id.into());
        self
    }

    /// Cap the page size.
    #[must_use]
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operator_semantics() {
        assert!(ComparisonOperator::Lt.matches(1, 2));
        assert!(!ComparisonOperator::Lt.matches(2, 2));
        assert!(ComparisonOperator::Le.matches(2, 2));
        assert!(ComparisonOperator::Gt.matches(3, 2));
        assert!(ComparisonOperator::Ge.matches(2, 2));
        assert!(ComparisonOperator::Eq.matches(2, 2));
        assert!(!ComparisonOperator::Eq.matches(1, 2));
    }

    #[test]
    fn operator_parse_round_trips_sql_spelling() {
        for op in [
            ComparisonOperator::Lt,
            ComparisonOperator::Le,
            ComparisonOperator::Gt,
            ComparisonOperator::Ge,
            ComparisonOperator::Eq,
        ] {
            assert_eq!(ComparisonOperator::parse(op.as_sql()), Some(op));
        }
        assert_eq!(ComparisonOperator::parse("!="), None);
    }

    #[test]
    fn entity_query_builder() {
        let q = EntityQuery::new(EntityType::Task)
            .due(ComparisonOperator::Lt, 250)
            .after("task-2")
            .limit(10);
        assert_eq!(
            q.predicate,
            Some(EntityPredicate::DueTimestampMillis(ComparisonOperator::Lt, 250))
        );
        assert_eq!(q.after_id.as_deref(), Some("task-2"));
        assert_eq!(q.limit, Some(10));
    }

    #[test]
    fn event_query_builder() {
        let q = EventQuery::for_entity("task-1").limit(5);
        assert_eq!(q.predicate, Some(EventPredicate::EntityId("task-1".into())));
        assert!(q.after_id.is_none());
        assert_eq!(EventQuery::new(), EventQuery::default());
    }
}
