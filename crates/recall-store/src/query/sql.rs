//! SQL compilation of structured queries.
//!
//! Every value is a bound parameter; only column names, operators and
//! placeholders are ever spliced into the statement text. Order keys are the
//! internal insertion-order columns `entities.row_id` and
//! `events.sequence_number`, never the caller-visible IDs.

use rusqlite::types::Value;

use super::{EntityPredicate, EntityQuery, EventPredicate, EventQuery};

/// A parameterized statement ready for `prepare` + `query(params_from_iter(args))`.
#[derive(Clone, Debug, PartialEq)]
pub struct SqlQuery {
    /// Statement text with `?` placeholders.
    pub statement: String,
    /// Bound parameters, in placeholder order.
    pub args: Vec<Value>,
}

/// Columns every entity listing selects, in decode order.
pub const ENTITY_COLUMNS: &str = "id, last_event_id, last_event_timestamp_millis, data";

/// `?, ?, ?` with `n` placeholders.
pub fn placeholders(n: usize) -> String {
    let mut out = String::with_capacity(n * 3);
    for i in 0..n {
        if i > 0 {
            out.push_str(", ");
        }
        out.push('?');
    }
    out
}

/// `(?, ?), (?, ?)` with `rows` groups of `width` placeholders, for multi-row
/// `INSERT ... VALUES`.
pub fn row_placeholders(rows: usize, width: usize) -> String {
    let group = format!("({})", placeholders(width));
    vec![group; rows].join(", ")
}

/// `WHERE` clauses joined with `AND`, plus their parameters.
#[derive(Default)]
struct Conditions {
    clauses: Vec<String>,
    args: Vec<Value>,
}

impl Conditions {
    fn push(&mut self, clause: String, arg: Value) {
        self.clauses.push(clause);
        self.args.push(arg);
    }

    fn write_where(&self, sql: &mut String) {
        if !self.clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.clauses.join(" AND "));
        }
    }
}

fn finish(mut sql: String, mut conditions: Conditions, order_key: &str, limit: Option<u32>) -> SqlQuery {
    conditions.write_where(&mut sql);
    sql.push_str(" ORDER BY ");
    sql.push_str(order_key);
    if let Some(limit) = limit {
        sql.push_str(" LIMIT ?");
        conditions.args.push(Value::Integer(i64::from(limit)));
    }
    SqlQuery {
        statement: sql,
        args: conditions.args,
    }
}

/// Compile an entity listing.
///
/// A due-time predicate is routed through `derived_task_components` and
/// joined back to `entities`; `DISTINCT` collapses tasks with several
/// matching components into one row.
pub fn compile_entity_query(query: &EntityQuery) -> SqlQuery {
    let mut conditions = Conditions::default();

    match &query.predicate {
        None => {
            let sql = format!("SELECT {ENTITY_COLUMNS} FROM entities");
            conditions.push(
                "entity_type = ?".to_string(),
                Value::Text(query.entity_type.as_str().to_string()),
            );
            if let Some(after) = &query.after_id {
                conditions.push(
                    "row_id > (SELECT row_id FROM entities WHERE id = ?)".to_string(),
                    Value::Text(after.to_string()),
                );
            }
            finish(sql, conditions, "row_id", query.limit)
        }
        Some(EntityPredicate::DueTimestampMillis(op, value)) => {
            let sql = "SELECT DISTINCT e.id, e.last_event_id, e.last_event_timestamp_millis, e.data, e.row_id \
                       FROM derived_task_components AS dt \
                       JOIN entities AS e ON e.id = dt.task_id"
                .to_string();
            conditions.push(
                "e.entity_type = ?".to_string(),
                Value::Text(query.entity_type.as_str().to_string()),
            );
            conditions.push(
                format!("dt.due_timestamp_millis {} ?", op.as_sql()),
                Value::Integer(*value),
            );
            if let Some(after) = &query.after_id {
                conditions.push(
                    "e.row_id > (SELECT row_id FROM entities WHERE id = ?)".to_string(),
                    Value::Text(after.to_string()),
                );
            }
            finish(sql, conditions, "e.row_id", query.limit)
        }
    }
}

/// Compile an event listing. Rows carry a single `data` column.
pub fn compile_event_query(query: &EventQuery) -> SqlQuery {
    let mut conditions = Conditions::default();
    if let Some(EventPredicate::EntityId(entity_id)) = &query.predicate {
        conditions.push("entity_id = ?".to_string(), Value::Text(entity_id.to_string()));
    }
    if let Some(after) = &query.after_id {
        conditions.push(
            "sequence_number > (SELECT sequence_number FROM events WHERE id = ?)".to_string(),
            Value::Text(after.to_string()),
        );
    }
    finish(
        "SELECT data FROM events".to_string(),
        conditions,
        "sequence_number",
        query.limit,
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
