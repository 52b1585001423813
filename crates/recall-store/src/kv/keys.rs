//! Ordered string keys for the key-value backend.
//!
//! `native_db` orders string keys bytewise, so every key embeds its numeric
//! parts as fixed-width decimal. `\0` separates components; ranges that
//! cover "everything under a prefix" end at the same prefix with `\u{1}`.

use std::ops::Bound;

use recall_core::{ComponentId, EntityId, EntityType};

use crate::query::ComparisonOperator;

/// Half-open key range for `scan().range(..)`.
pub type KeyRange = (Bound<String>, Bound<String>);

/// Fixed-width decimal sequence.
pub fn sequence_key(sequence: u64) -> String {
    format!("{sequence:020}")
}

/// Signed integer encoded so that string order equals numeric order.
#[allow(clippy::cast_sign_loss)]
pub fn sortable_i64(value: i64) -> String {
    format!("{:020}", (value as u64) ^ (1_u64 << 63))
}

/// `{type}/{sequence}`.
pub fn entity_type_key(entity_type: EntityType, sequence: u64) -> String {
    format!("{}/{}", entity_type.as_str(), sequence_key(sequence))
}

/// All entities of one type, optionally strictly after `after_sequence`.
pub fn entity_type_range(entity_type: EntityType, after_sequence: Option<u64>) -> KeyRange {
    let lower = match after_sequence {
        Some(sequence) => Bound::Excluded(entity_type_key(entity_type, sequence)),
        None => Bound::Included(format!("{}/", entity_type.as_str())),
    };
    // '0' is the byte right after '/'.
    (lower, Bound::Excluded(format!("{}0", entity_type.as_str())))
}

/// `{entityID}\0{sequence}`.
pub fn entity_event_key(entity_id: &EntityId, sequence: u64) -> String {
    format!("{entity_id}\0{}", sequence_key(sequence))
}

/// All events of one entity, optionally strictly after `after_sequence`.
pub fn entity_event_range(entity_id: &EntityId, after_sequence: Option<u64>) -> KeyRange {
    let lower = match after_sequence {
        Some(sequence) => Bound::Excluded(entity_event_key(entity_id, sequence)),
        None => Bound::Included(format!("{entity_id}\0")),
    };
    (lower, Bound::Excluded(format!("{entity_id}\u{1}")))
}

/// All events strictly after `after_sequence`.
pub fn sequence_range(after_sequence: Option<u64>) -> KeyRange {
    match after_sequence {
        Some(sequence) => (Bound::Excluded(sequence_key(sequence)), Bound::Unbounded),
        None => (Bound::Unbounded, Bound::Unbounded),
    }
}

/// `{taskID}\0{componentID}`.
pub fn component_key(task_id: &EntityId, component_id: &ComponentId) -> String {
    format!("{task_id}\0{component_id}")
}

/// Every component row of one task.
pub fn component_prefix_range(task_id: &EntityId) -> KeyRange {
    (
        Bound::Included(format!("{task_id}\0")),
        Bound::Excluded(format!("{task_id}\u{1}")),
    )
}

/// `{due}\0{entitySequence}\0{componentID}`.
pub fn due_key(due_timestamp_millis: i64, entity_sequence: u64, component_id: &ComponentId) -> String {
    format!(
        "{}\0{}\0{component_id}",
        sortable_i64(due_timestamp_millis),
        sequence_key(entity_sequence)
    )
}

/// Due-index keys whose due time satisfies `due op value`.
pub fn due_range(op: ComparisonOperator, value: i64) -> KeyRange {
    let at = sortable_i64(value);
    // Every key with due == value starts with `{at}\0`, so `{at}\u{1}` is
    // the first key past them.
    let past = format!("{at}\u{1}");
    match op {
        ComparisonOperator::Lt => (Bound::Unbounded, Bound::Excluded(at)),
        ComparisonOperator::Le => (Bound::Unbounded, Bound::Excluded(past)),
        ComparisonOperator::Gt => (Bound::Included(past), Bound::Unbounded),
        ComparisonOperator::Ge => (Bound::Included(at), Bound::Unbounded),
        ComparisonOperator::Eq => (Bound::Included(at), Bound::Excluded(past)),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::ops::RangeBounds;

    fn contains(range: &KeyRange, key: &str) -> bool {
        range.contains(&key.to_string())
    }

    #[test]
    fn sortable_i64_preserves_order() {
        let values = [i64::MIN, -1_000, -1, 0, 1, 999, i64::MAX];
        let keys: Vec<String> = values.iter().map(|v| sortable_i64(*v)).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
        assert!(keys.iter().all(|k| k.len() == 20));
    }

    #[test]
    fn type_range_isolates_types() {
        let range = entity_type_range(EntityType::Task, None);
        assert!(contains(&range, &entity_type_key(EntityType::Task, 0)));
        assert!(contains(&range, &entity_type_key(EntityType::Task, u64::MAX)));
        assert!(!contains(&range, &entity_type_key(EntityType::AttachmentReference, 1)));

        let after = entity_type_range(EntityType::Task, Some(5));
        assert!(!contains(&after, &entity_type_key(EntityType::Task, 5)));
        assert!(contains(&after, &entity_type_key(EntityType::Task, 6)));
    }

    #[test]
    fn entity_event_range_does_not_leak_into_longer_ids() {
        let range = entity_event_range(&"task-1".into(), None);
        assert!(contains(&range, &entity_event_key(&"task-1".into(), 3)));
        assert!(!contains(&range, &entity_event_key(&"task-10".into(), 3)));
    }

    #[test]
    fn component_prefix_matches_only_its_task() {
        let range = component_prefix_range(&"t".into());
        assert!(contains(&range, &component_key(&"t".into(), &"main".into())));
        assert!(!contains(&range, &component_key(&"tt".into(), &"main".into())));
    }

    #[test]
    fn due_ranges_follow_operator() {
        let key = |due| due_key(due, 7, &"main".into());
        let cases = [
            (ComparisonOperator::Lt, [true, false, false]),
            (ComparisonOperator::Le, [true, true, false]),
            (ComparisonOperator::Gt, [false, false, true]),
            (ComparisonOperator::Ge, [false, true, true]),
            (ComparisonOperator::Eq, [false, true, false]),
        ];
        for (op, expected) in cases {
            let range = due_range(op, 200);
            let got = [199, 200, 201].map(|due| contains(&range, &key(due)));
            assert_eq!(got, expected, "{op}");
        }
    }
}
