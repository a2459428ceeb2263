// ABOUTME: Field-level diff between two version snapshots.
// ABOUTME: Pure and read-only; missing fields render as a sentinel value instead of erroring.

use std::collections::BTreeSet;

use serde::Serialize;
use serde_json::Value;

use crate::version::Snapshot;

/// Rendered for a field absent from one side of a comparison.
pub const NOT_AVAILABLE: &str = "not available";

/// One field's values across two versions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldDiff {
    pub field_name: String,
    pub value_1: Value,
    pub value_2: Value,
    pub is_different: bool,
}

fn value_or_sentinel(snapshot: Option<&Snapshot>, key: &str) -> Option<Value> {
    snapshot.and_then(|s| s.get(key)).cloned()
}

/// Diff two snapshots over the union of their keys, sorted by field name.
/// A field missing on one side is reported as different, with the sentinel
/// in place of its value.
pub fn diff_snapshots(first: Option<&Snapshot>, second: Option<&Snapshot>) -> Vec<FieldDiff> {
    let keys: BTreeSet<&String> = first
        .map(|s| s.keys().collect::<BTreeSet<_>>())
        .unwrap_or_default()
        .into_iter()
        .chain(second.map(|s| s.keys().collect::<BTreeSet<_>>()).unwrap_or_default())
        .collect();

    keys.into_iter()
        .map(|key| {
            let v1 = value_or_sentinel(first, key);
            let v2 = value_or_sentinel(second, key);
            let is_different = v1 != v2;
            FieldDiff {
                field_name: key.to_string(),
                value_1: v1.unwrap_or_else(|| Value::String(NOT_AVAILABLE.to_string())),
                value_2: v2.unwrap_or_else(|| Value::String(NOT_AVAILABLE.to_string())),
                is_different,
            }
        })
        .collect()
}
