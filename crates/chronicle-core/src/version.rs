// ABOUTME: Defines VersionRecord, the immutable ledger entry capturing one record mutation.
// ABOUTME: Also computes changed_fields between snapshots under a table's versioning policy.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::config::TableVersioningConfig;

/// The full captured value of a record's fields at a point in time.
pub type Snapshot = serde_json::Map<String, serde_json::Value>;

/// The kind of mutation a version entry captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationType {
    Insert,
    Update,
    Delete,
    Restore,
}

impl OperationType {
    /// Returns the operation name string.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Insert => "INSERT",
            OperationType::Update => "UPDATE",
            OperationType::Delete => "DELETE",
            OperationType::Restore => "RESTORE",
        }
    }

    /// Parse an operation name string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "INSERT" => Some(OperationType::Insert),
            "UPDATE" => Some(OperationType::Update),
            "DELETE" => Some(OperationType::Delete),
            "RESTORE" => Some(OperationType::Restore),
            _ => None,
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One immutable entry in the version ledger. Never mutated or rewritten
/// after creation; only the retention engine may delete it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionRecord {
    pub id: Ulid,
    pub table_name: String,
    pub record_id: String,
    pub operation_type: OperationType,
    pub old_values: Option<Snapshot>,
    pub new_values: Option<Snapshot>,
    pub changed_fields: Vec<String>,
    pub actor: String,
    pub actor_id: Option<String>,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Monotonic per (table_name, record_id); assigned by the store at
    /// append time.
    pub sequence_number: i64,
}

impl VersionRecord {
    /// The snapshot this version represents: `new_values`, falling back to
    /// `old_values` for hard deletes (whose new state is null).
    pub fn snapshot(&self) -> Option<&Snapshot> {
        self.new_values.as_ref().or(self.old_values.as_ref())
    }
}

/// A version entry prepared by the ledger, before the store assigns its
/// sequence number.
#[derive(Debug, Clone)]
pub struct NewVersion {
    pub id: Ulid,
    pub table_name: String,
    pub record_id: String,
    pub operation_type: OperationType,
    pub old_values: Option<Snapshot>,
    pub new_values: Option<Snapshot>,
    pub changed_fields: Vec<String>,
    pub actor: String,
    pub actor_id: Option<String>,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl NewVersion {
    /// Prepare a version entry with a fresh ULID and the current time.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        table_name: impl Into<String>,
        record_id: impl Into<String>,
        operation_type: OperationType,
        old_values: Option<Snapshot>,
        new_values: Option<Snapshot>,
        changed_fields: Vec<String>,
        actor: impl Into<String>,
        reason: Option<String>,
    ) -> Self {
        Self {
            id: Ulid::new(),
            table_name: table_name.into(),
            record_id: record_id.into(),
            operation_type,
            old_values,
            new_values,
            changed_fields,
            actor: actor.into(),
            actor_id: None,
            reason,
            created_at: Utc::now(),
        }
    }

    /// Attach the acting user's id.
    pub fn with_actor_id(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }

    /// Finalize into a VersionRecord with the store-assigned sequence number.
    pub fn into_record(self, sequence_number: i64) -> VersionRecord {
        VersionRecord {
            id: self.id,
            table_name: self.table_name,
            record_id: self.record_id,
            operation_type: self.operation_type,
            old_values: self.old_values,
            new_values: self.new_values,
            changed_fields: self.changed_fields,
            actor: self.actor,
            actor_id: self.actor_id,
            reason: self.reason,
            created_at: self.created_at,
            sequence_number,
        }
    }
}

/// Per-table aggregate over the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSummary {
    pub table_name: String,
    pub total_versions: u64,
    pub unique_records: u64,
    pub last_change: Option<DateTime<Utc>>,
    pub inserts: u64,
    pub updates: u64,
    pub deletes: u64,
    pub restores: u64,
}

/// The fields whose values differ between two snapshots, over the union of
/// keys, filtered by the table's tracking policy and sorted by name.
pub fn changed_fields(
    old: &Snapshot,
    new: &Snapshot,
    config: &TableVersioningConfig,
) -> Vec<String> {
    let keys: BTreeSet<&String> = old.keys().chain(new.keys()).collect();

    keys.into_iter()
        .filter(|key| config.tracks_field(key))
        .filter(|key| old.get(key.as_str()) != new.get(key.as_str()))
        .map(|key| key.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snap(pairs: &[(&str, serde_json::Value)]) -> Snapshot {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn changed_fields_reports_differing_keys_sorted() {
        let config = TableVersioningConfig::default_for("shifts");
        let old = snap(&[
            ("status", json!("pending")),
            ("assignee", json!("ana")),
            ("slot", json!(3)),
        ]);
        let new = snap(&[
            ("status", json!("active")),
            ("assignee", json!("ana")),
            ("slot", json!(4)),
        ]);

        assert_eq!(changed_fields(&old, &new, &config), vec!["slot", "status"]);
    }

    #[test]
    fn changed_fields_counts_added_and_removed_keys() {
        let config = TableVersioningConfig::default_for("shifts");
        let old = snap(&[("status", json!("pending"))]);
        let new = snap(&[("status", json!("pending")), ("note", json!("late"))]);

        assert_eq!(changed_fields(&old, &new, &config), vec!["note"]);
        assert_eq!(changed_fields(&new, &old, &config), vec!["note"]);
    }

    #[test]
    fn changed_fields_never_includes_excluded_fields() {
        let config = TableVersioningConfig::default_for("shifts");
        let old = snap(&[
            ("status", json!("pending")),
            ("updated_at", json!("2026-01-01T00:00:00Z")),
        ]);
        let new = snap(&[
            ("status", json!("active")),
            ("updated_at", json!("2026-02-01T00:00:00Z")),
        ]);

        assert_eq!(changed_fields(&old, &new, &config), vec!["status"]);
    }

    #[test]
    fn changed_fields_honors_track_allow_list() {
        let mut config = TableVersioningConfig::default_for("shifts");
        config.track_fields = Some(["status".to_string()].into_iter().collect());

        let old = snap(&[("status", json!("pending")), ("slot", json!(1))]);
        let new = snap(&[("status", json!("active")), ("slot", json!(2))]);

        assert_eq!(changed_fields(&old, &new, &config), vec!["status"]);
    }

    #[test]
    fn operation_type_round_trips_through_strings() {
        for op in [
            OperationType::Insert,
            OperationType::Update,
            OperationType::Delete,
            OperationType::Restore,
        ] {
            assert_eq!(OperationType::parse(op.as_str()), Some(op));
        }
        assert_eq!(OperationType::parse("UPSERT"), None);
    }

    #[test]
    fn new_version_finalizes_with_sequence() {
        let nv = NewVersion::new(
            "shifts",
            "r1",
            OperationType::Insert,
            None,
            Some(snap(&[("status", json!("pending"))])),
            Vec::new(),
            "ana@example.com",
            Some("initial import".to_string()),
        )
        .with_actor_id("u-42");

        let record = nv.into_record(1);
        assert_eq!(record.sequence_number, 1);
        assert_eq!(record.operation_type, OperationType::Insert);
        assert_eq!(record.actor_id.as_deref(), Some("u-42"));
        assert!(record.old_values.is_none());
    }

    #[test]
    fn snapshot_falls_back_to_old_values_for_deletes() {
        let nv = NewVersion::new(
            "shifts",
            "r1",
            OperationType::Delete,
            Some(snap(&[("status", json!("active"))])),
            None,
            Vec::new(),
            "ana@example.com",
            None,
        );
        let record = nv.into_record(2);
        assert_eq!(
            record.snapshot().and_then(|s| s.get("status")),
            Some(&json!("active"))
        );
    }

    #[test]
    fn version_record_serializes_round_trip() {
        let nv = NewVersion::new(
            "shifts",
            "r1",
            OperationType::Update,
            Some(snap(&[("status", json!("pending"))])),
            Some(snap(&[("status", json!("active"))])),
            vec!["status".to_string()],
            "ana@example.com",
            None,
        );
        let record = nv.into_record(5);
        let json = serde_json::to_string(&record).expect("serialize version");
        let deser: VersionRecord = serde_json::from_str(&json).expect("deserialize version");
        assert_eq!(deser.id, record.id);
        assert_eq!(deser.sequence_number, 5);
        assert_eq!(deser.operation_type, OperationType::Update);
        assert_eq!(deser.changed_fields, vec!["status"]);
    }
}
