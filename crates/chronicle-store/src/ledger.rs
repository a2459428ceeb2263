// ABOUTME: The version ledger: append-only history of record states per (table, record) pair.
// ABOUTME: Provides append, ordered history reads, per-table summaries, and version comparison.

use std::sync::Arc;

use ulid::Ulid;

use chronicle_core::diff::{FieldDiff, diff_snapshots};
use chronicle_core::error::ClassifiedError;
use chronicle_core::version::{NewVersion, TableSummary, VersionRecord};

use crate::backend::Backend;

/// Default history page size when the caller does not specify one.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Append-only access to the version history. Reads classify failures
/// normally; appends surface as DATABASE-class errors, and retrying them
/// is the caller's responsibility.
#[derive(Clone)]
pub struct VersionLedger {
    backend: Arc<dyn Backend>,
}

impl VersionLedger {
    /// Create a ledger over the given backend.
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    /// Append an immutable version entry. The backend assigns the next
    /// sequence number for the (table, record) pair atomically with the
    /// write. Any store failure surfaces as a DATABASE-class error; the
    /// ledger itself never retries.
    pub async fn record_version(
        &self,
        version: NewVersion,
    ) -> Result<VersionRecord, ClassifiedError> {
        let table = version.table_name.clone();
        let record_id = version.record_id.clone();
        match self.backend.append_version(&version).await {
            Ok(record) => {
                tracing::debug!(
                    "appended {} version #{} for {}/{}",
                    record.operation_type,
                    record.sequence_number,
                    table,
                    record_id
                );
                Ok(record)
            }
            Err(e) => Err(ClassifiedError::database(e.message().to_string())
                .with_detail("table", table)
                .with_detail("record_id", record_id)),
        }
    }

    /// Version history, most-recent-first. With a record id, entries are
    /// strictly ordered by descending sequence number; without one, the
    /// table-wide recent history is returned.
    pub async fn get_history(
        &self,
        table: &str,
        record_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<VersionRecord>, ClassifiedError> {
        self.backend
            .list_versions(table, record_id, limit)
            .await
            .map_err(|e| chronicle_core::classify(&e))
    }

    /// Fetch one version entry; NOT_FOUND if no such id exists.
    pub async fn get_version(&self, id: &Ulid) -> Result<VersionRecord, ClassifiedError> {
        match self.backend.fetch_version(id).await {
            Ok(Some(record)) => Ok(record),
            Ok(None) => Err(ClassifiedError::not_found(format!("no version {id}"))),
            Err(e) => Err(chronicle_core::classify(&e)),
        }
    }

    /// Per-table aggregates across the whole ledger.
    pub async fn get_summary(&self) -> Result<Vec<TableSummary>, ClassifiedError> {
        self.backend
            .version_summary()
            .await
            .map_err(|e| chronicle_core::classify(&e))
    }

    /// Field-level diff between two versions' snapshots. A version's
    /// snapshot is its `new_values`; hard deletes fall back to their last
    /// known `old_values`. Fields absent on one side render as the
    /// "not available" sentinel.
    pub async fn compare(
        &self,
        version_id_1: &Ulid,
        version_id_2: &Ulid,
    ) -> Result<Vec<FieldDiff>, ClassifiedError> {
        let first = self.get_version(version_id_1).await?;
        let second = self.get_version(version_id_2).await?;
        Ok(diff_snapshots(first.snapshot(), second.snapshot()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::SqliteBackend;
    use chronicle_core::error::ErrorCode;
    use chronicle_core::version::{OperationType, Snapshot};
    use serde_json::json;

    fn snap(pairs: &[(&str, serde_json::Value)]) -> Snapshot {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn ledger() -> VersionLedger {
        VersionLedger::new(Arc::new(SqliteBackend::in_memory().unwrap()))
    }

    #[tokio::test]
    async fn history_sequences_strictly_decrease() {
        let ledger = ledger();
        for (op, status) in [
            (OperationType::Insert, "pending"),
            (OperationType::Update, "active"),
            (OperationType::Update, "done"),
        ] {
            ledger
                .record_version(NewVersion::new(
                    "shifts",
                    "r1",
                    op,
                    None,
                    Some(snap(&[("status", json!(status))])),
                    Vec::new(),
                    "ana@example.com",
                    None,
                ))
                .await
                .unwrap();
        }

        let history = ledger.get_history("shifts", Some("r1"), 10).await.unwrap();
        let sequences: Vec<i64> = history.iter().map(|v| v.sequence_number).collect();
        assert_eq!(sequences, vec![3, 2, 1]);
        for pair in sequences.windows(2) {
            assert!(pair[0] > pair[1]);
        }
    }

    #[tokio::test]
    async fn get_version_not_found_classifies() {
        let ledger = ledger();
        let err = ledger.get_version(&Ulid::new()).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::NotFound);
        assert!(!err.retryable);
    }

    #[tokio::test]
    async fn compare_uses_snapshots_and_sentinel() {
        let ledger = ledger();
        let v1 = ledger
            .record_version(NewVersion::new(
                "shifts",
                "r1",
                OperationType::Insert,
                None,
                Some(snap(&[("status", json!("pending")), ("slot", json!(1))])),
                Vec::new(),
                "ana@example.com",
                None,
            ))
            .await
            .unwrap();
        let v2 = ledger
            .record_version(NewVersion::new(
                "shifts",
                "r1",
                OperationType::Update,
                Some(snap(&[("status", json!("pending")), ("slot", json!(1))])),
                Some(snap(&[("status", json!("active"))])),
                vec!["slot".to_string(), "status".to_string()],
                "ana@example.com",
                None,
            ))
            .await
            .unwrap();

        let diffs = ledger.compare(&v1.id, &v2.id).await.unwrap();
        let status = diffs.iter().find(|d| d.field_name == "status").unwrap();
        assert!(status.is_different);
        assert_eq!(status.value_1, json!("pending"));
        assert_eq!(status.value_2, json!("active"));

        let slot = diffs.iter().find(|d| d.field_name == "slot").unwrap();
        assert_eq!(slot.value_2, json!(chronicle_core::NOT_AVAILABLE));
    }

    #[tokio::test]
    async fn summary_reflects_appended_operations() {
        let ledger = ledger();
        ledger
            .record_version(NewVersion::new(
                "shifts",
                "r1",
                OperationType::Insert,
                None,
                Some(snap(&[("status", json!("pending"))])),
                Vec::new(),
                "ana@example.com",
                None,
            ))
            .await
            .unwrap();

        let summary = ledger.get_summary().await.unwrap();
        assert_eq!(summary.len(), 1);
        assert_eq!(summary[0].table_name, "shifts");
        assert_eq!(summary[0].total_versions, 1);
        assert_eq!(summary[0].inserts, 1);
    }
}
