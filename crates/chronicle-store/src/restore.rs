// ABOUTME: Restore engine: roll a record's live state back to any historical version.
// ABOUTME: Validates the target version, applies its snapshot via the record API, and appends a RESTORE entry.

use ulid::Ulid;

use chronicle_core::error::ClassifiedError;
use chronicle_core::version::VersionRecord;

use crate::ledger::VersionLedger;
use crate::records::{VersionedRecords, WriteOutcome};

/// Applies historical snapshots back onto live records.
///
/// A restore never rewrites history: it appends a RESTORE version whose
/// `old_values` capture the pre-restore state, so restores themselves are
/// restorable. Restoring twice from the same version yields the same live
/// state and two RESTORE entries.
#[derive(Clone)]
pub struct RestoreEngine {
    records: VersionedRecords,
    ledger: VersionLedger,
}

impl RestoreEngine {
    pub fn new(records: VersionedRecords, ledger: VersionLedger) -> Self {
        Self { records, ledger }
    }

    /// Restore the record to the state captured by `version_id`.
    ///
    /// The version must belong to the given (table, record) pair and must
    /// carry a snapshot; DELETE entries have none and cannot be restored
    /// from directly (restore from the version before the delete instead).
    /// The write goes through the upsert path, so a hard-deleted record
    /// comes back to life.
    pub async fn restore(
        &self,
        table: &str,
        record_id: &str,
        version_id: &Ulid,
        actor: &str,
        reason: Option<String>,
    ) -> Result<WriteOutcome, ClassifiedError> {
        let version = self.ledger.get_version(version_id).await?;
        let snapshot = validated_snapshot(&version, table, record_id)?;

        tracing::info!(
            "restoring {}/{} to version #{} ({})",
            table,
            record_id,
            version.sequence_number,
            version_id
        );

        self.records
            .apply_restore(table, record_id, snapshot, actor, reason, version_id)
            .await
    }
}

fn validated_snapshot(
    version: &VersionRecord,
    table: &str,
    record_id: &str,
) -> Result<chronicle_core::version::Snapshot, ClassifiedError> {
    if version.table_name != table || version.record_id != record_id {
        return Err(ClassifiedError::validation(format!(
            "version {} belongs to {}/{}, not {}/{}",
            version.id, version.table_name, version.record_id, table, record_id
        )));
    }
    match &version.new_values {
        Some(snapshot) => Ok(snapshot.clone()),
        None => Err(ClassifiedError::validation(format!(
            "version {} is a {} entry with no snapshot to restore",
            version.id, version.operation_type
        ))),
    }
}
