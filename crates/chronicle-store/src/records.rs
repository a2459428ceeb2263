// ABOUTME: The versioned record API: insert, update, delete, upsert, and bulk update with resilient wrapping.
// ABOUTME: Every store mutation runs through the retry engine; successful mutations append a ledger version and an audit entry.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;

use chronicle_core::audit::{AuditEntry, AuditOperation};
use chronicle_core::config::TableVersioningConfig;
use chronicle_core::error::{ClassifiedError, ErrorCode};
use chronicle_core::retry::{RetryConfig, with_retry};
use chronicle_core::version::{NewVersion, OperationType, Snapshot, changed_fields};

use crate::audit::AuditLog;
use crate::backend::Backend;
use crate::ledger::VersionLedger;

/// Whether a delete keeps the row around (soft) or removes it (hard).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteMode {
    /// Stamp a `deleted_at` field via the update path; restorable.
    Soft,
    /// Physically remove the row; its last state survives in the ledger.
    Hard,
}

/// Field stamped by soft deletes.
pub const DELETED_AT_FIELD: &str = "deleted_at";

/// The result of one versioned mutation, returned to the calling layer
/// which decides how to surface it (this crate never notifies anyone).
#[derive(Debug, Clone)]
pub struct WriteOutcome {
    pub table: String,
    pub record_id: String,
    pub operation: OperationType,
    /// The record's live state after the mutation; None after a hard delete.
    pub state: Option<Snapshot>,
    /// The appended ledger entry, or None when versioning is disabled for
    /// the table or the best-effort append did not land.
    pub version: Option<chronicle_core::version::VersionRecord>,
}

/// One failed item of a bulk update.
#[derive(Debug)]
pub struct BulkFailure {
    pub record_id: String,
    pub error: ClassifiedError,
}

/// Per-item tally of a bulk update. Partial failure of one item never
/// aborts the rest.
#[derive(Debug, Default)]
pub struct BulkOutcome {
    pub succeeded: usize,
    pub failed: Vec<BulkFailure>,
}

impl BulkOutcome {
    /// Total number of items attempted.
    pub fn total(&self) -> usize {
        self.succeeded + self.failed.len()
    }
}

/// CRUD over live records with versioning, retry, and audit wrapped around
/// every mutation.
///
/// Ledger appends are best-effort relative to the primary mutation: an
/// append failure never rolls the mutation back, it is audit-logged
/// instead. Retried mutations are not exactly-once — a retry after a
/// transient failure whose first attempt actually landed can append a
/// duplicate version. Callers needing stronger guarantees must make their
/// operations idempotent.
#[derive(Clone)]
pub struct VersionedRecords {
    backend: Arc<dyn Backend>,
    ledger: VersionLedger,
    audit: AuditLog,
    retry: RetryConfig,
}

impl VersionedRecords {
    /// Create the API over a backend with the given retry behavior.
    pub fn new(backend: Arc<dyn Backend>, retry: RetryConfig) -> Self {
        Self {
            ledger: VersionLedger::new(Arc::clone(&backend)),
            audit: AuditLog::new(Arc::clone(&backend)),
            backend,
            retry,
        }
    }

    /// The effective versioning policy for a table: the stored config, or
    /// the process-wide default. Config read failures fall back to the
    /// default so a flaky metadata read never blocks a mutation.
    pub async fn config_for(&self, table: &str) -> TableVersioningConfig {
        match self.backend.fetch_config(table).await {
            Ok(Some(config)) => config,
            Ok(None) => TableVersioningConfig::default_for(table),
            Err(e) => {
                tracing::warn!("config read failed for {}, using defaults: {}", table, e);
                TableVersioningConfig::default_for(table)
            }
        }
    }

    /// Insert a new record and version it.
    pub async fn insert(
        &self,
        table: &str,
        record_id: &str,
        fields: Snapshot,
        actor: &str,
        reason: Option<String>,
    ) -> Result<WriteOutcome, ClassifiedError> {
        let config = self.config_for(table).await;

        let result = with_retry(&self.retry, || {
            self.backend.insert_record(table, record_id, &fields)
        })
        .await;
        if let Err(e) = result {
            self.note_failure(AuditOperation::Create, table, record_id, actor, &e)
                .await;
            return Err(e);
        }

        let version = if config.is_enabled {
            self.append_best_effort(
                NewVersion::new(
                    table,
                    record_id,
                    OperationType::Insert,
                    None,
                    Some(fields.clone()),
                    Vec::new(),
                    actor,
                    reason.clone(),
                ),
                actor,
            )
            .await
        } else {
            None
        };

        self.audit
            .log(audit_entry(
                AuditOperation::Create,
                table,
                record_id,
                actor,
                reason.as_deref(),
            ))
            .await;

        Ok(WriteOutcome {
            table: table.to_string(),
            record_id: record_id.to_string(),
            operation: OperationType::Insert,
            state: Some(fields),
            version,
        })
    }

    /// Apply a partial patch to an existing record and version the change.
    pub async fn update(
        &self,
        table: &str,
        record_id: &str,
        patch: Snapshot,
        actor: &str,
        reason: Option<String>,
    ) -> Result<WriteOutcome, ClassifiedError> {
        let config = self.config_for(table).await;

        let old = self.fetch_existing(table, record_id).await?;
        let new = merged(&old, &patch);
        let changed = changed_fields(&old, &new, &config);

        let result = with_retry(&self.retry, || {
            self.backend.update_record(table, record_id, &new)
        })
        .await;
        if let Err(e) = result {
            self.note_failure(AuditOperation::Update, table, record_id, actor, &e)
                .await;
            return Err(e);
        }

        let version = if config.is_enabled {
            self.append_best_effort(
                NewVersion::new(
                    table,
                    record_id,
                    OperationType::Update,
                    Some(old),
                    Some(new.clone()),
                    changed.clone(),
                    actor,
                    reason.clone(),
                ),
                actor,
            )
            .await
        } else {
            None
        };

        self.audit
            .log(
                audit_entry(
                    AuditOperation::Update,
                    table,
                    record_id,
                    actor,
                    reason.as_deref(),
                )
                .with_detail("changed_fields", changed.join(",")),
            )
            .await;

        Ok(WriteOutcome {
            table: table.to_string(),
            record_id: record_id.to_string(),
            operation: OperationType::Update,
            state: Some(new),
            version,
        })
    }

    /// Delete a record. Soft deletes go through the update path stamping
    /// `deleted_at`; hard deletes remove the row after capturing its last
    /// state for the DELETE version entry.
    pub async fn delete(
        &self,
        table: &str,
        record_id: &str,
        mode: DeleteMode,
        actor: &str,
        reason: Option<String>,
    ) -> Result<WriteOutcome, ClassifiedError> {
        match mode {
            DeleteMode::Soft => {
                let mut patch = Snapshot::new();
                patch.insert(
                    DELETED_AT_FIELD.to_string(),
                    Value::String(Utc::now().to_rfc3339()),
                );
                // Soft deletes are UPDATE versions in the ledger
                self.update(table, record_id, patch, actor, reason).await
            }
            DeleteMode::Hard => {
                let config = self.config_for(table).await;
                let old = self.fetch_existing(table, record_id).await?;

                let result = with_retry(&self.retry, || {
                    self.backend.delete_record(table, record_id)
                })
                .await;
                if let Err(e) = result {
                    self.note_failure(AuditOperation::Delete, table, record_id, actor, &e)
                        .await;
                    return Err(e);
                }

                let version = if config.is_enabled {
                    self.append_best_effort(
                        NewVersion::new(
                            table,
                            record_id,
                            OperationType::Delete,
                            Some(old),
                            None,
                            Vec::new(),
                            actor,
                            reason.clone(),
                        ),
                        actor,
                    )
                    .await
                } else {
                    None
                };

                self.audit
                    .log(
                        audit_entry(
                            AuditOperation::Delete,
                            table,
                            record_id,
                            actor,
                            reason.as_deref(),
                        )
                        .with_detail("mode", "hard"),
                    )
                    .await;

                Ok(WriteOutcome {
                    table: table.to_string(),
                    record_id: record_id.to_string(),
                    operation: OperationType::Delete,
                    state: None,
                    version,
                })
            }
        }
    }

    /// Insert the record if absent, otherwise patch it.
    pub async fn upsert(
        &self,
        table: &str,
        record_id: &str,
        fields: Snapshot,
        actor: &str,
        reason: Option<String>,
    ) -> Result<WriteOutcome, ClassifiedError> {
        let existing = with_retry(&self.retry, || {
            self.backend.fetch_record(table, record_id)
        })
        .await?;

        match existing {
            Some(_) => self.update(table, record_id, fields, actor, reason).await,
            None => self.insert(table, record_id, fields, actor, reason).await,
        }
    }

    /// Apply (id, patch) pairs sequentially, each independently versioned.
    /// One item failing never aborts the rest; the caller receives a
    /// per-item tally.
    pub async fn bulk_update(
        &self,
        table: &str,
        items: Vec<(String, Snapshot)>,
        actor: &str,
        reason: Option<String>,
    ) -> BulkOutcome {
        let mut outcome = BulkOutcome::default();
        for (record_id, patch) in items {
            match self
                .update(table, &record_id, patch, actor, reason.clone())
                .await
            {
                Ok(_) => outcome.succeeded += 1,
                Err(error) => {
                    tracing::warn!(
                        "bulk update item {}/{} failed: {}",
                        table,
                        record_id,
                        error
                    );
                    outcome.failed.push(BulkFailure { record_id, error });
                }
            }
        }
        outcome
    }

    /// Overwrite a record's live state with a historical snapshot and
    /// append a RESTORE version. Used by the restore engine; resurrects
    /// hard-deleted records through the upsert path.
    pub(crate) async fn apply_restore(
        &self,
        table: &str,
        record_id: &str,
        snapshot: Snapshot,
        actor: &str,
        reason: Option<String>,
        source_version: &ulid::Ulid,
    ) -> Result<WriteOutcome, ClassifiedError> {
        let config = self.config_for(table).await;
        let old = with_retry(&self.retry, || {
            self.backend.fetch_record(table, record_id)
        })
        .await?;

        let result = with_retry(&self.retry, || {
            self.backend.upsert_record(table, record_id, &snapshot)
        })
        .await;
        if let Err(e) = result {
            self.note_failure(AuditOperation::Update, table, record_id, actor, &e)
                .await;
            return Err(e);
        }

        let changed = match &old {
            Some(old) => changed_fields(old, &snapshot, &config),
            None => Vec::new(),
        };

        let version = if config.is_enabled {
            self.append_best_effort(
                NewVersion::new(
                    table,
                    record_id,
                    OperationType::Restore,
                    old,
                    Some(snapshot.clone()),
                    changed,
                    actor,
                    reason.clone(),
                ),
                actor,
            )
            .await
        } else {
            None
        };

        self.audit
            .log(
                audit_entry(
                    AuditOperation::Update,
                    table,
                    record_id,
                    actor,
                    reason.as_deref(),
                )
                .with_detail("restored_from", source_version.to_string()),
            )
            .await;

        Ok(WriteOutcome {
            table: table.to_string(),
            record_id: record_id.to_string(),
            operation: OperationType::Restore,
            state: Some(snapshot),
            version,
        })
    }

    /// Read access to the underlying ledger.
    pub fn ledger(&self) -> &VersionLedger {
        &self.ledger
    }

    /// Read access to the audit log.
    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    async fn fetch_existing(
        &self,
        table: &str,
        record_id: &str,
    ) -> Result<Snapshot, ClassifiedError> {
        with_retry(&self.retry, || {
            self.backend.fetch_record(table, record_id)
        })
        .await?
        .ok_or_else(|| {
            ClassifiedError::not_found(format!("no record {record_id} in {table}"))
        })
    }

    /// Append a ledger entry after a successful mutation. Failures do not
    /// roll the mutation back; the gap is audit-logged for reconciliation.
    async fn append_best_effort(
        &self,
        version: NewVersion,
        actor: &str,
    ) -> Option<chronicle_core::version::VersionRecord> {
        let table = version.table_name.clone();
        let record_id = version.record_id.clone();
        match self.ledger.record_version(version).await {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!(
                    "version append failed after successful mutation on {}/{}: {}",
                    table,
                    record_id,
                    e
                );
                self.audit
                    .log(
                        AuditEntry::new(AuditOperation::Update, table, record_id, actor)
                            .with_detail("version_error", e.to_string()),
                    )
                    .await;
                None
            }
        }
    }

    /// Best-effort audit of DATABASE- and UNKNOWN-class failures for later
    /// investigation. Never blocks or alters the surfaced error.
    async fn note_failure(
        &self,
        operation: AuditOperation,
        table: &str,
        record_id: &str,
        actor: &str,
        error: &ClassifiedError,
    ) {
        if matches!(error.code, ErrorCode::Database | ErrorCode::Unknown) {
            self.audit
                .log(
                    AuditEntry::new(operation, table, record_id, actor)
                        .with_detail("error_code", error.code.as_str())
                        .with_detail("error", error.message.clone()),
                )
                .await;
        }
    }
}

fn audit_entry(
    operation: AuditOperation,
    table: &str,
    record_id: &str,
    actor: &str,
    reason: Option<&str>,
) -> AuditEntry {
    let entry = AuditEntry::new(operation, table, record_id, actor);
    match reason {
        Some(reason) => entry.with_detail("reason", reason),
        None => entry,
    }
}

fn merged(old: &Snapshot, patch: &Snapshot) -> Snapshot {
    let mut merged = old.clone();
    for (key, value) in patch {
        merged.insert(key.clone(), value.clone());
    }
    merged
}
