// ABOUTME: Retention engine pruning version history by age and per-record count caps.
// ABOUTME: Never deletes the newest version of a record that still exists, so every live record stays restorable.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use ulid::Ulid;

use chronicle_core::audit::{AuditEntry, AuditOperation};
use chronicle_core::config::TableVersioningConfig;
use chronicle_core::error::ClassifiedError;
use chronicle_core::version::VersionRecord;

use crate::audit::AuditLog;
use crate::backend::Backend;

/// What a cleanup pass removed.
#[derive(Debug, Default)]
pub struct CleanupOutcome {
    /// Versions deleted per table; tables with nothing expired are absent.
    pub per_table: BTreeMap<String, u64>,
}

impl CleanupOutcome {
    /// Total versions deleted across all tables.
    pub fn total(&self) -> u64 {
        self.per_table.values().sum()
    }
}

/// Prunes expired version entries according to each table's policy.
#[derive(Clone)]
pub struct RetentionEngine {
    backend: Arc<dyn Backend>,
    audit: AuditLog,
}

impl RetentionEngine {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            audit: AuditLog::new(Arc::clone(&backend)),
            backend,
        }
    }

    /// Delete expired versions for one table, or for every table in the
    /// ledger when `table` is None. Each table is audited with its deleted
    /// count; a table failing never stops the sweep of the rest.
    pub async fn cleanup(&self, table: Option<&str>) -> Result<CleanupOutcome, ClassifiedError> {
        let tables = match table {
            Some(name) => vec![name.to_string()],
            None => self
                .backend
                .version_tables()
                .await
                .map_err(|e| chronicle_core::classify(&e))?,
        };

        let mut outcome = CleanupOutcome::default();
        for name in tables {
            match self.cleanup_table(&name).await {
                Ok(0) => {}
                Ok(deleted) => {
                    outcome.per_table.insert(name, deleted);
                }
                Err(e) => {
                    tracing::warn!("retention sweep failed for {}: {}", name, e);
                    if table.is_some() {
                        return Err(e);
                    }
                }
            }
        }
        Ok(outcome)
    }

    async fn cleanup_table(&self, table: &str) -> Result<u64, ClassifiedError> {
        let config = match self
            .backend
            .fetch_config(table)
            .await
            .map_err(|e| chronicle_core::classify(&e))?
        {
            Some(config) => config,
            None => TableVersioningConfig::default_for(table),
        };

        let versions = self
            .backend
            .list_versions(table, None, usize::MAX)
            .await
            .map_err(|e| chronicle_core::classify(&e))?;

        let live = self
            .backend
            .live_record_ids(table)
            .await
            .map_err(|e| chronicle_core::classify(&e))?;

        let expired = expired_version_ids(&versions, &config, &live);
        let deleted = if expired.is_empty() {
            0
        } else {
            self.backend
                .delete_versions(&expired)
                .await
                .map_err(|e| chronicle_core::classify(&e))?
        };

        tracing::info!("retention deleted {} versions from {}", deleted, table);
        // Every invocation is audited, even when nothing expired
        self.audit
            .log(
                AuditEntry::new(AuditOperation::Delete, "version_records", table, "system")
                    .with_detail("deleted_versions", deleted.to_string())
                    .with_detail("retention_days", config.retention_days.to_string()),
            )
            .await;

        Ok(deleted)
    }
}

/// Pick the version ids to delete: anything older than the retention
/// window, plus anything past the per-record count cap. The newest version
/// of a record still present in the live table is always kept.
fn expired_version_ids(
    versions: &[VersionRecord],
    config: &TableVersioningConfig,
    live: &std::collections::BTreeSet<String>,
) -> Vec<Ulid> {
    let cutoff = Utc::now() - Duration::days(config.retention_days);

    let mut per_record: BTreeMap<&str, Vec<&VersionRecord>> = BTreeMap::new();
    for version in versions {
        per_record
            .entry(version.record_id.as_str())
            .or_default()
            .push(version);
    }

    let mut expired = Vec::new();
    for (record_id, mut entries) in per_record {
        entries.sort_by(|a, b| b.sequence_number.cmp(&a.sequence_number));
        let protect_newest = live.contains(record_id);

        for (index, version) in entries.iter().enumerate() {
            if index == 0 && protect_newest {
                continue;
            }
            let too_old = version.created_at < cutoff;
            let over_cap = config
                .max_versions_per_record
                .is_some_and(|cap| index >= cap as usize);
            if too_old || over_cap {
                expired.push(version.id);
            }
        }
    }
    expired
}
