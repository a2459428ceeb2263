// ABOUTME: Fire-and-forget audit logger over the backend's audit_logs table.
// ABOUTME: Writes may fail silently and return false; they never raise and never block the primary operation.

use std::sync::Arc;

use chronicle_core::audit::{AuditEntry, AuditFilter};
use chronicle_core::error::ClassifiedError;

use crate::backend::Backend;

/// Best-effort audit trail. Appends swallow every failure by contract:
/// an audit problem must never fail the caller's primary operation.
#[derive(Clone)]
pub struct AuditLog {
    backend: Arc<dyn Backend>,
}

impl AuditLog {
    /// Create an audit log over the given backend.
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    /// Append an entry. Returns false (and traces the failure) instead of
    /// erroring when the write does not land.
    pub async fn log(&self, entry: AuditEntry) -> bool {
        match self.backend.append_audit(&entry).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    "audit append failed for {} {}/{}: {}",
                    entry.operation,
                    entry.entity,
                    entry.entity_id,
                    e
                );
                false
            }
        }
    }

    /// Filtered audit history, most-recent-first, capped at the audit
    /// result limit.
    pub async fn get_history(
        &self,
        filter: &AuditFilter,
    ) -> Result<Vec<AuditEntry>, ClassifiedError> {
        self.backend
            .list_audit(filter)
            .await
            .map_err(|e| chronicle_core::classify(&e))
    }

    /// All audit entries for one entity, most-recent-first.
    pub async fn get_entity_history(
        &self,
        entity: &str,
        entity_id: &str,
    ) -> Result<Vec<AuditEntry>, ClassifiedError> {
        let filter = AuditFilter {
            entity: Some(entity.to_string()),
            entity_id: Some(entity_id.to_string()),
            ..AuditFilter::default()
        };
        self.get_history(&filter).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::SqliteBackend;
    use async_trait::async_trait;
    use chronicle_core::audit::AuditOperation;
    use chronicle_core::error::StoreError;
    use chronicle_core::version::{NewVersion, Snapshot, TableSummary, VersionRecord};
    use std::collections::BTreeSet;
    use ulid::Ulid;

    #[tokio::test]
    async fn log_and_read_back_entity_history() {
        let log = AuditLog::new(Arc::new(SqliteBackend::in_memory().unwrap()));

        assert!(
            log.log(AuditEntry::new(
                AuditOperation::Create,
                "shifts",
                "r1",
                "ana@example.com"
            ))
            .await
        );
        assert!(
            log.log(AuditEntry::new(
                AuditOperation::Update,
                "shifts",
                "r1",
                "ana@example.com"
            ))
            .await
        );
        assert!(
            log.log(AuditEntry::new(
                AuditOperation::Create,
                "rooms",
                "a",
                "bo@example.com"
            ))
            .await
        );

        let history = log.get_entity_history("shifts", "r1").await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|e| e.entity_id == "r1"));
    }

    /// A backend whose audit writes always fail, to pin the never-raises
    /// contract.
    struct BrokenAudit;

    #[async_trait]
    impl Backend for BrokenAudit {
        async fn fetch_record(&self, _: &str, _: &str) -> Result<Option<Snapshot>, StoreError> {
            unimplemented!()
        }
        async fn insert_record(&self, _: &str, _: &str, _: &Snapshot) -> Result<(), StoreError> {
            unimplemented!()
        }
        async fn update_record(&self, _: &str, _: &str, _: &Snapshot) -> Result<(), StoreError> {
            unimplemented!()
        }
        async fn upsert_record(&self, _: &str, _: &str, _: &Snapshot) -> Result<bool, StoreError> {
            unimplemented!()
        }
        async fn delete_record(&self, _: &str, _: &str) -> Result<(), StoreError> {
            unimplemented!()
        }
        async fn live_record_ids(&self, _: &str) -> Result<BTreeSet<String>, StoreError> {
            unimplemented!()
        }
        async fn append_version(&self, _: &NewVersion) -> Result<VersionRecord, StoreError> {
            unimplemented!()
        }
        async fn fetch_version(&self, _: &Ulid) -> Result<Option<VersionRecord>, StoreError> {
            unimplemented!()
        }
        async fn list_versions(
            &self,
            _: &str,
            _: Option<&str>,
            _: usize,
        ) -> Result<Vec<VersionRecord>, StoreError> {
            unimplemented!()
        }
        async fn delete_versions(&self, _: &[Ulid]) -> Result<u64, StoreError> {
            unimplemented!()
        }
        async fn version_tables(&self) -> Result<Vec<String>, StoreError> {
            unimplemented!()
        }
        async fn version_summary(&self) -> Result<Vec<TableSummary>, StoreError> {
            unimplemented!()
        }
        async fn fetch_config(
            &self,
            _: &str,
        ) -> Result<Option<chronicle_core::TableVersioningConfig>, StoreError> {
            unimplemented!()
        }
        async fn store_config(
            &self,
            _: &chronicle_core::TableVersioningConfig,
        ) -> Result<(), StoreError> {
            unimplemented!()
        }
        async fn append_audit(&self, _: &AuditEntry) -> Result<(), StoreError> {
            Err(StoreError::other("disk on fire"))
        }
        async fn list_audit(&self, _: &AuditFilter) -> Result<Vec<AuditEntry>, StoreError> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn failed_append_returns_false_without_raising() {
        let log = AuditLog::new(Arc::new(BrokenAudit));
        let ok = log
            .log(AuditEntry::new(
                AuditOperation::View,
                "shifts",
                "r1",
                "ana@example.com",
            ))
            .await;
        assert!(!ok);
    }
}
