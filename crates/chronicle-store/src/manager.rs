// ABOUTME: Top-level handle wiring the backend to the record API, ledger, restore, retention, and audit.
// ABOUTME: Opens the SQLite store or wraps any Backend, and hands out the individual engines.

use std::path::Path;
use std::sync::Arc;

use chronicle_core::config::TableVersioningConfig;
use chronicle_core::error::ClassifiedError;
use chronicle_core::retry::RetryConfig;

use crate::audit::AuditLog;
use crate::backend::Backend;
use crate::ledger::VersionLedger;
use crate::records::VersionedRecords;
use crate::restore::RestoreEngine;
use crate::retention::RetentionEngine;
use crate::sqlite::SqliteBackend;

/// One store, fully wired. Cheap to clone; all parts share the backend.
#[derive(Clone)]
pub struct Chronicle {
    backend: Arc<dyn Backend>,
    records: VersionedRecords,
    restore: RestoreEngine,
    retention: RetentionEngine,
}

impl Chronicle {
    /// Open (creating if needed) a SQLite-backed store at `path` with
    /// default retry behavior.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ClassifiedError> {
        let backend =
            SqliteBackend::open(path.as_ref()).map_err(|e| chronicle_core::classify(&e))?;
        Ok(Self::with_backend(Arc::new(backend), RetryConfig::default()))
    }

    /// An in-memory store, for tests and scratch work.
    pub fn in_memory() -> Result<Self, ClassifiedError> {
        let backend = SqliteBackend::in_memory().map_err(|e| chronicle_core::classify(&e))?;
        Ok(Self::with_backend(Arc::new(backend), RetryConfig::default()))
    }

    /// Wire up any backend with the given retry behavior.
    pub fn with_backend(backend: Arc<dyn Backend>, retry: RetryConfig) -> Self {
        let records = VersionedRecords::new(Arc::clone(&backend), retry);
        let restore = RestoreEngine::new(records.clone(), records.ledger().clone());
        let retention = RetentionEngine::new(Arc::clone(&backend));
        Self {
            backend,
            records,
            restore,
            retention,
        }
    }

    /// The versioned CRUD API.
    pub fn records(&self) -> &VersionedRecords {
        &self.records
    }

    /// Read access to the version ledger.
    pub fn ledger(&self) -> &VersionLedger {
        self.records.ledger()
    }

    /// The restore engine.
    pub fn restore(&self) -> &RestoreEngine {
        &self.restore
    }

    /// The retention engine.
    pub fn retention(&self) -> &RetentionEngine {
        &self.retention
    }

    /// The audit log.
    pub fn audit(&self) -> &AuditLog {
        self.records.audit()
    }

    /// Render a table's (or one record's) full version history in the
    /// given format.
    pub async fn export(
        &self,
        table: &str,
        record_id: Option<&str>,
        format: crate::export::ExportFormat,
    ) -> Result<String, ClassifiedError> {
        let history = self
            .ledger()
            .get_history(table, record_id, usize::MAX)
            .await?;
        crate::export::export_history(&history, format)
    }

    /// Store a table's versioning policy.
    pub async fn set_config(&self, config: &TableVersioningConfig) -> Result<(), ClassifiedError> {
        self.backend
            .store_config(config)
            .await
            .map_err(|e| chronicle_core::classify(&e))
    }

    /// The effective versioning policy for a table.
    pub async fn config_for(&self, table: &str) -> TableVersioningConfig {
        self.records.config_for(table).await
    }
}
