// ABOUTME: The contract the ledger requires from a backing transactional record store.
// ABOUTME: Implementations surface failures as StoreError; retry and classification happen above.

use std::collections::BTreeSet;

use async_trait::async_trait;
use ulid::Ulid;

use chronicle_core::audit::{AuditEntry, AuditFilter};
use chronicle_core::config::TableVersioningConfig;
use chronicle_core::error::StoreError;
use chronicle_core::version::{NewVersion, Snapshot, TableSummary, VersionRecord};

/// A transactional record store reachable through a call-style interface.
///
/// Implementations must serialize their own writes; callers provide no
/// coordination beyond that. Every method is a single request/response
/// round trip.
#[async_trait]
pub trait Backend: Send + Sync {
    // Live records

    /// Fetch a record's current fields, or None if it does not exist.
    async fn fetch_record(
        &self,
        table: &str,
        record_id: &str,
    ) -> Result<Option<Snapshot>, StoreError>;

    /// Insert a new record. Fails with a unique violation if it exists.
    async fn insert_record(
        &self,
        table: &str,
        record_id: &str,
        fields: &Snapshot,
    ) -> Result<(), StoreError>;

    /// Replace an existing record's fields. Fails with record_not_found if
    /// it does not exist.
    async fn update_record(
        &self,
        table: &str,
        record_id: &str,
        fields: &Snapshot,
    ) -> Result<(), StoreError>;

    /// Insert or replace a record. Returns true when a new row was created.
    async fn upsert_record(
        &self,
        table: &str,
        record_id: &str,
        fields: &Snapshot,
    ) -> Result<bool, StoreError>;

    /// Physically remove a record. Fails with record_not_found if absent.
    async fn delete_record(&self, table: &str, record_id: &str) -> Result<(), StoreError>;

    /// The ids of all records currently present in a table, including
    /// soft-deleted rows (their live row still exists).
    async fn live_record_ids(&self, table: &str) -> Result<BTreeSet<String>, StoreError>;

    // Version ledger

    /// Append a version entry, assigning the next sequence number for its
    /// (table, record) pair atomically with the write.
    async fn append_version(&self, version: &NewVersion) -> Result<VersionRecord, StoreError>;

    /// Fetch one version entry by id.
    async fn fetch_version(&self, id: &Ulid) -> Result<Option<VersionRecord>, StoreError>;

    /// List version entries most-recent-first. With a record id the order
    /// is strictly by descending sequence number; table-wide it is by
    /// recency. `limit == usize::MAX` means unbounded.
    async fn list_versions(
        &self,
        table: &str,
        record_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<VersionRecord>, StoreError>;

    /// Delete version entries by id, returning how many rows went away.
    async fn delete_versions(&self, ids: &[Ulid]) -> Result<u64, StoreError>;

    /// Distinct table names present in the ledger.
    async fn version_tables(&self) -> Result<Vec<String>, StoreError>;

    /// Per-table aggregates over the ledger.
    async fn version_summary(&self) -> Result<Vec<TableSummary>, StoreError>;

    // Versioning configuration

    /// Fetch the versioning policy for a table, if one was stored.
    async fn fetch_config(&self, table: &str)
    -> Result<Option<TableVersioningConfig>, StoreError>;

    /// Store (insert or replace) a table's versioning policy.
    async fn store_config(&self, config: &TableVersioningConfig) -> Result<(), StoreError>;

    // Audit trail

    /// Append an audit entry.
    async fn append_audit(&self, entry: &AuditEntry) -> Result<(), StoreError>;

    /// List audit entries most-recent-first, filtered and capped.
    async fn list_audit(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>, StoreError>;
}
