// ABOUTME: Core library for chronicle, containing the domain types, error taxonomy, and retry engine.
// ABOUTME: This crate is pure logic; persistence and orchestration live in chronicle-store.

pub mod audit;
pub mod config;
pub mod diff;
pub mod error;
pub mod retry;
pub mod version;

pub use audit::{AUDIT_RESULT_CAP, AuditEntry, AuditFilter, AuditOperation};
pub use config::{DEFAULT_RETENTION_DAYS, TableVersioningConfig};
pub use diff::{FieldDiff, NOT_AVAILABLE, diff_snapshots};
pub use error::{ClassifiedError, ErrorCode, StoreCode, StoreError, classify};
pub use retry::{Backoff, RetryConfig, delay_for_attempt, with_retry};
pub use version::{
    NewVersion, OperationType, Snapshot, TableSummary, VersionRecord, changed_fields,
};
