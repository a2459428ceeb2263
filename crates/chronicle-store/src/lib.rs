// ABOUTME: Persistence and orchestration for the version ledger: SQLite backend, record API, restore, retention.
// ABOUTME: Pure domain types and the classifier/retry engine live in chronicle-core; this crate wires them to storage.

pub mod audit;
pub mod backend;
pub mod export;
pub mod ledger;
pub mod manager;
pub mod records;
pub mod restore;
pub mod retention;
pub mod sqlite;

pub use audit::AuditLog;
pub use backend::Backend;
pub use export::{ExportFormat, export_history};
pub use ledger::{DEFAULT_HISTORY_LIMIT, VersionLedger};
pub use manager::Chronicle;
pub use records::{BulkOutcome, DeleteMode, VersionedRecords, WriteOutcome};
pub use restore::RestoreEngine;
pub use retention::{CleanupOutcome, RetentionEngine};
pub use sqlite::SqliteBackend;
