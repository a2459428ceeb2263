// ABOUTME: SQLite-backed implementation of the Backend contract.
// ABOUTME: Persists records, version_records, versioning_metadata, and audit_logs; maps constraint failures to structured store codes.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params, params_from_iter};
use ulid::Ulid;

use chronicle_core::audit::{AuditEntry, AuditFilter, AuditOperation};
use chronicle_core::config::TableVersioningConfig;
use chronicle_core::error::{StoreCode, StoreError};
use chronicle_core::version::{
    NewVersion, OperationType, Snapshot, TableSummary, VersionRecord,
};

use crate::backend::Backend;

/// A SQLite-backed record store with versioning and audit tables.
/// Serves as the shipped backend for local deployments; everything above
/// it talks only through the `Backend` trait.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    /// Open or create a database at the given path and run the schema
    /// bootstrap.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(map_sqlite_err)?;
        Self::init(conn)
    }

    /// An in-memory database, mainly for tests.
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(map_sqlite_err)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(map_sqlite_err)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS records (
                table_name TEXT NOT NULL,
                record_id TEXT NOT NULL,
                fields TEXT NOT NULL,
                PRIMARY KEY (table_name, record_id)
            );

            CREATE TABLE IF NOT EXISTS version_records (
                id TEXT PRIMARY KEY,
                table_name TEXT NOT NULL,
                record_id TEXT NOT NULL,
                operation_type TEXT NOT NULL,
                old_values TEXT,
                new_values TEXT,
                changed_fields TEXT NOT NULL,
                actor TEXT NOT NULL,
                actor_id TEXT,
                reason TEXT,
                created_at TEXT NOT NULL,
                sequence_number INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_versions_scope
                ON version_records (table_name, record_id, sequence_number);

            CREATE TABLE IF NOT EXISTS versioning_metadata (
                table_name TEXT PRIMARY KEY,
                is_enabled INTEGER NOT NULL,
                retention_days INTEGER NOT NULL,
                max_versions_per_record INTEGER,
                track_fields TEXT,
                exclude_fields TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS audit_logs (
                id TEXT PRIMARY KEY,
                operation TEXT NOT NULL,
                entity TEXT NOT NULL,
                entity_id TEXT NOT NULL,
                actor TEXT NOT NULL,
                details TEXT NOT NULL,
                timestamp TEXT NOT NULL
            );",
        )
        .map_err(map_sqlite_err)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::other("sqlite connection mutex poisoned"))
    }
}

/// Translate a rusqlite failure into the store error contract, attaching a
/// structured code where SQLite gives us enough to decide.
fn map_sqlite_err(err: rusqlite::Error) -> StoreError {
    match &err {
        rusqlite::Error::QueryReturnedNoRows => {
            StoreError::structured(StoreCode::RecordNotFound, "query returned no rows")
        }
        rusqlite::Error::SqliteFailure(failure, message) => {
            let text = message
                .clone()
                .unwrap_or_else(|| failure.to_string());
            let code = match failure.code {
                rusqlite::ErrorCode::ConstraintViolation => {
                    // SQLite only distinguishes constraint kinds in the text
                    if text.contains("UNIQUE") {
                        Some(StoreCode::UniqueViolation)
                    } else if text.contains("FOREIGN KEY") {
                        Some(StoreCode::ForeignKeyViolation)
                    } else if text.contains("NOT NULL") {
                        Some(StoreCode::NotNullViolation)
                    } else if text.contains("CHECK") {
                        Some(StoreCode::CheckViolation)
                    } else {
                        None
                    }
                }
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked => {
                    Some(StoreCode::Busy)
                }
                rusqlite::ErrorCode::DatabaseCorrupt | rusqlite::ErrorCode::NotADatabase => {
                    Some(StoreCode::Corrupted)
                }
                rusqlite::ErrorCode::PermissionDenied => Some(StoreCode::InsufficientPrivilege),
                _ => None,
            };
            match code {
                Some(code) => StoreError::structured(code, text),
                None => StoreError::other(text),
            }
        }
        _ => StoreError::other(err.to_string()),
    }
}

fn snapshot_to_text(snapshot: Option<&Snapshot>) -> Result<Option<String>, StoreError> {
    snapshot
        .map(|s| serde_json::to_string(s).map_err(|e| StoreError::other(e.to_string())))
        .transpose()
}

fn text_to_snapshot(text: Option<String>) -> Result<Option<Snapshot>, StoreError> {
    text.map(|t| {
        serde_json::from_str(&t)
            .map_err(|e| StoreError::structured(StoreCode::Corrupted, e.to_string()))
    })
    .transpose()
}

fn parse_ulid(s: &str) -> Result<Ulid, StoreError> {
    s.parse::<Ulid>()
        .map_err(|e| StoreError::structured(StoreCode::Corrupted, format!("bad ulid {s}: {e}")))
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            StoreError::structured(StoreCode::Corrupted, format!("bad timestamp {s}: {e}"))
        })
}

/// A version_records row as raw column values, parsed outside the query
/// closure so parse failures surface as StoreError rather than panics.
struct RawVersion {
    id: String,
    table_name: String,
    record_id: String,
    operation_type: String,
    old_values: Option<String>,
    new_values: Option<String>,
    changed_fields: String,
    actor: String,
    actor_id: Option<String>,
    reason: Option<String>,
    created_at: String,
    sequence_number: i64,
}

const VERSION_COLUMNS: &str = "id, table_name, record_id, operation_type, old_values, new_values, \
     changed_fields, actor, actor_id, reason, created_at, sequence_number";

fn raw_version_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawVersion> {
    Ok(RawVersion {
        id: row.get(0)?,
        table_name: row.get(1)?,
        record_id: row.get(2)?,
        operation_type: row.get(3)?,
        old_values: row.get(4)?,
        new_values: row.get(5)?,
        changed_fields: row.get(6)?,
        actor: row.get(7)?,
        actor_id: row.get(8)?,
        reason: row.get(9)?,
        created_at: row.get(10)?,
        sequence_number: row.get(11)?,
    })
}

impl RawVersion {
    fn parse(self) -> Result<VersionRecord, StoreError> {
        let operation_type = OperationType::parse(&self.operation_type).ok_or_else(|| {
            StoreError::structured(
                StoreCode::Corrupted,
                format!("bad operation type {}", self.operation_type),
            )
        })?;
        let changed_fields: Vec<String> = serde_json::from_str(&self.changed_fields)
            .map_err(|e| StoreError::structured(StoreCode::Corrupted, e.to_string()))?;

        Ok(VersionRecord {
            id: parse_ulid(&self.id)?,
            table_name: self.table_name,
            record_id: self.record_id,
            operation_type,
            old_values: text_to_snapshot(self.old_values)?,
            new_values: text_to_snapshot(self.new_values)?,
            changed_fields,
            actor: self.actor,
            actor_id: self.actor_id,
            reason: self.reason,
            created_at: parse_timestamp(&self.created_at)?,
            sequence_number: self.sequence_number,
        })
    }
}

#[async_trait]
impl Backend for SqliteBackend {
    async fn fetch_record(
        &self,
        table: &str,
        record_id: &str,
    ) -> Result<Option<Snapshot>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT fields FROM records WHERE table_name = ?1 AND record_id = ?2")
            .map_err(map_sqlite_err)?;
        let result = stmt.query_row(params![table, record_id], |row| row.get::<_, String>(0));
        match result {
            Ok(text) => text_to_snapshot(Some(text)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(map_sqlite_err(e)),
        }
    }

    async fn insert_record(
        &self,
        table: &str,
        record_id: &str,
        fields: &Snapshot,
    ) -> Result<(), StoreError> {
        let text = snapshot_to_text(Some(fields))?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO records (table_name, record_id, fields) VALUES (?1, ?2, ?3)",
            params![table, record_id, text],
        )
        .map_err(map_sqlite_err)?;
        Ok(())
    }

    async fn update_record(
        &self,
        table: &str,
        record_id: &str,
        fields: &Snapshot,
    ) -> Result<(), StoreError> {
        let text = snapshot_to_text(Some(fields))?;
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE records SET fields = ?3 WHERE table_name = ?1 AND record_id = ?2",
                params![table, record_id, text],
            )
            .map_err(map_sqlite_err)?;
        if changed == 0 {
            return Err(StoreError::structured(
                StoreCode::RecordNotFound,
                format!("no record {record_id} in {table}"),
            ));
        }
        Ok(())
    }

    async fn upsert_record(
        &self,
        table: &str,
        record_id: &str,
        fields: &Snapshot,
    ) -> Result<bool, StoreError> {
        let text = snapshot_to_text(Some(fields))?;
        let conn = self.lock()?;
        let existed: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM records WHERE table_name = ?1 AND record_id = ?2)",
                params![table, record_id],
                |row| row.get(0),
            )
            .map_err(map_sqlite_err)?;
        conn.execute(
            "INSERT INTO records (table_name, record_id, fields) VALUES (?1, ?2, ?3)
             ON CONFLICT(table_name, record_id) DO UPDATE SET fields = excluded.fields",
            params![table, record_id, text],
        )
        .map_err(map_sqlite_err)?;
        Ok(!existed)
    }

    async fn delete_record(&self, table: &str, record_id: &str) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "DELETE FROM records WHERE table_name = ?1 AND record_id = ?2",
                params![table, record_id],
            )
            .map_err(map_sqlite_err)?;
        if changed == 0 {
            return Err(StoreError::structured(
                StoreCode::RecordNotFound,
                format!("no record {record_id} in {table}"),
            ));
        }
        Ok(())
    }

    async fn live_record_ids(&self, table: &str) -> Result<BTreeSet<String>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT record_id FROM records WHERE table_name = ?1")
            .map_err(map_sqlite_err)?;
        let rows = stmt
            .query_map(params![table], |row| row.get::<_, String>(0))
            .map_err(map_sqlite_err)?;

        let mut ids = BTreeSet::new();
        for row in rows {
            ids.insert(row.map_err(map_sqlite_err)?);
        }
        Ok(ids)
    }

    async fn append_version(&self, version: &NewVersion) -> Result<VersionRecord, StoreError> {
        let old_text = snapshot_to_text(version.old_values.as_ref())?;
        let new_text = snapshot_to_text(version.new_values.as_ref())?;
        let changed_text = serde_json::to_string(&version.changed_fields)
            .map_err(|e| StoreError::other(e.to_string()))?;

        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(map_sqlite_err)?;

        // Sequence assignment and insert share the transaction, so two
        // concurrent appends can never claim the same number.
        let sequence_number: i64 = tx
            .query_row(
                "SELECT COALESCE(MAX(sequence_number), 0) + 1 FROM version_records
                 WHERE table_name = ?1 AND record_id = ?2",
                params![version.table_name, version.record_id],
                |row| row.get(0),
            )
            .map_err(map_sqlite_err)?;

        tx.execute(
            "INSERT INTO version_records
             (id, table_name, record_id, operation_type, old_values, new_values,
              changed_fields, actor, actor_id, reason, created_at, sequence_number)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                version.id.to_string(),
                version.table_name,
                version.record_id,
                version.operation_type.as_str(),
                old_text,
                new_text,
                changed_text,
                version.actor,
                version.actor_id,
                version.reason,
                version.created_at.to_rfc3339(),
                sequence_number,
            ],
        )
        .map_err(map_sqlite_err)?;

        tx.commit().map_err(map_sqlite_err)?;
        Ok(version.clone().into_record(sequence_number))
    }

    async fn fetch_version(&self, id: &Ulid) -> Result<Option<VersionRecord>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {VERSION_COLUMNS} FROM version_records WHERE id = ?1"
            ))
            .map_err(map_sqlite_err)?;
        let result = stmt.query_row(params![id.to_string()], raw_version_from_row);
        match result {
            Ok(raw) => Ok(Some(raw.parse()?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(map_sqlite_err(e)),
        }
    }

    async fn list_versions(
        &self,
        table: &str,
        record_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<VersionRecord>, StoreError> {
        // SQLite treats a negative LIMIT as unbounded
        let limit: i64 = if limit == usize::MAX {
            -1
        } else {
            limit.min(i64::MAX as usize) as i64
        };

        let conn = self.lock()?;
        let raw_rows: Vec<rusqlite::Result<RawVersion>> = match record_id {
            Some(record_id) => {
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT {VERSION_COLUMNS} FROM version_records
                         WHERE table_name = ?1 AND record_id = ?2
                         ORDER BY sequence_number DESC LIMIT ?3"
                    ))
                    .map_err(map_sqlite_err)?;
                let rows = stmt
                    .query_map(params![table, record_id, limit], raw_version_from_row)
                    .map_err(map_sqlite_err)?;
                rows.collect()
            }
            None => {
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT {VERSION_COLUMNS} FROM version_records
                         WHERE table_name = ?1
                         ORDER BY created_at DESC, sequence_number DESC LIMIT ?2"
                    ))
                    .map_err(map_sqlite_err)?;
                let rows = stmt
                    .query_map(params![table, limit], raw_version_from_row)
                    .map_err(map_sqlite_err)?;
                rows.collect()
            }
        };

        let mut versions = Vec::new();
        for raw in raw_rows {
            versions.push(raw.map_err(map_sqlite_err)?.parse()?);
        }
        Ok(versions)
    }

    async fn delete_versions(&self, ids: &[Ulid]) -> Result<u64, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(map_sqlite_err)?;
        let mut deleted = 0u64;
        for id in ids {
            deleted += tx
                .execute(
                    "DELETE FROM version_records WHERE id = ?1",
                    params![id.to_string()],
                )
                .map_err(map_sqlite_err)? as u64;
        }
        tx.commit().map_err(map_sqlite_err)?;
        Ok(deleted)
    }

    async fn version_tables(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT DISTINCT table_name FROM version_records ORDER BY table_name")
            .map_err(map_sqlite_err)?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(map_sqlite_err)?;

        let mut tables = Vec::new();
        for row in rows {
            tables.push(row.map_err(map_sqlite_err)?);
        }
        Ok(tables)
    }

    async fn version_summary(&self) -> Result<Vec<TableSummary>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT table_name,
                        COUNT(*),
                        COUNT(DISTINCT record_id),
                        MAX(created_at),
                        SUM(CASE WHEN operation_type = 'INSERT' THEN 1 ELSE 0 END),
                        SUM(CASE WHEN operation_type = 'UPDATE' THEN 1 ELSE 0 END),
                        SUM(CASE WHEN operation_type = 'DELETE' THEN 1 ELSE 0 END),
                        SUM(CASE WHEN operation_type = 'RESTORE' THEN 1 ELSE 0 END)
                 FROM version_records GROUP BY table_name ORDER BY table_name",
            )
            .map_err(map_sqlite_err)?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, i64>(6)?,
                    row.get::<_, i64>(7)?,
                ))
            })
            .map_err(map_sqlite_err)?;

        let mut summaries = Vec::new();
        for row in rows {
            let (table_name, total, unique, last, inserts, updates, deletes, restores) =
                row.map_err(map_sqlite_err)?;
            let last_change = last.as_deref().map(parse_timestamp).transpose()?;
            summaries.push(TableSummary {
                table_name,
                total_versions: total as u64,
                unique_records: unique as u64,
                last_change,
                inserts: inserts as u64,
                updates: updates as u64,
                deletes: deletes as u64,
                restores: restores as u64,
            });
        }
        Ok(summaries)
    }

    async fn fetch_config(
        &self,
        table: &str,
    ) -> Result<Option<TableVersioningConfig>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT is_enabled, retention_days, max_versions_per_record,
                        track_fields, exclude_fields, updated_at
                 FROM versioning_metadata WHERE table_name = ?1",
            )
            .map_err(map_sqlite_err)?;
        let result = stmt.query_row(params![table], |row| {
            Ok((
                row.get::<_, bool>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, Option<i64>>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
            ))
        });

        let (is_enabled, retention_days, max_versions, track_text, exclude_text, updated_at) =
            match result {
                Ok(row) => row,
                Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
                Err(e) => return Err(map_sqlite_err(e)),
            };

        let track_fields = track_text
            .map(|t| {
                serde_json::from_str(&t)
                    .map_err(|e| StoreError::structured(StoreCode::Corrupted, e.to_string()))
            })
            .transpose()?;
        let exclude_fields = serde_json::from_str(&exclude_text)
            .map_err(|e| StoreError::structured(StoreCode::Corrupted, e.to_string()))?;

        Ok(Some(TableVersioningConfig {
            table_name: table.to_string(),
            is_enabled,
            retention_days,
            max_versions_per_record: max_versions.map(|m| m as u32),
            track_fields,
            exclude_fields,
            updated_at: parse_timestamp(&updated_at)?,
        }))
    }

    async fn store_config(&self, config: &TableVersioningConfig) -> Result<(), StoreError> {
        let track_text = config
            .track_fields
            .as_ref()
            .map(|t| serde_json::to_string(t).map_err(|e| StoreError::other(e.to_string())))
            .transpose()?;
        let exclude_text = serde_json::to_string(&config.exclude_fields)
            .map_err(|e| StoreError::other(e.to_string()))?;

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO versioning_metadata
             (table_name, is_enabled, retention_days, max_versions_per_record,
              track_fields, exclude_fields, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(table_name) DO UPDATE SET
                is_enabled = excluded.is_enabled,
                retention_days = excluded.retention_days,
                max_versions_per_record = excluded.max_versions_per_record,
                track_fields = excluded.track_fields,
                exclude_fields = excluded.exclude_fields,
                updated_at = excluded.updated_at",
            params![
                config.table_name,
                config.is_enabled,
                config.retention_days,
                config.max_versions_per_record.map(|m| m as i64),
                track_text,
                exclude_text,
                config.updated_at.to_rfc3339(),
            ],
        )
        .map_err(map_sqlite_err)?;
        Ok(())
    }

    async fn append_audit(&self, entry: &AuditEntry) -> Result<(), StoreError> {
        let details = serde_json::to_string(&entry.details)
            .map_err(|e| StoreError::other(e.to_string()))?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO audit_logs (id, operation, entity, entity_id, actor, details, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                entry.id.to_string(),
                entry.operation.as_str(),
                entry.entity,
                entry.entity_id,
                entry.actor,
                details,
                entry.timestamp.to_rfc3339(),
            ],
        )
        .map_err(map_sqlite_err)?;
        Ok(())
    }

    async fn list_audit(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>, StoreError> {
        let mut sql = String::from(
            "SELECT id, operation, entity, entity_id, actor, details, timestamp
             FROM audit_logs WHERE 1=1",
        );
        let mut values: Vec<String> = Vec::new();

        if let Some(since) = &filter.since {
            sql.push_str(&format!(" AND timestamp >= ?{}", values.len() + 1));
            values.push(since.to_rfc3339());
        }
        if let Some(until) = &filter.until {
            sql.push_str(&format!(" AND timestamp <= ?{}", values.len() + 1));
            values.push(until.to_rfc3339());
        }
        if let Some(operation) = &filter.operation {
            sql.push_str(&format!(" AND operation = ?{}", values.len() + 1));
            values.push(operation.as_str().to_string());
        }
        if let Some(entity) = &filter.entity {
            sql.push_str(&format!(" AND entity = ?{}", values.len() + 1));
            values.push(entity.clone());
        }
        if let Some(entity_id) = &filter.entity_id {
            sql.push_str(&format!(" AND entity_id = ?{}", values.len() + 1));
            values.push(entity_id.clone());
        }
        if let Some(actor) = &filter.actor {
            sql.push_str(&format!(" AND actor = ?{}", values.len() + 1));
            values.push(actor.clone());
        }
        sql.push_str(&format!(
            " ORDER BY timestamp DESC, id DESC LIMIT {}",
            filter.effective_limit()
        ));

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql).map_err(map_sqlite_err)?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })
            .map_err(map_sqlite_err)?;

        let mut entries = Vec::new();
        for row in rows {
            let (id, operation, entity, entity_id, actor, details, timestamp) =
                row.map_err(map_sqlite_err)?;
            let operation = AuditOperation::parse(&operation).ok_or_else(|| {
                StoreError::structured(
                    StoreCode::Corrupted,
                    format!("bad audit operation {operation}"),
                )
            })?;
            let details = serde_json::from_str(&details)
                .map_err(|e| StoreError::structured(StoreCode::Corrupted, e.to_string()))?;
            entries.push(AuditEntry {
                id: parse_ulid(&id)?,
                operation,
                entity,
                entity_id,
                actor,
                details,
                timestamp: parse_timestamp(&timestamp)?,
            });
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chronicle_core::version::OperationType;
    use serde_json::json;
    use tempfile::TempDir;

    fn snap(pairs: &[(&str, serde_json::Value)]) -> Snapshot {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn new_version(table: &str, record: &str, op: OperationType, seq_hint: &str) -> NewVersion {
        NewVersion::new(
            table,
            record,
            op,
            None,
            Some(snap(&[("marker", json!(seq_hint))])),
            Vec::new(),
            "tester@example.com",
            None,
        )
    }

    #[tokio::test]
    async fn record_crud_round_trips() {
        let backend = SqliteBackend::in_memory().unwrap();

        let fields = snap(&[("status", json!("pending"))]);
        backend.insert_record("shifts", "r1", &fields).await.unwrap();

        let fetched = backend.fetch_record("shifts", "r1").await.unwrap().unwrap();
        assert_eq!(fetched.get("status"), Some(&json!("pending")));

        let updated = snap(&[("status", json!("active"))]);
        backend.update_record("shifts", "r1", &updated).await.unwrap();
        let fetched = backend.fetch_record("shifts", "r1").await.unwrap().unwrap();
        assert_eq!(fetched.get("status"), Some(&json!("active")));

        backend.delete_record("shifts", "r1").await.unwrap();
        assert!(backend.fetch_record("shifts", "r1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_insert_surfaces_unique_violation() {
        let backend = SqliteBackend::in_memory().unwrap();
        let fields = snap(&[("status", json!("pending"))]);
        backend.insert_record("shifts", "r1", &fields).await.unwrap();

        let err = backend
            .insert_record("shifts", "r1", &fields)
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(StoreCode::UniqueViolation));
    }

    #[tokio::test]
    async fn missing_record_update_and_delete_surface_not_found() {
        let backend = SqliteBackend::in_memory().unwrap();
        let fields = snap(&[("status", json!("x"))]);

        let err = backend
            .update_record("shifts", "ghost", &fields)
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(StoreCode::RecordNotFound));

        let err = backend.delete_record("shifts", "ghost").await.unwrap_err();
        assert_eq!(err.code(), Some(StoreCode::RecordNotFound));
    }

    #[tokio::test]
    async fn upsert_reports_whether_it_inserted() {
        let backend = SqliteBackend::in_memory().unwrap();
        let fields = snap(&[("status", json!("pending"))]);

        assert!(backend.upsert_record("shifts", "r1", &fields).await.unwrap());
        assert!(!backend.upsert_record("shifts", "r1", &fields).await.unwrap());
    }

    #[tokio::test]
    async fn append_assigns_monotonic_sequence_per_record() {
        let backend = SqliteBackend::in_memory().unwrap();

        let v1 = backend
            .append_version(&new_version("shifts", "r1", OperationType::Insert, "a"))
            .await
            .unwrap();
        let v2 = backend
            .append_version(&new_version("shifts", "r1", OperationType::Update, "b"))
            .await
            .unwrap();
        // A different record starts its own sequence
        let other = backend
            .append_version(&new_version("shifts", "r2", OperationType::Insert, "c"))
            .await
            .unwrap();

        assert_eq!(v1.sequence_number, 1);
        assert_eq!(v2.sequence_number, 2);
        assert_eq!(other.sequence_number, 1);
    }

    #[tokio::test]
    async fn list_versions_is_most_recent_first() {
        let backend = SqliteBackend::in_memory().unwrap();
        for op in [
            OperationType::Insert,
            OperationType::Update,
            OperationType::Update,
        ] {
            backend
                .append_version(&new_version("shifts", "r1", op, "x"))
                .await
                .unwrap();
        }

        let versions = backend
            .list_versions("shifts", Some("r1"), 10)
            .await
            .unwrap();
        let sequences: Vec<i64> = versions.iter().map(|v| v.sequence_number).collect();
        assert_eq!(sequences, vec![3, 2, 1]);

        let limited = backend.list_versions("shifts", Some("r1"), 2).await.unwrap();
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[0].sequence_number, 3);
    }

    #[tokio::test]
    async fn fetch_and_delete_versions_by_id() {
        let backend = SqliteBackend::in_memory().unwrap();
        let v1 = backend
            .append_version(&new_version("shifts", "r1", OperationType::Insert, "a"))
            .await
            .unwrap();
        let v2 = backend
            .append_version(&new_version("shifts", "r1", OperationType::Update, "b"))
            .await
            .unwrap();

        let fetched = backend.fetch_version(&v1.id).await.unwrap().unwrap();
        assert_eq!(fetched.sequence_number, 1);
        assert_eq!(fetched.operation_type, OperationType::Insert);

        let deleted = backend.delete_versions(&[v1.id, v2.id]).await.unwrap();
        assert_eq!(deleted, 2);
        assert!(backend.fetch_version(&v1.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn summary_aggregates_by_table_and_operation() {
        let backend = SqliteBackend::in_memory().unwrap();
        backend
            .append_version(&new_version("shifts", "r1", OperationType::Insert, "a"))
            .await
            .unwrap();
        backend
            .append_version(&new_version("shifts", "r1", OperationType::Update, "b"))
            .await
            .unwrap();
        backend
            .append_version(&new_version("shifts", "r2", OperationType::Insert, "c"))
            .await
            .unwrap();
        backend
            .append_version(&new_version("rooms", "a", OperationType::Delete, "d"))
            .await
            .unwrap();

        let summaries = backend.version_summary().await.unwrap();
        assert_eq!(summaries.len(), 2);

        let shifts = summaries.iter().find(|s| s.table_name == "shifts").unwrap();
        assert_eq!(shifts.total_versions, 3);
        assert_eq!(shifts.unique_records, 2);
        assert_eq!(shifts.inserts, 2);
        assert_eq!(shifts.updates, 1);
        assert_eq!(shifts.deletes, 0);
        assert!(shifts.last_change.is_some());

        let rooms = summaries.iter().find(|s| s.table_name == "rooms").unwrap();
        assert_eq!(rooms.deletes, 1);

        let tables = backend.version_tables().await.unwrap();
        assert_eq!(tables, vec!["rooms", "shifts"]);
    }

    #[tokio::test]
    async fn config_round_trips_including_field_lists() {
        let backend = SqliteBackend::in_memory().unwrap();
        assert!(backend.fetch_config("shifts").await.unwrap().is_none());

        let mut config = TableVersioningConfig::default_for("shifts");
        config.retention_days = 30;
        config.max_versions_per_record = Some(10);
        config.track_fields = Some(["status".to_string()].into_iter().collect());
        backend.store_config(&config).await.unwrap();

        let loaded = backend.fetch_config("shifts").await.unwrap().unwrap();
        assert_eq!(loaded.retention_days, 30);
        assert_eq!(loaded.max_versions_per_record, Some(10));
        assert!(loaded.track_fields.unwrap().contains("status"));
        assert!(loaded.exclude_fields.contains("updated_at"));

        // Replacing overwrites in place
        config.is_enabled = false;
        backend.store_config(&config).await.unwrap();
        let loaded = backend.fetch_config("shifts").await.unwrap().unwrap();
        assert!(!loaded.is_enabled);
    }

    #[tokio::test]
    async fn audit_entries_filter_and_cap() {
        let backend = SqliteBackend::in_memory().unwrap();

        for i in 0..5 {
            let entry = AuditEntry::new(
                AuditOperation::Update,
                "shifts",
                format!("r{i}"),
                "ana@example.com",
            );
            backend.append_audit(&entry).await.unwrap();
        }
        let other = AuditEntry::new(AuditOperation::Delete, "rooms", "a", "bo@example.com");
        backend.append_audit(&other).await.unwrap();

        let all = backend.list_audit(&AuditFilter::default()).await.unwrap();
        assert_eq!(all.len(), 6);

        let shifts_only = backend
            .list_audit(&AuditFilter {
                entity: Some("shifts".to_string()),
                ..AuditFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(shifts_only.len(), 5);

        let by_actor = backend
            .list_audit(&AuditFilter {
                actor: Some("bo@example.com".to_string()),
                operation: Some(AuditOperation::Delete),
                ..AuditFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(by_actor.len(), 1);
        assert_eq!(by_actor[0].entity, "rooms");

        let limited = backend
            .list_audit(&AuditFilter {
                limit: Some(2),
                ..AuditFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[tokio::test]
    async fn reopening_a_file_database_preserves_data() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("chronicle.db");

        {
            let backend = SqliteBackend::open(&path).unwrap();
            backend
                .append_version(&new_version("shifts", "r1", OperationType::Insert, "a"))
                .await
                .unwrap();
        }

        let backend = SqliteBackend::open(&path).unwrap();
        let versions = backend.list_versions("shifts", Some("r1"), 10).await.unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].actor, "tester@example.com");
    }
}
