// ABOUTME: Audit entry and filter types for the coarse compliance trail.
// ABOUTME: Independent of version records; used for who-did-what reporting, not restore.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Hard cap on audit read results, to bound query cost.
pub const AUDIT_RESULT_CAP: usize = 1000;

/// The coarse kind of an audited action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditOperation {
    Create,
    Update,
    Delete,
    View,
}

impl AuditOperation {
    /// Returns the operation name string.
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditOperation::Create => "create",
            AuditOperation::Update => "update",
            AuditOperation::Delete => "delete",
            AuditOperation::View => "view",
        }
    }

    /// Parse an operation name string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "create" => Some(AuditOperation::Create),
            "update" => Some(AuditOperation::Update),
            "delete" => Some(AuditOperation::Delete),
            "view" => Some(AuditOperation::View),
            _ => None,
        }
    }
}

impl fmt::Display for AuditOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One entry in the audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Ulid,
    pub operation: AuditOperation,
    pub entity: String,
    pub entity_id: String,
    pub actor: String,
    pub details: BTreeMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

impl AuditEntry {
    /// Create an entry stamped with a fresh ULID and the current time.
    pub fn new(
        operation: AuditOperation,
        entity: impl Into<String>,
        entity_id: impl Into<String>,
        actor: impl Into<String>,
    ) -> Self {
        Self {
            id: Ulid::new(),
            operation,
            entity: entity.into(),
            entity_id: entity_id.into(),
            actor: actor.into(),
            details: BTreeMap::new(),
            timestamp: Utc::now(),
        }
    }

    /// Attach a free-form detail.
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

/// Filters for audit history reads. All fields combine with AND; the
/// result count is always capped at `AUDIT_RESULT_CAP`.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub operation: Option<AuditOperation>,
    pub entity: Option<String>,
    pub entity_id: Option<String>,
    pub actor: Option<String>,
    pub limit: Option<usize>,
}

impl AuditFilter {
    /// The row limit to apply, never exceeding the hard cap.
    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(AUDIT_RESULT_CAP).min(AUDIT_RESULT_CAP)
    }
}
