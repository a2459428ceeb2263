// ABOUTME: Per-table versioning configuration with an explicit process-wide default.
// ABOUTME: Injected into the record API and retention engine at call time, never a hidden singleton.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fallback retention for tables without explicit configuration.
pub const DEFAULT_RETENTION_DAYS: i64 = 365;

/// Versioning policy for one table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableVersioningConfig {
    pub table_name: String,
    pub is_enabled: bool,
    pub retention_days: i64,
    pub max_versions_per_record: Option<u32>,
    /// Optional allow-list: when set, only these fields are tracked.
    pub track_fields: Option<BTreeSet<String>>,
    /// Deny-list applied after the allow-list.
    pub exclude_fields: BTreeSet<String>,
    pub updated_at: DateTime<Utc>,
}

impl TableVersioningConfig {
    /// The default policy for a table lacking explicit configuration:
    /// versioning enabled, one-year retention, no version-count cap, and
    /// volatile bookkeeping fields excluded from change tracking.
    pub fn default_for(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            is_enabled: true,
            retention_days: DEFAULT_RETENTION_DAYS,
            max_versions_per_record: None,
            track_fields: None,
            exclude_fields: Self::default_exclude_fields(),
            updated_at: Utc::now(),
        }
    }

    /// The default deny-list of volatile bookkeeping fields.
    pub fn default_exclude_fields() -> BTreeSet<String> {
        ["created_at", "updated_at"]
            .into_iter()
            .map(String::from)
            .collect()
    }

    /// Whether changes to `field` should be tracked under this policy.
    pub fn tracks_field(&self, field: &str) -> bool {
        if self.exclude_fields.contains(field) {
            return false;
        }
        match &self.track_fields {
            Some(allowed) => allowed.contains(field),
            None => true,
        }
    }
}
