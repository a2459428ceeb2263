// ABOUTME: Export of version history as JSON or CSV for offline review.
// ABOUTME: CSV rows carry the human-facing columns; JSON is the full serialized version records.

use std::fmt;
use std::str::FromStr;

use chronicle_core::error::ClassifiedError;
use chronicle_core::version::VersionRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl FromStr for ExportFormat {
    type Err = ClassifiedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            other => Err(ClassifiedError::validation(format!(
                "unknown export format '{other}', expected json or csv"
            ))),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Json => "json",
            Self::Csv => "csv",
        })
    }
}

/// Render a version history in the requested format.
pub fn export_history(
    versions: &[VersionRecord],
    format: ExportFormat,
) -> Result<String, ClassifiedError> {
    match format {
        ExportFormat::Json => serde_json::to_string_pretty(versions)
            .map_err(|e| ClassifiedError::validation(format!("serialize history: {e}"))),
        ExportFormat::Csv => Ok(to_csv(versions)),
    }
}

const CSV_HEADER: &str = "Date,Operation,User,ChangedFields,Reason";

fn to_csv(versions: &[VersionRecord]) -> String {
    let mut out = String::from(CSV_HEADER);
    out.push('\n');
    for version in versions {
        let row = [
            version.created_at.to_rfc3339(),
            version.operation_type.to_string(),
            version.actor.clone(),
            version.changed_fields.join(", "),
            version.reason.clone().unwrap_or_default(),
        ];
        let quoted: Vec<String> = row.iter().map(|field| csv_quote(field)).collect();
        out.push_str(&quoted.join(","));
        out.push('\n');
    }
    out
}

/// Quote a CSV field, doubling any embedded quotes.
fn csv_quote(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}
