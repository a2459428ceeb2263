// ABOUTME: Entry point for the chronicle binary.
// ABOUTME: Parses CLI arguments, initializes tracing, and runs ledger queries and maintenance against a store.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use ulid::Ulid;

use chronicle_core::audit::{AuditFilter, AuditOperation};
use chronicle_core::NOT_AVAILABLE;
use chronicle_store::{Chronicle, DeleteMode, ExportFormat};

#[derive(Parser)]
#[command(name = "chronicle", about = "Versioned record ledger: history, restore, and retention")]
struct Cli {
    /// Path to the ledger database
    #[arg(long, env = "CHRONICLE_DB", default_value = "chronicle.db")]
    db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show version history for a table or a single record
    History {
        table: String,
        /// Restrict to one record
        #[arg(long)]
        record: Option<String>,
        #[arg(long, default_value_t = chronicle_store::DEFAULT_HISTORY_LIMIT)]
        limit: usize,
    },
    /// Per-table aggregates across the whole ledger
    Summary,
    /// Field-level diff between two versions
    Compare { version_1: Ulid, version_2: Ulid },
    /// Roll a record back to a historical version
    Restore {
        table: String,
        record: String,
        version: Ulid,
        /// Who is performing the restore
        #[arg(long, default_value = "cli")]
        actor: String,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Insert a record with JSON fields
    Insert {
        table: String,
        record: String,
        /// Record fields as a JSON object
        fields: String,
        #[arg(long, default_value = "cli")]
        actor: String,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Patch a record with JSON fields
    Update {
        table: String,
        record: String,
        /// Patch as a JSON object; unmentioned fields are kept
        fields: String,
        #[arg(long, default_value = "cli")]
        actor: String,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Delete a record (soft by default)
    Delete {
        table: String,
        record: String,
        /// Physically remove the row instead of stamping deleted_at
        #[arg(long)]
        hard: bool,
        #[arg(long, default_value = "cli")]
        actor: String,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Prune expired versions per each table's retention policy
    Cleanup {
        /// Limit the sweep to one table
        #[arg(long)]
        table: Option<String>,
    },
    /// Export version history as JSON or CSV to stdout
    Export {
        table: String,
        #[arg(long)]
        record: Option<String>,
        #[arg(long, default_value = "csv")]
        format: ExportFormat,
    },
    /// Show the audit trail
    Audit {
        #[arg(long)]
        entity: Option<String>,
        #[arg(long)]
        entity_id: Option<String>,
        #[arg(long)]
        actor: Option<String>,
        /// create, update, delete, or view
        #[arg(long)]
        operation: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chronicle=info".parse().expect("static filter parses")),
        )
        .init();

    let cli = Cli::parse();
    tracing::info!("opening ledger at {}", cli.db.display());
    let chronicle = Chronicle::open(&cli.db)
        .map_err(|e| anyhow::anyhow!("{e}"))
        .with_context(|| format!("open ledger at {}", cli.db.display()))?;

    match cli.command {
        Command::History {
            table,
            record,
            limit,
        } => {
            let history = chronicle
                .ledger()
                .get_history(&table, record.as_deref(), limit)
                .await
                .map_err(|e| anyhow::anyhow!("{e}"))?;
            println!("{}", serde_json::to_string_pretty(&history)?);
        }
        Command::Summary => {
            let summary = chronicle
                .ledger()
                .get_summary()
                .await
                .map_err(|e| anyhow::anyhow!("{e}"))?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::Compare {
            version_1,
            version_2,
        } => {
            let diffs = chronicle
                .ledger()
                .compare(&version_1, &version_2)
                .await
                .map_err(|e| anyhow::anyhow!("{e}"))?;
            for diff in &diffs {
                let marker = if diff.is_different { "*" } else { " " };
                println!(
                    "{} {}: {} -> {}",
                    marker,
                    diff.field_name,
                    render(&diff.value_1),
                    render(&diff.value_2)
                );
            }
        }
        Command::Restore {
            table,
            record,
            version,
            actor,
            reason,
        } => {
            let outcome = chronicle
                .restore()
                .restore(&table, &record, &version, &actor, reason)
                .await
                .map_err(|e| anyhow::anyhow!("{e}"))?;
            match outcome.version {
                Some(v) => println!(
                    "restored {}/{} to version {} (new entry #{})",
                    table, record, version, v.sequence_number
                ),
                None => println!("restored {}/{} to version {}", table, record, version),
            }
        }
        Command::Insert {
            table,
            record,
            fields,
            actor,
            reason,
        } => {
            let fields = parse_fields(&fields)?;
            let outcome = chronicle
                .records()
                .insert(&table, &record, fields, &actor, reason)
                .await
                .map_err(|e| anyhow::anyhow!("{e}"))?;
            println!("inserted {}/{}", outcome.table, outcome.record_id);
        }
        Command::Update {
            table,
            record,
            fields,
            actor,
            reason,
        } => {
            let patch = parse_fields(&fields)?;
            let outcome = chronicle
                .records()
                .update(&table, &record, patch, &actor, reason)
                .await
                .map_err(|e| anyhow::anyhow!("{e}"))?;
            let changed = outcome
                .version
                .map(|v| v.changed_fields.join(", "))
                .unwrap_or_default();
            println!("updated {}/{} ({})", outcome.table, outcome.record_id, changed);
        }
        Command::Delete {
            table,
            record,
            hard,
            actor,
            reason,
        } => {
            let mode = if hard { DeleteMode::Hard } else { DeleteMode::Soft };
            chronicle
                .records()
                .delete(&table, &record, mode, &actor, reason)
                .await
                .map_err(|e| anyhow::anyhow!("{e}"))?;
            println!("deleted {}/{}", table, record);
        }
        Command::Cleanup { table } => {
            let outcome = chronicle
                .retention()
                .cleanup(table.as_deref())
                .await
                .map_err(|e| anyhow::anyhow!("{e}"))?;
            for (table, deleted) in &outcome.per_table {
                println!("{}: {} versions deleted", table, deleted);
            }
            println!("total: {}", outcome.total());
        }
        Command::Export {
            table,
            record,
            format,
        } => {
            let rendered = chronicle
                .export(&table, record.as_deref(), format)
                .await
                .map_err(|e| anyhow::anyhow!("{e}"))?;
            print!("{rendered}");
        }
        Command::Audit {
            entity,
            entity_id,
            actor,
            operation,
            limit,
        } => {
            let operation = match operation.as_deref() {
                Some(raw) => Some(
                    AuditOperation::parse(raw)
                        .ok_or_else(|| anyhow::anyhow!("unknown audit operation '{raw}'"))?,
                ),
                None => None,
            };
            let filter = AuditFilter {
                entity,
                entity_id,
                actor,
                operation,
                limit,
                ..AuditFilter::default()
            };
            let entries = chronicle
                .audit()
                .get_history(&filter)
                .await
                .map_err(|e| anyhow::anyhow!("{e}"))?;
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
    }

    Ok(())
}

fn parse_fields(raw: &str) -> anyhow::Result<chronicle_core::version::Snapshot> {
    match serde_json::from_str(raw).context("fields must be a JSON object")? {
        serde_json::Value::Object(map) => Ok(map),
        _ => anyhow::bail!("fields must be a JSON object"),
    }
}

fn render(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) if s == NOT_AVAILABLE => s.clone(),
        other => other.to_string(),
    }
}
