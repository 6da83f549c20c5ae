//! Explain command - Explain why a file is in its current state
//!
//! Provides the `syncdrive explain <path>` CLI command which:
//! 1. Looks up a file's baseline entry and any unresolved conflict
//! 2. Generates a human-readable explanation of its current state
//! 3. Shows recent audit history for the file

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use syncdrive_baseline::{DatabasePool, SqliteAuditStore, SqliteBaselineStore};
use syncdrive_core::domain::{Resolution, SyncPath, UniqueId};
use syncdrive_core::ports::{AuditStore, BaselineStore};

use crate::account_store;
use crate::output::{get_formatter, OutputFormat};

#[derive(Debug, Args)]
pub struct ExplainCommand {
    /// Path to the file to explain, relative to the sync root
    pub path: String,
}

impl ExplainCommand {
    pub async fn execute(&self, format: OutputFormat) -> Result<()> {
        let formatter = get_formatter(matches!(format, OutputFormat::Json));

        let db_path = dirs::data_dir()
            .unwrap_or_else(|| std::path::PathBuf::from("."))
            .join("syncdrive")
            .join("syncdrive.db");

        if !db_path.exists() {
            formatter.error(
                "No database found. Run 'syncdrive auth login' and 'syncdrive sync' first.",
            );
            return Ok(());
        }

        let account = account_store::load(&account_store::default_path())
            .context("Failed to load account")?;
        let account = match account {
            Some(a) => a,
            None => {
                formatter.error("No account configured. Run 'syncdrive auth login' first.");
                return Ok(());
            }
        };

        let sync_path = SyncPath::new(&self.path).context("Invalid path")?;
        info!(path = %sync_path, "Explaining file state");

        let pool = DatabasePool::new(&db_path)
            .await
            .context("Failed to open database")?;
        let baseline_store = SqliteBaselineStore::new(&pool);
        let audit_store = Arc::new(SqliteAuditStore::new(&pool));

        let entry = baseline_store
            .get_by_path(&account.drive_id, &sync_path)
            .await
            .context("Failed to query baseline entry")?;

        let unresolved = baseline_store
            .get_unresolved_conflicts(&account.drive_id)
            .await
            .context("Failed to query conflicts")?;
        let conflict = unresolved.iter().find(|c| c.path == sync_path);

        let (state, message, suggestions) = describe(entry.as_ref(), conflict);

        let history = match &entry {
            Some(e) => {
                let audit_id = UniqueId::from_item_id(e.item_id.as_str());
                audit_store.query_by_item(&audit_id).await.unwrap_or_default()
            }
            None => Vec::new(),
        };

        if matches!(format, OutputFormat::Json) {
            let history_json: Vec<serde_json::Value> = history
                .iter()
                .map(|e| {
                    serde_json::json!({
                        "timestamp": e.timestamp().to_rfc3339(),
                        "action": e.action().to_string(),
                        "result": format!("{:?}", e.result()),
                        "details": e.details(),
                        "duration_ms": e.duration_ms(),
                    })
                })
                .collect();

            let json = serde_json::json!({
                "path": sync_path.as_str(),
                "state": state,
                "message": message,
                "suggestions": suggestions,
                "history": history_json,
            });
            formatter.print_json(&json);
            return Ok(());
        }

        formatter.success(&format!("Explanation for: {}", sync_path.as_str()));
        formatter.info("");
        formatter.info(&format!("State:   {state}"));
        formatter.info(&format!("Message: {message}"));

        if !suggestions.is_empty() {
            formatter.info("");
            formatter.info("Suggestions:");
            for suggestion in &suggestions {
                formatter.info(&format!("  - {suggestion}"));
            }
        }

        if !history.is_empty() {
            formatter.info("");
            formatter.info("Recent history:");
            formatter.info("  Timestamp                Action           Result");
            formatter.info("  ----------------------- ---------------- -------");

            let shown = if history.len() > 10 {
                &history[history.len() - 10..]
            } else {
                &history[..]
            };

            for e in shown {
                let timestamp = e.timestamp().format("%Y-%m-%d %H:%M:%S");
                let action = e.action().to_string();
                let result = if e.result().is_success() { "OK" } else { "FAILED" };
                formatter.info(&format!("  {timestamp} {action:<16} {result}"));
            }

            if history.len() > 10 {
                formatter.info(&format!(
                    "  ... and {} more entries (use 'syncdrive audit --item <path>' for full history)",
                    history.len() - 10
                ));
            }
        } else {
            formatter.info("");
            formatter.info("No audit history available for this file.");
        }

        Ok(())
    }
}

fn describe(
    entry: Option<&syncdrive_core::domain::BaselineEntry>,
    conflict: Option<&syncdrive_core::domain::ConflictRecord>,
) -> (&'static str, String, Vec<String>) {
    if let Some(conflict) = conflict {
        if matches!(conflict.resolution, Resolution::Unresolved) {
            return (
                "conflicted",
                "Both sides changed this file since the last sync and it has not been resolved yet.".to_string(),
                vec![
                    "Run 'syncdrive sync' to let the configured conflict strategy resolve it.".to_string(),
                    "Inspect both copies before the next sync if you need to merge manually.".to_string(),
                ],
            );
        }
    }

    match entry {
        None => (
            "not_tracked",
            "This file has no baseline entry; it has never been synced.".to_string(),
            vec!["It may be outside the sync folder or excluded by sync rules.".to_string()],
        ),
        Some(e) if e.is_deleted => (
            "deleted",
            "The file was deleted on one side and the deletion has been recorded in the baseline.".to_string(),
            vec!["Restore the file and re-sync if this deletion was unintended.".to_string()],
        ),
        Some(e) => match (&e.local_hash, &e.remote_hash) {
            (Some(a), Some(b)) if a == b => (
                "synced",
                "Local and remote content hashes match; the file is in sync.".to_string(),
                vec![],
            ),
            (Some(_), Some(_)) => (
                "diverged",
                "Local and remote content hashes differ but no conflict was recorded for the current cycle.".to_string(),
                vec!["Run 'syncdrive sync' to reconcile the divergence.".to_string()],
            ),
            _ => (
                "pending",
                "At least one side's content hash is not yet known.".to_string(),
                vec!["Run 'syncdrive sync' to refresh the baseline.".to_string()],
            ),
        },
    }
}
