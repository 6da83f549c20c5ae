//! Status command - Display synchronization status
//!
//! Provides the `syncdrive status` CLI command which:
//! 1. Shows global sync status (item counts by type, last sync time, pending conflicts)
//! 2. Shows per-file baseline status when a path is given

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use syncdrive_baseline::{DatabasePool, SqliteBaselineStore};
use syncdrive_core::config::Config;
use syncdrive_core::domain::{BaselineEntry, ItemType, SyncPath};
use syncdrive_core::ports::BaselineStore;

use crate::account_store;
use crate::output::{get_formatter, OutputFormat};

#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Optional path to check status of a specific file, relative to the sync root
    pub path: Option<String>,
}

impl StatusCommand {
    pub async fn execute(&self, format: OutputFormat) -> Result<()> {
        let formatter = get_formatter(matches!(format, OutputFormat::Json));

        let db_path = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
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

        let pool = DatabasePool::new(&db_path)
            .await
            .context("Failed to open database")?;
        let baseline_store = SqliteBaselineStore::new(&pool);

        if let Some(ref path_str) = self.path {
            self.show_file_status(&baseline_store, &account, path_str, &format, &*formatter)
                .await
        } else {
            self.show_global_status(&baseline_store, &account, &format, &*formatter)
                .await
        }
    }

    async fn show_global_status(
        &self,
        baseline_store: &dyn BaselineStore,
        account: &syncdrive_core::domain::Account,
        format: &OutputFormat,
        formatter: &dyn crate::output::OutputFormatter,
    ) -> Result<()> {
        info!(email = %account.email, "Showing status for account");

        let entries = baseline_store
            .list_entries(&account.drive_id)
            .await
            .context("Failed to list baseline entries")?;

        let files = entries
            .iter()
            .filter(|e| matches!(e.item_type, ItemType::File))
            .count();
        let folders = entries
            .iter()
            .filter(|e| matches!(e.item_type, ItemType::Folder))
            .count();

        let unresolved = baseline_store
            .get_unresolved_conflicts(&account.drive_id)
            .await
            .context("Failed to query unresolved conflicts")?;

        if matches!(format, OutputFormat::Json) {
            let last_sync_str = account
                .last_sync
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "never".to_string());

            let json = serde_json::json!({
                "account": account.email.as_str(),
                "last_sync": last_sync_str,
                "total_items": entries.len(),
                "files": files,
                "folders": folders,
                "unresolved_conflicts": unresolved.len(),
            });
            formatter.print_json(&json);
            return Ok(());
        }

        formatter.success(&format!("syncdrive status - {}", account.email));
        formatter.info("");

        match account.last_sync {
            Some(time) => {
                formatter.info(&format!(
                    "Last sync: {}",
                    time.format("%Y-%m-%d %H:%M:%S UTC")
                ));
            }
            None => formatter.info("Last sync: Never"),
        }

        formatter.info(&format!("Total items: {} ({} files, {} folders)", entries.len(), files, folders));

        if !unresolved.is_empty() {
            formatter.info("");
            formatter.error(&format!("{} unresolved conflict(s):", unresolved.len()));
            for conflict in &unresolved {
                formatter.info(&format!(
                    "  {} - {:?}",
                    conflict.path.as_str(),
                    conflict.conflict_type
                ));
            }
        }

        Ok(())
    }

    async fn show_file_status(
        &self,
        baseline_store: &dyn BaselineStore,
        account: &syncdrive_core::domain::Account,
        path_str: &str,
        format: &OutputFormat,
        formatter: &dyn crate::output::OutputFormatter,
    ) -> Result<()> {
        let sync_path = SyncPath::new(path_str).context("Invalid path")?;

        let entry = baseline_store
            .get_by_path(&account.drive_id, &sync_path)
            .await
            .context("Failed to query baseline entry")?;

        match entry {
            Some(entry) => self.print_entry(&entry, format, formatter),
            None => {
                if matches!(format, OutputFormat::Json) {
                    let json = serde_json::json!({
                        "path": path_str,
                        "state": "not_tracked",
                        "message": "File is not tracked by syncdrive",
                    });
                    formatter.print_json(&json);
                    return Ok(());
                }

                formatter.info(&format!("File '{path_str}' is not tracked by syncdrive."));
                formatter.info("It may be outside the sync folder or excluded by sync rules.");
                Ok(())
            }
        }
    }

    fn print_entry(
        &self,
        entry: &BaselineEntry,
        format: &OutputFormat,
        formatter: &dyn crate::output::OutputFormatter,
    ) -> Result<()> {
        let hashes_match = match (&entry.local_hash, &entry.remote_hash) {
            (Some(a), Some(b)) => Some(a == b),
            _ => None,
        };

        if matches!(format, OutputFormat::Json) {
            let json = serde_json::json!({
                "path": entry.path.as_str(),
                "item_id": entry.item_id.as_str(),
                "item_type": format!("{:?}", entry.item_type),
                "size_bytes": entry.size,
                "local_hash": entry.local_hash.as_ref().map(|h| h.to_string()),
                "remote_hash": entry.remote_hash.as_ref().map(|h| h.to_string()),
                "hashes_match": hashes_match,
                "mtime": entry.mtime.to_rfc3339(),
                "synced_at": entry.synced_at.to_rfc3339(),
                "is_deleted": entry.is_deleted,
            });
            formatter.print_json(&json);
            return Ok(());
        }

        formatter.success(&format!("File status: {}", entry.path.as_str()));
        formatter.info("");
        formatter.info(&format!("Type:           {:?}", entry.item_type));
        formatter.info(&format!("Item ID:        {}", entry.item_id.as_str()));
        formatter.info(&format!("Size:           {} bytes", entry.size));
        formatter.info(&format!(
            "Local hash:     {}",
            entry
                .local_hash
                .as_ref()
                .map(std::string::ToString::to_string)
                .unwrap_or_else(|| "(none)".to_string())
        ));
        formatter.info(&format!(
            "Remote hash:    {}",
            entry
                .remote_hash
                .as_ref()
                .map(std::string::ToString::to_string)
                .unwrap_or_else(|| "(none)".to_string())
        ));
        formatter.info("");
        formatter.info(&format!(
            "Modified:       {}",
            entry.mtime.format("%Y-%m-%d %H:%M:%S UTC")
        ));
        formatter.info(&format!(
            "Last synced:    {}",
            entry.synced_at.format("%Y-%m-%d %H:%M:%S UTC")
        ));

        match hashes_match {
            Some(true) => formatter.info("Hash status:    Hashes match (file is in sync)"),
            Some(false) => formatter.info("Hash status:    Hashes DO NOT match (file has diverged)"),
            None => formatter.info("Hash status:    Hash comparison not available"),
        }

        if entry.is_deleted {
            formatter.info("");
            formatter.info("Note: this entry is tombstoned (deleted since last sync)");
        }

        Ok(())
    }
}
