//! Conflicts command - Manage synchronization conflicts
//!
//! Provides the `syncdrive conflicts` CLI command which:
//! 1. Lists all unresolved conflicts in a table format
//! 2. Resolves a specific conflict by ID with a chosen strategy
//! 3. Previews conflict details showing local vs remote metadata

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Subcommand;
use tracing::info;

use syncdrive_baseline::{DatabasePool, SqliteBaselineStore};
use syncdrive_conflict::{parse_strategy, ConflictResolver};
use syncdrive_core::config::Config;
use syncdrive_core::domain::conflict::{ConflictRecord, ResolvedBy};
use syncdrive_core::ports::BaselineStore;
use syncdrive_graph::auth::KeyringTokenStorage;
use syncdrive_graph::client::GraphClient;
use syncdrive_graph::provider::GraphCloudProvider;
use syncdrive_sync::filesystem::LocalFileSystemAdapter;

use crate::account_store;
use crate::output::{get_formatter, OutputFormat};

#[derive(Debug, Subcommand)]
pub enum ConflictsCommand {
    /// List unresolved conflicts
    List,
    /// Resolve a conflict
    Resolve {
        /// Conflict ID (full or a unique prefix)
        id: String,
        /// Resolution strategy: keep_local, keep_remote, keep_both
        #[arg(long)]
        strategy: String,
    },
    /// Preview conflict details
    Preview {
        /// Conflict ID (full or a unique prefix)
        id: String,
    },
}

impl ConflictsCommand {
    pub async fn execute(&self, format: OutputFormat) -> Result<()> {
        match self {
            ConflictsCommand::List => self.execute_list(format).await,
            ConflictsCommand::Resolve { id, strategy } => {
                self.execute_resolve(id, strategy, format).await
            }
            ConflictsCommand::Preview { id } => self.execute_preview(id, format).await,
        }
    }

    /// Opens the baseline database, returning `None` (with a user-facing
    /// error already printed) if it hasn't been created by a sync yet.
    async fn open_baseline_store(
        &self,
        formatter: &dyn crate::output::OutputFormatter,
    ) -> Result<Option<(DatabasePool, syncdrive_core::domain::Account)>> {
        let db_path = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("syncdrive")
            .join("syncdrive.db");

        if !db_path.exists() {
            formatter
                .error("No database found. Run 'syncdrive auth login' and 'syncdrive sync' first.");
            return Ok(None);
        }

        let account = account_store::load(&account_store::default_path())
            .context("Failed to load account")?;
        let Some(account) = account else {
            formatter.error("No account configured. Run 'syncdrive auth login' first.");
            return Ok(None);
        };

        let pool = DatabasePool::new(&db_path)
            .await
            .context("Failed to open database")?;

        Ok(Some((pool, account)))
    }

    async fn find_conflict(
        baseline_store: &dyn BaselineStore,
        drive_id: &syncdrive_core::domain::DriveId,
        id: &str,
    ) -> Result<Option<ConflictRecord>> {
        let conflicts = baseline_store
            .get_unresolved_conflicts(drive_id)
            .await
            .context("Failed to query unresolved conflicts")?;

        Ok(conflicts
            .into_iter()
            .find(|c| c.id.to_string() == id || c.id.to_string().starts_with(id)))
    }

    async fn execute_list(&self, format: OutputFormat) -> Result<()> {
        let formatter = get_formatter(matches!(format, OutputFormat::Json));

        let Some((pool, account)) = self.open_baseline_store(&*formatter).await? else {
            return Ok(());
        };
        let baseline_store = SqliteBaselineStore::new(&pool);

        let conflicts = baseline_store
            .get_unresolved_conflicts(&account.drive_id)
            .await
            .context("Failed to query unresolved conflicts")?;

        info!(count = conflicts.len(), "Retrieved unresolved conflicts");

        if matches!(format, OutputFormat::Json) {
            let conflicts_json: Vec<serde_json::Value> = conflicts.iter().map(conflict_to_json).collect();
            let json = serde_json::json!({
                "count": conflicts.len(),
                "conflicts": conflicts_json,
            });
            formatter.print_json(&json);
            return Ok(());
        }

        if conflicts.is_empty() {
            formatter.success("No unresolved conflicts");
            return Ok(());
        }

        formatter.success(&format!(
            "{} unresolved conflict{}",
            conflicts.len(),
            if conflicts.len() == 1 { "" } else { "s" }
        ));
        formatter.info("");
        formatter.info("  ID (short)     Type         Path");
        formatter.info("  -------------- ------------ ----");

        for conflict in &conflicts {
            let id_short = truncate_id(conflict.id.to_string(), 14);
            formatter.info(&format!(
                "  {:<14} {:<12} {}",
                id_short,
                format!("{:?}", conflict.conflict_type),
                conflict.path.as_str()
            ));
        }

        formatter.info("");
        formatter.info("Use 'syncdrive conflicts preview <id>' for details.");
        formatter.info(
            "Use 'syncdrive conflicts resolve <id> --strategy <keep_local|keep_remote|keep_both>' to resolve.",
        );

        Ok(())
    }

    async fn execute_resolve(&self, id: &str, strategy: &str, format: OutputFormat) -> Result<()> {
        let formatter = get_formatter(matches!(format, OutputFormat::Json));

        let Some(resolution) = parse_strategy(strategy) else {
            let msg = format!("Unknown strategy: '{strategy}'. Use: keep_local, keep_remote, keep_both");
            if matches!(format, OutputFormat::Json) {
                formatter.print_json(&serde_json::json!({ "success": false, "error": msg }));
            } else {
                formatter.error(&msg);
            }
            return Ok(());
        };

        let Some((pool, account)) = self.open_baseline_store(&*formatter).await? else {
            return Ok(());
        };
        let baseline_store = SqliteBaselineStore::new(&pool);

        let Some(mut conflict) = Self::find_conflict(&baseline_store, &account.drive_id, id).await? else {
            Self::report_not_found(id, format, &*formatter);
            return Ok(());
        };

        let Some(entry) = baseline_store
            .get_by_path(&account.drive_id, &conflict.path)
            .await
            .context("Failed to look up baseline entry for conflict path")?
        else {
            formatter.error(&format!(
                "No baseline entry for '{}'; cannot determine remote parent/item id.",
                conflict.path.as_str()
            ));
            return Ok(());
        };
        let Some(parent_id) = entry.parent_id.clone() else {
            formatter.error(&format!(
                "Conflict at '{}' has no known parent folder; run 'syncdrive sync' first.",
                conflict.path.as_str()
            ));
            return Ok(());
        };
        let item_id = conflict.item_id.clone().unwrap_or_else(|| entry.item_id.clone());
        let name = conflict
            .path
            .file_name()
            .unwrap_or_default()
            .to_string();

        let config_path = Config::default_path();
        let config = Config::load_or_default(&config_path);
        let local_path = config.sync.root.join(conflict.path.as_str());

        let tokens = match KeyringTokenStorage::load(account.email.as_str()) {
            Ok(Some(t)) => t,
            Ok(None) => {
                formatter.error("No tokens found. Run 'syncdrive auth login' first.");
                return Ok(());
            }
            Err(e) => {
                formatter.error(&format!("Failed to load tokens: {e}"));
                return Ok(());
            }
        };
        let provider = GraphCloudProvider::with_client(GraphClient::new(tokens.access_token));
        let local_fs = Arc::new(LocalFileSystemAdapter::new());
        let resolver = ConflictResolver::new(provider.clone(), provider, local_fs);

        info!(conflict_id = %conflict.id, %strategy, "Resolving conflict");

        let outcome = resolver
            .apply(
                &mut conflict,
                resolution,
                ResolvedBy::User,
                &account.drive_id,
                &parent_id,
                &item_id,
                &name,
                &local_path,
            )
            .await
            .context("Failed to apply resolution")?;

        baseline_store
            .save_conflict(&conflict)
            .await
            .context("Failed to save resolved conflict")?;

        let conflict_id_str = conflict.id.to_string();
        if matches!(format, OutputFormat::Json) {
            formatter.print_json(&serde_json::json!({
                "success": true,
                "conflict_id": conflict_id_str,
                "resolution": strategy,
                "resolved_by": "user",
            }));
        } else {
            formatter.success(&format!(
                "Conflict {} resolved with strategy: {}",
                truncate_id(conflict_id_str, 14),
                strategy
            ));
        }

        let _ = outcome;
        Ok(())
    }

    async fn execute_preview(&self, id: &str, format: OutputFormat) -> Result<()> {
        let formatter = get_formatter(matches!(format, OutputFormat::Json));

        let Some((pool, account)) = self.open_baseline_store(&*formatter).await? else {
            return Ok(());
        };
        let baseline_store = SqliteBaselineStore::new(&pool);

        let Some(conflict) = Self::find_conflict(&baseline_store, &account.drive_id, id).await? else {
            Self::report_not_found(id, format, &*formatter);
            return Ok(());
        };

        if matches!(format, OutputFormat::Json) {
            formatter.print_json(&conflict_to_json(&conflict));
            return Ok(());
        }

        formatter.success(&format!("Conflict Details: {}", conflict.id));
        formatter.info("");
        formatter.info(&format!("Path:        {}", conflict.path.as_str()));
        formatter.info(&format!("Type:        {:?}", conflict.conflict_type));
        formatter.info(&format!(
            "Detected:    {}",
            conflict.detected_at.format("%Y-%m-%d %H:%M:%S UTC")
        ));
        formatter.info(&format!(
            "Resolved:    {}",
            if conflict.is_resolved() { "Yes" } else { "No" }
        ));

        formatter.info("");
        formatter.info("Local Version:");
        formatter.info(&format!(
            "  Hash:        {}",
            conflict.local.hash.as_ref().map(std::string::ToString::to_string).unwrap_or_else(|| "(none)".to_string())
        ));
        formatter.info(&format!("  Size:        {}", format_bytes(conflict.local.size_bytes)));
        formatter.info(&format!(
            "  Modified:    {}",
            conflict.local.modified_at.format("%Y-%m-%d %H:%M:%S UTC")
        ));

        formatter.info("");
        formatter.info("Remote Version:");
        formatter.info(&format!(
            "  Hash:        {}",
            conflict.remote.hash.as_ref().map(std::string::ToString::to_string).unwrap_or_else(|| "(none)".to_string())
        ));
        formatter.info(&format!("  Size:        {}", format_bytes(conflict.remote.size_bytes)));
        formatter.info(&format!(
            "  Modified:    {}",
            conflict.remote.modified_at.format("%Y-%m-%d %H:%M:%S UTC")
        ));

        formatter.info("");
        formatter.info("Comparison:");
        let size_diff = conflict.remote.size_bytes as i64 - conflict.local.size_bytes as i64;
        let size_indicator = if size_diff > 0 {
            format!("Remote is {} larger", format_bytes(size_diff.unsigned_abs()))
        } else if size_diff < 0 {
            format!("Local is {} larger", format_bytes((-size_diff).unsigned_abs()))
        } else {
            "Same size".to_string()
        };
        formatter.info(&format!("  Size diff:   {size_indicator}"));

        let newer = if conflict.local.modified_at > conflict.remote.modified_at { "Local" } else { "Remote" };
        formatter.info(&format!("  Newer:       {newer}"));

        let hashes_match = conflict.local.hash == conflict.remote.hash;
        formatter.info(&format!(
            "  Hashes:      {}",
            if hashes_match { "Match (content is identical)" } else { "Different (content has diverged)" }
        ));

        formatter.info("");
        formatter.info("To resolve, run:");
        formatter.info(&format!(
            "  syncdrive conflicts resolve {} --strategy <keep_local|keep_remote|keep_both>",
            truncate_id(conflict.id.to_string(), 14)
        ));

        Ok(())
    }

    fn report_not_found(id: &str, format: OutputFormat, formatter: &dyn crate::output::OutputFormatter) {
        if matches!(format, OutputFormat::Json) {
            formatter.print_json(&serde_json::json!({
                "success": false,
                "error": format!("No unresolved conflict found with ID: {}", id),
            }));
        } else {
            formatter.error(&format!("No unresolved conflict found with ID: {id}"));
            formatter.info("Use 'syncdrive conflicts list' to see unresolved conflicts.");
        }
    }
}

fn conflict_to_json(c: &ConflictRecord) -> serde_json::Value {
    serde_json::json!({
        "id": c.id.to_string(),
        "path": c.path.as_str(),
        "conflict_type": format!("{:?}", c.conflict_type),
        "detected_at": c.detected_at.to_rfc3339(),
        "local_version": {
            "hash": c.local.hash.as_ref().map(std::string::ToString::to_string),
            "size_bytes": c.local.size_bytes,
            "modified_at": c.local.modified_at.to_rfc3339(),
        },
        "remote_version": {
            "hash": c.remote.hash.as_ref().map(std::string::ToString::to_string),
            "size_bytes": c.remote.size_bytes,
            "modified_at": c.remote.modified_at.to_rfc3339(),
        },
    })
}

/// Truncate a UUID string for display, showing only the first N characters
fn truncate_id(id: String, max_len: usize) -> String {
    if id.len() <= max_len {
        id
    } else {
        format!("{}...", &id[..max_len - 3])
    }
}

/// Format a byte count into a human-readable string
fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    const GB: u64 = 1024 * MB;

    if bytes >= GB {
        format!("{:.1} GiB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MiB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KiB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_id_short() {
        let id = "abc123".to_string();
        assert_eq!(truncate_id(id, 14), "abc123");
    }

    #[test]
    fn test_truncate_id_long() {
        let id = "550e8400-e29b-41d4-a716-446655440000".to_string();
        let result = truncate_id(id, 14);
        assert_eq!(result.len(), 14);
        assert!(result.ends_with("..."));
        assert_eq!(result, "550e8400-e2...");
    }

    #[test]
    fn test_truncate_id_exact() {
        let id = "12345678901234".to_string();
        assert_eq!(truncate_id(id, 14), "12345678901234");
    }

    #[test]
    fn test_format_bytes_small() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1023), "1023 B");
    }

    #[test]
    fn test_format_bytes_kib() {
        assert_eq!(format_bytes(1024), "1.0 KiB");
        assert_eq!(format_bytes(1536), "1.5 KiB");
    }

    #[test]
    fn test_format_bytes_mib() {
        assert_eq!(format_bytes(1048576), "1.0 MiB");
        assert_eq!(format_bytes(5 * 1048576), "5.0 MiB");
    }

    #[test]
    fn test_format_bytes_gib() {
        assert_eq!(format_bytes(1073741824), "1.0 GiB");
    }
}
