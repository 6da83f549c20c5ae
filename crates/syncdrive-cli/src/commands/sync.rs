//! Sync command - Synchronize files with OneDrive
//!
//! Provides the `syncdrive sync` CLI command which:
//! 1. Loads configuration and opens the baseline database
//! 2. Retrieves stored OAuth tokens from the system keyring
//! 3. Wires up the Graph adapters, transfer manager and conflict resolver
//! 4. Runs one sync cycle and displays the resulting report

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use syncdrive_audit::AuditLogger;
use syncdrive_baseline::{DatabasePool, SqliteAuditStore, SqliteBaselineStore};
use syncdrive_conflict::ConflictResolver;
use syncdrive_core::config::Config;
use syncdrive_core::domain::SyncMode;
use syncdrive_graph::auth::KeyringTokenStorage;
use syncdrive_graph::client::GraphClient;
use syncdrive_graph::provider::GraphCloudProvider;
use syncdrive_sync::engine::SyncEngine;
use syncdrive_sync::filesystem::LocalFileSystemAdapter;
use syncdrive_sync::transfer::{FsUploadSessionStore, TransferManager};

use crate::account_store;
use crate::output::{get_formatter, OutputFormat};

#[derive(Debug, Args)]
pub struct SyncCommand {
    /// Widen the big-delete safety gate (use after reviewing a dry run)
    #[arg(long)]
    pub full: bool,

    /// Show what would be done without making changes
    #[arg(long)]
    pub dry_run: bool,
}

impl SyncCommand {
    pub async fn execute(&self, format: OutputFormat) -> Result<()> {
        let formatter = get_formatter(matches!(format, OutputFormat::Json));

        let config_path = Config::default_path();
        let config = Config::load_or_default(&config_path);
        info!(config_path = %config_path.display(), "Loaded configuration");

        let account = account_store::load(&account_store::default_path())
            .context("Failed to load account")?;
        let account = match account {
            Some(a) => a,
            None => {
                formatter.error("No account configured. Run 'syncdrive auth login' first.");
                return Ok(());
            }
        };
        info!(email = %account.email, "Found account");

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

        let db_path = dirs::data_dir()
            .unwrap_or_else(|| std::path::PathBuf::from("."))
            .join("syncdrive")
            .join("syncdrive.db");
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let pool = DatabasePool::new(&db_path)
            .await
            .context("Failed to open database")?;
        let baseline_store = Arc::new(SqliteBaselineStore::new(&pool));
        let audit = Arc::new(AuditLogger::new(Arc::new(SqliteAuditStore::new(&pool))));

        let provider = GraphCloudProvider::with_client(GraphClient::new(tokens.access_token));
        let local_fs = Arc::new(LocalFileSystemAdapter::new());

        let sessions_path = dirs::data_dir()
            .unwrap_or_else(|| std::path::PathBuf::from("."))
            .join("syncdrive")
            .join("upload_sessions");
        let transfer = Arc::new(TransferManager::new(
            provider.clone(),
            Some(provider.clone()),
            provider.clone(),
            provider.clone(),
            local_fs.clone(),
            Arc::new(FsUploadSessionStore::new(sessions_path)),
        ));

        let conflict_resolver = Arc::new(ConflictResolver::new(
            provider.clone(),
            provider.clone(),
            local_fs.clone(),
        ));

        if self.dry_run {
            formatter.info("Dry run mode - no changes will be made");
        }
        if self.full {
            formatter.info("Full sync requested - big-delete safety gate widened");
        }

        formatter.info("Starting synchronization...");

        let engine = SyncEngine::new(
            account.drive_id.clone(),
            config,
            baseline_store,
            local_fs,
            provider.clone(),
            provider,
            transfer,
            conflict_resolver,
            Some(audit),
        )
        .await
        .context("Failed to initialize sync engine")?;

        let report = engine
            .run_once(SyncMode::Both, self.dry_run, self.full)
            .await
            .context("Sync cycle failed")?;

        if matches!(format, OutputFormat::Json) {
            let json = serde_json::json!({
                "mode": format!("{:?}", report.mode),
                "dry_run": report.dry_run,
                "duration_ms": report.duration_ms,
                "downloads": report.counts.downloads,
                "uploads": report.counts.uploads,
                "local_deletes": report.counts.local_deletes,
                "remote_deletes": report.counts.remote_deletes,
                "folder_creates": report.counts.folder_creates,
                "moves": report.counts.moves,
                "conflicts": report.counts.conflicts,
                "synced_updates": report.counts.synced_updates,
                "cleanups": report.counts.cleanups,
                "succeeded": report.succeeded,
                "failed": report.failed,
                "errors": report.errors.iter().map(|e| e.message.clone()).collect::<Vec<_>>(),
            });
            formatter.print_json(&json);
        } else {
            let duration_display = if report.duration_ms >= 1000 {
                format!("{:.1}s", report.duration_ms as f64 / 1000.0)
            } else {
                format!("{}ms", report.duration_ms)
            };

            let total = report.counts.total();
            if total == 0 && report.errors.is_empty() {
                formatter.success("Already up to date");
            } else {
                formatter.success(&format!("Sync completed in {duration_display}"));
            }

            if report.counts.downloads > 0 {
                formatter.info(&format!("Downloaded: {} file(s)", report.counts.downloads));
            }
            if report.counts.uploads > 0 {
                formatter.info(&format!("Uploaded:   {} file(s)", report.counts.uploads));
            }
            if report.counts.local_deletes > 0 || report.counts.remote_deletes > 0 {
                formatter.info(&format!(
                    "Deleted:    {} file(s)",
                    report.counts.local_deletes + report.counts.remote_deletes
                ));
            }
            if report.counts.conflicts > 0 {
                formatter.info(&format!("Conflicts:  {}", report.counts.conflicts));
            }

            if report.duration_ms > 0 && total > 0 {
                let per_sec = total as f64 / (report.duration_ms as f64 / 1000.0);
                formatter.info(&format!("Speed:      {per_sec:.1} actions/s"));
            }

            if !report.errors.is_empty() {
                formatter.error(&format!(
                    "{} error(s) occurred:",
                    report.errors.len()
                ));
                for err in &report.errors {
                    formatter.info(&format!("  - {}: {}", err.path, err.message));
                }
            }
        }

        Ok(())
    }
}
