//! Auth commands - Login, Logout, and Status for OneDrive authentication
//!
//! Provides the `syncdrive auth` CLI subcommands which:
//! 1. `login`  - Runs the OAuth2 PKCE flow via GraphAuthAdapter, stores tokens
//!    in the system keyring, fetches user info, and persists the account.
//! 2. `logout` - Clears tokens from the keyring and suspends the account.
//! 3. `status` - Shows current account info and token validity.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Subcommand;
use tracing::info;

use syncdrive_baseline::{DatabasePool, SqliteAuditStore};
use syncdrive_core::config::Config;
use syncdrive_core::domain::{Account, AccountState, DriveId, Email};
use syncdrive_graph::auth::{GraphAuthAdapter, KeyringTokenStorage};
use syncdrive_graph::client::GraphClient;

use crate::account_store;
use crate::output::{get_formatter, OutputFormat};

#[derive(Debug, Subcommand)]
pub enum AuthCommand {
    /// Authenticate with OneDrive via OAuth2
    Login {
        /// Custom Azure App ID
        #[arg(long)]
        app_id: Option<String>,
    },
    /// Remove stored credentials
    Logout,
    /// Check authentication status
    Status,
}

impl AuthCommand {
    pub async fn execute(&self, format: OutputFormat) -> Result<()> {
        let fmt = get_formatter(format == OutputFormat::Json);
        match self {
            AuthCommand::Login { app_id } => self.execute_login(app_id.as_deref(), &*fmt).await,
            AuthCommand::Logout => self.execute_logout(&*fmt).await,
            AuthCommand::Status => self.execute_status(&*fmt, format).await,
        }
    }

    async fn audit_logger() -> Result<syncdrive_audit::AuditLogger> {
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
        let store = Arc::new(SqliteAuditStore::new(&pool));
        Ok(syncdrive_audit::AuditLogger::new(store))
    }

    /// 1. Load config to get app_id
    /// 2. Run OAuth2 PKCE via GraphAuthAdapter
    /// 3. Store tokens in keyring
    /// 4. Fetch user info from Graph API
    /// 5. Create and persist the Account
    /// 6. Record audit entry
    async fn execute_login(
        &self,
        cli_app_id: Option<&str>,
        fmt: &dyn crate::output::OutputFormatter,
    ) -> Result<()> {
        let config_path = Config::default_path();
        let config = Config::load_or_default(&config_path);

        let app_id = cli_app_id
            .map(std::string::ToString::to_string)
            .or_else(|| config.auth.app_id.clone())
            .context("No app_id provided. Use --app-id flag or set auth.app_id in config.yaml")?;

        info!(app_id = %app_id, "Starting OAuth2 login");

        fmt.info("Opening browser for Microsoft login...");
        let auth_adapter = GraphAuthAdapter::with_app_id(&app_id);
        let tokens = auth_adapter.login().await.context("OAuth2 login failed")?;

        fmt.info("Retrieving account information...");
        let graph_client = GraphClient::new(tokens.access_token.clone());
        let user_info = graph_client
            .get_user_info()
            .await
            .context("Failed to retrieve user info from Graph API")?;

        info!(email = %user_info.email, display_name = %user_info.display_name, "Got user info");

        KeyringTokenStorage::store(&user_info.email, &tokens)
            .context("Failed to store tokens in keyring")?;

        let email = Email::new(user_info.email.clone()).context("Invalid email from Graph API")?;
        let drive_id =
            DriveId::new(user_info.drive_id.clone()).context("Invalid drive id from Graph API")?;

        let mut account = Account::new(
            email,
            user_info.display_name.clone(),
            drive_id,
            config.sync.root.clone(),
        );
        account.quota_used = user_info.quota_used;
        account.quota_total = user_info.quota_total;

        let path = account_store::default_path();
        account_store::save(&path, &account).context("Failed to save account")?;

        let logger = Self::audit_logger().await?;
        logger
            .log_auth_login(&user_info.email, &user_info.display_name)
            .await;

        fmt.success(&format!(
            "Authenticated as {} ({})",
            user_info.display_name, user_info.email
        ));

        let quota_used_mb = user_info.quota_used as f64 / 1_048_576.0;
        let quota_total_gb = user_info.quota_total as f64 / 1_073_741_824.0;
        fmt.info(&format!(
            "Storage: {:.1} MB used / {:.1} GB total ({:.1}%)",
            quota_used_mb,
            quota_total_gb,
            account.quota_used_fraction().unwrap_or(0.0) * 100.0
        ));
        fmt.info(&format!("Sync root: {}", config.sync.root.display()));

        Ok(())
    }

    /// 1. Load saved account
    /// 2. Clear tokens from keyring
    /// 3. Suspend account
    /// 4. Record audit entry
    async fn execute_logout(&self, fmt: &dyn crate::output::OutputFormatter) -> Result<()> {
        let path = account_store::default_path();
        let account = account_store::load(&path).context("Failed to load account")?;

        let mut account = match account {
            Some(a) => a,
            None => {
                fmt.info("No account configured. Nothing to log out.");
                return Ok(());
            }
        };

        let email = account.email.as_str().to_string();
        info!(email = %email, "Logging out");

        KeyringTokenStorage::clear(&email).context("Failed to clear tokens from keyring")?;

        account
            .transition_to(AccountState::Suspended)
            .context("Failed to suspend account")?;
        account_store::save(&path, &account).context("Failed to update account")?;

        let logger = Self::audit_logger().await?;
        logger.log_auth_logout(&email).await;

        fmt.success("Logged out successfully");
        fmt.info("Credentials removed from keyring");

        Ok(())
    }

    /// 1. Load saved account
    /// 2. Check token state in keyring
    /// 3. Display account info and token validity
    async fn execute_status(
        &self,
        fmt: &dyn crate::output::OutputFormatter,
        format: OutputFormat,
    ) -> Result<()> {
        let path = account_store::default_path();
        let account = account_store::load(&path).context("Failed to load account")?;

        let account = match account {
            Some(a) => a,
            None => {
                fmt.info("Authentication status: Not configured");
                fmt.info("Run 'syncdrive auth login' to authenticate");
                return Ok(());
            }
        };

        let email = account.email.as_str();
        let token_status = match KeyringTokenStorage::load(email) {
            Ok(Some(tokens)) => {
                if tokens.is_expired() {
                    "Expired"
                } else {
                    "Valid"
                }
            }
            Ok(None) => "Not found",
            Err(_) => "Error reading keyring",
        };

        let quota_percent = account.quota_used_fraction().unwrap_or(0.0) * 100.0;

        if matches!(format, OutputFormat::Json) {
            let json = serde_json::json!({
                "authenticated": true,
                "email": email,
                "display_name": account.display_name,
                "drive_id": account.drive_id.as_str(),
                "state": format!("{}", account.state),
                "token_status": token_status,
                "sync_root": account.sync_root.display().to_string(),
                "quota_used": account.quota_used,
                "quota_total": account.quota_total,
                "quota_percent": quota_percent,
                "last_sync": account.last_sync.map(|t| t.to_rfc3339()),
            });
            fmt.print_json(&json);
        } else {
            fmt.success(&format!(
                "Authenticated as {} ({})",
                account.display_name, email
            ));
            fmt.info(&format!("Account state: {}", account.state));
            fmt.info(&format!("Token status:  {token_status}"));
            fmt.info(&format!("Drive ID:      {}", account.drive_id.as_str()));
            fmt.info(&format!("Sync root:     {}", account.sync_root.display()));

            let quota_used_mb = account.quota_used as f64 / 1_048_576.0;
            let quota_total_gb = account.quota_total as f64 / 1_073_741_824.0;
            fmt.info(&format!(
                "Storage:       {quota_used_mb:.1} MB / {quota_total_gb:.1} GB ({quota_percent:.1}%)"
            ));

            if let Some(last_sync) = account.last_sync {
                fmt.info(&format!(
                    "Last sync:     {}",
                    last_sync.format("%Y-%m-%d %H:%M:%S UTC")
                ));
            } else {
                fmt.info("Last sync:     Never");
            }
        }

        Ok(())
    }
}
