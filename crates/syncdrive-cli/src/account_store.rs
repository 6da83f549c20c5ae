//! Local storage for the single linked account.
//!
//! The baseline store tracks per-drive sync state, not the account itself,
//! so the CLI keeps the linked `Account` as a small JSON file next to the
//! token keyring entry instead of adding an account table to that port.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use syncdrive_core::domain::Account;

/// Default location: `$XDG_DATA_HOME/syncdrive/account.json`.
pub fn default_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("syncdrive")
        .join("account.json")
}

/// Load the linked account, if one has been saved.
pub fn load(path: &Path) -> Result<Option<Account>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read account file {}", path.display()))?;
    let account = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse account file {}", path.display()))?;
    Ok(Some(account))
}

/// Persist the linked account, creating the parent directory if needed.
pub fn save(path: &Path, account: &Account) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let content = serde_json::to_string_pretty(account)?;
    std::fs::write(path, content)
        .with_context(|| format!("failed to write account file {}", path.display()))?;
    Ok(())
}

/// Remove the saved account, if any.
pub fn clear(path: &Path) -> Result<()> {
    if path.exists() {
        std::fs::remove_file(path)
            .with_context(|| format!("failed to remove account file {}", path.display()))?;
    }
    Ok(())
}
