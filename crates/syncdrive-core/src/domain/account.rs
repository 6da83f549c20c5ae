//! Linked account: the OAuth identity and local sync root a cycle runs against.
//!
//! The engine itself is account-agnostic (the observer/planner/executor
//! pipeline operates against a single drive), but the CLI's `auth`
//! subcommands and the token-store adapter need somewhere to persist which
//! identity is linked and which local directory it is bound to.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::errors::DomainError;
use super::newtypes::{DeltaToken, DriveId, Email, UniqueId};

/// Lifecycle state of a linked account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountState {
    Active,
    TokenExpired,
    Suspended,
    Error(String),
}

impl AccountState {
    pub fn is_usable(&self) -> bool {
        matches!(self, AccountState::Active)
    }

    pub fn can_transition_to(&self, target: &AccountState) -> bool {
        use AccountState::*;
        match (self, target) {
            (Active, TokenExpired) | (Active, Suspended) | (Active, Error(_)) => true,
            (TokenExpired, Active) | (TokenExpired, Suspended) => true,
            (Suspended, Active) => true,
            (Error(_), Active) => true,
            (a, b) if a == b => true,
            _ => false,
        }
    }
}

/// A linked cloud account bound to a local sync root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: UniqueId,
    pub email: Email,
    pub display_name: String,
    pub drive_id: DriveId,
    pub sync_root: PathBuf,
    pub quota_used: u64,
    pub quota_total: u64,
    pub delta_token: Option<DeltaToken>,
    pub last_sync: Option<DateTime<Utc>>,
    pub state: AccountState,
    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn new(
        email: Email,
        display_name: impl Into<String>,
        drive_id: DriveId,
        sync_root: PathBuf,
    ) -> Self {
        Self {
            id: UniqueId::new(),
            email,
            display_name: display_name.into(),
            drive_id,
            sync_root,
            quota_used: 0,
            quota_total: 0,
            delta_token: None,
            last_sync: None,
            state: AccountState::Active,
            created_at: Utc::now(),
        }
    }

    pub fn transition_to(&mut self, target: AccountState) -> Result<(), DomainError> {
        if !self.state.can_transition_to(&target) {
            return Err(DomainError::InvalidState {
                from: format!("{:?}", self.state),
                to: format!("{:?}", target),
            });
        }
        self.state = target;
        Ok(())
    }

    pub fn quota_used_fraction(&self) -> Option<f64> {
        if self.quota_total == 0 {
            None
        } else {
            Some(self.quota_used as f64 / self.quota_total as f64)
        }
    }

    pub fn record_sync(&mut self, token: Option<DeltaToken>) {
        self.delta_token = token;
        self.last_sync = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_account() -> Account {
        Account::new(
            Email::new("user@example.com").unwrap(),
            "Test User",
            DriveId::new("b!abc123".to_string()).unwrap(),
            PathBuf::from("/home/user/SyncDrive"),
        )
    }

    #[test]
    fn new_account_is_active() {
        let account = test_account();
        assert_eq!(account.state, AccountState::Active);
        assert!(account.last_sync.is_none());
    }

    #[test]
    fn valid_transitions_succeed() {
        let mut account = test_account();
        assert!(account.transition_to(AccountState::TokenExpired).is_ok());
        assert!(account.transition_to(AccountState::Active).is_ok());
    }

    #[test]
    fn invalid_transition_rejected() {
        let mut account = test_account();
        account.state = AccountState::Error("boom".to_string());
        let result = account.transition_to(AccountState::TokenExpired);
        assert!(result.is_err());
    }

    #[test]
    fn quota_fraction_none_when_unknown() {
        let account = test_account();
        assert_eq!(account.quota_used_fraction(), None);
    }

    #[test]
    fn record_sync_updates_token_and_timestamp() {
        let mut account = test_account();
        let token = DeltaToken::new("token-1".to_string()).unwrap();
        account.record_sync(Some(token.clone()));
        assert_eq!(account.delta_token, Some(token));
        assert!(account.last_sync.is_some());
    }
}
