//! Cloud capability ports (driven/secondary ports)
//!
//! The remote side of the engine talks to the cloud provider through a set
//! of narrow capability traits rather than one do-everything client. Each
//! trait maps to one concern the planner/executor pipeline needs
//! (enumerate changes, fetch/create/delete metadata, download, upload);
//! splitting them keeps the executor's per-action code from depending on
//! capabilities it doesn't use, and lets a test fake implement only the
//! trait under test.
//!
//! Every fallible method returns `Result<T, ProviderError>`. `ProviderError`
//! is a closed, typed sentinel set rather than `anyhow::Error` because the
//! error-handling tier (classify as Fatal/Retryable/Skip) is a function of
//! *which* variant came back, not of a message string.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::domain::{CTag, DeltaToken, DriveId, ETag, FileHash, ItemId};

/// The closed set of failure shapes a cloud adapter can report. Retry
/// policy and fatal/skip classification are decided purely from the
/// variant (see the engine's `classify_error` seam), never from parsing
/// the message text.
#[derive(Debug, Error, Clone)]
pub enum ProviderError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("not logged in")]
    NotLoggedIn,

    #[error("throttled, retry after {0:?}")]
    Throttled(Option<Duration>),

    #[error("server error: {0}")]
    ServerError(String),

    #[error("forbidden")]
    Forbidden,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("item locked")]
    Locked,

    #[error("not found")]
    NotFound,

    #[error("no download URL available")]
    NoDownloadURL,

    #[error("resource gone")]
    Gone,

    #[error("upload session expired")]
    UploadSessionExpired,

    #[error("insufficient storage quota")]
    InsufficientStorage,

    #[error("transport error: {0}")]
    Transport(String),
}

/// One item's metadata as reported by the remote, in delta-feed or
/// single-item-fetch shape. Port-level DTO; the observer maps this into a
/// domain `ChangeEvent`/`BaselineEntry`, it is not a domain entity itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteItem {
    pub item_id: ItemId,
    pub parent_id: Option<ItemId>,
    pub name: String,
    pub is_folder: bool,
    pub size: u64,
    pub hash: Option<FileHash>,
    pub modified: Option<chrono::DateTime<chrono::Utc>>,
    pub etag: Option<ETag>,
    pub ctag: Option<CTag>,
    pub is_deleted: bool,
}

/// One page of a delta query.
#[derive(Debug, Clone)]
pub struct DeltaPage {
    pub items: Vec<RemoteItem>,
    /// Present when more pages remain; the caller re-queries with this URL.
    pub next_link: Option<String>,
    /// Present only on the final page; this becomes the stored delta token
    /// for the next cycle.
    pub delta_token: Option<DeltaToken>,
}

/// Enumerates changes since a delta token. `None` requests a full
/// enumeration (initial sync or post-`Gone` recovery).
#[async_trait]
pub trait DeltaFetcher: Send + Sync {
    async fn get_delta(
        &self,
        drive_id: &DriveId,
        token: Option<&DeltaToken>,
    ) -> Result<DeltaPage, ProviderError>;
}

/// Per-item metadata and mutation operations that don't move bytes.
#[async_trait]
pub trait ItemClient: Send + Sync {
    async fn get_metadata(
        &self,
        drive_id: &DriveId,
        item_id: &ItemId,
    ) -> Result<RemoteItem, ProviderError>;

    async fn create_folder(
        &self,
        drive_id: &DriveId,
        parent_id: &ItemId,
        name: &str,
    ) -> Result<RemoteItem, ProviderError>;

    async fn delete_item(&self, drive_id: &DriveId, item_id: &ItemId) -> Result<(), ProviderError>;

    /// Moves and/or renames an item by updating its parent reference and
    /// name; a no-op parent change with a differing `new_name` is a rename.
    async fn move_item(
        &self,
        drive_id: &DriveId,
        item_id: &ItemId,
        new_parent_id: &ItemId,
        new_name: &str,
    ) -> Result<RemoteItem, ProviderError>;
}

/// Whole-file download for files under the large-file threshold.
#[async_trait]
pub trait Downloader: Send + Sync {
    async fn download(&self, drive_id: &DriveId, item_id: &ItemId) -> Result<Vec<u8>, ProviderError>;
}

/// Ranged download, used by the transfer manager to resume a partially
/// written `.partial` file above the large-file threshold.
#[async_trait]
pub trait RangeDownloader: Send + Sync {
    async fn download_range(
        &self,
        drive_id: &DriveId,
        item_id: &ItemId,
        offset: u64,
        length: u64,
    ) -> Result<Vec<u8>, ProviderError>;
}

/// Single-request upload for files under the simple-upload size limit.
#[async_trait]
pub trait Uploader: Send + Sync {
    /// `if_match_etag` implements optimistic concurrency: when set, the
    /// upload only applies if the remote item's current ETag still matches,
    /// preventing a blind overwrite of a concurrent remote edit.
    async fn upload(
        &self,
        drive_id: &DriveId,
        parent_id: &ItemId,
        name: &str,
        data: &[u8],
        if_match_etag: Option<&ETag>,
    ) -> Result<RemoteItem, ProviderError>;
}

/// A handle to an open resumable upload session.
#[derive(Debug, Clone)]
pub struct UploadSession {
    pub upload_url: String,
    pub next_expected_ranges: Vec<(u64, u64)>,
}

/// Chunked resumable upload for files above the large-file threshold.
#[async_trait]
pub trait SessionUploader: Send + Sync {
    async fn create_session(
        &self,
        drive_id: &DriveId,
        parent_id: &ItemId,
        name: &str,
        total_size: u64,
    ) -> Result<UploadSession, ProviderError>;

    async fn upload_chunk(
        &self,
        session: &UploadSession,
        offset: u64,
        chunk: &[u8],
        total_size: u64,
    ) -> Result<Option<RemoteItem>, ProviderError>;

    async fn cancel_session(&self, session: &UploadSession) -> Result<(), ProviderError>;
}

/// Authentication bookkeeping: logging in, refreshing, and the profile
/// lookup the `auth status`/`Account` bootstrap needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

impl Tokens {
    pub fn is_expired(&self) -> bool {
        chrono::Utc::now() >= self.expires_at
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserInfo {
    pub email: String,
    pub display_name: String,
    pub drive_id: String,
    pub quota_used: u64,
    pub quota_total: u64,
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn authenticate_interactive(&self, app_id: &str, scopes: &[String]) -> anyhow::Result<Tokens>;
    async fn refresh(&self, refresh_token: &str) -> anyhow::Result<Tokens>;
    async fn get_user_info(&self, access_token: &str) -> anyhow::Result<UserInfo>;
}
