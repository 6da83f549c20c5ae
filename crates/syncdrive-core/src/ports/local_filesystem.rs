//! Local filesystem port (driven/secondary port)
//!
//! This module defines the interface for interacting with the local
//! filesystem under the sync root: reading/writing files, computing
//! hashes, and watching for changes via inotify or a polling fallback.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because filesystem errors are adapter-specific.
//! - Paths here are real, absolute `std::path::Path` values (the sync root
//!   joined with a `SyncPath`); the adapter, not the domain layer, owns
//!   that join.
//! - `FileObserver` uses synchronous callbacks because the OS delivers
//!   inotify events synchronously.
//! - `WatchHandle` is an RAII guard: dropping it stops watching.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::domain::FileHash;

/// Snapshot of a file's state on the local filesystem.
#[derive(Debug, Clone)]
pub struct FileSystemState {
    pub exists: bool,
    pub is_file: bool,
    pub is_dir: bool,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

impl FileSystemState {
    pub fn not_found() -> Self {
        Self {
            exists: false,
            is_file: false,
            is_dir: false,
            size: 0,
            modified: None,
        }
    }

    pub fn is_regular_file(&self) -> bool {
        self.exists && self.is_file
    }

    pub fn is_directory(&self) -> bool {
        self.exists && self.is_dir
    }
}

/// Observer for filesystem change events.
///
/// Callbacks may be invoked from a background thread (the inotify event
/// loop), so implementations must be thread-safe.
pub trait FileObserver: Send + Sync {
    fn on_created(&self, path: PathBuf);
    fn on_modified(&self, path: PathBuf);
    fn on_deleted(&self, path: PathBuf);
    fn on_renamed(&self, from: PathBuf, to: PathBuf);
}

/// RAII handle for an active filesystem watch. Dropping it stops the watch.
pub struct WatchHandle {
    stop_fn: Option<Box<dyn FnOnce() + Send>>,
}

impl WatchHandle {
    pub fn new(stop_fn: impl FnOnce() + Send + 'static) -> Self {
        Self {
            stop_fn: Some(Box::new(stop_fn)),
        }
    }

    pub fn stop(mut self) {
        if let Some(stop_fn) = self.stop_fn.take() {
            stop_fn();
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        if let Some(stop_fn) = self.stop_fn.take() {
            stop_fn();
        }
    }
}

impl std::fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchHandle")
            .field("active", &self.stop_fn.is_some())
            .finish()
    }
}

/// Port trait for local filesystem operations under the sync root.
///
/// `write_file` writes to a `.partial` sibling and renames into place
/// implementations are expected to do so rather than truncate
/// the destination directly, so a crash mid-write never leaves a
/// half-written file at the real path.
#[async_trait::async_trait]
pub trait LocalFileSystem: Send + Sync {
    async fn read_file(&self, path: &Path) -> anyhow::Result<Vec<u8>>;

    async fn write_file_atomic(&self, path: &Path, data: &[u8]) -> anyhow::Result<()>;

    async fn delete_file(&self, path: &Path) -> anyhow::Result<()>;

    async fn get_state(&self, path: &Path) -> anyhow::Result<FileSystemState>;

    /// Computes the quickXorHash of a file, compatible with the remote
    /// provider's content hash for integrity comparison.
    async fn compute_hash(&self, path: &Path) -> anyhow::Result<FileHash>;

    async fn create_directory(&self, path: &Path) -> anyhow::Result<()>;

    async fn rename(&self, from: &Path, to: &Path) -> anyhow::Result<()>;

    /// Sets a file's modification time, used to apply the remote provider's
    /// authoritative mtime to a freshly-downloaded file before it's renamed
    /// into place.
    async fn set_mtime(&self, path: &Path, mtime: DateTime<Utc>) -> anyhow::Result<()>;

    /// Bytes free on the filesystem backing `path`, used by the safety
    /// checker's disk-space gate.
    async fn available_space(&self, path: &Path) -> anyhow::Result<u64>;

    /// Starts watching a directory tree for filesystem changes. Returns a
    /// `WatchHandle` that stops watching when dropped.
    async fn watch(&self, path: &Path) -> anyhow::Result<WatchHandle>;
}
