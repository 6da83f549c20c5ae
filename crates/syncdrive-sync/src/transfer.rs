//! Transfer manager: moves bytes for `Download` and `Upload` actions.
//!
//! Downloads land in a `<target>.partial` sibling, resumed via ranged reads
//! when the remote supports them, hash-verified against the expected
//! content hash with a bounded number of whole-file retries before the
//! transfer is accepted anyway. Uploads go one-shot under the simple-upload
//! threshold and chunked through a resumable session above it, with session
//! state persisted so a retry after a crash doesn't have to start the
//! session over.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use syncdrive_core::domain::{DriveId, FileHash, ItemId};
use syncdrive_core::ports::{
    Downloader, LocalFileSystem, ProviderError, RangeDownloader, RemoteItem, SessionUploader,
    UploadSession, Uploader,
};

/// One-shot upload cutoff; larger files go through a resumable session.
pub const SIMPLE_UPLOAD_THRESHOLD: u64 = 4 * 1024 * 1024;
/// Session upload chunk size. Must be a multiple of `UPLOAD_CHUNK_ALIGNMENT`.
pub const UPLOAD_CHUNK_SIZE: u64 = 10 * 1024 * 1024;
/// Internal alignment the provider's chunked upload protocol requires.
pub const UPLOAD_CHUNK_ALIGNMENT: u64 = 320 * 1024;
/// Range size requested per round when resuming a partial download.
pub const DOWNLOAD_CHUNK_SIZE: u64 = 10 * 1024 * 1024;
/// Whole-file re-download attempts after a hash mismatch before the
/// transfer is accepted with the locally observed hash.
pub const MAX_HASH_RETRIES: u32 = 2;

const _: () = assert!(UPLOAD_CHUNK_SIZE % UPLOAD_CHUNK_ALIGNMENT == 0);

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("local filesystem error: {0}")]
    Filesystem(#[from] anyhow::Error),

    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),
}

/// What a completed download settled on. `effective_hash` is the expected
/// hash when it matched, or the locally observed hash if retries were
/// exhausted and the download was accepted anyway.
#[derive(Debug, Clone)]
pub struct DownloadOutcome {
    pub effective_hash: FileHash,
    pub size: u64,
}

fn partial_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!("{name}.partial"))
}

/// Persisted record of an open resumable upload session, keyed by
/// `(drive_id, remote_path)` so a later cycle can find an in-progress
/// upload for the same destination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredSessionInfo {
    pub session_url: String,
    pub file_hash: String,
    pub file_size: u64,
    pub created_at: DateTime<Utc>,
}

/// Filesystem-backed session store. One JSON file per session, named by a
/// hash of its key so arbitrary remote paths never become filenames.
#[async_trait::async_trait]
pub trait UploadSessionStore: Send + Sync {
    async fn load(&self, drive_id: &DriveId, remote_path: &str) -> anyhow::Result<Option<StoredSessionInfo>>;
    async fn save(&self, drive_id: &DriveId, remote_path: &str, info: &StoredSessionInfo) -> anyhow::Result<()>;
    async fn delete(&self, drive_id: &DriveId, remote_path: &str) -> anyhow::Result<()>;
    /// Session keys older than `older_than`, for post-cycle cleanup of
    /// sessions abandoned by a crash or a since-superseded upload.
    async fn list_stale(&self, older_than: DateTime<Utc>) -> anyhow::Result<Vec<(DriveId, String)>>;
}

fn session_key_digest(drive_id: &DriveId, remote_path: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(drive_id.as_str().as_bytes());
    hasher.update(b"\0");
    hasher.update(remote_path.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub struct FsUploadSessionStore {
    root: PathBuf,
    // Guards against a concurrent save/delete racing list_stale's directory
    // scan; sessions are few and short-lived so a single lock is plenty.
    lock: Mutex<()>,
}

impl FsUploadSessionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            lock: Mutex::new(()),
        }
    }

    fn path_for(&self, drive_id: &DriveId, remote_path: &str) -> PathBuf {
        self.root.join(format!("{}.json", session_key_digest(drive_id, remote_path)))
    }
}

#[derive(Serialize, Deserialize)]
struct StoredRecord {
    drive_id: String,
    remote_path: String,
    info: StoredSessionInfo,
}

#[async_trait::async_trait]
impl UploadSessionStore for FsUploadSessionStore {
    async fn load(&self, drive_id: &DriveId, remote_path: &str) -> anyhow::Result<Option<StoredSessionInfo>> {
        let _guard = self.lock.lock().await;
        let path = self.path_for(drive_id, remote_path);
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let record: StoredRecord = serde_json::from_slice(&bytes)?;
                Ok(Some(record.info))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, drive_id: &DriveId, remote_path: &str, info: &StoredSessionInfo) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        tokio::fs::create_dir_all(&self.root).await?;
        let path = self.path_for(drive_id, remote_path);
        let record = StoredRecord {
            drive_id: drive_id.as_str().to_string(),
            remote_path: remote_path.to_string(),
            info: info.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&record)?;
        tokio::fs::write(&path, bytes).await?;
        Ok(())
    }

    async fn delete(&self, drive_id: &DriveId, remote_path: &str) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        let path = self.path_for(drive_id, remote_path);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_stale(&self, older_than: DateTime<Utc>) -> anyhow::Result<Vec<(DriveId, String)>> {
        let _guard = self.lock.lock().await;
        let mut stale = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(stale),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let bytes = match tokio::fs::read(entry.path()).await {
                Ok(b) => b,
                Err(_) => continue,
            };
            let Ok(record) = serde_json::from_slice::<StoredRecord>(&bytes) else {
                continue;
            };
            if record.info.created_at < older_than {
                if let Ok(drive_id) = DriveId::new(record.drive_id) {
                    stale.push((drive_id, record.remote_path));
                }
            }
        }
        Ok(stale)
    }
}

/// Executes the byte-moving half of `Download`/`Upload` actions. Everything
/// else about an action (deciding it's needed, recording its outcome in the
/// baseline) lives in the executor that calls this.
pub struct TransferManager {
    downloader: Arc<dyn Downloader>,
    range_downloader: Option<Arc<dyn RangeDownloader>>,
    uploader: Arc<dyn Uploader>,
    session_uploader: Arc<dyn SessionUploader>,
    filesystem: Arc<dyn LocalFileSystem>,
    sessions: Arc<dyn UploadSessionStore>,
}

impl TransferManager {
    pub fn new(
        downloader: Arc<dyn Downloader>,
        range_downloader: Option<Arc<dyn RangeDownloader>>,
        uploader: Arc<dyn Uploader>,
        session_uploader: Arc<dyn SessionUploader>,
        filesystem: Arc<dyn LocalFileSystem>,
        sessions: Arc<dyn UploadSessionStore>,
    ) -> Self {
        Self {
            downloader,
            range_downloader,
            uploader,
            session_uploader,
            filesystem,
            sessions,
        }
    }

    #[instrument(skip(self), fields(target = %target.display()))]
    pub async fn download(
        &self,
        drive_id: &DriveId,
        item_id: &ItemId,
        target: &Path,
        remote_size: u64,
        expected_hash: Option<&FileHash>,
        remote_mtime: Option<DateTime<Utc>>,
    ) -> Result<DownloadOutcome, TransferError> {
        if let Some(parent) = target.parent() {
            self.filesystem.create_directory(parent).await?;
        }
        let partial = partial_path(target);

        let mut attempt = 0u32;
        loop {
            self.fill_partial(drive_id, item_id, &partial, remote_size).await?;
            let hash = self.filesystem.compute_hash(&partial).await?;
            let matches = expected_hash.map(|expected| expected == &hash).unwrap_or(true);

            if matches || attempt >= MAX_HASH_RETRIES {
                if !matches {
                    warn!(
                        attempts = attempt,
                        "accepting download after exhausting hash retries"
                    );
                }
                if let Some(mtime) = remote_mtime {
                    self.filesystem.set_mtime(&partial, mtime).await?;
                }
                let state = self.filesystem.get_state(&partial).await?;
                self.filesystem.rename(&partial, target).await?;
                return Ok(DownloadOutcome {
                    effective_hash: hash,
                    size: state.size,
                });
            }

            debug!(attempt, "downloaded content hash mismatch, retrying whole file");
            self.filesystem.delete_file(&partial).await.ok();
            attempt += 1;
        }
    }

    async fn fill_partial(
        &self,
        drive_id: &DriveId,
        item_id: &ItemId,
        partial: &Path,
        remote_size: u64,
    ) -> Result<(), TransferError> {
        loop {
            let state = self.filesystem.get_state(partial).await?;
            let existing = if state.exists { state.size } else { 0 };
            if existing >= remote_size {
                return Ok(());
            }

            match &self.range_downloader {
                Some(ranged) if existing > 0 => {
                    let chunk_len = DOWNLOAD_CHUNK_SIZE.min(remote_size - existing);
                    let chunk = ranged.download_range(drive_id, item_id, existing, chunk_len).await?;
                    let mut combined = self.filesystem.read_file(partial).await?;
                    combined.extend_from_slice(&chunk);
                    self.filesystem.write_file_atomic(partial, &combined).await?;
                }
                _ => {
                    let bytes = self.downloader.download(drive_id, item_id).await?;
                    self.filesystem.write_file_atomic(partial, &bytes).await?;
                    return Ok(());
                }
            }
        }
    }

    #[instrument(skip(self), fields(local = %local_path.display(), remote_path))]
    pub async fn upload(
        &self,
        drive_id: &DriveId,
        parent_id: &ItemId,
        name: &str,
        local_path: &Path,
        remote_path: &str,
    ) -> Result<RemoteItem, TransferError> {
        let state = self.filesystem.get_state(local_path).await?;
        let hash = self.filesystem.compute_hash(local_path).await?;

        if state.size <= SIMPLE_UPLOAD_THRESHOLD {
            let data = self.filesystem.read_file(local_path).await?;
            let item = self.uploader.upload(drive_id, parent_id, name, &data, None).await?;
            self.sessions.delete(drive_id, remote_path).await.ok();
            return Ok(item);
        }

        self.upload_chunked(drive_id, parent_id, name, local_path, remote_path, &hash, state.size)
            .await
    }

    async fn upload_chunked(
        &self,
        drive_id: &DriveId,
        parent_id: &ItemId,
        name: &str,
        local_path: &Path,
        remote_path: &str,
        hash: &FileHash,
        total_size: u64,
    ) -> Result<RemoteItem, TransferError> {
        let stored = self.sessions.load(drive_id, remote_path).await?;

        let session = match stored {
            Some(record) if record.file_hash == hash.to_string() && record.file_size == total_size => {
                debug!("resuming existing upload session");
                UploadSession {
                    upload_url: record.session_url,
                    next_expected_ranges: vec![(0, total_size)],
                }
            }
            Some(_) => {
                self.sessions.delete(drive_id, remote_path).await.ok();
                self.create_and_store_session(drive_id, parent_id, name, remote_path, hash, total_size)
                    .await?
            }
            None => {
                self.create_and_store_session(drive_id, parent_id, name, remote_path, hash, total_size)
                    .await?
            }
        };

        let data = self.filesystem.read_file(local_path).await?;
        let mut offset = 0u64;
        loop {
            let end = (offset + UPLOAD_CHUNK_SIZE).min(total_size);
            let chunk = &data[offset as usize..end as usize];

            match self.session_uploader.upload_chunk(&session, offset, chunk, total_size).await {
                Ok(Some(item)) => {
                    self.sessions.delete(drive_id, remote_path).await.ok();
                    return Ok(item);
                }
                Ok(None) => {
                    offset = end;
                    if offset >= total_size {
                        // Provider didn't return the item on the final chunk;
                        // treat this as a protocol error rather than loop forever.
                        self.sessions.delete(drive_id, remote_path).await.ok();
                        return Err(TransferError::Provider(ProviderError::Transport(
                            "session upload completed without returning an item".into(),
                        )));
                    }
                }
                Err(ProviderError::UploadSessionExpired) => {
                    self.sessions.delete(drive_id, remote_path).await.ok();
                    return Err(TransferError::Provider(ProviderError::UploadSessionExpired));
                }
                Err(e) => {
                    self.sessions.delete(drive_id, remote_path).await.ok();
                    return Err(TransferError::Provider(e));
                }
            }
        }
    }

    async fn create_and_store_session(
        &self,
        drive_id: &DriveId,
        parent_id: &ItemId,
        name: &str,
        remote_path: &str,
        hash: &FileHash,
        total_size: u64,
    ) -> Result<UploadSession, TransferError> {
        let session = self
            .session_uploader
            .create_session(drive_id, parent_id, name, total_size)
            .await?;
        self.sessions
            .save(
                drive_id,
                remote_path,
                &StoredSessionInfo {
                    session_url: session.upload_url.clone(),
                    file_hash: hash.to_string(),
                    file_size: total_size,
                    created_at: Utc::now(),
                },
            )
            .await?;
        Ok(session)
    }

    /// Deletes stored sessions older than `max_age`, and asks the provider
    /// to cancel each so the remote doesn't keep an abandoned upload slot
    /// open. Run once after each successful cycle.
    pub async fn cleanup_stale_sessions(&self, max_age: chrono::Duration) -> anyhow::Result<usize> {
        let cutoff = Utc::now() - max_age;
        let stale = self.sessions.list_stale(cutoff).await?;
        let mut cleaned = 0;
        for (drive_id, remote_path) in stale {
            if let Ok(Some(info)) = self.sessions.load(&drive_id, &remote_path).await {
                let session = UploadSession {
                    upload_url: info.session_url,
                    next_expected_ranges: Vec::new(),
                };
                self.session_uploader.cancel_session(&session).await.ok();
            }
            self.sessions.delete(&drive_id, &remote_path).await.ok();
            cleaned += 1;
        }
        Ok(cleaned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicU32, Ordering};
    use syncdrive_core::ports::{FileSystemState, WatchHandle};
    use tempfile::TempDir;

    struct FakeDownloader {
        data: Vec<u8>,
    }

    #[async_trait::async_trait]
    impl Downloader for FakeDownloader {
        async fn download(&self, _drive_id: &DriveId, _item_id: &ItemId) -> Result<Vec<u8>, ProviderError> {
            Ok(self.data.clone())
        }
    }

    struct FakeRangeDownloader {
        data: Vec<u8>,
    }

    #[async_trait::async_trait]
    impl RangeDownloader for FakeRangeDownloader {
        async fn download_range(
            &self,
            _drive_id: &DriveId,
            _item_id: &ItemId,
            offset: u64,
            length: u64,
        ) -> Result<Vec<u8>, ProviderError> {
            let start = offset as usize;
            let end = (start + length as usize).min(self.data.len());
            Ok(self.data[start..end].to_vec())
        }
    }

    struct FakeUploader {
        calls: AtomicU32,
    }

    #[async_trait::async_trait]
    impl Uploader for FakeUploader {
        async fn upload(
            &self,
            _drive_id: &DriveId,
            _parent_id: &ItemId,
            name: &str,
            _data: &[u8],
            _if_match_etag: Option<&syncdrive_core::domain::ETag>,
        ) -> Result<RemoteItem, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(RemoteItem {
                item_id: ItemId::new("new-item".into()).unwrap(),
                parent_id: None,
                name: name.to_string(),
                is_folder: false,
                size: 0,
                hash: None,
                modified: None,
                etag: None,
                ctag: None,
                is_deleted: false,
            })
        }
    }

    struct FakeSessionUploader {
        chunks_until_done: u32,
        calls: AtomicU32,
    }

    #[async_trait::async_trait]
    impl SessionUploader for FakeSessionUploader {
        async fn create_session(
            &self,
            _drive_id: &DriveId,
            _parent_id: &ItemId,
            _name: &str,
            _total_size: u64,
        ) -> Result<UploadSession, ProviderError> {
            Ok(UploadSession {
                upload_url: "https://upload.example/session-1".into(),
                next_expected_ranges: vec![],
            })
        }

        async fn upload_chunk(
            &self,
            _session: &UploadSession,
            _offset: u64,
            _chunk: &[u8],
            _total_size: u64,
        ) -> Result<Option<RemoteItem>, ProviderError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n >= self.chunks_until_done {
                Ok(Some(RemoteItem {
                    item_id: ItemId::new("chunked-item".into()).unwrap(),
                    parent_id: None,
                    name: "big.bin".into(),
                    is_folder: false,
                    size: 0,
                    hash: None,
                    modified: None,
                    etag: None,
                    ctag: None,
                    is_deleted: false,
                }))
            } else {
                Ok(None)
            }
        }

        async fn cancel_session(&self, _session: &UploadSession) -> Result<(), ProviderError> {
            Ok(())
        }
    }

    struct RealFsAdapter {
        root: TempDir,
    }

    #[async_trait::async_trait]
    impl LocalFileSystem for RealFsAdapter {
        async fn read_file(&self, path: &Path) -> anyhow::Result<Vec<u8>> {
            Ok(tokio::fs::read(path).await?)
        }

        async fn write_file_atomic(&self, path: &Path, data: &[u8]) -> anyhow::Result<()> {
            tokio::fs::write(path, data).await?;
            Ok(())
        }

        async fn delete_file(&self, path: &Path) -> anyhow::Result<()> {
            match tokio::fs::remove_file(path).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            }
        }

        async fn get_state(&self, path: &Path) -> anyhow::Result<FileSystemState> {
            match tokio::fs::metadata(path).await {
                Ok(meta) => Ok(FileSystemState {
                    exists: true,
                    is_file: meta.is_file(),
                    is_dir: meta.is_dir(),
                    size: meta.len(),
                    modified: None,
                }),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(FileSystemState::not_found()),
                Err(e) => Err(e.into()),
            }
        }

        async fn compute_hash(&self, path: &Path) -> anyhow::Result<FileHash> {
            let data = tokio::fs::read(path).await?;
            let mut hasher = Sha256::new();
            hasher.update(&data);
            let digest = hasher.finalize();
            use base64::Engine;
            let encoded = base64::engine::general_purpose::STANDARD.encode(&digest[..20]);
            Ok(FileHash::new(encoded)?)
        }

        async fn create_directory(&self, path: &Path) -> anyhow::Result<()> {
            tokio::fs::create_dir_all(path).await?;
            Ok(())
        }

        async fn rename(&self, from: &Path, to: &Path) -> anyhow::Result<()> {
            tokio::fs::rename(from, to).await?;
            Ok(())
        }

        async fn set_mtime(&self, path: &Path, mtime: DateTime<Utc>) -> anyhow::Result<()> {
            let path = path.to_path_buf();
            tokio::task::spawn_blocking(move || {
                let ft = filetime::FileTime::from_unix_time(mtime.timestamp(), mtime.timestamp_subsec_nanos());
                filetime::set_file_mtime(&path, ft)
            })
            .await??;
            Ok(())
        }

        async fn available_space(&self, _path: &Path) -> anyhow::Result<u64> {
            Ok(u64::MAX / 2)
        }

        async fn watch(&self, _path: &Path) -> anyhow::Result<WatchHandle> {
            Ok(WatchHandle::new(|| {}))
        }
    }

    fn drive() -> DriveId {
        DriveId::new("d1".into()).unwrap()
    }

    fn item() -> ItemId {
        ItemId::new("item-1".into()).unwrap()
    }

    #[tokio::test]
    async fn download_whole_file_matches_expected_hash() {
        let fs = Arc::new(RealFsAdapter { root: TempDir::new().unwrap() });
        let content = b"hello world".to_vec();
        let expected_hash = fs.compute_hash_bytes_for_test(&content);

        let downloader = Arc::new(FakeDownloader { data: content.clone() });
        let sessions = Arc::new(FsUploadSessionStore::new(fs.root.path().join("sessions")));
        let uploader = Arc::new(FakeUploader { calls: AtomicU32::new(0) });
        let session_uploader = Arc::new(FakeSessionUploader { chunks_until_done: 1, calls: AtomicU32::new(0) });

        let manager = TransferManager::new(downloader, None, uploader, session_uploader, fs.clone(), sessions);

        let mtime = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let target = fs.root.path().join("out.bin");
        let outcome = manager
            .download(
                &drive(),
                &item(),
                &target,
                content.len() as u64,
                Some(&expected_hash),
                Some(mtime),
            )
            .await
            .unwrap();

        assert_eq!(outcome.size, content.len() as u64);
        assert!(target.exists());
        assert!(!partial_path(&target).exists());
        let applied = filetime::FileTime::from_last_modification_time(&std::fs::metadata(&target).unwrap());
        assert_eq!(applied.unix_seconds(), mtime.timestamp());
    }

    #[tokio::test]
    async fn download_accepts_after_exhausting_retries_on_persistent_mismatch() {
        let fs = Arc::new(RealFsAdapter { root: TempDir::new().unwrap() });
        let content = b"hello world".to_vec();
        let wrong_hash = fs.compute_hash_bytes_for_test(b"totally different");

        let downloader = Arc::new(FakeDownloader { data: content.clone() });
        let sessions = Arc::new(FsUploadSessionStore::new(fs.root.path().join("sessions")));
        let uploader = Arc::new(FakeUploader { calls: AtomicU32::new(0) });
        let session_uploader = Arc::new(FakeSessionUploader { chunks_until_done: 1, calls: AtomicU32::new(0) });

        let manager = TransferManager::new(downloader, None, uploader, session_uploader, fs.clone(), sessions);

        let target = fs.root.path().join("out.bin");
        let outcome = manager
            .download(&drive(), &item(), &target, content.len() as u64, Some(&wrong_hash), None)
            .await
            .unwrap();

        assert_eq!(outcome.size, content.len() as u64);
        assert!(target.exists());
    }

    #[tokio::test]
    async fn download_resumes_from_existing_partial_via_range() {
        let fs = Arc::new(RealFsAdapter { root: TempDir::new().unwrap() });
        let content = b"0123456789abcdef".to_vec();

        let partial = partial_path(&fs.root.path().join("out.bin"));
        tokio::fs::write(&partial, &content[..4]).await.unwrap();

        let downloader = Arc::new(FakeDownloader { data: content.clone() });
        let range_downloader = Arc::new(FakeRangeDownloader { data: content.clone() });
        let sessions = Arc::new(FsUploadSessionStore::new(fs.root.path().join("sessions")));
        let uploader = Arc::new(FakeUploader { calls: AtomicU32::new(0) });
        let session_uploader = Arc::new(FakeSessionUploader { chunks_until_done: 1, calls: AtomicU32::new(0) });

        let manager = TransferManager::new(
            downloader,
            Some(range_downloader),
            uploader,
            session_uploader,
            fs.clone(),
            sessions,
        );

        let target = fs.root.path().join("out.bin");
        let expected_hash = fs.compute_hash_bytes_for_test(&content);
        let outcome = manager
            .download(&drive(), &item(), &target, content.len() as u64, Some(&expected_hash), None)
            .await
            .unwrap();

        assert_eq!(outcome.size, content.len() as u64);
        assert_eq!(tokio::fs::read(&target).await.unwrap(), content);
    }

    #[tokio::test]
    async fn upload_small_file_goes_through_simple_uploader() {
        let fs = Arc::new(RealFsAdapter { root: TempDir::new().unwrap() });
        let local = fs.root.path().join("small.txt");
        tokio::fs::write(&local, b"small").await.unwrap();

        let downloader = Arc::new(FakeDownloader { data: vec![] });
        let sessions = Arc::new(FsUploadSessionStore::new(fs.root.path().join("sessions")));
        let uploader = Arc::new(FakeUploader { calls: AtomicU32::new(0) });
        let session_uploader = Arc::new(FakeSessionUploader { chunks_until_done: 1, calls: AtomicU32::new(0) });

        let manager = TransferManager::new(downloader, None, uploader.clone(), session_uploader, fs.clone(), sessions);

        let item = manager
            .upload(&drive(), &item(), "small.txt", &local, "small.txt")
            .await
            .unwrap();

        assert_eq!(item.name, "small.txt");
        assert_eq!(uploader.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn upload_large_file_uses_chunked_session() {
        let fs = Arc::new(RealFsAdapter { root: TempDir::new().unwrap() });
        let local = fs.root.path().join("big.bin");
        let big = vec![7u8; (SIMPLE_UPLOAD_THRESHOLD + 1) as usize];
        tokio::fs::write(&local, &big).await.unwrap();

        let downloader = Arc::new(FakeDownloader { data: vec![] });
        let sessions = Arc::new(FsUploadSessionStore::new(fs.root.path().join("sessions")));
        let uploader = Arc::new(FakeUploader { calls: AtomicU32::new(0) });
        let session_uploader = Arc::new(FakeSessionUploader { chunks_until_done: 1, calls: AtomicU32::new(0) });

        let manager = TransferManager::new(downloader, None, uploader, session_uploader.clone(), fs.clone(), sessions);

        let result = manager
            .upload(&drive(), &item(), "big.bin", &local, "big.bin")
            .await
            .unwrap();

        assert_eq!(result.name, "big.bin");
        assert!(session_uploader.calls.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn stale_sessions_are_cleaned_up() {
        let root = TempDir::new().unwrap();
        let store = FsUploadSessionStore::new(root.path().join("sessions"));
        let old = StoredSessionInfo {
            session_url: "https://upload.example/old".into(),
            file_hash: "abc".into(),
            file_size: 10,
            created_at: Utc::now() - chrono::Duration::days(2),
        };
        store.save(&drive(), "old.bin", &old).await.unwrap();

        let fs = Arc::new(RealFsAdapter { root: TempDir::new().unwrap() });
        let downloader = Arc::new(FakeDownloader { data: vec![] });
        let uploader = Arc::new(FakeUploader { calls: AtomicU32::new(0) });
        let session_uploader = Arc::new(FakeSessionUploader { chunks_until_done: 1, calls: AtomicU32::new(0) });
        let store = Arc::new(store);

        let manager = TransferManager::new(downloader, None, uploader, session_uploader, fs, store.clone());
        let cleaned = manager.cleanup_stale_sessions(chrono::Duration::hours(1)).await.unwrap();

        assert_eq!(cleaned, 1);
        assert!(store.load(&drive(), "old.bin").await.unwrap().is_none());
    }

    impl RealFsAdapter {
        fn compute_hash_bytes_for_test(&self, data: &[u8]) -> FileHash {
            let mut hasher = Sha256::new();
            hasher.update(data);
            let digest = hasher.finalize();
            use base64::Engine;
            let encoded = base64::engine::general_purpose::STANDARD.encode(&digest[..20]);
            FileHash::new(encoded).unwrap()
        }
    }
}
