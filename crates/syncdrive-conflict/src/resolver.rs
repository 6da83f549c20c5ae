//! Applies a chosen `Resolution` to a detected conflict.
//!
//! Talks to the provider ports directly rather than through the transfer
//! manager: conflict copies are a one-off, not a resumable-upload candidate,
//! and routing through `syncdrive-sync` would make this crate depend on its
//! own caller.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;

use syncdrive_core::domain::conflict::{ConflictRecord, ConflictType, ResolvedBy, Resolution};
use syncdrive_core::domain::{DriveId, ItemId};
use syncdrive_core::ports::{Downloader, LocalFileSystem, ProviderError, RemoteItem, Uploader};

use crate::error::ConflictError;
use crate::namer::ConflictNamer;

impl From<ProviderError> for ConflictError {
    fn from(e: ProviderError) -> Self {
        ConflictError::ResolutionFailed(e.to_string())
    }
}

/// What changed on disk as a result of applying a resolution. The caller
/// (the action runner) uses this to build the baseline upsert.
pub enum ResolutionOutcome {
    /// Local content now matches `item`; no local rename happened.
    Overwritten { item: RemoteItem },
    /// Local content now matches `item`, downloaded to the original path;
    /// `renamed_to` is the sibling holding the pre-resolution local copy.
    KeptBoth { item: RemoteItem, renamed_to: String },
    /// Resolution was deferred; nothing on disk changed.
    Deferred,
}

pub struct ConflictResolver {
    downloader: Arc<dyn Downloader>,
    uploader: Arc<dyn Uploader>,
    filesystem: Arc<dyn LocalFileSystem>,
}

impl ConflictResolver {
    pub fn new(
        downloader: Arc<dyn Downloader>,
        uploader: Arc<dyn Uploader>,
        filesystem: Arc<dyn LocalFileSystem>,
    ) -> Self {
        Self {
            downloader,
            uploader,
            filesystem,
        }
    }

    /// Applies the fixed automatic policy for `conflict_type`: `EditEdit`
    /// and `CreateCreate` keep both (rename-and-fetch), `EditDelete` keeps
    /// the local side by re-uploading it with no rename. Both outcomes are
    /// recorded as `Resolution::KeepBoth` on the conflict record - for
    /// `EditDelete` that's the resolution the record shows even though the
    /// behavior taken is upload-wins, matching how this policy is specified.
    pub async fn apply_auto(
        &self,
        conflict: &mut ConflictRecord,
        conflict_type: ConflictType,
        drive_id: &DriveId,
        parent_id: &ItemId,
        item_id: &ItemId,
        name: &str,
        local_path: &Path,
    ) -> Result<ResolutionOutcome, ConflictError> {
        let behavior = match conflict_type {
            ConflictType::EditEdit | ConflictType::CreateCreate => Resolution::KeepBoth,
            ConflictType::EditDelete => Resolution::KeepLocal,
        };
        let outcome = self
            .apply(conflict, behavior, ResolvedBy::Auto, drive_id, parent_id, item_id, name, local_path)
            .await?;
        conflict.resolution = Resolution::KeepBoth;
        Ok(outcome)
    }

    /// Applies `resolution` for a conflict at `local_path`, uploading to
    /// `parent_id`/`name` or downloading `item_id` as the strategy requires.
    /// Records the outcome (and `resolved_by`) on `conflict` and returns
    /// what changed on disk.
    #[allow(clippy::too_many_arguments)]
    pub async fn apply(
        &self,
        conflict: &mut ConflictRecord,
        resolution: Resolution,
        resolved_by: ResolvedBy,
        drive_id: &DriveId,
        parent_id: &ItemId,
        item_id: &ItemId,
        name: &str,
        local_path: &Path,
    ) -> Result<ResolutionOutcome, ConflictError> {
        let outcome = match resolution {
            Resolution::KeepLocal => {
                let data = self
                    .filesystem
                    .read_file(local_path)
                    .await
                    .map_err(|e| ConflictError::ResolutionFailed(e.to_string()))?;
                let item = self.uploader.upload(drive_id, parent_id, name, &data, None).await?;
                ResolutionOutcome::Overwritten { item }
            }
            Resolution::KeepRemote => {
                let data = self.downloader.download(drive_id, item_id).await?;
                self.filesystem
                    .write_file_atomic(local_path, &data)
                    .await
                    .map_err(|e| ConflictError::ResolutionFailed(e.to_string()))?;
                let hash = self
                    .filesystem
                    .compute_hash(local_path)
                    .await
                    .map_err(|e| ConflictError::ResolutionFailed(e.to_string()))?;
                let item = RemoteItem {
                    item_id: item_id.clone(),
                    parent_id: Some(parent_id.clone()),
                    name: name.to_string(),
                    is_folder: false,
                    size: data.len() as u64,
                    hash: Some(hash),
                    modified: None,
                    etag: None,
                    ctag: None,
                    is_deleted: false,
                };
                ResolutionOutcome::Overwritten { item }
            }
            Resolution::KeepBoth => {
                let renamed_name = ConflictNamer::generate(name, Utc::now());
                let renamed_path = local_path
                    .parent()
                    .map(|p| p.join(&renamed_name))
                    .unwrap_or_else(|| Path::new(&renamed_name).to_path_buf());
                self.filesystem
                    .rename(local_path, &renamed_path)
                    .await
                    .map_err(|e| ConflictError::ResolutionFailed(e.to_string()))?;

                let data = self.downloader.download(drive_id, item_id).await?;
                self.filesystem
                    .write_file_atomic(local_path, &data)
                    .await
                    .map_err(|e| ConflictError::ResolutionFailed(e.to_string()))?;
                let hash = self
                    .filesystem
                    .compute_hash(local_path)
                    .await
                    .map_err(|e| ConflictError::ResolutionFailed(e.to_string()))?;
                let item = RemoteItem {
                    item_id: item_id.clone(),
                    parent_id: Some(parent_id.clone()),
                    name: name.to_string(),
                    is_folder: false,
                    size: data.len() as u64,
                    hash: Some(hash),
                    modified: None,
                    etag: None,
                    ctag: None,
                    is_deleted: false,
                };
                ResolutionOutcome::KeptBoth {
                    item,
                    renamed_to: renamed_name,
                }
            }
            Resolution::Unresolved => return Ok(ResolutionOutcome::Deferred),
        };

        conflict.resolve(resolution, resolved_by);
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use syncdrive_core::domain::conflict::{ConflictType, VersionInfo};
    use syncdrive_core::domain::{FileHash, SyncPath};
    use syncdrive_core::ports::FileSystemState;

    struct FakeDownloader {
        data: Vec<u8>,
    }

    #[async_trait::async_trait]
    impl Downloader for FakeDownloader {
        async fn download(&self, _drive_id: &DriveId, _item_id: &ItemId) -> Result<Vec<u8>, ProviderError> {
            Ok(self.data.clone())
        }
    }

    struct FakeUploader;

    #[async_trait::async_trait]
    impl Uploader for FakeUploader {
        async fn upload(
            &self,
            _drive_id: &DriveId,
            _parent_id: &ItemId,
            name: &str,
            data: &[u8],
            _if_match_etag: Option<&syncdrive_core::domain::ETag>,
        ) -> Result<RemoteItem, ProviderError> {
            Ok(RemoteItem {
                item_id: ItemId::new("uploaded".into()).unwrap(),
                parent_id: None,
                name: name.to_string(),
                is_folder: false,
                size: data.len() as u64,
                hash: None,
                modified: None,
                etag: None,
                ctag: None,
                is_deleted: false,
            })
        }
    }

    struct FakeFs {
        files: Mutex<std::collections::HashMap<String, Vec<u8>>>,
    }

    #[async_trait::async_trait]
    impl LocalFileSystem for FakeFs {
        async fn read_file(&self, path: &Path) -> anyhow::Result<Vec<u8>> {
            Ok(self
                .files
                .lock()
                .unwrap()
                .get(path.to_string_lossy().as_ref())
                .cloned()
                .unwrap_or_default())
        }

        async fn write_file_atomic(&self, path: &Path, data: &[u8]) -> anyhow::Result<()> {
            self.files
                .lock()
                .unwrap()
                .insert(path.to_string_lossy().into_owned(), data.to_vec());
            Ok(())
        }

        async fn delete_file(&self, path: &Path) -> anyhow::Result<()> {
            self.files.lock().unwrap().remove(path.to_string_lossy().as_ref());
            Ok(())
        }

        async fn get_state(&self, path: &Path) -> anyhow::Result<FileSystemState> {
            let files = self.files.lock().unwrap();
            match files.get(path.to_string_lossy().as_ref()) {
                Some(data) => Ok(FileSystemState {
                    exists: true,
                    is_file: true,
                    is_dir: false,
                    size: data.len() as u64,
                    modified: None,
                }),
                None => Ok(FileSystemState::not_found()),
            }
        }

        async fn compute_hash(&self, path: &Path) -> anyhow::Result<FileHash> {
            use base64::Engine;
            let data = self.read_file(path).await?;
            Ok(FileHash::new(
                base64::engine::general_purpose::STANDARD.encode([data.len() as u8; 20]),
            )?)
        }

        async fn create_directory(&self, _path: &Path) -> anyhow::Result<()> {
            Ok(())
        }

        async fn rename(&self, from: &Path, to: &Path) -> anyhow::Result<()> {
            let mut files = self.files.lock().unwrap();
            if let Some(data) = files.remove(from.to_string_lossy().as_ref()) {
                files.insert(to.to_string_lossy().into_owned(), data);
            }
            Ok(())
        }

        async fn set_mtime(&self, _path: &Path, _mtime: chrono::DateTime<chrono::Utc>) -> anyhow::Result<()> {
            Ok(())
        }

        async fn available_space(&self, _path: &Path) -> anyhow::Result<u64> {
            Ok(u64::MAX / 2)
        }

        async fn watch(&self, _path: &Path) -> anyhow::Result<syncdrive_core::ports::WatchHandle> {
            Ok(syncdrive_core::ports::WatchHandle::new(|| {}))
        }
    }

    fn drive() -> DriveId {
        DriveId::new("d1".into()).unwrap()
    }

    fn item() -> ItemId {
        ItemId::new("i1".into()).unwrap()
    }

    fn new_conflict() -> ConflictRecord {
        let hash = FileHash::new(base64_of(&[0u8; 20])).unwrap();
        let local = VersionInfo::new(Some(hash.clone()), 4, chrono::Utc::now());
        let remote = VersionInfo::new(Some(hash), 5, chrono::Utc::now());
        ConflictRecord::detect(
            drive(),
            Some(item()),
            SyncPath::new("report.docx").unwrap(),
            ConflictType::EditEdit,
            local,
            remote,
        )
    }

    fn base64_of(bytes: &[u8]) -> String {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD.encode(bytes)
    }

    #[tokio::test]
    async fn keep_local_uploads_and_resolves() {
        let fs = Arc::new(FakeFs { files: Mutex::new(Default::default()) });
        fs.write_file_atomic(Path::new("report.docx"), b"local").await.unwrap();
        let resolver = ConflictResolver::new(
            Arc::new(FakeDownloader { data: b"remote".to_vec() }),
            Arc::new(FakeUploader),
            fs,
        );
        let mut conflict = new_conflict();

        let outcome = resolver
            .apply(
                &mut conflict,
                Resolution::KeepLocal,
                ResolvedBy::User,
                &drive(),
                &item(),
                &item(),
                "report.docx",
                Path::new("report.docx"),
            )
            .await
            .unwrap();

        assert!(matches!(outcome, ResolutionOutcome::Overwritten { .. }));
        assert!(conflict.is_resolved());
    }

    #[tokio::test]
    async fn keep_both_renames_local_then_downloads_remote() {
        let fs = Arc::new(FakeFs { files: Mutex::new(Default::default()) });
        fs.write_file_atomic(Path::new("report.docx"), b"local").await.unwrap();
        let resolver = ConflictResolver::new(
            Arc::new(FakeDownloader { data: b"remote".to_vec() }),
            Arc::new(FakeUploader),
            fs.clone(),
        );
        let mut conflict = new_conflict();

        let outcome = resolver
            .apply(
                &mut conflict,
                Resolution::KeepBoth,
                ResolvedBy::User,
                &drive(),
                &item(),
                &item(),
                "report.docx",
                Path::new("report.docx"),
            )
            .await
            .unwrap();

        match outcome {
            ResolutionOutcome::KeptBoth { renamed_to, .. } => {
                let files = fs.files.lock().unwrap();
                assert!(files.contains_key(renamed_to.as_str()));
                assert_eq!(files.get("report.docx").unwrap(), b"remote");
            }
            _ => panic!("expected KeptBoth"),
        }
        assert!(conflict.is_resolved());
    }

    #[tokio::test]
    async fn unresolved_leaves_files_untouched() {
        let fs = Arc::new(FakeFs { files: Mutex::new(Default::default()) });
        let resolver = ConflictResolver::new(
            Arc::new(FakeDownloader { data: vec![] }),
            Arc::new(FakeUploader),
            fs,
        );
        let mut conflict = new_conflict();

        let outcome = resolver
            .apply(
                &mut conflict,
                Resolution::Unresolved,
                ResolvedBy::User,
                &drive(),
                &item(),
                &item(),
                "report.docx",
                Path::new("report.docx"),
            )
            .await
            .unwrap();

        assert!(matches!(outcome, ResolutionOutcome::Deferred));
        assert!(!conflict.is_resolved());
    }
}
