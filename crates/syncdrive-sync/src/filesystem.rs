//! Local filesystem adapter (secondary/driven adapter)
//!
//! Implements [`LocalFileSystem`] using `tokio::fs` for async file operations.
//!
//! ## Design Decisions
//!
//! - **Atomic writes**: writes go to a `.partial` sibling and are renamed
//!   into place, so a crash mid-write never leaves a half-written file at
//!   the real path.
//! - **quickXorHash**: implements the OneDrive-compatible content hash so
//!   local and remote hashes can be compared without downloading content.
//! - **Watching**: delegates to `notify` via `FileWatcher` (see `watcher.rs`);
//!   `watch` here returns a no-op handle since the engine owns the single
//!   long-lived watcher instance.

use base64::Engine;
use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::Path;
use syncdrive_core::domain::FileHash;
use syncdrive_core::ports::{FileSystemState, LocalFileSystem, WatchHandle};
use tracing::{debug, instrument};

/// Adapter that bridges the [`LocalFileSystem`] port to the real filesystem.
///
/// Zero-sized: every operation derives its context from the `Path` argument.
#[derive(Debug, Clone, Default)]
pub struct LocalFileSystemAdapter;

impl LocalFileSystemAdapter {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

// ============================================================================
// QuickXorHash implementation
// ============================================================================

/// OneDrive-compatible quickXorHash algorithm.
///
/// Works on a 160-bit (20-byte) hash state. For each input byte, it is
/// XOR-ed into the state at the current *bit* position and the position
/// advances by 11 bits (mod 160). After processing all input bytes the
/// total file length (as a little-endian `u64`) is XOR-ed into the first 8
/// bytes of the state. The final 20-byte result is base64-encoded.
struct QuickXorHash {
    data: [u8; 20],
    shift: usize,
    length: u64,
}

impl QuickXorHash {
    const WIDTH_BITS: usize = 160;
    const SHIFT_STEP: usize = 11;

    fn new() -> Self {
        Self {
            data: [0u8; 20],
            shift: 0,
            length: 0,
        }
    }

    fn update(&mut self, input: &[u8]) {
        for &byte in input {
            let byte_pos = self.shift / 8;
            let bit_offset = self.shift % 8;

            self.data[byte_pos % 20] ^= byte << bit_offset;
            if bit_offset > 0 {
                self.data[(byte_pos + 1) % 20] ^= byte >> (8 - bit_offset);
            }

            self.shift = (self.shift + Self::SHIFT_STEP) % Self::WIDTH_BITS;
        }
        self.length += input.len() as u64;
    }

    fn finalize(mut self) -> [u8; 20] {
        let length_bytes = self.length.to_le_bytes();
        for (i, &lb) in length_bytes.iter().enumerate() {
            self.data[i] ^= lb;
        }
        self.data
    }
}

#[async_trait::async_trait]
impl LocalFileSystem for LocalFileSystemAdapter {
    #[instrument(skip(self), fields(path = %path.display()))]
    async fn read_file(&self, path: &Path) -> anyhow::Result<Vec<u8>> {
        debug!("reading file");
        let data = tokio::fs::read(path).await?;
        debug!(bytes = data.len(), "file read complete");
        Ok(data)
    }

    #[instrument(skip(self, data), fields(path = %path.display(), bytes = data.len()))]
    async fn write_file_atomic(&self, path: &Path, data: &[u8]) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp_path = {
            let mut p = path.as_os_str().to_owned();
            p.push(".partial");
            std::path::PathBuf::from(p)
        };

        debug!(?tmp_path, "writing to .partial file");
        tokio::fs::write(&tmp_path, data).await?;
        tokio::fs::rename(&tmp_path, path).await?;

        debug!("write complete");
        Ok(())
    }

    #[instrument(skip(self), fields(path = %path.display()))]
    async fn delete_file(&self, path: &Path) -> anyhow::Result<()> {
        let metadata = tokio::fs::metadata(path).await?;

        if metadata.is_dir() {
            debug!("removing directory recursively");
            tokio::fs::remove_dir_all(path).await?;
        } else {
            debug!("removing file");
            tokio::fs::remove_file(path).await?;
        }

        debug!("delete complete");
        Ok(())
    }

    #[instrument(skip(self), fields(path = %path.display()))]
    async fn get_state(&self, path: &Path) -> anyhow::Result<FileSystemState> {
        let metadata = match tokio::fs::metadata(path).await {
            Ok(m) => m,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("path not found");
                return Ok(FileSystemState::not_found());
            }
            Err(e) => return Err(e.into()),
        };

        let is_file = metadata.is_file();
        let is_dir = metadata.is_dir();
        let size = metadata.len();

        let modified: Option<DateTime<Utc>> = metadata.modified().ok().and_then(|st| {
            st.duration_since(std::time::UNIX_EPOCH)
                .ok()
                .and_then(|dur| DateTime::from_timestamp(dur.as_secs() as i64, dur.subsec_nanos()))
        });

        debug!(exists = true, is_file, is_dir, size, "state retrieved");

        Ok(FileSystemState {
            exists: true,
            is_file,
            is_dir,
            size,
            modified,
        })
    }

    #[instrument(skip(self), fields(path = %path.display()))]
    async fn compute_hash(&self, path: &Path) -> anyhow::Result<FileHash> {
        debug!("computing quickXorHash");
        let data = tokio::fs::read(path).await?;

        let mut hasher = QuickXorHash::new();
        hasher.update(&data);
        let hash_bytes = hasher.finalize();

        let encoded = base64::engine::general_purpose::STANDARD.encode(hash_bytes);
        debug!(hash = %encoded, "hash computed");

        Ok(FileHash::new(encoded)?)
    }

    #[instrument(skip(self), fields(path = %path.display()))]
    async fn create_directory(&self, path: &Path) -> anyhow::Result<()> {
        debug!("creating directory");
        tokio::fs::create_dir_all(path).await?;
        debug!("directory created");
        Ok(())
    }

    #[instrument(skip(self), fields(from = %from.display(), to = %to.display()))]
    async fn rename(&self, from: &Path, to: &Path) -> anyhow::Result<()> {
        if let Some(parent) = to.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(from, to).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(path = %path.display()))]
    async fn set_mtime(&self, path: &Path, mtime: DateTime<Utc>) -> anyhow::Result<()> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let ft = filetime::FileTime::from_unix_time(mtime.timestamp(), mtime.timestamp_subsec_nanos());
            filetime::set_file_mtime(&path, ft)
        })
        .await??;
        Ok(())
    }

    #[instrument(skip(self), fields(path = %path.display()))]
    async fn available_space(&self, path: &Path) -> anyhow::Result<u64> {
        let mut probe = path.to_path_buf();
        while !probe.exists() {
            match probe.parent() {
                Some(parent) => probe = parent.to_path_buf(),
                None => break,
            }
        }
        tokio::task::spawn_blocking(move || available_space_sync(&probe)).await?
    }

    #[instrument(skip(self, path), fields(path = %path.display()))]
    async fn watch(&self, path: &Path) -> anyhow::Result<WatchHandle> {
        debug!("watch requested (returning no-op handle; real watching is owned by FileWatcher)");
        let _ = path;
        Ok(WatchHandle::new(|| {}))
    }
}

/// Free space on the filesystem backing `path`, via `statvfs(2)`.
#[cfg(target_os = "linux")]
fn available_space_sync(path: &Path) -> anyhow::Result<u64> {
    use std::ffi::CString;
    use std::mem::MaybeUninit;

    let c_path = CString::new(path.as_os_str().as_encoded_bytes())?;
    let mut stat: MaybeUninit<libc::statvfs> = MaybeUninit::uninit();
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), stat.as_mut_ptr()) };
    if rc != 0 {
        anyhow::bail!("statvfs failed for {}", path.display());
    }
    let stat = unsafe { stat.assume_init() };
    Ok(stat.f_bavail as u64 * stat.f_frsize as u64)
}

#[cfg(not(target_os = "linux"))]
fn available_space_sync(_path: &Path) -> anyhow::Result<u64> {
    Ok(u64::MAX / 2)
}
