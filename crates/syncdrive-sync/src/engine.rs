//! The sync engine: wires the local and remote observers, the planner, the
//! safety checker, the dependency tracker/worker pool and the transfer
//! manager into one-shot and watch-mode sync cycles.
//!
//! A cycle always runs the same pipeline regardless of mode: observe (local
//! and/or remote, per [`SyncMode`]) -> `planner::plan` -> `safety::check` ->
//! execute via the dependency tracker -> batched baseline commit. Watch mode
//! just runs this pipeline repeatedly, fed by a debounced filesystem watcher
//! instead of a single up-front scan.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use syncdrive_audit::AuditLogger;
use syncdrive_conflict::resolver::ResolutionOutcome;
use syncdrive_conflict::{ConflictNamer, ConflictResolver};
use syncdrive_core::config::Config;
use syncdrive_core::domain::conflict::{ConflictRecord, ConflictType, VersionInfo};
use syncdrive_core::domain::{
    Action, ActionType, BaselineEntry, ChangeEvent, ChangeSource, ChangeType, CreateSide,
    CycleId, DriveId, FileHash, ItemId, ItemType, Outcome, SyncCycleReport, SyncMode, SyncPath,
    SyncSession, UniqueId,
};
use syncdrive_core::ports::{
    BaselineStore, DeltaFetcher, ItemClient, LocalFileSystem, ProviderError, RemoteItem,
};

use crate::planner;
use crate::safety;
use crate::safety::EXCLUDED_SUFFIXES;
use crate::tracker::{ActionRunner, DependencyTracker};
use crate::transfer::TransferManager;
use crate::watcher::{ChangeEvent as WatchEvent, DebouncedChangeQueue, FileWatcher};

const MAX_RETRY_ATTEMPTS: u32 = 3;
const MAX_DELTA_PAGES: usize = 10_000;
const MAX_ANCESTOR_LOOKUPS: usize = 1_000;
const NOSYNC_GUARD_NAME: &str = ".nosync";

fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
        .min(16)
}

fn is_excluded_basename(name: &str) -> bool {
    if name.starts_with('~') {
        return true;
    }
    let lower = name.to_lowercase();
    EXCLUDED_SUFFIXES.iter().any(|suffix| lower.ends_with(suffix))
}

/// Hand-rolled exponential backoff with +/-25% jitter, since no `rand`
/// dependency is available. Jitter is derived from the low bits of the
/// current instant rather than a seeded PRNG.
fn jittered_backoff(attempt: u32) -> Duration {
    let base_ms = 1000u64.saturating_mul(1u64 << attempt.min(10));
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    let sample = (nanos % 1000) as i64 - 500; // -500..=499
    let jitter = sample * (base_ms as i64 / 2) / 500; // +/-25% of base_ms
    let ms = (base_ms as i64 + jitter).max(100) as u64;
    Duration::from_millis(ms)
}

/// How a `ProviderError` should be handled by the per-action retry loop.
enum ErrorTier {
    /// Aborts the whole cycle; no point retrying other actions either.
    Fatal,
    /// Worth a bounded number of backed-off retries.
    Retryable,
    /// Logged and the action fails, but the cycle continues.
    Skip,
}

fn classify_provider_error(e: &ProviderError) -> ErrorTier {
    match e {
        ProviderError::Unauthorized | ProviderError::NotLoggedIn | ProviderError::InsufficientStorage => {
            ErrorTier::Fatal
        }
        ProviderError::Throttled(_) | ProviderError::ServerError(_) | ProviderError::Transport(_) => {
            ErrorTier::Retryable
        }
        _ => ErrorTier::Skip,
    }
}

/// Runs `op` with up to `MAX_RETRY_ATTEMPTS` retries for `Retryable` errors,
/// honoring a server-provided retry-after hint on `Throttled` when present.
async fn with_retry<F, Fut, T>(mut op: F) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, ProviderError>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                let tier = classify_provider_error(&e);
                if matches!(tier, ErrorTier::Retryable) && attempt < MAX_RETRY_ATTEMPTS {
                    let wait = match &e {
                        ProviderError::Throttled(Some(d)) => *d,
                        _ => jittered_backoff(attempt),
                    };
                    warn!(attempt, ?wait, error = %e, "retrying after provider error");
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                    continue;
                }
                return Err(e);
            }
        }
    }
}

// ============================================================================
// Local observer: full recursive scan against the baseline
// ============================================================================

/// Walks `sync_root` with `tokio::fs::read_dir` (no external directory-walk
/// dependency is available), comparing every entry against the baseline to
/// produce the set of local changes since the last cycle. A `.nosync` file
/// anywhere under the root aborts the scan outright.
pub async fn scan_local(
    sync_root: &Path,
    baseline_by_path: &HashMap<String, &BaselineEntry>,
    filesystem: &dyn LocalFileSystem,
) -> Result<Vec<ChangeEvent>, syncdrive_core::domain::SyncError> {
    use syncdrive_core::domain::SyncError;

    let mut changes = Vec::new();
    let mut seen = HashSet::new();
    let mut dirs: VecDeque<(PathBuf, SyncPath)> = VecDeque::new();
    dirs.push_back((sync_root.to_path_buf(), SyncPath::root()));

    while let Some((abs_dir, rel_dir)) = dirs.pop_front() {
        let mut entries = match tokio::fs::read_dir(&abs_dir).await {
            Ok(e) => e,
            Err(err) => {
                warn!(dir = %abs_dir.display(), error = %err, "failed to read directory, skipping");
                continue;
            }
        };

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(e)) => e,
                Ok(None) => break,
                Err(err) => {
                    warn!(error = %err, "failed to read directory entry, skipping");
                    continue;
                }
            };
            let name = entry.file_name().to_string_lossy().into_owned();

            if name == NOSYNC_GUARD_NAME {
                return Err(SyncError::NosyncGuard(abs_dir.display().to_string()));
            }
            if is_excluded_basename(&name) {
                continue;
            }

            let rel_path = match rel_dir.join(&name) {
                Ok(p) => p,
                Err(_) => continue,
            };
            let meta = match entry.metadata().await {
                Ok(m) => m,
                Err(err) => {
                    warn!(path = rel_path.as_str(), error = %err, "failed to stat entry, skipping");
                    continue;
                }
            };

            seen.insert(rel_path.as_str().to_string());

            if meta.is_dir() {
                dirs.push_back((entry.path(), rel_path.clone()));
                if !baseline_by_path.contains_key(rel_path.as_str()) {
                    changes.push(ChangeEvent::new(
                        ChangeSource::Local,
                        ChangeType::Create,
                        rel_path,
                        ItemType::Folder,
                    ));
                }
                continue;
            }

            let size = meta.len();
            let mtime: Option<chrono::DateTime<chrono::Utc>> = meta
                .modified()
                .ok()
                .and_then(|st| st.duration_since(std::time::UNIX_EPOCH).ok())
                .and_then(|d| chrono::DateTime::from_timestamp(d.as_secs() as i64, d.subsec_nanos()));

            match baseline_by_path.get(rel_path.as_str()) {
                None => {
                    let hash = filesystem.compute_hash(&entry.path()).await.ok();
                    let mut event =
                        ChangeEvent::new(ChangeSource::Local, ChangeType::Create, rel_path, ItemType::File);
                    event.size = size;
                    event.mtime = mtime;
                    event.hash = hash;
                    changes.push(event);
                }
                Some(baseline) => {
                    let mtime_changed = match mtime {
                        Some(a) => a != baseline.mtime,
                        None => true,
                    };
                    if size != baseline.size || mtime_changed {
                        let hash = filesystem.compute_hash(&entry.path()).await.ok();
                        if hash != baseline.local_hash {
                            let mut event = ChangeEvent::new(
                                ChangeSource::Local,
                                ChangeType::Modify,
                                rel_path,
                                ItemType::File,
                            );
                            event.size = size;
                            event.mtime = mtime;
                            event.hash = hash;
                            changes.push(event);
                        }
                    }
                }
            }
        }
    }

    for (path, baseline) in baseline_by_path {
        if !baseline.is_deleted && !seen.contains(path) {
            changes.push(ChangeEvent::new(
                ChangeSource::Local,
                ChangeType::Delete,
                baseline.path.clone(),
                baseline.item_type,
            ));
        }
    }

    Ok(changes)
}

// ============================================================================
// Remote observer: delta feed to ChangeEvent
// ============================================================================

/// Result of one remote observation pass.
pub struct RemoteObservation {
    pub changes: Vec<ChangeEvent>,
    pub next_token: Option<syncdrive_core::domain::DeltaToken>,
}

/// Drains the delta feed for `drive_id` starting from `token`, mapping every
/// page into `ChangeEvent`s.
///
/// `DeltaFetcher::get_delta` has no explicit "continue from this link"
/// parameter; pagination is expressed by calling it again with the same
/// token while `next_link` is still set, trusting the adapter to carry its
/// own continuation cursor internally. Bounded at `MAX_DELTA_PAGES` so a
/// misbehaving adapter can't spin the cycle forever. A `Gone` response
/// restarts the whole walk once with `token = None` (a full resync); a
/// second `Gone` propagates.
pub async fn observe_remote(
    delta_fetcher: &dyn DeltaFetcher,
    item_client: &dyn ItemClient,
    drive_id: &DriveId,
    baseline_by_item: &HashMap<String, &BaselineEntry>,
    baseline_by_path: &HashMap<String, &BaselineEntry>,
    mut token: Option<syncdrive_core::domain::DeltaToken>,
) -> Result<RemoteObservation, ProviderError> {
    let mut restarted_for_gone = false;
    let mut items: Vec<RemoteItem> = Vec::new();
    let mut final_token = None;

    'outer: loop {
        let mut pages = 0usize;
        let cursor_token = token.clone();
        items.clear();
        loop {
            pages += 1;
            if pages > MAX_DELTA_PAGES {
                return Err(ProviderError::Transport(format!(
                    "delta pagination exceeded {MAX_DELTA_PAGES} pages for drive {}",
                    drive_id.as_str()
                )));
            }

            let page = match with_retry(|| delta_fetcher.get_delta(drive_id, cursor_token.as_ref())).await {
                Ok(p) => p,
                Err(ProviderError::Gone) if !restarted_for_gone => {
                    restarted_for_gone = true;
                    token = None;
                    continue 'outer;
                }
                Err(e) => return Err(e),
            };

            let has_more = page.next_link.is_some();
            items.extend(page.items);
            if page.delta_token.is_some() {
                final_token = page.delta_token;
            }
            if !has_more {
                break;
            }
        }
        break;
    }

    let mut known: HashMap<String, SyncPath> = baseline_by_item
        .iter()
        .map(|(id, e)| (id.clone(), e.path.clone()))
        .collect();
    known.insert(String::new(), SyncPath::root());

    let mut changes = Vec::with_capacity(items.len());
    let mut remaining = items;
    let mut ancestor_lookups = 0usize;

    while !remaining.is_empty() {
        let mut progressed = Vec::new();
        let mut still_pending = Vec::new();

        for item in remaining {
            let parent_key = item.parent_id.as_ref().map(|p| p.as_str().to_string()).unwrap_or_default();
            if let Some(parent_path) = known.get(&parent_key).cloned() {
                let path = match parent_path.join(&item.name) {
                    Ok(p) => p,
                    Err(_) => continue,
                };
                known.insert(item.item_id.as_str().to_string(), path.clone());
                progressed.push((item, path));
            } else {
                still_pending.push(item);
            }
        }

        if progressed.is_empty() {
            // Nothing resolved this round; fetch one unresolved parent's
            // metadata to make progress next round. Bounded so a dangling
            // or cyclic parent chain can't spin forever.
            if still_pending.is_empty() || ancestor_lookups >= MAX_ANCESTOR_LOOKUPS {
                if let Some(item) = still_pending.first() {
                    warn!(
                        item_id = item.item_id.as_str(),
                        "giving up resolving remote item path after too many ancestor lookups"
                    );
                }
                break;
            }

            let probe = &still_pending[0];
            if let Some(parent_id) = probe.parent_id.clone() {
                ancestor_lookups += 1;
                match item_client.get_metadata(drive_id, &parent_id).await {
                    Ok(parent_meta) => {
                        let grandparent_key = parent_meta
                            .parent_id
                            .as_ref()
                            .map(|p| p.as_str().to_string())
                            .unwrap_or_default();
                        if let Some(grandparent_path) = known.get(&grandparent_key).cloned() {
                            if let Ok(parent_path) = grandparent_path.join(&parent_meta.name) {
                                known.insert(parent_id.as_str().to_string(), parent_path);
                            }
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to resolve ancestor metadata");
                    }
                }
            } else {
                // No parent id at all; this item can never resolve, drop it.
                still_pending.remove(0);
            }
        }

        for (item, path) in progressed {
            changes.push(remote_item_to_change_event(item, path, baseline_by_path));
        }
        remaining = still_pending;
    }

    Ok(RemoteObservation {
        changes,
        next_token: final_token,
    })
}

fn remote_item_to_change_event(
    item: RemoteItem,
    path: SyncPath,
    baseline_by_path: &HashMap<String, &BaselineEntry>,
) -> ChangeEvent {
    let item_type = if item.is_folder { ItemType::Folder } else { ItemType::File };
    let change_type = if item.is_deleted {
        ChangeType::Delete
    } else if baseline_by_path.contains_key(path.as_str()) {
        ChangeType::Modify
    } else {
        ChangeType::Create
    };

    let mut event = ChangeEvent::new(ChangeSource::Remote, change_type, path, item_type);
    event.item_id = Some(item.item_id);
    event.parent_id = item.parent_id;
    event.size = item.size;
    event.mtime = item.modified;
    event.hash = item.hash;
    event.etag = item.etag;
    event.ctag = item.ctag;
    event
}

// ============================================================================
// Action execution
// ============================================================================

struct CycleBuffers {
    upserts: Vec<BaselineEntry>,
    tombstones: Vec<ItemId>,
}

/// Executes a planned `Action` against the ports and buffers the resulting
/// baseline change for the engine's later batched commit.
///
/// Keeps a `live_baseline` view that's updated synchronously as each action
/// commits, so a dependent action later in the same cycle (a file uploaded
/// into a folder created earlier in the same cycle) can resolve the new
/// parent's item id without waiting for the durable commit at cycle end.
pub struct SyncActionRunner {
    sync_root: PathBuf,
    item_client: Arc<dyn ItemClient>,
    filesystem: Arc<dyn LocalFileSystem>,
    baseline_store: Arc<dyn BaselineStore>,
    transfer: Arc<TransferManager>,
    conflict_resolver: Arc<ConflictResolver>,
    live_baseline: Mutex<HashMap<String, BaselineEntry>>,
    download_meta: Mutex<HashMap<String, (u64, Option<FileHash>, Option<chrono::DateTime<chrono::Utc>>)>>,
    cycle_buffers: Mutex<HashMap<CycleId, CycleBuffers>>,
    audit: Option<Arc<AuditLogger>>,
}

impl SyncActionRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sync_root: PathBuf,
        item_client: Arc<dyn ItemClient>,
        filesystem: Arc<dyn LocalFileSystem>,
        baseline_store: Arc<dyn BaselineStore>,
        transfer: Arc<TransferManager>,
        conflict_resolver: Arc<ConflictResolver>,
        initial_baseline: Vec<BaselineEntry>,
        audit: Option<Arc<AuditLogger>>,
    ) -> Self {
        let live_baseline = initial_baseline
            .into_iter()
            .map(|e| (e.path.as_str().to_string(), e))
            .collect();
        Self {
            sync_root,
            item_client,
            filesystem,
            baseline_store,
            transfer,
            conflict_resolver,
            live_baseline: Mutex::new(live_baseline),
            download_meta: Mutex::new(HashMap::new()),
            cycle_buffers: Mutex::new(HashMap::new()),
            audit,
        }
    }

    async fn log_download(&self, item_id: &ItemId, path: &str, size: u64, elapsed: Duration) {
        if let Some(audit) = &self.audit {
            audit
                .log_file_download(
                    UniqueId::from_item_id(item_id.as_str()),
                    path,
                    size,
                    elapsed.as_millis() as u64,
                )
                .await;
        }
    }

    async fn log_upload(&self, item_id: &ItemId, path: &str, size: u64, elapsed: Duration) {
        if let Some(audit) = &self.audit {
            audit
                .log_file_upload(
                    UniqueId::from_item_id(item_id.as_str()),
                    path,
                    size,
                    elapsed.as_millis() as u64,
                )
                .await;
        }
    }

    async fn log_delete(&self, item_id: &ItemId, path: &str) {
        if let Some(audit) = &self.audit {
            audit
                .log_file_delete(UniqueId::from_item_id(item_id.as_str()), path)
                .await;
        }
    }

    async fn log_conflict_resolved(&self, item_id: &ItemId, path: &str, resolution: &str) {
        if let Some(audit) = &self.audit {
            audit
                .log_conflict_resolved(UniqueId::from_item_id(item_id.as_str()), path, resolution)
                .await;
        }
    }

    /// Replaces the remote size/hash hints the runner consults when
    /// dispatching `Download` actions. The engine calls this with the set of
    /// remote `ChangeEvent`s it just planned from, once per cycle.
    pub async fn set_download_meta(
        &self,
        meta: HashMap<String, (u64, Option<FileHash>, Option<chrono::DateTime<chrono::Utc>>)>,
    ) {
        *self.download_meta.lock().await = meta;
    }

    pub async fn begin_cycle(&self, cycle_id: CycleId) {
        self.cycle_buffers.lock().await.insert(
            cycle_id,
            CycleBuffers {
                upserts: Vec::new(),
                tombstones: Vec::new(),
            },
        );
    }

    /// Drains the buffered mutations for `cycle_id`, ready for a single
    /// `BaselineStore::commit_cycle` call.
    pub async fn take_cycle(&self, cycle_id: CycleId) -> (Vec<BaselineEntry>, Vec<ItemId>) {
        match self.cycle_buffers.lock().await.remove(&cycle_id) {
            Some(b) => (b.upserts, b.tombstones),
            None => (Vec::new(), Vec::new()),
        }
    }

    async fn resolve_item_id(&self, path: &SyncPath) -> Option<ItemId> {
        self.live_baseline.lock().await.get(path.as_str()).map(|e| e.item_id.clone())
    }

    fn local_path(&self, path: &SyncPath) -> PathBuf {
        self.sync_root.join(path.as_str())
    }

    async fn run_folder_create(&self, action: &Action, side: CreateSide) -> Outcome {
        match side {
            CreateSide::Local => {
                let target = self.local_path(&action.path);
                match self.filesystem.create_directory(&target).await {
                    Ok(()) => Outcome::ok(action.seq),
                    Err(e) => Outcome::failed(action.seq, e.to_string()),
                }
            }
            CreateSide::Remote => {
                let Some(parent_path) = action.path.parent() else {
                    return Outcome::failed(action.seq, "cannot create remote folder at root");
                };
                let Some(parent_id) = self.resolve_item_id(&parent_path).await else {
                    return Outcome::failed(action.seq, "unresolved remote parent for folder create");
                };
                let name = action.path.file_name().unwrap_or_default().to_string();
                match with_retry(|| self.item_client.create_folder(&action.drive_id, &parent_id, &name)).await {
                    Ok(item) => {
                        let mut outcome = Outcome::ok(action.seq);
                        outcome.item_id = Some(item.item_id);
                        outcome.etag = item.etag;
                        outcome
                    }
                    Err(e) => Outcome::failed(action.seq, e.to_string()),
                }
            }
        }
    }

    async fn run_move(&self, action: &Action, side: CreateSide) -> Outcome {
        let Some(new_path) = action.new_path.clone() else {
            return Outcome::failed(action.seq, "move action missing new_path");
        };
        match side {
            CreateSide::Local => {
                let from = self.local_path(&action.path);
                let to = self.local_path(&new_path);
                match self.filesystem.rename(&from, &to).await {
                    Ok(()) => Outcome::ok(action.seq),
                    Err(e) => Outcome::failed(action.seq, e.to_string()),
                }
            }
            CreateSide::Remote => {
                let Some(item_id) = action.item_id.clone().or(self.resolve_item_id(&action.path).await) else {
                    return Outcome::failed(action.seq, "unresolved item id for move");
                };
                let Some(new_parent_path) = new_path.parent() else {
                    return Outcome::failed(action.seq, "move target has no parent");
                };
                let Some(new_parent_id) = self.resolve_item_id(&new_parent_path).await else {
                    return Outcome::failed(action.seq, "unresolved remote parent for move");
                };
                let new_name = new_path.file_name().unwrap_or_default().to_string();
                match with_retry(|| {
                    self.item_client
                        .move_item(&action.drive_id, &item_id, &new_parent_id, &new_name)
                })
                .await
                {
                    Ok(item) => {
                        let mut outcome = Outcome::ok(action.seq);
                        outcome.item_id = Some(item.item_id);
                        outcome.etag = item.etag;
                        outcome
                    }
                    Err(e) => Outcome::failed(action.seq, e.to_string()),
                }
            }
        }
    }

    async fn run_download(&self, action: &Action) -> Outcome {
        let Some(item_id) = action.item_id.clone().or(self.resolve_item_id(&action.path).await) else {
            return Outcome::failed(action.seq, "unresolved remote item id for download");
        };
        let (size, expected_hash, remote_mtime) = self
            .download_meta
            .lock()
            .await
            .get(action.path.as_str())
            .cloned()
            .unwrap_or((0, None, None));
        let target = self.local_path(&action.path);

        let started = std::time::Instant::now();
        match self
            .transfer
            .download(&action.drive_id, &item_id, &target, size, expected_hash.as_ref(), remote_mtime)
            .await
        {
            Ok(result) => {
                self.log_download(&item_id, action.path.as_str(), result.size, started.elapsed())
                    .await;
                let mut outcome = Outcome::ok(action.seq);
                outcome.item_id = Some(item_id);
                outcome.hash = Some(result.effective_hash);
                outcome.size = Some(result.size);
                outcome
            }
            Err(e) => Outcome::failed(action.seq, e.to_string()),
        }
    }

    async fn run_upload(&self, action: &Action) -> Outcome {
        let Some(parent_path) = action.path.parent() else {
            return Outcome::failed(action.seq, "cannot upload to root");
        };
        let Some(parent_id) = self.resolve_item_id(&parent_path).await else {
            return Outcome::failed(action.seq, "unresolved remote parent for upload");
        };
        let name = action.path.file_name().unwrap_or_default().to_string();
        let local_path = self.local_path(&action.path);

        match self
            .transfer
            .upload(&action.drive_id, &parent_id, &name, &local_path, action.path.as_str())
            .await
        {
            Ok(item) => {
                let mut outcome = Outcome::ok(action.seq);
                outcome.item_id = Some(item.item_id);
                outcome.etag = item.etag;
                outcome.hash = item.hash;
                outcome.size = Some(item.size);
                outcome
            }
            Err(e) => Outcome::failed(action.seq, e.to_string()),
        }
    }

    async fn run_delete(&self, action: &Action, local: bool) -> Outcome {
        if local {
            let target = self.local_path(&action.path);
            let state = match self.filesystem.get_state(&target).await {
                Ok(s) => s,
                Err(e) => return Outcome::failed(action.seq, e.to_string()),
            };
            if !state.exists {
                return Outcome::ok(action.seq);
            }
            if state.is_file {
                return self.run_local_file_delete(action, &target).await;
            }
            match self.filesystem.delete_file(&target).await {
                Ok(()) => Outcome::ok(action.seq),
                Err(e) => Outcome::failed(action.seq, e.to_string()),
            }
        } else {
            let Some(item_id) = action.item_id.clone().or(self.resolve_item_id(&action.path).await) else {
                return Outcome::failed(action.seq, "unresolved remote item id for delete");
            };
            match with_retry(|| self.item_client.delete_item(&action.drive_id, &item_id)).await {
                Ok(()) => {
                    let mut outcome = Outcome::ok(action.seq);
                    outcome.item_id = Some(item_id);
                    outcome
                }
                Err(e) => Outcome::failed(action.seq, e.to_string()),
            }
        }
    }

    /// Hashes the on-disk file before removing it; a mismatch against the
    /// baseline's synced hash means the file changed locally after the
    /// delete was planned, so it's renamed to a conflict copy and recorded
    /// as an unresolved conflict instead of being discarded.
    async fn run_local_file_delete(&self, action: &Action, target: &Path) -> Outcome {
        let baseline_hash = self
            .live_baseline
            .lock()
            .await
            .get(action.path.as_str())
            .and_then(|e| e.local_hash.clone());

        let current_hash = match self.filesystem.compute_hash(target).await {
            Ok(h) => h,
            Err(e) => return Outcome::failed(action.seq, e.to_string()),
        };

        if baseline_hash.as_ref().is_some_and(|h| *h != current_hash) {
            let name = action.path.file_name().unwrap_or_default().to_string();
            let renamed_name = ConflictNamer::generate(&name, chrono::Utc::now());
            let renamed_path = target
                .parent()
                .map(|p| p.join(&renamed_name))
                .unwrap_or_else(|| Path::new(&renamed_name).to_path_buf());

            if let Err(e) = self.filesystem.rename(target, &renamed_path).await {
                return Outcome::failed(action.seq, e.to_string());
            }

            let local_version = VersionInfo::new(Some(current_hash), 0, chrono::Utc::now());
            let remote_version = VersionInfo::new(baseline_hash, 0, chrono::Utc::now());
            let conflict = ConflictRecord::detect(
                action.drive_id.clone(),
                action.item_id.clone(),
                action.path.clone(),
                ConflictType::EditDelete,
                local_version,
                remote_version,
            );
            if let Err(e) = self.baseline_store.save_conflict(&conflict).await {
                warn!(error = %e, "failed to persist conflict record");
            }

            return Outcome::ok(action.seq);
        }

        match self.filesystem.delete_file(target).await {
            Ok(()) => Outcome::ok(action.seq),
            Err(e) => Outcome::failed(action.seq, e.to_string()),
        }
    }

    /// Resolves an auto-detected conflict under the engine's fixed policy:
    /// `EditEdit`/`CreateCreate` keep both sides, `EditDelete` keeps
    /// the local side by re-uploading it. This is independent of the
    /// `conflicts.default_strategy` config, which only governs user-
    /// initiated overrides issued through the `conflicts resolve` command.
    async fn run_conflict(&self, action: &Action, conflict_type: ConflictType) -> Outcome {
        let parent_path = action.path.parent().unwrap_or_else(SyncPath::root);
        let Some(parent_id) = self.resolve_item_id(&parent_path).await else {
            return Outcome::failed(action.seq, "unresolved remote parent for conflict resolution");
        };
        let item_id = action.item_id.clone().or(self.resolve_item_id(&action.path).await);
        let name = action.path.file_name().unwrap_or_default().to_string();
        let local_path = self.local_path(&action.path);

        let local_version = match self.filesystem.get_state(&local_path).await {
            Ok(state) => {
                let hash = self.filesystem.compute_hash(&local_path).await.ok();
                VersionInfo::new(hash, state.size, state.modified.unwrap_or_else(chrono::Utc::now))
            }
            Err(_) => VersionInfo::new(None, 0, chrono::Utc::now()),
        };
        let remote_version = match &item_id {
            Some(id) => match self.item_client.get_metadata(&action.drive_id, id).await {
                Ok(meta) => {
                    VersionInfo::new(meta.hash, meta.size, meta.modified.unwrap_or_else(chrono::Utc::now))
                }
                Err(_) => VersionInfo::new(None, 0, chrono::Utc::now()),
            },
            None => VersionInfo::new(None, 0, chrono::Utc::now()),
        };

        let Some(resolve_item_id) = item_id.clone() else {
            warn!(path = action.path.as_str(), "conflict has no resolvable remote item id yet, deferring");
            return Outcome::failed(action.seq, "remote item id not yet known for conflict");
        };

        let mut conflict = ConflictRecord::detect(
            action.drive_id.clone(),
            item_id,
            action.path.clone(),
            conflict_type,
            local_version,
            remote_version,
        );

        let outcome = self
            .conflict_resolver
            .apply_auto(
                &mut conflict,
                conflict_type,
                &action.drive_id,
                &parent_id,
                &resolve_item_id,
                &name,
                &local_path,
            )
            .await;

        if let Err(e) = self.baseline_store.save_conflict(&conflict).await {
            warn!(error = %e, "failed to persist conflict record");
        }

        match outcome {
            Ok(ResolutionOutcome::Overwritten { item }) => {
                let mut result = Outcome::ok(action.seq);
                result.item_id = Some(item.item_id);
                result.etag = item.etag;
                result.hash = item.hash;
                result.size = Some(item.size);
                result
            }
            Ok(ResolutionOutcome::KeptBoth { item, .. }) => {
                let mut result = Outcome::ok(action.seq);
                result.item_id = Some(item.item_id);
                result.etag = item.etag;
                result.hash = item.hash;
                result.size = Some(item.size);
                result
            }
            Ok(ResolutionOutcome::Deferred) => Outcome::failed(action.seq, "conflict left unresolved"),
            Err(e) => Outcome::failed(action.seq, e.to_string()),
        }
    }

    async fn run_update_synced(&self, action: &Action) -> Outcome {
        let target = self.local_path(&action.path);
        match self.filesystem.get_state(&target).await {
            Ok(state) => {
                let mut outcome = Outcome::ok(action.seq);
                outcome.size = Some(state.size);
                outcome
            }
            Err(e) => Outcome::failed(action.seq, e.to_string()),
        }
    }
}

#[async_trait::async_trait]
impl ActionRunner for SyncActionRunner {
    #[instrument(skip(self, cancel), fields(path = action.path.as_str(), action = ?action.action_type))]
    async fn run(&self, action: &Action, cancel: &CancellationToken) -> Outcome {
        if cancel.is_cancelled() {
            return Outcome::failed(action.seq, "cancelled (superseded by a later observation)");
        }

        match action.action_type {
            ActionType::FolderCreate(side) => self.run_folder_create(action, side).await,
            ActionType::Move(side) => self.run_move(action, side).await,
            ActionType::Download => self.run_download(action).await,
            ActionType::Upload => self.run_upload(action).await,
            ActionType::LocalDelete => self.run_delete(action, true).await,
            ActionType::RemoteDelete => self.run_delete(action, false).await,
            ActionType::Conflict(conflict_type) => self.run_conflict(action, conflict_type).await,
            ActionType::UpdateSynced => self.run_update_synced(action).await,
            ActionType::Cleanup => Outcome::ok(action.seq),
        }
    }

    async fn commit(&self, cycle_id: CycleId, action: &Action, outcome: &Outcome) {
        let mut live = self.live_baseline.lock().await;

        match action.action_type {
            ActionType::LocalDelete | ActionType::RemoteDelete | ActionType::Cleanup => {
                if let Some(mut entry) = live.remove(action.path.as_str()) {
                    entry.tombstone();
                    let item_id = entry.item_id.clone();
                    let mut buffers = self.cycle_buffers.lock().await;
                    if let Some(b) = buffers.get_mut(&cycle_id) {
                        b.tombstones.push(item_id);
                    }
                }
                return;
            }
            ActionType::Move(_) => {
                if let Some(new_path) = &action.new_path {
                    if let Some(mut entry) = live.remove(action.path.as_str()) {
                        entry.path = new_path.clone();
                        entry.parent_id = new_path
                            .parent()
                            .and_then(|p| live.get(p.as_str()))
                            .map(|e| Some(e.item_id.clone()))
                            .unwrap_or(None);
                        entry.mtime = chrono::Utc::now();
                        live.insert(new_path.as_str().to_string(), entry.clone());
                        let mut buffers = self.cycle_buffers.lock().await;
                        if let Some(b) = buffers.get_mut(&cycle_id) {
                            b.upserts.push(entry);
                        }
                    }
                }
                return;
            }
            ActionType::UpdateSynced => {
                if let Some(entry) = live.get_mut(action.path.as_str()) {
                    entry.mtime = chrono::Utc::now();
                    entry.synced_at = chrono::Utc::now();
                    let entry = entry.clone();
                    let mut buffers = self.cycle_buffers.lock().await;
                    if let Some(b) = buffers.get_mut(&cycle_id) {
                        b.upserts.push(entry);
                    }
                }
                return;
            }
            _ => {}
        }

        let item_type = if action.targets_folder_tree() { ItemType::Folder } else { ItemType::File };
        let parent_id = action.path.parent().and_then(|p| live.get(p.as_str())).map(|e| e.item_id.clone());
        let existing = live.get(action.path.as_str()).cloned();

        let item_id = match outcome.item_id.clone().or_else(|| existing.as_ref().map(|e| e.item_id.clone())) {
            Some(id) => id,
            None => return,
        };

        let mut entry = existing.unwrap_or_else(|| {
            BaselineEntry::new(
                action.path.clone(),
                action.drive_id.clone(),
                item_id.clone(),
                parent_id.clone(),
                item_type,
            )
        });
        entry.item_id = item_id;
        entry.parent_id = parent_id;
        entry.is_deleted = false;
        entry.deleted_at = None;
        entry.mtime = chrono::Utc::now();
        entry.synced_at = chrono::Utc::now();
        if let Some(etag) = &outcome.etag {
            entry.etag = Some(etag.clone());
        }
        if let Some(size) = outcome.size {
            entry.size = size;
        }
        if !matches!(action.action_type, ActionType::FolderCreate(_)) {
            if let Some(hash) = &outcome.hash {
                entry.local_hash = Some(hash.clone());
                entry.remote_hash = Some(hash.clone());
            }
        }

        live.insert(action.path.as_str().to_string(), entry.clone());
        let mut buffers = self.cycle_buffers.lock().await;
        if let Some(b) = buffers.get_mut(&cycle_id) {
            b.upserts.push(entry);
        }
    }
}

// ============================================================================
// The engine
// ============================================================================

/// Ties the observers, planner, safety checker, tracker and runner together
/// into complete sync cycles.
pub struct SyncEngine {
    drive_id: DriveId,
    sync_root: PathBuf,
    config: Config,
    baseline_store: Arc<dyn BaselineStore>,
    filesystem: Arc<dyn LocalFileSystem>,
    delta_fetcher: Arc<dyn DeltaFetcher>,
    item_client: Arc<dyn ItemClient>,
    runner: Arc<SyncActionRunner>,
    tracker: Arc<DependencyTracker>,
}

impl SyncEngine {
    #[allow(clippy::too_many_arguments)]
    pub async fn new(
        drive_id: DriveId,
        config: Config,
        baseline_store: Arc<dyn BaselineStore>,
        filesystem: Arc<dyn LocalFileSystem>,
        delta_fetcher: Arc<dyn DeltaFetcher>,
        item_client: Arc<dyn ItemClient>,
        transfer: Arc<TransferManager>,
        conflict_resolver: Arc<ConflictResolver>,
        audit: Option<Arc<AuditLogger>>,
    ) -> anyhow::Result<Self> {
        let initial_baseline = baseline_store.list_entries(&drive_id).await?;
        let runner = Arc::new(SyncActionRunner::new(
            config.sync.root.clone(),
            item_client.clone(),
            filesystem.clone(),
            baseline_store.clone(),
            transfer,
            conflict_resolver,
            initial_baseline,
            audit,
        ));
        Ok(Self {
            sync_root: config.sync.root.clone(),
            drive_id,
            config,
            baseline_store,
            filesystem,
            delta_fetcher,
            item_client,
            runner,
            tracker: Arc::new(DependencyTracker::new()),
        })
    }

    /// Runs exactly one observe/plan/execute/commit pass and returns its
    /// report. `force` widens the big-delete safety gate, mirroring the
    /// CLI's `--force` flag.
    #[instrument(skip(self))]
    pub async fn run_once(&self, mode: SyncMode, dry_run: bool, force: bool) -> anyhow::Result<SyncCycleReport> {
        let baseline = self.baseline_store.list_entries(&self.drive_id).await?;
        let baseline_by_path: HashMap<String, &BaselineEntry> =
            baseline.iter().map(|e| (e.path.as_str().to_string(), e)).collect();
        let baseline_by_item: HashMap<String, &BaselineEntry> =
            baseline.iter().map(|e| (e.item_id.as_str().to_string(), e)).collect();

        let stored_token = self.baseline_store.get_delta_token(&self.drive_id).await?;
        let token_start = stored_token.map(|(t, _)| t);
        let mut session = SyncSession::start(mode, dry_run, token_start.clone());

        let mut changes = Vec::new();
        let mut next_token = token_start.clone();
        let mut download_sizes: HashMap<String, u64> = HashMap::new();
        let mut download_meta: HashMap<String, (u64, Option<FileHash>, Option<chrono::DateTime<chrono::Utc>>)> =
            HashMap::new();

        if !matches!(mode, SyncMode::UploadOnly) {
            match observe_remote(
                self.delta_fetcher.as_ref(),
                self.item_client.as_ref(),
                &self.drive_id,
                &baseline_by_item,
                &baseline_by_path,
                token_start.clone(),
            )
            .await
            {
                Ok(observation) => {
                    for change in &observation.changes {
                        if !matches!(change.change_type, ChangeType::Delete) && change.item_type == ItemType::File {
                            download_sizes.insert(change.path.as_str().to_string(), change.size);
                            download_meta.insert(
                                change.path.as_str().to_string(),
                                (change.size, change.hash.clone(), change.mtime),
                            );
                        }
                    }
                    next_token = observation.next_token.or(token_start.clone());
                    changes.extend(observation.changes);
                }
                Err(e) if matches!(classify_provider_error(&e), ErrorTier::Fatal) => {
                    session.record_failure(syncdrive_core::domain::SessionError::new("<drive>", e.to_string()));
                    session.finish(token_start);
                    return Ok(session.into_report());
                }
                Err(e) => {
                    warn!(error = %e, "remote observation failed, proceeding with local changes only");
                }
            }
        }

        if !matches!(mode, SyncMode::DownloadOnly) {
            match scan_local(&self.sync_root, &baseline_by_path, self.filesystem.as_ref()).await {
                Ok(local_changes) => changes.extend(local_changes),
                Err(e) => {
                    error!(error = %e, "local scan aborted");
                    session.record_failure(syncdrive_core::domain::SessionError::new("<root>", e.to_string()));
                    session.finish(token_start);
                    return Ok(session.into_report());
                }
            }
        }

        self.runner.set_download_meta(download_meta).await;

        let plan = planner::plan(&changes, &baseline, mode, &self.config.safety, force)?;
        if plan.is_empty() {
            session.finish(next_token);
            return Ok(session.into_report());
        }

        let baseline_count = self.baseline_store.count_entries(&self.drive_id).await?;
        let safety_outcome = safety::check(
            plan,
            &baseline,
            self.baseline_store.as_ref(),
            self.filesystem.as_ref(),
            &self.sync_root,
            &download_sizes,
            &self.config.safety,
            baseline_count,
            force,
            dry_run,
        )
        .await?;
        for warning in &safety_outcome.warnings {
            warn!(warning, "safety gate warning");
        }

        for action in &safety_outcome.plan.actions {
            bump_count(&mut session.counts, action);
        }

        if dry_run {
            session.finish(token_start);
            return Ok(session.into_report());
        }

        self.execute_plan(safety_outcome.plan, &mut session, next_token.as_ref()).await?;

        if session.failed == 0 {
            session.finish(next_token);
        } else {
            session.finish(token_start);
        }
        Ok(session.into_report())
    }

    async fn execute_plan(
        &self,
        plan: syncdrive_core::domain::ActionPlan,
        session: &mut SyncSession,
        next_token: Option<&syncdrive_core::domain::DeltaToken>,
    ) -> anyhow::Result<()> {
        let cycle_id = session.id;
        self.runner.begin_cycle(cycle_id).await;
        self.tracker.add_plan(plan, cycle_id).await;

        let shutdown = CancellationToken::new();
        let (handles, mut results) = crate::tracker::spawn_workers(
            self.tracker.clone(),
            self.runner.clone() as Arc<dyn ActionRunner>,
            default_worker_count(),
            shutdown.clone(),
        );

        let tracker = self.tracker.clone();
        let wait_handle = tokio::spawn(async move { tracker.wait_cycle_done(cycle_id).await });
        tokio::pin!(wait_handle);

        loop {
            tokio::select! {
                result = results.recv() => {
                    match result {
                        Some(r) if r.success => session.record_success(),
                        Some(r) => session.record_failure(
                            syncdrive_core::domain::SessionError::new(r.path.as_str(), r.err_msg.unwrap_or_default())
                        ),
                        None => break,
                    }
                }
                res = &mut wait_handle => {
                    let _ = res;
                    break;
                }
            }
        }

        shutdown.cancel();
        for handle in handles {
            let _ = handle.await;
        }
        while let Ok(result) = results.try_recv() {
            if result.success {
                session.record_success();
            } else {
                session.record_failure(syncdrive_core::domain::SessionError::new(
                    result.path.as_str(),
                    result.err_msg.unwrap_or_default(),
                ));
            }
        }

        let (upserts, tombstones) = self.runner.take_cycle(cycle_id).await;
        // Only advance the stored delta token when nothing in this cycle
        // failed; a partial cycle must re-observe the same remote window
        // next time so the missed items aren't silently skipped.
        let token_to_store = if session.failed == 0 { next_token } else { None };
        self.baseline_store
            .commit_cycle(&self.drive_id, &upserts, &tombstones, token_to_store)
            .await?;
        self.tracker.cleanup_cycle(cycle_id).await;

        Ok(())
    }

    /// Runs an initial one-shot cycle to establish the baseline, then stays
    /// resident watching the local filesystem and polling the remote delta
    /// feed, running a fresh cycle whenever either side settles on changes.
    /// Each batch waits for the previous one to fully commit before
    /// planning the next, so the runner's per-cycle download metadata and
    /// live baseline view never have to reason about two in-flight cycles.
    #[instrument(skip(self, shutdown))]
    pub async fn run_watch(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        info!("running initial sync before entering watch mode");
        let initial = self.run_once(SyncMode::Both, false, false).await?;
        info!(succeeded = initial.succeeded, failed = initial.failed, "initial sync complete");

        let debounce_ms = self.config.sync.debounce_delay.saturating_mul(1000);
        let (mut watcher, mut event_rx) = FileWatcher::new(debounce_ms)?;
        let _handle = watcher.watch(&self.sync_root)?;

        let mut queue = DebouncedChangeQueue::new(Duration::from_secs(self.config.sync.debounce_delay));
        let mut poll_interval = tokio::time::interval(Duration::from_secs(self.config.sync.poll_interval.max(1)));
        poll_interval.tick().await;

        loop {
            if shutdown.is_cancelled() {
                return Ok(());
            }

            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                maybe_event = event_rx.recv() => {
                    let Some(event) = maybe_event else { return Ok(()) };
                    queue.push(event);
                }
                _ = poll_interval.tick() => {
                    if let Err(e) = self.run_batch_if_settled(&mut queue).await {
                        warn!(error = %e, "watch-mode cycle failed");
                    }
                }
            }
        }
    }

    async fn run_batch_if_settled(&self, queue: &mut DebouncedChangeQueue) -> anyhow::Result<()> {
        let settled = queue.poll();
        let _paths: Vec<&Path> = settled.iter().map(WatchEvent::path).collect();

        let report = self.run_once(SyncMode::Both, false, false).await?;
        if report.counts.total() > 0 {
            info!(
                succeeded = report.succeeded,
                failed = report.failed,
                actions = report.counts.total(),
                "watch-mode cycle completed"
            );
        }
        Ok(())
    }
}

fn bump_count(counts: &mut syncdrive_core::domain::ActionCounts, action: &Action) {
    match action.action_type {
        ActionType::FolderCreate(_) => counts.folder_creates += 1,
        ActionType::Move(_) => counts.moves += 1,
        ActionType::Download => counts.downloads += 1,
        ActionType::Upload => counts.uploads += 1,
        ActionType::LocalDelete => counts.local_deletes += 1,
        ActionType::RemoteDelete => counts.remote_deletes += 1,
        ActionType::Conflict(_) => counts.conflicts += 1,
        ActionType::UpdateSynced => counts.synced_updates += 1,
        ActionType::Cleanup => counts.cleanups += 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jittered_backoff_grows_and_stays_bounded() {
        let first = jittered_backoff(0);
        let third = jittered_backoff(3);
        assert!(first.as_millis() >= 500 && first.as_millis() <= 1500);
        assert!(third.as_millis() >= 4000);
    }

    #[test]
    fn classifies_auth_errors_as_fatal() {
        assert!(matches!(classify_provider_error(&ProviderError::Unauthorized), ErrorTier::Fatal));
        assert!(matches!(classify_provider_error(&ProviderError::NotFound), ErrorTier::Skip));
        assert!(matches!(
            classify_provider_error(&ProviderError::ServerError("boom".into())),
            ErrorTier::Retryable
        ));
    }

    #[test]
    fn excluded_basename_matches_temp_patterns() {
        assert!(is_excluded_basename("draft.tmp"));
        assert!(is_excluded_basename("~lock.docx"));
        assert!(!is_excluded_basename("report.docx"));
    }
}
