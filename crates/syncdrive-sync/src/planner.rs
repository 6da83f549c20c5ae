//! The planner: pure translation from buffered change events and the
//! current baseline into an ordered [`ActionPlan`].
//!
//! Nothing here touches the filesystem, the network, or the baseline store —
//! `plan()` is a function of its three inputs and is exercised directly in
//! tests without any adapter. Move detection runs first so a renamed file
//! or folder produces one `Move` action instead of a spurious delete+create
//! pair; everything left over is classified path-by-path against the
//! baseline, with folders and files using separate tables since folders
//! carry no content hash.

use std::collections::{BTreeMap, HashMap};

use syncdrive_core::config::SafetyConfig;
use syncdrive_core::domain::{
    Action, ActionPlan, ActionType, BaselineEntry, ChangeEvent, ChangeSource, ChangeType,
    ConflictType, CreateSide, DriveId, ItemType, PlannerError, SyncMode, SyncPath,
};

/// Builds the per-path views the decision matrices consume, runs move
/// detection, classifies everything left over, attaches dependency edges,
/// and finally checks the big-delete gate.
///
/// `force` widens the big-delete thresholds to their integer maxima,
/// mirroring the CLI's `--force` flag.
pub fn plan(
    changes: &[ChangeEvent],
    baseline: &[BaselineEntry],
    mode: SyncMode,
    safety: &SafetyConfig,
    force: bool,
) -> Result<ActionPlan, PlannerError> {
    let baseline_by_path: HashMap<String, &BaselineEntry> =
        baseline.iter().map(|e| (e.path.as_str().to_string(), e)).collect();

    let mut views = build_path_views(changes, &baseline_by_path);

    let mut actions = Vec::new();
    let mut folder_paths: std::collections::HashSet<String> = std::collections::HashSet::new();
    let mut seq = 0usize;
    let mut next_seq = || {
        let s = seq;
        seq += 1;
        s
    };

    detect_remote_moves(changes, &mut views, &mut actions, &mut next_seq);
    detect_local_moves(&mut views, &mut actions, &mut next_seq);

    // Remaining views, in deterministic (lexicographic) path order.
    let mut remaining: Vec<(String, PathView)> = views.into_iter().collect();
    remaining.sort_by(|a, b| a.0.cmp(&b.0));

    for (key, view) in remaining {
        if view.handled {
            continue;
        }
        if view.is_folder() {
            folder_paths.insert(key);
        }
        if let Some(action_type) = classify(&view, mode) {
            let drive_id = resolve_drive_id(&view);
            let mut action = Action::new(next_seq(), action_type, drive_id, view.path.clone());
            action.item_id = view
                .baseline
                .as_ref()
                .map(|b| b.item_id.clone())
                .or_else(|| view.remote.as_ref().and_then(|e| e.item_id.clone()));
            actions.push(action);
        }
    }

    attach_dependencies(&mut actions, &folder_paths);
    order_actions(&mut actions);

    check_big_delete(&actions, baseline.len(), safety, force)?;

    Ok(ActionPlan { actions })
}

fn resolve_drive_id(view: &PathView) -> DriveId {
    if let Some(b) = &view.baseline {
        return b.drive_id.clone();
    }
    if let Some(e) = view.remote.as_ref().and_then(|e| e.drive_id.clone()) {
        return e;
    }
    if let Some(e) = view.local.as_ref().and_then(|e| e.drive_id.clone()) {
        return e;
    }
    // No drive context at all (a local-only create with no prior baseline
    // and no remote event): the executor fills in the configured drive id
    // before this action reaches the transfer layer.
    DriveId::new("unknown".into()).expect("\"unknown\" is a valid non-empty drive id")
}

// ============================================================================
// PathView construction
// ============================================================================

/// Planner-internal path view. Mirrors [`syncdrive_core::domain::PathView`]
/// but adds a `handled` flag so move detection can remove a path from
/// classification without a second pass over the map.
#[derive(Debug, Clone)]
struct PathView {
    path: SyncPath,
    local: Option<ChangeEvent>,
    remote: Option<ChangeEvent>,
    baseline: Option<BaselineEntry>,
    handled: bool,
}

impl PathView {
    fn new(path: SyncPath) -> Self {
        Self {
            path,
            local: None,
            remote: None,
            baseline: None,
            handled: false,
        }
    }

    fn is_folder(&self) -> bool {
        if let Some(b) = &self.baseline {
            return b.is_folder();
        }
        if let Some(e) = &self.remote {
            return e.is_folder();
        }
        if let Some(e) = &self.local {
            return e.is_folder();
        }
        false
    }
}

fn build_path_views(
    changes: &[ChangeEvent],
    baseline_by_path: &HashMap<String, &BaselineEntry>,
) -> BTreeMap<String, PathView> {
    let mut views: BTreeMap<String, PathView> = BTreeMap::new();

    for (path, entry) in baseline_by_path {
        views
            .entry(path.clone())
            .or_insert_with(|| PathView::new(entry.path.clone()))
            .baseline = Some((*entry).clone());
    }

    for event in changes {
        let key = event.path.as_str().to_string();
        let view = views
            .entry(key.clone())
            .or_insert_with(|| PathView::new(event.path.clone()));
        if let Some(b) = baseline_by_path.get(&key) {
            if view.baseline.is_none() {
                view.baseline = Some((*b).clone());
            }
        }
        match event.source {
            ChangeSource::Local => {
                view.local = Some(latest(view.local.take(), event.clone()));
            }
            ChangeSource::Remote => {
                view.remote = Some(latest(view.remote.take(), event.clone()));
            }
        }
    }

    // A path with a baseline entry and no local event this cycle is
    // unchanged on disk, for files and folders alike; there is nothing to
    // derive since "unchanged" is already the default classification when
    // `view.local` is `None` (see `classify_file`/`classify_folder`).
    views
}

fn latest(current: Option<ChangeEvent>, incoming: ChangeEvent) -> ChangeEvent {
    match current {
        Some(c) if c.observed_at > incoming.observed_at => c,
        _ => incoming,
    }
}

// ============================================================================
// Move detection - runs before per-path classification
// ============================================================================

fn detect_remote_moves(
    changes: &[ChangeEvent],
    views: &mut BTreeMap<String, PathView>,
    actions: &mut Vec<Action>,
    next_seq: &mut impl FnMut() -> usize,
) {
    for event in changes {
        if event.source != ChangeSource::Remote || event.change_type != ChangeType::Move {
            continue;
        }
        let Some(old_path) = event.old_path.clone() else {
            continue;
        };
        let new_key = event.path.as_str().to_string();
        let old_key = old_path.as_str().to_string();

        let drive_id = event
            .drive_id
            .clone()
            .unwrap_or_else(|| DriveId::new("unknown".into()).unwrap());

        let mut action = Action::new(
            next_seq(),
            ActionType::Move(CreateSide::Local),
            drive_id,
            old_path.clone(),
        );
        action.new_path = Some(event.path.clone());
        action.item_id = event.item_id.clone();
        actions.push(action);

        if let Some(view) = views.get_mut(&new_key) {
            view.handled = true;
        }

        if let Some(old_view) = views.get_mut(&old_key) {
            // A different item re-appeared at the vacated path in the same
            // batch (create-over-rename): let it classify fresh rather than
            // being folded into the move.
            let superseded = old_view
                .remote
                .as_ref()
                .map(|e| e.item_id != event.item_id && e.change_type != ChangeType::Delete)
                .unwrap_or(false);
            if superseded {
                old_view.baseline = None;
                old_view.local = None;
            } else {
                old_view.handled = true;
            }
        }
    }
}

fn detect_local_moves(
    views: &mut BTreeMap<String, PathView>,
    actions: &mut Vec<Action>,
    next_seq: &mut impl FnMut() -> usize,
) {
    // Deletions: baseline present, local absent (delete event or baseline
    // entry with a local delete this cycle), keyed by the baseline's synced
    // local hash.
    let mut deletions: HashMap<String, Vec<String>> = HashMap::new();
    // Creations: no baseline, local present with a hash, keyed by hash.
    let mut creations: HashMap<String, Vec<String>> = HashMap::new();

    for (key, view) in views.iter() {
        if view.handled || view.is_folder() {
            continue;
        }
        let local_deleted = view
            .local
            .as_ref()
            .map(|e| e.change_type == ChangeType::Delete)
            .unwrap_or(false);

        if local_deleted {
            if let Some(baseline) = &view.baseline {
                if let Some(hash) = &baseline.local_hash {
                    deletions
                        .entry(hash.as_str().to_string())
                        .or_default()
                        .push(key.clone());
                }
            }
            continue;
        }

        if view.baseline.is_none() {
            if let Some(local) = &view.local {
                if local.change_type == ChangeType::Create {
                    if let Some(hash) = &local.hash {
                        creations
                            .entry(hash.as_str().to_string())
                            .or_default()
                            .push(key.clone());
                    }
                }
            }
        }
    }

    for (hash, mut sources) in deletions {
        let Some(mut targets) = creations.remove(&hash) else {
            continue;
        };
        // Ambiguous (hash collision across multiple sources or targets):
        // fall through to separate delete+create, handled by classify().
        if sources.len() != 1 || targets.len() != 1 {
            continue;
        }
        let old_key = sources.pop().unwrap();
        let new_key = targets.pop().unwrap();

        let (old_path, drive_id) = {
            let view = &views[&old_key];
            (
                view.path.clone(),
                view.baseline
                    .as_ref()
                    .map(|b| b.drive_id.clone())
                    .unwrap_or_else(|| DriveId::new("unknown".into()).unwrap()),
            )
        };
        let new_path = views[&new_key].path.clone();

        let mut action = Action::new(next_seq(), ActionType::Move(CreateSide::Remote), drive_id, old_path);
        action.new_path = Some(new_path);
        action.item_id = views[&old_key].baseline.as_ref().map(|b| b.item_id.clone());
        actions.push(action);

        views.get_mut(&old_key).unwrap().handled = true;
        views.get_mut(&new_key).unwrap().handled = true;
    }
}

// ============================================================================
// Decision matrices
// ============================================================================

fn classify(view: &PathView, mode: SyncMode) -> Option<ActionType> {
    if view.is_folder() {
        classify_folder(view, mode)
    } else {
        classify_file(view, mode)
    }
}

fn enrichment_guard(baseline: &BaselineEntry, local_event: Option<&ChangeEvent>) -> bool {
    let Some(mtime) = local_event.and_then(|e| e.mtime) else {
        return false;
    };
    mtime.timestamp() <= baseline.synced_at.timestamp()
}

fn classify_file(view: &PathView, mode: SyncMode) -> Option<ActionType> {
    let PathView { baseline, local, remote, .. } = view;

    let remote_deleted = remote.as_ref().map(|e| e.is_delete()).unwrap_or(false);
    let local_deleted = local.as_ref().map(|e| e.is_delete()).unwrap_or(false);

    if let Some(baseline) = baseline {
        let mut local_changed = local
            .as_ref()
            .map(|e| !e.is_delete() && e.hash != baseline.local_hash)
            .unwrap_or(false);
        if local_changed && enrichment_guard(baseline, local.as_ref()) {
            local_changed = false;
        }
        let remote_changed = remote
            .as_ref()
            .map(|e| !e.is_delete() && e.hash != baseline.remote_hash)
            .unwrap_or(false);

        if matches!(mode, SyncMode::DownloadOnly) {
            return classify_with_baseline(false, local_deleted, remote_changed, remote_deleted, local, remote);
        }
        if matches!(mode, SyncMode::UploadOnly) {
            return classify_with_baseline(local_changed, local_deleted, false, false, local, remote);
        }
        classify_with_baseline(local_changed, local_deleted, remote_changed, remote_deleted, local, remote)
    } else {
        let has_local = local.as_ref().map(|e| !e.is_delete()).unwrap_or(false);
        let has_remote = remote.as_ref().map(|e| !e.is_delete()).unwrap_or(false);

        match (has_local, has_remote) {
            (true, true) => {
                let local_hash = local.as_ref().and_then(|e| e.hash.clone());
                let remote_hash = remote.as_ref().and_then(|e| e.hash.clone());
                if local_hash == remote_hash {
                    Some(ActionType::UpdateSynced)
                } else {
                    Some(ActionType::Conflict(ConflictType::CreateCreate))
                }
            }
            (true, false) => {
                if matches!(mode, SyncMode::DownloadOnly) {
                    None
                } else {
                    Some(ActionType::Upload)
                }
            }
            (false, true) => {
                if matches!(mode, SyncMode::UploadOnly) {
                    None
                } else {
                    Some(ActionType::Download)
                }
            }
            (false, false) => None,
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn classify_with_baseline(
    local_changed: bool,
    local_deleted: bool,
    remote_changed: bool,
    remote_deleted: bool,
    local: &Option<ChangeEvent>,
    remote: &Option<ChangeEvent>,
) -> Option<ActionType> {
    if remote_deleted && local_deleted {
        return Some(ActionType::Cleanup);
    }
    if remote_deleted {
        return Some(if local_changed {
            ActionType::Conflict(ConflictType::EditDelete)
        } else {
            ActionType::LocalDelete
        });
    }
    if local_deleted {
        return Some(if remote_changed {
            ActionType::Download
        } else {
            ActionType::RemoteDelete
        });
    }
    if remote_changed {
        return Some(if local_changed {
            let hashes_match = local.as_ref().and_then(|e| e.hash.clone())
                == remote.as_ref().and_then(|e| e.hash.clone());
            if hashes_match {
                ActionType::UpdateSynced
            } else {
                ActionType::Conflict(ConflictType::EditEdit)
            }
        } else {
            ActionType::Download
        });
    }
    if local_changed {
        return Some(ActionType::Upload);
    }
    None
}

fn classify_folder(view: &PathView, mode: SyncMode) -> Option<ActionType> {
    let remote_deleted = view.remote.as_ref().map(|e| e.is_delete()).unwrap_or(false);
    let local_deleted = view.local.as_ref().map(|e| e.is_delete()).unwrap_or(false);

    if let Some(_baseline) = &view.baseline {
        if remote_deleted && local_deleted {
            return Some(ActionType::Cleanup);
        }
        if remote_deleted {
            return if matches!(mode, SyncMode::UploadOnly) {
                None
            } else {
                Some(ActionType::LocalDelete)
            };
        }
        if local_deleted {
            return if matches!(mode, SyncMode::DownloadOnly) {
                None
            } else {
                Some(ActionType::RemoteDelete)
            };
        }
        // Folders carry no content hash, so there is no local "changed"
        // signal the way files have one. The scan always emits an explicit
        // `Delete` event for a baseline folder that's actually missing on
        // disk (caught by `local_deleted` above), so reaching here with
        // `view.local` still `None` means the folder is present and
        // untouched — derive `Local` from the baseline rather than
        // re-emitting a create for an already-synced folder.
        None
    } else {
        let has_local = view.local.as_ref().map(|e| !e.is_delete()).unwrap_or(false);
        let has_remote = view.remote.as_ref().map(|e| !e.is_delete()).unwrap_or(false);
        match (has_local, has_remote) {
            (true, true) => Some(ActionType::UpdateSynced),
            (false, true) => {
                if matches!(mode, SyncMode::UploadOnly) {
                    None
                } else {
                    Some(ActionType::FolderCreate(CreateSide::Local))
                }
            }
            (true, false) => {
                if matches!(mode, SyncMode::DownloadOnly) {
                    None
                } else {
                    Some(ActionType::FolderCreate(CreateSide::Remote))
                }
            }
            (false, false) => None,
        }
    }
}

// ============================================================================
// Dependency edges and ordering
// ============================================================================

fn attach_dependencies(actions: &mut [Action], folder_paths: &std::collections::HashSet<String>) {
    let folder_creates_by_path: HashMap<String, usize> = actions
        .iter()
        .enumerate()
        .filter(|(_, a)| matches!(a.action_type, ActionType::FolderCreate(_)))
        .map(|(i, a)| (a.path.as_str().to_string(), i))
        .collect();

    let folder_deletes: Vec<(usize, String)> = actions
        .iter()
        .enumerate()
        .filter(|(_, a)| a.is_delete() && folder_paths.contains(a.path.as_str()))
        .map(|(i, a)| (i, a.path.as_str().to_string()))
        .collect();

    let all_deletes: Vec<(usize, String)> = actions
        .iter()
        .enumerate()
        .filter(|(_, a)| a.is_delete())
        .map(|(i, a)| (i, a.path.as_str().to_string()))
        .collect();

    let mut deps: Vec<Vec<usize>> = vec![Vec::new(); actions.len()];

    for (i, action) in actions.iter().enumerate() {
        // Parent folder rule.
        if let Some(parent) = action.path.parent() {
            if let Some(&j) = folder_creates_by_path.get(parent.as_str()) {
                if j != i {
                    deps[i].push(j);
                }
            }
        }
        // Move-target rule.
        if let Some(new_path) = &action.new_path {
            if let Some(parent) = new_path.parent() {
                if let Some(&j) = folder_creates_by_path.get(parent.as_str()) {
                    if j != i {
                        deps[i].push(j);
                    }
                }
            }
        }
    }

    // Child-delete rule: a folder-delete at P depends on every delete whose
    // path begins with "P/".
    for &(i, ref folder_path) in &folder_deletes {
        let prefix = format!("{folder_path}/");
        for &(j, ref other_path) in &all_deletes {
            if j != i && other_path.starts_with(&prefix) {
                deps[i].push(j);
            }
        }
    }

    for (action, d) in actions.iter_mut().zip(deps.into_iter()) {
        action.depends_on = d;
    }
}

fn order_actions(actions: &mut [Action]) {
    actions.sort_by_key(|a| {
        let depth = a.path.as_str().matches('/').count();
        match &a.action_type {
            ActionType::FolderCreate(_) => (0i32, depth as i32),
            ActionType::LocalDelete | ActionType::RemoteDelete => {
                // Folder deletes sort deepest-first (negative depth), file
                // deletes come before folder deletes among siblings.
                (2, -(depth as i32))
            }
            _ => (1, depth as i32),
        }
    });
}

// ============================================================================
// Big-delete protection
// ============================================================================

fn check_big_delete(
    actions: &[Action],
    baseline_count: usize,
    safety: &SafetyConfig,
    force: bool,
) -> Result<(), PlannerError> {
    let delete_count = actions.iter().filter(|a| a.is_delete()).count();

    if baseline_count < safety.big_delete_min_items {
        return Ok(());
    }

    let (max_count, max_percent) = if force {
        (usize::MAX, 100u32)
    } else {
        (safety.big_delete_max_count, safety.big_delete_max_percent as u32)
    };

    let percent = if baseline_count == 0 {
        0
    } else {
        (delete_count * 100 / baseline_count) as u32
    };

    if delete_count > max_count || percent > max_percent {
        return Err(PlannerError::BigDeleteTriggered {
            delete_count,
            baseline_count,
        });
    }

    Ok(())
}
