//! Runtime safety gates applied to a plan just before execution.
//!
//! The planner already refuses to build a plan that blows the big-delete
//! budget; everything here is a second, independent check run
//! against live state (disk space, delta completeness) or a defense-in-depth
//! re-check of conditions the planner can't fully see (a baseline entry
//! missing its synced hash). Gates either strip offending actions from the
//! plan or fail the cycle outright; in dry-run mode a would-be strip is
//! logged as a warning instead.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use syncdrive_core::config::SafetyConfig;
use syncdrive_core::domain::{Action, ActionPlan, ActionType, BaselineEntry, DriveId, SafetyError};
use syncdrive_core::ports::{BaselineStore, LocalFileSystem};

/// Suffixes (matched case-insensitively against the basename only) that mark
/// a file as transient and never worth uploading. Mirrors the local
/// observer's own exclusion rule so a file the scanner ignores on create
/// can't re-enter the plan via some other path (a conflict copy, a restored
/// session) and get uploaded anyway.
pub const EXCLUDED_SUFFIXES: &[&str] = &[
    ".partial", ".tmp", ".swp", ".crdownload", ".db", ".db-wal", ".db-shm",
];

fn is_temp_file(basename: &str) -> bool {
    if basename.starts_with('~') {
        return true;
    }
    let lower = basename.to_lowercase();
    EXCLUDED_SUFFIXES.iter().any(|suffix| lower.ends_with(suffix))
}

/// Outcome of running the safety checker: the plan with offending actions
/// stripped, and human-readable warnings (populated always in dry-run mode,
/// and for advisory-only gates like S3 in normal mode too).
pub struct SafetyOutcome {
    pub plan: ActionPlan,
    pub warnings: Vec<String>,
}

/// Applies the runtime safety gates to `plan`.
///
/// `download_sizes` maps a Download action's path to its expected transfer
/// size (the planner doesn't carry sizes on `Action` itself, so the caller -
/// the engine, which already built the path views - supplies them for the
/// disk-space sum).
pub async fn check(
    mut plan: ActionPlan,
    baseline: &[BaselineEntry],
    baseline_store: &dyn BaselineStore,
    filesystem: &dyn LocalFileSystem,
    sync_root: &Path,
    download_sizes: &HashMap<String, u64>,
    safety: &SafetyConfig,
    baseline_count: usize,
    force: bool,
    dry_run: bool,
) -> Result<SafetyOutcome, SafetyError> {
    let baseline_by_path: HashMap<String, &BaselineEntry> =
        baseline.iter().map(|e| (e.path.as_str().to_string(), e)).collect();

    let mut warnings = Vec::new();

    strip_or_warn(
        &mut plan,
        &mut warnings,
        dry_run,
        |a| matches!(a.action_type, ActionType::RemoteDelete) && !has_synced_hash(a, &baseline_by_path, Side::Remote),
        "remote-delete without a synced remote hash",
    );

    strip_or_warn(
        &mut plan,
        &mut warnings,
        dry_run,
        |a| matches!(a.action_type, ActionType::LocalDelete) && !has_synced_hash(a, &baseline_by_path, Side::Local),
        "local-delete without a synced local hash",
    );

    check_delta_completeness(&mut plan, &mut warnings, baseline_store, dry_run).await?;

    warn_partial_download_targets(&plan, &mut warnings);

    strip_or_warn(
        &mut plan,
        &mut warnings,
        dry_run,
        |a| matches!(a.action_type, ActionType::Upload) && a.path.file_name().map(is_temp_file).unwrap_or(false),
        "upload of a temp-file-pattern basename",
    );

    check_big_delete_gate(&plan, baseline_count, safety, force)?;

    check_disk_space(&plan, filesystem, sync_root, download_sizes, safety).await?;

    Ok(SafetyOutcome { plan, warnings })
}

enum Side {
    Local,
    Remote,
}

fn has_synced_hash(action: &Action, baseline_by_path: &HashMap<String, &BaselineEntry>, side: Side) -> bool {
    let Some(entry) = baseline_by_path.get(action.path.as_str()) else {
        return false;
    };
    match side {
        Side::Local => entry.local_hash.is_some(),
        Side::Remote => entry.remote_hash.is_some(),
    }
}

fn strip_or_warn(
    plan: &mut ActionPlan,
    warnings: &mut Vec<String>,
    dry_run: bool,
    matches_violation: impl Fn(&Action) -> bool,
    reason: &str,
) {
    let violating: Vec<usize> = plan
        .actions
        .iter()
        .enumerate()
        .filter(|(_, a)| matches_violation(a))
        .map(|(i, _)| i)
        .collect();

    for &i in &violating {
        warnings.push(format!("{reason}: {}", plan.actions[i].path.as_str()));
    }

    if dry_run || violating.is_empty() {
        return;
    }

    let dropped: HashSet<usize> = violating.into_iter().collect();
    let remaining: Vec<Action> = plan
        .actions
        .drain(..)
        .enumerate()
        .filter(|(i, _)| !dropped.contains(i))
        .map(|(_, a)| a)
        .collect();
    plan.actions = remaining;
    renumber(plan);
}

/// Stripping actions changes indices, which would desync `depends_on`.
/// Re-seq and remap dependency indices against the surviving set, dropping
/// dependency edges that pointed at a stripped action (it's gone, so there
/// is nothing left to wait on).
fn renumber(plan: &mut ActionPlan) {
    let old_to_new: HashMap<usize, usize> = plan
        .actions
        .iter()
        .enumerate()
        .map(|(new_idx, a)| (a.seq, new_idx))
        .collect();

    for (new_idx, action) in plan.actions.iter_mut().enumerate() {
        action.seq = new_idx;
        action.depends_on = action
            .depends_on
            .iter()
            .filter_map(|old| old_to_new.get(old).copied())
            .collect();
    }
}

async fn check_delta_completeness(
    plan: &mut ActionPlan,
    warnings: &mut Vec<String>,
    baseline_store: &dyn BaselineStore,
    dry_run: bool,
) -> Result<(), SafetyError> {
    let drives: HashSet<DriveId> = plan
        .actions
        .iter()
        .filter(|a| matches!(a.action_type, ActionType::LocalDelete))
        .map(|a| a.drive_id.clone())
        .collect();

    let mut incomplete_drives = HashSet::new();
    for drive in &drives {
        let complete = baseline_store
            .get_delta_token(drive)
            .await
            .ok()
            .flatten()
            .map(|(_, complete)| complete)
            .unwrap_or(false);
        if !complete {
            incomplete_drives.insert(drive.clone());
        }
    }

    if incomplete_drives.is_empty() {
        return Ok(());
    }

    strip_or_warn(
        plan,
        warnings,
        dry_run,
        |a| matches!(a.action_type, ActionType::LocalDelete) && incomplete_drives.contains(&a.drive_id),
        "local-delete against a drive with an incomplete delta feed",
    );

    Ok(())
}

fn warn_partial_download_targets(plan: &ActionPlan, warnings: &mut Vec<String>) {
    for action in &plan.actions {
        if matches!(action.action_type, ActionType::Download)
            && action.path.file_name().map(|n| n.ends_with(".partial")).unwrap_or(false)
        {
            warnings.push(format!(
                "download target already ends in .partial: {}",
                action.path.as_str()
            ));
        }
    }
}

fn check_big_delete_gate(
    plan: &ActionPlan,
    baseline_count: usize,
    safety: &SafetyConfig,
    force: bool,
) -> Result<(), SafetyError> {
    let delete_count = plan.delete_count();
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
        return Err(SafetyError::BigDeleteTriggered {
            delete_count,
            baseline_count,
        });
    }
    Ok(())
}

async fn check_disk_space(
    plan: &ActionPlan,
    filesystem: &dyn LocalFileSystem,
    sync_root: &Path,
    download_sizes: &HashMap<String, u64>,
    safety: &SafetyConfig,
) -> Result<(), SafetyError> {
    let needed: u64 = plan
        .actions
        .iter()
        .filter(|a| matches!(a.action_type, ActionType::Download))
        .map(|a| download_sizes.get(a.path.as_str()).copied().unwrap_or(0))
        .sum();

    if needed == 0 {
        return Ok(());
    }

    let available = filesystem
        .available_space(sync_root)
        .await
        .unwrap_or(u64::MAX);
    let reserve = safety.min_free_space_mb.saturating_mul(1024 * 1024);
    let usable = available.saturating_sub(reserve);

    if needed > usable {
        return Err(SafetyError::InsufficientDiskSpace {
            needed_bytes: needed,
            available_bytes: usable,
        });
    }
    Ok(())
}
