//! The planner's output: per-path views, the actions derived from them, and
//! the outcomes the executor reports back.

use serde::{Deserialize, Serialize};

use super::baseline_entry::BaselineEntry;
use super::change_event::ChangeEvent;
use super::conflict::ConflictType;
use super::newtypes::{DriveId, ETag, FileHash, ItemId, SyncPath};

/// Everything the planner knows about one path going into a cycle: the most
/// recent local and remote change events (if any were buffered this pass)
/// and the baseline row (if the path was already tracked). Classification
/// is a function of exactly these three optionals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathView {
    pub path: SyncPath,
    pub local: Option<ChangeEvent>,
    pub remote: Option<ChangeEvent>,
    pub baseline: Option<BaselineEntry>,
}

impl PathView {
    pub fn new(path: SyncPath) -> Self {
        Self {
            path,
            local: None,
            remote: None,
            baseline: None,
        }
    }

    pub fn has_local_change(&self) -> bool {
        self.local.is_some()
    }

    pub fn has_remote_change(&self) -> bool {
        self.remote.is_some()
    }

    pub fn is_tracked(&self) -> bool {
        self.baseline.is_some()
    }
}

/// Which side an action originates on, for the handful of action types that
/// are symmetric in shape but differ by direction (folder creation, moves).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreateSide {
    Local,
    Remote,
}

/// One unit of work the executor runs. Every action carries the `DriveId`
/// it targets and the path view it was derived from, so the executor and
/// the audit log can explain *why* an action exists without re-deriving it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    FolderCreate(CreateSide),
    Move(CreateSide),
    Download,
    Upload,
    LocalDelete,
    RemoteDelete,
    Conflict(ConflictType),
    UpdateSynced,
    Cleanup,
}

/// An action queued for the executor, after dependency edges have been
/// attached by the planner's folder-before-children and move-ordering pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub seq: usize,
    pub action_type: ActionType,
    pub drive_id: DriveId,
    pub path: SyncPath,
    pub new_path: Option<SyncPath>,
    pub item_id: Option<ItemId>,
    pub depends_on: Vec<usize>,
}

impl Action {
    pub fn new(seq: usize, action_type: ActionType, drive_id: DriveId, path: SyncPath) -> Self {
        Self {
            seq,
            action_type,
            drive_id,
            path,
            new_path: None,
            item_id: None,
            depends_on: Vec::new(),
        }
    }

    pub fn is_delete(&self) -> bool {
        matches!(self.action_type, ActionType::LocalDelete | ActionType::RemoteDelete)
    }

    pub fn targets_folder_tree(&self) -> bool {
        matches!(
            self.action_type,
            ActionType::FolderCreate(_) | ActionType::Move(_)
        )
    }
}

/// A fully ordered set of actions for one cycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionPlan {
    pub actions: Vec<Action>,
}

impl ActionPlan {
    pub fn delete_count(&self) -> usize {
        self.actions.iter().filter(|a| a.is_delete()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// What the executor reports back for one completed action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    pub seq: usize,
    pub success: bool,
    pub error: Option<String>,
    pub item_id: Option<ItemId>,
    pub etag: Option<ETag>,
    pub hash: Option<FileHash>,
    pub size: Option<u64>,
}

impl Outcome {
    pub fn ok(seq: usize) -> Self {
        Self {
            seq,
            success: true,
            error: None,
            item_id: None,
            etag: None,
            hash: None,
            size: None,
        }
    }

    pub fn failed(seq: usize, error: impl Into<String>) -> Self {
        Self {
            seq,
            success: false,
            error: Some(error.into()),
            item_id: None,
            etag: None,
            hash: None,
            size: None,
        }
    }
}
