//! Change events: the normalized shape the remote delta observer and the
//! local filesystem observer both emit into the change buffer.
//!
//! The planner never looks at a Graph delta page or an inotify record
//! directly — both observers translate into this one shape so the decision
//! matrices only have to reason about one kind of input per side.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::baseline_entry::ItemType;
use super::newtypes::{CTag, DriveId, ETag, FileHash, ItemId, SyncPath};

/// Which side produced the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeSource {
    Local,
    Remote,
}

/// What happened. `Move` is only ever synthesized by the planner's own
/// move-detection pass (matching a delete against a create by identity);
/// neither observer emits it directly; inotify reports rename as a pair of
/// Delete/Create records on the same path-buffer cycle, and delta feeds
/// report a moved item as an update carrying a new parent/name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Create,
    Modify,
    Delete,
    Move,
}

/// One observed change to a path, buffered until the next planning pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub source: ChangeSource,
    pub change_type: ChangeType,
    pub path: SyncPath,
    pub old_path: Option<SyncPath>,
    pub drive_id: Option<DriveId>,
    pub item_id: Option<ItemId>,
    pub parent_id: Option<ItemId>,
    pub item_type: ItemType,
    pub size: u64,
    pub mtime: Option<DateTime<Utc>>,
    pub hash: Option<FileHash>,
    pub etag: Option<ETag>,
    pub ctag: Option<CTag>,
    pub observed_at: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn new(
        source: ChangeSource,
        change_type: ChangeType,
        path: SyncPath,
        item_type: ItemType,
    ) -> Self {
        Self {
            source,
            change_type,
            path,
            old_path: None,
            drive_id: None,
            item_id: None,
            parent_id: None,
            item_type,
            size: 0,
            mtime: None,
            hash: None,
            etag: None,
            ctag: None,
            observed_at: Utc::now(),
        }
    }

    pub fn is_delete(&self) -> bool {
        matches!(self.change_type, ChangeType::Delete)
    }

    pub fn is_folder(&self) -> bool {
        matches!(self.item_type, ItemType::Folder | ItemType::Root)
    }
}
