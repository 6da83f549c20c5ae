//! Baseline entries and the mutable `Item` view built from them each cycle.
//!
//! `BaselineEntry` is what the baseline store persists between cycles: the
//! last state both sides were known to agree on. `Item` is the planner's
//! working copy for one path during a single cycle — the baseline entry
//! plus whatever local and remote observation layered on top of it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::{CTag, DriveId, ETag, FileHash, ItemId, SyncPath};

/// What kind of filesystem object an entry represents. `Root` is the sync
/// root itself, tracked so the planner can anchor parent-id lookups without
/// a special-cased `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    File,
    Folder,
    Root,
}

/// The last state both local and remote were known to agree on for a given
/// path. Rows are keyed by `(drive_id, item_id)`; `path` tracks the
/// last-known location so a subsequent move can be detected against it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselineEntry {
    pub path: SyncPath,
    pub drive_id: DriveId,
    pub item_id: ItemId,
    pub parent_id: Option<ItemId>,
    pub item_type: ItemType,
    pub local_hash: Option<FileHash>,
    pub remote_hash: Option<FileHash>,
    pub size: u64,
    pub mtime: DateTime<Utc>,
    pub synced_at: DateTime<Utc>,
    pub etag: Option<ETag>,
    pub ctag: Option<CTag>,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl BaselineEntry {
    pub fn new(
        path: SyncPath,
        drive_id: DriveId,
        item_id: ItemId,
        parent_id: Option<ItemId>,
        item_type: ItemType,
    ) -> Self {
        let now = Utc::now();
        Self {
            path,
            drive_id,
            item_id,
            parent_id,
            item_type,
            local_hash: None,
            remote_hash: None,
            size: 0,
            mtime: now,
            synced_at: now,
            etag: None,
            ctag: None,
            is_deleted: false,
            deleted_at: None,
        }
    }

    /// Mark the entry deleted in place, keeping the row (rather than
    /// removing it) so a subsequent create at the same path is recognised
    /// as a fresh item, not a resurrection of stale identity.
    pub fn tombstone(&mut self) {
        self.is_deleted = true;
        self.deleted_at = Some(Utc::now());
    }

    pub fn is_folder(&self) -> bool {
        matches!(self.item_type, ItemType::Folder | ItemType::Root)
    }
}

/// The planner's per-path working copy for one cycle: the baseline entry
/// (if one exists) plus the local and remote state observed this pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub baseline: Option<BaselineEntry>,
    pub local_size: Option<u64>,
    pub local_mtime: Option<DateTime<Utc>>,
    pub remote_mtime: Option<DateTime<Utc>>,
    pub synced_size: Option<u64>,
    pub synced_mtime: Option<DateTime<Utc>>,
    pub synced_hash: Option<FileHash>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Item {
    pub fn from_baseline(baseline: BaselineEntry) -> Self {
        Self {
            is_deleted: baseline.is_deleted,
            deleted_at: baseline.deleted_at,
            synced_mtime: Some(baseline.mtime),
            synced_size: Some(baseline.size),
            synced_hash: baseline.local_hash.clone(),
            last_synced_at: Some(baseline.synced_at),
            baseline: Some(baseline),
            local_size: None,
            local_mtime: None,
            remote_mtime: None,
        }
    }

    pub fn untracked() -> Self {
        Self {
            baseline: None,
            local_size: None,
            local_mtime: None,
            remote_mtime: None,
            synced_size: None,
            synced_mtime: None,
            synced_hash: None,
            last_synced_at: None,
            is_deleted: false,
            deleted_at: None,
        }
    }

    pub fn has_baseline(&self) -> bool {
        self.baseline.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> BaselineEntry {
        BaselineEntry::new(
            SyncPath::new("docs/plan.txt").unwrap(),
            DriveId::new("drive1".to_string()).unwrap(),
            ItemId::new("item1".to_string()).unwrap(),
            None,
            ItemType::File,
        )
    }

    #[test]
    fn tombstone_sets_deleted_flag() {
        let mut e = entry();
        assert!(!e.is_deleted);
        e.tombstone();
        assert!(e.is_deleted);
        assert!(e.deleted_at.is_some());
    }

    #[test]
    fn root_and_folder_are_folders() {
        let mut e = entry();
        assert!(!e.is_folder());
        e.item_type = ItemType::Folder;
        assert!(e.is_folder());
        e.item_type = ItemType::Root;
        assert!(e.is_folder());
    }

    #[test]
    fn untracked_item_has_no_baseline() {
        let item = Item::untracked();
        assert!(!item.has_baseline());
    }

    #[test]
    fn from_baseline_carries_synced_fields() {
        let item = Item::from_baseline(entry());
        assert!(item.has_baseline());
        assert_eq!(item.synced_size, Some(0));
    }
}
