//! Conflict domain entities
//!
//! A conflict is recorded when the planner sees the same path changed on
//! both sides since baseline in a way that can't be reconciled by a plain
//! upload/download (the planner's classification routes these cases here
//! instead of emitting a transfer action).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::{ConflictId, DriveId, FileHash, ItemId, SyncPath};

/// How the conflicting path diverged. `EditDelete` covers both orderings
/// (edited on one side, deleted on the other); the baseline alone can't
/// tell which side moved first, only that both sides disagree with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    EditEdit,
    EditDelete,
    CreateCreate,
}

/// The chosen resolution. `Unresolved` is the transient state between
/// detection and resolution; a persisted `ConflictRecord` with this
/// resolution means resolution failed or was deferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    KeepBoth,
    KeepLocal,
    KeepRemote,
    Unresolved,
}

/// Who picked the resolution. Every conflict this engine resolves does so
/// automatically under a fixed policy; `User` is reserved for a future
/// interactive resolution path and is not produced by the conflict handler
/// today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolvedBy {
    Auto,
    User,
}

/// One side's state at the moment the conflict was detected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub hash: Option<FileHash>,
    pub size_bytes: u64,
    pub modified_at: DateTime<Utc>,
}

impl VersionInfo {
    pub fn new(hash: Option<FileHash>, size_bytes: u64, modified_at: DateTime<Utc>) -> Self {
        Self {
            hash,
            size_bytes,
            modified_at,
        }
    }
}

/// A persisted record of a detected conflict and, once resolved, how it was
/// resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub id: ConflictId,
    pub drive_id: DriveId,
    pub item_id: Option<ItemId>,
    pub path: SyncPath,
    pub conflict_type: ConflictType,
    pub detected_at: DateTime<Utc>,
    pub local: VersionInfo,
    pub remote: VersionInfo,
    pub resolution: Resolution,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<ResolvedBy>,
}

impl ConflictRecord {
    pub fn detect(
        drive_id: DriveId,
        item_id: Option<ItemId>,
        path: SyncPath,
        conflict_type: ConflictType,
        local: VersionInfo,
        remote: VersionInfo,
    ) -> Self {
        Self {
            id: ConflictId::new(),
            drive_id,
            item_id,
            path,
            conflict_type,
            detected_at: Utc::now(),
            local,
            remote,
            resolution: Resolution::Unresolved,
            resolved_at: None,
            resolved_by: None,
        }
    }

    pub fn resolve(&mut self, resolution: Resolution, resolved_by: ResolvedBy) {
        self.resolution = resolution;
        self.resolved_by = Some(resolved_by);
        self.resolved_at = Some(Utc::now());
    }

    pub fn is_resolved(&self) -> bool {
        !matches!(self.resolution, Resolution::Unresolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn version(hash: &str) -> VersionInfo {
        VersionInfo::new(
            Some(FileHash::new(format!("{:0<28}", hash)).unwrap_or_else(|_| {
                FileHash::new("AAAAAAAAAAAAAAAAAAAAAAAAAAAA".to_string()).unwrap()
            })),
            100,
            Utc::now(),
        )
    }

    #[test]
    fn detect_starts_unresolved() {
        let record = ConflictRecord::detect(
            DriveId::new("drive1".to_string()).unwrap(),
            Some(ItemId::new("item1".to_string()).unwrap()),
            SyncPath::new("docs/plan.txt").unwrap(),
            ConflictType::EditEdit,
            version("a"),
            version("b"),
        );
        assert_eq!(record.resolution, Resolution::Unresolved);
        assert!(!record.is_resolved());
    }

    #[test]
    fn resolve_sets_resolved_fields() {
        let mut record = ConflictRecord::detect(
            DriveId::new("drive1".to_string()).unwrap(),
            None,
            SyncPath::new("docs/plan.txt").unwrap(),
            ConflictType::CreateCreate,
            version("a"),
            version("b"),
        );
        record.resolve(Resolution::KeepBoth, ResolvedBy::Auto);
        assert!(record.is_resolved());
        assert_eq!(record.resolved_by, Some(ResolvedBy::Auto));
        assert!(record.resolved_at.is_some());
    }
}
