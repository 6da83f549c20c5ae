//! Baseline store port (driven/secondary port)
//!
//! The baseline store is the only durable state the engine keeps between
//! cycles: one row per `(drive_id, item_id)` recording the last state both
//! sides were known to agree on, plus the delta token and conflict history.
//! Every read the planner does is against a consistent snapshot; every
//! write after a cycle commits atomically so a crash mid-cycle never leaves
//! the baseline half-updated.
//!
//! Uses `anyhow::Result` because storage errors (SQLite, filesystem) are
//! adapter-specific and don't need domain-level classification; the
//! classification seam lives one layer up, in the sync engine.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{BaselineEntry, ConflictRecord, DeltaToken, DriveId, ItemId, SyncPath};

/// A snapshot of the baseline consistent for the duration of one planning
/// pass. Implementations take a read lock (or equivalent) so the planner
/// never observes a partially-committed cycle's writes.
#[async_trait]
pub trait BaselineStore: Send + Sync {
    /// Returns every tracked (non-deleted) entry under `drive_id`, for
    /// building the planner's full path-view map at the start of a cycle.
    async fn list_entries(&self, drive_id: &DriveId) -> anyhow::Result<Vec<BaselineEntry>>;

    async fn get_by_path(
        &self,
        drive_id: &DriveId,
        path: &SyncPath,
    ) -> anyhow::Result<Option<BaselineEntry>>;

    async fn get_by_item_id(
        &self,
        drive_id: &DriveId,
        item_id: &ItemId,
    ) -> anyhow::Result<Option<BaselineEntry>>;

    /// Commits the full set of entry mutations for one cycle atomically:
    /// either every upsert and tombstone lands, or none does. This is the
    /// the no-delete-without-synced-hash and no-delete-from-
    /// incomplete-delta) ultimately depend on — a baseline that reflects a
    /// half-applied cycle would make the next cycle's deletes unsafe.
    async fn commit_cycle(
        &self,
        drive_id: &DriveId,
        upserts: &[BaselineEntry],
        tombstones: &[ItemId],
        delta_token: Option<&DeltaToken>,
    ) -> anyhow::Result<()>;

    /// Returns the stored delta token for a drive, and whether the delta
    /// feed that produced it reached a final page (`complete`). A token
    /// saved from an interrupted pagination run is not safe to delete
    /// against and the planner must fall back to a full
    /// resync instead.
    async fn get_delta_token(&self, drive_id: &DriveId) -> anyhow::Result<Option<(DeltaToken, bool)>>;

    async fn save_delta_token(
        &self,
        drive_id: &DriveId,
        token: &DeltaToken,
        complete: bool,
    ) -> anyhow::Result<()>;

    /// Counts the tracked (non-deleted) entries under a drive, used by the
    /// planner's big-delete safety gate to compute the delete
    /// percentage against this total.
    async fn count_entries(&self, drive_id: &DriveId) -> anyhow::Result<usize>;

    // --- Conflict history ---

    async fn save_conflict(&self, conflict: &ConflictRecord) -> anyhow::Result<()>;

    async fn get_unresolved_conflicts(&self, drive_id: &DriveId) -> anyhow::Result<Vec<ConflictRecord>>;

    async fn get_conflict_history(
        &self,
        drive_id: &DriveId,
        since: DateTime<Utc>,
        limit: u32,
    ) -> anyhow::Result<Vec<ConflictRecord>>;
}
