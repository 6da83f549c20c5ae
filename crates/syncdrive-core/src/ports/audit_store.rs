//! Audit store port (driven/secondary port)
//!
//! Persists the audit trail the sync engine writes as it runs, so
//! `syncdrive explain` and conflict history queries can answer "what
//! happened and why" after the fact. Kept separate from [`BaselineStore`](
//! super::BaselineStore) because the two have unrelated consistency needs:
//! the baseline is a snapshot the planner reads atomically, the audit log
//! is an append-only stream nothing else depends on for correctness.

use async_trait::async_trait;

use crate::domain::{AuditEntry, CycleId, UniqueId};

/// Durable storage for audit log entries.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Persists `entry`, returning a copy with its assigned `id` set.
    async fn save(&self, entry: &AuditEntry) -> anyhow::Result<AuditEntry>;

    /// Returns the `limit` most recent entries across all sessions, newest first.
    async fn query_recent(&self, limit: u32) -> anyhow::Result<Vec<AuditEntry>>;

    /// Returns every entry recorded for one sync cycle, oldest first.
    async fn query_by_session(&self, session_id: &CycleId) -> anyhow::Result<Vec<AuditEntry>>;

    /// Returns every entry recorded for one item, oldest first.
    async fn query_by_item(&self, item_id: &UniqueId) -> anyhow::Result<Vec<AuditEntry>>;
}
