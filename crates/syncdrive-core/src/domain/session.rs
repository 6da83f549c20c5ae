//! Sync cycle session and report
//!
//! A `SyncSession` tracks one engine cycle while it runs; once the cycle
//! finishes, `SyncSession::into_report` produces the `SyncCycleReport` that
//! the CLI prints and the audit log records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::{CycleId, DeltaToken, ItemId};

/// Whether a cycle may push local changes to the remote, pull remote changes
/// to local, or both. `UploadOnly`/`DownloadOnly` exist for the CLI's
/// `--upload-only`/`--download-only` flags; the planner filters the full
/// bidirectional action set down to the permitted direction before dependency
/// ordering (moves and deletes on the disallowed side are simply skipped,
/// not queued and failed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    Both,
    UploadOnly,
    DownloadOnly,
}

impl Default for SyncMode {
    fn default() -> Self {
        SyncMode::Both
    }
}

/// Current status of a running or finished cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Completed,
    Failed(String),
    Cancelled,
}

/// A single action failure recorded during a cycle, kept alongside the
/// aggregate counters in the final report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionError {
    pub item_id: Option<ItemId>,
    pub path: String,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

impl SessionError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            item_id: None,
            path: path.into(),
            message: message.into(),
            occurred_at: Utc::now(),
        }
    }

    pub fn with_item_id(mut self, item_id: ItemId) -> Self {
        self.item_id = Some(item_id);
        self
    }
}

/// Per-action-type counters executed during one cycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionCounts {
    pub folder_creates: u64,
    pub moves: u64,
    pub downloads: u64,
    pub uploads: u64,
    pub local_deletes: u64,
    pub remote_deletes: u64,
    pub conflicts: u64,
    pub synced_updates: u64,
    pub cleanups: u64,
}

impl ActionCounts {
    pub fn total(&self) -> u64 {
        self.folder_creates
            + self.moves
            + self.downloads
            + self.uploads
            + self.local_deletes
            + self.remote_deletes
            + self.conflicts
            + self.synced_updates
            + self.cleanups
    }
}

/// A running sync cycle: created when the engine begins a pass over the
/// planner/executor pipeline, mutated as actions complete, and converted
/// into a `SyncCycleReport` once the cycle ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSession {
    pub id: CycleId,
    pub mode: SyncMode,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: SessionStatus,
    pub counts: ActionCounts,
    pub succeeded: u64,
    pub failed: u64,
    pub bytes_uploaded: u64,
    pub bytes_downloaded: u64,
    pub delta_token_start: Option<DeltaToken>,
    pub delta_token_end: Option<DeltaToken>,
    pub errors: Vec<SessionError>,
}

impl SyncSession {
    pub fn start(mode: SyncMode, dry_run: bool, delta_token_start: Option<DeltaToken>) -> Self {
        Self {
            id: CycleId::new(),
            mode,
            dry_run,
            started_at: Utc::now(),
            finished_at: None,
            status: SessionStatus::Running,
            counts: ActionCounts::default(),
            succeeded: 0,
            failed: 0,
            bytes_uploaded: 0,
            bytes_downloaded: 0,
            delta_token_start,
            delta_token_end: None,
            errors: Vec::new(),
        }
    }

    pub fn record_failure(&mut self, error: SessionError) {
        self.failed += 1;
        self.errors.push(error);
    }

    pub fn record_success(&mut self) {
        self.succeeded += 1;
    }

    pub fn finish(&mut self, delta_token_end: Option<DeltaToken>) {
        self.finished_at = Some(Utc::now());
        self.delta_token_end = delta_token_end;
        self.status = if self.failed == 0 {
            SessionStatus::Completed
        } else {
            SessionStatus::Failed(format!("{} action(s) failed", self.failed))
        };
    }

    pub fn cancel(&mut self) {
        self.finished_at = Some(Utc::now());
        self.status = SessionStatus::Cancelled;
    }

    pub fn duration(&self) -> Option<chrono::Duration> {
        self.finished_at.map(|end| end - self.started_at)
    }

    /// Convert a finished session into the report shape the CLI and audit
    /// log consume. Panics in debug builds if the session is still running;
    /// callers always call this after `finish`/`cancel`.
    pub fn into_report(self) -> SyncCycleReport {
        let duration_ms = self
            .duration()
            .map(|d| d.num_milliseconds().max(0) as u64)
            .unwrap_or(0);
        SyncCycleReport {
            mode: self.mode,
            dry_run: self.dry_run,
            duration_ms,
            counts: self.counts,
            succeeded: self.succeeded,
            failed: self.failed,
            errors: self.errors,
        }
    }
}

/// The sync cycle report: what the CLI prints at the end of a pass and what
/// gets handed to the audit trail's `SyncComplete` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncCycleReport {
    pub mode: SyncMode,
    pub dry_run: bool,
    pub duration_ms: u64,
    pub counts: ActionCounts,
    pub succeeded: u64,
    pub failed: u64,
    pub errors: Vec<SessionError>,
}
