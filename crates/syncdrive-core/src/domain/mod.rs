//! Domain entities and business logic
//!
//! This module contains the core domain types for syncdrive:
//! - Newtypes for type-safe identifiers and validated domain types
//! - Account management types
//! - Audit entries for tracking operations
//! - Conflict detection and resolution types
//! - Sync cycle session and report types
//! - Baseline entries and the per-cycle `Item` working copy
//! - Change events buffered from the local and remote observers
//! - The planner's path views, actions, and outcomes
//! - Domain-specific error types

pub mod account;
pub mod audit;
pub mod baseline_entry;
pub mod change_event;
pub mod conflict;
pub mod errors;
pub mod newtypes;
pub mod plan;
pub mod session;

// Re-export commonly used types
pub use account::{Account, AccountState};
pub use audit::{AuditAction, AuditEntry, AuditResult};
pub use baseline_entry::{BaselineEntry, Item, ItemType};
pub use change_event::{ChangeEvent, ChangeSource, ChangeType};
pub use conflict::{ConflictRecord, ConflictType, Resolution, ResolvedBy, VersionInfo};
pub use errors::{DomainError, PlannerError, SafetyError, SyncError};
pub use newtypes::*;
pub use plan::{Action, ActionPlan, ActionType, CreateSide, Outcome, PathView};
pub use session::{ActionCounts, SessionError, SessionStatus, SyncCycleReport, SyncMode, SyncSession};
