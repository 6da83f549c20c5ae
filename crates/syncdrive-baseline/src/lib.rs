//! syncdrive Baseline - SQLite-backed baseline store
//!
//! Persists the reconciliation baseline between sync cycles:
//! - One row per tracked `(drive_id, item_id)` entry
//! - The per-drive delta token and its pagination-completeness flag
//! - Conflict history

pub mod audit_repository;
pub mod error;
pub mod pool;
pub mod repository;

pub use audit_repository::SqliteAuditStore;
pub use error::BaselineError;
pub use pool::DatabasePool;
pub use repository::SqliteBaselineStore;
