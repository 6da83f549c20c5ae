//! Domain error types
//!
//! Validation and state-transition failures inside the core crate. Adapter
//! and orchestration code uses `anyhow::Result` instead (see `syncdrive-sync`
//! and `syncdrive-graph`); `DomainError` and its siblings here stay a closed
//! enum because callers need to match on specific failure kinds.

use thiserror::Error;

/// Errors raised by domain value construction and state transitions.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Invalid email format: {0}")]
    InvalidEmail(String),

    #[error("Invalid hash format: {0}")]
    InvalidHash(String),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidState { from: String, to: String },

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Invalid delta token: {0}")]
    InvalidDeltaToken(String),

    #[error("Invalid ID format: {0}")]
    InvalidId(String),
}

/// Planner-level failures: conditions the planner itself detects while
/// building an `ActionPlan`, as opposed to runtime I/O failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlannerError {
    /// The proposed plan deletes more than the configured safety threshold
    /// allows. Carries the counts so the caller can report them.
    #[error("big delete triggered: {delete_count} deletes against a baseline of {baseline_count} items")]
    BigDeleteTriggered {
        delete_count: usize,
        baseline_count: usize,
    },
}

/// Safety-checker-level failures, raised before execution begins.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SafetyError {
    #[error("insufficient disk space: need {needed_bytes} bytes, {available_bytes} available after reserve")]
    InsufficientDiskSpace {
        needed_bytes: u64,
        available_bytes: u64,
    },

    /// Re-check of the planner's own gate: a conflict sub-action can
    /// inflate the delete count after the plan was first built.
    #[error("big delete triggered: {delete_count} deletes against a baseline of {baseline_count} items")]
    BigDeleteTriggered {
        delete_count: usize,
        baseline_count: usize,
    },
}

/// Remote-observer-level failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Raised when the local scan encounters a `.nosync` guard file.
    #[error("sync aborted: .nosync guard present under {0}")]
    NosyncGuard(String),

    /// The delta token was rejected by the remote service (HTTP 410 Gone);
    /// the caller must retry with an empty token.
    #[error("delta token expired for drive {0}")]
    DeltaExpired(String),

    /// The delta feed's pagination loop exceeded its bound (10,000 pages).
    #[error("delta pagination limit exceeded for drive {0}")]
    PaginationLimitExceeded(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DomainError::InvalidPath("a/../b".to_string());
        assert_eq!(err.to_string(), "Invalid path: a/../b");

        let err = DomainError::InvalidState {
            from: "Pending".to_string(),
            to: "Completed".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid state transition from Pending to Completed"
        );
    }

    #[test]
    fn test_error_equality() {
        let err1 = DomainError::InvalidPath("/path".to_string());
        let err2 = DomainError::InvalidPath("/path".to_string());
        let err3 = DomainError::InvalidPath("/other".to_string());

        assert_eq!(err1, err2);
        assert_ne!(err1, err3);
    }

    #[test]
    fn test_big_delete_display() {
        let err = PlannerError::BigDeleteTriggered {
            delete_count: 60,
            baseline_count: 100,
        };
        assert!(err.to_string().contains("60"));
        assert!(err.to_string().contains("100"));
    }
}
