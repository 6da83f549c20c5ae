//! Error types for the SQLite baseline store adapter.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BaselineError {
    #[error("failed to connect to baseline database: {0}")]
    ConnectionFailed(String),

    #[error("failed to run baseline schema migration: {0}")]
    MigrationFailed(String),

    #[error("failed to serialize/deserialize baseline row: {0}")]
    SerializationError(String),

    #[error("query failed: {0}")]
    QueryFailed(#[from] sqlx::Error),
}
