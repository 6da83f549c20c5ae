//! Database connection pool management
//!
//! Provides a wrapper around SQLx's SqlitePool with:
//! - Automatic directory creation for database files
//! - WAL journal mode for concurrent reads
//! - Automatic schema migration on first connection
//! - In-memory mode for testing

use std::path::Path;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

use crate::error::BaselineError;

/// Manages a pool of SQLite connections for the baseline store.
///
/// Configured with WAL journal mode for concurrent read access, 5 max
/// connections for file-based databases (1 for in-memory, since SQLite's
/// in-memory mode is per-connection and multiple connections would each
/// see an empty database), and a 5-second busy timeout to ride out write
/// contention between the planner's read pass and the executor's commit.
pub struct DatabasePool {
    pool: SqlitePool,
}

impl DatabasePool {
    /// Creates a new database pool connected to the specified file.
    pub async fn new(db_path: &Path) -> Result<Self, BaselineError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                BaselineError::ConnectionFailed(format!(
                    "failed to create database directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| {
                BaselineError::ConnectionFailed(format!(
                    "failed to connect to database at {}: {}",
                    db_path.display(),
                    e
                ))
            })?;

        Self::run_migrations(&pool).await?;

        tracing::info!(path = %db_path.display(), "baseline database pool initialized");

        Ok(Self { pool })
    }

    /// Creates an in-memory database pool, for tests.
    pub async fn in_memory() -> Result<Self, BaselineError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| BaselineError::ConnectionFailed(format!("in-memory connect: {}", e)))?;

        sqlx::raw_sql("PRAGMA foreign_keys = ON;")
            .execute(&pool)
            .await
            .map_err(|e| BaselineError::MigrationFailed(format!("enable foreign keys: {}", e)))?;

        Self::run_migrations(&pool).await?;

        tracing::debug!("in-memory baseline database pool initialized");

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn run_migrations(pool: &SqlitePool) -> Result<(), BaselineError> {
        let initial_sql = include_str!("migrations/20260203_initial.sql");
        sqlx::raw_sql(initial_sql)
            .execute(pool)
            .await
            .map_err(|e| BaselineError::MigrationFailed(format!("initial migration: {}", e)))?;

        let audit_log_sql = include_str!("migrations/20260204_audit_log.sql");
        sqlx::raw_sql(audit_log_sql)
            .execute(pool)
            .await
            .map_err(|e| BaselineError::MigrationFailed(format!("audit log migration: {}", e)))?;

        tracing::debug!("baseline database migrations completed");
        Ok(())
    }
}
