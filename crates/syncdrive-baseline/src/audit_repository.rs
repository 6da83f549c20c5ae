//! SQLite-backed implementation of the `AuditStore` port.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use syncdrive_core::domain::audit::{AuditAction, AuditEntry, AuditResult};
use syncdrive_core::domain::{AuditId, CycleId, UniqueId};
use syncdrive_core::ports::AuditStore;

fn action_to_str(a: &AuditAction) -> &'static str {
    match a {
        AuditAction::AuthLogin => "auth_login",
        AuditAction::AuthLogout => "auth_logout",
        AuditAction::AuthRefresh => "auth_refresh",
        AuditAction::SyncStart => "sync_start",
        AuditAction::SyncComplete => "sync_complete",
        AuditAction::FileUpload => "file_upload",
        AuditAction::FileDownload => "file_download",
        AuditAction::FileDelete => "file_delete",
        AuditAction::ConflictDetected => "conflict_detected",
        AuditAction::ConflictResolved => "conflict_resolved",
        AuditAction::Error => "error",
        AuditAction::ConfigChange => "config_change",
    }
}

fn action_from_str(s: &str) -> anyhow::Result<AuditAction> {
    Ok(match s {
        "auth_login" => AuditAction::AuthLogin,
        "auth_logout" => AuditAction::AuthLogout,
        "auth_refresh" => AuditAction::AuthRefresh,
        "sync_start" => AuditAction::SyncStart,
        "sync_complete" => AuditAction::SyncComplete,
        "file_upload" => AuditAction::FileUpload,
        "file_download" => AuditAction::FileDownload,
        "file_delete" => AuditAction::FileDelete,
        "conflict_detected" => AuditAction::ConflictDetected,
        "conflict_resolved" => AuditAction::ConflictResolved,
        "error" => AuditAction::Error,
        "config_change" => AuditAction::ConfigChange,
        other => anyhow::bail!("unknown action in audit_log row: {other}"),
    })
}

fn parse_timestamp(s: &str) -> anyhow::Result<chrono::DateTime<chrono::Utc>> {
    Ok(chrono::DateTime::parse_from_rfc3339(s)?.with_timezone(&chrono::Utc))
}

fn row_to_audit_entry(row: &sqlx::sqlite::SqliteRow) -> anyhow::Result<AuditEntry> {
    let id: i64 = row.try_get("id")?;
    let timestamp: String = row.try_get("timestamp")?;
    let session_id: Option<String> = row.try_get("session_id")?;
    let item_id: Option<String> = row.try_get("item_id")?;
    let action: String = row.try_get("action")?;
    let result_success: i64 = row.try_get("result_success")?;
    let result_code: Option<String> = row.try_get("result_code")?;
    let result_message: Option<String> = row.try_get("result_message")?;
    let details: String = row.try_get("details")?;
    let duration_ms: Option<i64> = row.try_get("duration_ms")?;

    let result = if result_success != 0 {
        AuditResult::success()
    } else {
        AuditResult::failed(
            result_code.unwrap_or_default(),
            result_message.unwrap_or_default(),
        )
    };

    let mut entry = AuditEntry::new(action_from_str(&action)?, result)
        .with_id(AuditId::new(id))
        .with_details(serde_json::from_str(&details)?);

    if let Some(session_id) = session_id {
        entry = entry.with_session_id(session_id.parse::<CycleId>()?);
    }
    if let Some(item_id) = item_id {
        entry = entry.with_item_id(item_id.parse::<UniqueId>()?);
    }
    if let Some(duration_ms) = duration_ms {
        entry = entry.with_duration_ms(duration_ms as u64);
    }

    Ok(entry)
}

/// Implements the audit store port on top of the same SQLite pool the
/// baseline store uses. A separate struct, since the two ports have
/// independent lifecycles, but sharing the connection pool avoids a
/// second file handle and WAL segment for what is otherwise the same
/// per-drive database.
pub struct SqliteAuditStore {
    pool: SqlitePool,
}

impl SqliteAuditStore {
    pub fn new(database_pool: &crate::pool::DatabasePool) -> Self {
        Self {
            pool: database_pool.pool().clone(),
        }
    }

    #[cfg(test)]
    fn from_raw_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditStore for SqliteAuditStore {
    async fn save(&self, entry: &AuditEntry) -> anyhow::Result<AuditEntry> {
        let (result_success, result_code, result_message) = match entry.result() {
            AuditResult::Success => (1_i64, None, None),
            AuditResult::Failed { code, message } => {
                (0_i64, Some(code.clone()), Some(message.clone()))
            }
        };

        let row = sqlx::query(
            "INSERT INTO audit_log
                (timestamp, session_id, item_id, action, result_success,
                 result_code, result_message, details, duration_ms)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING id",
        )
        .bind(entry.timestamp().to_rfc3339())
        .bind(entry.session_id().map(CycleId::to_string))
        .bind(entry.item_id().map(UniqueId::to_string))
        .bind(action_to_str(entry.action()))
        .bind(result_success)
        .bind(result_code)
        .bind(result_message)
        .bind(entry.details().to_string())
        .bind(entry.duration_ms().map(|d| d as i64))
        .fetch_one(&self.pool)
        .await?;

        let id: i64 = row.try_get("id")?;
        Ok(entry.clone().with_id(AuditId::new(id)))
    }

    async fn query_recent(&self, limit: u32) -> anyhow::Result<Vec<AuditEntry>> {
        let rows = sqlx::query("SELECT * FROM audit_log ORDER BY id DESC LIMIT ?")
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_audit_entry).collect()
    }

    async fn query_by_session(&self, session_id: &CycleId) -> anyhow::Result<Vec<AuditEntry>> {
        let rows = sqlx::query("SELECT * FROM audit_log WHERE session_id = ? ORDER BY id ASC")
            .bind(session_id.to_string())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_audit_entry).collect()
    }

    async fn query_by_item(&self, item_id: &UniqueId) -> anyhow::Result<Vec<AuditEntry>> {
        let rows = sqlx::query("SELECT * FROM audit_log WHERE item_id = ? ORDER BY id ASC")
            .bind(item_id.to_string())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_audit_entry).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::DatabasePool;
    use serde_json::json;
    use syncdrive_core::domain::audit::AuditAction;

    async fn store() -> SqliteAuditStore {
        let pool = DatabasePool::in_memory().await.expect("in-memory pool");
        SqliteAuditStore::from_raw_pool(pool.pool().clone())
    }

    #[tokio::test]
    async fn save_assigns_id_and_round_trips() {
        let store = store().await;
        let session_id = CycleId::new();
        let entry = AuditEntry::new(AuditAction::SyncStart, AuditResult::success())
            .with_session_id(session_id)
            .with_details(json!({"drive": "drive1"}));

        let saved = store.save(&entry).await.expect("save");
        assert!(saved.id().is_some());

        let recent = store.query_recent(10).await.expect("query_recent");
        assert_eq!(recent.len(), 1);
        assert_eq!(*recent[0].action(), AuditAction::SyncStart);
        assert_eq!(recent[0].session_id(), Some(&session_id));
    }

    #[tokio::test]
    async fn query_by_session_filters_to_matching_entries() {
        let store = store().await;
        let session_a = CycleId::new();
        let session_b = CycleId::new();

        store
            .save(
                &AuditEntry::new(AuditAction::FileUpload, AuditResult::success())
                    .with_session_id(session_a),
            )
            .await
            .unwrap();
        store
            .save(
                &AuditEntry::new(AuditAction::FileDownload, AuditResult::success())
                    .with_session_id(session_b),
            )
            .await
            .unwrap();

        let entries = store.query_by_session(&session_a).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(*entries[0].action(), AuditAction::FileUpload);
    }

    #[tokio::test]
    async fn query_by_item_filters_to_matching_entries() {
        let store = store().await;
        let item_a = UniqueId::new();
        let item_b = UniqueId::new();

        store
            .save(
                &AuditEntry::new(AuditAction::FileUpload, AuditResult::success())
                    .with_item_id(item_a),
            )
            .await
            .unwrap();
        store
            .save(
                &AuditEntry::new(AuditAction::FileDelete, AuditResult::success())
                    .with_item_id(item_b),
            )
            .await
            .unwrap();

        let entries = store.query_by_item(&item_b).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(*entries[0].action(), AuditAction::FileDelete);
    }

    #[tokio::test]
    async fn failed_result_round_trips_code_and_message() {
        let store = store().await;
        let entry = AuditEntry::new(
            AuditAction::Error,
            AuditResult::failed("NETWORK_ERROR", "Connection timed out"),
        );
        store.save(&entry).await.unwrap();

        let recent = store.query_recent(1).await.unwrap();
        assert!(recent[0].result().is_failed());
        if let AuditResult::Failed { code, message } = recent[0].result() {
            assert_eq!(code, "NETWORK_ERROR");
            assert_eq!(message, "Connection timed out");
        } else {
            panic!("expected Failed variant");
        }
    }
}
