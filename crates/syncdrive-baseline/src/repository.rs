//! SQLite-backed implementation of the `BaselineStore` port.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use syncdrive_core::domain::{
    BaselineEntry, ConflictId, ConflictRecord, ConflictType, CTag, DeltaToken, DriveId, ETag,
    FileHash, ItemId, ItemType, Resolution, ResolvedBy, SyncPath, VersionInfo,
};
use syncdrive_core::ports::BaselineStore;

use crate::pool::DatabasePool;

/// Implements the baseline store port on top of a SQLite connection pool.
pub struct SqliteBaselineStore {
    pool: SqlitePool,
}

impl SqliteBaselineStore {
    pub fn new(database_pool: &DatabasePool) -> Self {
        Self {
            pool: database_pool.pool().clone(),
        }
    }

    fn from_raw_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn item_type_to_str(t: ItemType) -> &'static str {
    match t {
        ItemType::File => "file",
        ItemType::Folder => "folder",
        ItemType::Root => "root",
    }
}

fn item_type_from_str(s: &str) -> anyhow::Result<ItemType> {
    match s {
        "file" => Ok(ItemType::File),
        "folder" => Ok(ItemType::Folder),
        "root" => Ok(ItemType::Root),
        other => anyhow::bail!("unknown item_type in baseline row: {other}"),
    }
}

fn conflict_type_to_str(t: ConflictType) -> &'static str {
    match t {
        ConflictType::EditEdit => "edit_edit",
        ConflictType::EditDelete => "edit_delete",
        ConflictType::CreateCreate => "create_create",
    }
}

fn conflict_type_from_str(s: &str) -> anyhow::Result<ConflictType> {
    match s {
        "edit_edit" => Ok(ConflictType::EditEdit),
        "edit_delete" => Ok(ConflictType::EditDelete),
        "create_create" => Ok(ConflictType::CreateCreate),
        other => anyhow::bail!("unknown conflict_type in conflict row: {other}"),
    }
}

fn resolution_to_str(r: Resolution) -> &'static str {
    match r {
        Resolution::KeepBoth => "keep_both",
        Resolution::KeepLocal => "keep_local",
        Resolution::KeepRemote => "keep_remote",
        Resolution::Unresolved => "unresolved",
    }
}

fn resolution_from_str(s: &str) -> anyhow::Result<Resolution> {
    match s {
        "keep_both" => Ok(Resolution::KeepBoth),
        "keep_local" => Ok(Resolution::KeepLocal),
        "keep_remote" => Ok(Resolution::KeepRemote),
        "unresolved" => Ok(Resolution::Unresolved),
        other => anyhow::bail!("unknown resolution in conflict row: {other}"),
    }
}

fn resolved_by_to_str(r: ResolvedBy) -> &'static str {
    match r {
        ResolvedBy::Auto => "auto",
        ResolvedBy::User => "user",
    }
}

fn resolved_by_from_str(s: &str) -> anyhow::Result<ResolvedBy> {
    match s {
        "auto" => Ok(ResolvedBy::Auto),
        "user" => Ok(ResolvedBy::User),
        other => anyhow::bail!("unknown resolved_by in conflict row: {other}"),
    }
}

fn parse_timestamp(s: &str) -> anyhow::Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc))
}

fn row_to_baseline_entry(row: &sqlx::sqlite::SqliteRow) -> anyhow::Result<BaselineEntry> {
    let drive_id: String = row.try_get("drive_id")?;
    let item_id: String = row.try_get("item_id")?;
    let path: String = row.try_get("path")?;
    let parent_id: Option<String> = row.try_get("parent_id")?;
    let item_type: String = row.try_get("item_type")?;
    let local_hash: Option<String> = row.try_get("local_hash")?;
    let remote_hash: Option<String> = row.try_get("remote_hash")?;
    let size: i64 = row.try_get("size")?;
    let mtime: String = row.try_get("mtime")?;
    let synced_at: String = row.try_get("synced_at")?;
    let etag: Option<String> = row.try_get("etag")?;
    let ctag: Option<String> = row.try_get("ctag")?;
    let is_deleted: i64 = row.try_get("is_deleted")?;
    let deleted_at: Option<String> = row.try_get("deleted_at")?;

    Ok(BaselineEntry {
        path: SyncPath::new(path)?,
        drive_id: DriveId::new(drive_id)?,
        item_id: ItemId::new(item_id)?,
        parent_id: parent_id.map(ItemId::new).transpose()?,
        item_type: item_type_from_str(&item_type)?,
        local_hash: local_hash.map(FileHash::new).transpose()?,
        remote_hash: remote_hash.map(FileHash::new).transpose()?,
        size: size as u64,
        mtime: parse_timestamp(&mtime)?,
        synced_at: parse_timestamp(&synced_at)?,
        etag: etag.map(ETag::new).transpose()?,
        ctag: ctag.map(CTag::new).transpose()?,
        is_deleted: is_deleted != 0,
        deleted_at: deleted_at.map(|s| parse_timestamp(&s)).transpose()?,
    })
}

fn row_to_conflict_record(row: &sqlx::sqlite::SqliteRow) -> anyhow::Result<ConflictRecord> {
    let id: String = row.try_get("id")?;
    let drive_id: String = row.try_get("drive_id")?;
    let item_id: Option<String> = row.try_get("item_id")?;
    let path: String = row.try_get("path")?;
    let conflict_type: String = row.try_get("conflict_type")?;
    let detected_at: String = row.try_get("detected_at")?;
    let local_hash: Option<String> = row.try_get("local_hash")?;
    let local_size: i64 = row.try_get("local_size")?;
    let local_modified_at: String = row.try_get("local_modified_at")?;
    let remote_hash: Option<String> = row.try_get("remote_hash")?;
    let remote_size: i64 = row.try_get("remote_size")?;
    let remote_modified_at: String = row.try_get("remote_modified_at")?;
    let resolution: String = row.try_get("resolution")?;
    let resolved_at: Option<String> = row.try_get("resolved_at")?;
    let resolved_by: Option<String> = row.try_get("resolved_by")?;

    Ok(ConflictRecord {
        id: id.parse::<ConflictId>()?,
        drive_id: DriveId::new(drive_id)?,
        item_id: item_id.map(ItemId::new).transpose()?,
        path: SyncPath::new(path)?,
        conflict_type: conflict_type_from_str(&conflict_type)?,
        detected_at: parse_timestamp(&detected_at)?,
        local: VersionInfo::new(
            local_hash.map(FileHash::new).transpose()?,
            local_size as u64,
            parse_timestamp(&local_modified_at)?,
        ),
        remote: VersionInfo::new(
            remote_hash.map(FileHash::new).transpose()?,
            remote_size as u64,
            parse_timestamp(&remote_modified_at)?,
        ),
        resolution: resolution_from_str(&resolution)?,
        resolved_at: resolved_at.map(|s| parse_timestamp(&s)).transpose()?,
        resolved_by: resolved_by.map(|s| resolved_by_from_str(&s)).transpose()?,
    })
}

#[async_trait]
impl BaselineStore for SqliteBaselineStore {
    async fn list_entries(&self, drive_id: &DriveId) -> anyhow::Result<Vec<BaselineEntry>> {
        let rows =
            sqlx::query("SELECT * FROM baseline_entries WHERE drive_id = ? AND is_deleted = 0")
                .bind(drive_id.as_str())
                .fetch_all(&self.pool)
                .await?;

        rows.iter().map(row_to_baseline_entry).collect()
    }

    async fn get_by_path(
        &self,
        drive_id: &DriveId,
        path: &SyncPath,
    ) -> anyhow::Result<Option<BaselineEntry>> {
        let row = sqlx::query("SELECT * FROM baseline_entries WHERE drive_id = ? AND path = ?")
            .bind(drive_id.as_str())
            .bind(path.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_baseline_entry).transpose()
    }

    async fn get_by_item_id(
        &self,
        drive_id: &DriveId,
        item_id: &ItemId,
    ) -> anyhow::Result<Option<BaselineEntry>> {
        let row =
            sqlx::query("SELECT * FROM baseline_entries WHERE drive_id = ? AND item_id = ?")
                .bind(drive_id.as_str())
                .bind(item_id.as_str())
                .fetch_optional(&self.pool)
                .await?;

        row.as_ref().map(row_to_baseline_entry).transpose()
    }

    async fn commit_cycle(
        &self,
        drive_id: &DriveId,
        upserts: &[BaselineEntry],
        tombstones: &[ItemId],
        delta_token: Option<&DeltaToken>,
    ) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;

        for entry in upserts {
            sqlx::query(
                "INSERT INTO baseline_entries
                    (drive_id, item_id, path, parent_id, item_type, local_hash, remote_hash,
                     size, mtime, synced_at, etag, ctag, is_deleted, deleted_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(drive_id, item_id) DO UPDATE SET
                    path = excluded.path,
                    parent_id = excluded.parent_id,
                    item_type = excluded.item_type,
                    local_hash = excluded.local_hash,
                    remote_hash = excluded.remote_hash,
                    size = excluded.size,
                    mtime = excluded.mtime,
                    synced_at = excluded.synced_at,
                    etag = excluded.etag,
                    ctag = excluded.ctag,
                    is_deleted = excluded.is_deleted,
                    deleted_at = excluded.deleted_at",
            )
            .bind(entry.drive_id.as_str())
            .bind(entry.item_id.as_str())
            .bind(entry.path.as_str())
            .bind(entry.parent_id.as_ref().map(ItemId::as_str))
            .bind(item_type_to_str(entry.item_type))
            .bind(entry.local_hash.as_ref().map(FileHash::as_str))
            .bind(entry.remote_hash.as_ref().map(FileHash::as_str))
            .bind(entry.size as i64)
            .bind(entry.mtime.to_rfc3339())
            .bind(entry.synced_at.to_rfc3339())
            .bind(entry.etag.as_ref().map(ETag::as_str))
            .bind(entry.ctag.as_ref().map(CTag::as_str))
            .bind(entry.is_deleted as i64)
            .bind(entry.deleted_at.map(|d| d.to_rfc3339()))
            .execute(&mut *tx)
            .await?;
        }

        for item_id in tombstones {
            sqlx::query(
                "UPDATE baseline_entries SET is_deleted = 1, deleted_at = ?
                 WHERE drive_id = ? AND item_id = ?",
            )
            .bind(Utc::now().to_rfc3339())
            .bind(drive_id.as_str())
            .bind(item_id.as_str())
            .execute(&mut *tx)
            .await?;
        }

        if let Some(token) = delta_token {
            sqlx::query(
                "INSERT INTO delta_tokens (drive_id, token, complete) VALUES (?, ?, 1)
                 ON CONFLICT(drive_id) DO UPDATE SET token = excluded.token, complete = 1",
            )
            .bind(drive_id.as_str())
            .bind(token.as_str())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_delta_token(
        &self,
        drive_id: &DriveId,
    ) -> anyhow::Result<Option<(DeltaToken, bool)>> {
        let row = sqlx::query("SELECT token, complete FROM delta_tokens WHERE drive_id = ?")
            .bind(drive_id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            None => Ok(None),
            Some(row) => {
                let token: String = row.try_get("token")?;
                let complete: i64 = row.try_get("complete")?;
                Ok(Some((DeltaToken::new(token)?, complete != 0)))
            }
        }
    }

    async fn save_delta_token(
        &self,
        drive_id: &DriveId,
        token: &DeltaToken,
        complete: bool,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO delta_tokens (drive_id, token, complete) VALUES (?, ?, ?)
             ON CONFLICT(drive_id) DO UPDATE SET token = excluded.token, complete = excluded.complete",
        )
        .bind(drive_id.as_str())
        .bind(token.as_str())
        .bind(complete as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn count_entries(&self, drive_id: &DriveId) -> anyhow::Result<usize> {
        let row = sqlx::query(
            "SELECT COUNT(*) as n FROM baseline_entries WHERE drive_id = ? AND is_deleted = 0",
        )
        .bind(drive_id.as_str())
        .fetch_one(&self.pool)
        .await?;
        let n: i64 = row.try_get("n")?;
        Ok(n as usize)
    }

    async fn save_conflict(&self, conflict: &ConflictRecord) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO conflicts
                (id, drive_id, item_id, path, conflict_type, detected_at,
                 local_hash, local_size, local_modified_at,
                 remote_hash, remote_size, remote_modified_at,
                 resolution, resolved_at, resolved_by)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                resolution = excluded.resolution,
                resolved_at = excluded.resolved_at,
                resolved_by = excluded.resolved_by",
        )
        .bind(conflict.id.to_string())
        .bind(conflict.drive_id.as_str())
        .bind(conflict.item_id.as_ref().map(ItemId::as_str))
        .bind(conflict.path.as_str())
        .bind(conflict_type_to_str(conflict.conflict_type))
        .bind(conflict.detected_at.to_rfc3339())
        .bind(conflict.local.hash.as_ref().map(FileHash::as_str))
        .bind(conflict.local.size_bytes as i64)
        .bind(conflict.local.modified_at.to_rfc3339())
        .bind(conflict.remote.hash.as_ref().map(FileHash::as_str))
        .bind(conflict.remote.size_bytes as i64)
        .bind(conflict.remote.modified_at.to_rfc3339())
        .bind(resolution_to_str(conflict.resolution))
        .bind(conflict.resolved_at.map(|d| d.to_rfc3339()))
        .bind(conflict.resolved_by.map(resolved_by_to_str))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_unresolved_conflicts(
        &self,
        drive_id: &DriveId,
    ) -> anyhow::Result<Vec<ConflictRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM conflicts WHERE drive_id = ? AND resolution = 'unresolved'
             ORDER BY detected_at ASC",
        )
        .bind(drive_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_conflict_record).collect()
    }

    async fn get_conflict_history(
        &self,
        drive_id: &DriveId,
        since: DateTime<Utc>,
        limit: u32,
    ) -> anyhow::Result<Vec<ConflictRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM conflicts WHERE drive_id = ? AND detected_at >= ?
             ORDER BY detected_at DESC LIMIT ?",
        )
        .bind(drive_id.as_str())
        .bind(since.to_rfc3339())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_conflict_record).collect()
    }
}
