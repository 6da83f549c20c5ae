//! Upload operations for Microsoft Graph API (OneDrive)
//!
//! Provides functions for uploading files to OneDrive by parent item id:
//! - [`upload_small`] - single-request upload for files under the simple
//!   upload threshold
//! - [`create_upload_session`] / [`upload_chunk`] - resumable chunked upload
//!   for larger files
//!
//! ## Microsoft Graph API References
//!
//! - [Upload small files](https://learn.microsoft.com/en-us/graph/api/driveitem-put-content)
//! - [Upload large files](https://learn.microsoft.com/en-us/graph/api/driveitem-createuploadsession)

use chrono::{DateTime, Utc};
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use tracing::debug;

use syncdrive_core::domain::newtypes::{CTag, ETag, FileHash, ItemId};
use syncdrive_core::ports::cloud_provider::{ProviderError, RemoteItem, UploadSession};

use crate::client::{map_response_error, GraphClient};

/// Chunk size for large file uploads: 10 MiB (10,485,760 bytes).
///
/// Microsoft recommends chunk sizes that are multiples of 320 KiB.
/// 10 MiB = 10,485,760 = 320 KiB * 32, which satisfies this requirement.
pub const CHUNK_SIZE: usize = 10 * 1024 * 1024;

// ============================================================================
// Graph API DriveItem response types for deserialization
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphDriveItem {
    id: String,
    name: String,
    size: Option<u64>,
    last_modified_date_time: Option<String>,
    #[serde(rename = "eTag")]
    e_tag: Option<String>,
    #[serde(rename = "cTag")]
    c_tag: Option<String>,
    parent_reference: Option<ParentReference>,
    file: Option<FileInfo>,
    folder: Option<serde_json::Value>,
    deleted: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ParentReference {
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FileInfo {
    hashes: Option<FileHashes>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileHashes {
    quick_xor_hash: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadSessionResponse {
    upload_url: String,
}

// ============================================================================
// GraphDriveItem -> RemoteItem conversion
// ============================================================================

fn drive_item_to_remote_item(item: GraphDriveItem) -> Option<RemoteItem> {
    let item_id = ItemId::new(item.id).ok()?;
    let is_folder = item.folder.is_some();
    let is_deleted = item.deleted.is_some();

    let modified = item
        .last_modified_date_time
        .as_deref()
        .and_then(|s| s.parse::<DateTime<Utc>>().ok());

    let hash = item
        .file
        .as_ref()
        .and_then(|f| f.hashes.as_ref())
        .and_then(|h| h.quick_xor_hash.clone())
        .and_then(|h| FileHash::new(h).ok());

    let parent_id = item
        .parent_reference
        .as_ref()
        .and_then(|pr| pr.id.clone())
        .and_then(|id| ItemId::new(id).ok());

    let etag = item.e_tag.and_then(|t| ETag::new(t).ok());
    let ctag = item.c_tag.and_then(|t| CTag::new(t).ok());

    Some(RemoteItem {
        item_id,
        parent_id,
        name: item.name,
        is_folder,
        size: item.size.unwrap_or(0),
        hash,
        modified,
        etag,
        ctag,
        is_deleted,
    })
}

/// Builds the Graph API path for an item-by-path-under-parent-id operation.
///
/// Format: `/me/drive/items/{parent_id}:/{name}:/{suffix}`
fn build_item_path(parent_id: &ItemId, name: &str, suffix: &str) -> String {
    format!("/me/drive/items/{}:/{}:/{}", parent_id.as_str(), name, suffix)
}

// ============================================================================
// upload_small
// ============================================================================

/// Uploads a small file (under the simple-upload threshold) in a single PUT
/// request, optionally constrained by an `If-Match` ETag for optimistic
/// concurrency.
pub async fn upload_small(
    client: &GraphClient,
    parent_id: &ItemId,
    name: &str,
    data: &[u8],
    if_match_etag: Option<&ETag>,
) -> Result<RemoteItem, ProviderError> {
    let path = build_item_path(parent_id, name, "content");
    debug!(bytes = data.len(), name, path, "uploading small file");

    let mut request = client
        .request(Method::PUT, &path)
        .header("Content-Type", "application/octet-stream");
    if let Some(etag) = if_match_etag {
        request = request.header("If-Match", etag.as_str());
    }

    let response = request
        .body(data.to_vec())
        .send()
        .await
        .map_err(|e| ProviderError::Transport(e.to_string()))?;

    let status = response.status();
    if status == StatusCode::PRECONDITION_FAILED {
        return Err(ProviderError::BadRequest("etag precondition failed".to_string()));
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(map_response_error(status, None, body));
    }

    let item: GraphDriveItem = response
        .json()
        .await
        .map_err(|e| ProviderError::ServerError(e.to_string()))?;

    drive_item_to_remote_item(item)
        .ok_or_else(|| ProviderError::ServerError("upload response missing item id".to_string()))
}

// ============================================================================
// create_upload_session / upload_chunk
// ============================================================================

/// Creates a resumable upload session for a file above the simple-upload
/// threshold.
pub async fn create_upload_session(
    client: &GraphClient,
    parent_id: &ItemId,
    name: &str,
) -> Result<UploadSession, ProviderError> {
    let path = build_item_path(parent_id, name, "createUploadSession");
    debug!(name, "creating upload session");

    let response = client
        .request(Method::POST, &path)
        .header("Content-Type", "application/json")
        .body("{}")
        .send()
        .await
        .map_err(|e| ProviderError::Transport(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(map_response_error(status, None, body));
    }

    let parsed: UploadSessionResponse = response
        .json()
        .await
        .map_err(|e| ProviderError::ServerError(e.to_string()))?;

    Ok(UploadSession {
        upload_url: parsed.upload_url,
        next_expected_ranges: Vec::new(),
    })
}

/// Uploads a single chunk of data to a resumable upload session.
///
/// Returns `Some(RemoteItem)` on the final chunk (HTTP 200/201) and `None`
/// for an intermediate chunk accepted with HTTP 202.
pub async fn upload_chunk(
    http_client: &reqwest::Client,
    session: &UploadSession,
    access_token: &str,
    data: &[u8],
    offset: u64,
    total: u64,
) -> Result<Option<RemoteItem>, ProviderError> {
    let chunk_len = data.len() as u64;
    let range_end = offset + chunk_len - 1;
    let content_range = format!("bytes {offset}-{range_end}/{total}");

    debug!(content_range, chunk_len, "uploading chunk");

    let response = http_client
        .put(&session.upload_url)
        .bearer_auth(access_token)
        .header("Content-Length", chunk_len.to_string())
        .header("Content-Range", &content_range)
        .body(data.to_vec())
        .send()
        .await
        .map_err(|e| ProviderError::Transport(e.to_string()))?;

    let status = response.status();
    if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
        return Err(ProviderError::UploadSessionExpired);
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(map_response_error(status, None, body));
    }

    if status == StatusCode::OK || status == StatusCode::CREATED {
        let item: GraphDriveItem = response
            .json()
            .await
            .map_err(|e| ProviderError::ServerError(e.to_string()))?;
        Ok(drive_item_to_remote_item(item))
    } else {
        Ok(None)
    }
}

/// Cancels an open upload session, releasing the server-side partial upload.
pub async fn cancel_session(
    http_client: &reqwest::Client,
    session: &UploadSession,
    access_token: &str,
) -> Result<(), ProviderError> {
    let response = http_client
        .delete(&session.upload_url)
        .bearer_auth(access_token)
        .send()
        .await
        .map_err(|e| ProviderError::Transport(e.to_string()))?;

    let status = response.status();
    if status.is_success() || status == StatusCode::NOT_FOUND {
        Ok(())
    } else {
        let body = response.text().await.unwrap_or_default();
        Err(map_response_error(status, None, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drive_item_to_remote_item_file() {
        let item = GraphDriveItem {
            id: "FILE_ID".to_string(),
            name: "report.docx".to_string(),
            size: Some(2048),
            last_modified_date_time: Some("2025-06-15T10:30:00Z".to_string()),
            e_tag: Some("\"e1\"".to_string()),
            c_tag: Some("\"c1\"".to_string()),
            parent_reference: Some(ParentReference {
                id: Some("PARENT_ID".to_string()),
            }),
            file: Some(FileInfo {
                hashes: Some(FileHashes {
                    quick_xor_hash: Some("AAAAAAAAAAAAAAAAAAAAAAAAAAA=".to_string()),
                }),
            }),
            folder: None,
            deleted: None,
        };

        let remote = drive_item_to_remote_item(item).unwrap();
        assert_eq!(remote.item_id.as_str(), "FILE_ID");
        assert_eq!(remote.name, "report.docx");
        assert_eq!(remote.size, 2048);
        assert!(remote.hash.is_some());
        assert!(remote.modified.is_some());
        assert!(!remote.is_deleted);
        assert!(!remote.is_folder);
        assert_eq!(remote.parent_id.unwrap().as_str(), "PARENT_ID");
    }

    #[test]
    fn drive_item_to_remote_item_folder() {
        let item = GraphDriveItem {
            id: "FOLDER_ID".to_string(),
            name: "Photos".to_string(),
            size: Some(0),
            last_modified_date_time: None,
            e_tag: None,
            c_tag: None,
            parent_reference: Some(ParentReference {
                id: Some("ROOT_ID".to_string()),
            }),
            file: None,
            folder: Some(serde_json::json!({"childCount": 10})),
            deleted: None,
        };

        let remote = drive_item_to_remote_item(item).unwrap();
        assert!(remote.is_folder);
        assert!(remote.hash.is_none());
    }

    #[test]
    fn build_item_path_formats_parent_and_suffix() {
        let parent = ItemId::new("PARENT123".to_string()).unwrap();
        let path = build_item_path(&parent, "file.txt", "content");
        assert_eq!(path, "/me/drive/items/PARENT123:/file.txt:/content");
    }

    #[test]
    fn build_item_path_create_upload_session() {
        let parent = ItemId::new("PARENT123".to_string()).unwrap();
        let path = build_item_path(&parent, "large.zip", "createUploadSession");
        assert_eq!(path, "/me/drive/items/PARENT123:/large.zip:/createUploadSession");
    }

    #[test]
    fn upload_session_response_deserialization() {
        let json = r#"{
            "uploadUrl": "https://sn3302.up.1drv.com/up/fe6987415ace7X4811700/myfile.txt",
            "expirationDateTime": "2025-06-15T12:00:00Z"
        }"#;

        let response: UploadSessionResponse = serde_json::from_str(json).unwrap();
        assert_eq!(
            response.upload_url,
            "https://sn3302.up.1drv.com/up/fe6987415ace7X4811700/myfile.txt"
        );
    }

    #[test]
    fn chunk_size_is_multiple_of_320kib() {
        let kib_320 = 320 * 1024;
        assert_eq!(CHUNK_SIZE % kib_320, 0);
    }
}
