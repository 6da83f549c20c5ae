//! Microsoft Graph Delta API for incremental synchronization
//!
//! Implements the delta query pattern for OneDrive, which provides efficient
//! incremental sync by returning only items that have changed since the last
//! query.
//!
//! ## Delta Query Flow
//!
//! 1. **Initial sync**: call [`get_delta_page`] with `token = None` to get the
//!    first page of all items.
//! 2. **Follow pages**: as long as the returned [`DeltaPage`] carries a
//!    `next_link`, the caller re-queries with the *same* token; this module
//!    follows that link directly when given one, rather than re-deriving it.
//! 3. **Save token**: the final page carries `delta_token`, the token for the
//!    next sync cycle.

use anyhow::Context;
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::Deserialize;
use tracing::{debug, warn};

use syncdrive_core::domain::{CTag, DeltaToken, ETag, FileHash, ItemId};
use syncdrive_core::ports::cloud_provider::{DeltaPage, ProviderError, RemoteItem};

use crate::client::{map_response_error, GraphClient};

/// Path for the delta endpoint relative to the Graph API base URL.
const DELTA_PATH: &str = "/me/drive/root/delta";

// ============================================================================
// Microsoft Graph API response types (JSON deserialization)
// ============================================================================

/// Raw response from the Microsoft Graph delta API.
///
/// See: <https://learn.microsoft.com/en-us/graph/api/driveitem-delta>
#[derive(Debug, Deserialize)]
struct GraphDeltaResponse {
    #[serde(default)]
    value: Vec<GraphDriveItem>,

    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,

    #[serde(rename = "@odata.deltaLink")]
    delta_link: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GraphDriveItem {
    pub(crate) id: String,
    #[serde(default)]
    pub(crate) name: String,
    pub(crate) size: Option<u64>,
    pub(crate) last_modified_date_time: Option<DateTime<Utc>>,
    #[serde(rename = "eTag")]
    pub(crate) e_tag: Option<String>,
    #[serde(rename = "cTag")]
    pub(crate) c_tag: Option<String>,
    pub(crate) parent_reference: Option<GraphParentReference>,
    pub(crate) file: Option<GraphFileFacet>,
    pub(crate) folder: Option<GraphFolderFacet>,
    pub(crate) deleted: Option<GraphDeletedFacet>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GraphParentReference {
    pub(crate) id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GraphFileFacet {
    pub(crate) hashes: Option<GraphHashes>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GraphHashes {
    quick_xor_hash: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GraphFolderFacet {
    #[allow(dead_code)]
    child_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GraphDeletedFacet {
    #[allow(dead_code)]
    state: Option<String>,
}

/// Converts a Graph drive item into the port-level [`RemoteItem`].
///
/// Items with an empty id are dropped (returns `None`) rather than failing
/// the whole page; a malformed quickXorHash is treated as "no hash" rather
/// than an error since hash is advisory for folders and some file types.
pub(crate) fn item_to_remote_item(item: GraphDriveItem) -> Option<RemoteItem> {
    let item_id = ItemId::new(item.id).ok()?;
    let is_folder = item.folder.is_some();
    let is_deleted = item.deleted.is_some();

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
        modified: item.last_modified_date_time,
        etag,
        ctag,
        is_deleted,
    })
}

fn parse_response(response: GraphDeltaResponse) -> DeltaPage {
    let items = response
        .value
        .into_iter()
        .filter_map(item_to_remote_item)
        .collect();

    let delta_token = response
        .delta_link
        .as_deref()
        .and_then(extract_delta_token)
        .and_then(|t| DeltaToken::new(t).ok());

    DeltaPage {
        items,
        next_link: response.next_link,
        delta_token,
    }
}

/// Extracts the delta token value from a delta link URL.
///
/// The delta link is a full URL like:
/// `https://graph.microsoft.com/v1.0/me/drive/root/delta?token=...`
pub(crate) fn extract_delta_token(delta_link: &str) -> Option<String> {
    url::Url::parse(delta_link).ok().and_then(|u| {
        u.query_pairs()
            .find(|(key, _)| key == "token")
            .map(|(_, value)| value.into_owned())
    })
}

/// Fetches one page of delta results.
///
/// `resume_link`, when present, is an absolute `@odata.nextLink` URL and
/// takes priority over `token` (which only seeds the very first request of
/// a sync cycle).
pub async fn get_delta_page(
    client: &GraphClient,
    token: Option<&DeltaToken>,
    resume_link: Option<&str>,
) -> Result<DeltaPage, ProviderError> {
    let http_response = if let Some(link) = resume_link {
        debug!(link, "following delta nextLink");
        client
            .client()
            .get(link)
            .bearer_auth(client.access_token())
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?
    } else {
        let path = match token {
            Some(t) => format!("{DELTA_PATH}?token={}", t.as_str()),
            None => DELTA_PATH.to_string(),
        };
        debug!(has_token = token.is_some(), "starting delta query");
        client
            .request(Method::GET, &path)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?
    };

    let status = http_response.status();
    if status == reqwest::StatusCode::GONE {
        return Err(ProviderError::Gone);
    }
    if !status.is_success() {
        let body = http_response.text().await.unwrap_or_default();
        return Err(map_response_error(status, None, body));
    }

    let raw: GraphDeltaResponse = http_response
        .json()
        .await
        .context("failed to parse delta response")
        .map_err(|e| ProviderError::ServerError(e.to_string()))?;

    let page = parse_response(raw);
    if page.next_link.is_none() && page.delta_token.is_none() {
        warn!("delta query completed without a deltaLink; next sync may require full re-scan");
    }
    Ok(page)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_file_item() {
        let graph_item = GraphDriveItem {
            id: "file-001".to_string(),
            name: "report.pdf".to_string(),
            size: Some(524_288),
            last_modified_date_time: Some("2025-07-01T14:00:00Z".parse().unwrap()),
            e_tag: Some("\"etag1\"".to_string()),
            c_tag: Some("\"ctag1\"".to_string()),
            parent_reference: Some(GraphParentReference {
                id: Some("parent-001".to_string()),
            }),
            file: Some(GraphFileFacet {
                hashes: Some(GraphHashes {
                    quick_xor_hash: Some("AAAAAAAAAAAAAAAAAAAAAAAAAAA=".to_string()),
                }),
            }),
            folder: None,
            deleted: None,
        };

        let item = item_to_remote_item(graph_item).unwrap();
        assert_eq!(item.item_id.as_str(), "file-001");
        assert_eq!(item.name, "report.pdf");
        assert_eq!(item.size, 524_288);
        assert!(item.hash.is_some());
        assert!(!item.is_folder);
        assert!(!item.is_deleted);
        assert_eq!(item.parent_id.unwrap().as_str(), "parent-001");
    }

    #[test]
    fn parses_folder_item() {
        let graph_item = GraphDriveItem {
            id: "folder-001".to_string(),
            name: "Photos".to_string(),
            size: Some(0),
            last_modified_date_time: None,
            e_tag: None,
            c_tag: None,
            parent_reference: Some(GraphParentReference {
                id: Some("root-id".to_string()),
            }),
            file: None,
            folder: Some(GraphFolderFacet { child_count: Some(5) }),
            deleted: None,
        };

        let item = item_to_remote_item(graph_item).unwrap();
        assert!(item.is_folder);
        assert!(item.hash.is_none());
    }

    #[test]
    fn parses_deleted_item() {
        let graph_item = GraphDriveItem {
            id: "deleted-001".to_string(),
            name: "old.txt".to_string(),
            size: None,
            last_modified_date_time: None,
            e_tag: None,
            c_tag: None,
            parent_reference: None,
            file: None,
            folder: None,
            deleted: Some(GraphDeletedFacet { state: Some("deleted".to_string()) }),
        };

        let item = item_to_remote_item(graph_item).unwrap();
        assert!(item.is_deleted);
        assert!(item.parent_id.is_none());
    }

    #[test]
    fn drops_item_with_empty_id() {
        let graph_item = GraphDriveItem {
            id: String::new(),
            name: "weird.txt".to_string(),
            size: None,
            last_modified_date_time: None,
            e_tag: None,
            c_tag: None,
            parent_reference: None,
            file: None,
            folder: None,
            deleted: None,
        };

        assert!(item_to_remote_item(graph_item).is_none());
    }

    #[test]
    fn malformed_hash_is_dropped_not_fatal() {
        let graph_item = GraphDriveItem {
            id: "x".to_string(),
            name: "x.txt".to_string(),
            size: Some(1),
            last_modified_date_time: None,
            e_tag: None,
            c_tag: None,
            parent_reference: None,
            file: Some(GraphFileFacet {
                hashes: Some(GraphHashes {
                    quick_xor_hash: Some("not-valid-base64!!".to_string()),
                }),
            }),
            folder: None,
            deleted: None,
        };

        let item = item_to_remote_item(graph_item).unwrap();
        assert!(item.hash.is_none());
    }

    #[test]
    fn extracts_delta_token() {
        let link = "https://graph.microsoft.com/v1.0/me/drive/root/delta?token=abc123xyz";
        assert_eq!(extract_delta_token(link), Some("abc123xyz".to_string()));
    }

    #[test]
    fn extracts_delta_token_missing() {
        let link = "https://graph.microsoft.com/v1.0/me/drive/root/delta";
        assert_eq!(extract_delta_token(link), None);
    }

    #[test]
    fn delta_path_without_token() {
        assert_eq!(DELTA_PATH, "/me/drive/root/delta");
    }
}
