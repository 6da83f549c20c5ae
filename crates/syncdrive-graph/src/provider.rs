//! `GraphCloudProvider` - capability-port implementations for Microsoft Graph
//!
//! Wraps a [`GraphClient`] and implements each narrow port trait
//! (`DeltaFetcher`, `ItemClient`, `Downloader`, `RangeDownloader`,
//! `Uploader`, `SessionUploader`) by delegating to the `delta`/`upload`
//! modules or making direct Graph API calls for the item-mutation
//! operations that don't otherwise have a home.
//!
//! Authentication (`AuthProvider`) is implemented separately on
//! `GraphAuthAdapter` in `auth.rs`; this type only ever holds an already
//! issued access token.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use tokio::sync::Mutex;
use tracing::debug;

use syncdrive_core::domain::{DeltaToken, DriveId, ETag, ItemId};
use syncdrive_core::ports::cloud_provider::{
    DeltaFetcher, DeltaPage, Downloader, ItemClient, ProviderError, RangeDownloader, RemoteItem,
    SessionUploader, UploadSession, Uploader,
};

use crate::client::{map_response_error, GraphClient};
use crate::delta::{self, item_to_remote_item, GraphDriveItem};
use crate::upload;

/// Converts an `anyhow::Error` coming out of a `GraphClient` helper that
/// uses `.error_for_status()` into a `ProviderError`, preserving the HTTP
/// status when the underlying `reqwest::Error` still carries one.
fn anyhow_to_provider_error(err: anyhow::Error) -> ProviderError {
    for cause in err.chain() {
        if let Some(reqwest_err) = cause.downcast_ref::<reqwest::Error>() {
            if let Some(status) = reqwest_err.status() {
                return map_response_error(status, None, reqwest_err.to_string());
            }
        }
    }
    ProviderError::Transport(err.to_string())
}

/// Cloud provider implementation that delegates to the Microsoft Graph API.
///
/// Wraps a [`GraphClient`] behind a `tokio::sync::Mutex` for interior
/// mutability (token refresh updates `access_token` via `&mut self`) while
/// every port trait method here takes `&self`. `next_link` holds the
/// in-flight delta pagination cursor so `DeltaFetcher::get_delta` can be
/// re-called with the same `DeltaToken` across pages, per its contract.
pub struct GraphCloudProvider {
    client: Mutex<GraphClient>,
    next_link: Mutex<Option<String>>,
}

impl GraphCloudProvider {
    pub fn new(client: GraphClient) -> Self {
        Self {
            client: Mutex::new(client),
            next_link: Mutex::new(None),
        }
    }

    pub fn with_client(client: GraphClient) -> Arc<Self> {
        Arc::new(Self::new(client))
    }
}

#[async_trait]
impl DeltaFetcher for GraphCloudProvider {
    async fn get_delta(
        &self,
        drive_id: &DriveId,
        token: Option<&DeltaToken>,
    ) -> Result<DeltaPage, ProviderError> {
        let client = self.client.lock().await;
        let resume_link = self.next_link.lock().await.clone();
        debug!(
            drive_id = drive_id.as_str(),
            has_token = token.is_some(),
            resuming = resume_link.is_some(),
            "fetching delta page"
        );

        let page = delta::get_delta_page(&client, token, resume_link.as_deref()).await?;
        *self.next_link.lock().await = page.next_link.clone();
        Ok(page)
    }
}

#[async_trait]
impl ItemClient for GraphCloudProvider {
    async fn get_metadata(
        &self,
        _drive_id: &DriveId,
        item_id: &ItemId,
    ) -> Result<RemoteItem, ProviderError> {
        let client = self.client.lock().await;
        let path = format!("/me/drive/items/{}", item_id.as_str());
        debug!(id = item_id.as_str(), "fetching item metadata");

        let response = client
            .request(Method::GET, &path)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_response_error(status, None, body));
        }

        let item: GraphDriveItem = response
            .json()
            .await
            .map_err(|e| ProviderError::ServerError(e.to_string()))?;

        item_to_remote_item(item).ok_or_else(|| ProviderError::NotFound)
    }

    async fn create_folder(
        &self,
        _drive_id: &DriveId,
        parent_id: &ItemId,
        name: &str,
    ) -> Result<RemoteItem, ProviderError> {
        let client = self.client.lock().await;
        let path = format!("/me/drive/items/{}/children", parent_id.as_str());
        debug!(parent = parent_id.as_str(), name, "creating remote folder");

        let body = serde_json::json!({
            "name": name,
            "folder": {},
            "@microsoft.graph.conflictBehavior": "rename",
        });

        let response = client
            .request(Method::POST, &path)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_response_error(status, None, body));
        }

        let item: GraphDriveItem = response
            .json()
            .await
            .map_err(|e| ProviderError::ServerError(e.to_string()))?;

        item_to_remote_item(item)
            .ok_or_else(|| ProviderError::ServerError("create folder response missing item id".to_string()))
    }

    async fn delete_item(&self, _drive_id: &DriveId, item_id: &ItemId) -> Result<(), ProviderError> {
        let client = self.client.lock().await;
        let path = format!("/me/drive/items/{}", item_id.as_str());
        debug!(id = item_id.as_str(), "deleting remote item");

        let response = client
            .request(Method::DELETE, &path)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() || status == reqwest::StatusCode::NOT_FOUND {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(map_response_error(status, None, body))
        }
    }

    async fn move_item(
        &self,
        _drive_id: &DriveId,
        item_id: &ItemId,
        new_parent_id: &ItemId,
        new_name: &str,
    ) -> Result<RemoteItem, ProviderError> {
        let client = self.client.lock().await;
        let path = format!("/me/drive/items/{}", item_id.as_str());
        debug!(
            id = item_id.as_str(),
            new_parent = new_parent_id.as_str(),
            new_name,
            "moving/renaming remote item"
        );

        let body = serde_json::json!({
            "parentReference": { "id": new_parent_id.as_str() },
            "name": new_name,
        });

        let response = client
            .request(Method::PATCH, &path)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_response_error(status, None, body));
        }

        let item: GraphDriveItem = response
            .json()
            .await
            .map_err(|e| ProviderError::ServerError(e.to_string()))?;

        item_to_remote_item(item)
            .ok_or_else(|| ProviderError::ServerError("move response missing item id".to_string()))
    }
}

#[async_trait]
impl Downloader for GraphCloudProvider {
    async fn download(&self, _drive_id: &DriveId, item_id: &ItemId) -> Result<Vec<u8>, ProviderError> {
        let client = self.client.lock().await;
        client.download_file(item_id).await.map_err(anyhow_to_provider_error)
    }
}

#[async_trait]
impl RangeDownloader for GraphCloudProvider {
    async fn download_range(
        &self,
        _drive_id: &DriveId,
        item_id: &ItemId,
        offset: u64,
        length: u64,
    ) -> Result<Vec<u8>, ProviderError> {
        let client = self.client.lock().await;
        client
            .download_file_range(item_id, offset, length)
            .await
            .map_err(anyhow_to_provider_error)
    }
}

#[async_trait]
impl Uploader for GraphCloudProvider {
    async fn upload(
        &self,
        _drive_id: &DriveId,
        parent_id: &ItemId,
        name: &str,
        data: &[u8],
        if_match_etag: Option<&ETag>,
    ) -> Result<RemoteItem, ProviderError> {
        let client = self.client.lock().await;
        upload::upload_small(&client, parent_id, name, data, if_match_etag).await
    }
}

#[async_trait]
impl SessionUploader for GraphCloudProvider {
    async fn create_session(
        &self,
        _drive_id: &DriveId,
        parent_id: &ItemId,
        name: &str,
        _total_size: u64,
    ) -> Result<UploadSession, ProviderError> {
        let client = self.client.lock().await;
        upload::create_upload_session(&client, parent_id, name).await
    }

    async fn upload_chunk(
        &self,
        session: &UploadSession,
        offset: u64,
        chunk: &[u8],
        total_size: u64,
    ) -> Result<Option<RemoteItem>, ProviderError> {
        let client = self.client.lock().await;
        upload::upload_chunk(client.client(), session, client.access_token(), chunk, offset, total_size).await
    }

    async fn cancel_session(&self, session: &UploadSession) -> Result<(), ProviderError> {
        let client = self.client.lock().await;
        upload::cancel_session(client.client(), session, client.access_token()).await
    }
}
