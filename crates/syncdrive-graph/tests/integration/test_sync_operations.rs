//! Integration tests for sync operations (upload/download)
//!
//! Verifies end-to-end behavior of file upload and download operations
//! against a wiremock-based Graph API mock server.

use syncdrive_core::domain::ItemId;
use syncdrive_graph::{client::GraphClient, upload};
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

use crate::common;

// ============================================================================
// Download tests
// ============================================================================

#[tokio::test]
async fn test_download_file_returns_content() {
    let (server, client) = common::setup_graph_mock().await;

    let file_content = b"Hello, OneDrive! This is test content.";
    common::mount_download(&server, "download-001", file_content).await;

    let item_id = ItemId::new("download-001".to_string()).unwrap();
    let data = client
        .download_file(&item_id)
        .await
        .expect("Download failed");

    assert_eq!(data, file_content);
}

#[tokio::test]
async fn test_download_large_file() {
    let (server, client) = common::setup_graph_mock().await;

    let file_content: Vec<u8> = (0..1_048_576).map(|i| (i % 256) as u8).collect();
    common::mount_download(&server, "large-001", &file_content).await;

    let item_id = ItemId::new("large-001".to_string()).unwrap();
    let data = client
        .download_file(&item_id)
        .await
        .expect("Large download failed");

    assert_eq!(data.len(), 1_048_576);
    assert_eq!(data, file_content);
}

#[tokio::test]
async fn test_download_empty_file() {
    let (server, client) = common::setup_graph_mock().await;

    common::mount_download(&server, "empty-001", &[]).await;

    let item_id = ItemId::new("empty-001".to_string()).unwrap();
    let data = client
        .download_file(&item_id)
        .await
        .expect("Empty download failed");

    assert!(data.is_empty());
}

#[tokio::test]
async fn test_download_range_returns_partial_content() {
    let server = MockServer::start().await;

    let full_content = b"0123456789ABCDEF";
    Mock::given(method("GET"))
        .and(path("/me/drive/items/range-001/content"))
        .respond_with(
            ResponseTemplate::new(206)
                .set_body_bytes(full_content[4..10].to_vec())
                .append_header("Content-Range", "bytes 4-9/16"),
        )
        .mount(&server)
        .await;

    let client = GraphClient::with_base_url("test-token", server.uri());
    let item_id = ItemId::new("range-001".to_string()).unwrap();

    let data = client
        .download_file_range(&item_id, 4, 6)
        .await
        .expect("Ranged download failed");

    assert_eq!(data, full_content[4..10]);
}

// ============================================================================
// Upload tests
// ============================================================================

#[tokio::test]
async fn test_upload_small_file() {
    let (server, client) = common::setup_graph_mock().await;

    common::mount_upload_small(&server, "parent-001", "test.txt", "upload-001", "test.txt").await;

    let parent_id = ItemId::new("parent-001".to_string()).unwrap();
    let data = b"Small file content for upload test";

    let result = upload::upload_small(&client, &parent_id, "test.txt", data, None)
        .await
        .expect("Small upload failed");

    assert_eq!(result.item_id.as_str(), "upload-001");
    assert_eq!(result.name, "test.txt");
    assert!(!result.is_deleted);
    assert!(!result.is_folder);
}

// ============================================================================
// Error handling tests
// ============================================================================

#[tokio::test]
async fn test_download_returns_error_on_404() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/me/drive/items/nonexistent/content"))
        .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
            "error": {
                "code": "itemNotFound",
                "message": "Item not found"
            }
        })))
        .mount(&server)
        .await;

    let client = GraphClient::with_base_url("test-token", server.uri());
    let item_id = ItemId::new("nonexistent".to_string()).unwrap();

    let result = client.download_file(&item_id).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_user_info_returns_error_on_401() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/me"))
        .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
            "error": {
                "code": "InvalidAuthenticationToken",
                "message": "Access token has expired"
            }
        })))
        .mount(&server)
        .await;

    let client = GraphClient::with_base_url("expired-token", server.uri());

    let result = client.get_user_info().await;
    assert!(result.is_err());
}
