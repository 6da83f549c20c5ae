//! Integration tests for delta (incremental sync) queries
//!
//! Verifies end-to-end behavior of the delta module against a
//! wiremock-based Graph API mock server:
//! - Initial delta query (no token)
//! - Incremental delta query (with token)
//! - Pagination across multiple pages
//! - Empty delta response
//! - Mixed item types (files, folders, deleted)

use syncdrive_core::domain::DeltaToken;
use syncdrive_graph::client::GraphClient;
use syncdrive_graph::delta;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common;

#[tokio::test]
async fn test_delta_initial_sync_returns_all_items() {
    let (server, client) = common::setup_graph_mock().await;

    let items = serde_json::json!([
        {
            "id": "file-001",
            "name": "document.txt",
            "size": 1024,
            "lastModifiedDateTime": "2026-01-15T10:00:00Z",
            "eTag": "\"etag1\"",
            "cTag": "\"ctag1\"",
            "parentReference": { "id": "root" },
            "file": {
                "hashes": { "quickXorHash": "AAAAAAAAAAAAAAAAAAAAAAAAAAA=" }
            }
        },
        {
            "id": "folder-001",
            "name": "Documents",
            "size": 0,
            "parentReference": { "id": "root" },
            "folder": { "childCount": 3 }
        }
    ]);

    common::mount_delta_single_page(&server, items, "initial-token-001").await;

    let page = delta::get_delta_page(&client, None, None)
        .await
        .expect("initial delta query failed");

    assert_eq!(page.items.len(), 2);
    assert!(page.delta_token.is_some());
    assert!(page.next_link.is_none());

    let file = &page.items[0];
    assert_eq!(file.item_id.as_str(), "file-001");
    assert_eq!(file.name, "document.txt");
    assert_eq!(file.size, 1024);
    assert!(!file.is_folder);
    assert!(!file.is_deleted);

    let folder = &page.items[1];
    assert_eq!(folder.item_id.as_str(), "folder-001");
    assert_eq!(folder.name, "Documents");
    assert!(folder.is_folder);
    assert!(!folder.is_deleted);
}

#[tokio::test]
async fn test_delta_incremental_with_token() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/me/drive/root/delta"))
        .and(query_param("token", "previous-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "value": [
                {
                    "id": "file-002",
                    "name": "new-file.txt",
                    "size": 512,
                    "lastModifiedDateTime": "2026-01-16T08:00:00Z",
                    "parentReference": { "id": "root" },
                    "file": {}
                }
            ],
            "@odata.deltaLink": format!(
                "{}/me/drive/root/delta?token=incremental-token-002",
                server.uri()
            )
        })))
        .mount(&server)
        .await;

    let client = GraphClient::with_base_url("test-token", server.uri());
    let delta_token = DeltaToken::new("previous-token".to_string()).unwrap();

    let page = delta::get_delta_page(&client, Some(&delta_token), None)
        .await
        .expect("incremental delta query failed");

    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].item_id.as_str(), "file-002");
    assert_eq!(page.items[0].name, "new-file.txt");
    assert!(page.delta_token.is_some());
}

#[tokio::test]
async fn test_delta_pagination_follows_next_link() {
    let server = MockServer::start().await;

    let page1 = serde_json::json!([
        { "id": "p1-item", "name": "a.txt", "size": 10, "parentReference": { "id": "root" }, "file": {} }
    ]);
    let page2 = serde_json::json!([
        { "id": "p2-item", "name": "b.txt", "size": 20, "parentReference": { "id": "root" }, "file": {} }
    ]);

    common::mount_delta_paginated(&server, page1, page2, "final-token").await;

    let client = GraphClient::with_base_url("test-token", server.uri());

    let first = delta::get_delta_page(&client, None, None)
        .await
        .expect("first page failed");
    assert_eq!(first.items.len(), 1);
    assert_eq!(first.items[0].item_id.as_str(), "p1-item");
    assert!(first.next_link.is_some());
    assert!(first.delta_token.is_none());

    let second = delta::get_delta_page(&client, None, first.next_link.as_deref())
        .await
        .expect("second page failed");
    assert_eq!(second.items.len(), 1);
    assert_eq!(second.items[0].item_id.as_str(), "p2-item");
    assert!(second.next_link.is_none());
    assert!(second.delta_token.is_some());
}

#[tokio::test]
async fn test_delta_empty_response() {
    let (server, client) = common::setup_graph_mock().await;

    common::mount_delta_single_page(&server, serde_json::json!([]), "empty-token").await;

    let page = delta::get_delta_page(&client, None, None)
        .await
        .expect("empty delta query failed");

    assert_eq!(page.items.len(), 0);
    assert!(page.delta_token.is_some());
}

#[tokio::test]
async fn test_delta_deleted_items() {
    let (server, client) = common::setup_graph_mock().await;

    let items = serde_json::json!([
        {
            "id": "del-001",
            "name": "removed.txt",
            "deleted": { "state": "deleted" }
        },
        {
            "id": "del-002",
            "name": "also-removed.pdf",
            "deleted": {}
        }
    ]);

    common::mount_delta_single_page(&server, items, "delete-token").await;

    let page = delta::get_delta_page(&client, None, None)
        .await
        .expect("delta with deleted items failed");

    assert_eq!(page.items.len(), 2);
    assert!(page.items[0].is_deleted);
    assert!(page.items[1].is_deleted);
}

#[tokio::test]
async fn test_delta_mixed_item_types() {
    let (server, client) = common::setup_graph_mock().await;

    let items = serde_json::json!([
        {
            "id": "file-mix",
            "name": "photo.jpg",
            "size": 2048576,
            "lastModifiedDateTime": "2026-01-15T12:00:00Z",
            "parentReference": { "id": "folder-pics" },
            "file": {
                "hashes": { "quickXorHash": "BBBBBBBBBBBBBBBBBBBBBBBBBBB=" }
            }
        },
        {
            "id": "folder-mix",
            "name": "Archive",
            "parentReference": { "id": "root" },
            "folder": { "childCount": 10 }
        },
        {
            "id": "del-mix",
            "name": "temp.log",
            "deleted": {}
        }
    ]);

    common::mount_delta_single_page(&server, items, "mixed-token").await;

    let page = delta::get_delta_page(&client, None, None)
        .await
        .expect("mixed delta query failed");

    assert_eq!(page.items.len(), 3);

    assert!(!page.items[0].is_folder);
    assert!(!page.items[0].is_deleted);
    assert_eq!(
        page.items[0].hash.as_ref().map(|h| h.as_str().to_string()),
        Some("BBBBBBBBBBBBBBBBBBBBBBBBBBB=".to_string())
    );

    assert!(page.items[1].is_folder);
    assert!(!page.items[1].is_deleted);

    assert!(page.items[2].is_deleted);
    assert!(!page.items[2].is_folder);
}
