//! Integration tests for `SqliteBaselineStore` against the `BaselineStore` port.

use chrono::Utc;

use syncdrive_baseline::{DatabasePool, SqliteBaselineStore};
use syncdrive_core::domain::{
    BaselineEntry, ConflictRecord, ConflictType, DeltaToken, DriveId, ItemId, ItemType,
    Resolution, ResolvedBy, SyncPath, VersionInfo,
};
use syncdrive_core::ports::BaselineStore;

async fn setup() -> SqliteBaselineStore {
    let pool = DatabasePool::in_memory()
        .await
        .expect("failed to create in-memory database");
    SqliteBaselineStore::new(&pool)
}

fn drive() -> DriveId {
    DriveId::canonical("abc123").unwrap()
}

fn entry(path: &str, item_id: &str) -> BaselineEntry {
    BaselineEntry::new(
        SyncPath::new(path).unwrap(),
        drive(),
        ItemId::new(item_id.to_string()).unwrap(),
        None,
        ItemType::File,
    )
}

#[tokio::test]
async fn empty_store_has_no_entries() {
    let store = setup().await;
    let entries = store.list_entries(&drive()).await.unwrap();
    assert!(entries.is_empty());
    assert_eq!(store.count_entries(&drive()).await.unwrap(), 0);
}

#[tokio::test]
async fn commit_cycle_upserts_and_is_queryable_by_path_and_item_id() {
    let store = setup().await;
    let d = drive();
    let e = entry("Documents/report.docx", "item-1");

    store.commit_cycle(&d, &[e], &[], None).await.unwrap();

    let by_path = store
        .get_by_path(&d, &SyncPath::new("Documents/report.docx").unwrap())
        .await
        .unwrap()
        .expect("entry by path");
    assert_eq!(by_path.item_id.as_str(), "item-1");

    let by_id = store
        .get_by_item_id(&d, &ItemId::new("item-1".to_string()).unwrap())
        .await
        .unwrap()
        .expect("entry by item id");
    assert_eq!(by_id.path.as_str(), "Documents/report.docx");
}

#[tokio::test]
async fn commit_cycle_upsert_overwrites_existing_row() {
    let store = setup().await;
    let d = drive();
    let mut e = entry("a.txt", "item-1");
    store
        .commit_cycle(&d, &[e.clone()], &[], None)
        .await
        .unwrap();

    e.size = 2048;
    store.commit_cycle(&d, &[e], &[], None).await.unwrap();

    let entries = store.list_entries(&d).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].size, 2048);
}

#[tokio::test]
async fn tombstone_marks_deleted_and_excludes_from_list_and_count() {
    let store = setup().await;
    let d = drive();
    let item_id = ItemId::new("item-1".to_string()).unwrap();
    let e = entry("a.txt", "item-1");
    store.commit_cycle(&d, &[e], &[], None).await.unwrap();

    store
        .commit_cycle(&d, &[], std::slice::from_ref(&item_id), None)
        .await
        .unwrap();

    assert!(store.list_entries(&d).await.unwrap().is_empty());
    assert_eq!(store.count_entries(&d).await.unwrap(), 0);

    let by_id = store
        .get_by_item_id(&d, &item_id)
        .await
        .unwrap()
        .expect("tombstoned row still present");
    assert!(by_id.is_deleted);
    assert!(by_id.deleted_at.is_some());
}

#[tokio::test]
async fn commit_cycle_is_scoped_per_drive() {
    let store = setup().await;
    let drive_a = DriveId::canonical("aaaa").unwrap();
    let drive_b = DriveId::canonical("bbbb").unwrap();

    store
        .commit_cycle(
            &drive_a,
            &[BaselineEntry::new(
                SyncPath::new("a.txt").unwrap(),
                drive_a.clone(),
                ItemId::new("item-1".to_string()).unwrap(),
                None,
                ItemType::File,
            )],
            &[],
            None,
        )
        .await
        .unwrap();

    assert_eq!(store.count_entries(&drive_a).await.unwrap(), 1);
    assert_eq!(store.count_entries(&drive_b).await.unwrap(), 0);
}

#[tokio::test]
async fn delta_token_defaults_to_none_then_round_trips() {
    let store = setup().await;
    let d = drive();
    assert!(store.get_delta_token(&d).await.unwrap().is_none());

    let token = DeltaToken::new("token-v1".to_string()).unwrap();
    store.save_delta_token(&d, &token, false).await.unwrap();
    let (stored, complete) = store.get_delta_token(&d).await.unwrap().unwrap();
    assert_eq!(stored, token);
    assert!(!complete);

    let token2 = DeltaToken::new("token-v2".to_string()).unwrap();
    store.save_delta_token(&d, &token2, true).await.unwrap();
    let (stored2, complete2) = store.get_delta_token(&d).await.unwrap().unwrap();
    assert_eq!(stored2, token2);
    assert!(complete2);
}

#[tokio::test]
async fn commit_cycle_marks_delta_token_complete() {
    let store = setup().await;
    let d = drive();
    let token = DeltaToken::new("final-page".to_string()).unwrap();

    store
        .commit_cycle(&d, &[entry("a.txt", "item-1")], &[], Some(&token))
        .await
        .unwrap();

    let (stored, complete) = store.get_delta_token(&d).await.unwrap().unwrap();
    assert_eq!(stored, token);
    assert!(complete);
}

fn version(size: u64) -> VersionInfo {
    VersionInfo::new(None, size, Utc::now())
}

#[tokio::test]
async fn unresolved_conflicts_are_listed_until_resolved() {
    let store = setup().await;
    let d = drive();
    let mut conflict = ConflictRecord::detect(
        d.clone(),
        Some(ItemId::new("item-1".to_string()).unwrap()),
        SyncPath::new("shared.docx").unwrap(),
        ConflictType::EditEdit,
        version(10),
        version(20),
    );
    store.save_conflict(&conflict).await.unwrap();

    let unresolved = store.get_unresolved_conflicts(&d).await.unwrap();
    assert_eq!(unresolved.len(), 1);
    assert_eq!(unresolved[0].conflict_type, ConflictType::EditEdit);

    conflict.resolve(Resolution::KeepBoth, ResolvedBy::Auto);
    store.save_conflict(&conflict).await.unwrap();

    assert!(store.get_unresolved_conflicts(&d).await.unwrap().is_empty());
}

#[tokio::test]
async fn conflict_history_respects_since_and_limit() {
    let store = setup().await;
    let d = drive();
    for i in 0..3 {
        let conflict = ConflictRecord::detect(
            d.clone(),
            None,
            SyncPath::new(format!("file-{i}.txt")).unwrap(),
            ConflictType::CreateCreate,
            version(10),
            version(10),
        );
        store.save_conflict(&conflict).await.unwrap();
    }

    let history = store
        .get_conflict_history(&d, Utc::now() - chrono::Duration::hours(1), 2)
        .await
        .unwrap();
    assert_eq!(history.len(), 2);

    let none = store
        .get_conflict_history(&d, Utc::now() + chrono::Duration::hours(1), 10)
        .await
        .unwrap();
    assert!(none.is_empty());
}
