//! UpdateOperation: upload of dirty cache entries

use std::sync::Arc;

use drivecache_core::domain::{ContentHash, FileError};
use drivecache_core::ports::ServiceError;
use drivecache_remote::fake::{FAKE_FILE_1_CONTENT, FAKE_LARGEST_CHANGESTAMP};
use drivecache_sync::{ClientContext, UpdateOperation};

use crate::common::{file_1_md5, id, Fixture, DIRECTORY_1_ID, FILE_1_ID};

fn operation(fixture: &Fixture) -> UpdateOperation {
    UpdateOperation::new(
        Arc::clone(&fixture.metadata),
        fixture.cache.clone(),
        fixture.service(),
    )
}

/// Stores file 1, marks it dirty and overwrites the blob with `content`
async fn edit_file_1(fixture: &Fixture, content: &[u8]) {
    let resource_id = id(FILE_1_ID);
    fixture.store(&resource_id, &file_1_md5(), FAKE_FILE_1_CONTENT).await;
    fixture.cache.mark_dirty(&resource_id, &file_1_md5()).await.unwrap();
    let blob = fixture.cache.get_file(&resource_id, None).await.unwrap();
    std::fs::write(blob, content).unwrap();
}

#[tokio::test]
async fn test_update_uploads_dirty_file() {
    let fixture = Fixture::populated().await;
    let resource_id = id(FILE_1_ID);
    let content = b"Hello, world!";
    edit_file_1(&fixture, content).await;

    operation(&fixture)
        .update_file_by_resource_id(&resource_id, ClientContext::User)
        .await
        .unwrap();

    assert_eq!(fixture.fake.upload_count(), 1);
    assert_eq!(fixture.fake.content(&resource_id).unwrap(), content);

    let new_md5 = ContentHash::md5_of(content);
    let entry = fixture.metadata.get_resource_entry_by_id(&resource_id).await.unwrap();
    assert_eq!(entry.size, content.len() as u64);
    assert_eq!(entry.md5, Some(new_md5.clone()));
    assert_eq!(entry.changestamp, FAKE_LARGEST_CHANGESTAMP + 1);

    let cached = fixture.cache.get_cache_entry(&resource_id, None).await.unwrap().unwrap();
    assert!(!cached.is_dirty);
    assert!(cached.is_present);
    assert_eq!(cached.md5, new_md5);
}

#[tokio::test]
async fn test_update_of_clean_file_is_noop() {
    let fixture = Fixture::populated().await;
    let resource_id = id(FILE_1_ID);
    fixture.store(&resource_id, &file_1_md5(), FAKE_FILE_1_CONTENT).await;

    operation(&fixture)
        .update_file_by_resource_id(&resource_id, ClientContext::Background)
        .await
        .unwrap();

    assert_eq!(fixture.fake.upload_count(), 0);
}

#[tokio::test]
async fn test_update_of_directory_fails() {
    let fixture = Fixture::populated().await;

    let result = operation(&fixture)
        .update_file_by_resource_id(&id(DIRECTORY_1_ID), ClientContext::User)
        .await;
    assert_eq!(result.unwrap_err(), FileError::NotAFile);
}

#[tokio::test]
async fn test_update_of_unknown_id_fails() {
    let fixture = Fixture::populated().await;

    let result = operation(&fixture)
        .update_file_by_resource_id(&id("file:does_not_exist"), ClientContext::User)
        .await;
    assert_eq!(result.unwrap_err(), FileError::NotFound);
}

#[tokio::test]
async fn test_failed_upload_keeps_entry_dirty() {
    let fixture = Fixture::populated().await;
    let resource_id = id(FILE_1_ID);
    edit_file_1(&fixture, b"Not yet uploaded").await;
    fixture.fake.set_offline(true);

    let result = operation(&fixture)
        .update_file_by_resource_id(&resource_id, ClientContext::User)
        .await;

    assert_eq!(
        result.unwrap_err(),
        FileError::Service(ServiceError::NoConnection)
    );
    let cached = fixture.cache.get_cache_entry(&resource_id, None).await.unwrap().unwrap();
    assert!(cached.is_dirty);
    let entry = fixture.metadata.get_resource_entry_by_id(&resource_id).await.unwrap();
    assert_eq!(entry.md5, Some(file_1_md5()));
}
