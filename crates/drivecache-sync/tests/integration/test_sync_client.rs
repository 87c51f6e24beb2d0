//! SyncClient: pin-driven fetches, cancellation and backlog processing

use std::path::{Path, PathBuf};
use std::time::Duration;

use drivecache_core::domain::ContentHash;
use drivecache_remote::fake::FAKE_FILE_1_CONTENT;
use drivecache_sync::SyncType;

use crate::common::{file_1_md5, id, path, read, Fixture, FILE_1_ID, FILE_1_PATH, SLOW_DELAY_MS};

#[tokio::test]
async fn test_pin_fetches_file() {
    let fixture = Fixture::populated().await;
    let fs = fixture.file_system(0).await;
    let resource_id = id(FILE_1_ID);

    fs.pin(&path(FILE_1_PATH)).await.unwrap();
    fs.sync_client().wait_for_idle().await;

    assert_eq!(fixture.fake.download_count(), 1);
    let cached = fixture
        .cache
        .get_cache_entry(&resource_id, Some(&file_1_md5()))
        .await
        .unwrap()
        .unwrap();
    assert!(cached.is_present);
    assert!(cached.is_pinned);

    let blob = fixture.cache.get_file(&resource_id, Some(&file_1_md5())).await.unwrap();
    assert_eq!(read(&blob), FAKE_FILE_1_CONTENT);
    assert_eq!(fs.sync_client().has_task(&resource_id), None);
}

#[tokio::test]
async fn test_pin_of_cached_file_skips_download() {
    let fixture = Fixture::populated().await;
    let resource_id = id(FILE_1_ID);
    fixture.store(&resource_id, &file_1_md5(), FAKE_FILE_1_CONTENT).await;
    let fs = fixture.file_system(0).await;

    fs.pin(&path(FILE_1_PATH)).await.unwrap();
    fs.sync_client().wait_for_idle().await;

    assert_eq!(fixture.fake.download_count(), 0);
}

#[tokio::test]
async fn test_unpin_before_delay_cancels_fetch() {
    let fixture = Fixture::populated().await;
    let fs = fixture.file_system(SLOW_DELAY_MS).await;
    let resource_id = id(FILE_1_ID);

    fs.pin(&path(FILE_1_PATH)).await.unwrap();
    assert_eq!(fs.sync_client().has_task(&resource_id), Some(SyncType::Fetch));

    fs.unpin(&path(FILE_1_PATH)).await.unwrap();
    assert_eq!(fs.sync_client().has_task(&resource_id), None);

    fs.sync_client().wait_for_idle().await;
    assert_eq!(fixture.fake.download_count(), 0);
    let cached = fixture.cache.get_cache_entry(&resource_id, None).await.unwrap();
    assert!(!cached.is_some_and(|e| e.is_present));
}

#[tokio::test]
async fn test_unpin_during_download_cancels_fetch() {
    let fixture = Fixture::populated().await;
    let fs = fixture.file_system(0).await;
    let resource_id = id(FILE_1_ID);

    fixture.fake.set_downloads_held(true);
    fs.pin(&path(FILE_1_PATH)).await.unwrap();
    fixture.fake.wait_for_held_download().await;
    assert_eq!(fs.sync_client().has_task(&resource_id), Some(SyncType::Fetch));

    fs.unpin(&path(FILE_1_PATH)).await.unwrap();
    fixture.fake.set_downloads_held(false);
    fs.sync_client().wait_for_idle().await;

    assert_eq!(fs.sync_client().has_task(&resource_id), None);
    assert_eq!(fixture.cache.get_cache_entry(&resource_id, None).await.unwrap(), None);
    assert!(blob_files(&fixture.cache.root().join("files")).is_empty());
    assert!(std::fs::read_dir(fixture.cache.root().join("tmp")).unwrap().next().is_none());
}

#[tokio::test]
async fn test_duplicate_tasks_are_dropped() {
    let fixture = Fixture::populated().await;
    let fs = fixture.file_system(SLOW_DELAY_MS).await;
    let resource_id = id(FILE_1_ID);

    fs.pin(&path(FILE_1_PATH)).await.unwrap();
    fs.sync_client().add_fetch_task(&resource_id);
    fs.sync_client().add_upload_task(&resource_id);
    assert_eq!(fs.sync_client().has_task(&resource_id), Some(SyncType::Fetch));

    fs.sync_client().wait_for_idle().await;
    assert_eq!(fixture.fake.download_count(), 1);
    assert_eq!(fixture.fake.upload_count(), 0);
}

#[tokio::test]
async fn test_set_delay() {
    let fixture = Fixture::populated().await;
    let fs = fixture.file_system(SLOW_DELAY_MS).await;

    fs.sync_client().set_delay(Duration::from_millis(5));
    assert_eq!(fs.sync_client().delay(), Duration::from_millis(5));
}

#[tokio::test]
async fn test_cancel_all() {
    let fixture = Fixture::populated().await;
    let fs = fixture.file_system(SLOW_DELAY_MS).await;
    let resource_id = id(FILE_1_ID);

    fs.pin(&path(FILE_1_PATH)).await.unwrap();
    fs.sync_client().cancel_all();
    fs.sync_client().wait_for_idle().await;

    assert_eq!(fs.sync_client().has_task(&resource_id), None);
    assert_eq!(fixture.fake.download_count(), 0);
}

#[tokio::test]
async fn test_backlog_fetches_pinned_and_uploads_dirty() {
    let fixture = Fixture::populated().await;
    let pinned = id(FILE_1_ID);
    let dirty = id("file:subdirectory_file_1_id");

    // State left by a previous run: a pin whose fetch never ran and an
    // edit that was never uploaded.
    fixture.cache.pin(&pinned, &file_1_md5()).await.unwrap();
    let dirty_md5 = ContentHash::md5_of(b"Sub directory content");
    fixture.store(&dirty, &dirty_md5, b"Sub directory content").await;
    fixture.cache.mark_dirty(&dirty, &dirty_md5).await.unwrap();
    let blob = fixture.cache.get_file(&dirty, None).await.unwrap();
    std::fs::write(&blob, b"Edited offline").unwrap();

    let fs = fixture.file_system(0).await;
    fs.sync_client().start_processing_backlog().await.unwrap();
    fs.sync_client().wait_for_idle().await;

    assert_eq!(fixture.fake.download_count(), 1);
    assert!(fixture
        .cache
        .get_cache_entry(&pinned, None)
        .await
        .unwrap()
        .unwrap()
        .is_present);

    assert_eq!(fixture.fake.upload_count(), 1);
    assert_eq!(fixture.fake.content(&dirty).unwrap(), b"Edited offline");
    let cached = fixture.cache.get_cache_entry(&dirty, None).await.unwrap().unwrap();
    assert!(!cached.is_dirty);
    assert_eq!(cached.md5, ContentHash::md5_of(b"Edited offline"));
}

#[tokio::test]
async fn test_stale_pinned_file_is_refetched() {
    let fixture = Fixture::populated().await;
    let resource_id = id(FILE_1_ID);
    let old_md5 = ContentHash::md5_of(b"An older revision");
    fixture.store(&resource_id, &old_md5, b"An older revision").await;
    fixture.cache.pin(&resource_id, &old_md5).await.unwrap();

    let fs = fixture.file_system(0).await;
    fs.sync_client()
        .start_checking_existing_pinned_files()
        .await
        .unwrap();
    fs.sync_client().wait_for_idle().await;

    assert_eq!(fixture.fake.download_count(), 1);
    let cached = fixture.cache.get_cache_entry(&resource_id, None).await.unwrap().unwrap();
    assert_eq!(cached.md5, file_1_md5());
    assert!(cached.is_pinned);
    let blob = fixture.cache.get_file(&resource_id, None).await.unwrap();
    assert_eq!(read(&blob), FAKE_FILE_1_CONTENT);
}

#[tokio::test]
async fn test_up_to_date_pinned_file_is_left_alone() {
    let fixture = Fixture::populated().await;
    let resource_id = id(FILE_1_ID);
    fixture.store(&resource_id, &file_1_md5(), FAKE_FILE_1_CONTENT).await;
    fixture.cache.pin(&resource_id, &file_1_md5()).await.unwrap();

    let fs = fixture.file_system(0).await;
    fs.sync_client()
        .start_checking_existing_pinned_files()
        .await
        .unwrap();
    fs.sync_client().wait_for_idle().await;

    assert_eq!(fixture.fake.download_count(), 0);
}

/// Every regular file below `dir`
fn blob_files(dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let Ok(entries) = std::fs::read_dir(dir) else {
        return files;
    };
    for entry in entries {
        let path = entry.unwrap().path();
        if path.is_dir() {
            files.extend(blob_files(&path));
        } else {
            files.push(path);
        }
    }
    files
}
