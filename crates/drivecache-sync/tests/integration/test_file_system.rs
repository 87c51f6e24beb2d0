//! FileSystem facade: lookups, listings, open/close and remote mutations

use std::collections::BTreeSet;

use drivecache_core::domain::{ContentHash, FileError};
use drivecache_core::ports::ServiceError;
use drivecache_core::util::{grand_root_path, my_drive_root_path, other_dir_path};
use drivecache_remote::fake::{
    FAKE_FILE_1_CONTENT, FAKE_LARGEST_CHANGESTAMP, FAKE_QUOTA_BYTES_TOTAL, FAKE_QUOTA_BYTES_USED,
};
use drivecache_sync::{AvailableSpace, SyncType};

use crate::common::{
    file_1_md5, id, path, read, Fixture, DIRECTORY_1_ID, DIRECTORY_1_PATH, FILE_1_ID, FILE_1_PATH,
    SLOW_DELAY_MS,
};

// ============================================================================
// Lookups
// ============================================================================

#[tokio::test]
async fn test_get_my_drive_root() {
    let fixture = Fixture::new().await;
    let fs = fixture.file_system(0).await;

    let entry = fs
        .get_resource_entry_by_path(&my_drive_root_path())
        .await
        .unwrap();
    assert_eq!(entry.resource_id, fixture.fake.root_resource_id());
    assert!(entry.is_directory);

    fs.loader().wait_until_idle().await;
    // One about for the load, one to learn the root id.
    assert_eq!(fixture.fake.about_resource_load_count(), 2);
    assert_eq!(fixture.fake.resource_list_load_count(), 1);
}

#[tokio::test]
async fn test_concurrent_lookups_share_loads() {
    let fixture = Fixture::new().await;
    let fs = fixture.file_system(0).await;
    let root = my_drive_root_path();

    let (a, b) = tokio::join!(
        fs.get_resource_entry_by_path(&root),
        fs.get_resource_entry_by_path(&root),
    );
    assert_eq!(a.unwrap().resource_id, b.unwrap().resource_id);

    fs.loader().wait_until_idle().await;
    assert_eq!(fixture.fake.about_resource_load_count(), 2);
    assert_eq!(fixture.fake.resource_list_load_count(), 1);
}

#[tokio::test]
async fn test_get_existing_file() {
    let fixture = Fixture::new().await;
    let fs = fixture.file_system(0).await;

    let entry = fs.get_resource_entry_by_path(&path(FILE_1_PATH)).await.unwrap();
    assert_eq!(entry.resource_id, id(FILE_1_ID));
    assert_eq!(entry.size, FAKE_FILE_1_CONTENT.len() as u64);
    assert_eq!(entry.md5, Some(file_1_md5()));

    fs.loader().wait_until_idle().await;
    assert_eq!(fixture.fake.about_resource_load_count(), 1);
    assert_eq!(fixture.fake.resource_list_load_count(), 1);
}

#[tokio::test]
async fn test_get_nonexistent_file() {
    let fixture = Fixture::new().await;
    let fs = fixture.file_system(0).await;

    let result = fs
        .get_resource_entry_by_path(&path("drive/root/Dummy file.txt"))
        .await;
    assert_eq!(result.unwrap_err(), FileError::NotFound);
}

#[tokio::test]
async fn test_get_entries_with_escaped_slash() {
    let fixture = Fixture::new().await;
    let fs = fixture.file_system(0).await;

    let file = fs
        .get_resource_entry_by_path(&path("drive/root/Slash \u{2215} in file 1.txt"))
        .await
        .unwrap();
    assert_eq!(file.title, "Slash / in file 1.txt");

    let nested = fs
        .get_resource_entry_by_path(&path(
            "drive/root/Slash \u{2215} in directory/Slash SubDir File.txt",
        ))
        .await
        .unwrap();
    assert_eq!(nested.resource_id, id("file:slash_subdir_file"));
}

#[tokio::test]
async fn test_read_my_drive() {
    let fixture = Fixture::new().await;
    let fs = fixture.file_system(0).await;

    let entries = fs.read_directory_by_path(&my_drive_root_path()).await.unwrap();

    let names: BTreeSet<String> = entries.iter().map(|e| e.base_name.clone()).collect();
    let expected: BTreeSet<String> = [
        "Directory 1",
        "Duplicate Name.txt",
        "Duplicate Name.txt (2)",
        "File 1.txt",
        "Slash \u{2215} in directory",
        "Slash \u{2215} in file 1.txt",
    ]
    .into_iter()
    .map(String::from)
    .collect();
    assert_eq!(names, expected);
}

#[tokio::test]
async fn test_read_grand_root_and_other() {
    let fixture = Fixture::new().await;
    let fs = fixture.file_system(0).await;

    let top = fs.read_directory_by_path(&grand_root_path()).await.unwrap();
    let names: BTreeSet<String> = top.iter().map(|e| e.base_name.clone()).collect();
    assert_eq!(names, BTreeSet::from(["other".to_string(), "root".to_string()]));

    fs.loader().wait_until_idle().await;
    let other = fs.read_directory_by_path(&other_dir_path()).await.unwrap();
    assert_eq!(other.len(), 1);
    assert_eq!(other[0].title, "Orphan File 1.txt");
}

#[tokio::test]
async fn test_read_directory_of_file_fails() {
    let fixture = Fixture::populated().await;
    let fs = fixture.file_system(0).await;

    let result = fs.read_directory_by_path(&path(FILE_1_PATH)).await;
    assert_eq!(result.unwrap_err(), FileError::NotADirectory);
}

#[tokio::test]
async fn test_up_to_date_cache_then_remote_change() {
    let fixture = Fixture::populated().await;
    let fs = fixture.file_system(0).await;

    let entries = fs.read_directory_by_path(&my_drive_root_path()).await.unwrap();
    assert_eq!(entries.len(), 6);
    fs.loader().wait_until_idle().await;
    assert_eq!(fixture.fake.about_resource_load_count(), 1);
    assert_eq!(fixture.fake.resource_list_load_count(), 0);

    fixture.fake.set_largest_changestamp(FAKE_LARGEST_CHANGESTAMP + 1);
    fs.check_for_updates().await.unwrap();

    assert_eq!(fixture.fake.about_resource_load_count(), 2);
    assert_eq!(fixture.fake.change_list_load_count(), 1);
    assert_eq!(fixture.fake.resource_list_load_count(), 0);
}

#[tokio::test]
async fn test_offline_reads_local_snapshot() {
    let fixture = Fixture::populated().await;
    fixture
        .metadata
        .set_largest_changestamp(FAKE_LARGEST_CHANGESTAMP - 100)
        .await
        .unwrap();
    fixture.fake.set_offline(true);
    let fs = fixture.file_system(0).await;

    let top = fs.read_directory_by_path(&grand_root_path()).await.unwrap();
    assert_eq!(top.len(), 2);
    fs.loader().wait_until_idle().await;

    let root = fs.read_directory_by_path(&my_drive_root_path()).await.unwrap();
    assert_eq!(root.len(), 6);
    assert_eq!(fixture.fake.about_resource_load_count(), 0);

    fixture.fake.set_offline(false);
    fs.check_for_updates().await.unwrap();
    assert_eq!(fixture.fake.about_resource_load_count(), 1);
    assert_eq!(fixture.fake.change_list_load_count(), 1);
    assert_eq!(
        fixture.metadata.get_largest_changestamp().await.unwrap(),
        FAKE_LARGEST_CHANGESTAMP
    );
}

#[tokio::test]
async fn test_stale_directory_is_fast_fetched() {
    let fixture = Fixture::populated().await;
    fixture.fake.set_largest_changestamp(FAKE_LARGEST_CHANGESTAMP + 100);
    let fs = fixture.file_system(0).await;

    let entries = fs.read_directory_by_path(&path(DIRECTORY_1_PATH)).await.unwrap();
    assert_eq!(entries.len(), 3);

    fs.loader().wait_until_idle().await;
    assert_eq!(fixture.fake.directory_load_count(), 1);
    assert_eq!(fixture.fake.change_list_load_count(), 1);
}

#[tokio::test]
async fn test_refresh_directory() {
    let fixture = Fixture::populated().await;
    let fs = fixture.file_system(0).await;
    fixture
        .fake
        .add_file(&id(DIRECTORY_1_ID), "Late Arrival.txt", b"late")
        .unwrap();

    fs.refresh_directory(&path(DIRECTORY_1_PATH)).await.unwrap();

    fixture
        .metadata
        .get_resource_entry_by_path(&path("drive/root/Directory 1/Late Arrival.txt"))
        .await
        .unwrap();

    let result = fs.refresh_directory(&path(FILE_1_PATH)).await;
    assert_eq!(result.unwrap_err(), FileError::NotADirectory);
}

// ============================================================================
// Cache state
// ============================================================================

#[tokio::test]
async fn test_pin_directory_fails() {
    let fixture = Fixture::populated().await;
    let fs = fixture.file_system(0).await;

    let result = fs.pin(&path(DIRECTORY_1_PATH)).await;
    assert_eq!(result.unwrap_err(), FileError::NotAFile);
}

#[tokio::test]
async fn test_unpin_unknown_fails() {
    let fixture = Fixture::populated().await;
    let fs = fixture.file_system(0).await;

    let result = fs.unpin(&path(FILE_1_PATH)).await;
    assert_eq!(result.unwrap_err(), FileError::NotFound);
}

#[tokio::test]
async fn test_open_edit_close_uploads() {
    let fixture = Fixture::populated().await;
    let fs = fixture.file_system(SLOW_DELAY_MS).await;
    let file_path = path(FILE_1_PATH);
    let resource_id = id(FILE_1_ID);

    let cache_path = fs.open_file(&file_path).await.unwrap();
    assert_eq!(read(&cache_path), FAKE_FILE_1_CONTENT);
    assert_eq!(fixture.fake.download_count(), 1);
    assert_eq!(fs.open_file(&file_path).await.unwrap_err(), FileError::InUse);

    let cached = fixture.cache.get_cache_entry(&resource_id, None).await.unwrap().unwrap();
    assert!(cached.is_dirty);

    let edited = b"Edited through the cache.";
    std::fs::write(&cache_path, edited).unwrap();
    fs.close_file(&file_path).await.unwrap();

    assert_eq!(fixture.fake.upload_count(), 1);
    assert_eq!(fixture.fake.content(&resource_id).unwrap(), edited);

    let new_md5 = ContentHash::md5_of(edited);
    let cached = fixture.cache.get_cache_entry(&resource_id, None).await.unwrap().unwrap();
    assert!(!cached.is_dirty);
    assert_eq!(cached.md5, new_md5);

    let entry = fixture.metadata.get_resource_entry_by_id(&resource_id).await.unwrap();
    assert_eq!(entry.md5, Some(new_md5));
    assert_eq!(entry.size, edited.len() as u64);

    assert_eq!(fs.close_file(&file_path).await.unwrap_err(), FileError::NotFound);
}

#[tokio::test]
async fn test_failed_upload_on_close_is_retried() {
    let fixture = Fixture::populated().await;
    let fs = fixture.file_system(SLOW_DELAY_MS).await;
    let file_path = path(FILE_1_PATH);
    let resource_id = id(FILE_1_ID);

    let cache_path = fs.open_file(&file_path).await.unwrap();
    let edited = b"Edited while offline.";
    std::fs::write(&cache_path, edited).unwrap();

    fixture.fake.set_offline(true);
    assert_eq!(
        fs.close_file(&file_path).await.unwrap_err(),
        FileError::Service(ServiceError::NoConnection)
    );
    assert_eq!(fs.sync_client().has_task(&resource_id), Some(SyncType::Upload));
    assert_eq!(fs.close_file(&file_path).await.unwrap_err(), FileError::NotFound);

    fixture.fake.set_offline(false);
    fs.sync_client().wait_for_idle().await;

    assert_eq!(fixture.fake.upload_count(), 1);
    assert_eq!(fixture.fake.content(&resource_id).unwrap(), edited);
    let cached = fixture.cache.get_cache_entry(&resource_id, None).await.unwrap().unwrap();
    assert!(!cached.is_dirty);
    assert_eq!(cached.md5, ContentHash::md5_of(edited));
}

#[tokio::test]
async fn test_pending_uploads_are_retried() {
    let fixture = Fixture::populated().await;
    let fs = fixture.file_system(0).await;
    let file_path = path(FILE_1_PATH);
    let resource_id = id(FILE_1_ID);

    let cache_path = fs.open_file(&file_path).await.unwrap();
    std::fs::write(&cache_path, b"Edited").unwrap();

    fixture.fake.set_offline(true);
    assert!(fs.close_file(&file_path).await.is_err());
    // The background retry fails too.
    fs.sync_client().wait_for_idle().await;
    assert_eq!(fs.sync_client().has_task(&resource_id), None);
    assert!(fixture.cache.get_cache_entry(&resource_id, None).await.unwrap().unwrap().is_dirty);

    fixture.fake.set_offline(false);
    assert_eq!(fs.retry_pending_uploads().await.unwrap(), 1);
    fs.sync_client().wait_for_idle().await;

    assert_eq!(fixture.fake.upload_count(), 1);
    assert!(!fixture.cache.get_cache_entry(&resource_id, None).await.unwrap().unwrap().is_dirty);
    assert_eq!(fs.retry_pending_uploads().await.unwrap(), 0);
}

#[tokio::test]
async fn test_reopen_cancels_pending_upload() {
    let fixture = Fixture::populated().await;
    let fs = fixture.file_system(SLOW_DELAY_MS).await;
    let file_path = path(FILE_1_PATH);
    let resource_id = id(FILE_1_ID);

    let cache_path = fs.open_file(&file_path).await.unwrap();
    std::fs::write(&cache_path, b"First edit").unwrap();
    fixture.fake.set_offline(true);
    assert!(fs.close_file(&file_path).await.is_err());
    fixture.fake.set_offline(false);

    let cache_path = fs.open_file(&file_path).await.unwrap();
    assert_eq!(fs.sync_client().has_task(&resource_id), None);
    assert_eq!(fs.retry_pending_uploads().await.unwrap(), 0);
    fs.sync_client().wait_for_idle().await;
    assert_eq!(fixture.fake.upload_count(), 0);

    let edited = b"Second edit";
    std::fs::write(&cache_path, edited).unwrap();
    fs.close_file(&file_path).await.unwrap();
    assert_eq!(fixture.fake.upload_count(), 1);
    assert_eq!(fixture.fake.content(&resource_id).unwrap(), edited);
}

#[tokio::test]
async fn test_open_uses_cached_blob() {
    let fixture = Fixture::populated().await;
    let resource_id = id(FILE_1_ID);
    fixture.store(&resource_id, &file_1_md5(), FAKE_FILE_1_CONTENT).await;
    let fs = fixture.file_system(SLOW_DELAY_MS).await;

    let cache_path = fs.open_file(&path(FILE_1_PATH)).await.unwrap();

    assert_eq!(read(&cache_path), FAKE_FILE_1_CONTENT);
    assert_eq!(fixture.fake.download_count(), 0);
}

#[tokio::test]
async fn test_open_offline_releases_handle() {
    let fixture = Fixture::populated().await;
    let fs = fixture.file_system(SLOW_DELAY_MS).await;
    let file_path = path(FILE_1_PATH);

    fixture.fake.set_offline(true);
    assert!(fs.open_file(&file_path).await.is_err());

    fixture.fake.set_offline(false);
    fs.open_file(&file_path).await.unwrap();
}

#[tokio::test]
async fn test_mount_and_unmount_cache_file() {
    let fixture = Fixture::populated().await;
    let resource_id = id(FILE_1_ID);
    fixture.store(&resource_id, &file_1_md5(), FAKE_FILE_1_CONTENT).await;
    let fs = fixture.file_system(0).await;
    let file_path = path(FILE_1_PATH);

    let mounted = fs.mark_cache_file_as_mounted(&file_path).await.unwrap();
    assert_eq!(read(&mounted), FAKE_FILE_1_CONTENT);
    assert_eq!(
        fs.mark_cache_file_as_mounted(&file_path).await.unwrap_err(),
        FileError::InUse
    );

    fs.mark_cache_file_as_unmounted(&mounted).await.unwrap();
    assert_eq!(
        fs.mark_cache_file_as_unmounted(&mounted).await.unwrap_err(),
        FileError::InvalidOperation
    );
}

// ============================================================================
// Remote mutations
// ============================================================================

#[tokio::test]
async fn test_get_available_space() {
    let fixture = Fixture::new().await;
    let fs = fixture.file_system(0).await;

    let space = fs.get_available_space().await.unwrap();
    assert_eq!(
        space,
        AvailableSpace {
            bytes_total: FAKE_QUOTA_BYTES_TOTAL,
            bytes_used: FAKE_QUOTA_BYTES_USED,
        }
    );
}

#[tokio::test]
async fn test_create_directory() {
    let fixture = Fixture::populated().await;
    let fs = fixture.file_system(0).await;
    let new_dir = path("drive/root/New Directory");

    fs.create_directory(&new_dir, true, false).await.unwrap();

    let entry = fs.get_resource_entry_by_path(&new_dir).await.unwrap();
    assert!(entry.is_directory);
    let remote = fixture.fake.entry(&entry.resource_id).unwrap();
    assert_eq!(remote.parent_resource_id, Some(fixture.fake.root_resource_id()));

    assert_eq!(
        fs.create_directory(&new_dir, true, false).await.unwrap_err(),
        FileError::Exists
    );
    fs.create_directory(&new_dir, false, false).await.unwrap();
}

#[tokio::test]
async fn test_create_directory_over_file_fails() {
    let fixture = Fixture::populated().await;
    let fs = fixture.file_system(0).await;

    let result = fs.create_directory(&path(FILE_1_PATH), false, false).await;
    assert_eq!(result.unwrap_err(), FileError::Exists);
}

#[tokio::test]
async fn test_create_directory_recursive() {
    let fixture = Fixture::populated().await;
    let fs = fixture.file_system(0).await;
    let nested = path("drive/root/Outer/Inner \u{2215} Slashed");

    assert_eq!(
        fs.create_directory(&nested, false, false).await.unwrap_err(),
        FileError::NotFound
    );

    fs.create_directory(&nested, false, true).await.unwrap();

    let outer = fs.get_resource_entry_by_path(&path("drive/root/Outer")).await.unwrap();
    let inner = fs.get_resource_entry_by_path(&nested).await.unwrap();
    assert_eq!(inner.parent_resource_id, Some(outer.resource_id));
    assert_eq!(inner.title, "Inner / Slashed");
}

#[tokio::test]
async fn test_create_directory_outside_my_drive_fails() {
    let fixture = Fixture::populated().await;
    let fs = fixture.file_system(0).await;

    let result = fs.create_directory(&path("drive/other/Nope"), false, false).await;
    assert_eq!(result.unwrap_err(), FileError::InvalidOperation);
}

#[tokio::test]
async fn test_remove_file_drops_cached_blob() {
    let fixture = Fixture::populated().await;
    let resource_id = id(FILE_1_ID);
    fixture.store(&resource_id, &file_1_md5(), FAKE_FILE_1_CONTENT).await;
    let fs = fixture.file_system(0).await;

    fs.remove(&path(FILE_1_PATH), false).await.unwrap();

    assert!(fixture.fake.entry(&resource_id).unwrap().is_deleted);
    assert_eq!(
        fixture.metadata.get_resource_entry_by_id(&resource_id).await.unwrap_err(),
        FileError::NotFound
    );
    assert!(fixture
        .cache
        .get_cache_entry(&resource_id, None)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_remove_non_empty_directory() {
    let fixture = Fixture::populated().await;
    let fs = fixture.file_system(0).await;
    let dir = path(DIRECTORY_1_PATH);

    assert_eq!(fs.remove(&dir, false).await.unwrap_err(), FileError::NotEmpty);
    fs.remove(&dir, true).await.unwrap();

    assert_eq!(
        fixture
            .metadata
            .get_resource_entry_by_path(&path("drive/root/Directory 1/SubDirectory File 1.txt"))
            .await
            .unwrap_err(),
        FileError::NotFound
    );
    assert!(fixture.fake.entry(&id(DIRECTORY_1_ID)).unwrap().is_deleted);
}

#[tokio::test]
async fn test_remove_with_mounted_blob_is_in_use() {
    let fixture = Fixture::populated().await;
    let fs = fixture.file_system(0).await;
    let dir = path(DIRECTORY_1_PATH);
    let sub_file = path("drive/root/Directory 1/SubDirectory File 1.txt");
    let sub_file_id = fs.get_resource_entry_by_path(&sub_file).await.unwrap().resource_id;
    fixture.store(&sub_file_id, &file_1_md5(), b"mounted").await;

    let mounted = fs.mark_cache_file_as_mounted(&sub_file).await.unwrap();
    assert_eq!(fs.remove(&dir, true).await.unwrap_err(), FileError::InUse);
    assert!(!fixture.fake.entry(&id(DIRECTORY_1_ID)).unwrap().is_deleted);
    assert!(fixture.metadata.get_resource_entry_by_path(&sub_file).await.is_ok());

    fs.mark_cache_file_as_unmounted(&mounted).await.unwrap();
    fs.remove(&dir, true).await.unwrap();
    assert!(fixture.fake.entry(&id(DIRECTORY_1_ID)).unwrap().is_deleted);
    assert_eq!(fixture.cache.get_cache_entry(&sub_file_id, None).await.unwrap(), None);
}

#[tokio::test]
async fn test_remove_special_directories_fails() {
    let fixture = Fixture::populated().await;
    let fs = fixture.file_system(0).await;

    for special in [grand_root_path(), my_drive_root_path(), other_dir_path()] {
        assert_eq!(
            fs.remove(&special, true).await.unwrap_err(),
            FileError::InvalidOperation
        );
    }
}
