//! Resource listings and the change log

use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, ResponseTemplate};

use drivecache_core::domain::ResourceId;
use drivecache_core::ports::IDriveService;

use crate::common;

const MD5: &str = "3b4382ebefec6e743578c76bbd0575ce";

#[tokio::test]
async fn test_full_listing_follows_pagination() {
    let (server, client) = common::setup_drive_mock().await;
    common::mount_files_paginated(
        &server,
        serde_json::json!([
            common::file_json("file:1", "File 1.txt", "folder:root", 26, MD5),
            common::folder_json("folder:1", "Directory 1", "folder:root"),
        ]),
        serde_json::json!([common::file_json("file:2", "Inner.txt", "folder:1", 3, MD5)]),
    )
    .await;

    let list = client
        .get_resource_list(None)
        .await
        .expect("get_resource_list failed");

    assert_eq!(list.largest_changestamp, 654321);
    assert_eq!(list.entries.len(), 3);
    assert_eq!(list.entries[0].title, "File 1.txt");
    assert_eq!(list.entries[0].size, 26);
    assert!(list.entries[1].is_directory);
    assert_eq!(
        list.entries[2].parent_resource_id.as_ref().map(ResourceId::as_str),
        Some("folder:1")
    );
}

#[tokio::test]
async fn test_directory_listing_queries_parent() {
    let (server, client) = common::setup_drive_mock().await;
    Mock::given(method("GET"))
        .and(path("/files"))
        .and(query_param("q", "'folder:1' in parents and trashed = false"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "items": [common::file_json("file:2", "Inner.txt", "folder:1", 3, MD5)]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = ResourceId::new("folder:1").unwrap();
    let list = client
        .get_resource_list(Some(&dir))
        .await
        .expect("directory listing failed");

    assert_eq!(list.entries.len(), 1);
    assert_eq!(list.entries[0].title, "Inner.txt");
}

#[tokio::test]
async fn test_change_list_maps_changes() {
    let (server, client) = common::setup_drive_mock().await;
    Mock::given(method("GET"))
        .and(path("/changes"))
        .and(query_param("startChangeId", "654322"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "kind": "drive#changeList",
            "largestChangeId": "654324",
            "items": [
                {
                    "id": "654323",
                    "fileId": "file:1",
                    "deleted": false,
                    "file": common::file_json("file:1", "Renamed.txt", "folder:root", 5, MD5)
                },
                { "id": "654324", "fileId": "file:gone", "deleted": true }
            ]
        })))
        .mount(&server)
        .await;

    let list = client
        .get_change_list(654322)
        .await
        .expect("get_change_list failed");

    assert_eq!(list.largest_changestamp, 654324);
    assert_eq!(list.entries.len(), 2);
    assert_eq!(list.entries[0].title, "Renamed.txt");
    assert_eq!(list.entries[0].changestamp, 654323);
    assert!(!list.entries[0].is_deleted);
    assert!(list.entries[1].is_deleted);
    assert_eq!(list.entries[1].resource_id.as_str(), "file:gone");
}

#[tokio::test]
async fn test_empty_change_list_keeps_position() {
    let (server, client) = common::setup_drive_mock().await;
    Mock::given(method("GET"))
        .and(path("/changes"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "items": [],
            "largestChangeId": "654321"
        })))
        .mount(&server)
        .await;

    let list = client.get_change_list(654322).await.expect("empty delta failed");

    assert!(list.entries.is_empty());
    assert_eq!(list.largest_changestamp, 654321);
}

#[tokio::test]
async fn test_get_resource_entry() {
    let (server, client) = common::setup_drive_mock().await;
    Mock::given(method("GET"))
        .and(path("/files/file:1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(common::file_json("file:1", "File 1.txt", "folder:root", 26, MD5)),
        )
        .mount(&server)
        .await;

    let entry = client
        .get_resource_entry(&ResourceId::new("file:1").unwrap())
        .await
        .expect("get_resource_entry failed");

    assert_eq!(entry.title, "File 1.txt");
    assert_eq!(entry.md5.unwrap().as_str(), MD5);
}
