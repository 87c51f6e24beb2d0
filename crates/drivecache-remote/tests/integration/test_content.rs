//! Content download and upload, directory creation and deletion

use wiremock::matchers::{body_bytes, body_string_contains, method, path, query_param};
use wiremock::{Mock, ResponseTemplate};

use drivecache_core::domain::ResourceId;
use drivecache_core::ports::IDriveService;

use crate::common;

#[tokio::test]
async fn test_download_file() {
    let (server, client) = common::setup_drive_mock().await;
    Mock::given(method("GET"))
        .and(path("/files/file:1"))
        .and(query_param("alt", "media"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"This is some test content.".to_vec())
                .append_header("Content-Type", "application/octet-stream"),
        )
        .mount(&server)
        .await;

    let content = client
        .download_file(&ResourceId::new("file:1").unwrap())
        .await
        .expect("download failed");

    assert_eq!(content, b"This is some test content.");
}

#[tokio::test]
async fn test_upload_existing_file() {
    let (server, client) = common::setup_drive_mock().await;
    Mock::given(method("PUT"))
        .and(path("/upload/files/file:1"))
        .and(query_param("uploadType", "media"))
        .and(body_bytes(b"new content".to_vec()))
        .respond_with(ResponseTemplate::new(200).set_body_json(common::file_json(
            "file:1",
            "File 1.txt",
            "folder:root",
            11,
            "f8a9b4ea1b3d1ba7b2d1e1bd0bfb46f1",
        )))
        .expect(1)
        .mount(&server)
        .await;

    let entry = client
        .upload_existing_file(&ResourceId::new("file:1").unwrap(), b"new content".to_vec())
        .await
        .expect("upload failed");

    assert_eq!(entry.size, 11);
    assert_eq!(entry.md5.unwrap().as_str(), "f8a9b4ea1b3d1ba7b2d1e1bd0bfb46f1");
    assert_eq!(entry.changestamp, 654321);
}

#[tokio::test]
async fn test_add_new_directory() {
    let (server, client) = common::setup_drive_mock().await;
    Mock::given(method("POST"))
        .and(path("/files"))
        .and(body_string_contains("\"title\":\"New Folder\""))
        .and(body_string_contains(common::FOLDER_MIME))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(common::folder_json("folder:new", "New Folder", "folder:root")),
        )
        .expect(1)
        .mount(&server)
        .await;

    let entry = client
        .add_new_directory(&ResourceId::new("folder:root").unwrap(), "New Folder")
        .await
        .expect("add_new_directory failed");

    assert!(entry.is_directory);
    assert_eq!(entry.resource_id.as_str(), "folder:new");
}

#[tokio::test]
async fn test_delete_resource_trashes() {
    let (server, client) = common::setup_drive_mock().await;
    Mock::given(method("POST"))
        .and(path("/files/file:1/trash"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
        .expect(1)
        .mount(&server)
        .await;

    client
        .delete_resource(&ResourceId::new("file:1").unwrap())
        .await
        .expect("delete failed");
}
