//! Shared test helpers for Drive API integration tests
//!
//! Each helper mounts the endpoints a test needs on a wiremock server; the
//! client returned by [`setup_drive_mock`] points both of its base URLs at
//! that server (uploads under `/upload`).

use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use drivecache_remote::client::DriveApiClient;

pub const FOLDER_MIME: &str = "application/vnd.google-apps.folder";

/// Starts a mock server with GET /about mounted and returns a client for it
///
/// The about resource reports change log head 654321 and My Drive root
/// `folder:root`.
pub async fn setup_drive_mock() -> (MockServer, DriveApiClient) {
    let server = MockServer::start().await;
    mount_about(&server, 654321).await;

    let client = DriveApiClient::with_base_url(
        "test-access-token",
        server.uri(),
        format!("{}/upload", server.uri()),
    );
    (server, client)
}

/// Mounts GET /about reporting the given change log head
pub async fn mount_about(server: &MockServer, largest_change_id: i64) {
    Mock::given(method("GET"))
        .and(path("/about"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "kind": "drive#about",
            "largestChangeId": largest_change_id.to_string(),
            "rootFolderId": "folder:root",
            "quotaBytesTotal": "9876543210",
            "quotaBytesUsed": "6789012345"
        })))
        .mount(server)
        .await;
}

/// A file resource as the API returns it
pub fn file_json(id: &str, title: &str, parent: &str, size: u64, md5: &str) -> serde_json::Value {
    serde_json::json!({
        "kind": "drive#file",
        "id": id,
        "title": title,
        "mimeType": "text/plain",
        "parents": [{ "id": parent, "isRoot": parent == "folder:root" }],
        "fileSize": size.to_string(),
        "md5Checksum": md5,
        "labels": { "trashed": false },
        "modifiedDate": "2026-01-15T10:30:00.000Z"
    })
}

/// A folder resource as the API returns it
pub fn folder_json(id: &str, title: &str, parent: &str) -> serde_json::Value {
    serde_json::json!({
        "kind": "drive#file",
        "id": id,
        "title": title,
        "mimeType": FOLDER_MIME,
        "parents": [{ "id": parent }],
        "labels": { "trashed": false }
    })
}

/// Mounts GET /files returning two pages
///
/// The first request gets `page1` and a `nextPageToken`; the request
/// carrying that token gets `page2`.
pub async fn mount_files_paginated(
    server: &MockServer,
    page1: serde_json::Value,
    page2: serde_json::Value,
) {
    Mock::given(method("GET"))
        .and(path("/files"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "kind": "drive#fileList",
            "items": page1,
            "nextPageToken": "page2"
        })))
        .up_to_n_times(1)
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/files"))
        .and(query_param("pageToken", "page2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "kind": "drive#fileList",
            "items": page2
        })))
        .mount(server)
        .await;
}
