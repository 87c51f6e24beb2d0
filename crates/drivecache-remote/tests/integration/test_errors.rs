//! HTTP failures map onto ServiceError

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use drivecache_core::domain::ResourceId;
use drivecache_core::ports::{IDriveService, ServiceError};
use drivecache_remote::client::DriveApiClient;

use crate::common;

#[tokio::test]
async fn test_404_maps_to_not_found() {
    let (server, client) = common::setup_drive_mock().await;
    Mock::given(method("GET"))
        .and(path("/files/file:missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = client
        .get_resource_entry(&ResourceId::new("file:missing").unwrap())
        .await
        .unwrap_err();
    assert_eq!(err, ServiceError::NotFound);
}

#[tokio::test]
async fn test_412_maps_to_precondition_failed() {
    let (server, client) = common::setup_drive_mock().await;
    Mock::given(method("PUT"))
        .and(path("/upload/files/file:1"))
        .respond_with(ResponseTemplate::new(412))
        .mount(&server)
        .await;

    let err = client
        .upload_existing_file(&ResourceId::new("file:1").unwrap(), Vec::new())
        .await
        .unwrap_err();
    assert_eq!(err, ServiceError::PreconditionFailed);
}

#[tokio::test]
async fn test_server_error_keeps_status_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/about"))
        .respond_with(ResponseTemplate::new(503).set_body_string("backend unavailable"))
        .mount(&server)
        .await;

    let client = DriveApiClient::with_base_url("token", server.uri(), server.uri());
    let err = client.get_about_resource().await.unwrap_err();
    assert_eq!(
        err,
        ServiceError::Http {
            status: 503,
            message: "backend unavailable".to_string()
        }
    );
}

#[tokio::test]
async fn test_malformed_body_is_invalid_response() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/about"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let client = DriveApiClient::with_base_url("token", server.uri(), server.uri());
    let err = client.get_about_resource().await.unwrap_err();
    assert!(matches!(err, ServiceError::InvalidResponse(_)));
}

#[tokio::test]
async fn test_unreachable_server_is_no_connection() {
    // Port 9 (discard) on localhost is not expected to accept HTTP.
    let client = DriveApiClient::with_base_url("token", "http://127.0.0.1:9", "http://127.0.0.1:9");
    let err = client.get_about_resource().await.unwrap_err();
    assert_eq!(err, ServiceError::NoConnection);
}
