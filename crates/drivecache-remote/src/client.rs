//! Drive API client
//!
//! Typed HTTP client for a Drive v2 style JSON API. Handles the bearer
//! header, URL construction, pagination and the mapping of HTTP failures onto
//! [`ServiceError`].
//!
//! ## Usage
//!
//! ```rust,no_run
//! use drivecache_core::ports::IDriveService;
//! use drivecache_remote::client::DriveApiClient;
//!
//! # async fn example() -> Result<(), drivecache_core::ports::ServiceError> {
//! let client = DriveApiClient::new("access-token-here");
//! let about = client.get_about_resource().await?;
//! println!("change log head: {}", about.largest_changestamp);
//! # Ok(())
//! # }
//! ```

use drivecache_core::domain::ResourceId;
use drivecache_core::ports::{
    AboutResource, IDriveService, RemoteEntry, ResourceList, ServiceError,
};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::resources::{
    AboutResponse, ChangeListResponse, FileListResponse, FileResource, FOLDER_MIME_TYPE,
};

/// Base URL for metadata requests
const DRIVE_BASE_URL: &str = "https://www.googleapis.com/drive/v2";

/// Base URL for content uploads
const DRIVE_UPLOAD_URL: &str = "https://www.googleapis.com/upload/drive/v2";

/// Page size requested from listing endpoints
const MAX_RESULTS: &str = "500";

// ============================================================================
// Error mapping
// ============================================================================

/// Maps a transport-level failure
fn map_send_error(e: reqwest::Error) -> ServiceError {
    if e.is_connect() || e.is_timeout() || e.is_request() {
        ServiceError::NoConnection
    } else {
        ServiceError::InvalidResponse(e.to_string())
    }
}

/// Passes a successful response through and maps everything else
async fn check_status(response: Response) -> Result<Response, ServiceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    match status {
        StatusCode::NOT_FOUND => Err(ServiceError::NotFound),
        StatusCode::PRECONDITION_FAILED => Err(ServiceError::PreconditionFailed),
        _ => {
            let message = response
                .text()
                .await
                .ok()
                .filter(|body| !body.is_empty())
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("").to_string());
            warn!(status = status.as_u16(), "Drive API request failed");
            Err(ServiceError::Http {
                status: status.as_u16(),
                message,
            })
        }
    }
}

// ============================================================================
// DriveApiClient
// ============================================================================

/// HTTP client for the Drive API
///
/// Wraps `reqwest::Client` with the bearer token and the two base URLs
/// (metadata and upload). Never retries; failures surface as
/// [`ServiceError`].
pub struct DriveApiClient {
    /// The underlying HTTP client
    client: Client,
    /// Base URL for metadata requests
    base_url: String,
    /// Base URL for content uploads
    upload_url: String,
    /// Current OAuth2 access token
    access_token: String,
}

impl DriveApiClient {
    /// Creates a client against the public endpoints
    pub fn new(access_token: impl Into<String>) -> Self {
        Self::with_base_url(access_token, DRIVE_BASE_URL, DRIVE_UPLOAD_URL)
    }

    /// Creates a client with custom base URLs (configuration and tests)
    pub fn with_base_url(
        access_token: impl Into<String>,
        base_url: impl Into<String>,
        upload_url: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            upload_url: upload_url.into(),
            access_token: access_token.into(),
        }
    }

    /// Updates the access token (e.g., after a token refresh)
    pub fn set_access_token(&mut self, token: impl Into<String>) {
        self.access_token = token.into();
        debug!("Updated DriveApiClient access token");
    }

    /// Creates an authenticated request builder for a metadata path
    ///
    /// Prepends the base URL and adds the Authorization header.
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        self.client
            .request(method, &url)
            .bearer_auth(&self.access_token)
    }

    /// Creates an authenticated request builder for an upload path
    fn upload_request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.upload_url, path);
        self.client
            .request(method, &url)
            .bearer_auth(&self.access_token)
    }

    /// Sends a request and parses the JSON body
    async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, ServiceError> {
        let response = builder.send().await.map_err(map_send_error)?;
        check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| ServiceError::InvalidResponse(e.to_string()))
    }

    /// Fetches every page of a `/files` query
    async fn list_files(&self, query: Option<String>) -> Result<Vec<FileResource>, ServiceError> {
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;
        let mut pages = 0usize;

        loop {
            let mut params: Vec<(&str, String)> = vec![("maxResults", MAX_RESULTS.to_string())];
            if let Some(q) = &query {
                params.push(("q", q.clone()));
            }
            if let Some(token) = page_token.take() {
                params.push(("pageToken", token));
            }

            let page: FileListResponse = self
                .send_json(self.request(Method::GET, "/files").query(&params))
                .await?;
            pages += 1;
            items.extend(page.items);

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        debug!(pages, items = items.len(), "Listed files");
        Ok(items)
    }
}

// ============================================================================
// IDriveService implementation
// ============================================================================

#[async_trait::async_trait]
impl IDriveService for DriveApiClient {
    async fn get_about_resource(&self) -> Result<AboutResource, ServiceError> {
        debug!("Fetching about resource");
        let about: AboutResponse = self.send_json(self.request(Method::GET, "/about")).await?;
        about.into_about()
    }

    /// The listing carries no change log position of its own, so the about
    /// resource is read first; changes racing with the listing are then
    /// picked up again by the next delta.
    async fn get_resource_list(
        &self,
        directory_id: Option<&ResourceId>,
    ) -> Result<ResourceList, ServiceError> {
        let largest_changestamp = self.get_about_resource().await?.largest_changestamp;

        let query = match directory_id {
            Some(id) => format!("'{}' in parents and trashed = false", id.as_str()),
            None => "trashed = false".to_string(),
        };
        let entries = self
            .list_files(Some(query))
            .await?
            .into_iter()
            .map(|f| f.into_entry(0))
            .collect::<Result<Vec<_>, _>>()?;

        info!(
            directory = directory_id.map(ResourceId::as_str).unwrap_or("<all>"),
            entries = entries.len(),
            largest_changestamp,
            "Fetched resource list"
        );
        Ok(ResourceList {
            entries,
            largest_changestamp,
        })
    }

    async fn get_change_list(&self, start_changestamp: i64) -> Result<ResourceList, ServiceError> {
        let mut entries = Vec::new();
        let mut largest_changestamp = start_changestamp.saturating_sub(1);
        let mut page_token: Option<String> = None;

        loop {
            let mut params: Vec<(&str, String)> = vec![
                ("startChangeId", start_changestamp.to_string()),
                ("maxResults", MAX_RESULTS.to_string()),
                ("includeDeleted", "true".to_string()),
            ];
            if let Some(token) = page_token.take() {
                params.push(("pageToken", token));
            }

            let mut page: ChangeListResponse = self
                .send_json(self.request(Method::GET, "/changes").query(&params))
                .await?;
            if let Some(head) = page.largest_changestamp()? {
                largest_changestamp = largest_changestamp.max(head);
            }
            for change in page.items.drain(..) {
                let entry = change.into_entry()?;
                largest_changestamp = largest_changestamp.max(entry.changestamp);
                entries.push(entry);
            }

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        info!(
            start_changestamp,
            changes = entries.len(),
            largest_changestamp,
            "Fetched change list"
        );
        Ok(ResourceList {
            entries,
            largest_changestamp,
        })
    }

    async fn get_resource_entry(&self, resource_id: &ResourceId) -> Result<RemoteEntry, ServiceError> {
        let path = format!("/files/{}", resource_id.as_str());
        let file: FileResource = self.send_json(self.request(Method::GET, &path)).await?;
        file.into_entry(0)
    }

    async fn download_file(&self, resource_id: &ResourceId) -> Result<Vec<u8>, ServiceError> {
        let path = format!("/files/{}", resource_id.as_str());
        debug!(resource_id = %resource_id, "Downloading file");

        let response = self
            .request(Method::GET, &path)
            .query(&[("alt", "media")])
            .send()
            .await
            .map_err(map_send_error)?;
        let bytes = check_status(response)
            .await?
            .bytes()
            .await
            .map_err(map_send_error)?;

        debug!(resource_id = %resource_id, bytes = bytes.len(), "Downloaded file");
        Ok(bytes.to_vec())
    }

    async fn upload_existing_file(
        &self,
        resource_id: &ResourceId,
        content: Vec<u8>,
    ) -> Result<RemoteEntry, ServiceError> {
        let path = format!("/files/{}", resource_id.as_str());
        let size = content.len();
        debug!(resource_id = %resource_id, size, "Uploading file content");

        let file: FileResource = self
            .send_json(
                self.upload_request(Method::PUT, &path)
                    .query(&[("uploadType", "media")])
                    .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                    .body(content),
            )
            .await?;
        let mut entry = file.into_entry(0)?;

        // The upload response does not carry the change log position.
        entry.changestamp = self.get_about_resource().await?.largest_changestamp;

        info!(resource_id = %resource_id, size, "Uploaded file content");
        Ok(entry)
    }

    async fn add_new_directory(
        &self,
        parent_id: &ResourceId,
        title: &str,
    ) -> Result<RemoteEntry, ServiceError> {
        let body = serde_json::json!({
            "title": title,
            "mimeType": FOLDER_MIME_TYPE,
            "parents": [{ "id": parent_id.as_str() }],
        });
        let file: FileResource = self
            .send_json(self.request(Method::POST, "/files").json(&body))
            .await?;

        info!(parent = %parent_id, title, "Created directory");
        file.into_entry(0)
    }

    async fn delete_resource(&self, resource_id: &ResourceId) -> Result<(), ServiceError> {
        let path = format!("/files/{}/trash", resource_id.as_str());
        let response = self
            .request(Method::POST, &path)
            .send()
            .await
            .map_err(map_send_error)?;
        check_status(response).await?;

        info!(resource_id = %resource_id, "Trashed resource");
        Ok(())
    }
}
