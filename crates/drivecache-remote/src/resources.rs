//! Drive API wire types
//!
//! Deserialization targets for the JSON bodies returned by the Drive v2 style
//! API, and their conversion into the port-level DTOs of `drivecache-core`.
//!
//! The API encodes 64-bit integers (`largestChangeId`, `fileSize`, quota
//! counters) as JSON strings; [`Int64`] accepts both encodings.

use chrono::{DateTime, Utc};
use drivecache_core::domain::{ContentHash, ResourceId};
use drivecache_core::ports::{AboutResource, RemoteEntry, ServiceError};
use serde::Deserialize;

/// MIME type the API uses to mark directories
pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

// ============================================================================
// Response types
// ============================================================================

/// A 64-bit integer sent either as a JSON number or a decimal string
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum Int64 {
    Number(i64),
    Text(String),
}

impl Int64 {
    fn value(&self) -> Result<i64, ServiceError> {
        match self {
            Int64::Number(n) => Ok(*n),
            Int64::Text(s) => s
                .parse()
                .map_err(|_| ServiceError::InvalidResponse(format!("not an integer: {s}"))),
        }
    }
}

/// Response from the /about endpoint
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AboutResponse {
    /// Head of the change log
    largest_change_id: Int64,
    /// Resource id of My Drive
    root_folder_id: String,
    /// Total quota in bytes
    quota_bytes_total: Option<Int64>,
    /// Used quota in bytes
    quota_bytes_used: Option<Int64>,
}

/// A parent reference on a file resource
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ParentReference {
    /// Resource id of the parent
    id: String,
}

/// File labels; only `trashed` is of interest
#[derive(Debug, Default, Deserialize)]
pub(crate) struct FileLabels {
    #[serde(default)]
    trashed: bool,
}

/// A file or folder resource
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FileResource {
    /// Stable resource id
    id: String,
    /// Display name
    title: String,
    /// MIME type; folders use [`FOLDER_MIME_TYPE`]
    mime_type: Option<String>,
    /// Parent references; empty for orphans
    #[serde(default)]
    parents: Vec<ParentReference>,
    /// Size in bytes (absent for folders and native documents)
    file_size: Option<Int64>,
    /// Hex MD5 of the content (absent for folders)
    md5_checksum: Option<String>,
    /// Labels (trashed, starred, ...)
    #[serde(default)]
    labels: FileLabels,
    /// Last modification time
    modified_date: Option<DateTime<Utc>>,
}

/// Response from the /files endpoint
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FileListResponse {
    /// Resources on this page
    #[serde(default)]
    pub(crate) items: Vec<FileResource>,
    /// Token for the next page (absent on the last page)
    pub(crate) next_page_token: Option<String>,
}

/// A single entry of the change log
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ChangeResource {
    /// Change log position of this change
    id: Int64,
    /// Resource the change applies to
    file_id: String,
    /// Whether the resource was permanently removed
    #[serde(default)]
    deleted: bool,
    /// Current state of the resource (absent when deleted)
    file: Option<FileResource>,
}

/// Response from the /changes endpoint
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ChangeListResponse {
    /// Changes on this page
    #[serde(default)]
    pub(crate) items: Vec<ChangeResource>,
    /// Head of the change log when the page was produced
    pub(crate) largest_change_id: Option<Int64>,
    /// Token for the next page (absent on the last page)
    pub(crate) next_page_token: Option<String>,
}

impl ChangeListResponse {
    pub(crate) fn largest_changestamp(&self) -> Result<Option<i64>, ServiceError> {
        self.largest_change_id.as_ref().map(Int64::value).transpose()
    }
}

// ============================================================================
// Conversions to port-level types
// ============================================================================

fn resource_id(raw: &str) -> Result<ResourceId, ServiceError> {
    ResourceId::new(raw).map_err(|e| ServiceError::InvalidResponse(e.to_string()))
}

impl AboutResponse {
    pub(crate) fn into_about(self) -> Result<AboutResource, ServiceError> {
        let quota = |v: Option<Int64>| -> Result<u64, ServiceError> {
            Ok(v.as_ref().map(Int64::value).transpose()?.unwrap_or(0).max(0) as u64)
        };
        Ok(AboutResource {
            largest_changestamp: self.largest_change_id.value()?,
            root_resource_id: resource_id(&self.root_folder_id)?,
            quota_bytes_total: quota(self.quota_bytes_total)?,
            quota_bytes_used: quota(self.quota_bytes_used)?,
        })
    }
}

impl FileResource {
    /// Converts into a [`RemoteEntry`] stamped with `changestamp`
    ///
    /// Only the first parent is kept; a checksum the domain rejects is
    /// dropped rather than failing the whole listing.
    pub(crate) fn into_entry(self, changestamp: i64) -> Result<RemoteEntry, ServiceError> {
        let is_directory = self.mime_type.as_deref() == Some(FOLDER_MIME_TYPE);
        let parent_resource_id = self
            .parents
            .first()
            .map(|p| resource_id(&p.id))
            .transpose()?;
        let size = self
            .file_size
            .as_ref()
            .map(Int64::value)
            .transpose()?
            .unwrap_or(0)
            .max(0) as u64;
        let md5 = self
            .md5_checksum
            .and_then(|m| ContentHash::new(m).ok());

        Ok(RemoteEntry {
            resource_id: resource_id(&self.id)?,
            parent_resource_id,
            title: self.title,
            is_directory,
            size,
            md5,
            is_deleted: self.labels.trashed,
            changestamp,
            modified: self.modified_date,
        })
    }
}

impl ChangeResource {
    pub(crate) fn into_entry(self) -> Result<RemoteEntry, ServiceError> {
        let changestamp = self.id.value()?;
        match self.file {
            Some(file) if !self.deleted => file.into_entry(changestamp),
            _ => Ok(RemoteEntry {
                resource_id: resource_id(&self.file_id)?,
                parent_resource_id: None,
                title: String::new(),
                is_directory: false,
                size: 0,
                md5: None,
                is_deleted: true,
                changestamp,
                modified: None,
            }),
        }
    }
}
