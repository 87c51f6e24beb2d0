//! Remote service port (driven/secondary port)
//!
//! The interface the loader, the sync client and the update operation use to
//! reach the remote store. Request scheduling, retries and authentication
//! belong to the implementation; this layer never retries.
//!
//! ## Design Notes
//!
//! - Errors are a small typed set ([`ServiceError`]) rather than
//!   `anyhow::Error` because callers surface them verbatim as error codes.
//! - Listings are returned whole; implementations follow pagination.
//! - [`RemoteEntry`] is a port-level DTO; [`RemoteEntry::into_change`] maps it
//!   onto the domain change type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::change_list::{ChangeList, ResourceChange};
use crate::domain::newtypes::{ContentHash, ResourceId};
use crate::domain::resource_entry::ResourceEntry;

// ============================================================================
// Errors
// ============================================================================

/// Failures reported by the remote service
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// The resource does not exist on the server
    #[error("resource not found on server")]
    NotFound,

    /// The server could not be reached
    #[error("no network connection")]
    NoConnection,

    /// A conditional request failed (the remote content changed)
    #[error("precondition failed")]
    PreconditionFailed,

    /// Any other non-success HTTP status
    #[error("server returned HTTP {status}: {message}")]
    Http {
        /// HTTP status code
        status: u16,
        /// Response body or reason phrase
        message: String,
    },

    /// The response could not be parsed
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

// ============================================================================
// DTOs
// ============================================================================

/// Account-level metadata: change log head, My Drive root and quota
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AboutResource {
    pub largest_changestamp: i64,
    pub root_resource_id: ResourceId,
    pub quota_bytes_total: u64,
    pub quota_bytes_used: u64,
}

/// A file or directory as reported by the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    pub resource_id: ResourceId,
    /// `None` for entries the server reports without a parent (orphans)
    pub parent_resource_id: Option<ResourceId>,
    pub title: String,
    pub is_directory: bool,
    pub size: u64,
    pub md5: Option<ContentHash>,
    pub is_deleted: bool,
    /// Change log position at which this entry last changed
    pub changestamp: i64,
    pub modified: Option<DateTime<Utc>>,
}

impl RemoteEntry {
    /// Maps the DTO onto a domain change
    pub fn into_change(self) -> ResourceChange {
        if self.is_deleted {
            return ResourceChange::Deleted(self.resource_id);
        }
        ResourceChange::Updated(self.into_entry())
    }

    /// Maps the DTO onto a resource entry, ignoring the deleted flag
    pub fn into_entry(self) -> ResourceEntry {
        ResourceEntry {
            resource_id: self.resource_id,
            parent_resource_id: self.parent_resource_id,
            title: self.title,
            base_name: String::new(),
            is_directory: self.is_directory,
            size: if self.is_directory { 0 } else { self.size },
            md5: if self.is_directory { None } else { self.md5 },
            changestamp: self.changestamp,
            modified: self.modified,
        }
    }
}

/// A complete listing or change list, pagination already followed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceList {
    pub entries: Vec<RemoteEntry>,
    /// Change log head at the time of the listing
    pub largest_changestamp: i64,
}

impl From<ResourceList> for ChangeList {
    fn from(list: ResourceList) -> Self {
        ChangeList::new(
            list.entries.into_iter().map(RemoteEntry::into_change).collect(),
            list.largest_changestamp,
        )
    }
}

// ============================================================================
// IDriveService trait
// ============================================================================

/// Port trait for the remote store
#[async_trait::async_trait]
pub trait IDriveService: Send + Sync {
    /// Account metadata; the cheapest call, used to detect changes
    async fn get_about_resource(&self) -> Result<AboutResource, ServiceError>;

    /// Full listing of every entry (`None`) or the children of one directory
    async fn get_resource_list(
        &self,
        directory_id: Option<&ResourceId>,
    ) -> Result<ResourceList, ServiceError>;

    /// Changes with changestamp >= `start_changestamp`
    async fn get_change_list(&self, start_changestamp: i64) -> Result<ResourceList, ServiceError>;

    /// A single entry by id
    async fn get_resource_entry(&self, resource_id: &ResourceId)
        -> Result<RemoteEntry, ServiceError>;

    /// File content
    async fn download_file(&self, resource_id: &ResourceId) -> Result<Vec<u8>, ServiceError>;

    /// Replaces the content of an existing file; returns the updated entry
    /// (new size, checksum and changestamp)
    async fn upload_existing_file(
        &self,
        resource_id: &ResourceId,
        content: Vec<u8>,
    ) -> Result<RemoteEntry, ServiceError>;

    /// Creates a directory under `parent_id`
    async fn add_new_directory(
        &self,
        parent_id: &ResourceId,
        title: &str,
    ) -> Result<RemoteEntry, ServiceError>;

    /// Deletes (trashes) a resource
    async fn delete_resource(&self, resource_id: &ResourceId) -> Result<(), ServiceError>;
}
