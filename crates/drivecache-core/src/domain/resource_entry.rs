//! Resource entries: one node of the metadata tree

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::{ContentHash, ResourceId};

/// One remote object (file or directory) as known locally
///
/// `title` is the display name reported by the server and may repeat among
/// siblings. `base_name` is the path segment assigned by the metadata store:
/// the escaped title, suffixed with ` (N)` when a sibling already holds the
/// same name. It is empty until the entry has been inserted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceEntry {
    pub resource_id: ResourceId,
    /// `None` only for the grand root
    pub parent_resource_id: Option<ResourceId>,
    pub title: String,
    pub base_name: String,
    pub is_directory: bool,
    /// Content size in bytes, zero for directories
    pub size: u64,
    /// Content checksum, files only
    pub md5: Option<ContentHash>,
    /// For directories, the change log position last applied to the
    /// directory's listing. For files, the position of the last change seen.
    pub changestamp: i64,
    pub modified: Option<DateTime<Utc>>,
}

impl ResourceEntry {
    /// A file entry with no changestamp
    pub fn file(
        resource_id: ResourceId,
        parent_resource_id: ResourceId,
        title: impl Into<String>,
        size: u64,
        md5: ContentHash,
    ) -> Self {
        Self {
            resource_id,
            parent_resource_id: Some(parent_resource_id),
            title: title.into(),
            base_name: String::new(),
            is_directory: false,
            size,
            md5: Some(md5),
            changestamp: 0,
            modified: None,
        }
    }

    /// A directory entry with no changestamp
    pub fn directory(
        resource_id: ResourceId,
        parent_resource_id: Option<ResourceId>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            resource_id,
            parent_resource_id,
            title: title.into(),
            base_name: String::new(),
            is_directory: true,
            size: 0,
            md5: None,
            changestamp: 0,
            modified: None,
        }
    }

    #[must_use]
    pub fn is_file(&self) -> bool {
        !self.is_directory
    }

    /// Builder-style changestamp setter
    #[must_use]
    pub fn with_changestamp(mut self, changestamp: i64) -> Self {
        self.changestamp = changestamp;
        self
    }
}
