//! Cache bookkeeping for one resource's content blob

use serde::{Deserialize, Serialize};

use super::newtypes::{ContentHash, ResourceId};

/// Local cache state of one resource
///
/// Invariants kept by the file cache:
/// - a blob exists on disk if and only if `is_present`
/// - `is_mounted` implies `is_present`
/// - a `is_dirty` entry is never evicted automatically
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileCacheEntry {
    pub resource_id: ResourceId,
    /// Checksum of the cached blob, or of the content the pin asked for
    pub md5: ContentHash,
    pub is_present: bool,
    pub is_pinned: bool,
    pub is_dirty: bool,
    pub is_mounted: bool,
}

impl FileCacheEntry {
    /// A fresh entry with every flag cleared
    pub fn new(resource_id: ResourceId, md5: ContentHash) -> Self {
        Self {
            resource_id,
            md5,
            is_present: false,
            is_pinned: false,
            is_dirty: false,
            is_mounted: false,
        }
    }

    /// Whether the blob may be dropped to reclaim space
    #[must_use]
    pub fn is_evictable(&self) -> bool {
        self.is_present && !self.is_pinned && !self.is_dirty && !self.is_mounted
    }

    /// Whether the row carries no information and can be deleted
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.is_present && !self.is_pinned && !self.is_dirty && !self.is_mounted
    }
}
