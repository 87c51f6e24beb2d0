//! Pushes one dirty file to the remote store
//!
//! ```text
//! metadata lookup ─► cache entry dirty? ─► read blob ─► upload
//!                          │ no                            │
//!                          ▼                               ▼
//!                          OK              refresh entry ─► clear dirty
//! ```
//!
//! Metadata and cache are updated only after the server accepted the new
//! content, so a failed upload leaves the entry dirty for the next attempt.

use std::sync::Arc;

use tracing::{debug, info, warn};

use drivecache_cache::{FileCache, ResourceMetadata};
use drivecache_core::domain::{ContentHash, FileError, FileResult, ResourceId};
use drivecache_core::ports::IDriveService;

/// Who asked for the operation; recorded in logs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientContext {
    /// A direct user action such as closing a file
    User,
    /// The background sync client
    Background,
}

/// Uploads local edits and brings metadata and cache in line with the server
#[derive(Clone)]
pub struct UpdateOperation {
    metadata: Arc<ResourceMetadata>,
    cache: FileCache,
    service: Arc<dyn IDriveService>,
}

impl UpdateOperation {
    pub fn new(
        metadata: Arc<ResourceMetadata>,
        cache: FileCache,
        service: Arc<dyn IDriveService>,
    ) -> Self {
        Self {
            metadata,
            cache,
            service,
        }
    }

    /// Uploads the cached content of `resource_id` if it is dirty
    ///
    /// # Errors
    ///
    /// - `NotFound` if the id is unknown to metadata or has no cached blob
    /// - `NotAFile` for directories
    /// - `Service` with the remote failure, verbatim
    pub async fn update_file_by_resource_id(
        &self,
        resource_id: &ResourceId,
        context: ClientContext,
    ) -> FileResult<()> {
        let entry = self.metadata.get_resource_entry_by_id(resource_id).await?;
        if entry.is_directory {
            return Err(FileError::NotAFile);
        }

        let cache_entry = self.cache.get_cache_entry(resource_id, None).await?;
        if !cache_entry.as_ref().is_some_and(|e| e.is_dirty) {
            debug!(resource_id = %resource_id, ?context, "Not dirty, nothing to upload");
            return Ok(());
        }

        let path = self.cache.get_file(resource_id, None).await?;
        let content = tokio::fs::read(&path).await?;
        let local_md5 = ContentHash::md5_of(&content);

        let remote = match self
            .service
            .upload_existing_file(resource_id, content)
            .await
        {
            Ok(remote) => remote,
            Err(e) => {
                warn!(resource_id = %resource_id, ?context, error = %e, "Upload failed");
                return Err(FileError::Service(e));
            }
        };

        let new_md5 = remote.md5.clone().unwrap_or(local_md5);
        let mut updated = entry;
        updated.size = remote.size;
        updated.md5 = Some(new_md5.clone());
        updated.changestamp = remote.changestamp;
        updated.modified = remote.modified.or(updated.modified);
        self.metadata.refresh_entry(updated).await?;

        self.cache.clear_dirty(resource_id, &new_md5).await?;

        info!(
            resource_id = %resource_id,
            ?context,
            size = remote.size,
            md5 = %new_md5,
            "Uploaded local changes"
        );
        Ok(())
    }
}
