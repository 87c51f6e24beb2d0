//! Filesystem facade
//!
//! [`FileSystem`] is the entry point callers use: lookups consult
//! [`ResourceMetadata`] first and fall back to the [`ChangeListLoader`] on a
//! miss; content operations go through [`FileCache`]; edits reach the
//! server through [`UpdateOperation`] and the [`SyncClient`].
//!
//! Paths are relative drive paths such as `drive/root/Directory 1`.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashSet;
use tracing::{debug, info, warn};

use drivecache_cache::{FileCache, ResourceMetadata};
use drivecache_core::config::SyncConfig;
use drivecache_core::domain::{DirectoryFetchInfo, FileError, FileResult, ResourceEntry, ResourceId};
use drivecache_core::ports::IDriveService;
use drivecache_core::util::{
    is_special_resource_id, is_under, my_drive_root_path, other_dir_id, unescape_base_name,
};

use crate::change_list_loader::ChangeListLoader;
use crate::sync_client::{download_to_cache, SyncClient};
use crate::update_operation::{ClientContext, UpdateOperation};

/// Quota reported by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AvailableSpace {
    pub bytes_total: u64,
    pub bytes_used: u64,
}

/// Orchestrates metadata, cache, loader and sync client
pub struct FileSystem {
    metadata: Arc<ResourceMetadata>,
    cache: FileCache,
    service: Arc<dyn IDriveService>,
    loader: ChangeListLoader,
    sync_client: SyncClient,
    update: UpdateOperation,
    /// Files with an open handle; at most one handle per id
    open_files: DashSet<ResourceId>,
}

impl FileSystem {
    /// Wires the components; metadata and cache must already be initialized
    pub async fn new(
        metadata: Arc<ResourceMetadata>,
        cache: FileCache,
        service: Arc<dyn IDriveService>,
        sync_config: &SyncConfig,
    ) -> FileResult<Self> {
        let loader = ChangeListLoader::new(Arc::clone(&metadata), Arc::clone(&service));
        let sync_client = SyncClient::new(
            Arc::clone(&metadata),
            cache.clone(),
            Arc::clone(&service),
            sync_config,
        )
        .await?;
        let update = UpdateOperation::new(Arc::clone(&metadata), cache.clone(), Arc::clone(&service));

        Ok(Self {
            metadata,
            cache,
            service,
            loader,
            sync_client,
            update,
            open_files: DashSet::new(),
        })
    }

    pub fn loader(&self) -> &ChangeListLoader {
        &self.loader
    }

    pub fn sync_client(&self) -> &SyncClient {
        &self.sync_client
    }

    pub fn metadata(&self) -> &ResourceMetadata {
        &self.metadata
    }

    pub fn cache(&self) -> &FileCache {
        &self.cache
    }

    // ========================================================================
    // Lookups
    // ========================================================================

    /// Looks `path` up locally, loading its parent directory on a miss
    pub async fn get_resource_entry_by_path(&self, path: &Path) -> FileResult<ResourceEntry> {
        match self.metadata.get_resource_entry_by_path(path).await {
            Ok(entry) => return Ok(entry),
            Err(FileError::NotFound) => {}
            Err(e) => return Err(e),
        }

        let parent = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or(FileError::NotFound)?;
        debug!(path = %path.display(), "Not in metadata, loading parent");
        self.load_directory_if_needed(parent).await?;
        self.metadata.get_resource_entry_by_path(path).await
    }

    /// Lists the directory at `path`
    ///
    /// A failed load is logged and the local snapshot is returned.
    pub async fn read_directory_by_path(&self, path: &Path) -> FileResult<Vec<ResourceEntry>> {
        match self.load_directory_if_needed(path).await {
            Ok(()) => {}
            Err(FileError::NotADirectory) => return Err(FileError::NotADirectory),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Load failed, reading local snapshot");
            }
        }
        self.metadata.read_directory_by_path(path).await
    }

    /// Makes sure the listing of the directory at `path` is loaded
    ///
    /// An unknown path falls back to loading the whole tree; `drive/other`
    /// has no server-side listing and is filled by tree loads only.
    pub async fn load_directory_if_needed(&self, path: &Path) -> FileResult<()> {
        match self.metadata.get_resource_entry_by_path(path).await {
            Err(FileError::NotFound) => self.loader.load_if_needed(DirectoryFetchInfo::empty()).await,
            Err(e) => Err(e),
            Ok(entry) if !entry.is_directory => Err(FileError::NotADirectory),
            Ok(entry) if entry.resource_id == other_dir_id() => {
                self.loader.load_if_needed(DirectoryFetchInfo::empty()).await
            }
            Ok(entry) => {
                self.loader
                    .load_if_needed(DirectoryFetchInfo::new(entry.resource_id, entry.changestamp))
                    .await
            }
        }
    }

    /// Checks the server for changes; see [`ChangeListLoader::check_for_updates`]
    pub fn check_for_updates(&self) -> impl Future<Output = FileResult<()>> + Send + 'static {
        self.loader.check_for_updates()
    }

    /// Re-fetches the listing of the directory at `path`
    pub async fn refresh_directory(&self, path: &Path) -> FileResult<()> {
        let entry = self.get_resource_entry_by_path(path).await?;
        if !entry.is_directory {
            return Err(FileError::NotADirectory);
        }
        self.loader
            .refresh_directory(DirectoryFetchInfo::new(entry.resource_id, entry.changestamp))
            .await
    }

    // ========================================================================
    // Cache state
    // ========================================================================

    /// Keeps the file at `path` available offline; the sync client fetches it
    pub async fn pin(&self, path: &Path) -> FileResult<()> {
        let entry = self.get_file_entry(path).await?;
        let md5 = entry.md5.ok_or(FileError::NotAFile)?;
        self.cache.pin(&entry.resource_id, &md5).await?;
        info!(path = %path.display(), resource_id = %entry.resource_id, "Pinned");
        Ok(())
    }

    /// Releases the pin; a pending fetch is cancelled before this returns
    pub async fn unpin(&self, path: &Path) -> FileResult<()> {
        let entry = self.get_file_entry(path).await?;
        self.cache.unpin(&entry.resource_id).await?;
        info!(path = %path.display(), resource_id = %entry.resource_id, "Unpinned");
        Ok(())
    }

    /// Opens the file at `path` for writing and returns its cache path
    ///
    /// Downloads the content if needed and marks the entry dirty. Fails with
    /// `InUse` if the file is already open.
    pub async fn open_file(&self, path: &Path) -> FileResult<PathBuf> {
        let entry = self.get_file_entry(path).await?;
        let resource_id = entry.resource_id.clone();

        if !self.open_files.insert(resource_id.clone()) {
            return Err(FileError::InUse);
        }
        self.sync_client.cancel_upload(&resource_id);

        let result = self.prepare_for_write(entry).await;
        match &result {
            Ok(cache_path) => {
                info!(path = %path.display(), cache_path = %cache_path.display(), "Opened file")
            }
            Err(_) => {
                self.open_files.remove(&resource_id);
            }
        }
        result
    }

    async fn prepare_for_write(&self, entry: ResourceEntry) -> FileResult<PathBuf> {
        let resource_id = &entry.resource_id;
        let md5 = entry.md5.ok_or(FileError::NotAFile)?;

        let cached = self.cache.get_cache_entry(resource_id, Some(&md5)).await?;
        if !cached.as_ref().is_some_and(|c| c.is_present) {
            download_to_cache(&self.cache, self.service.as_ref(), resource_id, &md5, None).await?;
        }

        let cached = self
            .cache
            .get_cache_entry(resource_id, None)
            .await?
            .ok_or(FileError::NotFound)?;
        if !cached.is_dirty {
            self.cache.mark_dirty(resource_id, &md5).await?;
        }
        self.cache.get_file(resource_id, None).await
    }

    /// Closes the file at `path` and uploads its content
    ///
    /// The handle is released even when the upload fails; the edit stays
    /// dirty and a background upload is scheduled for it.
    pub async fn close_file(&self, path: &Path) -> FileResult<()> {
        let entry = self.get_file_entry(path).await?;
        if self.open_files.remove(&entry.resource_id).is_none() {
            return Err(FileError::NotFound);
        }
        info!(path = %path.display(), "Closed file, uploading");

        let result = self
            .update
            .update_file_by_resource_id(&entry.resource_id, ClientContext::User)
            .await;
        if let Err(e) = &result {
            warn!(
                path = %path.display(),
                error = %e,
                code = e.code(),
                "Upload on close failed, retrying in the background"
            );
            self.sync_client.add_upload_task(&entry.resource_id);
        }
        result
    }

    /// Schedules uploads of dirty entries that no handle holds open
    ///
    /// Picks up edits whose upload on close and background retry both
    /// failed.
    pub async fn retry_pending_uploads(&self) -> FileResult<usize> {
        let mut scheduled = 0usize;
        for entry in self.cache.iterate().await? {
            if entry.is_dirty && !self.open_files.contains(&entry.resource_id) {
                self.sync_client.add_upload_task(&entry.resource_id);
                scheduled += 1;
            }
        }
        if scheduled > 0 {
            debug!(scheduled, "Retrying pending uploads");
        }
        Ok(scheduled)
    }

    /// Guards the cached blob of the file at `path`; returns the blob path
    pub async fn mark_cache_file_as_mounted(&self, path: &Path) -> FileResult<PathBuf> {
        let entry = self.get_file_entry(path).await?;
        self.cache.mark_as_mounted(&entry.resource_id).await
    }

    /// Releases the guard of a blob returned by
    /// [`FileSystem::mark_cache_file_as_mounted`]
    pub async fn mark_cache_file_as_unmounted(&self, cache_file_path: &Path) -> FileResult<()> {
        self.cache.mark_as_unmounted(cache_file_path).await
    }

    // ========================================================================
    // Remote mutations
    // ========================================================================

    pub async fn get_available_space(&self) -> FileResult<AvailableSpace> {
        let about = self.service.get_about_resource().await?;
        Ok(AvailableSpace {
            bytes_total: about.quota_bytes_total,
            bytes_used: about.quota_bytes_used,
        })
    }

    /// Creates a directory under My Drive
    ///
    /// An existing directory is fine unless `exclusive`; an existing file
    /// is always `Exists`. Missing ancestors are created only when
    /// `recursive`, otherwise the call fails with `NotFound`.
    pub async fn create_directory(&self, path: &Path, exclusive: bool, recursive: bool) -> FileResult<()> {
        match self.get_resource_entry_by_path(path).await {
            Ok(existing) if exclusive || !existing.is_directory => return Err(FileError::Exists),
            Ok(_) => return Ok(()),
            Err(FileError::NotFound) => {}
            Err(e) => return Err(e),
        }

        let root = my_drive_root_path();
        if !is_under(&root, path) {
            return Err(FileError::InvalidOperation);
        }

        // Walk up to the nearest existing ancestor.
        let mut missing: Vec<String> = Vec::new();
        let mut cursor = path.to_path_buf();
        let parent = loop {
            let name = cursor
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or(FileError::InvalidOperation)?;
            missing.push(name.to_string());
            cursor = cursor
                .parent()
                .map(Path::to_path_buf)
                .ok_or(FileError::InvalidOperation)?;

            match self.get_resource_entry_by_path(&cursor).await {
                Ok(entry) => break entry,
                Err(FileError::NotFound) if recursive && is_under(&root, &cursor) => continue,
                Err(e) => return Err(e),
            }
        };
        if !parent.is_directory {
            return Err(FileError::NotADirectory);
        }

        let mut parent_id = parent.resource_id;
        for name in missing.into_iter().rev() {
            let title = unescape_base_name(&name);
            let remote = self.service.add_new_directory(&parent_id, &title).await?;
            let mut entry = remote.into_entry();
            entry.parent_resource_id = Some(parent_id.clone());
            let resource_id = entry.resource_id.clone();

            let created = self.metadata.add_entry(entry).await?;
            info!(path = %created.display(), resource_id = %resource_id, "Created directory");
            parent_id = resource_id;
        }
        Ok(())
    }

    /// Removes the entry at `path` on the server and locally
    ///
    /// A non-empty directory needs `recursive`. Fails with `InUse` while a
    /// blob below `path` is mounted. Cached blobs of removed files are
    /// dropped.
    pub async fn remove(&self, path: &Path, recursive: bool) -> FileResult<()> {
        let entry = self.get_resource_entry_by_path(path).await?;
        if is_special_resource_id(&entry.resource_id) || path == my_drive_root_path() {
            return Err(FileError::InvalidOperation);
        }

        if entry.is_directory {
            if let Err(e) = self.load_directory_if_needed(path).await {
                debug!(path = %path.display(), error = %e, "Load failed, using local listing");
            }
            if !recursive
                && !self
                    .metadata
                    .read_directory_by_id(&entry.resource_id)
                    .await?
                    .is_empty()
            {
                return Err(FileError::NotEmpty);
            }
        }

        let files = self.collect_files(&entry).await?;
        for resource_id in &files {
            let cached = self.cache.get_cache_entry(resource_id, None).await?;
            if cached.is_some_and(|c| c.is_mounted) {
                debug!(path = %path.display(), resource_id = %resource_id, "Cached blob is mounted");
                return Err(FileError::InUse);
            }
        }

        self.service.delete_resource(&entry.resource_id).await?;
        self.metadata.remove_entry(&entry.resource_id).await?;

        for resource_id in &files {
            self.open_files.remove(resource_id);
            if let Err(e) = self.cache.remove(resource_id).await {
                warn!(resource_id = %resource_id, error = %e, "Could not drop cached blob");
            }
        }

        info!(path = %path.display(), files = files.len(), "Removed");
        Ok(())
    }

    /// Ids of every file at or below `entry`
    async fn collect_files(&self, entry: &ResourceEntry) -> FileResult<Vec<ResourceId>> {
        if !entry.is_directory {
            return Ok(vec![entry.resource_id.clone()]);
        }

        let mut files = Vec::new();
        let mut stack = vec![entry.resource_id.clone()];
        while let Some(dir) = stack.pop() {
            for child in self.metadata.read_directory_by_id(&dir).await? {
                if child.is_directory {
                    stack.push(child.resource_id);
                } else {
                    files.push(child.resource_id);
                }
            }
        }
        Ok(files)
    }

    async fn get_file_entry(&self, path: &Path) -> FileResult<ResourceEntry> {
        let entry = self.get_resource_entry_by_path(path).await?;
        if entry.is_directory {
            return Err(FileError::NotAFile);
        }
        Ok(entry)
    }
}
