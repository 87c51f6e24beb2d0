//! The file cache's sequential worker

use std::path::{Path, PathBuf};
use std::sync::Arc;

use sqlx::SqlitePool;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use drivecache_core::domain::{ContentHash, FileCacheEntry, FileError, FileResult, ResourceId};
use drivecache_core::ports::IFreeDiskSpaceGetter;

use super::layout::CacheLayout;
use super::store::EntryStore;
use super::{CacheOp, FileCacheObserver, FileOperation};

/// Processes cache operations one at a time
///
/// Owns the blob directory and the bookkeeping table; nothing else writes
/// to either.
pub(crate) struct CacheWorker {
    rx: mpsc::Receiver<CacheOp>,
    layout: Arc<CacheLayout>,
    entries: EntryStore,
    free_space: Arc<dyn IFreeDiskSpaceGetter>,
    min_free_space: u64,
    observers: Vec<Arc<dyn FileCacheObserver>>,
}

impl CacheWorker {
    pub(crate) fn new(
        rx: mpsc::Receiver<CacheOp>,
        layout: Arc<CacheLayout>,
        pool: SqlitePool,
        free_space: Arc<dyn IFreeDiskSpaceGetter>,
        min_free_space: u64,
    ) -> Self {
        Self {
            rx,
            layout,
            entries: EntryStore::new(pool),
            free_space,
            min_free_space,
            observers: Vec::new(),
        }
    }

    /// Runs until every `FileCache` handle has been dropped
    pub(crate) async fn run(mut self) {
        tracing::debug!(root = %self.layout.root().display(), "FileCache worker started");

        while let Some(op) = self.rx.recv().await {
            self.process_operation(op).await;
        }

        tracing::debug!("FileCache worker stopped (all handles dropped)");
    }

    async fn process_operation(&mut self, op: CacheOp) {
        match op {
            CacheOp::Initialize { reply } => {
                let _ = reply.send(self.initialize().await);
            }
            CacheOp::AddObserver { observer, reply } => {
                self.observers.push(observer);
                let _ = reply.send(Ok(()));
            }
            CacheOp::GetCacheEntry {
                resource_id,
                md5,
                reply,
            } => {
                let result = self
                    .entries
                    .get(&resource_id)
                    .await
                    .map(|entry| entry.filter(|e| hash_matches(e, md5.as_ref())));
                let _ = reply.send(result);
            }
            CacheOp::GetFile {
                resource_id,
                md5,
                reply,
            } => {
                let _ = reply.send(self.get_file(&resource_id, md5.as_ref()).await);
            }
            CacheOp::Store {
                resource_id,
                md5,
                source,
                operation,
                cancel,
                reply,
            } => {
                let result = self
                    .store(&resource_id, &md5, &source, operation, cancel.as_ref())
                    .await;
                if let Err(e) = &result {
                    tracing::debug!(resource_id = %resource_id, error = %e, "Store failed");
                }
                let _ = reply.send(result);
            }
            CacheOp::Pin {
                resource_id,
                md5,
                reply,
            } => {
                let _ = reply.send(self.pin(&resource_id, &md5).await);
            }
            CacheOp::Unpin { resource_id, reply } => {
                let _ = reply.send(self.unpin(&resource_id).await);
            }
            CacheOp::MarkDirty {
                resource_id,
                md5,
                reply,
            } => {
                let _ = reply.send(self.mark_dirty(&resource_id, &md5).await);
            }
            CacheOp::ClearDirty {
                resource_id,
                md5,
                reply,
            } => {
                let _ = reply.send(self.clear_dirty(&resource_id, &md5).await);
            }
            CacheOp::MarkAsMounted { resource_id, reply } => {
                let _ = reply.send(self.mark_as_mounted(&resource_id).await);
            }
            CacheOp::MarkAsUnmounted { path, reply } => {
                let _ = reply.send(self.mark_as_unmounted(&path).await);
            }
            CacheOp::Remove { resource_id, reply } => {
                let _ = reply.send(self.remove(&resource_id).await);
            }
            CacheOp::FreeDiskSpaceIfNeededFor { bytes, reply } => {
                let _ = reply.send(self.free_disk_space_if_needed_for(bytes).await);
            }
            CacheOp::Iterate { reply } => {
                let _ = reply.send(self.entries.list_all().await);
            }
        }
    }

    // ------------------------------------------------------------------------
    // Startup
    // ------------------------------------------------------------------------

    async fn initialize(&self) -> FileResult<()> {
        for dir in [
            self.layout.meta_dir(),
            self.layout.files_dir(),
            self.layout.tmp_dir(),
        ] {
            tokio::fs::create_dir_all(&dir).await?;
        }

        let mut temporaries = 0;
        let mut tmp = tokio::fs::read_dir(self.layout.tmp_dir()).await?;
        while let Some(entry) = tmp.next_entry().await? {
            remove_path(&entry.path()).await;
            temporaries += 1;
        }

        let unmounted = self.entries.clear_mount_flags().await?;

        let mut lost = 0;
        for mut entry in self.entries.list_all().await? {
            if !entry.is_present {
                continue;
            }
            let blob = self.layout.blob_path(&entry.resource_id, &entry.md5);
            if tokio::fs::try_exists(&blob).await.unwrap_or(false) {
                continue;
            }
            lost += 1;
            tracing::warn!(resource_id = %entry.resource_id, "Cached blob vanished");
            if entry.is_pinned {
                entry.is_present = false;
                entry.is_dirty = false;
                self.entries.put(&entry).await?;
            } else {
                self.entries.delete(&entry.resource_id).await?;
            }
        }

        let orphans = self.remove_orphan_blobs().await?;

        tracing::info!(
            root = %self.layout.root().display(),
            temporaries,
            unmounted,
            lost,
            orphans,
            "FileCache initialized"
        );
        Ok(())
    }

    /// Deletes blobs that no present entry accounts for
    async fn remove_orphan_blobs(&self) -> FileResult<usize> {
        let mut removed = 0;
        let mut shards = tokio::fs::read_dir(self.layout.files_dir()).await?;

        while let Some(shard) = shards.next_entry().await? {
            if !shard.file_type().await?.is_dir() {
                remove_path(&shard.path()).await;
                removed += 1;
                continue;
            }
            let mut blobs = tokio::fs::read_dir(shard.path()).await?;
            while let Some(blob) = blobs.next_entry().await? {
                let path = blob.path();
                let wanted = match self.layout.parse_blob_path(&path) {
                    Some((resource_id, md5)) => self
                        .entries
                        .get(&resource_id)
                        .await?
                        .is_some_and(|e| e.is_present && e.md5 == md5),
                    None => false,
                };
                if !wanted {
                    tracing::debug!(path = %path.display(), "Removing orphan blob");
                    remove_path(&path).await;
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    async fn get_file(&self, resource_id: &ResourceId, md5: Option<&ContentHash>) -> FileResult<PathBuf> {
        let entry = self
            .entries
            .get(resource_id)
            .await?
            .filter(|e| e.is_present && hash_matches(e, md5))
            .ok_or(FileError::NotFound)?;

        Ok(self.layout.blob_path(&entry.resource_id, &entry.md5))
    }

    // ------------------------------------------------------------------------
    // Content
    // ------------------------------------------------------------------------

    async fn store(
        &self,
        resource_id: &ResourceId,
        md5: &ContentHash,
        source: &Path,
        operation: FileOperation,
        cancel: Option<&CancellationToken>,
    ) -> FileResult<()> {
        if cancel.is_some_and(CancellationToken::is_cancelled) {
            tracing::debug!(resource_id = %resource_id, "Store skipped, task was cancelled");
            return Err(FileError::Aborted);
        }

        let existing = self.entries.get(resource_id).await?;
        if existing.as_ref().is_some_and(|e| e.is_mounted || e.is_dirty) {
            return Err(FileError::InUse);
        }

        let source_meta = tokio::fs::metadata(source).await?;
        if !source_meta.is_file() {
            return Err(FileError::NotAFile);
        }
        let size = source_meta.len();
        if !self.free_disk_space_if_needed_for(size).await? {
            tracing::warn!(resource_id = %resource_id, size, "Not enough free space to store file");
            return Err(FileError::NoSpace);
        }

        let dest = self.layout.blob_path(resource_id, md5);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                tracing::warn!(path = %parent.display(), error = %e, "Cannot create cache directory");
                FileError::NotFound
            })?;
        }

        // The previous blob and its row stay valid until the new blob is in place.
        let staged = self.layout.temp_path();
        if let Err(e) = stage(source, &staged, operation).await {
            remove_path(&staged).await;
            return Err(e);
        }
        if let Err(e) = tokio::fs::rename(&staged, &dest).await {
            remove_path(&staged).await;
            return Err(e.into());
        }

        let was_present_as_dest = existing.as_ref().is_some_and(|e| e.is_present && &e.md5 == md5);
        let old_blob = existing
            .as_ref()
            .filter(|e| e.is_present && &e.md5 != md5)
            .map(|e| self.layout.blob_path(&e.resource_id, &e.md5));

        let mut entry = existing.unwrap_or_else(|| FileCacheEntry::new(resource_id.clone(), md5.clone()));
        entry.md5 = md5.clone();
        entry.is_present = true;
        if let Err(e) = self.entries.put(&entry).await {
            if !was_present_as_dest {
                remove_path(&dest).await;
            }
            return Err(e);
        }

        if let Some(old) = old_blob {
            remove_path(&old).await;
        }

        tracing::debug!(resource_id = %resource_id, md5 = %md5, size, ?operation, "Stored file");
        Ok(())
    }

    async fn remove(&self, resource_id: &ResourceId) -> FileResult<()> {
        let Some(entry) = self.entries.get(resource_id).await? else {
            return Ok(());
        };
        if entry.is_mounted {
            return Err(FileError::InUse);
        }

        if entry.is_present {
            remove_path(&self.layout.blob_path(&entry.resource_id, &entry.md5)).await;
        }
        self.entries.delete(resource_id).await?;

        tracing::debug!(resource_id = %resource_id, "Removed cache entry");
        Ok(())
    }

    fn has_enough_space_for(&self, bytes: u64) -> FileResult<bool> {
        let free = self.free_space.free_disk_space(self.layout.root())?;
        Ok(free >= bytes.saturating_add(self.min_free_space))
    }

    async fn free_disk_space_if_needed_for(&self, bytes: u64) -> FileResult<bool> {
        if self.has_enough_space_for(bytes)? {
            return Ok(true);
        }

        for entry in self.entries.list_evictable().await? {
            remove_path(&self.layout.blob_path(&entry.resource_id, &entry.md5)).await;
            self.entries.delete(&entry.resource_id).await?;
            tracing::info!(resource_id = %entry.resource_id, "Evicted cached file");

            if self.has_enough_space_for(bytes)? {
                return Ok(true);
            }
        }

        self.has_enough_space_for(bytes)
    }

    // ------------------------------------------------------------------------
    // Flags
    // ------------------------------------------------------------------------

    async fn pin(&self, resource_id: &ResourceId, md5: &ContentHash) -> FileResult<()> {
        let mut entry = match self.entries.get(resource_id).await? {
            Some(entry) => entry,
            None => FileCacheEntry::new(resource_id.clone(), md5.clone()),
        };
        if !entry.is_present {
            entry.md5 = md5.clone();
        }
        entry.is_pinned = true;
        self.entries.put(&entry).await?;

        tracing::debug!(resource_id = %resource_id, present = entry.is_present, "Pinned");
        for observer in &self.observers {
            observer.on_cache_pinned(resource_id, md5);
        }
        Ok(())
    }

    async fn unpin(&self, resource_id: &ResourceId) -> FileResult<()> {
        let mut entry = self
            .entries
            .get(resource_id)
            .await?
            .ok_or(FileError::NotFound)?;

        entry.is_pinned = false;
        if entry.is_empty() {
            self.entries.delete(resource_id).await?;
        } else {
            self.entries.put(&entry).await?;
        }

        tracing::debug!(resource_id = %resource_id, present = entry.is_present, "Unpinned");
        for observer in &self.observers {
            observer.on_cache_unpinned(resource_id, &entry.md5);
        }
        Ok(())
    }

    async fn mark_dirty(&self, resource_id: &ResourceId, md5: &ContentHash) -> FileResult<()> {
        let mut entry = self
            .entries
            .get(resource_id)
            .await?
            .filter(|e| e.is_present && (e.is_dirty || &e.md5 == md5))
            .ok_or(FileError::NotFound)?;
        if entry.is_dirty {
            return Err(FileError::InUse);
        }

        entry.is_dirty = true;
        self.entries.put(&entry).await?;
        tracing::debug!(resource_id = %resource_id, "Marked dirty");
        Ok(())
    }

    async fn clear_dirty(&self, resource_id: &ResourceId, md5: &ContentHash) -> FileResult<()> {
        let mut entry = self
            .entries
            .get(resource_id)
            .await?
            .filter(|e| e.is_present)
            .ok_or(FileError::NotFound)?;
        if !entry.is_dirty {
            return Err(FileError::InvalidOperation);
        }

        let old_path = self.layout.blob_path(resource_id, &entry.md5);
        let new_path = self.layout.blob_path(resource_id, md5);
        if old_path != new_path {
            tokio::fs::rename(&old_path, &new_path).await?;
        }

        entry.md5 = md5.clone();
        entry.is_dirty = false;
        self.entries.put(&entry).await?;
        tracing::debug!(resource_id = %resource_id, md5 = %md5, "Cleared dirty");
        Ok(())
    }

    async fn mark_as_mounted(&self, resource_id: &ResourceId) -> FileResult<PathBuf> {
        let mut entry = self
            .entries
            .get(resource_id)
            .await?
            .filter(|e| e.is_present)
            .ok_or(FileError::NotFound)?;
        if entry.is_mounted {
            return Err(FileError::InUse);
        }

        entry.is_mounted = true;
        self.entries.put(&entry).await?;
        tracing::debug!(resource_id = %resource_id, "Mounted");
        Ok(self.layout.blob_path(resource_id, &entry.md5))
    }

    async fn mark_as_unmounted(&self, path: &Path) -> FileResult<()> {
        let (resource_id, md5) = self
            .layout
            .parse_blob_path(path)
            .ok_or(FileError::NotFound)?;
        let mut entry = self
            .entries
            .get(&resource_id)
            .await?
            .filter(|e| e.md5 == md5)
            .ok_or(FileError::NotFound)?;
        if !entry.is_mounted {
            return Err(FileError::InvalidOperation);
        }

        entry.is_mounted = false;
        self.entries.put(&entry).await?;
        tracing::debug!(resource_id = %resource_id, "Unmounted");
        Ok(())
    }
}

/// A dirty entry matches any hash: its content no longer has a server hash
fn hash_matches(entry: &FileCacheEntry, md5: Option<&ContentHash>) -> bool {
    match md5 {
        Some(md5) => entry.is_dirty || &entry.md5 == md5,
        None => true,
    }
}

/// Puts the content of `source` at `staged`, a path on the cache filesystem
async fn stage(source: &Path, staged: &Path, operation: FileOperation) -> FileResult<()> {
    match operation {
        FileOperation::Copy => {
            tokio::fs::copy(source, staged).await?;
        }
        FileOperation::Move => {
            if tokio::fs::rename(source, staged).await.is_err() {
                // Different filesystem
                tokio::fs::copy(source, staged).await?;
                remove_path(source).await;
            }
        }
    }
    Ok(())
}

async fn remove_path(path: &Path) {
    let result = match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(path).await,
        Ok(_) => tokio::fs::remove_file(path).await,
        Err(_) => return,
    };
    if let Err(e) = result {
        tracing::warn!(path = %path.display(), error = %e, "Failed to remove cache file");
    }
}
