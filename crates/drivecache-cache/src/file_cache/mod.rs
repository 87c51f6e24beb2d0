//! File content cache
//!
//! Blobs keyed by (resource id, md5) with per-entry present/pinned/dirty/mounted
//! flags. Every operation is sent to one worker task and processed in arrival
//! order, so operations on the same resource never interleave.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐     CacheOp      ┌─────────────┐     ┌───────────────┐
//! │ FileCache    │ ───────────────► │ CacheWorker │ ──► │ files/, tmp/  │
//! │ (any clone)  │                  │   (task)    │     ├───────────────┤
//! └──────────────┘                  └─────────────┘ ──► │ file_cache.db │
//!        ▲        result via oneshot       │            └───────────────┘
//!        └─────────────────────────────────┤
//!                                          ▼
//!                              FileCacheObserver callbacks
//! ```

mod layout;
mod store;
mod worker;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use drivecache_core::domain::{ContentHash, FileCacheEntry, FileError, FileResult, ResourceId};
use drivecache_core::ports::IFreeDiskSpaceGetter;

use crate::pool::{DatabasePool, Schema};
use crate::CacheError;

pub use layout::{escape_cache_file_name, unescape_cache_file_name, CacheLayout};

use worker::CacheWorker;

/// How `store` takes ownership of the source file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOperation {
    Copy,
    Move,
}

/// Notified on the cache worker right after a pin state change is committed
///
/// Implementations must not call back into the cache and wait for the
/// result: the worker is busy running the callback.
pub trait FileCacheObserver: Send + Sync {
    fn on_cache_pinned(&self, resource_id: &ResourceId, md5: &ContentHash);
    fn on_cache_unpinned(&self, resource_id: &ResourceId, md5: &ContentHash);
}

// ============================================================================
// CacheOp enum
// ============================================================================

type Reply<T> = oneshot::Sender<FileResult<T>>;

pub(crate) enum CacheOp {
    Initialize {
        reply: Reply<()>,
    },
    AddObserver {
        observer: Arc<dyn FileCacheObserver>,
        reply: Reply<()>,
    },
    GetCacheEntry {
        resource_id: ResourceId,
        md5: Option<ContentHash>,
        reply: Reply<Option<FileCacheEntry>>,
    },
    GetFile {
        resource_id: ResourceId,
        md5: Option<ContentHash>,
        reply: Reply<PathBuf>,
    },
    Store {
        resource_id: ResourceId,
        md5: ContentHash,
        source: PathBuf,
        operation: FileOperation,
        cancel: Option<CancellationToken>,
        reply: Reply<()>,
    },
    Pin {
        resource_id: ResourceId,
        md5: ContentHash,
        reply: Reply<()>,
    },
    Unpin {
        resource_id: ResourceId,
        reply: Reply<()>,
    },
    MarkDirty {
        resource_id: ResourceId,
        md5: ContentHash,
        reply: Reply<()>,
    },
    ClearDirty {
        resource_id: ResourceId,
        md5: ContentHash,
        reply: Reply<()>,
    },
    MarkAsMounted {
        resource_id: ResourceId,
        reply: Reply<PathBuf>,
    },
    MarkAsUnmounted {
        path: PathBuf,
        reply: Reply<()>,
    },
    Remove {
        resource_id: ResourceId,
        reply: Reply<()>,
    },
    FreeDiskSpaceIfNeededFor {
        bytes: u64,
        reply: Reply<bool>,
    },
    Iterate {
        reply: Reply<Vec<FileCacheEntry>>,
    },
}

// ============================================================================
// FileCache handle
// ============================================================================

/// Handle to the file cache worker
///
/// Cheap to clone; every clone talks to the same worker. The worker stops
/// once all handles are dropped.
#[derive(Clone)]
pub struct FileCache {
    tx: mpsc::Sender<CacheOp>,
    layout: Arc<CacheLayout>,
}

impl FileCache {
    /// Opens the bookkeeping database under `root` and starts the worker
    ///
    /// Call [`FileCache::initialize`] before anything else.
    ///
    /// # Errors
    ///
    /// Returns `CacheError` if the database cannot be opened or migrated.
    pub async fn open(
        root: impl Into<PathBuf>,
        free_space: Arc<dyn IFreeDiskSpaceGetter>,
        min_free_space: u64,
    ) -> Result<Self, CacheError> {
        let layout = CacheLayout::new(root);
        let pool = DatabasePool::new(&layout.database_path(), Schema::FileCache).await?;

        let layout = Arc::new(layout);
        let (tx, rx) = mpsc::channel(100);
        let worker = CacheWorker::new(
            rx,
            Arc::clone(&layout),
            pool.pool().clone(),
            free_space,
            min_free_space,
        );
        tokio::spawn(worker.run());

        Ok(Self { tx, layout })
    }

    /// Root directory of the cache
    pub fn root(&self) -> &Path {
        self.layout.root()
    }

    /// A fresh path under `tmp/` for staging a download
    pub fn temp_path(&self) -> PathBuf {
        self.layout.temp_path()
    }

    async fn request<T>(&self, op: impl FnOnce(Reply<T>) -> CacheOp) -> FileResult<T> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(op(tx))
            .await
            .map_err(|_| FileError::Failed("FileCache task has stopped".to_string()))?;

        rx.await
            .map_err(|_| FileError::Failed("FileCache response lost".to_string()))?
    }

    /// Creates the directories, drops temporaries and stale mount flags, and
    /// reconciles bookkeeping with the blobs actually on disk
    pub async fn initialize(&self) -> FileResult<()> {
        self.request(|reply| CacheOp::Initialize { reply }).await
    }

    pub async fn add_observer(&self, observer: Arc<dyn FileCacheObserver>) -> FileResult<()> {
        self.request(|reply| CacheOp::AddObserver { observer, reply })
            .await
    }

    /// The entry for `resource_id`, if any
    ///
    /// With `md5`, a clean entry cached under another hash counts as absent.
    pub async fn get_cache_entry(
        &self,
        resource_id: &ResourceId,
        md5: Option<&ContentHash>,
    ) -> FileResult<Option<FileCacheEntry>> {
        let resource_id = resource_id.clone();
        let md5 = md5.cloned();
        self.request(|reply| CacheOp::GetCacheEntry {
            resource_id,
            md5,
            reply,
        })
        .await
    }

    /// Path of the cached blob
    ///
    /// Fails with `NotFound` if the blob is absent or, for a clean entry,
    /// cached under a hash other than `md5`.
    pub async fn get_file(
        &self,
        resource_id: &ResourceId,
        md5: Option<&ContentHash>,
    ) -> FileResult<PathBuf> {
        let resource_id = resource_id.clone();
        let md5 = md5.cloned();
        self.request(|reply| CacheOp::GetFile {
            resource_id,
            md5,
            reply,
        })
        .await
    }

    /// Copies or moves `source` into the cache as the content of
    /// (`resource_id`, `md5`)
    pub async fn store(
        &self,
        resource_id: &ResourceId,
        md5: &ContentHash,
        source: &Path,
        operation: FileOperation,
    ) -> FileResult<()> {
        self.store_inner(resource_id, md5, source, operation, None)
            .await
    }

    /// Like [`FileCache::store`], but fails with `Aborted` without touching
    /// anything if `cancel` has fired by the time the worker gets to it
    pub async fn store_unless_cancelled(
        &self,
        resource_id: &ResourceId,
        md5: &ContentHash,
        source: &Path,
        operation: FileOperation,
        cancel: CancellationToken,
    ) -> FileResult<()> {
        self.store_inner(resource_id, md5, source, operation, Some(cancel))
            .await
    }

    async fn store_inner(
        &self,
        resource_id: &ResourceId,
        md5: &ContentHash,
        source: &Path,
        operation: FileOperation,
        cancel: Option<CancellationToken>,
    ) -> FileResult<()> {
        let resource_id = resource_id.clone();
        let md5 = md5.clone();
        let source = source.to_path_buf();
        self.request(|reply| CacheOp::Store {
            resource_id,
            md5,
            source,
            operation,
            cancel,
            reply,
        })
        .await
    }

    /// Marks the entry as wanted offline; idempotent
    pub async fn pin(&self, resource_id: &ResourceId, md5: &ContentHash) -> FileResult<()> {
        let resource_id = resource_id.clone();
        let md5 = md5.clone();
        self.request(|reply| CacheOp::Pin {
            resource_id,
            md5,
            reply,
        })
        .await
    }

    /// Clears the pin; observers cancel any pending fetch before this returns
    pub async fn unpin(&self, resource_id: &ResourceId) -> FileResult<()> {
        let resource_id = resource_id.clone();
        self.request(|reply| CacheOp::Unpin { resource_id, reply })
            .await
    }

    pub async fn mark_dirty(&self, resource_id: &ResourceId, md5: &ContentHash) -> FileResult<()> {
        let resource_id = resource_id.clone();
        let md5 = md5.clone();
        self.request(|reply| CacheOp::MarkDirty {
            resource_id,
            md5,
            reply,
        })
        .await
    }

    /// Clears the dirty flag and re-keys the blob under the uploaded hash
    pub async fn clear_dirty(&self, resource_id: &ResourceId, md5: &ContentHash) -> FileResult<()> {
        let resource_id = resource_id.clone();
        let md5 = md5.clone();
        self.request(|reply| CacheOp::ClearDirty {
            resource_id,
            md5,
            reply,
        })
        .await
    }

    /// Protects the blob from eviction and removal; returns its path
    pub async fn mark_as_mounted(&self, resource_id: &ResourceId) -> FileResult<PathBuf> {
        let resource_id = resource_id.clone();
        self.request(|reply| CacheOp::MarkAsMounted { resource_id, reply })
            .await
    }

    /// Releases the mount guard of the blob at `path`
    pub async fn mark_as_unmounted(&self, path: &Path) -> FileResult<()> {
        let path = path.to_path_buf();
        self.request(|reply| CacheOp::MarkAsUnmounted { path, reply })
            .await
    }

    /// Deletes the blob and its bookkeeping
    pub async fn remove(&self, resource_id: &ResourceId) -> FileResult<()> {
        let resource_id = resource_id.clone();
        self.request(|reply| CacheOp::Remove { resource_id, reply })
            .await
    }

    /// Evicts clean, unpinned, unmounted blobs until `bytes` fit while
    /// keeping the minimum free space; returns whether they fit
    pub async fn free_disk_space_if_needed_for(&self, bytes: u64) -> FileResult<bool> {
        self.request(|reply| CacheOp::FreeDiskSpaceIfNeededFor { bytes, reply })
            .await
    }

    /// Every entry, ordered by resource id
    pub async fn iterate(&self) -> FileResult<Vec<FileCacheEntry>> {
        self.request(|reply| CacheOp::Iterate { reply }).await
    }
}
