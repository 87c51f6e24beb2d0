//! Background fetch and upload scheduling
//!
//! The [`SyncClient`] keeps pinned files present in the cache and pushes
//! dirty files to the server.
//!
//! ## Architecture
//!
//! ```text
//! FileCache worker ── on_cache_pinned ──► add fetch task ──┐
//!                 └── on_cache_unpinned ─► cancel token    │
//!                                                          ▼
//!  start_processing_backlog ───────────────────► active: DashMap<id, task>
//!                                                          │ spawn
//!                                                          ▼
//!                                  sleep(delay) ─► semaphore permit ─► run
//! ```
//!
//! - **One task per resource**: a second request for an id with a task in
//!   flight is dropped.
//! - **Delay**: every task waits before starting, so a pin immediately
//!   followed by an unpin never downloads.
//! - **Cancellation**: unpin cancels the fetch token on the cache worker,
//!   before `FileCache::unpin` returns; a cancelled fetch never stores.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::{watch, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use drivecache_cache::{FileCache, FileCacheObserver, FileOperation, ResourceMetadata};
use drivecache_core::config::SyncConfig;
use drivecache_core::domain::{ContentHash, FileError, FileResult, ResourceId};
use drivecache_core::ports::IDriveService;

use crate::update_operation::{ClientContext, UpdateOperation};

/// Kind of background task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncType {
    Fetch,
    Upload,
}

struct ActiveTask {
    kind: SyncType,
    cancel: CancellationToken,
    generation: u64,
}

struct SyncInner {
    metadata: Arc<ResourceMetadata>,
    cache: FileCache,
    service: Arc<dyn IDriveService>,
    update: UpdateOperation,
    active: DashMap<ResourceId, ActiveTask>,
    semaphore: Semaphore,
    delay_ms: AtomicU64,
    next_generation: AtomicU64,
    /// Number of spawned tasks that have not finished
    running: watch::Sender<usize>,
}

/// Schedules fetches of pinned files and uploads of dirty files
#[derive(Clone)]
pub struct SyncClient {
    inner: Arc<SyncInner>,
}

impl SyncClient {
    /// Creates the client and registers it as a cache observer
    pub async fn new(
        metadata: Arc<ResourceMetadata>,
        cache: FileCache,
        service: Arc<dyn IDriveService>,
        config: &SyncConfig,
    ) -> FileResult<Self> {
        let update = UpdateOperation::new(Arc::clone(&metadata), cache.clone(), Arc::clone(&service));
        let (running, _) = watch::channel(0);
        let inner = Arc::new(SyncInner {
            metadata,
            cache: cache.clone(),
            service,
            update,
            active: DashMap::new(),
            semaphore: Semaphore::new(config.max_concurrent_tasks.max(1) as usize),
            delay_ms: AtomicU64::new(config.delay_ms),
            next_generation: AtomicU64::new(1),
            running,
        });

        cache
            .add_observer(Arc::new(SyncObserver {
                inner: Arc::downgrade(&inner),
            }))
            .await?;

        info!(
            delay_ms = config.delay_ms,
            max_concurrent_tasks = config.max_concurrent_tasks,
            "Sync client started"
        );
        Ok(Self { inner })
    }

    /// How long new tasks wait before starting
    pub fn set_delay(&self, delay: Duration) {
        let ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.inner.delay_ms.store(ms, Ordering::SeqCst);
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.inner.delay_ms.load(Ordering::SeqCst))
    }

    pub fn add_fetch_task(&self, resource_id: &ResourceId) {
        self.inner.add_task(resource_id.clone(), SyncType::Fetch);
    }

    pub fn add_upload_task(&self, resource_id: &ResourceId) {
        self.inner.add_task(resource_id.clone(), SyncType::Upload);
    }

    /// Cancels a scheduled upload of `resource_id`; an upload already
    /// talking to the server runs to completion
    pub fn cancel_upload(&self, resource_id: &ResourceId) {
        self.inner.cancel_task(resource_id, SyncType::Upload);
    }

    /// Whether a task is scheduled or running for `resource_id`
    pub fn has_task(&self, resource_id: &ResourceId) -> Option<SyncType> {
        self.inner.active.get(resource_id).map(|t| t.kind)
    }

    /// Schedules fetches for pinned entries missing their blob and uploads
    /// for dirty entries
    pub async fn start_processing_backlog(&self) -> FileResult<()> {
        let entries = self.inner.cache.iterate().await?;
        let mut fetches = 0usize;
        let mut uploads = 0usize;

        for entry in entries {
            if entry.is_pinned && !entry.is_present {
                self.inner.add_task(entry.resource_id, SyncType::Fetch);
                fetches += 1;
            } else if entry.is_dirty {
                self.inner.add_task(entry.resource_id, SyncType::Upload);
                uploads += 1;
            }
        }

        info!(fetches, uploads, "Processing backlog");
        Ok(())
    }

    /// Re-fetches pinned, clean blobs whose hash no longer matches metadata
    pub async fn start_checking_existing_pinned_files(&self) -> FileResult<()> {
        let entries = self.inner.cache.iterate().await?;
        let mut stale = 0usize;

        for entry in entries {
            if !entry.is_pinned || !entry.is_present || entry.is_dirty {
                continue;
            }
            let current = match self
                .inner
                .metadata
                .get_resource_entry_by_id(&entry.resource_id)
                .await
            {
                Ok(current) => current,
                Err(FileError::NotFound) => {
                    debug!(resource_id = %entry.resource_id, "Pinned entry gone from metadata");
                    continue;
                }
                Err(e) => return Err(e),
            };
            if current.md5.as_ref().is_some_and(|md5| *md5 != entry.md5) {
                self.inner.add_task(entry.resource_id, SyncType::Fetch);
                stale += 1;
            }
        }

        info!(stale, "Checked existing pinned files");
        Ok(())
    }

    /// Resolves once every scheduled task has finished
    pub async fn wait_for_idle(&self) {
        let mut rx = self.inner.running.subscribe();
        let _ = rx.wait_for(|running| *running == 0).await;
    }

    /// Cancels every scheduled task
    pub fn cancel_all(&self) {
        let count = self.inner.active.len();
        for task in self.inner.active.iter() {
            task.cancel.cancel();
        }
        self.inner.active.clear();
        info!(count, "Cancelled all sync tasks");
    }
}

// ============================================================================
// Task execution
// ============================================================================

impl SyncInner {
    fn add_task(self: &Arc<Self>, resource_id: ResourceId, kind: SyncType) {
        let cancel = CancellationToken::new();
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);

        match self.active.entry(resource_id.clone()) {
            Entry::Occupied(existing) => {
                debug!(
                    resource_id = %resource_id,
                    existing = ?existing.get().kind,
                    requested = ?kind,
                    "Task already scheduled"
                );
                return;
            }
            Entry::Vacant(slot) => {
                slot.insert(ActiveTask {
                    kind,
                    cancel: cancel.clone(),
                    generation,
                });
            }
        }

        self.running.send_modify(|n| *n += 1);
        debug!(resource_id = %resource_id, ?kind, "Task scheduled");

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            match inner.run_task(&resource_id, kind, &cancel).await {
                Ok(()) => debug!(resource_id = %resource_id, ?kind, "Task finished"),
                Err(FileError::Aborted) => {
                    debug!(resource_id = %resource_id, ?kind, "Task cancelled")
                }
                Err(e) => warn!(
                    resource_id = %resource_id,
                    ?kind,
                    error = %e,
                    code = e.code(),
                    "Task failed"
                ),
            }
            inner
                .active
                .remove_if(&resource_id, |_, task| task.generation == generation);
            inner.running.send_modify(|n| *n = n.saturating_sub(1));
        });
    }

    /// Cancels the task of `kind` for `resource_id`, if one is scheduled
    fn cancel_task(&self, resource_id: &ResourceId, kind: SyncType) {
        if let Some((_, task)) = self.active.remove_if(resource_id, |_, task| task.kind == kind) {
            task.cancel.cancel();
            info!(resource_id = %resource_id, ?kind, "Task cancelled");
        }
    }

    fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms.load(Ordering::SeqCst))
    }

    async fn run_task(
        &self,
        resource_id: &ResourceId,
        kind: SyncType,
        cancel: &CancellationToken,
    ) -> FileResult<()> {
        tokio::select! {
            _ = cancel.cancelled() => return Err(FileError::Aborted),
            _ = tokio::time::sleep(self.delay()) => {}
        }

        let _permit = tokio::select! {
            _ = cancel.cancelled() => return Err(FileError::Aborted),
            permit = self.semaphore.acquire() => permit
                .map_err(|_| FileError::Failed("sync semaphore closed".to_string()))?,
        };

        match kind {
            SyncType::Fetch => self.fetch(resource_id, cancel).await,
            SyncType::Upload => {
                self.update
                    .update_file_by_resource_id(resource_id, ClientContext::Background)
                    .await
            }
        }
    }

    async fn fetch(&self, resource_id: &ResourceId, cancel: &CancellationToken) -> FileResult<()> {
        let entry = self.metadata.get_resource_entry_by_id(resource_id).await?;
        if entry.is_directory {
            return Err(FileError::NotAFile);
        }
        let md5 = entry.md5.ok_or(FileError::NotAFile)?;

        match self.cache.get_cache_entry(resource_id, None).await? {
            Some(cached) if cached.is_pinned => {}
            _ => {
                debug!(resource_id = %resource_id, "No longer pinned, skipping fetch");
                return Ok(());
            }
        }
        if let Some(cached) = self.cache.get_cache_entry(resource_id, Some(&md5)).await? {
            if cached.is_present {
                debug!(resource_id = %resource_id, "Already cached");
                return Ok(());
            }
        }

        download_to_cache(
            &self.cache,
            self.service.as_ref(),
            resource_id,
            &md5,
            Some(cancel),
        )
        .await?;
        info!(resource_id = %resource_id, md5 = %md5, "Fetched pinned file");
        Ok(())
    }
}

/// Downloads the content of `resource_id` and stores it in the cache under
/// `md5`
///
/// With a token, a cancellation before the store commits yields `Aborted`
/// and leaves the cache untouched.
pub(crate) async fn download_to_cache(
    cache: &FileCache,
    service: &dyn IDriveService,
    resource_id: &ResourceId,
    md5: &ContentHash,
    cancel: Option<&CancellationToken>,
) -> FileResult<()> {
    let content = match cancel {
        Some(token) => tokio::select! {
            _ = token.cancelled() => return Err(FileError::Aborted),
            content = service.download_file(resource_id) => content?,
        },
        None => service.download_file(resource_id).await?,
    };

    let temp = cache.temp_path();
    tokio::fs::write(&temp, &content).await?;

    let stored = match cancel {
        Some(token) => {
            cache
                .store_unless_cancelled(resource_id, md5, &temp, FileOperation::Move, token.clone())
                .await
        }
        None => {
            cache
                .store(resource_id, md5, &temp, FileOperation::Move)
                .await
        }
    };
    if stored.is_err() {
        let _ = tokio::fs::remove_file(&temp).await;
    }
    stored
}

// ============================================================================
// Cache observer
// ============================================================================

/// Runs on the cache worker: pin schedules a fetch, unpin cancels it
struct SyncObserver {
    inner: Weak<SyncInner>,
}

impl FileCacheObserver for SyncObserver {
    fn on_cache_pinned(&self, resource_id: &ResourceId, _md5: &ContentHash) {
        if let Some(inner) = self.inner.upgrade() {
            inner.add_task(resource_id.clone(), SyncType::Fetch);
        }
    }

    fn on_cache_unpinned(&self, resource_id: &ResourceId, _md5: &ContentHash) {
        if let Some(inner) = self.inner.upgrade() {
            inner.cancel_task(resource_id, SyncType::Fetch);
        }
    }
}
