//! Change list loader
//!
//! Brings [`ResourceMetadata`] up to date with the remote change log. Three
//! kinds of load exist:
//!
//! - **Initial load**: the first load of the process. A usable local
//!   snapshot (largest changestamp > 0) releases waiters at once and the
//!   server check continues in the background.
//! - **Update load**: the about resource says the remote log moved; a delta
//!   (`get_change_list(local + 1)`) or, with no local snapshot, a full
//!   listing is applied.
//! - **Directory fast fetch**: one directory's listing, used to answer a
//!   lookup without waiting for a possibly large change list.
//!
//! ## Coalescing
//!
//! ```text
//! load_if_needed(dir A) ──┐
//! load_if_needed(dir A) ──┼──► pending["A"] = [w1, w2] ──► one driver task
//! load_if_needed(all)   ──┴──► pending[""]  = [w3]    ─┘      │
//!                                                              ▼
//!                                       about ─► fast fetch A ─► delta/full
//! ```
//!
//! Requests for a key already in flight only register as waiters. While any
//! key is pending the loader is *refreshing*; `check_for_updates` during a
//! refresh is queued and replayed when the refresh completes.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{broadcast, oneshot, watch};
use tracing::{debug, info, warn};

use drivecache_cache::ResourceMetadata;
use drivecache_core::domain::{
    ChangeList, DirectoryFetchInfo, FileError, FileResult, ResourceEntry, ResourceId,
};
use drivecache_core::ports::{AboutResource, IDriveService, RemoteEntry};
use drivecache_core::util::{grand_root_id, grand_root_path, my_drive_root_entry, my_drive_root_path};

/// Capacity of the event channel; slow subscribers see `Lagged`
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Notifications published by the loader
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoaderEvent {
    /// The children of the directory at this path changed
    DirectoryChanged(PathBuf),
    /// The first load of the process succeeded
    InitialLoadFinished,
}

/// One party waiting on a pending load; `None` only keeps the key pending
type Waiter = Option<oneshot::Sender<FileResult<()>>>;

#[derive(Default)]
struct LoaderState {
    loaded: bool,
    pending: HashMap<String, Vec<Waiter>>,
    pending_update_check: Option<Vec<Waiter>>,
    last_known_remote_changestamp: i64,
}

impl LoaderState {
    fn is_refreshing(&self) -> bool {
        !self.pending.is_empty()
    }
}

struct LoaderInner {
    metadata: Arc<ResourceMetadata>,
    service: Arc<dyn IDriveService>,
    state: Mutex<LoaderState>,
    events: broadcast::Sender<LoaderEvent>,
    refreshing: watch::Sender<bool>,
}

/// Loads the remote tree into the metadata store on demand
///
/// Cheap to clone; clones share one state.
#[derive(Clone)]
pub struct ChangeListLoader {
    inner: Arc<LoaderInner>,
}

impl ChangeListLoader {
    pub fn new(metadata: Arc<ResourceMetadata>, service: Arc<dyn IDriveService>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (refreshing, _) = watch::channel(false);
        Self {
            inner: Arc::new(LoaderInner {
                metadata,
                service,
                state: Mutex::new(LoaderState::default()),
                events,
                refreshing,
            }),
        }
    }

    /// Subscribes to directory-changed and initial-load notifications
    pub fn subscribe(&self) -> broadcast::Receiver<LoaderEvent> {
        self.inner.events.subscribe()
    }

    /// Whether a load has completed successfully at least once
    pub fn is_loaded(&self) -> bool {
        self.inner.state().loaded
    }

    /// Whether any load is in flight
    pub fn is_refreshing(&self) -> bool {
        self.inner.state().is_refreshing()
    }

    /// Resolves once no load is in flight
    pub async fn wait_until_idle(&self) {
        let mut rx = self.inner.refreshing.subscribe();
        let _ = rx.wait_for(|refreshing| !*refreshing).await;
    }

    /// Ensures the tree, or one directory of it, is loaded
    ///
    /// Once loaded, a whole-tree request returns at once. A directory request
    /// also returns at once unless a refresh is running, in which case the
    /// directory is fast-fetched rather than waiting for the change list.
    pub async fn load_if_needed(&self, fetch_info: DirectoryFetchInfo) -> FileResult<()> {
        let rx = {
            let mut st = self.inner.state();
            if st.loaded && (fetch_info.is_empty() || !st.is_refreshing()) {
                return Ok(());
            }
            let (tx, rx) = oneshot::channel();
            self.inner.load(&mut st, fetch_info, Some(tx));
            self.inner.publish_refreshing(&st);
            rx
        };
        wait(rx).await
    }

    /// Checks the server for changes and applies them
    ///
    /// Registration happens before this returns, so dropping the future
    /// still runs the check. A check requested during a refresh runs after
    /// it; before the first successful load the request is ignored.
    pub fn check_for_updates(&self) -> impl Future<Output = FileResult<()>> + Send + 'static {
        let (tx, rx) = oneshot::channel();
        {
            let mut st = self.inner.state();
            self.inner.check_for_updates_locked(&mut st, vec![Some(tx)]);
            self.inner.publish_refreshing(&st);
        }
        wait(rx)
    }

    /// Re-fetches one directory's listing regardless of its changestamp
    ///
    /// The directory is stamped with the newer of its known changestamp and
    /// the current remote head.
    pub async fn refresh_directory(&self, fetch_info: DirectoryFetchInfo) -> FileResult<()> {
        let resource_id = fetch_info
            .resource_id()
            .cloned()
            .ok_or(FileError::InvalidOperation)?;

        let about = self.inner.service.get_about_resource().await?;
        let remote = about.largest_changestamp;
        self.inner.state().last_known_remote_changestamp = remote;

        let info = DirectoryFetchInfo::new(resource_id, fetch_info.changestamp().max(remote));
        self.inner.do_load_directory_from_server(&info).await
    }
}

async fn wait(rx: oneshot::Receiver<FileResult<()>>) -> FileResult<()> {
    rx.await
        .map_err(|_| FileError::Failed("ChangeListLoader dropped a pending load".to_string()))?
}

fn reply_all(waiters: Vec<Waiter>, result: &FileResult<()>) {
    for waiter in waiters.into_iter().flatten() {
        let _ = waiter.send(result.clone());
    }
}

// ============================================================================
// State machine
// ============================================================================

impl LoaderInner {
    fn state(&self) -> MutexGuard<'_, LoaderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish_refreshing(&self, st: &LoaderState) {
        self.refreshing.send_replace(st.is_refreshing());
    }

    fn notify(&self, event: LoaderEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Registers `waiter` under the key of `fetch_info`, starting a driver
    /// task if the key was not already pending
    fn load(self: &Arc<Self>, st: &mut LoaderState, fetch_info: DirectoryFetchInfo, waiter: Waiter) {
        let key = fetch_info.key();
        let is_initial_load = !st.loaded && !st.is_refreshing();

        if let Some(waiters) = st.pending.get_mut(&key) {
            debug!(key = %key, "Load already in flight, waiting on it");
            waiters.push(waiter);
            return;
        }
        st.pending.insert(key.clone(), vec![waiter]);

        // Keeps the loader refreshing until the tree load behind this
        // directory load is done.
        if is_initial_load && !fetch_info.is_empty() {
            st.pending.entry(String::new()).or_default().push(None);
        }

        debug!(key = %key, is_initial_load, "Starting load");
        let inner = Arc::clone(self);
        tokio::spawn(async move { inner.run_load(fetch_info, is_initial_load).await });
    }

    fn check_for_updates_locked(self: &Arc<Self>, st: &mut LoaderState, waiters: Vec<Waiter>) {
        if st.is_refreshing() {
            debug!("Refresh in flight, queueing update check");
            st.pending_update_check
                .get_or_insert_with(Vec::new)
                .extend(waiters);
        } else if st.loaded {
            info!("Checking for updates");
            self.load(st, DirectoryFetchInfo::empty(), None);
            st.pending.entry(String::new()).or_default().extend(waiters);
        } else {
            debug!("Not loaded yet, ignoring update check");
            reply_all(waiters, &Ok(()));
        }
    }

    /// Flushes every waiter with `result`; the first success marks the
    /// loader loaded
    fn complete_change_list_load_locked(self: &Arc<Self>, st: &mut LoaderState, result: FileResult<()>) {
        if !st.loaded && result.is_ok() {
            st.loaded = true;
            info!("Initial load finished");
            self.notify(LoaderEvent::InitialLoadFinished);
        }
        if let Err(e) = &result {
            warn!(error = %e, code = e.code(), "Change list load failed");
        }

        for (_, waiters) in std::mem::take(&mut st.pending) {
            reply_all(waiters, &result);
        }

        if let Some(waiters) = st.pending_update_check.take() {
            self.check_for_updates_locked(st, waiters);
        }
    }

    fn complete_change_list_load(self: &Arc<Self>, result: FileResult<()>) {
        let mut st = self.state();
        self.complete_change_list_load_locked(&mut st, result);
        self.publish_refreshing(&st);
    }

    /// Flushes the waiters of one directory key
    fn complete_directory_load(&self, fetch_info: &DirectoryFetchInfo, result: FileResult<()>) {
        let mut st = self.state();
        if let Some(waiters) = st.pending.remove(&fetch_info.key()) {
            reply_all(waiters, &result);
        }
        self.publish_refreshing(&st);
    }

    async fn run_load(self: Arc<Self>, fetch_info: DirectoryFetchInfo, is_initial_load: bool) {
        let local_changestamp = match self.metadata.get_largest_changestamp().await {
            Ok(changestamp) => changestamp,
            Err(e) => {
                self.complete_change_list_load(Err(e));
                return;
            }
        };

        if is_initial_load {
            self.do_initial_load(fetch_info, local_changestamp).await;
        } else {
            self.do_update_load(fetch_info, local_changestamp).await;
        }
    }

    async fn do_initial_load(self: &Arc<Self>, fetch_info: DirectoryFetchInfo, local_changestamp: i64) {
        if local_changestamp > 0 {
            info!(local_changestamp, "Local snapshot usable, checking server in background");
            let mut st = self.state();
            self.complete_change_list_load_locked(&mut st, Ok(()));
            // Still fetching: keep the keys pending.
            st.pending.entry(fetch_info.key()).or_default().push(None);
            if !fetch_info.is_empty() {
                st.pending.entry(String::new()).or_default().push(None);
            }
            self.publish_refreshing(&st);
        }

        self.load_from_server_if_needed(fetch_info, local_changestamp)
            .await;
    }

    async fn do_update_load(self: &Arc<Self>, fetch_info: DirectoryFetchInfo, local_changestamp: i64) {
        if fetch_info.is_empty() {
            self.load_from_server_if_needed(fetch_info, local_changestamp)
                .await;
        } else {
            let result = self
                .check_changestamp_and_load_directory_if_needed(&fetch_info, local_changestamp)
                .await;
            self.complete_directory_load(&fetch_info, result);
        }
    }

    async fn load_from_server_if_needed(self: &Arc<Self>, fetch_info: DirectoryFetchInfo, local_changestamp: i64) {
        let about = match self.service.get_about_resource().await {
            Ok(about) => about,
            Err(e) => {
                self.complete_change_list_load(Err(e.into()));
                return;
            }
        };

        let remote_changestamp = about.largest_changestamp;
        self.state().last_known_remote_changestamp = remote_changestamp;

        if local_changestamp >= remote_changestamp {
            if local_changestamp > remote_changestamp {
                warn!(
                    local_changestamp,
                    remote_changestamp,
                    "Local changestamp is ahead of the server"
                );
            }
            debug!(local_changestamp, "Metadata is up to date");
            self.complete_change_list_load(Ok(()));
            return;
        }

        let start_changestamp = if local_changestamp > 0 {
            local_changestamp + 1
        } else {
            0
        };

        if !fetch_info.is_empty() {
            match self
                .check_changestamp_and_load_directory_if_needed(&fetch_info, local_changestamp)
                .await
            {
                Ok(()) => self.complete_directory_load(&fetch_info, Ok(())),
                Err(e) => debug!(error = %e, "Fast fetch failed, waiting for the change list"),
            }
        }

        let result = self.load_change_list_from_server(&about, start_changestamp).await;
        self.complete_change_list_load(result);
    }

    async fn load_change_list_from_server(&self, about: &AboutResource, start_changestamp: i64) -> FileResult<()> {
        let is_delta = start_changestamp != 0;
        let list = if is_delta {
            self.service.get_change_list(start_changestamp).await?
        } else {
            self.service.get_resource_list(None).await?
        };
        let count = list.entries.len();
        let change_list: ChangeList = list.into();

        let changed_dirs = self
            .metadata
            .apply_change_list(&change_list, Some(&about.root_resource_id), is_delta)
            .await?;

        info!(
            is_delta,
            start_changestamp,
            changes = count,
            changed_dirs = changed_dirs.len(),
            "Applied change list"
        );
        for dir in changed_dirs {
            self.notify(LoaderEvent::DirectoryChanged(dir));
        }
        Ok(())
    }

    /// Fast-fetches the directory unless its listing is already as new as
    /// the last known remote changestamp
    async fn check_changestamp_and_load_directory_if_needed(
        &self,
        fetch_info: &DirectoryFetchInfo,
        local_changestamp: i64,
    ) -> FileResult<()> {
        let resource_id = fetch_info
            .resource_id()
            .ok_or(FileError::InvalidOperation)?;
        let directory_changestamp = fetch_info.changestamp().max(local_changestamp);
        let last_known = self.state().last_known_remote_changestamp;

        if last_known > 0 && directory_changestamp >= last_known {
            debug!(resource_id = %resource_id, directory_changestamp, "Directory is fresh");
            return Ok(());
        }

        let info = DirectoryFetchInfo::new(
            resource_id.clone(),
            directory_changestamp.max(last_known),
        );
        self.do_load_directory_from_server(&info).await
    }

    async fn do_load_directory_from_server(&self, fetch_info: &DirectoryFetchInfo) -> FileResult<()> {
        let resource_id = fetch_info
            .resource_id()
            .ok_or(FileError::InvalidOperation)?;

        if *resource_id == grand_root_id() {
            return self.load_grand_root().await;
        }

        debug!(resource_id = %resource_id, "Fast-fetching directory");
        let list = self.service.get_resource_list(Some(resource_id)).await?;
        let entries: Vec<ResourceEntry> = list
            .entries
            .into_iter()
            .filter(|e| !e.is_deleted)
            .map(RemoteEntry::into_entry)
            .collect();
        let count = entries.len();

        let path = self.metadata.refresh_directory(fetch_info, entries).await?;
        info!(path = %path.display(), entries = count, "Directory fast-fetched");
        self.notify(LoaderEvent::DirectoryChanged(path));
        Ok(())
    }

    /// The grand root holds only `other` and My Drive; the latter is added
    /// once its id is known from the about resource
    async fn load_grand_root(&self) -> FileResult<()> {
        match self
            .metadata
            .get_resource_entry_by_path(&my_drive_root_path())
            .await
        {
            Ok(_) => return Ok(()),
            Err(FileError::NotFound) => {}
            Err(e) => return Err(e),
        }

        let about = self.service.get_about_resource().await?;
        let root_id: ResourceId = about.root_resource_id;
        self.metadata.add_entry(my_drive_root_entry(root_id.clone())).await?;
        info!(root = %root_id, "Added My Drive root");
        self.notify(LoaderEvent::DirectoryChanged(grand_root_path()));
        Ok(())
    }
}
