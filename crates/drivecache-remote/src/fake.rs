//! In-memory remote service
//!
//! [`FakeDriveService`] serves a canned tree from memory, counts the calls the
//! loader cares about and can be switched offline. Server-side edits
//! ([`FakeDriveService::add_file`], [`FakeDriveService::modify_file`], uploads,
//! new directories, deletions) advance the change log the way the real
//! service does, so delta loads see them.
//!
//! ## Fixture tree
//!
//! ```text
//! folder:root (My Drive)
//! ├── File 1.txt                       file:2_file_resource_id
//! ├── Duplicate Name.txt               file:3_file_resource_id
//! ├── Duplicate Name.txt               file:4_file_resource_id
//! ├── Slash / in file 1.txt            file:slash_file_resource_id
//! ├── Slash / in directory/            folder:slash_dir_folder_resource_id
//! │   └── Slash SubDir File.txt        file:slash_subdir_file
//! └── Directory 1/                     folder:1_folder_resource_id
//!     ├── SubDirectory File 1.txt      file:subdirectory_file_1_id
//!     ├── Shared To The Account Owner.txt  file:subdirectory_unowned_file_1_id
//!     └── Sub Directory Folder/        folder:sub_dir_folder_resource_id
//!         └── Sub Sub Directory Folder/  folder:sub_sub_directory_folder_id
//! Orphan File 1.txt (no parent)        file:1_orphanfile_resource_id
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

use drivecache_core::domain::{ContentHash, ResourceId};
use drivecache_core::ports::{
    AboutResource, IDriveService, RemoteEntry, ResourceList, ServiceError,
};
use tracing::debug;

/// Resource id of My Drive in the fixture
pub const FAKE_ROOT_RESOURCE_ID: &str = "folder:root";

/// Change log head of the fixture
pub const FAKE_LARGEST_CHANGESTAMP: i64 = 654321;

/// Quota reported by the about resource
pub const FAKE_QUOTA_BYTES_TOTAL: u64 = 9_876_543_210;
pub const FAKE_QUOTA_BYTES_USED: u64 = 6_789_012_345;

/// Content of `File 1.txt`
pub const FAKE_FILE_1_CONTENT: &[u8] = b"This is some test content.";

struct FakeState {
    largest_changestamp: i64,
    /// Live entries and tombstones, keyed by id
    entries: BTreeMap<ResourceId, RemoteEntry>,
    contents: HashMap<ResourceId, Vec<u8>>,
    next_new_id: u64,
}

impl FakeState {
    fn bump_changestamp(&mut self) -> i64 {
        self.largest_changestamp += 1;
        self.largest_changestamp
    }

    fn is_directory(&self, id: &ResourceId) -> bool {
        id.as_str() == FAKE_ROOT_RESOURCE_ID
            || self
                .entries
                .get(id)
                .is_some_and(|e| e.is_directory && !e.is_deleted)
    }

    fn live_entry(&self, id: &ResourceId) -> Result<&RemoteEntry, ServiceError> {
        self.entries
            .get(id)
            .filter(|e| !e.is_deleted)
            .ok_or(ServiceError::NotFound)
    }

    fn insert_file(&mut self, id: ResourceId, parent: Option<ResourceId>, title: &str, content: Vec<u8>, changestamp: i64) -> RemoteEntry {
        let entry = RemoteEntry {
            resource_id: id.clone(),
            parent_resource_id: parent,
            title: title.to_string(),
            is_directory: false,
            size: content.len() as u64,
            md5: Some(ContentHash::md5_of(&content)),
            is_deleted: false,
            changestamp,
            modified: None,
        };
        self.entries.insert(id.clone(), entry.clone());
        self.contents.insert(id, content);
        entry
    }

    fn insert_directory(&mut self, id: ResourceId, parent: ResourceId, title: &str, changestamp: i64) -> RemoteEntry {
        let entry = RemoteEntry {
            resource_id: id.clone(),
            parent_resource_id: Some(parent),
            title: title.to_string(),
            is_directory: true,
            size: 0,
            md5: None,
            is_deleted: false,
            changestamp,
            modified: None,
        };
        self.entries.insert(id, entry.clone());
        entry
    }
}

/// In-memory [`IDriveService`]
pub struct FakeDriveService {
    state: Mutex<FakeState>,
    offline: AtomicBool,
    about_resource_load_count: AtomicUsize,
    resource_list_load_count: AtomicUsize,
    directory_load_count: AtomicUsize,
    change_list_load_count: AtomicUsize,
    download_count: AtomicUsize,
    upload_count: AtomicUsize,
    downloads_held: AtomicBool,
    download_held: Notify,
    downloads_released: Notify,
}

impl Default for FakeDriveService {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeDriveService {
    /// Creates a service holding the fixture tree
    pub fn new() -> Self {
        let mut state = FakeState {
            largest_changestamp: FAKE_LARGEST_CHANGESTAMP,
            entries: BTreeMap::new(),
            contents: HashMap::new(),
            next_new_id: 1,
        };
        load_fixture(&mut state);

        Self {
            state: Mutex::new(state),
            offline: AtomicBool::new(false),
            about_resource_load_count: AtomicUsize::new(0),
            resource_list_load_count: AtomicUsize::new(0),
            directory_load_count: AtomicUsize::new(0),
            change_list_load_count: AtomicUsize::new(0),
            download_count: AtomicUsize::new(0),
            upload_count: AtomicUsize::new(0),
            downloads_held: AtomicBool::new(false),
            download_held: Notify::new(),
            downloads_released: Notify::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_online(&self) -> Result<(), ServiceError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(ServiceError::NoConnection);
        }
        Ok(())
    }

    /// Resource id of My Drive
    pub fn root_resource_id(&self) -> ResourceId {
        ResourceId::from_static(FAKE_ROOT_RESOURCE_ID)
    }

    /// When offline every call fails with `NoConnection` and is not counted
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// While held, downloads block before returning any content
    pub fn set_downloads_held(&self, held: bool) {
        self.downloads_held.store(held, Ordering::SeqCst);
        if !held {
            self.downloads_released.notify_waiters();
        }
    }

    /// Resolves once a download is blocked by [`Self::set_downloads_held`]
    pub async fn wait_for_held_download(&self) {
        self.download_held.notified().await;
    }

    async fn wait_while_downloads_held(&self) {
        if !self.downloads_held.load(Ordering::SeqCst) {
            return;
        }
        self.download_held.notify_one();
        loop {
            let released = self.downloads_released.notified();
            tokio::pin!(released);
            released.as_mut().enable();
            if !self.downloads_held.load(Ordering::SeqCst) {
                return;
            }
            released.await;
        }
    }

    pub fn largest_changestamp(&self) -> i64 {
        self.state().largest_changestamp
    }

    /// Moves the change log head without changing any entry
    pub fn set_largest_changestamp(&self, changestamp: i64) {
        self.state().largest_changestamp = changestamp;
    }

    pub fn about_resource_load_count(&self) -> usize {
        self.about_resource_load_count.load(Ordering::SeqCst)
    }

    pub fn resource_list_load_count(&self) -> usize {
        self.resource_list_load_count.load(Ordering::SeqCst)
    }

    pub fn directory_load_count(&self) -> usize {
        self.directory_load_count.load(Ordering::SeqCst)
    }

    pub fn change_list_load_count(&self) -> usize {
        self.change_list_load_count.load(Ordering::SeqCst)
    }

    pub fn download_count(&self) -> usize {
        self.download_count.load(Ordering::SeqCst)
    }

    pub fn upload_count(&self) -> usize {
        self.upload_count.load(Ordering::SeqCst)
    }

    /// Current server-side state of an entry (live or tombstone)
    pub fn entry(&self, resource_id: &ResourceId) -> Option<RemoteEntry> {
        self.state().entries.get(resource_id).cloned()
    }

    /// Current server-side content of a file
    pub fn content(&self, resource_id: &ResourceId) -> Option<Vec<u8>> {
        self.state().contents.get(resource_id).cloned()
    }

    /// Creates a file on the server side, as another client would
    pub fn add_file(
        &self,
        parent_id: &ResourceId,
        title: &str,
        content: &[u8],
    ) -> Result<RemoteEntry, ServiceError> {
        let mut state = self.state();
        if !state.is_directory(parent_id) {
            return Err(ServiceError::NotFound);
        }
        let id = new_resource_id(&mut state, "file");
        let changestamp = state.bump_changestamp();
        Ok(state.insert_file(id, Some(parent_id.clone()), title, content.to_vec(), changestamp))
    }

    /// Replaces a file's content on the server side, as another client would
    pub fn modify_file(
        &self,
        resource_id: &ResourceId,
        content: &[u8],
    ) -> Result<RemoteEntry, ServiceError> {
        replace_content(&mut self.state(), resource_id, content.to_vec())
    }
}

fn new_resource_id(state: &mut FakeState, kind: &str) -> ResourceId {
    let n = state.next_new_id;
    state.next_new_id += 1;
    ResourceId::new(format!("{kind}:new_{n}")).unwrap_or_else(|_| ResourceId::from_static("file:new"))
}

fn replace_content(
    state: &mut FakeState,
    resource_id: &ResourceId,
    content: Vec<u8>,
) -> Result<RemoteEntry, ServiceError> {
    let entry = state.live_entry(resource_id)?;
    if entry.is_directory {
        return Err(ServiceError::Http {
            status: 400,
            message: "cannot upload content to a folder".to_string(),
        });
    }
    let parent = entry.parent_resource_id.clone();
    let title = entry.title.clone();
    let changestamp = state.bump_changestamp();
    Ok(state.insert_file(resource_id.clone(), parent, &title, content, changestamp))
}

fn load_fixture(state: &mut FakeState) {
    let cs = FAKE_LARGEST_CHANGESTAMP;
    let root = ResourceId::from_static(FAKE_ROOT_RESOURCE_ID);
    let id = ResourceId::from_static;

    state.insert_file(id("file:2_file_resource_id"), Some(root.clone()), "File 1.txt", FAKE_FILE_1_CONTENT.to_vec(), cs);
    state.insert_file(id("file:3_file_resource_id"), Some(root.clone()), "Duplicate Name.txt", b"Duplicate one".to_vec(), cs);
    state.insert_file(id("file:4_file_resource_id"), Some(root.clone()), "Duplicate Name.txt", b"Duplicate two".to_vec(), cs);
    state.insert_file(id("file:slash_file_resource_id"), Some(root.clone()), "Slash / in file 1.txt", b"Slash in the title".to_vec(), cs);

    let slash_dir = id("folder:slash_dir_folder_resource_id");
    state.insert_directory(slash_dir.clone(), root.clone(), "Slash / in directory", cs);
    state.insert_file(id("file:slash_subdir_file"), Some(slash_dir), "Slash SubDir File.txt", b"Under a slashed directory".to_vec(), cs);

    let dir1 = id("folder:1_folder_resource_id");
    state.insert_directory(dir1.clone(), root, "Directory 1", cs);
    state.insert_file(id("file:subdirectory_file_1_id"), Some(dir1.clone()), "SubDirectory File 1.txt", b"Sub directory content".to_vec(), cs);
    state.insert_file(id("file:subdirectory_unowned_file_1_id"), Some(dir1.clone()), "Shared To The Account Owner.txt", b"Shared content".to_vec(), cs);

    let sub_dir = id("folder:sub_dir_folder_resource_id");
    state.insert_directory(sub_dir.clone(), dir1, "Sub Directory Folder", cs);
    state.insert_directory(id("folder:sub_sub_directory_folder_id"), sub_dir, "Sub Sub Directory Folder", cs);

    state.insert_file(id("file:1_orphanfile_resource_id"), None, "Orphan File 1.txt", b"Nobody's child".to_vec(), cs);
}

#[async_trait::async_trait]
impl IDriveService for FakeDriveService {
    async fn get_about_resource(&self) -> Result<AboutResource, ServiceError> {
        self.check_online()?;
        self.about_resource_load_count.fetch_add(1, Ordering::SeqCst);
        Ok(AboutResource {
            largest_changestamp: self.state().largest_changestamp,
            root_resource_id: self.root_resource_id(),
            quota_bytes_total: FAKE_QUOTA_BYTES_TOTAL,
            quota_bytes_used: FAKE_QUOTA_BYTES_USED,
        })
    }

    async fn get_resource_list(
        &self,
        directory_id: Option<&ResourceId>,
    ) -> Result<ResourceList, ServiceError> {
        self.check_online()?;
        let state = self.state();

        let entries: Vec<RemoteEntry> = match directory_id {
            None => {
                self.resource_list_load_count.fetch_add(1, Ordering::SeqCst);
                state
                    .entries
                    .values()
                    .filter(|e| !e.is_deleted)
                    .cloned()
                    .collect()
            }
            Some(dir) => {
                if !state.is_directory(dir) {
                    return Err(ServiceError::NotFound);
                }
                self.directory_load_count.fetch_add(1, Ordering::SeqCst);
                state
                    .entries
                    .values()
                    .filter(|e| !e.is_deleted && e.parent_resource_id.as_ref() == Some(dir))
                    .cloned()
                    .collect()
            }
        };

        debug!(directory = ?directory_id.map(ResourceId::as_str), entries = entries.len(), "Fake resource list");
        Ok(ResourceList {
            entries,
            largest_changestamp: state.largest_changestamp,
        })
    }

    async fn get_change_list(&self, start_changestamp: i64) -> Result<ResourceList, ServiceError> {
        self.check_online()?;
        self.change_list_load_count.fetch_add(1, Ordering::SeqCst);
        let state = self.state();

        let entries: Vec<RemoteEntry> = state
            .entries
            .values()
            .filter(|e| e.changestamp >= start_changestamp)
            .cloned()
            .collect();
        Ok(ResourceList {
            entries,
            largest_changestamp: state.largest_changestamp,
        })
    }

    async fn get_resource_entry(&self, resource_id: &ResourceId) -> Result<RemoteEntry, ServiceError> {
        self.check_online()?;
        self.state().live_entry(resource_id).cloned()
    }

    async fn download_file(&self, resource_id: &ResourceId) -> Result<Vec<u8>, ServiceError> {
        self.check_online()?;
        self.wait_while_downloads_held().await;
        let state = self.state();
        state.live_entry(resource_id)?;
        let content = state
            .contents
            .get(resource_id)
            .cloned()
            .ok_or(ServiceError::NotFound)?;
        self.download_count.fetch_add(1, Ordering::SeqCst);
        Ok(content)
    }

    async fn upload_existing_file(
        &self,
        resource_id: &ResourceId,
        content: Vec<u8>,
    ) -> Result<RemoteEntry, ServiceError> {
        self.check_online()?;
        let entry = replace_content(&mut self.state(), resource_id, content)?;
        self.upload_count.fetch_add(1, Ordering::SeqCst);
        Ok(entry)
    }

    async fn add_new_directory(
        &self,
        parent_id: &ResourceId,
        title: &str,
    ) -> Result<RemoteEntry, ServiceError> {
        self.check_online()?;
        let mut state = self.state();
        if !state.is_directory(parent_id) {
            return Err(ServiceError::NotFound);
        }
        let id = new_resource_id(&mut state, "folder");
        let changestamp = state.bump_changestamp();
        Ok(state.insert_directory(id, parent_id.clone(), title, changestamp))
    }

    async fn delete_resource(&self, resource_id: &ResourceId) -> Result<(), ServiceError> {
        self.check_online()?;
        let mut state = self.state();
        state.live_entry(resource_id)?;
        let changestamp = state.bump_changestamp();
        if let Some(entry) = state.entries.get_mut(resource_id) {
            entry.is_deleted = true;
            entry.changestamp = changestamp;
        }
        state.contents.remove(resource_id);
        Ok(())
    }
}
