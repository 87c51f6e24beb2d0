//! Shared fixtures for sync integration tests

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use drivecache_cache::{
    DatabasePool, FakeFreeDiskSpaceGetter, FileCache, FileOperation, ResourceMetadata, Schema,
};
use drivecache_core::config::SyncConfig;
use drivecache_core::domain::{ChangeList, ContentHash, ResourceId};
use drivecache_core::ports::IDriveService;
use drivecache_remote::fake::FAKE_FILE_1_CONTENT;
use drivecache_remote::FakeDriveService;
use drivecache_sync::FileSystem;

pub const FILE_1_ID: &str = "file:2_file_resource_id";
pub const FILE_1_PATH: &str = "drive/root/File 1.txt";
pub const DIRECTORY_1_ID: &str = "folder:1_folder_resource_id";
pub const DIRECTORY_1_PATH: &str = "drive/root/Directory 1";

/// Delay long enough for a test to cancel a task before it starts
pub const SLOW_DELAY_MS: u64 = 200;

pub struct Fixture {
    pub dir: TempDir,
    pub metadata: Arc<ResourceMetadata>,
    pub cache: FileCache,
    pub fake: Arc<FakeDriveService>,
}

impl Fixture {
    /// Fresh stores and a fresh fake; nothing loaded yet
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();

        let pool = DatabasePool::new(&dir.path().join("meta").join("resource_metadata.db"), Schema::ResourceMetadata)
            .await
            .unwrap();
        let metadata = Arc::new(ResourceMetadata::new(pool.pool().clone()));
        metadata.initialize().await.unwrap();

        let cache = FileCache::open(
            dir.path().join("cache"),
            Arc::new(FakeFreeDiskSpaceGetter::default()),
            0,
        )
        .await
        .unwrap();
        cache.initialize().await.unwrap();

        Self {
            dir,
            metadata,
            cache,
            fake: Arc::new(FakeDriveService::new()),
        }
    }

    /// Stores holding the full fixture tree, as left by a previous run
    ///
    /// The tree is loaded through a separate fake so the fixture's counters
    /// start at zero.
    pub async fn populated() -> Self {
        let fixture = Self::new().await;
        let seed = FakeDriveService::new();
        let list = seed.get_resource_list(None).await.unwrap();
        let change_list: ChangeList = list.into();
        fixture
            .metadata
            .apply_change_list(&change_list, Some(&seed.root_resource_id()), false)
            .await
            .unwrap();
        fixture
    }

    pub fn service(&self) -> Arc<dyn IDriveService> {
        self.fake.clone()
    }

    pub async fn file_system(&self, delay_ms: u64) -> FileSystem {
        let config = SyncConfig {
            delay_ms,
            ..SyncConfig::default()
        };
        FileSystem::new(Arc::clone(&self.metadata), self.cache.clone(), self.service(), &config)
            .await
            .unwrap()
    }

    /// Puts `content` in the cache under `md5`, bypassing the sync client
    pub async fn store(&self, resource_id: &ResourceId, md5: &ContentHash, content: &[u8]) {
        let src = self.dir.path().join("src.bin");
        std::fs::write(&src, content).unwrap();
        self.cache
            .store(resource_id, md5, &src, FileOperation::Copy)
            .await
            .unwrap();
    }
}

pub fn id(s: &str) -> ResourceId {
    ResourceId::new(s).unwrap()
}

pub fn path(s: &str) -> PathBuf {
    PathBuf::from(s)
}

pub fn file_1_md5() -> ContentHash {
    ContentHash::md5_of(FAKE_FILE_1_CONTENT)
}

pub fn read(path: &Path) -> Vec<u8> {
    std::fs::read(path).unwrap()
}
