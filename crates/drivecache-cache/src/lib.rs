//! drivecache cache - local persistence
//!
//! Two stores live here, persisted independently so the metadata tree can be
//! rebuilt without re-fetching blobs that are still valid:
//! - The resource metadata tree (entries, base names, changestamps)
//! - The file cache (content blobs plus their present/pinned/dirty/mounted flags)
//!
//! ## Architecture
//!
//! Both stores sit on SQLite through [`DatabasePool`]. The file cache runs its
//! mutations on a single worker task and hands callers a cloneable
//! [`FileCache`] handle; the metadata store serializes writers with a lock and
//! applies every multi-row change in one transaction.
//!
//! ## Key Components
//!
//! - [`DatabasePool`] - Connection pool with per-store schema migration
//! - [`ResourceMetadata`] - Path/id index of the remote tree
//! - [`FileCache`] - Blob store with bookkeeping and eviction
//! - [`StatvfsDiskSpaceGetter`] - Free space query backed by `statvfs(3)`
//! - [`CacheError`] - Error types for opening the stores
//!
//! ## Usage
//!
//! ```no_run
//! use std::path::Path;
//! use drivecache_cache::{DatabasePool, ResourceMetadata, Schema};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let pool = DatabasePool::new(Path::new("/tmp/drivecache/meta/resource_metadata.db"), Schema::ResourceMetadata).await?;
//! let metadata = ResourceMetadata::new(pool.pool().clone());
//! metadata.initialize().await?;
//! # Ok(())
//! # }
//! ```

pub mod disk_space;
pub mod file_cache;
pub mod metadata;
pub mod pool;

pub use disk_space::{FakeFreeDiskSpaceGetter, StatvfsDiskSpaceGetter};
pub use file_cache::{FileCache, FileCacheObserver, FileOperation};
pub use metadata::ResourceMetadata;
pub use pool::{DatabasePool, Schema};

use drivecache_core::domain::FileError;

/// Errors that can occur while opening or migrating a store
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Failed to establish a database connection
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// A database query failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Schema migration failed
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// A stored value could not be turned back into a domain type
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Creating or cleaning the cache directories failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<sqlx::Error> for CacheError {
    fn from(e: sqlx::Error) -> Self {
        CacheError::QueryFailed(e.to_string())
    }
}

impl From<CacheError> for FileError {
    fn from(e: CacheError) -> Self {
        match e {
            CacheError::Io(io) => FileError::from(io),
            other => FileError::Failed(other.to_string()),
        }
    }
}

/// Maps storage errors onto the generic `FAILED` code
///
/// Every query in this crate reports through [`FileError`]; database errors
/// carry no finer meaning for callers.
pub(crate) trait DbResultExt<T> {
    fn db_err(self) -> Result<T, FileError>;
}

impl<T> DbResultExt<T> for Result<T, sqlx::Error> {
    fn db_err(self) -> Result<T, FileError> {
        self.map_err(|e| FileError::Failed(format!("database error: {e}")))
    }
}
