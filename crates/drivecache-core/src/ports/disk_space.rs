//! Disk space port

use std::path::Path;

/// Reports free bytes on the filesystem holding `path`
///
/// Synchronous: implementations are expected to be a single syscall (or a
/// stored number in tests) and are called from the cache's sequential worker.
pub trait IFreeDiskSpaceGetter: Send + Sync {
    fn free_disk_space(&self, path: &Path) -> std::io::Result<u64>;
}
