//! Free disk space getters: `statvfs(3)` and a settable fake

use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use drivecache_core::ports::IFreeDiskSpaceGetter;

/// Reports the bytes available to unprivileged users on the filesystem
/// holding a path
#[derive(Debug, Default, Clone, Copy)]
pub struct StatvfsDiskSpaceGetter;

impl IFreeDiskSpaceGetter for StatvfsDiskSpaceGetter {
    fn free_disk_space(&self, path: &Path) -> std::io::Result<u64> {
        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

        // SAFETY: `stat` is plain old data and `c_path` is a valid NUL-terminated string
        // that outlives the call.
        let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
        let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
        if rc != 0 {
            return Err(std::io::Error::last_os_error());
        }

        #[allow(clippy::unnecessary_cast)]
        Ok((stat.f_bavail as u64).saturating_mul(stat.f_frsize as u64))
    }
}

/// Reports a settable number of free bytes regardless of the path
///
/// Used by tests and by callers that manage quotas themselves.
#[derive(Debug)]
pub struct FakeFreeDiskSpaceGetter {
    free_bytes: AtomicU64,
}

impl FakeFreeDiskSpaceGetter {
    pub fn new(free_bytes: u64) -> Self {
        Self {
            free_bytes: AtomicU64::new(free_bytes),
        }
    }

    pub fn set_free_disk_space(&self, free_bytes: u64) {
        self.free_bytes.store(free_bytes, Ordering::SeqCst);
    }
}

impl Default for FakeFreeDiskSpaceGetter {
    /// Plenty of room: 1 TiB
    fn default() -> Self {
        Self::new(1 << 40)
    }
}

impl IFreeDiskSpaceGetter for FakeFreeDiskSpaceGetter {
    fn free_disk_space(&self, _path: &Path) -> std::io::Result<u64> {
        Ok(self.free_bytes.load(Ordering::SeqCst))
    }
}
