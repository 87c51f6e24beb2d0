//! On-disk layout of the file cache
//!
//! ```text
//! {root}/meta/file_cache.db           bookkeeping
//! {root}/files/{shard}/{id}.{md5}     blobs
//! {root}/tmp/                         downloads in progress
//! ```
//!
//! `{shard}` is the first two hex digits of SHA-256 of the resource id.
//! `{id}` and `{md5}` are escaped so that the first `.` of the file name
//! always separates them and the name can be parsed back.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use drivecache_core::domain::{ContentHash, ResourceId};

const META_DIR: &str = "meta";
const FILES_DIR: &str = "files";
const TMP_DIR: &str = "tmp";
const DB_FILE: &str = "file_cache.db";

#[derive(Debug, Clone)]
pub struct CacheLayout {
    root: PathBuf,
}

impl CacheLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn meta_dir(&self) -> PathBuf {
        self.root.join(META_DIR)
    }

    pub fn files_dir(&self) -> PathBuf {
        self.root.join(FILES_DIR)
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.root.join(TMP_DIR)
    }

    pub fn database_path(&self) -> PathBuf {
        self.meta_dir().join(DB_FILE)
    }

    /// A fresh temporary file name under `tmp/`
    pub fn temp_path(&self) -> PathBuf {
        self.tmp_dir()
            .join(format!("{}.partial", uuid::Uuid::new_v4()))
    }

    pub fn blob_path(&self, resource_id: &ResourceId, md5: &ContentHash) -> PathBuf {
        self.files_dir()
            .join(shard(resource_id))
            .join(format!(
                "{}.{}",
                escape_cache_file_name(resource_id.as_str()),
                escape_cache_file_name(md5.as_str())
            ))
    }

    /// Recovers the key of a blob path produced by [`Self::blob_path`]
    ///
    /// Returns `None` for paths outside `files/` or with a foreign name.
    pub fn parse_blob_path(&self, path: &Path) -> Option<(ResourceId, ContentHash)> {
        let relative = path.strip_prefix(self.files_dir()).ok()?;
        let mut components = relative.components();
        let shard_dir = components.next()?.as_os_str().to_str()?.to_string();
        let file_name = components.next()?.as_os_str().to_str()?;
        if components.next().is_some() {
            return None;
        }

        let (id, md5) = file_name.split_once('.')?;
        let resource_id = ResourceId::new(unescape_cache_file_name(id)?).ok()?;
        let md5 = ContentHash::new(unescape_cache_file_name(md5)?).ok()?;
        (shard(&resource_id) == shard_dir).then_some((resource_id, md5))
    }
}

fn shard(resource_id: &ResourceId) -> String {
    let digest = Sha256::digest(resource_id.as_str().as_bytes());
    format!("{:02x}", digest[0])
}

/// Percent-escapes `%`, `.`, `/` and control characters
pub fn escape_cache_file_name(name: &str) -> String {
    let mut escaped = String::with_capacity(name.len());
    for c in name.chars() {
        if matches!(c, '%' | '.' | '/' | '\\') || c.is_ascii_control() {
            escaped.push_str(&format!("%{:02X}", c as u32));
        } else {
            escaped.push(c);
        }
    }
    escaped
}

/// Inverse of [`escape_cache_file_name`]; `None` on a malformed escape
pub fn unescape_cache_file_name(name: &str) -> Option<String> {
    let mut out = String::with_capacity(name.len());
    let mut chars = name.chars();
    while let Some(c) = chars.next() {
        if c == '%' {
            let hex: String = chars.by_ref().take(2).collect();
            if hex.len() != 2 {
                return None;
            }
            let byte = u8::from_str_radix(&hex, 16).ok()?;
            out.push(char::from(byte));
        } else {
            out.push(c);
        }
    }
    Some(out)
}
