//! Well-known tree layout and path helpers
//!
//! Every local path starts at the grand root `drive`, which holds exactly
//! two directories: `drive/root` (My Drive, id assigned by the server) and
//! `drive/other` (entries whose parent is not reachable from My Drive).

use std::path::{Component, Path, PathBuf};

use crate::domain::errors::DomainError;
use crate::domain::newtypes::ResourceId;
use crate::domain::resource_entry::ResourceEntry;

/// Resource id of the grand root `drive`
pub const GRAND_ROOT_ID: &str = "<drive>";
/// Resource id of `drive/other`
pub const OTHER_DIR_ID: &str = "<other>";

pub const GRAND_ROOT_DIR_NAME: &str = "drive";
pub const MY_DRIVE_ROOT_DIR_NAME: &str = "root";
pub const OTHER_DIR_NAME: &str = "other";

/// Stand-in for `/` inside a title (U+2215 DIVISION SLASH)
pub const ESCAPED_SLASH: char = '\u{2215}';

pub fn grand_root_id() -> ResourceId {
    ResourceId::from_static(GRAND_ROOT_ID)
}

pub fn other_dir_id() -> ResourceId {
    ResourceId::from_static(OTHER_DIR_ID)
}

/// Ids the server never assigns and that must not be removed
pub fn is_special_resource_id(id: &ResourceId) -> bool {
    id.as_str() == GRAND_ROOT_ID || id.as_str() == OTHER_DIR_ID
}

pub fn grand_root_path() -> PathBuf {
    PathBuf::from(GRAND_ROOT_DIR_NAME)
}

pub fn my_drive_root_path() -> PathBuf {
    grand_root_path().join(MY_DRIVE_ROOT_DIR_NAME)
}

pub fn other_dir_path() -> PathBuf {
    grand_root_path().join(OTHER_DIR_NAME)
}

pub fn grand_root_entry() -> ResourceEntry {
    let mut entry = ResourceEntry::directory(grand_root_id(), None, GRAND_ROOT_DIR_NAME);
    entry.base_name = GRAND_ROOT_DIR_NAME.to_string();
    entry
}

pub fn other_dir_entry() -> ResourceEntry {
    ResourceEntry::directory(other_dir_id(), Some(grand_root_id()), OTHER_DIR_NAME)
}

/// `drive/root`, under its server-assigned id
pub fn my_drive_root_entry(root_resource_id: ResourceId) -> ResourceEntry {
    ResourceEntry::directory(
        root_resource_id,
        Some(grand_root_id()),
        MY_DRIVE_ROOT_DIR_NAME,
    )
}

/// Turns a title into a usable path segment
///
/// `/` becomes [`ESCAPED_SLASH`]; a title of `.` or `..` or an empty title
/// becomes `_` so the segment never aliases a relative component.
pub fn escape_title(title: &str) -> String {
    match title {
        "" | "." | ".." => "_".to_string(),
        _ => title.replace('/', &ESCAPED_SLASH.to_string()),
    }
}

/// Inverse of [`escape_title`] for titles it did not rewrite wholesale
pub fn unescape_base_name(name: &str) -> String {
    name.replace(ESCAPED_SLASH, "/")
}

/// Splits a drive path into its UTF-8 segments
///
/// # Errors
/// Returns error for absolute paths, `.`/`..` components or non-UTF-8 segments
pub fn path_components(path: &Path) -> Result<Vec<String>, DomainError> {
    path.components()
        .map(|c| match c {
            Component::Normal(s) => s
                .to_str()
                .map(str::to_string)
                .ok_or_else(|| DomainError::InvalidPath(path.display().to_string())),
            _ => Err(DomainError::InvalidPath(path.display().to_string())),
        })
        .collect()
}

/// Whether `path` lies strictly below `ancestor`
pub fn is_under(ancestor: &Path, path: &Path) -> bool {
    path != ancestor && path.starts_with(ancestor)
}
