//! SQLite-backed resource metadata tree
//!
//! Maps resource ids to local paths and back. Every entry except the grand
//! root has a parent that exists in the table; path segments are the entries'
//! `base_name`s, unique among siblings.
//!
//! ## Consistency
//!
//! Writers take an in-process lock and run inside one transaction, so a
//! change list is either fully applied or not at all. Multi-query reads
//! (path resolution, path computation) run in a read transaction and
//! therefore see a single committed snapshot.
//!
//! ## Type Mapping
//!
//! | Domain Type       | SQL Type | Strategy                             |
//! |-------------------|----------|--------------------------------------|
//! | ResourceId        | TEXT     | `.as_str()` / `ResourceId::new()`    |
//! | ContentHash       | TEXT     | `.as_str()` / `ContentHash::new()`   |
//! | u64 size          | INTEGER  | cast through `i64`                   |
//! | DateTime<Utc>     | TEXT     | RFC 3339                             |

use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::{Row, SqlitePool};
use tokio::sync::Mutex;

use drivecache_core::domain::{
    ChangeList, ContentHash, DirectoryFetchInfo, FileError, FileResult, ResourceChange,
    ResourceEntry, ResourceId,
};
use drivecache_core::util::{
    escape_title, grand_root_entry, grand_root_id, is_special_resource_id, my_drive_root_entry,
    other_dir_entry, other_dir_id, path_components, GRAND_ROOT_DIR_NAME,
};

use crate::DbResultExt;

const LARGEST_CHANGESTAMP_KEY: &str = "largest_changestamp";

/// Guard against corrupted parent chains when walking up the tree
const MAX_TREE_DEPTH: usize = 1024;

/// Local index of the remote tree
pub struct ResourceMetadata {
    pool: SqlitePool,
    write_lock: Mutex<()>,
}

impl ResourceMetadata {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            write_lock: Mutex::new(()),
        }
    }

    /// Creates `drive` and `drive/other` if missing
    ///
    /// Idempotent: existing rows, including their changestamps, are kept.
    pub async fn initialize(&self) -> FileResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await.db_err()?;

        for entry in [grand_root_entry(), other_dir_entry()] {
            let base_name = if entry.base_name.is_empty() {
                escape_title(&entry.title)
            } else {
                entry.base_name.clone()
            };
            sqlx::query(
                "INSERT OR IGNORE INTO resource_entries \
                 (resource_id, parent_resource_id, title, base_name, is_directory) \
                 VALUES (?, ?, ?, ?, 1)",
            )
            .bind(entry.resource_id.as_str())
            .bind(entry.parent_resource_id.as_ref().map(ResourceId::as_str))
            .bind(&entry.title)
            .bind(&base_name)
            .execute(&mut *tx)
            .await
            .db_err()?;
        }

        tx.commit().await.db_err()?;
        tracing::debug!("Resource metadata initialized");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Changestamps
    // ------------------------------------------------------------------------

    /// Last fully applied change log position; 0 before the first load
    pub async fn get_largest_changestamp(&self) -> FileResult<i64> {
        let mut conn = self.pool.acquire().await.db_err()?;
        read_largest_changestamp(&mut conn).await
    }

    pub async fn set_largest_changestamp(&self, changestamp: i64) -> FileResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut conn = self.pool.acquire().await.db_err()?;
        write_largest_changestamp(&mut conn, changestamp).await
    }

    /// Records the change log position a directory's listing is current at
    pub async fn set_directory_changestamp(
        &self,
        resource_id: &ResourceId,
        changestamp: i64,
    ) -> FileResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await.db_err()?;

        let entry = fetch_entry(&mut tx, resource_id)
            .await?
            .ok_or(FileError::NotFound)?;
        if !entry.is_directory {
            return Err(FileError::NotADirectory);
        }
        write_changestamp(&mut tx, resource_id, changestamp).await?;

        tx.commit().await.db_err()?;
        tracing::trace!(resource_id = %resource_id, changestamp, "Set directory changestamp");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Single-entry mutations
    // ------------------------------------------------------------------------

    /// Inserts or replaces an entry by resource id; returns its path
    ///
    /// The parent must already exist and be a directory. A title colliding
    /// with a sibling gets a ` (N)` suffix in its base name.
    pub async fn add_entry(&self, entry: ResourceEntry) -> FileResult<PathBuf> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await.db_err()?;

        if is_special_resource_id(&entry.resource_id) {
            return Err(FileError::InvalidOperation);
        }
        let stored = upsert_entry(&mut tx, entry).await?;
        let path = entry_path(&mut tx, &stored.resource_id).await?;

        tx.commit().await.db_err()?;
        tracing::debug!(resource_id = %stored.resource_id, path = %path.display(), "Added entry");
        Ok(path)
    }

    /// Updates an existing entry in place; returns its (possibly new) path
    ///
    /// A directory keeps its stored changestamp: the listing it stands for
    /// has not been re-fetched.
    pub async fn refresh_entry(&self, mut entry: ResourceEntry) -> FileResult<PathBuf> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await.db_err()?;

        if is_special_resource_id(&entry.resource_id) {
            return Err(FileError::InvalidOperation);
        }
        let existing = fetch_entry(&mut tx, &entry.resource_id)
            .await?
            .ok_or(FileError::NotFound)?;
        if existing.is_directory != entry.is_directory {
            return Err(FileError::InvalidOperation);
        }
        if entry.is_directory {
            entry.changestamp = existing.changestamp;
        }
        let stored = upsert_entry(&mut tx, entry).await?;
        let path = entry_path(&mut tx, &stored.resource_id).await?;

        tx.commit().await.db_err()?;
        tracing::debug!(resource_id = %stored.resource_id, path = %path.display(), "Refreshed entry");
        Ok(path)
    }

    /// Removes an entry and, for a directory, everything below it
    pub async fn remove_entry(&self, resource_id: &ResourceId) -> FileResult<()> {
        if is_special_resource_id(resource_id) {
            return Err(FileError::InvalidOperation);
        }

        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await.db_err()?;

        if fetch_entry(&mut tx, resource_id).await?.is_none() {
            return Err(FileError::NotFound);
        }
        let removed = remove_subtree(&mut tx, resource_id).await?;

        tx.commit().await.db_err()?;
        tracing::debug!(resource_id = %resource_id, removed, "Removed entry");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Lookups
    // ------------------------------------------------------------------------

    pub async fn get_resource_entry_by_id(&self, resource_id: &ResourceId) -> FileResult<ResourceEntry> {
        let mut conn = self.pool.acquire().await.db_err()?;
        fetch_entry(&mut conn, resource_id)
            .await?
            .ok_or(FileError::NotFound)
    }

    /// Walks `path` one base name at a time from the grand root
    pub async fn get_resource_entry_by_path(&self, path: &Path) -> FileResult<ResourceEntry> {
        let mut tx = self.pool.begin().await.db_err()?;
        let entry = resolve_path(&mut tx, path).await?;
        tx.commit().await.db_err()?;
        Ok(entry)
    }

    /// Children of the directory at `path`
    ///
    /// Fails with `NotFound` when the path is missing or names a file.
    pub async fn read_directory_by_path(&self, path: &Path) -> FileResult<Vec<ResourceEntry>> {
        let mut tx = self.pool.begin().await.db_err()?;
        let dir = resolve_path(&mut tx, path).await?;
        if !dir.is_directory {
            return Err(FileError::NotFound);
        }
        let children = fetch_children(&mut tx, &dir.resource_id).await?;
        tx.commit().await.db_err()?;
        Ok(children)
    }

    pub async fn read_directory_by_id(&self, resource_id: &ResourceId) -> FileResult<Vec<ResourceEntry>> {
        let mut tx = self.pool.begin().await.db_err()?;
        let dir = fetch_entry(&mut tx, resource_id)
            .await?
            .ok_or(FileError::NotFound)?;
        if !dir.is_directory {
            return Err(FileError::NotADirectory);
        }
        let children = fetch_children(&mut tx, resource_id).await?;
        tx.commit().await.db_err()?;
        Ok(children)
    }

    /// Local path of an entry, starting with `drive`
    pub async fn get_file_path(&self, resource_id: &ResourceId) -> FileResult<PathBuf> {
        let mut tx = self.pool.begin().await.db_err()?;
        let path = entry_path(&mut tx, resource_id).await?;
        tx.commit().await.db_err()?;
        Ok(path)
    }

    // ------------------------------------------------------------------------
    // Bulk updates
    // ------------------------------------------------------------------------

    /// Applies a full listing or a delta in one transaction
    ///
    /// Deletions run first, then updates in parent-before-child order.
    /// Entries whose parent never shows up are placed under `drive/other`.
    /// Every directory in the list takes the list's changestamp, and the
    /// tree-wide largest changestamp is written last.
    ///
    /// A full listing (`is_delta == false`) also drops every entry it does
    /// not mention. `root_resource_id` names My Drive, which is created as
    /// `drive/root` when missing.
    ///
    /// Returns the paths of the directories whose contents changed.
    pub async fn apply_change_list(
        &self,
        change_list: &ChangeList,
        root_resource_id: Option<&ResourceId>,
        is_delta: bool,
    ) -> FileResult<BTreeSet<PathBuf>> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await.db_err()?;
        let changestamp = change_list.largest_changestamp;
        let mut changed_dirs: BTreeSet<ResourceId> = BTreeSet::new();

        if let Some(root_id) = root_resource_id {
            if fetch_entry(&mut tx, root_id).await?.is_none() {
                upsert_entry(&mut tx, my_drive_root_entry(root_id.clone())).await?;
                changed_dirs.insert(grand_root_id());
            }
            if !is_delta {
                write_changestamp(&mut tx, root_id, changestamp).await?;
            }
        }

        let skip = |id: &ResourceId| {
            is_special_resource_id(id) || root_resource_id.is_some_and(|root| root == id)
        };

        if !is_delta {
            let listed: HashSet<&ResourceId> = change_list
                .updated_entries()
                .map(|entry| &entry.resource_id)
                .collect();
            let stale: Vec<ResourceId> = fetch_all_ids(&mut tx)
                .await?
                .into_iter()
                .filter(|id| !skip(id) && !listed.contains(id))
                .collect();
            for id in stale {
                if let Some(entry) = fetch_entry(&mut tx, &id).await? {
                    changed_dirs.extend(entry.parent_resource_id);
                    remove_subtree(&mut tx, &id).await?;
                }
            }
        }

        for change in &change_list.changes {
            if let ResourceChange::Deleted(id) = change {
                if skip(id) {
                    continue;
                }
                if let Some(entry) = fetch_entry(&mut tx, id).await? {
                    changed_dirs.extend(entry.parent_resource_id);
                    if entry.is_directory {
                        changed_dirs.insert(entry.resource_id.clone());
                    }
                    remove_subtree(&mut tx, id).await?;
                }
            }
        }

        let mut pending: Vec<ResourceEntry> = change_list
            .updated_entries()
            .filter(|entry| !skip(&entry.resource_id))
            .cloned()
            .map(|mut entry| {
                if entry.is_directory {
                    entry.changestamp = changestamp;
                }
                entry
            })
            .collect();

        while !pending.is_empty() {
            let before = pending.len();
            let mut deferred = Vec::new();

            for mut entry in pending {
                let parent = match &entry.parent_resource_id {
                    Some(parent_id) => fetch_entry(&mut tx, parent_id).await?,
                    None => None,
                };
                match parent {
                    Some(parent) if parent.is_directory => {
                        if creates_cycle(&mut tx, &entry.resource_id, &parent.resource_id).await? {
                            entry.parent_resource_id = Some(other_dir_id());
                        }
                        if let Some(old) = fetch_entry(&mut tx, &entry.resource_id).await? {
                            changed_dirs.extend(old.parent_resource_id);
                        }
                        let stored = upsert_entry(&mut tx, entry).await?;
                        changed_dirs.extend(stored.parent_resource_id);
                    }
                    Some(_) => {
                        // Parent turned out to be a file
                        entry.parent_resource_id = Some(other_dir_id());
                        deferred.push(entry);
                    }
                    None => deferred.push(entry),
                }
            }

            if deferred.len() == before {
                orphan_unresolved(&mut deferred);
            }
            pending = deferred;
        }

        write_largest_changestamp(&mut tx, changestamp).await?;

        let mut paths = BTreeSet::new();
        for dir_id in &changed_dirs {
            match entry_path(&mut tx, dir_id).await {
                Ok(path) => {
                    paths.insert(path);
                }
                Err(FileError::NotFound) => {}
                Err(e) => return Err(e),
            }
        }

        tx.commit().await.db_err()?;
        tracing::debug!(
            changes = change_list.changes.len(),
            changestamp,
            is_delta,
            changed_directories = paths.len(),
            "Applied change list"
        );
        Ok(paths)
    }

    /// Replaces one directory's children with a fresh listing
    ///
    /// Children missing from `entries` are removed; the directory is stamped
    /// with the fetch changestamp. Sub-directories keep their own stamps.
    pub async fn refresh_directory(
        &self,
        fetch_info: &DirectoryFetchInfo,
        entries: Vec<ResourceEntry>,
    ) -> FileResult<PathBuf> {
        let dir_id = fetch_info
            .resource_id()
            .ok_or(FileError::InvalidOperation)?;

        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await.db_err()?;

        let dir = fetch_entry(&mut tx, dir_id)
            .await?
            .ok_or(FileError::NotFound)?;
        if !dir.is_directory {
            return Err(FileError::NotADirectory);
        }

        let (listed, foreign): (Vec<_>, Vec<_>) = entries
            .into_iter()
            .partition(|entry| entry.parent_resource_id.as_ref() == Some(dir_id));
        for entry in &foreign {
            tracing::warn!(
                resource_id = %entry.resource_id,
                directory = %dir_id,
                "Ignoring entry listed outside its parent"
            );
        }

        let keep: HashSet<&ResourceId> = listed.iter().map(|e| &e.resource_id).collect();
        for child in fetch_children(&mut tx, dir_id).await? {
            if !keep.contains(&child.resource_id) && !is_special_resource_id(&child.resource_id) {
                remove_subtree(&mut tx, &child.resource_id).await?;
            }
        }

        for mut entry in listed {
            if is_special_resource_id(&entry.resource_id) {
                continue;
            }
            let existing = fetch_entry(&mut tx, &entry.resource_id).await?;
            if entry.is_directory {
                entry.changestamp = existing.map(|e| e.changestamp).unwrap_or(0);
            }
            if creates_cycle(&mut tx, &entry.resource_id, dir_id).await? {
                tracing::warn!(resource_id = %entry.resource_id, "Listing would create a cycle");
                continue;
            }
            upsert_entry(&mut tx, entry).await?;
        }

        write_changestamp(&mut tx, dir_id, fetch_info.changestamp()).await?;
        let path = entry_path(&mut tx, dir_id).await?;

        tx.commit().await.db_err()?;
        tracing::debug!(
            directory = %dir_id,
            path = %path.display(),
            changestamp = fetch_info.changestamp(),
            "Refreshed directory"
        );
        Ok(path)
    }
}

// ============================================================================
// Row mapping functions
// ============================================================================

fn entry_from_row(row: &SqliteRow) -> FileResult<ResourceEntry> {
    let resource_id: String = row.try_get("resource_id").db_err()?;
    let parent_resource_id: Option<String> = row.try_get("parent_resource_id").db_err()?;
    let size: i64 = row.try_get("size").db_err()?;
    let md5: Option<String> = row.try_get("md5").db_err()?;
    let modified: Option<String> = row.try_get("modified").db_err()?;

    Ok(ResourceEntry {
        resource_id: parse_id(resource_id)?,
        parent_resource_id: parent_resource_id.map(parse_id).transpose()?,
        title: row.try_get("title").db_err()?,
        base_name: row.try_get("base_name").db_err()?,
        is_directory: row.try_get("is_directory").db_err()?,
        size: u64::try_from(size).unwrap_or_default(),
        md5: md5
            .map(ContentHash::new)
            .transpose()
            .map_err(|e| FileError::Failed(e.to_string()))?,
        changestamp: row.try_get("changestamp").db_err()?,
        modified: modified.as_deref().map(parse_datetime).transpose()?,
    })
}

fn parse_id(raw: String) -> FileResult<ResourceId> {
    ResourceId::new(raw).map_err(|e| FileError::Failed(e.to_string()))
}

fn parse_datetime(s: &str) -> FileResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| FileError::Failed(format!("Failed to parse datetime '{s}': {e}")))
}

// ============================================================================
// Connection-level helpers
// ============================================================================

async fn fetch_entry(
    conn: &mut SqliteConnection,
    resource_id: &ResourceId,
) -> FileResult<Option<ResourceEntry>> {
    let row = sqlx::query("SELECT * FROM resource_entries WHERE resource_id = ?")
        .bind(resource_id.as_str())
        .fetch_optional(&mut *conn)
        .await
        .db_err()?;

    row.as_ref().map(entry_from_row).transpose()
}

async fn fetch_child(
    conn: &mut SqliteConnection,
    parent_id: &ResourceId,
    base_name: &str,
) -> FileResult<Option<ResourceEntry>> {
    let row = sqlx::query(
        "SELECT * FROM resource_entries WHERE parent_resource_id = ? AND base_name = ?",
    )
    .bind(parent_id.as_str())
    .bind(base_name)
    .fetch_optional(&mut *conn)
    .await
    .db_err()?;

    row.as_ref().map(entry_from_row).transpose()
}

async fn fetch_children(
    conn: &mut SqliteConnection,
    parent_id: &ResourceId,
) -> FileResult<Vec<ResourceEntry>> {
    let rows = sqlx::query(
        "SELECT * FROM resource_entries WHERE parent_resource_id = ? ORDER BY base_name",
    )
    .bind(parent_id.as_str())
    .fetch_all(&mut *conn)
    .await
    .db_err()?;

    rows.iter().map(entry_from_row).collect()
}

async fn fetch_all_ids(conn: &mut SqliteConnection) -> FileResult<Vec<ResourceId>> {
    let ids: Vec<String> = sqlx::query_scalar("SELECT resource_id FROM resource_entries")
        .fetch_all(&mut *conn)
        .await
        .db_err()?;

    ids.into_iter().map(parse_id).collect()
}

async fn read_largest_changestamp(conn: &mut SqliteConnection) -> FileResult<i64> {
    let value: Option<i64> = sqlx::query_scalar("SELECT value FROM metadata_header WHERE key = ?")
        .bind(LARGEST_CHANGESTAMP_KEY)
        .fetch_optional(&mut *conn)
        .await
        .db_err()?;

    Ok(value.unwrap_or(0))
}

async fn write_largest_changestamp(conn: &mut SqliteConnection, changestamp: i64) -> FileResult<()> {
    sqlx::query("INSERT OR REPLACE INTO metadata_header (key, value) VALUES (?, ?)")
        .bind(LARGEST_CHANGESTAMP_KEY)
        .bind(changestamp)
        .execute(&mut *conn)
        .await
        .db_err()?;

    tracing::trace!(changestamp, "Set largest changestamp");
    Ok(())
}

async fn write_changestamp(
    conn: &mut SqliteConnection,
    resource_id: &ResourceId,
    changestamp: i64,
) -> FileResult<()> {
    sqlx::query("UPDATE resource_entries SET changestamp = ? WHERE resource_id = ?")
        .bind(changestamp)
        .bind(resource_id.as_str())
        .execute(&mut *conn)
        .await
        .db_err()?;
    Ok(())
}

/// Whether putting `resource_id` under `new_parent` would close a loop
async fn creates_cycle(
    conn: &mut SqliteConnection,
    resource_id: &ResourceId,
    new_parent: &ResourceId,
) -> FileResult<bool> {
    let mut current = Some(new_parent.clone());
    let mut depth = 0;

    while let Some(id) = current {
        if &id == resource_id {
            return Ok(true);
        }
        depth += 1;
        if depth > MAX_TREE_DEPTH {
            return Ok(true);
        }
        current = match fetch_entry(conn, &id).await? {
            Some(entry) => entry.parent_resource_id,
            None => None,
        };
    }
    Ok(false)
}

/// Picks a base name for `resource_id` under `parent_id` that no sibling uses
async fn unique_base_name(
    conn: &mut SqliteConnection,
    parent_id: &ResourceId,
    resource_id: &ResourceId,
    escaped: &str,
) -> FileResult<String> {
    let mut candidate = escaped.to_string();
    let mut suffix = 1;

    loop {
        match fetch_child(conn, parent_id, &candidate).await? {
            Some(sibling) if &sibling.resource_id != resource_id => {
                suffix += 1;
                candidate = format!("{escaped} ({suffix})");
            }
            _ => return Ok(candidate),
        }
    }
}

/// Writes `entry`, assigning its base name; returns the stored entry
async fn upsert_entry(
    conn: &mut SqliteConnection,
    mut entry: ResourceEntry,
) -> FileResult<ResourceEntry> {
    let parent_id = entry
        .parent_resource_id
        .clone()
        .ok_or(FileError::InvalidOperation)?;
    let parent = fetch_entry(conn, &parent_id)
        .await?
        .ok_or(FileError::NotFound)?;
    if !parent.is_directory {
        return Err(FileError::NotADirectory);
    }
    if creates_cycle(conn, &entry.resource_id, &parent_id).await? {
        return Err(FileError::InvalidOperation);
    }

    let existing = fetch_entry(conn, &entry.resource_id).await?;
    entry.base_name = match existing {
        Some(old) if old.parent_resource_id.as_ref() == Some(&parent_id) && old.title == entry.title => {
            old.base_name
        }
        _ => {
            let escaped = escape_title(&entry.title);
            unique_base_name(conn, &parent_id, &entry.resource_id, &escaped).await?
        }
    };

    sqlx::query(
        "INSERT INTO resource_entries \
         (resource_id, parent_resource_id, title, base_name, is_directory, size, md5, changestamp, modified) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT(resource_id) DO UPDATE SET \
         parent_resource_id = excluded.parent_resource_id, \
         title = excluded.title, \
         base_name = excluded.base_name, \
         is_directory = excluded.is_directory, \
         size = excluded.size, \
         md5 = excluded.md5, \
         changestamp = excluded.changestamp, \
         modified = excluded.modified",
    )
    .bind(entry.resource_id.as_str())
    .bind(parent_id.as_str())
    .bind(&entry.title)
    .bind(&entry.base_name)
    .bind(entry.is_directory)
    .bind(i64::try_from(entry.size).unwrap_or(i64::MAX))
    .bind(entry.md5.as_ref().map(ContentHash::as_str))
    .bind(entry.changestamp)
    .bind(entry.modified.map(|dt| dt.to_rfc3339()))
    .execute(&mut *conn)
    .await
    .db_err()?;

    tracing::trace!(
        resource_id = %entry.resource_id,
        parent = %parent_id,
        base_name = %entry.base_name,
        "Upserted entry"
    );
    Ok(entry)
}

/// Deletes an entry and its descendants; returns the number of rows removed
async fn remove_subtree(conn: &mut SqliteConnection, resource_id: &ResourceId) -> FileResult<u64> {
    let result = sqlx::query(
        "WITH RECURSIVE subtree(id) AS ( \
             SELECT ? \
             UNION ALL \
             SELECT r.resource_id FROM resource_entries r \
             JOIN subtree s ON r.parent_resource_id = s.id \
         ) \
         DELETE FROM resource_entries WHERE resource_id IN (SELECT id FROM subtree)",
    )
    .bind(resource_id.as_str())
    .execute(&mut *conn)
    .await
    .db_err()?;

    Ok(result.rows_affected())
}

/// Local path from the grand root down to `resource_id`
async fn entry_path(conn: &mut SqliteConnection, resource_id: &ResourceId) -> FileResult<PathBuf> {
    let mut segments = Vec::new();
    let mut current = Some(resource_id.clone());

    while let Some(id) = current {
        if segments.len() > MAX_TREE_DEPTH {
            return Err(FileError::Failed(format!(
                "parent chain of {resource_id} does not reach the grand root"
            )));
        }
        let entry = fetch_entry(conn, &id).await?.ok_or(FileError::NotFound)?;
        segments.push(entry.base_name);
        current = entry.parent_resource_id;
    }

    segments.reverse();
    Ok(segments.into_iter().collect())
}

async fn resolve_path(conn: &mut SqliteConnection, path: &Path) -> FileResult<ResourceEntry> {
    let components = path_components(path).map_err(|_| FileError::NotFound)?;
    let mut components = components.into_iter();
    if components.next().as_deref() != Some(GRAND_ROOT_DIR_NAME) {
        return Err(FileError::NotFound);
    }

    let mut entry = fetch_entry(conn, &grand_root_id())
        .await?
        .ok_or(FileError::NotFound)?;
    for name in components {
        if !entry.is_directory {
            return Err(FileError::NotFound);
        }
        entry = fetch_child(conn, &entry.resource_id, &name)
            .await?
            .ok_or(FileError::NotFound)?;
    }
    Ok(entry)
}

/// Breaks a stalled parent-first pass by moving entries under `drive/other`
///
/// Entries whose parent is itself still pending wait for a later pass;
/// if every pending entry waits on another (a cycle), the first one is
/// orphaned to break it.
fn orphan_unresolved(deferred: &mut [ResourceEntry]) {
    let pending_ids: HashSet<ResourceId> =
        deferred.iter().map(|e| e.resource_id.clone()).collect();
    let mut orphaned = false;

    for entry in deferred.iter_mut() {
        let waits_on_pending = entry
            .parent_resource_id
            .as_ref()
            .is_some_and(|parent| pending_ids.contains(parent) && parent != &other_dir_id());
        if !waits_on_pending {
            tracing::debug!(resource_id = %entry.resource_id, "Parent unknown, placing entry under drive/other");
            entry.parent_resource_id = Some(other_dir_id());
            orphaned = true;
        }
    }

    if !orphaned {
        if let Some(first) = deferred.first_mut() {
            first.parent_resource_id = Some(other_dir_id());
        }
    }
}
