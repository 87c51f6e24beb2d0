//! SQLite bookkeeping of cache entries
//!
//! Only the cache worker writes through this type, so no extra locking is
//! needed on top of SQLite's own.

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use drivecache_core::domain::{ContentHash, FileCacheEntry, FileError, FileResult, ResourceId};

use crate::DbResultExt;

pub(crate) struct EntryStore {
    pool: SqlitePool,
}

impl EntryStore {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub(crate) async fn get(&self, resource_id: &ResourceId) -> FileResult<Option<FileCacheEntry>> {
        let row = sqlx::query("SELECT * FROM cache_entries WHERE resource_id = ?")
            .bind(resource_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .db_err()?;

        row.as_ref().map(entry_from_row).transpose()
    }

    pub(crate) async fn put(&self, entry: &FileCacheEntry) -> FileResult<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO cache_entries \
             (resource_id, md5, is_present, is_pinned, is_dirty, is_mounted) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(entry.resource_id.as_str())
        .bind(entry.md5.as_str())
        .bind(entry.is_present)
        .bind(entry.is_pinned)
        .bind(entry.is_dirty)
        .bind(entry.is_mounted)
        .execute(&self.pool)
        .await
        .db_err()?;

        tracing::trace!(
            resource_id = %entry.resource_id,
            md5 = %entry.md5,
            present = entry.is_present,
            pinned = entry.is_pinned,
            dirty = entry.is_dirty,
            mounted = entry.is_mounted,
            "Saved cache entry"
        );
        Ok(())
    }

    pub(crate) async fn delete(&self, resource_id: &ResourceId) -> FileResult<()> {
        sqlx::query("DELETE FROM cache_entries WHERE resource_id = ?")
            .bind(resource_id.as_str())
            .execute(&self.pool)
            .await
            .db_err()?;

        tracing::trace!(resource_id = %resource_id, "Deleted cache entry");
        Ok(())
    }

    pub(crate) async fn list_all(&self) -> FileResult<Vec<FileCacheEntry>> {
        let rows = sqlx::query("SELECT * FROM cache_entries ORDER BY resource_id")
            .fetch_all(&self.pool)
            .await
            .db_err()?;

        rows.iter().map(entry_from_row).collect()
    }

    /// Present, clean, unpinned and unmounted entries
    pub(crate) async fn list_evictable(&self) -> FileResult<Vec<FileCacheEntry>> {
        let rows = sqlx::query(
            "SELECT * FROM cache_entries \
             WHERE is_present = 1 AND is_pinned = 0 AND is_dirty = 0 AND is_mounted = 0 \
             ORDER BY resource_id",
        )
        .fetch_all(&self.pool)
        .await
        .db_err()?;

        rows.iter().map(entry_from_row).collect()
    }

    /// Mount flags do not survive a restart; returns the number cleared
    pub(crate) async fn clear_mount_flags(&self) -> FileResult<u64> {
        let result = sqlx::query("UPDATE cache_entries SET is_mounted = 0 WHERE is_mounted = 1")
            .execute(&self.pool)
            .await
            .db_err()?;
        Ok(result.rows_affected())
    }
}

fn entry_from_row(row: &SqliteRow) -> FileResult<FileCacheEntry> {
    let resource_id: String = row.try_get("resource_id").db_err()?;
    let md5: String = row.try_get("md5").db_err()?;

    Ok(FileCacheEntry {
        resource_id: ResourceId::new(resource_id).map_err(|e| FileError::Failed(e.to_string()))?,
        md5: ContentHash::new(md5).map_err(|e| FileError::Failed(e.to_string()))?,
        is_present: row.try_get("is_present").db_err()?,
        is_pinned: row.try_get("is_pinned").db_err()?,
        is_dirty: row.try_get("is_dirty").db_err()?,
        is_mounted: row.try_get("is_mounted").db_err()?,
    })
}
