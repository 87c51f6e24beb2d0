//! SQLite pools for the two stores
//!
//! The metadata tree and the file cache bookkeeping live in separate
//! databases so either can be rebuilt without touching the other. Opening a
//! pool applies the store's schema; in-memory pools back the unit tests.

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

use crate::CacheError;

/// Which store a pool backs; selects the migration applied on open
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schema {
    /// Resource entry tree plus the tree-wide changestamp
    ResourceMetadata,
    /// Blob bookkeeping of the file cache
    FileCache,
}

impl Schema {
    fn migration(self) -> &'static str {
        match self {
            Self::ResourceMetadata => include_str!("migrations/20260301_resource_metadata.sql"),
            Self::FileCache => include_str!("migrations/20260301_file_cache.sql"),
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::ResourceMetadata => "resource_metadata",
            Self::FileCache => "file_cache",
        }
    }
}

/// Connections of a file-backed pool; writers are serialized by the stores
const FILE_POOL_CONNECTIONS: u32 = 5;

/// How long a connection waits on a locked database before failing
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite pool of one store, migrated to that store's schema
///
/// File-backed pools run in WAL mode. An in-memory pool holds exactly one
/// connection: each in-memory connection is its own database.
pub struct DatabasePool {
    pool: SqlitePool,
}

impl DatabasePool {
    /// Opens the database at `db_path`, creating it and its directory if
    /// needed, and applies the schema
    ///
    /// # Errors
    ///
    /// `CacheError::ConnectionFailed` if the file cannot be created or
    /// opened, `CacheError::MigrationFailed` if the schema cannot be applied.
    pub async fn new(db_path: &Path, schema: Schema) -> Result<Self, CacheError> {
        if let Some(dir) = db_path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| {
                CacheError::ConnectionFailed(format!("cannot create {}: {e}", dir.display()))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);
        let pool = SqlitePoolOptions::new()
            .max_connections(FILE_POOL_CONNECTIONS)
            .connect_with(options)
            .await
            .map_err(|e| {
                CacheError::ConnectionFailed(format!("cannot open {}: {e}", db_path.display()))
            })?;

        migrate(&pool, schema).await?;
        tracing::info!(path = %db_path.display(), schema = schema.name(), "Opened store database");
        Ok(Self { pool })
    }

    /// Opens a private in-memory database with the schema applied
    pub async fn in_memory(schema: Schema) -> Result<Self, CacheError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| CacheError::ConnectionFailed(format!("in-memory database: {e}")))?;

        migrate(&pool, schema).await?;
        tracing::debug!(schema = schema.name(), "Opened in-memory store database");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Applies the idempotent schema script of `schema`
async fn migrate(pool: &SqlitePool, schema: Schema) -> Result<(), CacheError> {
    sqlx::raw_sql(schema.migration())
        .execute(pool)
        .await
        .map_err(|e| CacheError::MigrationFailed(format!("{} schema: {e}", schema.name())))?;
    Ok(())
}
