//! Embedded SQLite database bootstrap for the memory index.
//!
//! Schema creation is owned by the migration system: tables, the FTS5
//! mirror, and its sync triggers all come from `migrations/`, applied at
//! [`DatabaseConnection::initialize`]. The memory index is the only
//! writer; readers go through its API.

use std::path::{Path, PathBuf};

use nutype::nutype;
use sqlx::migrate::Migrator;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{Pool, Sqlite, SqlitePool};
use thiserror::Error;
use tracing::info;

/// Embedded migrations compiled from `migrations/`.
static MIGRATOR: Migrator = sqlx::migrate!();

/// Database-layer errors.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("filesystem error at {path}: {source}")]
    FileSystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid database path: {reason}")]
    InvalidPath { reason: String },
}

pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Validated on-disk location of the database file. The path must be
/// non-empty and carry a `.db` extension.
#[nutype(
    validate(predicate = |path| !path.as_os_str().is_empty() && path.extension().is_some_and(|ext| ext == "db")),
    derive(Clone, Debug, Eq, PartialEq)
)]
pub struct DatabasePath(PathBuf);

impl DatabasePath {
    /// Validate an arbitrary path into a database path.
    pub fn parse<P: AsRef<Path>>(path: P) -> DatabaseResult<Self> {
        Self::try_new(path.as_ref().to_path_buf()).map_err(|_| DatabaseError::InvalidPath {
            reason: "path is empty or does not end in .db".to_string(),
        })
    }

    pub fn as_path(&self) -> PathBuf {
        self.clone().into_inner()
    }
}

/// Connection pool over the embedded database with the schema applied.
#[derive(Clone)]
pub struct DatabaseConnection {
    pool: Pool<Sqlite>,
    path: DatabasePath,
}

impl DatabaseConnection {
    /// Open (creating if missing) the database at `path`, apply pragmas,
    /// and run pending migrations.
    pub async fn initialize(path: DatabasePath) -> DatabaseResult<Self> {
        if let Some(parent) = path.as_path().parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|source| DatabaseError::FileSystem {
                        path: parent.to_path_buf(),
                        source,
                    })?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path.as_path())
            .create_if_missing(true)
            .pragma("journal_mode", "WAL")
            .pragma("foreign_keys", "ON")
            .pragma("synchronous", "NORMAL");

        let pool = SqlitePool::connect_with(options).await?;

        MIGRATOR.run(&pool).await?;
        info!(path = %path.as_path().display(), "database initialized");

        Ok(Self { pool, path })
    }

    /// The underlying pool, for the owning component's queries.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Size of the database file in bytes, 0 when unreadable.
    pub async fn file_size(&self) -> u64 {
        tokio::fs::metadata(self.path.as_path())
            .await
            .map(|m| m.len())
            .unwrap_or(0)
    }

    /// Close the pool, flushing outstanding work.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_requires_db_extension() {
        assert!(DatabasePath::parse("memory.db").is_ok());
        assert!(DatabasePath::parse("memory.sqlite").is_err());
        assert!(DatabasePath::parse("").is_err());
    }

    #[tokio::test]
    async fn initialize_creates_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = DatabasePath::parse(dir.path().join("test.db")).unwrap();
        let conn = DatabaseConnection::initialize(path).await.unwrap();

        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN ('files','chunks')",
        )
        .fetch_one(conn.pool())
        .await
        .unwrap();
        assert_eq!(row.0, 2);

        let fts: Option<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE name = 'chunks_fts'")
                .fetch_optional(conn.pool())
                .await
                .unwrap();
        assert!(fts.is_some());
    }

    #[tokio::test]
    async fn initialize_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b").join("test.db");
        let path = DatabasePath::parse(&nested).unwrap();
        let conn = DatabaseConnection::initialize(path).await;
        assert!(conn.is_ok());
        assert!(nested.exists());
    }
}
