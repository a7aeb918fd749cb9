//! Store handle, connection bootstrap, and schema management.

use std::path::Path;
use std::time::Duration;

use sqlx::SqlitePool;
use tracing::info;

use crate::error::{CatalogError, Result};

/// Default per-request work budget for search queries.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(15);

const CREATE_FILES: &str = r"
    CREATE TABLE IF NOT EXISTS files (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        md5 TEXT UNIQUE,
        server_path TEXT,
        title TEXT,
        description_compressed BLOB,
        cover_url TEXT,
        extension TEXT,
        year TEXT,
        author TEXT,
        language TEXT,
        ipfs_cid TEXT,
        torrent_id INTEGER,
        byteoffset INTEGER,
        is_journal INT DEFAULT 0 NOT NULL,
        FOREIGN KEY(torrent_id) REFERENCES torrents(id)
    )
";

const CREATE_FILES_FTS: &str = r"
    CREATE VIRTUAL TABLE IF NOT EXISTS files_fts USING fts5(
        text,
        content=''
    )
";

const CREATE_TORRENTS: &str = r"
    CREATE TABLE IF NOT EXISTS torrents (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        path TEXT UNIQUE,
        magnet_link TEXT,
        added_to_torrents_list_at TEXT,
        data_size INT,
        obsolete INT,
        embargo INT,
        num_files INT,
        is_seeding INT NOT NULL DEFAULT 0,
        is_seed_all INT NOT NULL DEFAULT 0
    )
";

const CREATE_TORRENT_FILES: &str = r#"
    CREATE TABLE IF NOT EXISTS "torrent_files" (
        id INTEGER,
        torrent_id INTEGER NOT NULL,
        filename TEXT,
        file_id INT NOT NULL,
        is_complete INT NOT NULL DEFAULT 0,
        local_path TEXT,
        PRIMARY KEY("id" AUTOINCREMENT)
    )
"#;

const CREATE_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_files_year ON files(year)",
    "CREATE INDEX IF NOT EXISTS idx_files_torrent_id ON files(torrent_id)",
    "CREATE INDEX IF NOT EXISTS idx_files_is_journal ON files(is_journal)",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_torrents_path ON torrents(path)",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_torrent_files_file_id ON torrent_files(file_id)",
    "CREATE INDEX IF NOT EXISTS idx_torrent_files_torrent_id ON torrent_files(torrent_id)",
];

/// Handle over the catalog database.
///
/// Cheap to clone; every caller effectively owns its own pooled connection,
/// which is the concurrency discipline the catalog requires (WAL mode, one
/// writer at a time per process).
#[derive(Debug, Clone)]
pub struct CatalogStore {
    pool: SqlitePool,
    query_timeout: Duration,
}

impl CatalogStore {
    /// Open (creating if missing) the catalog database at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be opened or the schema cannot
    /// be applied.
    pub async fn open(path: &Path, query_timeout: Duration) -> Result<Self> {
        let url = format!("sqlite://{}?mode=rwc", path.display());
        info!(database = %path.display(), "opening catalog");
        let pool = SqlitePool::connect(&url)
            .await
            .map_err(CatalogError::query("connect"))?;

        let store = Self {
            pool,
            query_timeout,
        };
        store.init_schema().await?;
        Ok(store)
    }

    /// Access the underlying pool.
    #[must_use]
    pub(crate) const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub(crate) const fn query_timeout(&self) -> Duration {
        self.query_timeout
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query("PRAGMA journal_mode=WAL")
            .execute(&self.pool)
            .await
            .map_err(CatalogError::query("journal_mode"))?;

        for statement in [
            CREATE_TORRENTS,
            CREATE_FILES,
            CREATE_FILES_FTS,
            CREATE_TORRENT_FILES,
        ] {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(CatalogError::query("create_table"))?;
        }
        for statement in CREATE_INDEXES {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(CatalogError::query("create_index"))?;
        }
        Ok(())
    }

    /// Relax durability for bulk ingest; losses are acceptable because
    /// ingest is idempotent on md5.
    ///
    /// # Errors
    ///
    /// Returns an error if the pragma cannot be applied.
    pub async fn set_bulk_write_mode(&self) -> Result<()> {
        sqlx::query("PRAGMA synchronous = 0")
            .execute(&self.pool)
            .await
            .map_err(CatalogError::query("synchronous"))?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::TempDir;

    pub(crate) async fn open_store() -> (TempDir, CatalogStore) {
        let dir = TempDir::new().expect("tempdir");
        let store = CatalogStore::open(&dir.path().join("catalog.db"), DEFAULT_QUERY_TIMEOUT)
            .await
            .expect("open store");
        (dir, store)
    }

    #[tokio::test]
    async fn open_is_idempotent_and_reopens_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("catalog.db");
        let first = CatalogStore::open(&path, DEFAULT_QUERY_TIMEOUT).await.unwrap();
        drop(first);
        CatalogStore::open(&path, DEFAULT_QUERY_TIMEOUT).await.unwrap();
    }
}
