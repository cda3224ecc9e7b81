//! libSQL connection for the local cache

use crate::error::Result;
use libsql::{Builder, Connection, Database as LibSqlDatabase};
use std::path::Path;

use super::migrations;

const IN_MEMORY: &str = ":memory:";

/// One user's cache database, migrated on open.
///
/// The cache has a single writer, so one connection is shared by every
/// operation.
pub struct Database {
    // Dropping the database handle closes the connection
    _db: LibSqlDatabase,
    conn: Connection,
}

impl Database {
    /// Open the cache file at `path`, creating it and its parent directories
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let database = Self::connect(&path.to_string_lossy()).await?;
        tracing::debug!("Opened local cache at {}", path.display());
        Ok(database)
    }

    /// Cache that lives only as long as the value (tests, throwaway sessions)
    pub async fn open_in_memory() -> Result<Self> {
        Self::connect(IN_MEMORY).await
    }

    async fn connect(location: &str) -> Result<Self> {
        let db = Builder::new_local(location).build().await?;
        let conn = db.connect()?;

        let database = Self { _db: db, conn };
        database.configure().await?;
        migrations::run(&database.conn).await?;
        Ok(database)
    }

    async fn configure(&self) -> Result<()> {
        // WAL is unavailable for in-memory databases
        self.conn
            .execute("PRAGMA journal_mode = WAL;", ())
            .await
            .ok();
        self.conn
            .execute("PRAGMA synchronous = NORMAL;", ())
            .await
            .ok();
        self.conn.execute("PRAGMA temp_store = MEMORY;", ()).await?;
        Ok(())
    }

    pub const fn connection(&self) -> &Connection {
        &self.conn
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_open_in_memory() {
        let db = Database::open_in_memory().await.unwrap();
        let mut rows = db
            .connection()
            .query("SELECT COUNT(*) FROM notes", ())
            .await
            .unwrap();
        let row = rows.next().await.unwrap().unwrap();
        assert_eq!(row.get::<i64>(0).unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_open_creates_parent_directories() {
        let tmp = tempdir().unwrap();
        let db_path = tmp.path().join("nested").join("cache").join("notes.db");

        Database::open(&db_path).await.unwrap();
        assert!(db_path.exists());
    }
}
