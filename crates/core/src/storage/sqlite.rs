//! Embedded persistent backend on SQLite.
//!
//! Opens the database with WAL and incremental auto-vacuum, runs the schema
//! migrations, then serves every operation on tokio-rusqlite's background
//! thread. Values are opaque blobs; callers that need a TTL encode it into the
//! value (see [`crate::cache::expiry::store`]).

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio_rusqlite::{Connection, OptionalExtension, params};

use super::{Storage, migrations};
use crate::Error;

const PRAGMAS: &str = "PRAGMA auto_vacuum=INCREMENTAL;
                       PRAGMA journal_mode=WAL;
                       PRAGMA synchronous=NORMAL;
                       PRAGMA temp_store=MEMORY;";

/// Persistent key/value store handle.
///
/// Cloning is cheap; all clones share one background connection.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    conn: Connection,
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Open a database at the specified path.
    ///
    /// Creates the file if it doesn't exist, applies pragmas, and runs any
    /// pending migrations.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path).await.map_err(|e| Error::Database(e.into()))?;
        Self::prepare(&conn).await?;
        tracing::info!(path = %path.display(), "opened sqlite store");
        Ok(Self { conn, path: Some(path) })
    }

    /// Open an in-memory database for testing.
    pub async fn open_in_memory() -> Result<Self, Error> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| Error::Database(e.into()))?;
        Self::prepare(&conn).await?;
        Ok(Self { conn, path: None })
    }

    async fn prepare(conn: &Connection) -> Result<(), Error> {
        conn.call(|conn| conn.execute_batch(PRAGMAS)).await.map_err(Error::Database)?;
        migrations::ensure_schema(conn).await
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Walk the whole keyspace and return the keys whose value matches `pred`.
    pub async fn scan_keys<F>(&self, pred: F) -> Result<Vec<String>, Error>
    where
        F: Fn(&[u8]) -> bool + Send + 'static,
    {
        self.conn
            .call(move |conn| -> Result<Vec<String>, Error> {
                let mut stmt = conn.prepare("SELECT key, value FROM kv")?;
                let mut rows = stmt.query([])?;
                let mut keys = Vec::new();
                while let Some(row) = rows.next()? {
                    let value: Vec<u8> = row.get(1)?;
                    if pred(&value) {
                        keys.push(row.get(0)?);
                    }
                }
                Ok(keys)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete a batch of keys in one transaction.
    pub async fn remove_many(&self, keys: Vec<String>) -> Result<usize, Error> {
        if keys.is_empty() {
            return Ok(0);
        }
        self.conn
            .call(move |conn| -> Result<usize, Error> {
                let tx = conn.transaction()?;
                let mut removed = 0;
                {
                    let mut stmt = tx.prepare("DELETE FROM kv WHERE key = ?1")?;
                    for key in &keys {
                        removed += stmt.execute(params![key])?;
                    }
                }
                tx.commit()?;
                Ok(removed)
            })
            .await
            .map_err(Error::from)
    }

    /// Reclaim free pages and truncate the write-ahead log.
    pub async fn gc(&self) -> Result<(), Error> {
        self.conn
            .call(|conn| -> Result<(), Error> {
                // Each step of incremental_vacuum frees one page.
                let mut stmt = conn.prepare("PRAGMA incremental_vacuum")?;
                let mut rows = stmt.query([])?;
                while rows.next()?.is_some() {}
                conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }
}

#[async_trait]
impl Storage for SqliteStore {
    async fn insert(&self, key: &str, value: Bytes) -> Result<(), Error> {
        let key = key.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO kv (key, value) VALUES (?1, ?2)
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                    params![key, &value[..]],
                )
            })
            .await
            .map_err(Error::Database)?;
        Ok(())
    }

    async fn retrieve(&self, key: &str) -> Result<Bytes, Error> {
        let owned = key.to_string();
        let value = self
            .conn
            .call(move |conn| {
                conn.query_row("SELECT value FROM kv WHERE key = ?1", params![owned], |row| row.get::<_, Vec<u8>>(0))
                    .optional()
            })
            .await
            .map_err(Error::Database)?;

        value.map(Bytes::from).ok_or_else(|| Error::NotFound(key.to_string()))
    }

    async fn remove(&self, key: &str) -> Result<(), Error> {
        let key = key.to_string();
        self.conn
            .call(move |conn| conn.execute("DELETE FROM kv WHERE key = ?1", params![key]))
            .await
            .map_err(Error::Database)?;
        Ok(())
    }

    async fn flush(&self) -> Result<(), Error> {
        self.conn
            .call(|conn| conn.execute("DELETE FROM kv", []))
            .await
            .map_err(Error::Database)?;
        Ok(())
    }

    async fn len(&self) -> Result<u64, Error> {
        let count: i64 = self
            .conn
            .call(|conn| conn.query_row("SELECT COUNT(*) FROM kv", [], |row| row.get(0)))
            .await
            .map_err(Error::Database)?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn size(&self) -> Result<u64, Error> {
        let bytes: i64 = self
            .conn
            .call(|conn| {
                conn.query_row(
                    "SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()",
                    [],
                    |row| row.get(0),
                )
            })
            .await
            .map_err(Error::Database)?;
        Ok(u64::try_from(bytes).unwrap_or(0))
    }

    async fn close(&self) -> Result<(), Error> {
        self.conn.clone().close().await.map_err(Error::Database)?;
        if let Some(path) = &self.path {
            tracing::info!(path = %path.display(), "closed sqlite store");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_in_memory() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        assert_eq!(store.len().await.unwrap(), 0);
        assert!(store.path().is_none());
    }

    #[tokio::test]
    async fn test_insert_retrieve_overwrite() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        store.insert("a", Bytes::from_static(b"one")).await.unwrap();
        store.insert("a", Bytes::from_static(b"two")).await.unwrap();
        assert_eq!(store.retrieve("a").await.unwrap(), Bytes::from_static(b"two"));
        assert_eq!(store.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_missing_key_is_not_found() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        assert!(matches!(store.retrieve("nope").await, Err(Error::NotFound(k)) if k == "nope"));
        store.remove("nope").await.unwrap();
    }

    #[tokio::test]
    async fn test_scan_and_remove_many() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        for (key, value) in [("keep", &b"k"[..]), ("drop1", b"d"), ("drop2", b"d")] {
            store.insert(key, Bytes::copy_from_slice(value)).await.unwrap();
        }

        let mut doomed = store.scan_keys(|value| value == b"d").await.unwrap();
        doomed.sort();
        assert_eq!(doomed, vec!["drop1".to_string(), "drop2".to_string()]);

        assert_eq!(store.remove_many(doomed).await.unwrap(), 2);
        assert_eq!(store.len().await.unwrap(), 1);
        store.gc().await.unwrap();
    }

    #[tokio::test]
    async fn test_flush_and_size() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        store.insert("a", Bytes::from(vec![7u8; 4096])).await.unwrap();
        assert!(store.size().await.unwrap() > 0);
        store.flush().await.unwrap();
        assert_eq!(store.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kv.sqlite");

        let store = SqliteStore::open(&path).await.unwrap();
        store.insert("persist", Bytes::from_static(b"me")).await.unwrap();
        store.close().await.unwrap();

        let reopened = SqliteStore::open(&path).await.unwrap();
        assert_eq!(reopened.retrieve("persist").await.unwrap(), Bytes::from_static(b"me"));
        assert!(matches!(store.retrieve("persist").await, Err(Error::Database(_))));
    }
}
