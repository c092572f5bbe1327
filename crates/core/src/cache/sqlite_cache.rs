//! Persistent cache with the expiry stored inside each value.

use std::path::Path;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use super::expiry::{Compact, Compactor, expiry_from_ttl, remaining_ttl, store};
use super::{Cache, SQLITE_COMPACTOR_INTERVAL};
use crate::Error;
use crate::clock::SharedClock;
use crate::storage::{SqliteStore, Storage};

/// SQLite-backed cache.
///
/// Values are stored as `[expires_at: u32 BE][payload]`. The compactor scans
/// the keyspace on a long interval, deletes expired rows in one transaction
/// and then runs the store's GC.
pub struct SqliteCache {
    name: String,
    store: SqliteStore,
    clock: SharedClock,
    compactor: Compactor,
    interval: Duration,
    me: Weak<SqliteCache>,
}

impl std::fmt::Debug for SqliteCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteCache").field("name", &self.name).field("store", &self.store).finish()
    }
}

impl SqliteCache {
    pub async fn open(name: impl Into<String>, path: impl AsRef<Path>, clock: SharedClock) -> Result<Arc<Self>, Error> {
        let store = SqliteStore::open(path).await?;
        Ok(Self::from_store(name, store, clock, SQLITE_COMPACTOR_INTERVAL))
    }

    pub async fn open_in_memory(name: impl Into<String>, clock: SharedClock) -> Result<Arc<Self>, Error> {
        let store = SqliteStore::open_in_memory().await?;
        Ok(Self::from_store(name, store, clock, SQLITE_COMPACTOR_INTERVAL))
    }

    pub fn from_store(name: impl Into<String>, store: SqliteStore, clock: SharedClock, interval: Duration) -> Arc<Self> {
        let name = name.into();
        Arc::new_cyclic(|me| Self { name, store, clock, compactor: Compactor::new(), interval, me: me.clone() })
    }

    async fn live(&self, key: &str) -> Result<(u32, Bytes), Error> {
        let (expires_at, payload) = store::decode(self.store.retrieve(key).await?)?;
        if expires_at != 0 && expires_at < self.clock.unix_secs() {
            return Err(Error::NotFound(key.to_string()));
        }
        Ok((expires_at, payload))
    }
}

#[async_trait]
impl Cache for SqliteCache {
    fn name(&self) -> &str {
        &self.name
    }

    async fn insert_ttl(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), Error> {
        let expires_at = expiry_from_ttl(self.clock.unix_secs(), ttl);
        self.store.insert(key, store::encode(expires_at, &value)).await
    }

    async fn retrieve(&self, key: &str) -> Result<Bytes, Error> {
        self.live(key).await.map(|(_, payload)| payload)
    }

    async fn ttl(&self, key: &str) -> Result<Duration, Error> {
        let (expires_at, _) = self.live(key).await?;
        remaining_ttl(key, expires_at, self.clock.unix_secs())
    }

    async fn remove(&self, key: &str) -> Result<(), Error> {
        self.store.remove(key).await
    }

    async fn flush(&self) -> Result<(), Error> {
        self.store.flush().await
    }

    async fn len(&self) -> Result<u64, Error> {
        self.store.len().await
    }

    async fn size(&self) -> Result<u64, Error> {
        self.store.size().await
    }

    fn start(&self) {
        tracing::info!(cache = %self.name, interval_secs = self.interval.as_secs(), "starting sqlite cache");
        self.compactor.start(self.me.clone(), self.interval);
    }

    async fn stop(&self) {
        self.compactor.stop().await;
    }

    async fn close(&self) -> Result<(), Error> {
        self.stop().await;
        self.store.close().await
    }
}

#[async_trait]
impl Compact for SqliteCache {
    fn cache_name(&self) -> &str {
        &self.name
    }

    async fn compact(&self) -> Result<usize, Error> {
        let now = self.clock.unix_secs();
        let expired = self.store.scan_keys(move |value| store::has_expired(value, now)).await?;
        let removed = self.store.remove_many(expired).await?;
        self.store.gc().await?;
        Ok(removed)
    }
}
