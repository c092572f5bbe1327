//! TTL-aware caches built on the storage backends.
//!
//! A cache binds a [`Storage`](crate::storage::Storage) backend to an expiry
//! index and a background compactor:
//!
//! - [`LruCache`]: bounded in-memory map with a sorted in-memory expiry index
//! - [`SqliteCache`]: persistent store with the expiry encoded into each value
//! - [`TieredCache`]: ordered list of caches, fastest first
//!
//! [`build_cache`] constructs any of them from a [`CacheConfig`](crate::config::CacheConfig).

pub mod builder;
pub mod expiry;
pub mod lru_cache;
pub mod sqlite_cache;
pub mod tiered;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

pub use crate::Error;

pub use builder::build_cache;
pub use lru_cache::LruCache;
pub use sqlite_cache::SqliteCache;
pub use tiered::TieredCache;

/// Default compaction interval for in-memory caches.
pub const LRU_COMPACTOR_INTERVAL: Duration = Duration::from_secs(5);

/// Default compaction interval for persistent caches; each pass scans the keyspace.
pub const SQLITE_COMPACTOR_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// TTL-aware key/value cache.
#[async_trait]
pub trait Cache: Send + Sync {
    fn name(&self) -> &str;

    /// Insert a value that never expires.
    async fn insert(&self, key: &str, value: Bytes) -> Result<(), Error> {
        self.insert_ttl(key, value, Duration::ZERO).await
    }

    /// Insert a value expiring after `ttl`. A zero TTL means no expiry.
    async fn insert_ttl(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), Error>;

    /// Fetch a live value. Absent or expired keys yield [`Error::NotFound`].
    async fn retrieve(&self, key: &str) -> Result<Bytes, Error>;

    /// Remaining TTL, [`Error::NoExpiry`] for permanent keys, [`Error::NotFound`] if absent.
    async fn ttl(&self, key: &str) -> Result<Duration, Error>;

    async fn remove(&self, key: &str) -> Result<(), Error>;

    async fn flush(&self) -> Result<(), Error>;

    async fn len(&self) -> Result<u64, Error>;

    async fn size(&self) -> Result<u64, Error>;

    /// Start the background compactor. Idempotent.
    fn start(&self);

    /// Stop the compactor, waiting for an in-progress pass. Idempotent.
    async fn stop(&self);

    /// Stop, then close the backend. No operations may follow.
    async fn close(&self) -> Result<(), Error>;
}
