//! In-memory LRU cache with a sorted expiry index.

use std::num::NonZeroUsize;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use super::expiry::{Compact, Compactor, MemoryExpiry, expiry_from_ttl, remaining_ttl};
use super::{Cache, LRU_COMPACTOR_INTERVAL};
use crate::Error;
use crate::clock::SharedClock;
use crate::storage::LruMap;

/// Expired keys removed per lock acquisition during compaction.
const COMPACT_BATCH: usize = 256;

/// Map and expiry index, always locked together.
#[derive(Debug)]
struct Shared {
    entries: LruMap,
    expiry: MemoryExpiry,
}

impl Shared {
    fn is_expired(&self, key: &str, now: u32) -> bool {
        matches!(self.expiry.expires_at(key), Some(at) if at < now)
    }
}

/// Bounded in-memory cache.
///
/// Entries and their expiry records share one mutex. An eviction drops the
/// evicted key's record inside the same critical section as the insert that
/// caused it, so the index never outlives the entries it tracks.
pub struct LruCache {
    name: String,
    shared: Mutex<Shared>,
    clock: SharedClock,
    compactor: Compactor,
    interval: Duration,
    me: Weak<LruCache>,
}

impl std::fmt::Debug for LruCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shared = self.shared.lock();
        f.debug_struct("LruCache")
            .field("name", &self.name)
            .field("entries", &shared.entries)
            .field("tracked", &shared.expiry.len())
            .finish()
    }
}

impl LruCache {
    pub fn new(name: impl Into<String>, capacity: NonZeroUsize, clock: SharedClock) -> Arc<Self> {
        Self::with_interval(name, capacity, clock, LRU_COMPACTOR_INTERVAL)
    }

    pub fn with_interval(
        name: impl Into<String>, capacity: NonZeroUsize, clock: SharedClock, interval: Duration,
    ) -> Arc<Self> {
        let name = name.into();
        Arc::new_cyclic(|me: &Weak<Self>| Self {
            name,
            shared: Mutex::new(Shared { entries: LruMap::new(capacity), expiry: MemoryExpiry::new() }),
            clock,
            compactor: Compactor::new(),
            interval,
            me: me.clone(),
        })
    }

    /// Number of keys with a tracked expiry.
    pub fn tracked(&self) -> usize {
        self.shared.lock().expiry.len()
    }

    /// Whether `key` is stored, expired or not. Does not touch recency.
    pub fn contains(&self, key: &str) -> bool {
        self.shared.lock().entries.contains(key)
    }
}

#[async_trait]
impl Cache for LruCache {
    fn name(&self) -> &str {
        &self.name
    }

    async fn insert_ttl(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), Error> {
        let expires_at = expiry_from_ttl(self.clock.unix_secs(), ttl);
        let mut shared = self.shared.lock();
        shared.expiry.add(key, expires_at);
        if let Some(evicted) = shared.entries.put(key, value) {
            shared.expiry.remove(&evicted);
            tracing::trace!(cache = %self.name, key = %evicted, "lru eviction");
        }
        Ok(())
    }

    async fn retrieve(&self, key: &str) -> Result<Bytes, Error> {
        let now = self.clock.unix_secs();
        let mut shared = self.shared.lock();
        if shared.is_expired(key, now) {
            return Err(Error::NotFound(key.to_string()));
        }
        shared.entries.get(key).ok_or_else(|| Error::NotFound(key.to_string()))
    }

    async fn ttl(&self, key: &str) -> Result<Duration, Error> {
        let now = self.clock.unix_secs();
        let shared = self.shared.lock();
        match shared.expiry.expires_at(key) {
            Some(at) if at < now => Err(Error::NotFound(key.to_string())),
            Some(at) => remaining_ttl(key, at, now),
            None if shared.entries.contains(key) => Err(Error::NoExpiry(key.to_string())),
            None => Err(Error::NotFound(key.to_string())),
        }
    }

    async fn remove(&self, key: &str) -> Result<(), Error> {
        let mut shared = self.shared.lock();
        shared.expiry.remove(key);
        shared.entries.pop(key);
        Ok(())
    }

    async fn flush(&self) -> Result<(), Error> {
        let mut shared = self.shared.lock();
        shared.entries.clear();
        shared.expiry.clear();
        Ok(())
    }

    async fn len(&self) -> Result<u64, Error> {
        Ok(self.shared.lock().entries.len() as u64)
    }

    async fn size(&self) -> Result<u64, Error> {
        Ok(self.shared.lock().entries.bytes() as u64)
    }

    fn start(&self) {
        tracing::info!(cache = %self.name, capacity = self.shared.lock().entries.capacity(), "starting lru cache");
        self.compactor.start(self.me.clone(), self.interval);
    }

    async fn stop(&self) {
        self.compactor.stop().await;
    }

    async fn close(&self) -> Result<(), Error> {
        self.stop().await;
        self.flush().await
    }
}

#[async_trait]
impl Compact for LruCache {
    fn cache_name(&self) -> &str {
        &self.name
    }

    /// Drains the expired prefix in batches, releasing the lock between them.
    async fn compact(&self) -> Result<usize, Error> {
        let now = self.clock.unix_secs();
        let mut removed = 0;
        loop {
            let popped = {
                let mut shared = self.shared.lock();
                let expired = shared.expiry.compact_batch(now, COMPACT_BATCH);
                for key in &expired {
                    if shared.entries.pop(key) {
                        removed += 1;
                    }
                }
                expired.len()
            };
            if popped < COMPACT_BATCH {
                return Ok(removed);
            }
            tokio::task::yield_now().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;

    fn cache(capacity: usize) -> (Arc<LruCache>, Arc<MockClock>) {
        let clock = Arc::new(MockClock::default());
        let cache = LruCache::new("test", NonZeroUsize::new(capacity).unwrap(), clock.clone());
        (cache, clock)
    }

    #[tokio::test]
    async fn test_insert_ttl_and_retrieve() {
        let (cache, _) = cache(8);
        cache.insert_ttl("k", Bytes::from_static(b"v"), Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.retrieve("k").await.unwrap(), Bytes::from_static(b"v"));
        assert_eq!(cache.ttl("k").await.unwrap(), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_zero_ttl_is_untracked() {
        let (cache, clock) = cache(8);
        cache.insert("forever", Bytes::from_static(b"v")).await.unwrap();
        assert_eq!(cache.tracked(), 0);
        assert!(matches!(cache.ttl("forever").await, Err(Error::NoExpiry(_))));
        assert!(matches!(cache.ttl("absent").await, Err(Error::NotFound(_))));

        clock.advance(Duration::from_secs(86_400 * 365));
        assert_eq!(cache.compact().await.unwrap(), 0);
        assert!(cache.retrieve("forever").await.is_ok());
    }

    #[tokio::test]
    async fn test_expired_value_is_a_miss_before_compaction() {
        let (cache, clock) = cache(8);
        cache.insert_ttl("k", Bytes::from_static(b"v"), Duration::from_secs(10)).await.unwrap();
        clock.advance(Duration::from_secs(11));
        assert!(matches!(cache.retrieve("k").await, Err(Error::NotFound(_))));
        assert!(matches!(cache.ttl("k").await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_compact_removes_exactly_expired_keys() {
        let (cache, clock) = cache(8);
        cache.insert_ttl("a", Bytes::from_static(b"1"), Duration::from_secs(10)).await.unwrap();
        cache.insert_ttl("b", Bytes::from_static(b"2"), Duration::from_secs(20)).await.unwrap();
        cache.insert_ttl("c", Bytes::from_static(b"3"), Duration::from_secs(30)).await.unwrap();

        clock.advance(Duration::from_secs(21));
        assert_eq!(cache.compact().await.unwrap(), 2);
        assert_eq!(cache.len().await.unwrap(), 1);
        assert_eq!(cache.tracked(), 1);
        assert!(cache.retrieve("c").await.is_ok());
    }

    #[tokio::test]
    async fn test_eviction_drops_expiry_record() {
        let (cache, _) = cache(2);
        cache.insert_ttl("a", Bytes::from_static(b"1"), Duration::from_secs(60)).await.unwrap();
        cache.insert_ttl("b", Bytes::from_static(b"2"), Duration::from_secs(60)).await.unwrap();
        cache.insert_ttl("c", Bytes::from_static(b"3"), Duration::from_secs(60)).await.unwrap();

        assert_eq!(cache.len().await.unwrap(), 2);
        assert_eq!(cache.tracked(), 2);
        assert!(matches!(cache.ttl("a").await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_reinsert_survives_compaction_of_old_record() {
        let (cache, clock) = cache(8);
        cache.insert_ttl("k", Bytes::from_static(b"old"), Duration::from_secs(5)).await.unwrap();
        clock.advance(Duration::from_secs(6));
        cache.insert_ttl("k", Bytes::from_static(b"new"), Duration::from_secs(60)).await.unwrap();

        assert_eq!(cache.compact().await.unwrap(), 0);
        assert_eq!(cache.retrieve("k").await.unwrap(), Bytes::from_static(b"new"));
    }

    #[tokio::test]
    async fn test_permanent_reinsert_survives_compaction() {
        let (cache, clock) = cache(8);
        cache.insert_ttl("k", Bytes::from_static(b"old"), Duration::from_secs(5)).await.unwrap();
        clock.advance(Duration::from_secs(6));
        cache.insert("k", Bytes::from_static(b"new")).await.unwrap();

        assert_eq!(cache.compact().await.unwrap(), 0);
        assert_eq!(cache.retrieve("k").await.unwrap(), Bytes::from_static(b"new"));
        assert!(matches!(cache.ttl("k").await, Err(Error::NoExpiry(_))));
    }

    #[tokio::test]
    async fn test_compact_drains_more_than_one_batch() {
        let (cache, clock) = cache(COMPACT_BATCH * 3);
        for i in 0..COMPACT_BATCH * 2 + 10 {
            cache.insert_ttl(&format!("k{i}"), Bytes::from_static(b"v"), Duration::from_secs(1)).await.unwrap();
        }
        cache.insert_ttl("keep", Bytes::from_static(b"v"), Duration::from_secs(60)).await.unwrap();

        clock.advance(Duration::from_secs(2));
        assert_eq!(cache.compact().await.unwrap(), COMPACT_BATCH * 2 + 10);
        assert_eq!(cache.len().await.unwrap(), 1);
        assert_eq!(cache.tracked(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_index_matches_entries_under_contention() {
        let (cache, _) = cache(16);
        let tasks: Vec<_> = (0..8)
            .map(|t| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move {
                    for i in 0..500 {
                        let key = format!("k{}", (i * 7 + t) % 64);
                        cache.insert_ttl(&key, Bytes::from_static(b"v"), Duration::from_secs(60)).await.unwrap();
                        if i % 5 == 0 {
                            cache.remove(&format!("k{}", (i + t) % 64)).await.unwrap();
                        }
                    }
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(cache.tracked() as u64, cache.len().await.unwrap());
        for i in 0..64 {
            let key = format!("k{i}");
            assert_eq!(cache.contains(&key), cache.ttl(&key).await.is_ok(), "{key}");
        }
    }

    #[tokio::test]
    async fn test_remove_and_flush() {
        let (cache, _) = cache(8);
        cache.insert_ttl("a", Bytes::from_static(b"1"), Duration::from_secs(60)).await.unwrap();
        cache.insert_ttl("b", Bytes::from_static(b"2"), Duration::from_secs(60)).await.unwrap();
        cache.remove("a").await.unwrap();
        assert_eq!(cache.tracked(), 1);
        cache.flush().await.unwrap();
        assert_eq!(cache.tracked(), 0);
        assert_eq!(cache.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_start_stop_close_idempotent() {
        let (cache, _) = cache(8);
        cache.start();
        cache.start();
        cache.stop().await;
        cache.stop().await;
        cache.start();
        cache.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_background_compactor_drains_expired() {
        let clock = Arc::new(MockClock::default());
        let cache = LruCache::with_interval("bg", NonZeroUsize::new(8).unwrap(), clock.clone(), Duration::from_millis(20));
        cache.insert_ttl("k", Bytes::from_static(b"v"), Duration::from_secs(1)).await.unwrap();
        clock.advance(Duration::from_secs(2));

        cache.start();
        tokio::time::sleep(Duration::from_millis(100)).await;
        cache.stop().await;

        assert_eq!(cache.len().await.unwrap(), 0);
        assert_eq!(cache.tracked(), 0);
    }
}
