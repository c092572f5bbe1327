//! Bounded in-memory LRU backend.

use std::num::NonZeroUsize;

use async_trait::async_trait;
use bytes::Bytes;
use lru::LruCache;
use parking_lot::Mutex;

use super::Storage;
use crate::Error;

/// Called with the key of every entry pushed out by capacity pressure.
pub type EvictionCallback = Box<dyn Fn(&str) + Send + Sync>;

/// Unlocked LRU map with byte accounting.
///
/// [`LruStore`] wraps one in a mutex; caches that must update other state in
/// the same critical section hold one directly.
pub struct LruMap {
    entries: LruCache<String, Bytes>,
    bytes: usize,
}

impl std::fmt::Debug for LruMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LruMap").field("len", &self.entries.len()).field("cap", &self.entries.cap()).finish()
    }
}

impl LruMap {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self { entries: LruCache::new(capacity), bytes: 0 }
    }

    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }

    /// Membership check that does not touch recency.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains(key)
    }

    /// Insert or overwrite `key`, returning the key evicted to make room.
    pub fn put(&mut self, key: &str, value: Bytes) -> Option<String> {
        let added = key.len() + value.len();
        let evicted = match self.entries.push(key.to_string(), value) {
            Some((old_key, old_value)) => {
                self.bytes = self.bytes.saturating_sub(old_key.len() + old_value.len());
                (old_key != key).then_some(old_key)
            }
            None => None,
        };
        self.bytes += added;
        evicted
    }

    /// Lookup that marks `key` as most recently used.
    pub fn get(&mut self, key: &str) -> Option<Bytes> {
        self.entries.get(key).cloned()
    }

    /// True if the key was present.
    pub fn pop(&mut self, key: &str) -> bool {
        match self.entries.pop(key) {
            Some(value) => {
                self.bytes = self.bytes.saturating_sub(key.len() + value.len());
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.bytes = 0;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn bytes(&self) -> usize {
        self.bytes
    }
}

/// Fixed-capacity LRU map.
///
/// Inserting a new key into a full store evicts the least recently used
/// entry. The eviction callback runs synchronously on the inserting task,
/// after the map lock has been released.
pub struct LruStore {
    map: Mutex<LruMap>,
    on_evict: Option<EvictionCallback>,
}

impl std::fmt::Debug for LruStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LruStore").field("map", &*self.map.lock()).finish()
    }
}

impl LruStore {
    /// Create a store holding at most `capacity` entries.
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self { map: Mutex::new(LruMap::new(capacity)), on_evict: None }
    }

    pub fn with_eviction_callback(capacity: NonZeroUsize, on_evict: EvictionCallback) -> Self {
        Self { on_evict: Some(on_evict), ..Self::new(capacity) }
    }

    pub fn capacity(&self) -> usize {
        self.map.lock().capacity()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.map.lock().contains(key)
    }
}

#[async_trait]
impl Storage for LruStore {
    async fn insert(&self, key: &str, value: Bytes) -> Result<(), Error> {
        let evicted = self.map.lock().put(key, value);
        if let Some(evicted) = evicted {
            tracing::trace!(key = %evicted, "lru eviction");
            if let Some(on_evict) = &self.on_evict {
                on_evict(&evicted);
            }
        }
        Ok(())
    }

    async fn retrieve(&self, key: &str) -> Result<Bytes, Error> {
        self.map.lock().get(key).ok_or_else(|| Error::NotFound(key.to_string()))
    }

    async fn remove(&self, key: &str) -> Result<(), Error> {
        self.map.lock().pop(key);
        Ok(())
    }

    async fn flush(&self) -> Result<(), Error> {
        self.map.lock().clear();
        Ok(())
    }

    async fn len(&self) -> Result<u64, Error> {
        Ok(self.map.lock().len() as u64)
    }

    async fn size(&self) -> Result<u64, Error> {
        Ok(self.map.lock().bytes() as u64)
    }

    async fn close(&self) -> Result<(), Error> {
        self.flush().await
    }
}
