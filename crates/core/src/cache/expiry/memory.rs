//! In-memory expiry index.
//!
//! Records are kept in a vector sorted by `expires_at` so that compaction only
//! walks the expired prefix. A side map from key to expiry lets `remove` and
//! `ttl` find a record without a linear scan.

use std::collections::HashMap;
use std::time::Duration;

use super::{ExpiryRecord, remaining_ttl};
use crate::Error;

/// Sorted (key, expiry) index for backends without persistent TTLs.
#[derive(Debug, Default)]
pub struct MemoryExpiry {
    records: Vec<ExpiryRecord>,
    index: HashMap<String, u32>,
}

impl MemoryExpiry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `key` until `expires_at`. An expiry of 0 stops tracking the key.
    pub fn add(&mut self, key: &str, expires_at: u32) {
        self.remove(key);
        if expires_at == 0 {
            return;
        }

        let record = ExpiryRecord { key: key.to_string(), expires_at };
        match self.records.last() {
            Some(last) if last.expires_at > expires_at => {
                let at = self.records.partition_point(|r| r.expires_at <= expires_at);
                self.records.insert(at, record);
            }
            _ => self.records.push(record),
        }
        self.index.insert(key.to_string(), expires_at);
    }

    /// Drop the record for `key` if present.
    pub fn remove(&mut self, key: &str) -> bool {
        let Some(expires_at) = self.index.remove(key) else {
            return false;
        };

        // Records sharing an expiry sit in one contiguous run.
        let start = self.records.partition_point(|r| r.expires_at < expires_at);
        let end = self.records.partition_point(|r| r.expires_at <= expires_at);
        if let Some(offset) = self.records[start..end].iter().position(|r| r.key == key) {
            self.records.remove(start + offset);
        }
        true
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Expiry timestamp for `key`, if tracked.
    pub fn expires_at(&self, key: &str) -> Option<u32> {
        self.index.get(key).copied()
    }

    /// Remaining TTL of `key` at `now`.
    pub fn ttl(&self, key: &str, now: u32) -> Result<Duration, Error> {
        match self.index.get(key) {
            Some(&expires_at) => remaining_ttl(key, expires_at, now),
            None => Err(Error::NotFound(key.to_string())),
        }
    }

    /// Pop every key with `expires_at < now`.
    pub fn compact(&mut self, now: u32) -> Vec<String> {
        self.compact_batch(now, usize::MAX)
    }

    /// Pop at most `limit` keys with `expires_at < now`, earliest first.
    pub fn compact_batch(&mut self, now: u32, limit: usize) -> Vec<String> {
        let cut = self.records.partition_point(|r| r.expires_at < now).min(limit);
        let expired: Vec<String> = self.records.drain(..cut).map(|r| r.key).collect();
        for key in &expired {
            self.index.remove(key);
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.index.clear();
    }

    #[cfg(test)]
    fn is_sorted(&self) -> bool {
        self.records.windows(2).all(|w| w[0].expires_at <= w[1].expires_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_keeps_order() {
        let mut idx = MemoryExpiry::new();
        idx.add("c", 300);
        idx.add("a", 100);
        idx.add("d", 400);
        idx.add("b", 200);
        idx.add("b2", 200);
        assert!(idx.is_sorted());
        assert_eq!(idx.len(), 5);
    }

    #[test]
    fn test_zero_expiry_is_not_tracked() {
        let mut idx = MemoryExpiry::new();
        idx.add("forever", 0);
        assert!(idx.is_empty());
        assert!(matches!(idx.ttl("forever", 10), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_re_add_replaces_record() {
        let mut idx = MemoryExpiry::new();
        idx.add("k", 100);
        idx.add("k", 500);
        assert_eq!(idx.len(), 1);
        assert_eq!(idx.expires_at("k"), Some(500));

        idx.add("k", 0);
        assert!(!idx.contains("k"));
        assert!(idx.is_empty());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut idx = MemoryExpiry::new();
        idx.add("a", 100);
        idx.add("b", 100);
        idx.add("c", 100);
        assert!(idx.remove("b"));
        assert!(!idx.remove("b"));
        assert_eq!(idx.len(), 2);
        assert!(idx.contains("a"));
        assert!(idx.contains("c"));
    }

    #[test]
    fn test_compact_returns_strictly_expired_prefix() {
        let mut idx = MemoryExpiry::new();
        for (key, exp) in [("a", 10), ("b", 20), ("c", 30), ("d", 30), ("e", 40)] {
            idx.add(key, exp);
        }

        let mut popped = idx.compact(30);
        popped.sort();
        assert_eq!(popped, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(idx.len(), 3);
        assert!(idx.is_sorted());
        assert!(!idx.contains("a"));

        assert!(idx.compact(30).is_empty());
        assert_eq!(idx.compact(41).len(), 3);
        assert!(idx.is_empty());
    }

    #[test]
    fn test_compact_batch_stops_at_limit() {
        let mut idx = MemoryExpiry::new();
        for (key, exp) in [("a", 10), ("b", 20), ("c", 30)] {
            idx.add(key, exp);
        }

        assert_eq!(idx.compact_batch(100, 2), vec!["a".to_string(), "b".to_string()]);
        assert!(idx.contains("c"));
        assert_eq!(idx.compact_batch(100, 2), vec!["c".to_string()]);
        assert!(idx.is_empty());
    }

    #[test]
    fn test_ttl_clamps_to_one_second() {
        let mut idx = MemoryExpiry::new();
        idx.add("k", 1_000);
        assert_eq!(idx.ttl("k", 900).unwrap(), Duration::from_secs(100));
        assert_eq!(idx.ttl("k", 1_000).unwrap(), Duration::from_secs(1));
        assert_eq!(idx.ttl("k", 2_000).unwrap(), Duration::from_secs(1));
    }
}
