//! Composite cache over an ordered list of tiers.
//!
//! Reads try each tier in order; a hit in a later tier is copied back into
//! the earlier ones in the background. Writes go to every tier. Tier failures
//! are collected into [`Error::Tiered`] but never hide a value that some tier
//! returned.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use super::Cache;
use crate::Error;

/// Values with less TTL than this are not copied into faster tiers.
pub const BACKFILL_TTL_FLOOR: Duration = Duration::from_secs(60);

pub struct TieredCache {
    name: String,
    tiers: Vec<Arc<dyn Cache>>,
    backfill_floor: Duration,
}

impl std::fmt::Debug for TieredCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tiers: Vec<&str> = self.tiers.iter().map(|t| t.name()).collect();
        f.debug_struct("TieredCache").field("name", &self.name).field("tiers", &tiers).finish()
    }
}

impl TieredCache {
    pub fn new(name: impl Into<String>, tiers: Vec<Arc<dyn Cache>>) -> Self {
        Self { name: name.into(), tiers, backfill_floor: BACKFILL_TTL_FLOOR }
    }

    pub fn with_backfill_floor(mut self, floor: Duration) -> Self {
        self.backfill_floor = floor;
        self
    }

    pub fn tiers(&self) -> &[Arc<dyn Cache>] {
        &self.tiers
    }

    /// Copy a value found in tier `found` into every earlier tier.
    async fn backfill(&self, found: usize, key: &str, value: &Bytes) {
        let ttl = match self.tiers[found].ttl(key).await {
            Ok(ttl) => ttl,
            Err(Error::NoExpiry(_)) => return,
            Err(e) => {
                tracing::debug!(cache = %self.name, key, error = %e, "skipping backfill");
                return;
            }
        };
        if ttl < self.backfill_floor {
            return;
        }

        let targets: Vec<Arc<dyn Cache>> = self.tiers[..found].to_vec();
        let key = key.to_string();
        let value = value.clone();
        let name = self.name.clone();
        tokio::spawn(async move {
            for tier in targets {
                if let Err(e) = tier.insert_ttl(&key, value.clone(), ttl).await {
                    tracing::warn!(cache = %name, tier = tier.name(), key = %key, error = %e, "backfill failed");
                }
            }
        });
    }

    fn collect<T>(&self, results: Vec<Result<T, Error>>) -> Result<(), Error> {
        let errors: Vec<String> = results
            .into_iter()
            .zip(&self.tiers)
            .filter_map(|(r, tier)| r.err().map(|e| format!("{}: {e}", tier.name())))
            .collect();
        if errors.is_empty() { Ok(()) } else { Err(Error::Tiered(errors)) }
    }

    /// Largest count among the tiers that answered. Failing tiers are logged
    /// and skipped, the same way [`Cache::retrieve`] treats them.
    fn max_of(&self, what: &str, results: Vec<Result<u64, Error>>) -> Result<u64, Error> {
        let mut max = None;
        let mut errors = Vec::new();
        for (result, tier) in results.into_iter().zip(&self.tiers) {
            match result {
                Ok(n) => max = Some(max.map_or(n, |m: u64| m.max(n))),
                Err(e) => errors.push(format!("{}: {e}", tier.name())),
            }
        }
        match max {
            Some(n) => {
                if !errors.is_empty() {
                    tracing::warn!(cache = %self.name, what, errors = ?errors, "tiers skipped");
                }
                Ok(n)
            }
            None if errors.is_empty() => Ok(0),
            None => Err(Error::Tiered(errors)),
        }
    }
}

#[async_trait]
impl Cache for TieredCache {
    fn name(&self) -> &str {
        &self.name
    }

    async fn insert_ttl(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), Error> {
        let mut results = Vec::with_capacity(self.tiers.len());
        for tier in &self.tiers {
            results.push(tier.insert_ttl(key, value.clone(), ttl).await);
        }
        self.collect(results)
    }

    async fn retrieve(&self, key: &str) -> Result<Bytes, Error> {
        let mut errors = Vec::new();
        for (i, tier) in self.tiers.iter().enumerate() {
            match tier.retrieve(key).await {
                Ok(value) => {
                    if !errors.is_empty() {
                        tracing::warn!(cache = %self.name, key, errors = ?errors, "tier errors before hit");
                    }
                    if i > 0 {
                        self.backfill(i, key, &value).await;
                    }
                    return Ok(value);
                }
                Err(Error::NotFound(_)) => {}
                Err(e) => errors.push(format!("{}: {e}", tier.name())),
            }
        }
        if errors.is_empty() { Err(Error::NotFound(key.to_string())) } else { Err(Error::Tiered(errors)) }
    }

    async fn ttl(&self, key: &str) -> Result<Duration, Error> {
        for tier in &self.tiers {
            match tier.ttl(key).await {
                Err(Error::NotFound(_)) => continue,
                other => return other,
            }
        }
        Err(Error::NotFound(key.to_string()))
    }

    async fn remove(&self, key: &str) -> Result<(), Error> {
        let mut results = Vec::with_capacity(self.tiers.len());
        for tier in &self.tiers {
            results.push(tier.remove(key).await);
        }
        self.collect(results)
    }

    async fn flush(&self) -> Result<(), Error> {
        let mut results = Vec::with_capacity(self.tiers.len());
        for tier in &self.tiers {
            results.push(tier.flush().await);
        }
        self.collect(results)
    }

    async fn len(&self) -> Result<u64, Error> {
        let mut results = Vec::with_capacity(self.tiers.len());
        for tier in &self.tiers {
            results.push(tier.len().await);
        }
        self.max_of("len", results)
    }

    async fn size(&self) -> Result<u64, Error> {
        let mut results = Vec::with_capacity(self.tiers.len());
        for tier in &self.tiers {
            results.push(tier.size().await);
        }
        self.max_of("size", results)
    }

    fn start(&self) {
        for tier in &self.tiers {
            tier.start();
        }
    }

    async fn stop(&self) {
        for tier in &self.tiers {
            tier.stop().await;
        }
    }

    async fn close(&self) -> Result<(), Error> {
        let mut results = Vec::with_capacity(self.tiers.len());
        for tier in &self.tiers {
            results.push(tier.close().await);
        }
        self.collect(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{LruCache, SqliteCache};
    use crate::clock::{MockClock, SharedClock};
    use std::num::NonZeroUsize;

    async fn tiered() -> (TieredCache, Arc<LruCache>, Arc<SqliteCache>) {
        let clock: SharedClock = Arc::new(MockClock::default());
        let front = LruCache::new("front", NonZeroUsize::new(2).unwrap(), clock.clone());
        let back = SqliteCache::open_in_memory("back", clock).await.unwrap();
        let tiered = TieredCache::new("tiered", vec![front.clone() as Arc<dyn Cache>, back.clone()]);
        (tiered, front, back)
    }

    async fn wait_for(cache: &LruCache, key: &str) -> bool {
        for _ in 0..50 {
            if cache.retrieve(key).await.is_ok() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_insert_writes_all_tiers() {
        let (tiered, front, back) = tiered().await;
        tiered.insert_ttl("k", Bytes::from_static(b"v"), Duration::from_secs(600)).await.unwrap();
        assert!(front.retrieve("k").await.is_ok());
        assert!(back.retrieve("k").await.is_ok());
        assert_eq!(tiered.ttl("k").await.unwrap(), Duration::from_secs(600));
    }

    #[tokio::test]
    async fn test_hit_in_back_tier_backfills_front() {
        let (tiered, front, back) = tiered().await;
        back.insert_ttl("k", Bytes::from_static(b"v"), Duration::from_secs(600)).await.unwrap();

        assert_eq!(tiered.retrieve("k").await.unwrap(), Bytes::from_static(b"v"));
        assert!(wait_for(&front, "k").await);
        assert_eq!(front.ttl("k").await.unwrap(), Duration::from_secs(600));
    }

    #[tokio::test]
    async fn test_short_ttl_and_permanent_are_not_backfilled() {
        let (tiered, front, back) = tiered().await;
        back.insert_ttl("short", Bytes::from_static(b"v"), Duration::from_secs(30)).await.unwrap();
        back.insert("perm", Bytes::from_static(b"v")).await.unwrap();

        assert!(tiered.retrieve("short").await.is_ok());
        assert!(tiered.retrieve("perm").await.is_ok());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(front.retrieve("short").await.is_err());
        assert!(front.retrieve("perm").await.is_err());
    }

    #[tokio::test]
    async fn test_len_is_max_across_tiers() {
        let (tiered, front, back) = tiered().await;
        for key in ["a", "b", "c"] {
            tiered.insert(key, Bytes::from_static(b"v")).await.unwrap();
        }
        assert_eq!(front.len().await.unwrap(), 2);
        assert_eq!(back.len().await.unwrap(), 3);
        assert_eq!(tiered.len().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_failed_tier_still_returns_value() {
        let (tiered, front, back) = tiered().await;
        tiered.insert_ttl("k", Bytes::from_static(b"v"), Duration::from_secs(600)).await.unwrap();
        back.close().await.unwrap();

        assert_eq!(tiered.retrieve("k").await.unwrap(), Bytes::from_static(b"v"));
        front.remove("k").await.unwrap();
        assert!(matches!(tiered.retrieve("k").await, Err(Error::Tiered(errs)) if errs.len() == 1));
        assert!(matches!(tiered.remove("k").await, Err(Error::Tiered(_))));
    }

    #[tokio::test]
    async fn test_len_and_size_skip_failed_tier() {
        let (tiered, front, back) = tiered().await;
        tiered.insert("a", Bytes::from_static(b"value")).await.unwrap();
        back.close().await.unwrap();
        assert!(back.len().await.is_err());

        assert_eq!(tiered.len().await.unwrap(), 1);
        assert_eq!(tiered.size().await.unwrap(), front.size().await.unwrap());

        let only_back = TieredCache::new("only-back", vec![back as Arc<dyn Cache>]);
        assert!(matches!(only_back.len().await, Err(Error::Tiered(errs)) if errs.len() == 1));
        assert!(matches!(only_back.size().await, Err(Error::Tiered(_))));
    }
}
