//! Cache construction from configuration.

use std::num::NonZeroUsize;
use std::sync::Arc;

use super::{Cache, LruCache, SqliteCache, TieredCache};
use crate::Error;
use crate::clock::SharedClock;
use crate::config::{CacheBackend, CacheConfig};
use crate::storage::SqliteStore;

/// Build the cache described by `config`. The cache is not started.
pub async fn build_cache(config: &CacheConfig, clock: SharedClock) -> Result<Arc<dyn Cache>, Error> {
    let cache: Arc<dyn Cache> = match config.backend {
        CacheBackend::Lru => lru(config, &config.name, clock)?,
        CacheBackend::Sqlite => sqlite(config, &config.name, clock).await?,
        CacheBackend::Tiered => {
            let front = lru(config, &format!("{}-lru", config.name), clock.clone())?;
            let back = sqlite(config, &format!("{}-sqlite", config.name), clock).await?;
            Arc::new(TieredCache::new(config.name.clone(), vec![front, back]))
        }
    };
    tracing::debug!(cache = %config.name, backend = ?config.backend, "built cache");
    Ok(cache)
}

fn lru(config: &CacheConfig, name: &str, clock: SharedClock) -> Result<Arc<dyn Cache>, Error> {
    let capacity = NonZeroUsize::new(config.lru_size)
        .ok_or_else(|| Error::InvalidInput(format!("{name}: lru_size must be greater than 0")))?;
    let cache: Arc<dyn Cache> = LruCache::with_interval(name, capacity, clock, config.lru_interval());
    Ok(cache)
}

async fn sqlite(config: &CacheConfig, name: &str, clock: SharedClock) -> Result<Arc<dyn Cache>, Error> {
    let store = SqliteStore::open(&config.path).await?;
    let cache: Arc<dyn Cache> = SqliteCache::from_store(name, store, clock, config.sqlite_interval());
    Ok(cache)
}
