//! Expiry tracking and the background compactor.
//!
//! Two index flavours exist:
//!
//! - [`memory::MemoryExpiry`] keeps (key, expiry) records sorted in memory for
//!   backends that have no notion of TTL (the bounded LRU).
//! - [`store`] encodes the expiry into the stored value for persistent
//!   backends, which are scanned on a long interval instead.
//!
//! Expiries are u32 Unix seconds; 0 means "never expires".

pub mod memory;
pub mod store;

use std::panic::AssertUnwindSafe;
use std::sync::Weak;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::FutureExt;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::Error;

pub use memory::MemoryExpiry;

/// A tracked key and the second at which it expires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiryRecord {
    pub key: String,
    pub expires_at: u32,
}

impl PartialOrd for ExpiryRecord {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ExpiryRecord {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.expires_at.cmp(&other.expires_at).then_with(|| self.key.cmp(&other.key))
    }
}

/// Expiry timestamp for a value inserted at `now` with `ttl`.
///
/// A zero TTL yields 0 (no expiry). Sub-second TTLs round up to one second.
pub fn expiry_from_ttl(now: u32, ttl: Duration) -> u32 {
    if ttl.is_zero() {
        return 0;
    }
    let secs = ttl.as_secs().max(1);
    let secs = u32::try_from(secs).unwrap_or(u32::MAX);
    now.saturating_add(secs)
}

/// Remaining TTL of a record, clamped to at least one second.
pub fn remaining_ttl(key: &str, expires_at: u32, now: u32) -> Result<Duration, Error> {
    if expires_at == 0 {
        return Err(Error::NoExpiry(key.to_string()));
    }
    let left = u64::from(expires_at.saturating_sub(now)).max(1);
    Ok(Duration::from_secs(left))
}

/// One compaction pass over a cache.
#[async_trait]
pub trait Compact: Send + Sync + 'static {
    fn cache_name(&self) -> &str;

    /// Remove every expired key, returning how many were dropped.
    async fn compact(&self) -> Result<usize, Error>;
}

struct Running {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// Owns the background compaction task of one cache.
///
/// The task runs a pass immediately, then once per interval. Passes never
/// overlap and the stop signal is only observed between passes.
#[derive(Default)]
pub struct Compactor {
    running: Mutex<Option<Running>>,
}

impl std::fmt::Debug for Compactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compactor").field("running", &self.is_running()).finish()
    }
}

impl Compactor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Spawn the task. Calling `start` on a running compactor is a no-op.
    ///
    /// The task holds only a weak handle, so a dropped cache ends it.
    pub fn start<C: Compact>(&self, target: Weak<C>, interval: Duration) {
        let mut running = self.running.lock();
        if running.is_some() {
            return;
        }

        let (stop, mut stopped) = oneshot::channel();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(10)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = &mut stopped => break,
                    _ = ticker.tick() => {
                        let Some(target) = target.upgrade() else { break };
                        run_pass(target.as_ref()).await;
                    }
                }
            }
        });

        *running = Some(Running { stop, handle });
    }

    /// Signal the task and wait for the in-progress pass to finish.
    pub async fn stop(&self) {
        let Some(Running { stop, handle }) = self.running.lock().take() else {
            return;
        };
        let _ = stop.send(());
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "compactor task ended abnormally");
        }
    }
}

async fn run_pass<C: Compact>(target: &C) {
    match AssertUnwindSafe(target.compact()).catch_unwind().await {
        Ok(Ok(0)) => {}
        Ok(Ok(removed)) => tracing::debug!(cache = target.cache_name(), removed, "compacted expired keys"),
        Ok(Err(e)) => tracing::error!(cache = target.cache_name(), error = %e, "compaction pass failed"),
        Err(_) => tracing::error!(cache = target.cache_name(), "compaction pass panicked"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_expiry_from_ttl() {
        assert_eq!(expiry_from_ttl(1_000, Duration::ZERO), 0);
        assert_eq!(expiry_from_ttl(1_000, Duration::from_millis(200)), 1_001);
        assert_eq!(expiry_from_ttl(1_000, Duration::from_secs(60)), 1_060);
        assert_eq!(expiry_from_ttl(u32::MAX - 1, Duration::from_secs(60)), u32::MAX);
    }

    #[test]
    fn test_remaining_ttl() {
        assert!(matches!(remaining_ttl("k", 0, 10), Err(Error::NoExpiry(_))));
        assert_eq!(remaining_ttl("k", 70, 10).unwrap(), Duration::from_secs(60));
        assert_eq!(remaining_ttl("k", 5, 10).unwrap(), Duration::from_secs(1));
    }

    #[test]
    fn test_record_ordering() {
        let mut records = vec![
            ExpiryRecord { key: "b".into(), expires_at: 20 },
            ExpiryRecord { key: "a".into(), expires_at: 30 },
            ExpiryRecord { key: "c".into(), expires_at: 10 },
        ];
        records.sort();
        let keys: Vec<_> = records.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, ["c", "b", "a"]);
    }

    struct Counting {
        passes: AtomicUsize,
        panic_on: usize,
    }

    #[async_trait]
    impl Compact for Counting {
        fn cache_name(&self) -> &str {
            "counting"
        }

        async fn compact(&self) -> Result<usize, Error> {
            let pass = self.passes.fetch_add(1, Ordering::SeqCst) + 1;
            if pass == self.panic_on {
                panic!("boom");
            }
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_compactor_runs_immediately_and_stops() {
        let target = Arc::new(Counting { passes: AtomicUsize::new(0), panic_on: 0 });
        let compactor = Compactor::new();
        compactor.start(Arc::downgrade(&target), Duration::from_secs(3600));
        compactor.start(Arc::downgrade(&target), Duration::from_secs(3600));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(target.passes.load(Ordering::SeqCst), 1);

        compactor.stop().await;
        assert!(!compactor.is_running());
        compactor.stop().await;
    }

    #[tokio::test]
    async fn test_compactor_survives_panicking_pass() {
        let target = Arc::new(Counting { passes: AtomicUsize::new(0), panic_on: 1 });
        let compactor = Compactor::new();
        compactor.start(Arc::downgrade(&target), Duration::from_millis(20));

        tokio::time::sleep(Duration::from_millis(150)).await;
        compactor.stop().await;
        assert!(target.passes.load(Ordering::SeqCst) >= 2);
    }
}
