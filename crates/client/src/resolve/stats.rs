//! Resolver counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub(crate) struct Stats {
    pub api_calls: AtomicU64,
    pub session_calls: AtomicU64,
    pub texture_calls: AtomicU64,
    pub cache_errors: AtomicU64,
    pub stale_serves: AtomicU64,
    pub fallbacks: AtomicU64,
    pub char_hits: AtomicU64,
}

impl Stats {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            api_calls: self.api_calls.load(Ordering::Relaxed),
            session_calls: self.session_calls.load(Ordering::Relaxed),
            texture_calls: self.texture_calls.load(Ordering::Relaxed),
            cache_errors: self.cache_errors.load(Ordering::Relaxed),
            stale_serves: self.stale_serves.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            char_hits: self.char_hits.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the resolver counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// `getAPIProfile` calls issued upstream.
    pub api_calls: u64,
    /// `getSessionProfile` calls issued upstream.
    pub session_calls: u64,
    pub texture_calls: u64,
    /// Cache reads or writes that failed or returned undecodable data.
    pub cache_errors: u64,
    /// Requests answered from a stale record after an upstream failure.
    pub stale_serves: u64,
    /// Requests answered with the default skin after an error.
    pub fallbacks: u64,
    pub char_hits: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot() {
        let stats = Stats::default();
        Stats::bump(&stats.api_calls);
        Stats::bump(&stats.api_calls);
        Stats::bump(&stats.fallbacks);

        let snap = stats.snapshot();
        assert_eq!(snap.api_calls, 2);
        assert_eq!(snap.fallbacks, 1);
        assert_eq!(snap.session_calls, 0);
    }
}
