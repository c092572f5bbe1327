//! Injectable time source.
//!
//! Every expiry and freshness decision goes through a [`Clock`]. Production
//! code uses [`SystemClock`]; tests drive a [`MockClock`] forward explicitly.

use std::fmt::Debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

/// Second-precision time source.
pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> DateTime<Utc>;

    /// Current time as u32 Unix seconds, saturating outside 1970..2106.
    fn unix_secs(&self) -> u32 {
        let secs = self.now().timestamp();
        u32::try_from(secs.max(0)).unwrap_or(u32::MAX)
    }
}

/// Shared clock handle.
pub type SharedClock = Arc<dyn Clock>;

/// Wall-clock UTC.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for deterministic tests.
#[derive(Debug)]
pub struct MockClock {
    secs: AtomicI64,
}

impl MockClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { secs: AtomicI64::new(start.timestamp()) }
    }

    pub fn at_unix(secs: i64) -> Self {
        Self { secs: AtomicI64::new(secs) }
    }

    pub fn advance(&self, by: Duration) {
        let by = i64::try_from(by.as_secs()).unwrap_or(i64::MAX);
        self.secs.fetch_add(by, Ordering::SeqCst);
    }

    pub fn set(&self, to: DateTime<Utc>) {
        self.secs.store(to.timestamp(), Ordering::SeqCst);
    }
}

impl Default for MockClock {
    fn default() -> Self {
        // 2020-01-01T00:00:00Z
        Self::at_unix(1_577_836_800)
    }
}

impl Clock for MockClock {
    fn now(&self) -> DateTime<Utc> {
        let secs = self.secs.load(Ordering::SeqCst);
        Utc.timestamp_opt(secs, 0).single().unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

/// Seconds between two u32 timestamps, saturating at zero.
pub fn secs_since(now: u32, then: u32) -> u64 {
    u64::from(now.saturating_sub(then))
}
