//! Request coalescing for concurrent lookups.
//!
//! [`CoalesceGroup`] combines concurrent calls with the same key into one
//! execution. The first caller's future is spawned onto the runtime and every
//! caller, the first included, waits for its result. Dropping a waiting
//! caller (deadline, disconnect) therefore never cancels the shared call;
//! the remaining waiters still get the result.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use parking_lot::Mutex;
use tokio::sync::{Notify, OnceCell};

use crate::Error;

/// Shared state for one in-flight call.
struct Waiter<T> {
    /// Holds the result once the call completes; `None` if it panicked.
    result: OnceCell<Option<T>>,
    /// Wakes waiting callers when the result is ready.
    notify: Notify,
}

type InFlight<T> = Arc<Mutex<HashMap<String, Arc<Waiter<T>>>>>;

/// Keyed "run once, broadcast to all waiters" group.
pub struct CoalesceGroup<T> {
    name: &'static str,
    in_flight: InFlight<T>,
}

impl<T> std::fmt::Debug for CoalesceGroup<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoalesceGroup").field("name", &self.name).field("in_flight", &self.in_flight.lock().len()).finish()
    }
}

impl<T> CoalesceGroup<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(name: &'static str) -> Self {
        Self { name, in_flight: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Number of keys with a call in progress.
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Run `f` for `key` unless a call for `key` is already running, in which
    /// case wait for that call and return a clone of its result.
    ///
    /// # Errors
    ///
    /// [`Error::Cancelled`] if the shared call panicked.
    pub async fn call<F, Fut>(&self, key: &str, f: F) -> Result<T, Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let waiter = {
            let mut map = self.in_flight.lock();
            match map.get(key) {
                Some(waiter) => Arc::clone(waiter),
                None => {
                    let waiter = Arc::new(Waiter { result: OnceCell::new(), notify: Notify::new() });
                    map.insert(key.to_string(), Arc::clone(&waiter));
                    self.spawn_leader(key.to_string(), Arc::clone(&waiter), f());
                    waiter
                }
            }
        };

        loop {
            // Register before checking so a completion in between is not missed.
            let notified = waiter.notify.notified();
            if let Some(result) = waiter.result.get() {
                return result
                    .clone()
                    .ok_or_else(|| Error::Cancelled(format!("{}: shared call for {key} panicked", self.name)));
            }
            notified.await;
        }
    }

    fn spawn_leader<Fut>(&self, key: String, waiter: Arc<Waiter<T>>, fut: Fut)
    where
        Fut: Future<Output = T> + Send + 'static,
    {
        let in_flight = Arc::clone(&self.in_flight);
        let name = self.name;
        tokio::spawn(async move {
            let result = AssertUnwindSafe(fut).catch_unwind().await.ok();
            if result.is_none() {
                tracing::error!(group = name, key = %key, "coalesced call panicked");
            }
            let _ = waiter.result.set(result);
            in_flight.lock().remove(&key);
            waiter.notify.notify_waiters();
        });
    }
}
