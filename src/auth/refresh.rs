//! Per-principal serialization of token refreshes.

use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Keyed async lock: at most one refresh per principal runs at a time.
///
/// Callers queued behind a running refresh re-read the stored record once
/// they get the lock, so only the first one talks to the token endpoint.
/// Entries are dropped as soon as nobody holds or waits on them.
#[derive(Default)]
pub struct RefreshGuard {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl RefreshGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` while holding the lock for `key`.
    pub async fn run<F, Fut, T>(&self, key: &str, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let lock = self.locks.entry(key.to_string()).or_default().clone();

        let result = {
            let _held = lock.lock().await;
            f().await
        };

        drop(lock);
        self.locks
            .remove_if(key, |_, lock| Arc::strong_count(lock) == 1);

        result
    }

    /// Number of principals with a refresh in flight or queued.
    pub fn in_flight(&self) -> usize {
        self.locks.len()
    }
}
