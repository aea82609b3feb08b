//! TTL-bounded value cache
//!
//! Holds a single value with the instant it was fetched. Readers get a clone
//! while it is fresh; `invalidate` drops it. Loading happens outside the lock,
//! so concurrent refreshes may both fetch, and the last store wins.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

struct Entry<T> {
    value: T,
    fetched_at: Instant,
}

/// A cached value with explicit expiry
pub struct Cached<T> {
    entry: Mutex<Option<Entry<T>>>,
    ttl: Duration,
}

impl<T: Clone> Cached<T> {
    /// Create an empty cache with the given time-to-live
    pub fn new(ttl: Duration) -> Self {
        Self {
            entry: Mutex::new(None),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fresh value, if any
    pub fn get(&self) -> Option<T> {
        let entry = self.entry.lock();
        match entry.as_ref() {
            Some(e) if e.fetched_at.elapsed() < self.ttl => Some(e.value.clone()),
            _ => None,
        }
    }

    /// Store a newly fetched value
    pub fn store(&self, value: T) {
        *self.entry.lock() = Some(Entry {
            value,
            fetched_at: Instant::now(),
        });
    }

    /// Drop the cached value. Idempotent.
    pub fn invalidate(&self) {
        self.entry.lock().take();
    }

    /// Fresh value, or load one with `loader` and store it
    pub async fn get_or_load<F, Fut, E>(&self, loader: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        if let Some(value) = self.get() {
            return Ok(value);
        }
        let value = loader().await?;
        self.store(value.clone());
        Ok(value)
    }
}

impl<T> std::fmt::Debug for Cached<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cached")
            .field("ttl", &self.ttl)
            .field("populated", &self.entry.lock().is_some())
            .finish()
    }
}
