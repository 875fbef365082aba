//! Single-value cache refreshed after a time-to-live.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Caches one value and recomputes it once it is older than a TTL.
///
/// The age is measured from the last recomputation; reads do not extend it.
#[derive(Debug)]
pub struct TtlCache<T> {
    slot: Mutex<Option<Cached<T>>>,
}

#[derive(Debug)]
struct Cached<T> {
    value: T,
    computed_at: Instant,
}

impl<T: Clone> TtlCache<T> {
    /// Create an empty cache. The first `result` call always recomputes.
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    /// Return the cached value, recomputing it if more than `ttl` has
    /// elapsed since the last recomputation.
    ///
    /// `recompute` runs with the cache locked, so concurrent callers never
    /// recompute the same stale value twice.
    pub fn result<F>(&self, ttl: Duration, recompute: F) -> T
    where
        F: FnOnce() -> T,
    {
        let mut slot = self.slot.lock();
        let now = Instant::now();

        match slot.as_ref() {
            Some(cached) if now.duration_since(cached.computed_at) <= ttl => cached.value.clone(),
            _ => {
                let value = recompute();
                *slot = Some(Cached {
                    value: value.clone(),
                    computed_at: now,
                });
                value
            }
        }
    }

    /// Drop the cached value so the next call recomputes.
    pub fn invalidate(&self) {
        *self.slot.lock() = None;
    }
}

impl<T: Clone> Default for TtlCache<T> {
    fn default() -> Self {
        Self::new()
    }
}
