//! Per-device command cache with single-flight collection.
//!
//! Each cache slot is a shared once-cell: the first caller for a key runs the
//! collection, concurrent callers for the same key await that in-flight call
//! and observe its stored outcome. No lock is held across the remote call.
//! Failures are cached like successes, so a command that timed out is not
//! retried by every check that needs it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::OnceCell;

use crate::command::CommandOutcome;

/// Hit/total counters for one device's cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStatistics {
    /// Lookups served without contacting the device.
    pub hits: u64,
    /// Total lookups that went through the cache.
    pub total: u64,
}

impl CacheStatistics {
    pub fn hit_ratio(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.hits as f64 / self.total as f64
        }
    }
}

impl std::fmt::Display for CacheStatistics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} hits / {} command(s) ({:.2}%)", self.hits, self.total, self.hit_ratio() * 100.0)
    }
}

type Slot = Arc<OnceCell<CommandOutcome>>;

/// A per-device store of collection outcomes keyed by command uid.
///
/// Cleared only by [`reset`](CommandCache::reset); the cache otherwise lives
/// as long as the device.
#[derive(Debug, Default)]
pub struct CommandCache {
    slots: Mutex<HashMap<String, Slot>>,
    hits: AtomicU64,
    total: AtomicU64,
}

impl CommandCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the stored outcome for `key`, collecting it once if absent.
    ///
    /// Exactly one caller per key runs `collect`; every other caller,
    /// concurrent or later, receives a clone of the stored outcome.
    pub async fn get_or_collect<F, Fut>(&self, key: &str, collect: F) -> CommandOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CommandOutcome>,
    {
        self.total.fetch_add(1, Ordering::Relaxed);

        let slot: Slot = {
            let mut slots = self.slots.lock().expect("cache mutex poisoned");
            Arc::clone(slots.entry(key.to_string()).or_default())
        };

        let mut collected_here = false;
        let outcome = slot
            .get_or_init(|| {
                collected_here = true;
                collect()
            })
            .await
            .clone();
        if !collected_here {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
        outcome
    }

    /// Whether an outcome is already stored for `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.slots
            .lock()
            .expect("cache mutex poisoned")
            .get(key)
            .is_some_and(|slot| slot.initialized())
    }

    /// Drops every stored outcome. Statistics are kept.
    pub fn reset(&self) {
        self.slots.lock().expect("cache mutex poisoned").clear();
    }

    pub fn statistics(&self) -> CacheStatistics {
        CacheStatistics {
            hits: self.hits.load(Ordering::Relaxed),
            total: self.total.load(Ordering::Relaxed),
        }
    }
}
