//! In-process dedup cache.
//!
//! [`DedupCache`] maps fingerprint-derived keys to the result of a previous
//! analysis. It is consulted before the matcher touches the store or any
//! extraction collaborator runs.
//!
//! # Single-flight
//!
//! [`DedupCache::get_or_try_compute`] guarantees that concurrent callers with
//! the same key run the computation at most once. The first caller registers
//! the key as in flight and computes; the others block until it finishes and
//! then read the cached value. If the computation fails, one of the waiters
//! takes over.
//!
//! The cache is process-local and bounded; it short-circuits repeat lookups
//! and never replaces persistent dedup.

mod bounded;
pub mod policy;

pub use bounded::BoundedCache;
pub use policy::{EvictionKind, EvictionPolicy, FifoPolicy, LruPolicy};

use ahash::AHashMap;
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::core::config::CacheConfig;
use crate::error::Result;
use crate::types::ExtractedContent;

/// Value remembered for a cache key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedAnalysis {
    pub item_id: String,
    pub content: ExtractedContent,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub len: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

struct CacheState {
    entries: BoundedCache<String, CachedAnalysis>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

#[derive(Default)]
struct InFlight {
    done: Mutex<bool>,
    cond: Condvar,
}

impl InFlight {
    fn wait(&self) {
        let mut done = self.done.lock();
        while !*done {
            self.cond.wait(&mut done);
        }
    }
}

/// Releases an in-flight key and wakes its waiters, also on error or panic.
struct FlightGuard<'a> {
    cache: &'a DedupCache,
    key: &'a str,
    flight: Arc<InFlight>,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.cache.in_flight.lock().remove(self.key);
        *self.flight.done.lock() = true;
        self.flight.cond.notify_all();
    }
}

enum Claim<'a> {
    Leader(FlightGuard<'a>),
    Waiter(Arc<InFlight>),
}

/// Thread-safe bounded cache with single-flight computation.
pub struct DedupCache {
    state: Mutex<CacheState>,
    in_flight: Mutex<AHashMap<String, Arc<InFlight>>>,
}

impl DedupCache {
    pub fn new(capacity: usize, eviction: EvictionKind) -> Self {
        Self {
            state: Mutex::new(CacheState {
                entries: BoundedCache::with_policy(capacity, eviction.policy()),
                hits: 0,
                misses: 0,
                evictions: 0,
            }),
            in_flight: Mutex::new(AHashMap::new()),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.capacity, config.eviction)
    }

    /// Look up `key`, refreshing its recency under LRU.
    pub fn get(&self, key: &str) -> Option<CachedAnalysis> {
        let mut state = self.state.lock();
        let found = state.entries.get(&key.to_string()).cloned();
        if found.is_some() {
            state.hits += 1;
            tracing::debug!(cache_key = key, "Cache hit");
        } else {
            state.misses += 1;
            tracing::debug!(cache_key = key, "Cache miss");
        }
        found
    }

    /// Insert or overwrite `key`.
    pub fn put(&self, key: &str, value: CachedAnalysis) {
        let mut state = self.state.lock();
        if let Some((evicted, _)) = state.entries.put(key.to_string(), value) {
            state.evictions += 1;
            tracing::debug!(cache_key = %evicted, "Cache eviction");
        }
    }

    pub fn invalidate(&self, key: &str) -> bool {
        self.state.lock().entries.remove(&key.to_string()).is_some()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.state.lock().entries.contains_key(&key.to_string())
    }

    /// Return the cached value for `key`, or run `compute` and cache its result.
    ///
    /// The flag is `true` when the value came from the cache. While one caller
    /// computes a key, other callers with that key wait instead of computing.
    /// An error from `compute` is returned to its caller and nothing is cached.
    pub fn get_or_try_compute<F>(&self, key: &str, compute: F) -> Result<(CachedAnalysis, bool)>
    where
        F: FnOnce() -> Result<CachedAnalysis>,
    {
        let guard = loop {
            if let Some(value) = self.get(key) {
                return Ok((value, true));
            }
            match self.claim(key) {
                Claim::Leader(guard) => break guard,
                Claim::Waiter(flight) => {
                    tracing::debug!(cache_key = key, "Waiting for in-flight computation");
                    flight.wait();
                }
            }
        };

        // The previous leader may have finished between our miss and our claim.
        if let Some(value) = self.peek(key) {
            drop(guard);
            return Ok((value, true));
        }

        let value = compute()?;
        self.put(key, value.clone());
        drop(guard);
        Ok((value, false))
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            len: state.entries.len(),
            capacity: state.entries.capacity(),
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.state.lock().entries.clear();
    }

    fn peek(&self, key: &str) -> Option<CachedAnalysis> {
        self.state.lock().entries.peek(&key.to_string()).cloned()
    }

    fn claim<'a>(&'a self, key: &'a str) -> Claim<'a> {
        let mut in_flight = self.in_flight.lock();
        if let Some(flight) = in_flight.get(key) {
            return Claim::Waiter(Arc::clone(flight));
        }
        let flight = Arc::new(InFlight::default());
        in_flight.insert(key.to_string(), Arc::clone(&flight));
        Claim::Leader(FlightGuard {
            cache: self,
            key,
            flight,
        })
    }
}

impl std::fmt::Debug for DedupCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DedupCache").field("stats", &self.stats()).finish()
    }
}
