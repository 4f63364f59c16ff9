use ahash::RandomState;
use indexmap::IndexMap;
use std::hash::Hash;

use super::policy::{EvictionPolicy, LruPolicy};

/// Fixed-capacity map that evicts on overflow.
///
/// Entries are ordered from least to most recently touched (as defined by the
/// policy); the front entry is evicted when a new key arrives at capacity.
/// Not synchronized; wrap it in a lock to share it.
pub struct BoundedCache<K, V, P = Box<dyn EvictionPolicy>> {
    entries: IndexMap<K, V, RandomState>,
    capacity: usize,
    policy: P,
}

impl<K: Hash + Eq, V> BoundedCache<K, V, LruPolicy> {
    pub fn lru(capacity: usize) -> Self {
        Self::with_policy(capacity, LruPolicy)
    }
}

impl<K: Hash + Eq, V, P: EvictionPolicy> BoundedCache<K, V, P> {
    /// Create a cache; a capacity of zero is raised to one.
    pub fn with_policy(capacity: usize, policy: P) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: IndexMap::with_capacity_and_hasher(capacity, RandomState::new()),
            capacity,
            policy,
        }
    }

    pub fn get(&mut self, key: &K) -> Option<&V> {
        let index = self.entries.get_index_of(key)?;
        let refresh = self.policy.touch_on_get();
        let index = self.touch(index, refresh);
        self.entries.get_index(index).map(|(_, v)| v)
    }

    /// Look up without affecting recency.
    pub fn peek(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    /// Insert or overwrite `key`. Returns the evicted entry, if any.
    pub fn put(&mut self, key: K, value: V) -> Option<(K, V)> {
        if let Some(index) = self.entries.get_index_of(&key) {
            let refresh = self.policy.touch_on_overwrite();
            let index = self.touch(index, refresh);
            if let Some((_, slot)) = self.entries.get_index_mut(index) {
                *slot = value;
            }
            return None;
        }

        let evicted = if self.entries.len() >= self.capacity {
            self.entries.shift_remove_index(0)
        } else {
            None
        };
        self.entries.insert(key, value);
        evicted
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.entries.shift_remove(key)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Keys from next-to-evict to most recent.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn touch(&mut self, index: usize, refresh: bool) -> usize {
        let last = self.entries.len() - 1;
        if refresh && index != last {
            self.entries.move_index(index, last);
            last
        } else {
            index
        }
    }
}
