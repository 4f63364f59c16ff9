//! Eviction policies for [`super::BoundedCache`].
//!
//! The cache keeps entries in an ordered map and always evicts the entry at
//! the front. A policy decides which operations move an entry to the back.

use serde::{Deserialize, Serialize};

pub trait EvictionPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether a cache hit moves the entry to the back.
    fn touch_on_get(&self) -> bool;

    /// Whether overwriting an existing key moves it to the back.
    fn touch_on_overwrite(&self) -> bool;
}

/// Least recently used: reads and writes both refresh recency.
#[derive(Debug, Default, Clone, Copy)]
pub struct LruPolicy;

impl EvictionPolicy for LruPolicy {
    fn name(&self) -> &'static str {
        "lru"
    }

    fn touch_on_get(&self) -> bool {
        true
    }

    fn touch_on_overwrite(&self) -> bool {
        true
    }
}

/// First in, first out: entries leave in insertion order.
#[derive(Debug, Default, Clone, Copy)]
pub struct FifoPolicy;

impl EvictionPolicy for FifoPolicy {
    fn name(&self) -> &'static str {
        "fifo"
    }

    fn touch_on_get(&self) -> bool {
        false
    }

    fn touch_on_overwrite(&self) -> bool {
        false
    }
}

impl EvictionPolicy for Box<dyn EvictionPolicy> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn touch_on_get(&self) -> bool {
        (**self).touch_on_get()
    }

    fn touch_on_overwrite(&self) -> bool {
        (**self).touch_on_overwrite()
    }
}

/// Policy selector used by configuration.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionKind {
    #[default]
    Lru,
    Fifo,
}

impl EvictionKind {
    pub fn policy(self) -> Box<dyn EvictionPolicy> {
        match self {
            Self::Lru => Box::new(LruPolicy),
            Self::Fifo => Box::new(FifoPolicy),
        }
    }
}
