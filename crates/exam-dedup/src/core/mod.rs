//! Engine configuration and the single-input pipeline.

pub mod config;
pub mod engine;

pub use config::{BatchConfig, CacheConfig, DedupConfig, JobConfig, MatchingConfig};
pub use engine::DedupEngine;
