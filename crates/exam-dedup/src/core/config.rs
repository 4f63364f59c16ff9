//! Configuration loading and management.
//!
//! [`DedupConfig`] can be loaded from TOML, YAML or JSON, discovered by
//! walking up from the current directory, or built in code. Every field has a
//! default, so a config file only needs the values it changes.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::cache::EvictionKind;
use crate::{DedupError, Result};

/// File name searched for by [`DedupConfig::discover`].
pub const CONFIG_FILE_NAME: &str = "exam-dedup.toml";

/// Top-level configuration.
///
/// # Example
///
/// ```rust
/// use exam_dedup::core::config::DedupConfig;
///
/// let config = DedupConfig::default();
/// assert_eq!(config.matching.phash_threshold, 5);
///
/// // let config = DedupConfig::from_toml_file("exam-dedup.toml")?;
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DedupConfig {
    #[serde(default)]
    pub matching: MatchingConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub batch: BatchConfig,

    #[serde(default)]
    pub jobs: JobConfig,
}

/// Similarity thresholds for the matcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchingConfig {
    /// Maximum Hamming distance, in bits, for a perceptual match.
    #[serde(default = "default_phash_threshold")]
    pub phash_threshold: u32,

    /// Minimum cosine similarity for an embedding match.
    #[serde(default = "default_similarity_threshold")]
    pub embedding_threshold: f64,

    /// Minimum normalized-text ratio for a text match.
    #[serde(default = "default_similarity_threshold")]
    pub text_threshold: f64,

    /// How many of the most recent stored items the text fallback scans.
    ///
    /// Older items are never text-matched.
    #[serde(default = "default_text_scan_window")]
    pub text_scan_window: usize,

    /// Normalized texts shorter than this never text-match.
    ///
    /// Counted after normalization, so whitespace and punctuation are excluded.
    #[serde(default = "default_min_text_chars")]
    pub min_text_chars: usize,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            phash_threshold: default_phash_threshold(),
            embedding_threshold: default_similarity_threshold(),
            text_threshold: default_similarity_threshold(),
            text_scan_window: default_text_scan_window(),
            min_text_chars: default_min_text_chars(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,

    #[serde(default)]
    pub eviction: EvictionKind,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
            eviction: EvictionKind::default(),
        }
    }
}

/// Batch orchestrator limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Larger batches are rejected before any work starts.
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    #[serde(default = "default_min_workers")]
    pub min_workers: usize,

    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Worker count when the caller does not ask for one (None = CPU count x 2).
    #[serde(default)]
    pub default_workers: Option<usize>,

    /// Text ratio above which two items of one batch are duplicates.
    #[serde(default = "default_similarity_threshold")]
    pub duplicate_threshold: f64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
            min_workers: default_min_workers(),
            max_workers: default_max_workers(),
            default_workers: None,
            duplicate_threshold: default_similarity_threshold(),
        }
    }
}

impl BatchConfig {
    /// Worker-pool width for a request, clamped to `[min_workers, max_workers]`.
    pub fn effective_workers(&self, requested: Option<usize>) -> usize {
        requested
            .or(self.default_workers)
            .unwrap_or_else(|| num_cpus::get() * 2)
            .max(self.min_workers)
            .min(self.max_workers)
            .max(1)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    /// Jobs older than this are removed by a sweep.
    #[serde(default = "default_job_ttl_secs")]
    pub ttl_secs: u64,

    /// Minimum time between two sweeps triggered through `maybe_sweep`.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_job_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl JobConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

fn default_phash_threshold() -> u32 {
    5
}

fn default_similarity_threshold() -> f64 {
    0.85
}

fn default_text_scan_window() -> usize {
    1000
}

fn default_min_text_chars() -> usize {
    10
}

fn default_cache_capacity() -> usize {
    100
}

fn default_max_batch_size() -> usize {
    100
}

fn default_min_workers() -> usize {
    3
}

fn default_max_workers() -> usize {
    20
}

fn default_job_ttl_secs() -> u64 {
    7200
}

fn default_sweep_interval_secs() -> u64 {
    3600
}

impl DedupConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            DedupError::validation(format!("Failed to read config file {}: {}", path.as_ref().display(), e))
        })?;

        toml::from_str(&content)
            .map_err(|e| DedupError::validation(format!("Invalid TOML in {}: {}", path.as_ref().display(), e)))
    }

    /// Load configuration from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            DedupError::validation(format!("Failed to read config file {}: {}", path.as_ref().display(), e))
        })?;

        serde_yaml_ng::from_str(&content)
            .map_err(|e| DedupError::validation(format!("Invalid YAML in {}: {}", path.as_ref().display(), e)))
    }

    /// Load configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            DedupError::validation(format!("Failed to read config file {}: {}", path.as_ref().display(), e))
        })?;

        serde_json::from_str(&content)
            .map_err(|e| DedupError::validation(format!("Invalid JSON in {}: {}", path.as_ref().display(), e)))
    }

    /// Load configuration, choosing the format from the file extension.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        let config = match extension.as_str() {
            "toml" => Self::from_toml_file(path)?,
            "yaml" | "yml" => Self::from_yaml_file(path)?,
            "json" => Self::from_json_file(path)?,
            other => {
                return Err(DedupError::validation(format!(
                    "Unsupported config extension '{}' for {}",
                    other,
                    path.display()
                )));
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Discover configuration file in parent directories.
    ///
    /// Searches for `exam-dedup.toml` in the current directory and its parents.
    ///
    /// # Returns
    ///
    /// - `Some(config)` if found
    /// - `None` if no config file found
    pub fn discover() -> Result<Option<Self>> {
        let mut current = std::env::current_dir().map_err(DedupError::Io)?;

        loop {
            let candidate = current.join(CONFIG_FILE_NAME);
            if candidate.exists() {
                let config = Self::from_toml_file(candidate)?;
                config.validate()?;
                return Ok(Some(config));
            }

            if let Some(parent) = current.parent() {
                current = parent.to_path_buf();
            } else {
                break;
            }
        }

        Ok(None)
    }

    /// Reject values the engine cannot work with.
    pub fn validate(&self) -> Result<()> {
        let m = &self.matching;
        check_unit_interval("matching.embedding_threshold", m.embedding_threshold)?;
        check_unit_interval("matching.text_threshold", m.text_threshold)?;
        check_unit_interval("batch.duplicate_threshold", self.batch.duplicate_threshold)?;

        if m.phash_threshold > 64 {
            return Err(DedupError::validation(format!(
                "matching.phash_threshold must be at most 64 bits, got {}",
                m.phash_threshold
            )));
        }
        if self.cache.capacity == 0 {
            return Err(DedupError::validation("cache.capacity must be at least 1"));
        }
        if self.batch.max_batch_size == 0 {
            return Err(DedupError::validation("batch.max_batch_size must be at least 1"));
        }
        if self.batch.min_workers == 0 || self.batch.min_workers > self.batch.max_workers {
            return Err(DedupError::validation(format!(
                "batch worker bounds must satisfy 1 <= min_workers <= max_workers, got {}..{}",
                self.batch.min_workers, self.batch.max_workers
            )));
        }
        if self.jobs.ttl_secs == 0 {
            return Err(DedupError::validation("jobs.ttl_secs must be at least 1"));
        }
        Ok(())
    }
}

fn check_unit_interval(name: &str, value: f64) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(DedupError::validation(format!("{} must be within [0, 1], got {}", name, value)))
    }
}
