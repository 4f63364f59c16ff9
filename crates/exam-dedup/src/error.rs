//! Error types for exam-dedup.
//!
//! Every fallible operation in the crate returns [`Result<T>`], backed by the
//! single [`DedupError`] enum.
//!
//! # Propagation
//!
//! **System errors bubble up unchanged:**
//! - `DedupError::Io` (from `std::io::Error`) - reading images or config files
//!
//! **Application errors carry context:**
//! - `Extraction` - unreadable image bytes or a failing extraction collaborator
//! - `SimilarityCompute` - a malformed stored signal; raised inside the matcher
//!   scan, logged and skipped there, never returned from `find_match`
//! - `Validation` - invalid configuration or request parameters
//! - `BatchSizeExceeded` - rejected before any batch work starts
//!
//! A cache miss is `Option::None`, and a partially failed batch is a
//! `BatchResult` whose items carry `success: false`. Neither is an error.
//!
//! # Example
//!
//! ```rust
//! use exam_dedup::{DedupError, Result};
//!
//! fn read_image(path: &str) -> Result<Vec<u8>> {
//!     let bytes = std::fs::read(path)?;
//!     if bytes.is_empty() {
//!         return Err(DedupError::validation(format!("Image is empty: {}", path)));
//!     }
//!     Ok(bytes)
//! }
//! ```
use thiserror::Error;

/// Result type alias using `DedupError`.
pub type Result<T> = std::result::Result<T, DedupError>;

/// Main error type for all exam-dedup operations.
#[derive(Debug, Error)]
pub enum DedupError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Extraction error: {message}")]
    Extraction {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Similarity compute error: {message}")]
    SimilarityCompute {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Validation error: {message}")]
    Validation {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Batch size {size} exceeds the maximum of {max}")]
    BatchSizeExceeded { size: usize, max: usize },

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Invalid transition for job {job_id}: {from} -> {to}")]
    InvalidTransition { job_id: String, from: String, to: String },

    #[error("Store error: {message}")]
    Store {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Serialization error: {message}")]
    Serialization {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Plugin error in '{plugin_name}': {message}")]
    Plugin { message: String, plugin_name: String },

    #[error("Worker pool error: {0}")]
    WorkerPool(String),

    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for DedupError {
    fn from(err: serde_json::Error) -> Self {
        DedupError::Serialization {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

impl From<image::ImageError> for DedupError {
    fn from(err: image::ImageError) -> Self {
        DedupError::Extraction {
            message: format!("Failed to decode image: {}", err),
            source: Some(Box::new(err)),
        }
    }
}

macro_rules! error_constructor {
    ($name:ident, $variant:ident) => {
        pastey::paste! {
            #[doc = "Create a " $variant " error"]
            pub fn $name<S: Into<String>>(message: S) -> Self {
                Self::$variant {
                    message: message.into(),
                    source: None,
                }
            }

            #[doc = "Create a " $variant " error with source"]
            pub fn [<$name _with_source>]<S: Into<String>, E: std::error::Error + Send + Sync + 'static>(
                message: S,
                source: E,
            ) -> Self {
                Self::$variant {
                    message: message.into(),
                    source: Some(Box::new(source)),
                }
            }
        }
    };
}

impl DedupError {
    error_constructor!(extraction, Extraction);
    error_constructor!(similarity, SimilarityCompute);
    error_constructor!(validation, Validation);
    error_constructor!(store, Store);
    error_constructor!(serialization, Serialization);

    /// Create a Plugin error for the named collaborator.
    pub fn plugin<N: Into<String>, S: Into<String>>(plugin_name: N, message: S) -> Self {
        Self::Plugin {
            message: message.into(),
            plugin_name: plugin_name.into(),
        }
    }
}
