//! Collaborator interfaces.
//!
//! The engine never talks to an OCR engine, a vision model or an embedding
//! model directly. Each is a trait object handed to [`crate::DedupEngine::new`]
//! at construction time:
//!
//! - [`ContentExtractor`] - reads question text and options from image bytes
//! - [`EmbeddingProvider`] - produces a dense vector for image bytes
//!
//! A local engine that is not safe to call concurrently implements
//! [`LocalOcrEngine`] and is wrapped in [`SerializedExtractor`], which owns it
//! behind a single mutex so concurrent batch workers take turns.
//!
//! # Example
//!
//! ```rust
//! use exam_dedup::plugins::{ContentExtractor, Plugin};
//! use exam_dedup::{ExtractedContent, Result};
//!
//! struct EchoExtractor;
//!
//! impl Plugin for EchoExtractor {
//!     fn name(&self) -> &str {
//!         "echo"
//!     }
//! }
//!
//! impl ContentExtractor for EchoExtractor {
//!     fn extract_content(&self, image_bytes: &[u8]) -> Result<ExtractedContent> {
//!         Ok(ExtractedContent::from_text(format!("{} bytes", image_bytes.len())))
//!     }
//! }
//! ```

use parking_lot::Mutex;

use crate::error::Result;
use crate::types::ExtractedContent;

/// Base trait for every collaborator.
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    fn version(&self) -> String {
        env!("CARGO_PKG_VERSION").to_string()
    }

    /// Called once when the engine is built.
    fn initialize(&self) -> Result<()> {
        Ok(())
    }

    /// Called from [`crate::DedupEngine::shutdown`].
    fn shutdown(&self) -> Result<()> {
        Ok(())
    }

    fn description(&self) -> &str {
        ""
    }
}

/// OCR / vision / LLM provider that turns image bytes into question content.
///
/// Implementations block; the batch orchestrator calls them from OS threads.
pub trait ContentExtractor: Plugin {
    /// Extract question text and options.
    ///
    /// Returns `DedupError::Extraction` when the input cannot be understood.
    fn extract_content(&self, image_bytes: &[u8]) -> Result<ExtractedContent>;
}

/// Embedding provider.
///
/// Unavailability is not an error: return `None` and the fingerprint simply
/// has no embedding.
pub trait EmbeddingProvider: Plugin {
    fn extract_embedding(&self, image_bytes: &[u8]) -> Option<Vec<f32>>;
}

/// Embedding provider for deployments without an embedding model.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoEmbeddings;

impl Plugin for NoEmbeddings {
    fn name(&self) -> &str {
        "no-embeddings"
    }
}

impl EmbeddingProvider for NoEmbeddings {
    fn extract_embedding(&self, _image_bytes: &[u8]) -> Option<Vec<f32>> {
        None
    }
}

/// A local recognition engine holding mutable, non-shareable state.
pub trait LocalOcrEngine: Send {
    fn name(&self) -> &str;

    fn recognize(&mut self, image_bytes: &[u8]) -> Result<ExtractedContent>;
}

/// Adapts a [`LocalOcrEngine`] to [`ContentExtractor`] by serializing calls.
///
/// Only one worker runs the engine at a time; this is the throughput ceiling
/// of any batch that uses it.
pub struct SerializedExtractor<E: LocalOcrEngine> {
    name: String,
    engine: Mutex<E>,
}

impl<E: LocalOcrEngine> SerializedExtractor<E> {
    pub fn new(engine: E) -> Self {
        Self {
            name: engine.name().to_string(),
            engine: Mutex::new(engine),
        }
    }

    pub fn into_inner(self) -> E {
        self.engine.into_inner()
    }
}

impl<E: LocalOcrEngine> Plugin for SerializedExtractor<E> {
    fn name(&self) -> &str {
        &self.name
    }
}

impl<E: LocalOcrEngine> ContentExtractor for SerializedExtractor<E> {
    fn extract_content(&self, image_bytes: &[u8]) -> Result<ExtractedContent> {
        let mut engine = self.engine.lock();
        engine.recognize(image_bytes)
    }
}
