//! Fingerprint extraction.
//!
//! Turns raw image bytes or question text into a [`Fingerprint`]: the exact
//! digest, the perceptual hash, the normalized text and, when an embedding
//! provider is available, an L2-normalized embedding.

pub mod hash;
pub mod phash;
pub mod text;
pub mod vector;

use std::sync::Arc;

use crate::error::Result;
use crate::plugins::{EmbeddingProvider, NoEmbeddings};
use crate::types::{AnalysisHints, AnalysisInput, Fingerprint};

pub use hash::{content_hash, sha256_hex};
pub use phash::{decode_image, perceptual_hash, perceptual_hash_bytes};
pub use text::{normalize_text, similarity_ratio};
pub use vector::{cosine_similarity, l2_normalize};

/// Computes fingerprints; pure with respect to its input apart from the embedding.
#[derive(Clone)]
pub struct FingerprintExtractor {
    embeddings: Arc<dyn EmbeddingProvider>,
}

impl FingerprintExtractor {
    pub fn new(embeddings: Arc<dyn EmbeddingProvider>) -> Self {
        Self { embeddings }
    }

    pub fn without_embeddings() -> Self {
        Self::new(Arc::new(NoEmbeddings))
    }

    pub fn extract(&self, input: &AnalysisInput, hints: &AnalysisHints) -> Result<Fingerprint> {
        match input {
            AnalysisInput::Image(bytes) => self.fingerprint_image(bytes, hints.raw_text.as_deref()),
            AnalysisInput::Text(text) => Ok(Self::fingerprint_text(text)),
        }
    }

    /// Cache key for `input` without decoding or embedding anything.
    ///
    /// Agrees with [`Fingerprint::cache_key`] for the fingerprint of the same input.
    pub fn cache_key_for(input: &AnalysisInput) -> Option<String> {
        match input {
            AnalysisInput::Image(bytes) => Some(format!("hash:{}", sha256_hex(bytes))),
            AnalysisInput::Text(text) => {
                let normalized = normalize_text(text);
                if normalized.is_empty() {
                    return None;
                }
                Some(format!("text:{}", sha256_hex(normalized.as_bytes())))
            }
        }
    }

    /// Fingerprint encoded image bytes.
    ///
    /// Fails with `DedupError::Extraction` if the bytes do not decode; in that
    /// case the embedding provider is never called.
    pub fn fingerprint_image(&self, bytes: &[u8], raw_text: Option<&str>) -> Result<Fingerprint> {
        let image = decode_image(bytes)?;
        let perceptual = perceptual_hash(&image);

        let embedding = match self.embeddings.extract_embedding(bytes) {
            Some(raw) => {
                let normalized = l2_normalize(&raw);
                if normalized.is_none() {
                    tracing::debug!(
                        provider = self.embeddings.name(),
                        dimensions = raw.len(),
                        "Discarding degenerate embedding"
                    );
                }
                normalized
            }
            None => None,
        };

        Ok(Fingerprint {
            exact_hash: Some(sha256_hex(bytes)),
            perceptual_hash: Some(perceptual),
            normalized_text: raw_text.map(normalize_text).unwrap_or_default(),
            embedding,
        })
    }

    /// Fingerprint question text; only the normalized text is populated.
    pub fn fingerprint_text(text: &str) -> Fingerprint {
        Fingerprint {
            exact_hash: None,
            perceptual_hash: None,
            normalized_text: normalize_text(text),
            embedding: None,
        }
    }
}

impl std::fmt::Debug for FingerprintExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FingerprintExtractor")
            .field("embeddings", &self.embeddings.name())
            .finish()
    }
}
