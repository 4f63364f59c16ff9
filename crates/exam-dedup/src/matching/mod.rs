//! Similarity matching against persisted items.
//!
//! Signals are tried in a fixed order:
//!
//! 1. **Exact** - identical image digest, similarity 1.0.
//! 2. **Perceptual** - smallest Hamming distance within `phash_threshold` bits.
//! 3. **Embedding** - highest cosine similarity of at least `embedding_threshold`.
//! 4. **Text** - only when neither 2 nor 3 found a candidate: the first of the
//!    `text_scan_window` most recent items whose normalized-text ratio reaches
//!    `text_threshold`.
//!
//! When both a perceptual and an embedding candidate exist, the embedding
//! candidate wins. A stored vector of the wrong dimension is skipped with a
//! warning and never aborts the scan.
//!
//! The text fallback only sees the most recent window of items, so duplicates
//! of old questions that lack image signals go unnoticed once the store grows
//! past the window. Both sides must carry at least `min_text_chars`
//! characters after normalization; spaces and punctuation do not count.

use crate::core::config::MatchingConfig;
use crate::error::Result;
use crate::fingerprint::{cosine_similarity, similarity_ratio};
use crate::store::QuestionStore;
use crate::types::{Fingerprint, MatchMethod, PerceptualHash, StoredItem};

/// A decided match.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchOutcome {
    pub item: StoredItem,
    /// In `[0, 1]`.
    pub similarity: f64,
    pub method: MatchMethod,
}

#[derive(Debug, Clone)]
pub struct SimilarityMatcher {
    config: MatchingConfig,
}

impl SimilarityMatcher {
    pub fn new(config: MatchingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MatchingConfig {
        &self.config
    }

    /// Find the stored item `fingerprint` duplicates, if any.
    ///
    /// `Ok(None)` means no match (similarity 0.0). Errors come only from the store.
    pub fn find_match(&self, fingerprint: &Fingerprint, store: &dyn QuestionStore) -> Result<Option<MatchOutcome>> {
        if let Some(exact_hash) = &fingerprint.exact_hash
            && let Some(item) = store.find_by_exact_hash(exact_hash)?
        {
            return Ok(Some(self.decided(item, 1.0, MatchMethod::Exact)));
        }

        let perceptual = match fingerprint.perceptual_hash {
            Some(hash) => self.perceptual_candidate(hash, store)?,
            None => None,
        };
        let embedding = match &fingerprint.embedding {
            Some(vector) => self.embedding_candidate(vector, store)?,
            None => None,
        };

        if let Some((item, similarity)) = embedding {
            if let Some((other, distance)) = &perceptual {
                tracing::debug!(
                    perceptual_id = %other.id,
                    distance,
                    "Embedding candidate preferred over perceptual candidate"
                );
            }
            return Ok(Some(self.decided(item, similarity, MatchMethod::Embedding)));
        }
        if let Some((item, distance)) = perceptual {
            let similarity = 1.0 - distance as f64 / PerceptualHash::BITS as f64;
            return Ok(Some(self.decided(item, similarity, MatchMethod::Perceptual)));
        }

        if let Some((item, ratio)) = self.text_candidate(&fingerprint.normalized_text, store)? {
            return Ok(Some(self.decided(item, ratio, MatchMethod::Text)));
        }

        tracing::debug!("No stored match");
        Ok(None)
    }

    fn perceptual_candidate(&self, hash: PerceptualHash, store: &dyn QuestionStore) -> Result<Option<(StoredItem, u32)>> {
        let mut best: Option<(StoredItem, u32)> = None;
        for item in store.scan_with_hash()? {
            let Some(stored) = item.perceptual_hash else {
                continue;
            };
            let distance = hash.hamming(&stored);
            if best.as_ref().is_none_or(|(_, d)| distance < *d) {
                best = Some((item, distance));
            }
        }
        Ok(best.filter(|(_, distance)| *distance <= self.config.phash_threshold))
    }

    fn embedding_candidate(&self, vector: &[f32], store: &dyn QuestionStore) -> Result<Option<(StoredItem, f64)>> {
        let mut best: Option<(StoredItem, f64)> = None;
        for item in store.scan_with_embedding()? {
            let Some(stored) = &item.embedding else {
                continue;
            };
            match cosine_similarity(vector, stored) {
                Ok(similarity) => {
                    if best.as_ref().is_none_or(|(_, s)| similarity > *s) {
                        best = Some((item, similarity));
                    }
                }
                Err(e) => {
                    tracing::warn!(item_id = %item.id, error = %e, "Skipping malformed stored embedding");
                }
            }
        }
        Ok(best
            .filter(|(_, similarity)| *similarity >= self.config.embedding_threshold)
            .map(|(item, similarity)| (item, similarity.clamp(0.0, 1.0))))
    }

    fn text_candidate(&self, text: &str, store: &dyn QuestionStore) -> Result<Option<(StoredItem, f64)>> {
        if text.chars().count() < self.config.min_text_chars {
            return Ok(None);
        }
        for item in store.scan_recent(self.config.text_scan_window)? {
            if item.normalized_text.chars().count() < self.config.min_text_chars {
                continue;
            }
            let ratio = similarity_ratio(text, &item.normalized_text);
            if ratio >= self.config.text_threshold {
                return Ok(Some((item, ratio)));
            }
        }
        Ok(None)
    }

    fn decided(&self, item: StoredItem, similarity: f64, method: MatchMethod) -> MatchOutcome {
        tracing::info!(
            method = %method,
            similarity,
            matched_id = %item.id,
            "Matched stored item"
        );
        MatchOutcome { item, similarity, method }
    }
}
