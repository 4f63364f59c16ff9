use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::fingerprint::hash::{content_hash, sha256_hex};
use crate::fingerprint::text::normalize_text;

// ============================================================================
// Inputs
// ============================================================================

/// One unit of work for the engine: a photographed question or its text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalysisInput {
    /// Encoded image bytes (PNG, JPEG, WebP, BMP or GIF).
    Image(Vec<u8>),
    /// Question text supplied directly by the caller.
    Text(String),
}

impl AnalysisInput {
    pub fn image(bytes: impl Into<Vec<u8>>) -> Self {
        Self::Image(bytes.into())
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Image(_) => "image",
            Self::Text(_) => "text",
        }
    }
}

/// Optional caller-provided context for an analysis.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisHints {
    /// Text recognized on the client for an image input.
    ///
    /// Becomes the fingerprint's normalized text, which lets the text fallback
    /// find a match before any server-side extraction runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_text: Option<String>,

    /// Question stem already extracted on the client.
    ///
    /// Together with `options` it identifies the question by content hash
    /// before the image is fingerprinted or sent to the extractor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question_text: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,

    /// Skip the cache and re-run extraction for an already known question.
    #[serde(default)]
    pub force_refresh: bool,
}

impl AnalysisHints {
    pub fn with_raw_text(text: impl Into<String>) -> Self {
        Self {
            raw_text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn with_question<I, S>(question_text: impl Into<String>, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            question_text: Some(question_text.into()),
            options: options.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn force_refresh() -> Self {
        Self {
            force_refresh: true,
            ..Self::default()
        }
    }

    /// Content hash of the client-extracted question.
    ///
    /// `None` unless both a non-blank stem and at least one option were given.
    pub fn content_digest(&self) -> Option<String> {
        let text = self.question_text.as_deref()?;
        let normalized = normalize_text(text);
        if normalized.is_empty() || self.options.iter().all(|o| o.trim().is_empty()) {
            return None;
        }
        Some(content_hash(&normalized, &self.options))
    }
}

// ============================================================================
// Fingerprints
// ============================================================================

/// 64-bit perceptual hash; visually similar images have a small Hamming distance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PerceptualHash(pub u64);

impl PerceptualHash {
    pub const BITS: u32 = 64;

    /// Number of differing bits.
    pub fn hamming(&self, other: &PerceptualHash) -> u32 {
        (self.0 ^ other.0).count_ones()
    }

    pub fn to_hex(&self) -> String {
        format!("{:016x}", self.0)
    }

    pub fn from_hex(hex: &str) -> Option<Self> {
        u64::from_str_radix(hex, 16).ok().map(Self)
    }
}

impl fmt::Display for PerceptualHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// The comparable signals derived from one input.
///
/// A signal that could not be computed is `None`; there are no placeholder
/// values (a zero vector would look similar to everything).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fingerprint {
    /// SHA-256 of the raw image bytes, lowercase hex. `None` for text inputs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exact_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub perceptual_hash: Option<PerceptualHash>,
    pub normalized_text: String,
    /// L2-normalized embedding.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl Fingerprint {
    /// Cache key for this fingerprint.
    ///
    /// Prefers the exact hash; falls back to a digest of the normalized text.
    /// Returns `None` when neither signal exists.
    pub fn cache_key(&self) -> Option<String> {
        if let Some(hash) = &self.exact_hash {
            return Some(format!("hash:{}", hash));
        }
        if self.normalized_text.is_empty() {
            return None;
        }
        Some(format!("text:{}", sha256_hex(self.normalized_text.as_bytes())))
    }
}

// ============================================================================
// Extracted content and persisted items
// ============================================================================

/// Token usage reported by an extraction collaborator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Monetary cost of the call, in the provider's currency unit.
    pub cost: f64,
}

/// What the extraction collaborator understood from an input.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedContent {
    pub raw_text: String,
    pub normalized_text: String,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

impl ExtractedContent {
    /// Content for a question whose text is already known; no options, no cost.
    pub fn from_text(text: impl Into<String>) -> Self {
        let raw_text = text.into();
        let normalized_text = normalize_text(&raw_text);
        Self {
            raw_text,
            normalized_text,
            options: Vec::new(),
            usage: None,
        }
    }

    pub fn cost(&self) -> f64 {
        self.usage.map(|u| u.cost).unwrap_or(0.0)
    }
}

/// A persisted question, owned by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredItem {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exact_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub perceptual_hash: Option<PerceptualHash>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub normalized_text: String,
    pub content: ExtractedContent,
    /// Digest of the question text and options, see [`crate::fingerprint::hash::content_hash`].
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
}

/// An item about to be inserted; the store assigns `id` and `created_at`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewItem {
    pub exact_hash: Option<String>,
    pub perceptual_hash: Option<PerceptualHash>,
    pub embedding: Option<Vec<f32>>,
    pub normalized_text: String,
    pub content: ExtractedContent,
    pub content_hash: String,
}

impl NewItem {
    pub fn new(fingerprint: &Fingerprint, content: ExtractedContent, content_hash: String) -> Self {
        let normalized_text = if fingerprint.normalized_text.is_empty() {
            content.normalized_text.clone()
        } else {
            fingerprint.normalized_text.clone()
        };
        Self {
            exact_hash: fingerprint.exact_hash.clone(),
            perceptual_hash: fingerprint.perceptual_hash,
            embedding: fingerprint.embedding.clone(),
            normalized_text,
            content,
            content_hash,
        }
    }
}

// ============================================================================
// Results
// ============================================================================

/// Which signal decided a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    Exact,
    Perceptual,
    Embedding,
    Text,
    ContentHash,
}

impl MatchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Perceptual => "perceptual",
            Self::Embedding => "embedding",
            Self::Text => "text",
            Self::ContentHash => "content_hash",
        }
    }
}

impl fmt::Display for MatchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of analyzing one input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Id of the stored item holding this question.
    pub id: String,
    pub content: ExtractedContent,
    pub from_cache: bool,
    pub is_duplicate: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<MatchMethod>,
    /// Extraction cost incurred by this call; zero for cache and store hits.
    pub cost: f64,
}
