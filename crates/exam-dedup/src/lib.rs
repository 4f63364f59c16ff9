//! exam-dedup - Duplicate Detection for Exam Questions
//!
//! Recognizes exam questions that were already analyzed, whether they arrive
//! as the same image, a re-encoded or slightly altered image, or plain text,
//! so the expensive extraction collaborator runs once per distinct question.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use exam_dedup::plugins::{ContentExtractor, NoEmbeddings, Plugin};
//! use exam_dedup::{AnalysisHints, AnalysisInput, DedupConfig, DedupEngine, ExtractedContent, MemoryStore};
//!
//! struct MyOcr;
//!
//! impl Plugin for MyOcr {
//!     fn name(&self) -> &str {
//!         "my-ocr"
//!     }
//! }
//!
//! impl ContentExtractor for MyOcr {
//!     fn extract_content(&self, _image_bytes: &[u8]) -> exam_dedup::Result<ExtractedContent> {
//!         Ok(ExtractedContent::from_text("What is 2 + 2?"))
//!     }
//! }
//!
//! # fn main() -> exam_dedup::Result<()> {
//! let engine = DedupEngine::new(
//!     DedupConfig::default(),
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(MyOcr),
//!     Arc::new(NoEmbeddings),
//! )?;
//!
//! let bytes = std::fs::read("question.png")?;
//! let result = engine.analyze(&AnalysisInput::image(bytes), &AnalysisHints::default())?;
//! println!("{} duplicate={}", result.id, result.is_duplicate);
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - **Fingerprints** (`fingerprint`): SHA-256, 64-bit DCT perceptual hash, normalized text, optional embedding
//! - **Matching** (`matching`): exact, then perceptual/embedding, then a bounded text fallback
//! - **Cache** (`cache`): bounded LRU/FIFO cache with single-flight computation
//! - **Engine** (`core`): the per-input pipeline and its configuration
//! - **Batches and jobs** (`batch`, `jobs`, `service`): thread-pool batches and pollable background runs
//! - **Collaborators** (`plugins`, `store`): extraction, embeddings and persistence are injected

#![deny(unsafe_code)]

pub mod batch;
pub mod cache;
pub mod core;
pub mod error;
pub mod fingerprint;
pub mod jobs;
pub mod matching;
pub mod plugins;
pub mod service;
pub mod store;
pub mod types;

pub use error::{DedupError, Result};
pub use types::*;

pub use batch::{BatchItem, BatchItemResult, BatchOrchestrator, BatchProgress, BatchResult};
pub use cache::{CacheStats, DedupCache, EvictionKind};
pub use core::config::{BatchConfig, CacheConfig, DedupConfig, JobConfig, MatchingConfig};
pub use core::engine::DedupEngine;
pub use fingerprint::FingerprintExtractor;
pub use jobs::{Job, JobOutcome, JobProgress, JobStatus, JobSummary, JobTracker};
pub use matching::{MatchOutcome, SimilarityMatcher};
pub use service::DedupService;
pub use store::{MemoryStore, QuestionStore};
