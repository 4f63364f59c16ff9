//! Concurrent batch orchestration.
//!
//! [`BatchOrchestrator::run`] pushes every item through
//! [`DedupEngine::analyze`](crate::DedupEngine::analyze) on a fixed-width
//! pool of OS threads:
//!
//! - the batch size is checked against `max_batch_size` before any work starts
//! - each item is isolated: an error or panic becomes that item's failure
//!   result and never affects its siblings
//! - the optional progress callback runs on the collecting thread after each
//!   completion, in completion order
//! - results come back in input order, whatever order they completed in
//! - a final pass flags items that repeat an earlier item of the same batch
//!
//! Single-item batches run inline without a pool.

pub mod dedup;

use rayon::ThreadPoolBuilder;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::mpsc;
use std::time::Instant;

use crate::core::config::BatchConfig;
use crate::core::engine::DedupEngine;
use crate::error::{DedupError, Result};
use crate::types::{AnalysisHints, AnalysisInput, AnalysisResult};

pub use dedup::mark_batch_duplicates;

/// One input of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchItem {
    pub input: AnalysisInput,
    pub hints: AnalysisHints,
}

impl BatchItem {
    pub fn new(input: AnalysisInput, hints: AnalysisHints) -> Self {
        Self { input, hints }
    }

    pub fn image(bytes: impl Into<Vec<u8>>) -> Self {
        Self::new(AnalysisInput::image(bytes), AnalysisHints::default())
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new(AnalysisInput::text(text), AnalysisHints::default())
    }
}

/// Outcome of one batch item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchItemResult {
    /// Position of the item in the submitted batch.
    pub index: usize,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<AnalysisResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub elapsed_secs: f64,
    #[serde(default)]
    pub is_batch_duplicate: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duplicate_of_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duplicate_similarity: Option<f64>,
}

impl BatchItemResult {
    pub fn succeeded(index: usize, analysis: AnalysisResult, elapsed_secs: f64) -> Self {
        Self {
            index,
            success: true,
            analysis: Some(analysis),
            error: None,
            elapsed_secs,
            is_batch_duplicate: false,
            duplicate_of_index: None,
            duplicate_similarity: None,
        }
    }

    pub fn failed(index: usize, error: String, elapsed_secs: f64) -> Self {
        Self {
            index,
            success: false,
            analysis: None,
            error: Some(error),
            elapsed_secs,
            is_batch_duplicate: false,
            duplicate_of_index: None,
            duplicate_similarity: None,
        }
    }
}

/// Progress reported after each completed item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchProgress {
    /// Items that finished successfully.
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
    /// Index of the item that just finished.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_item: Option<usize>,
}

impl BatchProgress {
    pub fn processed(&self) -> usize {
        self.completed + self.failed
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchTiming {
    /// Wall-clock time of the whole run.
    pub total_secs: f64,
    /// Mean time of the successful items.
    pub avg_secs_per_item: f64,
}

/// Result of a batch run. Failed items are data, not errors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    /// Sorted by `index`.
    pub results: Vec<BatchItemResult>,
    pub total: usize,
    pub success_count: usize,
    pub failed_count: usize,
    /// Successful items answered from the cache or the store.
    pub store_duplicate_count: usize,
    pub batch_duplicate_count: usize,
    pub timing: BatchTiming,
    pub total_cost: f64,
}

impl BatchResult {
    pub fn is_partial_failure(&self) -> bool {
        self.failed_count > 0 && self.success_count > 0
    }
}

/// Runs batches through a shared engine.
#[derive(Debug, Clone)]
pub struct BatchOrchestrator {
    engine: Arc<DedupEngine>,
    config: BatchConfig,
}

impl BatchOrchestrator {
    pub fn new(engine: Arc<DedupEngine>) -> Self {
        let config = engine.config().batch.clone();
        Self { engine, config }
    }

    pub fn engine(&self) -> &Arc<DedupEngine> {
        &self.engine
    }

    /// Check a batch size against `max_batch_size`.
    pub fn validate_size(&self, size: usize) -> Result<()> {
        if size > self.config.max_batch_size {
            return Err(DedupError::BatchSizeExceeded {
                size,
                max: self.config.max_batch_size,
            });
        }
        Ok(())
    }

    /// Analyze `items` with up to `max_workers` threads.
    ///
    /// `max_workers` is clamped to the configured bounds and to the batch
    /// size; `None` uses the configured default. Fails only for an oversized
    /// batch or when the worker pool cannot be built.
    pub fn run(
        &self,
        items: Vec<BatchItem>,
        max_workers: Option<usize>,
        progress: Option<&(dyn Fn(BatchProgress) + Sync)>,
    ) -> Result<BatchResult> {
        self.validate_size(items.len())?;

        let total = items.len();
        if total == 0 {
            return Ok(BatchResult::default());
        }

        let started = Instant::now();
        let workers = self.config.effective_workers(max_workers).min(total);
        tracing::info!(total, workers, "Starting batch");

        let mut tracker = ProgressTracker::new(total, progress);
        let mut results = Vec::with_capacity(total);

        if total == 1 {
            let result = self.run_item(0, &items[0]);
            tracker.record(&result);
            results.push(result);
        } else {
            let pool = ThreadPoolBuilder::new()
                .num_threads(workers)
                .thread_name(|i| format!("exam-dedup-worker-{}", i))
                .build()
                .map_err(|e| DedupError::WorkerPool(format!("Failed to build worker pool: {}", e)))?;

            let (tx, rx) = mpsc::channel();
            pool.in_place_scope(|scope| {
                for (index, item) in items.iter().enumerate() {
                    let tx = tx.clone();
                    scope.spawn(move |_| {
                        let result = self.run_item(index, item);
                        let _ = tx.send(result);
                    });
                }
                drop(tx);

                for result in rx {
                    tracker.record(&result);
                    results.push(result);
                }
            });
        }

        results.sort_by_key(|r| r.index);
        let batch_duplicate_count = mark_batch_duplicates(
            &mut results,
            self.config.duplicate_threshold,
            self.engine.config().matching.min_text_chars,
        );

        let summary = summarize(results, batch_duplicate_count, started.elapsed().as_secs_f64());
        tracing::info!(
            total = summary.total,
            success = summary.success_count,
            failed = summary.failed_count,
            store_duplicates = summary.store_duplicate_count,
            batch_duplicates = summary.batch_duplicate_count,
            total_secs = summary.timing.total_secs,
            total_cost = summary.total_cost,
            "Batch finished"
        );
        Ok(summary)
    }

    fn run_item(&self, index: usize, item: &BatchItem) -> BatchItemResult {
        let started = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.engine.analyze(&item.input, &item.hints)));
        let elapsed = started.elapsed().as_secs_f64();

        match outcome {
            Ok(Ok(analysis)) => {
                tracing::debug!(index, elapsed_secs = elapsed, duplicate = analysis.is_duplicate, "Batch item done");
                BatchItemResult::succeeded(index, analysis, elapsed)
            }
            Ok(Err(e)) => {
                tracing::warn!(index, error = %e, "Batch item failed");
                BatchItemResult::failed(index, e.to_string(), elapsed)
            }
            Err(payload) => {
                let message = format!("Worker panicked: {}", panic_message(payload.as_ref()));
                tracing::warn!(index, error = %message, "Batch item failed");
                BatchItemResult::failed(index, message, elapsed)
            }
        }
    }
}

/// Counts completions and forwards them to the caller's callback.
struct ProgressTracker<'a> {
    progress: BatchProgress,
    callback: Option<&'a (dyn Fn(BatchProgress) + Sync)>,
}

impl<'a> ProgressTracker<'a> {
    fn new(total: usize, callback: Option<&'a (dyn Fn(BatchProgress) + Sync)>) -> Self {
        Self {
            progress: BatchProgress {
                total,
                ..BatchProgress::default()
            },
            callback,
        }
    }

    fn record(&mut self, result: &BatchItemResult) {
        if result.success {
            self.progress.completed += 1;
        } else {
            self.progress.failed += 1;
        }
        self.progress.current_item = Some(result.index);

        let Some(callback) = self.callback else {
            return;
        };
        let snapshot = self.progress;
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| callback(snapshot))) {
            tracing::error!(
                completed = snapshot.completed,
                total = snapshot.total,
                error = %panic_message(payload.as_ref()),
                "Progress callback panicked"
            );
        }
    }
}

fn summarize(results: Vec<BatchItemResult>, batch_duplicate_count: usize, total_secs: f64) -> BatchResult {
    let successes: Vec<&BatchItemResult> = results.iter().filter(|r| r.success).collect();
    let success_count = successes.len();
    let store_duplicate_count = successes
        .iter()
        .filter(|r| r.analysis.as_ref().is_some_and(|a| a.is_duplicate))
        .count();
    let total_cost = successes
        .iter()
        .filter_map(|r| r.analysis.as_ref())
        .map(|a| a.cost)
        .sum();
    let avg_secs_per_item = if success_count > 0 {
        successes.iter().map(|r| r.elapsed_secs).sum::<f64>() / success_count as f64
    } else {
        0.0
    };

    BatchResult {
        total: results.len(),
        success_count,
        failed_count: results.len() - success_count,
        store_duplicate_count,
        batch_duplicate_count,
        timing: BatchTiming {
            total_secs,
            avg_secs_per_item,
        },
        total_cost,
        results,
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
