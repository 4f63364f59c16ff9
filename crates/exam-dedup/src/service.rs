//! Caller-facing facade: single analysis, synchronous batches and pollable
//! background batches.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use crate::batch::{self, BatchItem, BatchOrchestrator, BatchResult};
use crate::core::engine::DedupEngine;
use crate::error::{DedupError, Result};
use crate::jobs::{JobOutcome, JobStatus, JobSummary, JobTracker, JobUpdate, ProgressUpdate};
use crate::types::{AnalysisHints, AnalysisInput, AnalysisResult};

const BATCH_JOB_TYPE: &str = "batch_analysis";

#[derive(Debug, Clone)]
pub struct DedupService {
    orchestrator: BatchOrchestrator,
    jobs: Arc<JobTracker<BatchResult>>,
}

impl DedupService {
    pub fn new(engine: Arc<DedupEngine>) -> Self {
        let jobs = Arc::new(JobTracker::new(&engine.config().jobs));
        Self {
            orchestrator: BatchOrchestrator::new(engine),
            jobs,
        }
    }

    pub fn engine(&self) -> &Arc<DedupEngine> {
        self.orchestrator.engine()
    }

    pub fn jobs(&self) -> &Arc<JobTracker<BatchResult>> {
        &self.jobs
    }

    pub fn analyze(&self, input: &AnalysisInput, hints: &AnalysisHints) -> Result<AnalysisResult> {
        self.engine().analyze(input, hints)
    }

    /// Run a batch and wait for it.
    pub fn submit_batch(&self, items: Vec<BatchItem>, max_workers: Option<usize>) -> Result<BatchResult> {
        self.orchestrator.run(items, max_workers, None)
    }

    /// Start a batch on a background thread and return its job id at once.
    ///
    /// Empty or oversized batches are rejected before a job is created.
    pub fn submit_async(&self, items: Vec<BatchItem>, max_workers: Option<usize>) -> Result<String> {
        if items.is_empty() {
            return Err(DedupError::validation("Batch must contain at least one item"));
        }
        self.orchestrator.validate_size(items.len())?;
        self.jobs.maybe_sweep();

        let total = items.len();
        let job_id = self.jobs.create(
            BATCH_JOB_TYPE,
            serde_json::json!({ "total": total, "max_workers": max_workers }),
        );

        let orchestrator = self.orchestrator.clone();
        let jobs = Arc::clone(&self.jobs);
        let worker_job_id = job_id.clone();

        let spawned = thread::Builder::new()
            .name(format!("exam-dedup-job-{}", short_id(&job_id)))
            .spawn(move || run_job(&orchestrator, &jobs, &worker_job_id, items, max_workers));

        if let Err(e) = spawned {
            let message = format!("Failed to start job thread: {}", e);
            tracing::error!(job_id = %job_id, error = %message, "Job could not start");
            self.jobs.update(&job_id, JobStatus::Processing, JobUpdate::default())?;
            self.jobs.update(&job_id, JobStatus::Failed, JobUpdate::error(message.clone()))?;
            return Err(DedupError::WorkerPool(message));
        }

        tracing::info!(job_id = %job_id, total, "Submitted async batch");
        Ok(job_id)
    }

    pub fn get_status(&self, job_id: &str) -> Result<JobSummary> {
        self.jobs.get_summary(job_id)
    }

    pub fn get_result(&self, job_id: &str) -> Result<JobOutcome<BatchResult>> {
        self.jobs.outcome(job_id)
    }

    pub fn sweep_jobs(&self) -> usize {
        self.jobs.sweep()
    }
}

fn run_job(
    orchestrator: &BatchOrchestrator,
    jobs: &JobTracker<BatchResult>,
    job_id: &str,
    items: Vec<BatchItem>,
    max_workers: Option<usize>,
) {
    let total = items.len();
    let start = JobUpdate::progress(ProgressUpdate {
        total: Some(total),
        completed: Some(0),
        failed: Some(0),
        current_item: None,
    });
    if let Err(e) = jobs.update(job_id, JobStatus::Processing, start) {
        tracing::warn!(job_id, error = %e, "Job vanished before it started");
        return;
    }

    let on_progress = |progress: batch::BatchProgress| {
        if let Err(e) = jobs.report_progress(job_id, progress.into()) {
            tracing::warn!(job_id, error = %e, "Could not record job progress");
        }
    };

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        orchestrator.run(items, max_workers, Some(&on_progress))
    }));

    let finished = match outcome {
        Ok(Ok(result)) => {
            let progress = ProgressUpdate {
                total: Some(result.total),
                completed: Some(result.success_count),
                failed: Some(result.failed_count),
                current_item: None,
            };
            jobs.update(job_id, JobStatus::Completed, JobUpdate::result(result).with_progress(progress))
        }
        Ok(Err(e)) => jobs.update(job_id, JobStatus::Failed, JobUpdate::error(e.to_string())),
        Err(payload) => {
            let message = format!("Job panicked: {}", batch::panic_message(payload.as_ref()));
            tracing::error!(job_id, error = %message, "Job panicked");
            jobs.update(job_id, JobStatus::Failed, JobUpdate::error(message))
        }
    };

    if let Err(e) = finished {
        tracing::warn!(job_id, error = %e, "Could not record job outcome");
    }
}

fn short_id(job_id: &str) -> &str {
    job_id.get(..8).unwrap_or(job_id)
}
