//! Pollable job registry.
//!
//! A job wraps one long-running unit of work (typically a batch run) so the
//! caller can submit it, return immediately, and poll for the outcome later.
//!
//! ```text
//! Pending --start--> Processing --ok--> Completed
//!                               \-err-> Failed
//! ```
//!
//! Status only moves forward. Progress-only updates keep the current status.
//! All access goes through one mutex, and every accessor returns an owned
//! snapshot, so a poller never observes a half-applied update.
//!
//! Old jobs are removed by [`JobTracker::sweep`]; nothing runs in the
//! background.

use ahash::AHashMap;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::batch::{BatchProgress, BatchResult};
use crate::core::config::JobConfig;
use crate::error::{DedupError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether a job in `self` may be updated to `next`.
    ///
    /// Staying in `Pending` or `Processing` is a progress-only update.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Pending) | (Pending, Processing) | (Processing, Processing) | (Processing, Completed) | (Processing, Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobProgress {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_item: Option<usize>,
}

/// Partial progress; only the fields that are set are merged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub total: Option<usize>,
    pub completed: Option<usize>,
    pub failed: Option<usize>,
    pub current_item: Option<usize>,
}

impl ProgressUpdate {
    fn apply(&self, progress: &mut JobProgress) {
        if let Some(total) = self.total {
            progress.total = total;
        }
        if let Some(completed) = self.completed {
            progress.completed = completed;
        }
        if let Some(failed) = self.failed {
            progress.failed = failed;
        }
        if let Some(current) = self.current_item {
            progress.current_item = Some(current);
        }
    }
}

impl From<BatchProgress> for ProgressUpdate {
    fn from(p: BatchProgress) -> Self {
        Self {
            total: Some(p.total),
            completed: Some(p.completed),
            failed: Some(p.failed),
            current_item: p.current_item,
        }
    }
}

/// Fields changed together with a status update.
#[derive(Debug, Clone)]
pub struct JobUpdate<R> {
    pub progress: Option<ProgressUpdate>,
    pub result: Option<R>,
    pub error: Option<String>,
}

impl<R> Default for JobUpdate<R> {
    fn default() -> Self {
        Self {
            progress: None,
            result: None,
            error: None,
        }
    }
}

impl<R> JobUpdate<R> {
    pub fn progress(progress: ProgressUpdate) -> Self {
        Self {
            progress: Some(progress),
            ..Self::default()
        }
    }

    pub fn result(result: R) -> Self {
        Self {
            result: Some(result),
            ..Self::default()
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn with_progress(mut self, progress: ProgressUpdate) -> Self {
        self.progress = Some(progress);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job<R> {
    pub id: String,
    pub job_type: String,
    pub status: JobStatus,
    pub params: serde_json::Value,
    pub progress: JobProgress,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<R>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Seconds from start (or creation, if never started) to the terminal state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_time_secs: Option<f64>,
}

/// Job view without the result payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub id: String,
    pub job_type: String,
    pub status: JobStatus,
    pub progress: JobProgress,
    pub has_result: bool,
    pub has_error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_time_secs: Option<f64>,
}

impl<R> From<&Job<R>> for JobSummary {
    fn from(job: &Job<R>) -> Self {
        Self {
            id: job.id.clone(),
            job_type: job.job_type.clone(),
            status: job.status,
            progress: job.progress,
            has_result: job.result.is_some(),
            has_error: job.error.is_some(),
            error: job.error.clone(),
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            total_time_secs: job.total_time_secs,
        }
    }
}

/// What a poller can do with a job right now.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome<R> {
    Pending(JobProgress),
    Processing(JobProgress),
    Completed(R),
    Failed(String),
}

/// Thread-safe job registry.
pub struct JobTracker<R = BatchResult> {
    jobs: Mutex<AHashMap<String, Job<R>>>,
    ttl: Duration,
    sweep_interval: Duration,
    last_sweep: Mutex<DateTime<Utc>>,
}

impl<R: Clone> JobTracker<R> {
    pub fn new(config: &JobConfig) -> Self {
        Self {
            jobs: Mutex::new(AHashMap::new()),
            ttl: config.ttl(),
            sweep_interval: config.sweep_interval(),
            last_sweep: Mutex::new(Utc::now()),
        }
    }

    /// Register a new job in `Pending` and return its id.
    pub fn create(&self, job_type: &str, params: serde_json::Value) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let job = Job {
            id: id.clone(),
            job_type: job_type.to_string(),
            status: JobStatus::Pending,
            params,
            progress: JobProgress::default(),
            result: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            total_time_secs: None,
        };
        self.jobs.lock().insert(id.clone(), job);
        tracing::info!(job_id = %id, job_type, "Created job");
        id
    }

    /// Move a job to `status`, merging `update` into it.
    ///
    /// Progress fields are merged, not replaced. Fails with `JobNotFound` or,
    /// for a backward or skipped transition, `InvalidTransition`; a rejected
    /// update leaves the job untouched.
    pub fn update(&self, job_id: &str, status: JobStatus, update: JobUpdate<R>) -> Result<()> {
        let mut jobs = self.jobs.lock();
        let Some(job) = jobs.get_mut(job_id) else {
            tracing::warn!(job_id, status = %status, "Update for unknown job");
            return Err(DedupError::JobNotFound(job_id.to_string()));
        };

        if !job.status.can_transition_to(status) {
            tracing::warn!(job_id, from = %job.status, to = %status, "Rejected job transition");
            return Err(DedupError::InvalidTransition {
                job_id: job_id.to_string(),
                from: job.status.to_string(),
                to: status.to_string(),
            });
        }

        let now = Utc::now();
        let previous = job.status;
        job.status = status;

        if status == JobStatus::Processing && job.started_at.is_none() {
            job.started_at = Some(now);
        }
        if status.is_terminal() {
            job.completed_at = Some(now);
            let start = job.started_at.unwrap_or(job.created_at);
            job.total_time_secs = Some((now - start).num_milliseconds() as f64 / 1000.0);
        }

        if let Some(progress) = update.progress {
            progress.apply(&mut job.progress);
            tracing::debug!(
                job_id,
                completed = job.progress.completed,
                failed = job.progress.failed,
                total = job.progress.total,
                "Job progress"
            );
        }
        if update.result.is_some() {
            job.result = update.result;
        }
        if update.error.is_some() {
            job.error = update.error;
        }

        if previous != status {
            tracing::info!(job_id, from = %previous, to = %status, "Job transition");
        }
        Ok(())
    }

    /// Merge progress into a live job without changing its status.
    ///
    /// Read and merge happen under one lock, so a concurrent transition is
    /// never undone. Terminal jobs reject progress with `InvalidTransition`.
    pub fn report_progress(&self, job_id: &str, progress: ProgressUpdate) -> Result<()> {
        let mut jobs = self.jobs.lock();
        let Some(job) = jobs.get_mut(job_id) else {
            tracing::warn!(job_id, "Progress for unknown job");
            return Err(DedupError::JobNotFound(job_id.to_string()));
        };

        if job.status.is_terminal() {
            tracing::warn!(job_id, status = %job.status, "Rejected progress for finished job");
            return Err(DedupError::InvalidTransition {
                job_id: job_id.to_string(),
                from: job.status.to_string(),
                to: job.status.to_string(),
            });
        }

        progress.apply(&mut job.progress);
        tracing::debug!(
            job_id,
            status = %job.status,
            completed = job.progress.completed,
            failed = job.progress.failed,
            total = job.progress.total,
            "Job progress"
        );
        Ok(())
    }

    pub fn status(&self, job_id: &str) -> Result<JobStatus> {
        self.jobs
            .lock()
            .get(job_id)
            .map(|job| job.status)
            .ok_or_else(|| DedupError::JobNotFound(job_id.to_string()))
    }

    /// Snapshot of a job, result included.
    pub fn get(&self, job_id: &str) -> Result<Job<R>> {
        self.jobs
            .lock()
            .get(job_id)
            .cloned()
            .ok_or_else(|| DedupError::JobNotFound(job_id.to_string()))
    }

    /// Snapshot of a job without cloning its result.
    pub fn get_summary(&self, job_id: &str) -> Result<JobSummary> {
        self.jobs
            .lock()
            .get(job_id)
            .map(JobSummary::from)
            .ok_or_else(|| DedupError::JobNotFound(job_id.to_string()))
    }

    pub fn outcome(&self, job_id: &str) -> Result<JobOutcome<R>> {
        let jobs = self.jobs.lock();
        let job = jobs
            .get(job_id)
            .ok_or_else(|| DedupError::JobNotFound(job_id.to_string()))?;

        Ok(match job.status {
            JobStatus::Pending => JobOutcome::Pending(job.progress),
            JobStatus::Processing => JobOutcome::Processing(job.progress),
            JobStatus::Completed => match &job.result {
                Some(result) => JobOutcome::Completed(result.clone()),
                None => JobOutcome::Failed("Job completed without a result".to_string()),
            },
            JobStatus::Failed => JobOutcome::Failed(job.error.clone().unwrap_or_else(|| "unknown error".to_string())),
        })
    }

    /// Remove every job created more than the TTL ago. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Utc::now())
    }

    pub fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::MAX);
        let mut jobs = self.jobs.lock();
        let before = jobs.len();
        jobs.retain(|_, job| now.signed_duration_since(job.created_at) <= ttl);
        let removed = before - jobs.len();
        drop(jobs);

        *self.last_sweep.lock() = now;
        if removed > 0 {
            tracing::info!(removed, "Swept expired jobs");
        }
        removed
    }

    /// Sweep only if the sweep interval has passed since the last sweep.
    pub fn maybe_sweep(&self) -> Option<usize> {
        self.maybe_sweep_at(Utc::now())
    }

    pub fn maybe_sweep_at(&self, now: DateTime<Utc>) -> Option<usize> {
        let interval = chrono::Duration::from_std(self.sweep_interval).unwrap_or(chrono::Duration::MAX);
        let due = now.signed_duration_since(*self.last_sweep.lock()) >= interval;
        due.then(|| self.sweep_at(now))
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<R> fmt::Debug for JobTracker<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobTracker")
            .field("jobs", &self.jobs.lock().len())
            .field("ttl", &self.ttl)
            .finish()
    }
}
