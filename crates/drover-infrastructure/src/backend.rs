// SPDX-License-Identifier: GPL-3.0-or-later
//! Storage contract for queued jobs.
//!
//! A backend owns jobs at rest and hands each one to at most one worker at a
//! time. Claiming returns an owned snapshot plus a [`Lease`]; every commit
//! names that lease instead of a shared job reference, so a worker that lost
//! its lease (reclaimed after expiry, or already committed) cannot overwrite
//! someone else's state.
use drover_config::RetentionPolicy;
use drover_domain::{DomainError, Job, JobCounts, JobId, JobState};
use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, BackendError>;

pub const SECONDS_PER_DAY: i64 = 24 * 60 * 60;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("queue backend unavailable: {0}")]
    Unavailable(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("lease lost for job {0}")]
    LeaseLost(JobId),

    #[error("corrupt job record {id}: {reason}")]
    Corrupt { id: String, reason: String },

    #[error("payload serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl From<sqlx::Error> for BackendError {
    fn from(value: sqlx::Error) -> Self {
        BackendError::Unavailable(Box::new(value))
    }
}

impl BackendError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, BackendError::Unavailable(_))
    }
}

/// Exclusive, time-bounded claim on one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub job_id: JobId,
    pub token: Uuid,
    pub expires: i64,
}

/// A job handed out by [`QueueBackend::claim_job`].
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub job: Job,
    pub lease: Lease,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Abandoned leases returned to the queue.
    pub reclaimed: u64,
    /// Finished jobs removed by the retention policy.
    pub purged: u64,
}

/// Durable job storage scoped to a single queue.
#[async_trait::async_trait]
pub trait QueueBackend: Send + Sync {
    fn queue_id(&self) -> &str;

    /// Persist a new job that becomes claimable after `delay` seconds.
    async fn enqueue_delayed(&self, job: Job, delay: u64) -> Result<JobId>;

    async fn enqueue(&self, job: Job) -> Result<JobId> {
        self.enqueue_delayed(job, 0).await
    }

    /// Atomically take the earliest available job, or `None` if there is none.
    async fn claim_job(&self) -> Result<Option<ClaimedJob>>;

    async fn on_success(&self, lease: &Lease, message: Option<&str>) -> Result<()>;

    async fn on_failure(&self, lease: &Lease, message: Option<&str>) -> Result<()>;

    /// Put the job back in the queue, consuming one retry.
    async fn retry_job(&self, lease: &Lease, message: Option<&str>, delay: u64) -> Result<()>;

    async fn count_jobs(&self) -> Result<JobCounts>;

    /// Reclaim expired leases and apply the retention policy.
    async fn cleanup_queue(&self) -> Result<CleanupReport>;

    async fn load_job(&self, id: &JobId) -> Result<Option<Job>>;

    /// Jobs ordered by id, optionally filtered by state.
    async fn list_jobs(&self, state: Option<JobState>, limit: usize) -> Result<Vec<Job>>;

    async fn delete_job(&self, id: &JobId) -> Result<bool>;
}

/// Oldest processed time a finished job may have and survive a `Days` policy.
pub fn retention_cutoff(policy: RetentionPolicy, now: i64) -> Option<i64> {
    match policy {
        RetentionPolicy::Days(days) => {
            let window = i64::try_from(days)
                .unwrap_or(i64::MAX)
                .saturating_mul(SECONDS_PER_DAY);
            Some(now.saturating_sub(window))
        }
        _ => None,
    }
}
