// SPDX-License-Identifier: GPL-3.0-or-later
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub mod result;

pub use result::JobResult;

/// Opaque key-value structure handed to a job type.
pub type Payload = Map<String, Value>;

/// `now + seconds`, saturating at `i64::MAX` instead of wrapping.
pub fn add_seconds(now: i64, seconds: u64) -> i64 {
    now.saturating_add(i64::try_from(seconds).unwrap_or(i64::MAX))
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    #[error("job type must not be empty")]
    EmptyJobType,

    #[error("job payload must be a key-value object, got {0}")]
    InvalidPayload(String),

    #[error("job result state must be success or failure, got {0}")]
    InvalidResultState(JobState),

    #[error("invalid job state transition: {from} -> {to}")]
    InvalidTransition { from: JobState, to: JobState },

    #[error("job {0} is already enqueued")]
    AlreadyEnqueued(JobId),

    #[error("unknown job state: {0}")]
    UnknownState(String),

    #[error("job in state {0} carries a lease expiry")]
    LeaseOutsideProcessing(JobState),
}

// ============================================================================
// Value Objects & IDs
// ============================================================================

/// Backend-assigned job identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<i64> for JobId {
    fn from(value: i64) -> Self {
        Self(value.to_string())
    }
}

impl From<u64> for JobId {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Processing,
    Success,
    Failure,
}

impl JobState {
    pub const ALL: [JobState; 4] = [
        JobState::Queued,
        JobState::Processing,
        JobState::Success,
        JobState::Failure,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Processing => "processing",
            JobState::Success => "success",
            JobState::Failure => "failure",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Success | JobState::Failure)
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Queued, JobState::Processing)
                | (JobState::Processing, JobState::Success)
                | (JobState::Processing, JobState::Failure)
                | (JobState::Processing, JobState::Queued)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobState::Queued),
            "processing" => Ok(JobState::Processing),
            "success" => Ok(JobState::Success),
            "failure" => Ok(JobState::Failure),
            other => Err(DomainError::UnknownState(other.to_string())),
        }
    }
}

// ============================================================================
// Job
// ============================================================================

/// One unit of queued work.
///
/// Type and payload are fixed at construction. Lifecycle fields only change
/// through the transition methods below, which keep `expires_time` at zero
/// outside of `Processing`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    id: Option<JobId>,
    queue_id: Option<String>,
    #[serde(rename = "type")]
    job_type: String,
    payload: Payload,
    state: JobState,
    message: Option<String>,
    num_retries: u32,
    available_time: i64,
    processed_time: i64,
    expires_time: i64,
}

/// Raw field set used by backends to rebuild a persisted job.
#[derive(Debug, Clone)]
pub struct JobParts {
    pub id: JobId,
    pub queue_id: String,
    pub job_type: String,
    pub payload: Payload,
    pub state: JobState,
    pub message: Option<String>,
    pub num_retries: u32,
    pub available_time: i64,
    pub processed_time: i64,
    pub expires_time: i64,
}

impl Job {
    /// Create a new queued job. The payload must be a JSON object.
    pub fn new(job_type: impl Into<String>, payload: Value) -> Result<Self, DomainError> {
        let job_type = job_type.into();
        if job_type.trim().is_empty() {
            return Err(DomainError::EmptyJobType);
        }
        let payload = match payload {
            Value::Object(map) => map,
            other => return Err(DomainError::InvalidPayload(value_kind(&other).to_string())),
        };

        Ok(Self {
            id: None,
            queue_id: None,
            job_type,
            payload,
            state: JobState::Queued,
            message: None,
            num_retries: 0,
            available_time: 0,
            processed_time: 0,
            expires_time: 0,
        })
    }

    /// Rebuild a job from persisted fields, rejecting inconsistent records.
    pub fn restore(parts: JobParts) -> Result<Self, DomainError> {
        if parts.job_type.trim().is_empty() {
            return Err(DomainError::EmptyJobType);
        }
        if parts.state != JobState::Processing && parts.expires_time != 0 {
            return Err(DomainError::LeaseOutsideProcessing(parts.state));
        }

        Ok(Self {
            id: Some(parts.id),
            queue_id: Some(parts.queue_id),
            job_type: parts.job_type,
            payload: parts.payload,
            state: parts.state,
            message: parts.message,
            num_retries: parts.num_retries,
            available_time: parts.available_time,
            processed_time: parts.processed_time,
            expires_time: parts.expires_time,
        })
    }

    pub fn id(&self) -> Option<&JobId> {
        self.id.as_ref()
    }

    pub fn queue_id(&self) -> Option<&str> {
        self.queue_id.as_deref()
    }

    pub fn job_type(&self) -> &str {
        &self.job_type
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn num_retries(&self) -> u32 {
        self.num_retries
    }

    pub fn available_time(&self) -> i64 {
        self.available_time
    }

    pub fn processed_time(&self) -> i64 {
        self.processed_time
    }

    pub fn expires_time(&self) -> i64 {
        self.expires_time
    }

    /// A zero availability time means "immediately".
    pub fn is_available(&self, now: i64) -> bool {
        self.state == JobState::Queued && self.available_time <= now
    }

    pub fn is_lease_expired(&self, now: i64) -> bool {
        self.state == JobState::Processing && self.expires_time > 0 && self.expires_time <= now
    }

    /// Bind a fresh job to its queue. Called by a backend on enqueue.
    pub fn assign(
        &mut self,
        id: JobId,
        queue_id: impl Into<String>,
        available_time: i64,
    ) -> Result<(), DomainError> {
        if let Some(existing) = &self.id {
            return Err(DomainError::AlreadyEnqueued(existing.clone()));
        }
        self.id = Some(id);
        self.queue_id = Some(queue_id.into());
        self.state = JobState::Queued;
        self.available_time = available_time;
        Ok(())
    }

    /// Queued -> Processing, taking a lease of `lease_time` seconds.
    pub fn begin_processing(&mut self, now: i64, lease_time: u64) -> Result<(), DomainError> {
        self.transition(JobState::Processing)?;
        self.processed_time = now;
        self.expires_time = add_seconds(now, lease_time);
        Ok(())
    }

    pub fn succeed(&mut self, message: Option<String>) -> Result<(), DomainError> {
        self.transition(JobState::Success)?;
        self.message = message;
        Ok(())
    }

    /// Processing -> Failure (retries exhausted or not allowed).
    pub fn fail(&mut self, message: Option<String>) -> Result<(), DomainError> {
        self.transition(JobState::Failure)?;
        self.message = message;
        Ok(())
    }

    /// Processing -> Queued, consuming one retry.
    pub fn schedule_retry(
        &mut self,
        now: i64,
        delay: u64,
        message: Option<String>,
    ) -> Result<(), DomainError> {
        self.transition(JobState::Queued)?;
        self.num_retries += 1;
        self.available_time = add_seconds(now, delay);
        self.message = message;
        Ok(())
    }

    /// Processing -> Queued after an abandoned lease. Retries are not consumed.
    pub fn reclaim(&mut self) -> Result<(), DomainError> {
        self.transition(JobState::Queued)
    }

    fn transition(&mut self, next: JobState) -> Result<(), DomainError> {
        if !self.state.can_transition_to(next) {
            return Err(DomainError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        if next != JobState::Processing {
            self.expires_time = 0;
        }
        Ok(())
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ============================================================================
// Aggregates
// ============================================================================

/// Number of jobs per state in one queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    pub queued: u64,
    pub processing: u64,
    pub success: u64,
    pub failure: u64,
}

impl JobCounts {
    pub fn get(&self, state: JobState) -> u64 {
        match state {
            JobState::Queued => self.queued,
            JobState::Processing => self.processing,
            JobState::Success => self.success,
            JobState::Failure => self.failure,
        }
    }

    pub fn add(&mut self, state: JobState, count: u64) {
        match state {
            JobState::Queued => self.queued += count,
            JobState::Processing => self.processing += count,
            JobState::Success => self.success += count,
            JobState::Failure => self.failure += count,
        }
    }

    pub fn total(&self) -> u64 {
        self.queued + self.processing + self.success + self.failure
    }
}
