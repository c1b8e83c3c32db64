// SPDX-License-Identifier: GPL-3.0-or-later
use crate::{DomainError, JobState};
use serde::Serialize;

/// Outcome reported by a job type after running a job.
///
/// Only `Success` and `Failure` are valid. Retry overrides left as `None`
/// fall back to the job type's defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobResult {
    state: JobState,
    message: Option<String>,
    max_retries: Option<u32>,
    retry_delay: Option<u64>,
}

impl JobResult {
    pub fn new(
        state: JobState,
        message: Option<String>,
        max_retries: Option<u32>,
        retry_delay: Option<u64>,
    ) -> Result<Self, DomainError> {
        if !state.is_terminal() {
            return Err(DomainError::InvalidResultState(state));
        }
        Ok(Self {
            state,
            message,
            max_retries,
            retry_delay,
        })
    }

    pub fn success() -> Self {
        Self {
            state: JobState::Success,
            message: None,
            max_retries: None,
            retry_delay: None,
        }
    }

    pub fn success_with_message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::success()
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            state: JobState::Failure,
            message: Some(message.into()),
            max_retries: None,
            retry_delay: None,
        }
    }

    /// Failure that overrides the job type's retry policy.
    pub fn failure_with_retry(message: impl Into<String>, max_retries: u32, retry_delay: u64) -> Self {
        Self {
            max_retries: Some(max_retries),
            retry_delay: Some(retry_delay),
            ..Self::failure(message)
        }
    }

    /// Failure that must never be retried.
    pub fn permanent_failure(message: impl Into<String>) -> Self {
        Self {
            max_retries: Some(0),
            ..Self::failure(message)
        }
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn is_success(&self) -> bool {
        self.state == JobState::Success
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn max_retries(&self) -> Option<u32> {
        self.max_retries
    }

    pub fn retry_delay(&self) -> Option<u64> {
        self.retry_delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_rejects_non_terminal_states() {
        assert_eq!(
            JobResult::new(JobState::Queued, None, None, None).unwrap_err(),
            DomainError::InvalidResultState(JobState::Queued)
        );
        assert!(JobResult::new(JobState::Processing, None, None, None).is_err());
        assert!(JobResult::new(JobState::Failure, Some("x".into()), Some(1), None).is_ok());
    }

    #[test]
    fn failure_without_overrides_defers_to_job_type() {
        let result = JobResult::failure("boom");
        assert_eq!(result.state(), JobState::Failure);
        assert_eq!(result.message(), Some("boom"));
        assert_eq!(result.max_retries(), None);
        assert_eq!(result.retry_delay(), None);
    }

    #[test]
    fn overrides_are_carried() {
        let result = JobResult::failure_with_retry("later", 4, 30);
        assert_eq!(result.max_retries(), Some(4));
        assert_eq!(result.retry_delay(), Some(30));

        let permanent = JobResult::permanent_failure("no");
        assert_eq!(permanent.max_retries(), Some(0));
        assert!(!permanent.is_success());
    }
}
