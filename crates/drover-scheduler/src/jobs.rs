// SPDX-License-Identifier: GPL-3.0-or-later
use crate::executor::JobExecutor;
use anyhow::Result;
use drover_domain::{Job, JobResult};
use drover_infrastructure::Clock;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Succeeds with the payload's `msg` as its message.
#[derive(Debug, Default, Clone)]
pub struct EchoJob;

impl EchoJob {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl JobExecutor for EchoJob {
    fn job_type(&self) -> &'static str {
        "echo"
    }

    fn label(&self) -> String {
        "Echo".to_string()
    }

    async fn process(&self, job: &Job) -> Result<JobResult> {
        let msg = job
            .payload()
            .get("msg")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        info!(target: "jobs", job_id = ?job.id(), %msg, "echo");
        Ok(JobResult::success_with_message(msg))
    }
}

/// Waits `seconds` (from the payload) before succeeding.
pub struct SleepJob {
    clock: Arc<dyn Clock>,
}

impl SleepJob {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

#[async_trait::async_trait]
impl JobExecutor for SleepJob {
    fn job_type(&self) -> &'static str {
        "sleep"
    }

    fn label(&self) -> String {
        "Sleep".to_string()
    }

    async fn process(&self, job: &Job) -> Result<JobResult> {
        let Some(seconds) = job.payload().get("seconds").and_then(|v| v.as_u64()) else {
            // Retrying cannot fix a bad payload
            return Ok(JobResult::permanent_failure(
                "payload field `seconds` must be a non-negative integer",
            ));
        };

        debug!(target: "jobs", job_id = ?job.id(), seconds, "sleeping");
        self.clock.sleep(Duration::from_secs(seconds)).await;
        Ok(JobResult::success_with_message(format!("slept {seconds}s")))
    }

    fn max_retries(&self) -> u32 {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drover_domain::JobState;
    use drover_infrastructure::ManualClock;
    use serde_json::json;

    #[tokio::test]
    async fn echo_reports_message() {
        let job = Job::new("echo", json!({"msg": "hi"})).unwrap();
        let result = EchoJob::new().process(&job).await.unwrap();
        assert!(result.is_success());
        assert_eq!(result.message(), Some("hi"));
    }

    #[tokio::test]
    async fn echo_without_message_still_succeeds() {
        let job = Job::new("echo", json!({})).unwrap();
        let result = EchoJob::new().process(&job).await.unwrap();
        assert_eq!(result.message(), Some(""));
    }

    #[tokio::test]
    async fn sleep_uses_the_injected_clock() {
        let clock = Arc::new(ManualClock::new(0));
        let executor = SleepJob::new(clock.clone());
        let job = Job::new("sleep", json!({"seconds": 42})).unwrap();

        let result = executor.process(&job).await.unwrap();
        assert!(result.is_success());
        assert_eq!(clock.now(), 42);
    }

    #[tokio::test]
    async fn sleep_rejects_bad_payload_without_retry() {
        let executor = SleepJob::new(Arc::new(ManualClock::new(0)));
        let job = Job::new("sleep", json!({"seconds": "soon"})).unwrap();

        let result = executor.process(&job).await.unwrap();
        assert_eq!(result.state(), JobState::Failure);
        assert_eq!(result.max_retries(), Some(0));
    }

    #[test]
    fn job_type_names() {
        assert_eq!(EchoJob::new().job_type(), "echo");
        assert_eq!(SleepJob::new(Arc::new(ManualClock::new(0))).job_type(), "sleep");
        assert_eq!(EchoJob::new().max_retries(), 0);
        assert_eq!(EchoJob::new().retry_delay_seconds(), 10);
    }
}
