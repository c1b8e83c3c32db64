// SPDX-License-Identifier: GPL-3.0-or-later
//! Claim, execute, resolve.
//!
//! A processor drives one queue at a time, one job at a time. Scaling out means
//! running more processors against the same backend; the backend's atomic claim
//! keeps them from sharing a job.
//!
//! The time budget is checked between jobs only. A job that runs longer than
//! the remaining budget is not interrupted and the run overruns by that much.
use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use drover_config::ProcessorKind;
use drover_domain::{add_seconds, Job, JobResult};
use drover_infrastructure::{BackendError, ClaimedJob, Clock};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::error::ProcessorError;
use crate::executor::JobExecutor;
use crate::queue::Queue;
use crate::registry::JobTypeRegistry;

pub type Result<T> = std::result::Result<T, ProcessorError>;

/// Cooperative stop flag shared between a processor and whoever stops it.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Resolves once `stop` has been called.
    pub async fn stopped(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_stopped() {
                return;
            }
            notified.await;
        }
    }
}

enum Outcome {
    /// The executor ran and reported a result.
    Reported {
        result: JobResult,
        executor: Arc<dyn JobExecutor>,
    },
    /// The executor errored, panicked, or could not be resolved.
    Defect(JobResult),
}

#[derive(Clone, Copy)]
enum Disposition {
    Succeed,
    Retry(u64),
    Fail,
}

pub struct Processor {
    registry: Arc<JobTypeRegistry>,
    clock: Arc<dyn Clock>,
    idle_sleep: Duration,
    stop: StopHandle,
}

impl Processor {
    pub fn new(registry: Arc<JobTypeRegistry>, clock: Arc<dyn Clock>) -> Self {
        Self {
            registry,
            clock,
            idle_sleep: Duration::from_secs(1),
            stop: StopHandle::default(),
        }
    }

    pub fn with_idle_sleep(mut self, idle_sleep: Duration) -> Self {
        self.idle_sleep = idle_sleep;
        self
    }

    /// Stop after the job in flight, if any. The flag stays raised.
    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_stopped()
    }

    /// Process `queue` within its configured time budget.
    pub async fn process_queue(&self, queue: &Queue) -> Result<usize> {
        self.process_queue_within(queue, queue.processing_time()).await
    }

    /// Process `queue` for at most `budget` seconds (0 is unbounded, daemon
    /// queues only). Returns the number of jobs processed.
    pub async fn process_queue_within(&self, queue: &Queue, budget: u64) -> Result<usize> {
        if budget == 0 && queue.processor() == ProcessorKind::Cron {
            return Err(ProcessorError::UnboundedCronRun {
                queue_id: queue.id().to_string(),
            });
        }

        let backend = queue.backend();
        backend.cleanup_queue().await?;

        let deadline = (budget > 0).then(|| add_seconds(self.clock.now(), budget));
        let mut processed = 0;
        info!(target: "processor", queue_id = %queue.id(), budget, "processing queue");

        loop {
            if self.stop.is_stopped() {
                info!(target: "processor", queue_id = %queue.id(), "stop requested");
                break;
            }
            if deadline.is_some_and(|deadline| self.clock.now() >= deadline) {
                debug!(target: "processor", queue_id = %queue.id(), "time budget spent");
                break;
            }

            match backend.claim_job().await? {
                Some(claimed) => {
                    self.process_job(claimed, queue).await?;
                    processed += 1;
                }
                None => self.clock.sleep(self.idle_sleep).await,
            }
        }

        info!(target: "processor", queue_id = %queue.id(), processed, "finished processing queue");
        Ok(processed)
    }

    /// Execute one claimed job and commit its outcome to the queue's backend.
    ///
    /// A lost lease at commit time is logged and otherwise ignored; other
    /// backend errors propagate.
    pub async fn process_job(&self, claimed: ClaimedJob, queue: &Queue) -> Result<JobResult> {
        let ClaimedJob { job, lease } = claimed;
        let job_type = job.job_type().to_string();
        let num_retries = job.num_retries();

        debug!(target: "processor", queue_id = %queue.id(), job_id = %lease.job_id, %job_type, num_retries, "processing job");

        let outcome = match self.registry.get(&job_type).await {
            Some(executor) => match run_executor(executor.clone(), job).await {
                Ok(result) => Outcome::Reported { result, executor },
                Err(defect) => {
                    error!(
                        target: "processor",
                        queue_id = %queue.id(),
                        job_id = %lease.job_id,
                        %job_type,
                        error = %defect,
                        "job executor failed unexpectedly"
                    );
                    Outcome::Defect(JobResult::failure(defect))
                }
            },
            None => {
                warn!(target: "processor", queue_id = %queue.id(), job_id = %lease.job_id, %job_type, "unknown job type");
                Outcome::Defect(JobResult::failure(format!("Unknown job type: {job_type}")))
            }
        };

        let (result, disposition) = match outcome {
            Outcome::Defect(result) => (result, Disposition::Fail),
            Outcome::Reported { result, executor } => {
                let disposition = if result.is_success() {
                    Disposition::Succeed
                } else {
                    let max_retries = result
                        .max_retries()
                        .unwrap_or_else(|| executor.max_retries());
                    let delay = result
                        .retry_delay()
                        .unwrap_or_else(|| executor.retry_delay_seconds());
                    if num_retries < max_retries {
                        Disposition::Retry(delay)
                    } else {
                        Disposition::Fail
                    }
                };
                (result, disposition)
            }
        };

        let backend = queue.backend();
        let committed = match disposition {
            Disposition::Succeed => backend.on_success(&lease, result.message()).await,
            Disposition::Retry(delay) => {
                backend.retry_job(&lease, result.message(), delay).await
            }
            Disposition::Fail => backend.on_failure(&lease, result.message()).await,
        };

        match committed {
            Ok(()) => {
                info!(
                    target: "processor",
                    queue_id = %queue.id(),
                    job_id = %lease.job_id,
                    %job_type,
                    state = %result.state(),
                    retried = matches!(disposition, Disposition::Retry(_)),
                    message = result.message().unwrap_or_default(),
                    "job processed"
                );
            }
            Err(BackendError::LeaseLost(job_id)) => {
                warn!(target: "processor", queue_id = %queue.id(), %job_id, %job_type, "lease lost before commit, outcome discarded");
            }
            Err(err) => return Err(err.into()),
        }

        Ok(result)
    }
}

/// Run the executor on its own task so a panic is caught at the join.
async fn run_executor(
    executor: Arc<dyn JobExecutor>,
    job: Job,
) -> std::result::Result<JobResult, String> {
    let handle = tokio::spawn(async move { executor.process(&job).await });
    match handle.await {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(err)) => Err(format!("{err:#}")),
        Err(join_err) if join_err.is_panic() => Err(panic_message(join_err.into_panic())),
        Err(join_err) => Err(join_err.to_string()),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("job executor panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("job executor panicked: {s}")
    } else {
        "job executor panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_handle_is_shared() {
        let handle = StopHandle::default();
        let clone = handle.clone();
        assert!(!clone.is_stopped());
        handle.stop();
        assert!(clone.is_stopped());
    }

    #[tokio::test]
    async fn stopped_wakes_waiters() {
        let handle = StopHandle::default();
        let waiter = handle.clone();
        let task = tokio::spawn(async move { waiter.stopped().await });
        tokio::task::yield_now().await;
        handle.stop();
        task.await.unwrap();

        // Already stopped resolves immediately.
        handle.stopped().await;
    }

    #[test]
    fn panic_messages_are_extracted() {
        assert_eq!(
            panic_message(Box::new("oops")),
            "job executor panicked: oops"
        );
        assert_eq!(
            panic_message(Box::new(String::from("bad"))),
            "job executor panicked: bad"
        );
        assert_eq!(panic_message(Box::new(42u8)), "job executor panicked");
    }
}
