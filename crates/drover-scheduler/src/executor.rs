// SPDX-License-Identifier: GPL-3.0-or-later
use anyhow::Result;
use drover_domain::{Job, JobResult};
use std::fmt;

/// Executable logic behind one job type.
///
/// Expected failures are reported as a failed [`JobResult`] and follow the
/// retry policy. Returning `Err` or panicking marks a defect: the job fails
/// immediately and is never retried.
#[async_trait::async_trait]
pub trait JobExecutor: Send + Sync {
    /// Registry key matched against `Job::job_type`
    fn job_type(&self) -> &'static str;

    /// Human-readable job type name
    fn label(&self) -> String {
        self.job_type().to_string()
    }

    async fn process(&self, job: &Job) -> Result<JobResult>;

    /// Retries allowed when a result does not override it
    fn max_retries(&self) -> u32 {
        0
    }

    /// Delay in seconds before a retried job becomes available again
    fn retry_delay_seconds(&self) -> u64 {
        10
    }
}

impl fmt::Debug for dyn JobExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobExecutor")
            .field("type", &self.job_type())
            .field("label", &self.label())
            .field("max_retries", &self.max_retries())
            .field("retry_delay_seconds", &self.retry_delay_seconds())
            .finish()
    }
}
