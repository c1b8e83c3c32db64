// SPDX-License-Identifier: GPL-3.0-or-later
use crate::executor::JobExecutor;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Lookup from a job's type string to the executor that runs it.
#[derive(Default)]
pub struct JobTypeRegistry {
    executors: RwLock<HashMap<String, Arc<dyn JobExecutor>>>,
}

impl JobTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an executor under its own job type, replacing any previous one.
    pub async fn register(&self, executor: impl JobExecutor + 'static) {
        self.register_arc(Arc::new(executor)).await;
    }

    pub async fn register_arc(&self, executor: Arc<dyn JobExecutor>) {
        let job_type = executor.job_type().to_string();
        let mut executors = self.executors.write().await;
        if executors.contains_key(&job_type) {
            warn!(target: "registry", %job_type, "replacing registered job type");
        }
        info!(
            target: "registry",
            %job_type,
            label = %executor.label(),
            max_retries = executor.max_retries(),
            retry_delay = executor.retry_delay_seconds(),
            "registering job type"
        );
        executors.insert(job_type, executor);
    }

    pub async fn get(&self, job_type: &str) -> Option<Arc<dyn JobExecutor>> {
        self.executors.read().await.get(job_type).cloned()
    }

    pub async fn contains(&self, job_type: &str) -> bool {
        self.executors.read().await.contains_key(job_type)
    }

    /// Registered job types, sorted.
    pub async fn job_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.executors.read().await.keys().cloned().collect();
        types.sort();
        types
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use drover_domain::{Job, JobResult};

    struct Fixed(&'static str, u32);

    #[async_trait::async_trait]
    impl JobExecutor for Fixed {
        fn job_type(&self) -> &'static str {
            self.0
        }

        async fn process(&self, _job: &Job) -> Result<JobResult> {
            Ok(JobResult::success())
        }

        fn max_retries(&self) -> u32 {
            self.1
        }
    }

    #[tokio::test]
    async fn register_and_lookup() {
        let registry = JobTypeRegistry::new();
        registry.register(Fixed("b", 1)).await;
        registry.register(Fixed("a", 2)).await;

        assert!(registry.contains("a").await);
        assert!(registry.get("missing").await.is_none());
        assert_eq!(registry.get("a").await.unwrap().max_retries(), 2);
        assert_eq!(registry.job_types().await, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn later_registration_replaces_earlier() {
        let registry = JobTypeRegistry::new();
        registry.register(Fixed("a", 1)).await;
        registry.register(Fixed("a", 5)).await;

        assert_eq!(registry.job_types().await.len(), 1);
        assert_eq!(registry.get("a").await.unwrap().max_retries(), 5);
    }

    #[test]
    fn executor_defaults() {
        let executor = Fixed("a", 0);
        assert_eq!(executor.label(), "a");
        assert_eq!(executor.retry_delay_seconds(), 10);
        let dynamic: Arc<dyn JobExecutor> = Arc::new(executor);
        assert!(format!("{dynamic:?}").contains("\"a\""));
    }
}
