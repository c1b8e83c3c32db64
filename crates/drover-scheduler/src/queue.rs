// SPDX-License-Identifier: GPL-3.0-or-later
use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use drover_config::{AppConfig, ProcessorKind, QueueConfig};
use drover_domain::{Job, JobCounts, JobId};
use drover_infrastructure::{build_backend, Clock, QueueBackend};
use serde_json::Value;
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::error::QueueError;

/// A named queue: processing policy plus the backend holding its jobs.
pub struct Queue {
    id: String,
    label: String,
    processor: ProcessorKind,
    processing_time: u64,
    backend: Arc<dyn QueueBackend>,
}

impl Queue {
    /// A cron-processed queue with a 90 second budget.
    pub fn new(backend: Arc<dyn QueueBackend>) -> Self {
        let id = backend.queue_id().to_string();
        Self {
            label: id.clone(),
            id,
            processor: ProcessorKind::Cron,
            processing_time: 90,
            backend,
        }
    }

    pub fn from_config(config: &QueueConfig, backend: Arc<dyn QueueBackend>) -> Self {
        let label = if config.label.is_empty() {
            config.id.clone()
        } else {
            config.label.clone()
        };
        Self {
            id: config.id.clone(),
            label,
            processor: config.processor,
            processing_time: config.processing_time,
            backend,
        }
    }

    pub fn with_processor(mut self, processor: ProcessorKind, processing_time: u64) -> Self {
        self.processor = processor;
        self.processing_time = processing_time;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn processor(&self) -> ProcessorKind {
        self.processor
    }

    /// Seconds per processing run; 0 is unbounded.
    pub fn processing_time(&self) -> u64 {
        self.processing_time
    }

    pub fn backend(&self) -> &Arc<dyn QueueBackend> {
        &self.backend
    }

    /// Producer entry point: build a job and enqueue it.
    pub async fn enqueue(
        &self,
        job_type: impl Into<String> + Send,
        payload: Value,
    ) -> Result<JobId, QueueError> {
        self.enqueue_delayed(job_type, payload, 0).await
    }

    pub async fn enqueue_delayed(
        &self,
        job_type: impl Into<String> + Send,
        payload: Value,
        delay: u64,
    ) -> Result<JobId, QueueError> {
        let job = Job::new(job_type, payload)?;
        self.enqueue_job_delayed(job, delay).await
    }

    pub async fn enqueue_job(&self, job: Job) -> Result<JobId, QueueError> {
        self.enqueue_job_delayed(job, 0).await
    }

    pub async fn enqueue_job_delayed(&self, job: Job, delay: u64) -> Result<JobId, QueueError> {
        let job_type = job.job_type().to_string();
        let id = self.backend.enqueue_delayed(job, delay).await?;
        debug!(target: "queue", queue_id = %self.id, job_id = %id, %job_type, delay, "job enqueued");
        Ok(id)
    }

    pub async fn count_jobs(&self) -> Result<JobCounts, QueueError> {
        Ok(self.backend.count_jobs().await?)
    }
}

/// All configured queues keyed by id.
#[derive(Default)]
pub struct QueueSet {
    queues: BTreeMap<String, Arc<Queue>>,
}

impl QueueSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(
        config: &AppConfig,
        pool: Option<&SqlitePool>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let mut set = Self::new();
        for queue_config in &config.queues {
            let backend = build_backend(queue_config, pool, clock.clone())?;
            set.insert(Queue::from_config(queue_config, backend));
        }
        info!(target: "queue", queues = set.len(), "queues configured");
        Ok(set)
    }

    pub fn insert(&mut self, queue: Queue) {
        self.queues.insert(queue.id().to_string(), Arc::new(queue));
    }

    pub fn get(&self, id: &str) -> Option<Arc<Queue>> {
        self.queues.get(id).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Queue>> {
        self.queues.values()
    }

    pub fn len(&self) -> usize {
        self.queues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }
}
