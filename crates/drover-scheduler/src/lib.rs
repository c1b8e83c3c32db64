// SPDX-License-Identifier: GPL-3.0-or-later
pub mod error;
pub mod executor;
pub mod jobs;
pub mod processor;
pub mod queue;
pub mod registry;

use anyhow::{anyhow, Result};
use drover_config::{AppConfig, ProcessorKind};
use drover_infrastructure::Clock;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use jobs::{EchoJob, SleepJob};

/// Pause before a daemon processor retries after a backend failure.
const DAEMON_RESTART_DELAY: Duration = Duration::from_secs(5);

/// Runs every configured queue: one long-lived processor per daemon queue,
/// plus a ticker that gives each cron queue a bounded run.
pub struct Scheduler {
    config: AppConfig,
    queues: Arc<QueueSet>,
    registry: Arc<JobTypeRegistry>,
    clock: Arc<dyn Clock>,
    stop_handles: Mutex<Vec<StopHandle>>,
}

impl Scheduler {
    pub fn new(config: AppConfig, queues: Arc<QueueSet>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            queues,
            registry: Arc::new(JobTypeRegistry::new()),
            clock,
            stop_handles: Mutex::new(Vec::new()),
        }
    }

    pub fn registry(&self) -> Arc<JobTypeRegistry> {
        self.registry.clone()
    }

    pub fn queues(&self) -> Arc<QueueSet> {
        self.queues.clone()
    }

    /// Register the built-in job types
    pub async fn register_job_types(&self) {
        info!(target: "scheduler", "registering job types");
        self.registry.register(EchoJob::new()).await;
        self.registry.register(SleepJob::new(self.clock.clone())).await;
        info!(target: "scheduler", "all job types registered");
    }

    /// A fresh processor sharing this scheduler's registry and clock.
    pub fn processor(&self) -> Processor {
        Processor::new(self.registry.clone(), self.clock.clone())
            .with_idle_sleep(Duration::from_millis(self.config.processor.idle_sleep_ms))
    }

    fn tracked_processor(&self) -> Processor {
        let processor = self.processor();
        self.stop_handles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(processor.stop_handle());
        processor
    }

    /// One processing run of `queue_id`, optionally with a different budget.
    pub async fn run_once(&self, queue_id: &str, budget: Option<u64>) -> Result<usize> {
        let queue = self
            .queues
            .get(queue_id)
            .ok_or_else(|| anyhow!("unknown queue: {queue_id}"))?;
        let processor = self.tracked_processor();
        let budget = budget.unwrap_or(queue.processing_time());
        Ok(processor.process_queue_within(&queue, budget).await?)
    }

    /// Start the daemon processors and the cron ticker and return a handle
    /// that resolves once all of them have stopped.
    pub fn start(&self) -> JoinHandle<Result<()>> {
        let mut handles = Vec::new();

        for queue in self.queues.iter() {
            if queue.processor() != ProcessorKind::Daemon {
                continue;
            }
            let queue = queue.clone();
            let processor = self.tracked_processor();
            let clock = self.clock.clone();
            handles.push(tokio::spawn(async move {
                info!(target: "scheduler", queue_id = %queue.id(), "starting daemon processor");
                while !processor.is_stopped() {
                    match processor.process_queue(&queue).await {
                        Ok(processed) => {
                            info!(target: "scheduler", queue_id = %queue.id(), processed, "daemon run ended");
                        }
                        Err(err) => {
                            error!(target: "scheduler", queue_id = %queue.id(), error = %err, "daemon run failed, restarting");
                            clock.sleep(DAEMON_RESTART_DELAY).await;
                        }
                    }
                }
            }));
        }

        let has_cron = self
            .queues
            .iter()
            .any(|q| q.processor() == ProcessorKind::Cron);
        let has_daemon = !handles.is_empty();
        if has_cron || has_daemon {
            let queues = self.queues.clone();
            let processor = self.tracked_processor();
            let period = Duration::from_secs(self.config.processor.cron_interval_seconds);
            let stop = processor.stop_handle();
            handles.push(tokio::spawn(async move {
                let mut ticker = interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {}
                        _ = stop.stopped() => break,
                    }
                    for queue in queues.iter() {
                        match queue.processor() {
                            ProcessorKind::Cron => {
                                if let Err(err) = processor.process_queue(queue).await {
                                    error!(target: "scheduler", queue_id = %queue.id(), error = %err, "cron run failed");
                                }
                            }
                            // Daemon runs only sweep at startup; reclaim expired leases here.
                            ProcessorKind::Daemon => {
                                if let Err(err) = queue.backend().cleanup_queue().await {
                                    warn!(target: "scheduler", queue_id = %queue.id(), error = %err, "lease sweep failed");
                                }
                            }
                        }
                    }
                }
            }));
        }

        info!(target: "scheduler", tasks = handles.len(), "scheduler started");
        tokio::spawn(async move {
            for handle in handles {
                handle.await?;
            }
            info!(target: "scheduler", "scheduler stopped");
            Ok(())
        })
    }

    /// Ask every processor started by this scheduler to stop between jobs.
    pub fn shutdown(&self) {
        let handles = self
            .stop_handles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        info!(target: "scheduler", processors = handles.len(), "stopping processors");
        for handle in handles.iter() {
            handle.stop();
        }
    }
}

// Re-export key types for convenience
pub use error::{ProcessorError, QueueError};
pub use executor::JobExecutor;
pub use processor::{Processor, StopHandle};
pub use queue::{Queue, QueueSet};
pub use registry::JobTypeRegistry;

#[cfg(test)]
mod tests {
    use super::*;
    use drover_config::{BackendKind, QueueConfig};
    use drover_domain::JobState;
    use drover_infrastructure::ManualClock;
    use serde_json::json;

    fn memory_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.queues[0].backend = BackendKind::Memory;
        config.processor.idle_sleep_ms = 1000;
        config
    }

    fn scheduler(config: AppConfig) -> Scheduler {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(1_000));
        let queues = QueueSet::from_config(&config, None, clock.clone()).unwrap();
        Scheduler::new(config, Arc::new(queues), clock)
    }

    #[tokio::test]
    async fn run_once_processes_builtin_jobs() {
        let scheduler = scheduler(memory_config());
        scheduler.register_job_types().await;
        let queue = scheduler.queues().get("default").unwrap();
        let id = queue.enqueue("echo", json!({"msg": "hello"})).await.unwrap();

        let processed = scheduler.run_once("default", Some(3)).await.unwrap();
        assert_eq!(processed, 1);
        let job = queue.backend().load_job(&id).await.unwrap().unwrap();
        assert_eq!(job.state(), JobState::Success);
        assert_eq!(job.message(), Some("hello"));
    }

    #[tokio::test]
    async fn run_once_rejects_unknown_queue_and_unbounded_cron() {
        let scheduler = scheduler(memory_config());
        assert!(scheduler.run_once("nope", None).await.is_err());
        assert!(scheduler.run_once("default", Some(0)).await.is_err());
    }

    #[tokio::test]
    async fn daemon_processor_stops_on_shutdown() {
        let mut config = memory_config();
        let mut daemon = QueueConfig::new("worker");
        daemon.backend = BackendKind::Memory;
        daemon.processor = ProcessorKind::Daemon;
        daemon.processing_time = 0;
        config.queues = vec![daemon];

        let scheduler = scheduler(config);
        scheduler.register_job_types().await;
        let queue = scheduler.queues().get("worker").unwrap();
        let id = queue.enqueue("echo", json!({"msg": "bg"})).await.unwrap();

        let handle = scheduler.start();
        for _ in 0..1_000 {
            let job = queue.backend().load_job(&id).await.unwrap().unwrap();
            if job.state() == JobState::Success {
                break;
            }
            tokio::task::yield_now().await;
        }
        scheduler.shutdown();
        handle.await.unwrap().unwrap();

        let job = queue.backend().load_job(&id).await.unwrap().unwrap();
        assert_eq!(job.state(), JobState::Success);
    }
}
