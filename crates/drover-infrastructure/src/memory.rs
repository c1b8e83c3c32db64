// SPDX-License-Identifier: GPL-3.0-or-later
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use drover_config::RetentionPolicy;
use drover_domain::{add_seconds, DomainError, Job, JobCounts, JobId, JobState};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::{
    retention_cutoff, BackendError, ClaimedJob, CleanupReport, Lease, QueueBackend, Result,
};
use crate::clock::Clock;

struct Entry {
    job: Job,
    lease_token: Option<Uuid>,
}

#[derive(Default)]
struct Store {
    next_id: u64,
    jobs: BTreeMap<u64, Entry>,
}

/// In-process backend. Every operation runs under one mutex, which makes
/// claims atomic across tasks sharing the instance.
pub struct MemoryBackend {
    queue_id: String,
    lease_time: u64,
    retention: RetentionPolicy,
    clock: Arc<dyn Clock>,
    store: Mutex<Store>,
}

impl MemoryBackend {
    pub fn new(queue_id: impl Into<String>, lease_time: u64, clock: Arc<dyn Clock>) -> Self {
        Self {
            queue_id: queue_id.into(),
            lease_time,
            retention: RetentionPolicy::All,
            clock,
            store: Mutex::new(Store::default()),
        }
    }

    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }

    fn store(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(|poisoned| {
            warn!(target: "backend", queue_id = %self.queue_id, "memory store mutex poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Apply `commit` to the leased job if the lease is still held.
    fn commit<F>(&self, lease: &Lease, commit: F) -> Result<()>
    where
        F: FnOnce(&mut Job) -> std::result::Result<(), DomainError>,
    {
        let mut store = self.store();
        let entry = parse_key(&lease.job_id)
            .and_then(|key| store.jobs.get_mut(&key))
            .filter(|entry| {
                entry.lease_token == Some(lease.token) && entry.job.state() == JobState::Processing
            })
            .ok_or_else(|| BackendError::LeaseLost(lease.job_id.clone()))?;

        commit(&mut entry.job)?;
        entry.lease_token = None;
        Ok(())
    }
}

fn parse_key(id: &JobId) -> Option<u64> {
    id.as_str().parse().ok()
}

#[async_trait::async_trait]
impl QueueBackend for MemoryBackend {
    fn queue_id(&self) -> &str {
        &self.queue_id
    }

    async fn enqueue_delayed(&self, mut job: Job, delay: u64) -> Result<JobId> {
        let now = self.clock.now();
        let mut store = self.store();
        store.next_id += 1;
        let key = store.next_id;
        let id = JobId::from(key);

        job.assign(id.clone(), self.queue_id.as_str(), add_seconds(now, delay))?;
        debug!(target: "backend", queue_id = %self.queue_id, job_id = %id, job_type = job.job_type(), delay, "enqueued job");
        store.jobs.insert(
            key,
            Entry {
                job,
                lease_token: None,
            },
        );
        Ok(id)
    }

    async fn claim_job(&self) -> Result<Option<ClaimedJob>> {
        let now = self.clock.now();
        let mut store = self.store();

        let next = store
            .jobs
            .iter()
            .filter(|(_, entry)| entry.job.is_available(now))
            .min_by_key(|(key, entry)| (entry.job.available_time(), **key))
            .map(|(key, _)| *key);

        let Some(key) = next else {
            return Ok(None);
        };
        let Some(entry) = store.jobs.get_mut(&key) else {
            return Ok(None);
        };

        entry.job.begin_processing(now, self.lease_time)?;
        let token = Uuid::new_v4();
        entry.lease_token = Some(token);

        let lease = Lease {
            job_id: JobId::from(key),
            token,
            expires: entry.job.expires_time(),
        };
        debug!(target: "backend", queue_id = %self.queue_id, job_id = %lease.job_id, expires = lease.expires, "claimed job");
        Ok(Some(ClaimedJob {
            job: entry.job.clone(),
            lease,
        }))
    }

    async fn on_success(&self, lease: &Lease, message: Option<&str>) -> Result<()> {
        self.commit(lease, |job| job.succeed(message.map(str::to_string)))
    }

    async fn on_failure(&self, lease: &Lease, message: Option<&str>) -> Result<()> {
        self.commit(lease, |job| job.fail(message.map(str::to_string)))
    }

    async fn retry_job(&self, lease: &Lease, message: Option<&str>, delay: u64) -> Result<()> {
        let now = self.clock.now();
        self.commit(lease, |job| {
            job.schedule_retry(now, delay, message.map(str::to_string))
        })
    }

    async fn count_jobs(&self) -> Result<JobCounts> {
        let store = self.store();
        let mut counts = JobCounts::default();
        for entry in store.jobs.values() {
            counts.add(entry.job.state(), 1);
        }
        Ok(counts)
    }

    async fn cleanup_queue(&self) -> Result<CleanupReport> {
        let now = self.clock.now();
        let mut store = self.store();
        let mut report = CleanupReport::default();

        for entry in store.jobs.values_mut() {
            if entry.job.is_lease_expired(now) {
                entry.job.reclaim()?;
                entry.lease_token = None;
                report.reclaimed += 1;
            }
        }

        let doomed: Vec<u64> = match self.retention {
            RetentionPolicy::All => Vec::new(),
            RetentionPolicy::Items(keep) => {
                let mut finished: Vec<(i64, u64)> = store
                    .jobs
                    .iter()
                    .filter(|(_, entry)| entry.job.state().is_terminal())
                    .map(|(key, entry)| (entry.job.processed_time(), *key))
                    .collect();
                finished.sort_unstable_by(|a, b| b.cmp(a));
                finished
                    .into_iter()
                    .skip(keep as usize)
                    .map(|(_, key)| key)
                    .collect()
            }
            RetentionPolicy::Days(_) => {
                let cutoff = retention_cutoff(self.retention, now).unwrap_or(i64::MIN);
                store
                    .jobs
                    .iter()
                    .filter(|(_, entry)| {
                        entry.job.state().is_terminal() && entry.job.processed_time() < cutoff
                    })
                    .map(|(key, _)| *key)
                    .collect()
            }
        };
        for key in &doomed {
            store.jobs.remove(key);
        }
        report.purged = doomed.len() as u64;

        if report.reclaimed > 0 || report.purged > 0 {
            info!(target: "backend", queue_id = %self.queue_id, reclaimed = report.reclaimed, purged = report.purged, "cleaned up queue");
        }
        Ok(report)
    }

    async fn load_job(&self, id: &JobId) -> Result<Option<Job>> {
        let store = self.store();
        Ok(parse_key(id)
            .and_then(|key| store.jobs.get(&key))
            .map(|entry| entry.job.clone()))
    }

    async fn list_jobs(&self, state: Option<JobState>, limit: usize) -> Result<Vec<Job>> {
        let store = self.store();
        Ok(store
            .jobs
            .values()
            .filter(|entry| state.map_or(true, |s| entry.job.state() == s))
            .take(limit)
            .map(|entry| entry.job.clone())
            .collect())
    }

    async fn delete_job(&self, id: &JobId) -> Result<bool> {
        let mut store = self.store();
        Ok(parse_key(id)
            .and_then(|key| store.jobs.remove(&key))
            .is_some())
    }
}
