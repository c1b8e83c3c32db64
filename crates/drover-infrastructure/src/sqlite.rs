// SPDX-License-Identifier: GPL-3.0-or-later
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use drover_config::RetentionPolicy;
use drover_domain::{add_seconds, Job, JobCounts, JobId, JobParts, JobState, Payload};
use sqlx::sqlite::{SqliteQueryResult, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::{
    retention_cutoff, BackendError, ClaimedJob, CleanupReport, Lease, QueueBackend, Result,
};
use crate::clock::Clock;

const CLAIM_SQL: &str = r#"
    UPDATE drover_jobs
    SET state = 'processing', processed = ?, expires = ?, lease_token = ?
    WHERE job_id = (
        SELECT job_id FROM drover_jobs
        WHERE queue_id = ? AND state = 'queued' AND available <= ?
        ORDER BY available, job_id
        LIMIT 1
    )
    AND state = 'queued'
    RETURNING *
"#;

const FINISH_SQL: &str = r#"
    UPDATE drover_jobs
    SET state = ?, message = ?, expires = 0, lease_token = NULL
    WHERE job_id = ? AND queue_id = ? AND state = 'processing' AND lease_token = ?
"#;

const RETRY_SQL: &str = r#"
    UPDATE drover_jobs
    SET state = 'queued', message = ?, num_retries = num_retries + 1,
        available = ?, expires = 0, lease_token = NULL
    WHERE job_id = ? AND queue_id = ? AND state = 'processing' AND lease_token = ?
"#;

const RECLAIM_SQL: &str = r#"
    UPDATE drover_jobs
    SET state = 'queued', expires = 0, lease_token = NULL
    WHERE queue_id = ? AND state = 'processing' AND expires > 0 AND expires <= ?
"#;

const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

/// Write attempts before lock contention is reported as unavailability.
/// Most attempts already wait up to the connection's busy timeout; a WAL
/// snapshot conflict (`SQLITE_BUSY_SNAPSHOT`) fails at once and needs a retry.
const CONTENDED_ATTEMPTS: u32 = 10;
const CONTENDED_BACKOFF: Duration = Duration::from_millis(10);

/// SQLx-backed queue storage. One instance serves one queue of the shared
/// `drover_jobs` table.
pub struct SqliteBackend {
    pool: SqlitePool,
    queue_id: String,
    lease_time: u64,
    retention: RetentionPolicy,
    clock: Arc<dyn Clock>,
}

impl SqliteBackend {
    pub fn new(
        pool: SqlitePool,
        queue_id: impl Into<String>,
        lease_time: u64,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            pool,
            queue_id: queue_id.into(),
            lease_time,
            retention: RetentionPolicy::All,
            clock,
        }
    }

    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }

    /// Run a write, retrying while another connection holds the lock.
    async fn write<T, F, Fut>(&self, op: &'static str, mut attempt: F) -> Result<T>
    where
        T: Send,
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = std::result::Result<T, sqlx::Error>> + Send,
    {
        let mut tries = 1;
        loop {
            match attempt().await {
                Ok(value) => return Ok(value),
                Err(err) if is_contention(&err) && tries < CONTENDED_ATTEMPTS => {
                    debug!(target: "backend", queue_id = %self.queue_id, op, tries, error = %err, "database busy, retrying");
                    tokio::time::sleep(CONTENDED_BACKOFF * tries).await;
                    tries += 1;
                }
                Err(err) => {
                    if is_contention(&err) {
                        warn!(target: "backend", queue_id = %self.queue_id, op, tries, "database still busy, giving up");
                    }
                    return Err(err.into());
                }
            }
        }
    }

    async fn finish(&self, lease: &Lease, state: JobState, message: Option<&str>) -> Result<()> {
        let Some(key) = parse_key(&lease.job_id) else {
            return Err(BackendError::LeaseLost(lease.job_id.clone()));
        };
        let (pool, queue_id) = (&self.pool, self.queue_id.as_str());
        let token = lease.token.to_string();
        let res = self
            .write("finish", || {
                sqlx::query(FINISH_SQL)
                    .bind(state.as_str())
                    .bind(message)
                    .bind(key)
                    .bind(queue_id)
                    .bind(token.clone())
                    .execute(pool)
            })
            .await?;

        if res.rows_affected() == 0 {
            return Err(BackendError::LeaseLost(lease.job_id.clone()));
        }
        debug!(target: "backend", queue_id = %self.queue_id, job_id = %lease.job_id, %state, "committed job");
        Ok(())
    }

    async fn purge(&self, now: i64) -> Result<u64> {
        let (pool, queue_id) = (&self.pool, self.queue_id.as_str());
        let res: SqliteQueryResult = match self.retention {
            RetentionPolicy::All => return Ok(0),
            RetentionPolicy::Items(keep) => {
                let q = r#"
                    DELETE FROM drover_jobs
                    WHERE queue_id = ? AND state IN ('success', 'failure')
                    AND job_id NOT IN (
                        SELECT job_id FROM drover_jobs
                        WHERE queue_id = ? AND state IN ('success', 'failure')
                        ORDER BY processed DESC, job_id DESC
                        LIMIT ?
                    )
                "#;
                let keep = i64::try_from(keep).unwrap_or(i64::MAX);
                self.write("purge", || {
                    sqlx::query(q)
                        .bind(queue_id)
                        .bind(queue_id)
                        .bind(keep)
                        .execute(pool)
                })
                .await?
            }
            RetentionPolicy::Days(_) => {
                let cutoff = retention_cutoff(self.retention, now).unwrap_or(i64::MIN);
                self.write("purge", || {
                    sqlx::query(
                        "DELETE FROM drover_jobs WHERE queue_id = ? AND state IN ('success', 'failure') AND processed < ?",
                    )
                    .bind(queue_id)
                    .bind(cutoff)
                    .execute(pool)
                })
                .await?
            }
        };
        Ok(res.rows_affected())
    }
}

#[async_trait::async_trait]
impl QueueBackend for SqliteBackend {
    fn queue_id(&self) -> &str {
        &self.queue_id
    }

    async fn enqueue_delayed(&self, job: Job, delay: u64) -> Result<JobId> {
        if let Some(existing) = job.id() {
            return Err(drover_domain::DomainError::AlreadyEnqueued(existing.clone()).into());
        }
        let available = add_seconds(self.clock.now(), delay);
        let payload = serde_json::to_string(job.payload())?;

        let q = r#"
            INSERT INTO drover_jobs (
                queue_id, type, payload, state, message, num_retries,
                available, processed, expires, lease_token
            ) VALUES (?, ?, ?, 'queued', NULL, 0, ?, 0, 0, NULL)
        "#;
        let (pool, queue_id) = (&self.pool, self.queue_id.as_str());
        let job_type = job.job_type();
        let res = self
            .write("enqueue", || {
                sqlx::query(q)
                    .bind(queue_id)
                    .bind(job_type)
                    .bind(payload.clone())
                    .bind(available)
                    .execute(pool)
            })
            .await?;

        let id = JobId::from(res.last_insert_rowid());
        debug!(target: "backend", queue_id = %self.queue_id, job_id = %id, job_type, delay, "enqueued job");
        Ok(id)
    }

    async fn claim_job(&self) -> Result<Option<ClaimedJob>> {
        let now = self.clock.now();
        let expires = add_seconds(now, self.lease_time);
        let token = Uuid::new_v4();
        let token_s = token.to_string();
        let (pool, queue_id) = (&self.pool, self.queue_id.as_str());

        let row = self
            .write("claim", || {
                sqlx::query(CLAIM_SQL)
                    .bind(now)
                    .bind(expires)
                    .bind(token_s.clone())
                    .bind(queue_id)
                    .bind(now)
                    .fetch_optional(pool)
            })
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let job = row_to_job(&row)?;
        let lease = Lease {
            job_id: job
                .id()
                .cloned()
                .ok_or_else(|| corrupt("?", "claimed row without id"))?,
            token,
            expires,
        };
        debug!(target: "backend", queue_id = %self.queue_id, job_id = %lease.job_id, expires, "claimed job");
        Ok(Some(ClaimedJob { job, lease }))
    }

    async fn on_success(&self, lease: &Lease, message: Option<&str>) -> Result<()> {
        self.finish(lease, JobState::Success, message).await
    }

    async fn on_failure(&self, lease: &Lease, message: Option<&str>) -> Result<()> {
        self.finish(lease, JobState::Failure, message).await
    }

    async fn retry_job(&self, lease: &Lease, message: Option<&str>, delay: u64) -> Result<()> {
        let Some(key) = parse_key(&lease.job_id) else {
            return Err(BackendError::LeaseLost(lease.job_id.clone()));
        };
        let available = add_seconds(self.clock.now(), delay);
        let (pool, queue_id) = (&self.pool, self.queue_id.as_str());
        let token = lease.token.to_string();
        let res = self
            .write("retry", || {
                sqlx::query(RETRY_SQL)
                    .bind(message)
                    .bind(available)
                    .bind(key)
                    .bind(queue_id)
                    .bind(token.clone())
                    .execute(pool)
            })
            .await?;

        if res.rows_affected() == 0 {
            return Err(BackendError::LeaseLost(lease.job_id.clone()));
        }
        debug!(target: "backend", queue_id = %self.queue_id, job_id = %lease.job_id, available, "scheduled retry");
        Ok(())
    }

    async fn count_jobs(&self) -> Result<JobCounts> {
        let rows = sqlx::query(
            "SELECT state, COUNT(*) AS n FROM drover_jobs WHERE queue_id = ? GROUP BY state",
        )
        .bind(&self.queue_id)
        .fetch_all(&self.pool)
        .await?;

        let mut counts = JobCounts::default();
        for row in rows {
            let state: String = column(&row, "count", "state")?;
            let n: i64 = column(&row, "count", "n")?;
            let state = state
                .parse::<JobState>()
                .map_err(|e| corrupt("count", e.to_string()))?;
            counts.add(state, n.max(0) as u64);
        }
        Ok(counts)
    }

    async fn cleanup_queue(&self) -> Result<CleanupReport> {
        let now = self.clock.now();
        let (pool, queue_id) = (&self.pool, self.queue_id.as_str());
        let reclaimed = self
            .write("reclaim", || {
                sqlx::query(RECLAIM_SQL)
                    .bind(queue_id)
                    .bind(now)
                    .execute(pool)
            })
            .await?
            .rows_affected();

        let report = CleanupReport {
            reclaimed,
            purged: self.purge(now).await?,
        };
        if report.reclaimed > 0 || report.purged > 0 {
            info!(target: "backend", queue_id = %self.queue_id, reclaimed = report.reclaimed, purged = report.purged, "cleaned up queue");
        }
        Ok(report)
    }

    async fn load_job(&self, id: &JobId) -> Result<Option<Job>> {
        let Some(key) = parse_key(id) else {
            return Ok(None);
        };
        let row = sqlx::query("SELECT * FROM drover_jobs WHERE job_id = ? AND queue_id = ? LIMIT 1")
            .bind(key)
            .bind(&self.queue_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_job(&r)).transpose()
    }

    async fn list_jobs(&self, state: Option<JobState>, limit: usize) -> Result<Vec<Job>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = match state {
            Some(state) => {
                sqlx::query(
                    "SELECT * FROM drover_jobs WHERE queue_id = ? AND state = ? ORDER BY job_id LIMIT ?",
                )
                .bind(&self.queue_id)
                .bind(state.as_str())
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query("SELECT * FROM drover_jobs WHERE queue_id = ? ORDER BY job_id LIMIT ?")
                    .bind(&self.queue_id)
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        let mut out = Vec::with_capacity(rows.len());
        for r in rows {
            out.push(row_to_job(&r)?);
        }
        Ok(out)
    }

    async fn delete_job(&self, id: &JobId) -> Result<bool> {
        let Some(key) = parse_key(id) else {
            return Ok(false);
        };
        let (pool, queue_id) = (&self.pool, self.queue_id.as_str());
        let res = self
            .write("delete", || {
                sqlx::query("DELETE FROM drover_jobs WHERE job_id = ? AND queue_id = ?")
                    .bind(key)
                    .bind(queue_id)
                    .execute(pool)
            })
            .await?;
        Ok(res.rows_affected() > 0)
    }
}

// ----------------------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------------------

/// `SQLITE_BUSY` or `SQLITE_LOCKED`, including their extended codes.
fn is_contention(err: &sqlx::Error) -> bool {
    let sqlx::Error::Database(db) = err else {
        return false;
    };
    db.code()
        .and_then(|code| code.parse::<i32>().ok())
        .is_some_and(|code| matches!(code & 0xff, SQLITE_BUSY | SQLITE_LOCKED))
}

fn parse_key(id: &JobId) -> Option<i64> {
    id.as_str().parse().ok()
}

fn corrupt(id: impl Into<String>, reason: impl Into<String>) -> BackendError {
    BackendError::Corrupt {
        id: id.into(),
        reason: reason.into(),
    }
}

/// Decode one column. A row that does not decode is corrupt, not unavailable.
fn column<'r, T>(row: &'r SqliteRow, id: &str, name: &str) -> Result<T>
where
    T: sqlx::Decode<'r, Sqlite> + sqlx::Type<Sqlite>,
{
    row.try_get(name)
        .map_err(|e| corrupt(id, format!("column {name}: {e}")))
}

fn row_to_job(row: &SqliteRow) -> Result<Job> {
    let job_id: i64 = column(row, "?", "job_id")?;
    let id = job_id.to_string();
    let payload_s: String = column(row, &id, "payload")?;
    let state_s: String = column(row, &id, "state")?;
    let num_retries: i64 = column(row, &id, "num_retries")?;

    let payload: Payload =
        serde_json::from_str(&payload_s).map_err(|e| corrupt(id.as_str(), e.to_string()))?;
    let state = state_s
        .parse::<JobState>()
        .map_err(|e| corrupt(id.as_str(), e.to_string()))?;
    let num_retries =
        u32::try_from(num_retries).map_err(|e| corrupt(id.as_str(), e.to_string()))?;

    Job::restore(JobParts {
        id: JobId::from(job_id),
        queue_id: column(row, &id, "queue_id")?,
        job_type: column(row, &id, "type")?,
        payload,
        state,
        message: column(row, &id, "message")?,
        num_retries,
        available_time: column(row, &id, "available")?,
        processed_time: column(row, &id, "processed")?,
        expires_time: column(row, &id, "expires")?,
    })
    .map_err(|e| corrupt(id, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use serde_json::json;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::collections::HashSet;

    async fn setup_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("connect in-memory sqlite");

        sqlx::migrate!("../../migrations").run(&pool).await.expect("migrate");
        pool
    }

    async fn setup(clock: Arc<ManualClock>) -> SqliteBackend {
        SqliteBackend::new(setup_pool().await, "default", 30, clock)
    }

    fn job(msg: &str) -> Job {
        Job::new("echo", json!({ "msg": msg })).unwrap()
    }

    #[tokio::test]
    async fn enqueue_and_load_round_trip() {
        let clock = Arc::new(ManualClock::new(1_000));
        let backend = setup(clock).await;

        let id = backend.enqueue_delayed(job("hi"), 15).await.expect("enqueue");
        let fetched = backend.load_job(&id).await.expect("load").expect("job exists");
        assert_eq!(fetched.id(), Some(&id));
        assert_eq!(fetched.queue_id(), Some("default"));
        assert_eq!(fetched.job_type(), "echo");
        assert_eq!(fetched.payload()["msg"], "hi");
        assert_eq!(fetched.state(), JobState::Queued);
        assert_eq!(fetched.available_time(), 1_015);
        assert!(fetched.message().is_none());
    }

    #[tokio::test]
    async fn queues_sharing_a_table_are_isolated() {
        let clock = Arc::new(ManualClock::new(1_000));
        let pool = setup_pool().await;
        let a = SqliteBackend::new(pool.clone(), "a", 30, clock.clone());
        let b = SqliteBackend::new(pool, "b", 30, clock);

        let id = a.enqueue(job("only a")).await.unwrap();
        assert!(b.claim_job().await.unwrap().is_none());
        assert!(b.load_job(&id).await.unwrap().is_none());
        assert_eq!(b.count_jobs().await.unwrap().total(), 0);
        assert!(a.claim_job().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn claim_respects_availability_order() {
        let clock = Arc::new(ManualClock::new(1_000));
        let backend = setup(clock.clone()).await;

        let later = backend.enqueue_delayed(job("later"), 5).await.unwrap();
        let now = backend.enqueue(job("now")).await.unwrap();

        let first = backend.claim_job().await.unwrap().expect("claim");
        assert_eq!(first.lease.job_id, now);
        assert_eq!(first.job.state(), JobState::Processing);
        assert_eq!(first.job.processed_time(), 1_000);
        assert_eq!(first.job.expires_time(), 1_030);
        assert!(backend.claim_job().await.unwrap().is_none());

        clock.set(1_005);
        let second = backend.claim_job().await.unwrap().expect("claim");
        assert_eq!(second.lease.job_id, later);
    }

    #[tokio::test]
    async fn commits_require_the_current_lease() {
        let clock = Arc::new(ManualClock::new(1_000));
        let backend = setup(clock).await;
        let id = backend.enqueue(job("hi")).await.unwrap();
        let claimed = backend.claim_job().await.unwrap().unwrap();

        let forged = Lease {
            token: Uuid::new_v4(),
            ..claimed.lease.clone()
        };
        assert!(matches!(
            backend.on_success(&forged, None).await,
            Err(BackendError::LeaseLost(_))
        ));

        backend.on_success(&claimed.lease, Some("ok")).await.unwrap();
        assert!(matches!(
            backend.on_failure(&claimed.lease, Some("again")).await,
            Err(BackendError::LeaseLost(_))
        ));

        let stored = backend.load_job(&id).await.unwrap().unwrap();
        assert_eq!(stored.state(), JobState::Success);
        assert_eq!(stored.message(), Some("ok"));
        assert_eq!(stored.expires_time(), 0);
    }

    #[tokio::test]
    async fn retry_and_reclaim_track_retries_separately() {
        let clock = Arc::new(ManualClock::new(1_000));
        let backend = setup(clock.clone()).await;
        let id = backend.enqueue(job("hi")).await.unwrap();

        let claimed = backend.claim_job().await.unwrap().unwrap();
        backend.retry_job(&claimed.lease, Some("boom"), 5).await.unwrap();
        let stored = backend.load_job(&id).await.unwrap().unwrap();
        assert_eq!(stored.state(), JobState::Queued);
        assert_eq!(stored.num_retries(), 1);
        assert_eq!(stored.available_time(), 1_005);
        assert_eq!(stored.message(), Some("boom"));

        clock.set(1_005);
        backend.claim_job().await.unwrap().unwrap();
        clock.set(1_035);
        let report = backend.cleanup_queue().await.unwrap();
        assert_eq!(report.reclaimed, 1);

        let stored = backend.load_job(&id).await.unwrap().unwrap();
        assert_eq!(stored.state(), JobState::Queued);
        assert_eq!(stored.num_retries(), 1);
        assert_eq!(stored.expires_time(), 0);
    }

    #[tokio::test]
    async fn counts_and_listing() {
        let clock = Arc::new(ManualClock::new(1_000));
        let backend = setup(clock).await;
        for n in 0..3 {
            backend.enqueue(job(&n.to_string())).await.unwrap();
        }
        let claimed = backend.claim_job().await.unwrap().unwrap();
        backend.on_failure(&claimed.lease, Some("x")).await.unwrap();

        let counts = backend.count_jobs().await.unwrap();
        assert_eq!(counts.queued, 2);
        assert_eq!(counts.failure, 1);
        assert_eq!(counts.processing, 0);

        let failed = backend.list_jobs(Some(JobState::Failure), 10).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].message(), Some("x"));
        assert_eq!(backend.list_jobs(None, 2).await.unwrap().len(), 2);

        let id = failed[0].id().unwrap().clone();
        assert!(backend.delete_job(&id).await.unwrap());
        assert!(backend.load_job(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn retention_items_purges_oldest_finished() {
        let clock = Arc::new(ManualClock::new(1_000));
        let backend = setup(clock.clone())
            .await
            .with_retention(RetentionPolicy::Items(2));
        for n in 0..4 {
            backend.enqueue(job(&n.to_string())).await.unwrap();
        }
        for _ in 0..3 {
            let claimed = backend.claim_job().await.unwrap().unwrap();
            backend.on_success(&claimed.lease, None).await.unwrap();
            clock.advance(std::time::Duration::from_secs(1));
        }

        let report = backend.cleanup_queue().await.unwrap();
        assert_eq!(report.purged, 1);
        let counts = backend.count_jobs().await.unwrap();
        assert_eq!(counts.success, 2);
        assert_eq!(counts.queued, 1);
    }

    #[tokio::test]
    async fn sequential_claims_never_repeat() {
        let clock = Arc::new(ManualClock::new(1_000));
        let backend = Arc::new(setup(clock).await);
        for n in 0..20 {
            backend.enqueue(job(&n.to_string())).await.unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..4 {
            let backend = backend.clone();
            handles.push(tokio::spawn(async move {
                let mut mine = Vec::new();
                while let Some(claimed) = backend.claim_job().await.unwrap() {
                    mine.push(claimed.lease.job_id);
                }
                mine
            }));
        }
        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.await.unwrap() {
                assert!(seen.insert(id));
            }
        }
        assert_eq!(seen.len(), 20);
    }

    #[tokio::test]
    async fn undecodable_rows_are_corrupt_not_unavailable() {
        let clock = Arc::new(ManualClock::new(1_000));
        let backend = setup(clock).await;
        let id = backend.enqueue(job("hi")).await.unwrap();
        sqlx::query("UPDATE drover_jobs SET num_retries = 'abc' WHERE job_id = ?")
            .bind(parse_key(&id).unwrap())
            .execute(&backend.pool)
            .await
            .unwrap();

        let err = backend.load_job(&id).await.unwrap_err();
        assert!(!err.is_unavailable());
        assert!(
            matches!(&err, BackendError::Corrupt { id: bad, reason } if bad == id.as_str() && reason.contains("num_retries")),
            "unexpected error: {err}"
        );
        assert!(matches!(
            backend.list_jobs(None, 10).await,
            Err(BackendError::Corrupt { .. })
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn file_database_claims_survive_contention() {
        const JOBS: usize = 200;
        const WORKERS: usize = 8;

        let dir = tempfile::tempdir().expect("temp dir should be created");
        let mut config = drover_config::AppConfig::default();
        config.database.url = format!("sqlite://{}", dir.path().join("jobs.db").display());
        config.database.pool_max_size = WORKERS as u32;
        let pool = crate::init_database(&config).await.expect("init");

        let clock = Arc::new(ManualClock::new(1_000));
        let backend = Arc::new(SqliteBackend::new(pool.clone(), "default", 30, clock));
        for n in 0..JOBS {
            backend.enqueue(job(&n.to_string())).await.unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..WORKERS {
            let backend = backend.clone();
            handles.push(tokio::spawn(async move {
                let mut mine = Vec::new();
                while let Some(claimed) = backend.claim_job().await.expect("claim under contention") {
                    backend
                        .on_success(&claimed.lease, None)
                        .await
                        .expect("commit under contention");
                    mine.push(claimed.lease.job_id);
                }
                mine
            }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.await.unwrap() {
                assert!(seen.insert(id.clone()), "job {id} claimed twice");
            }
        }
        assert_eq!(seen.len(), JOBS);
        let counts = backend.count_jobs().await.unwrap();
        assert_eq!(counts.success, JOBS as u64);
        assert_eq!(counts.total(), JOBS as u64);
        pool.close().await;
    }
}
