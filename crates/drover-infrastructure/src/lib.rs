// SPDX-License-Identifier: GPL-3.0-or-later
pub mod backend;
pub mod clock;
pub mod memory;
pub mod sqlite;

use anyhow::{bail, Result};
use drover_config::{AppConfig, BackendKind, QueueConfig};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub use backend::{BackendError, ClaimedJob, CleanupReport, Lease, QueueBackend};
pub use clock::{Clock, ManualClock, SystemClock};
pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;

/// Whether any configured queue stores its jobs in SQLite.
pub fn needs_database(config: &AppConfig) -> bool {
    config.queues.iter().any(|q| q.backend == BackendKind::Sqlite)
}

/// Turn a `sqlite://relative/path` URL into an absolute, create-mode URL,
/// creating the parent directory on the way.
pub fn normalize_sqlite_url(url: &str) -> Result<String> {
    if !url.starts_with("sqlite://") || url.starts_with("sqlite://:memory:") {
        return Ok(url.to_string());
    }

    let db_path = url.trim_start_matches("sqlite://");
    let path = Path::new(db_path);

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
            info!(target: "infrastructure", path = %parent.display(), "created database directory");
        }
    }

    let absolute_path = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    // SQLite accepts forward slashes on every platform
    let path_str = absolute_path.to_string_lossy().replace('\\', "/");
    Ok(format!("sqlite://{}?mode=rwc", path_str))
}

pub async fn init_database(config: &AppConfig) -> Result<SqlitePool> {
    info!(target: "infrastructure", "initializing database");

    let db_url = normalize_sqlite_url(&config.database.url)?;
    info!(target: "infrastructure", db_url = %db_url, "connecting to database");

    let mut options = SqliteConnectOptions::from_str(&db_url)?
        .create_if_missing(true)
        .busy_timeout(Duration::from_millis(config.database.busy_timeout_ms));
    if !is_memory_url(&db_url) {
        // readers never block the single writer
        options = options
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(config.database.pool_max_size)
        .connect_with(options)
        .await?;

    info!(target: "infrastructure", db_url = %config.database.url, "running migrations");
    sqlx::migrate!("../../migrations").run(&pool).await?;

    info!(target: "infrastructure", "database initialized successfully");
    Ok(pool)
}

fn is_memory_url(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

/// Build the backend a queue is configured for.
pub fn build_backend(
    queue: &QueueConfig,
    pool: Option<&SqlitePool>,
    clock: Arc<dyn Clock>,
) -> Result<Arc<dyn QueueBackend>> {
    let backend: Arc<dyn QueueBackend> = match queue.backend {
        BackendKind::Memory => Arc::new(
            MemoryBackend::new(queue.id.clone(), queue.lease_time, clock)
                .with_retention(queue.retention),
        ),
        BackendKind::Sqlite => {
            let Some(pool) = pool else {
                bail!("queue {} uses sqlite but no database pool is available", queue.id);
            };
            Arc::new(
                SqliteBackend::new(pool.clone(), queue.id.clone(), queue.lease_time, clock)
                    .with_retention(queue.retention),
            )
        }
    };
    info!(target: "infrastructure", queue_id = %queue.id, backend = ?queue.backend, "queue backend ready");
    Ok(backend)
}
