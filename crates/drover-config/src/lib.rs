// SPDX-License-Identifier: GPL-3.0-or-later
use std::collections::HashSet;
use std::path::Path;

use anyhow::{bail, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_max_size: u32,
    /// How long a connection waits on SQLite's write lock before giving up.
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://drover.db".to_string(),
            pool_max_size: 16,
            busy_timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5150,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    pub log_level: String,
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Back-off between claim attempts against an empty queue.
    pub idle_sleep_ms: u64,
    /// How often `serve` runs the cron queues.
    pub cron_interval_seconds: u64,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            idle_sleep_ms: 1000,
            cron_interval_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Sqlite,
    Memory,
}

/// How a queue gets processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessorKind {
    /// Periodic bounded runs.
    Cron,
    /// A dedicated long-running worker.
    Daemon,
}

impl ProcessorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessorKind::Cron => "cron",
            ProcessorKind::Daemon => "daemon",
        }
    }
}

/// Which terminal jobs survive `cleanup_queue`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum RetentionPolicy {
    /// Keep every finished job.
    #[default]
    All,
    /// Keep the N most recently processed finished jobs.
    Items(u64),
    /// Keep finished jobs processed within the last N days.
    Days(u64),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default = "default_backend")]
    pub backend: BackendKind,
    #[serde(default = "default_processor")]
    pub processor: ProcessorKind,
    /// Time budget per run in seconds; 0 means unbounded.
    #[serde(default = "default_processing_time")]
    pub processing_time: u64,
    /// Seconds a claimed job stays leased before it may be reclaimed.
    #[serde(default = "default_lease_time")]
    pub lease_time: u64,
    #[serde(default)]
    pub retention: RetentionPolicy,
}

fn default_backend() -> BackendKind {
    BackendKind::Sqlite
}

fn default_processor() -> ProcessorKind {
    ProcessorKind::Cron
}

fn default_processing_time() -> u64 {
    90
}

fn default_lease_time() -> u64 {
    300
}

impl QueueConfig {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            label: id.clone(),
            id,
            backend: default_backend(),
            processor: default_processor(),
            processing_time: default_processing_time(),
            lease_time: default_lease_time(),
            retention: RetentionPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub http: HttpConfig,
    pub telemetry: TelemetryConfig,
    pub processor: ProcessorConfig,
    pub queues: Vec<QueueConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            http: HttpConfig::default(),
            telemetry: TelemetryConfig::default(),
            processor: ProcessorConfig::default(),
            queues: vec![QueueConfig::new("default")],
        }
    }
}

impl AppConfig {
    pub fn queue(&self, id: &str) -> Option<&QueueConfig> {
        self.queues.iter().find(|q| q.id == id)
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for queue in &self.queues {
            if queue.id.trim().is_empty() {
                bail!("queue id must not be empty");
            }
            if !seen.insert(queue.id.as_str()) {
                bail!("duplicate queue id: {}", queue.id);
            }
            if queue.lease_time == 0 {
                bail!("queue {}: lease_time must be positive", queue.id);
            }
            if queue.processor == ProcessorKind::Cron && queue.processing_time == 0 {
                bail!(
                    "queue {}: an unbounded processing_time requires the daemon processor",
                    queue.id
                );
            }
        }
        if self.processor.cron_interval_seconds == 0 {
            bail!("processor.cron_interval_seconds must be positive");
        }
        if self.processor.idle_sleep_ms == 0 {
            bail!("processor.idle_sleep_ms must be positive");
        }
        Ok(())
    }
}

/// Load configuration from defaults, optional TOML file, and environment overrides (prefix: DROVER_).
pub fn load(config_path: Option<&Path>) -> Result<AppConfig> {
    let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));

    if let Some(path) = config_path {
        figment = figment.merge(Toml::file(path));
    }

    figment = figment.merge(Env::prefixed("DROVER_").split("__"));

    let config: AppConfig = figment.extract()?;
    config.validate()?;
    info!(target: "config", queues = config.queues.len(), "configuration loaded");
    Ok(config)
}
