// SPDX-License-Identifier: GPL-3.0-or-later
mod args;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use axum::serve;
use clap::Parser;
use drover_api::{router, AppState};
use drover_config::{load as load_config, AppConfig, HttpConfig, TelemetryConfig};
use drover_infrastructure::{init_database, needs_database, Clock, SystemClock};
use drover_scheduler::{QueueSet, Scheduler};
use serde_json::Value;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use args::{Args, Command};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;
    init_tracing(&config.telemetry);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let pool = if needs_database(&config) {
        Some(init_database(&config).await?)
    } else {
        None
    };
    let queues = Arc::new(QueueSet::from_config(&config, pool.as_ref(), clock.clone())?);

    match args.command {
        Command::Serve => run_server(config, queues, clock).await,
        Command::Process { queue, time_limit } => {
            let scheduler = Scheduler::new(config, queues, clock);
            scheduler.register_job_types().await;
            let processed = scheduler.run_once(&queue, time_limit).await?;
            println!("{processed}");
            Ok(())
        }
        Command::Enqueue {
            queue,
            job_type,
            payload,
            delay,
        } => {
            let payload: Value =
                serde_json::from_str(&payload).context("payload is not valid JSON")?;
            let queue = queues
                .get(&queue)
                .ok_or_else(|| anyhow!("unknown queue: {queue}"))?;
            let id = queue.enqueue_delayed(job_type, payload, delay).await?;
            println!("{id}");
            Ok(())
        }
        Command::Counts { queue } => {
            let queue = queues
                .get(&queue)
                .ok_or_else(|| anyhow!("unknown queue: {queue}"))?;
            let counts = queue.count_jobs().await?;
            println!("{}", serde_json::to_string_pretty(&counts)?);
            Ok(())
        }
    }
}

async fn run_server(config: AppConfig, queues: Arc<QueueSet>, clock: Arc<dyn Clock>) -> Result<()> {
    let scheduler = Scheduler::new(config.clone(), queues.clone(), clock);
    scheduler.register_job_types().await;
    let scheduler_handle = scheduler.start();

    let state = AppState::new(queues);
    let listener = TcpListener::bind(bind_addr(&config.http)?).await?;
    let addr = listener.local_addr()?;
    info!(target: "cli", "listening on {}", addr);

    serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // In-flight jobs finish before their processors exit.
    scheduler.shutdown();
    scheduler_handle.await??;
    info!(target: "cli", "shutdown complete");
    Ok(())
}

fn init_tracing(telemetry: &TelemetryConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&telemetry.log_level));
    let registry = tracing_subscriber::registry().with(env_filter);

    // Logs go to stderr so command output stays parseable.
    if telemetry.json {
        registry
            .with(fmt::layer().json().with_target(true).with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_names(true)
                    .with_level(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn bind_addr(http: &HttpConfig) -> Result<SocketAddr> {
    let addr = format!("{}:{}", http.host, http.port);
    addr.parse()
        .with_context(|| format!("invalid listen address {addr}"))
}

async fn shutdown_signal() {
    let interrupt = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(target: "cli", error = %err, "failed to install SIGINT handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(target: "cli", error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => {},
        _ = terminate => {},
    }

    info!(target: "cli", "shutdown signal received");
}
