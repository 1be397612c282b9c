//! station-agent — polls the control server and runs the station's jobs.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use station_core::StationConfig;
use station_jobs::{HttpJobSource, JobAdapter, JobRunner, JobSource};
use station_scheduler::Scheduler;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Sensor-station job agent.
#[derive(Parser, Debug)]
#[command(name = "station-agent", version, about)]
struct Cli {
    /// Path to station.toml (defaults to STATION_CONFIG, then ~/.station/station.toml).
    #[arg(long)]
    config: Option<String>,

    /// Poll once, wait for the accepted jobs to finish, then exit.
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "station_agent=info,station_scheduler=info,station_jobs=info".into()
            }),
        )
        .init();

    let cli = Cli::parse();

    let config = StationConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        StationConfig::default()
    });
    info!(station = %config.station.id, server = %config.server.base_url, "station agent starting");

    let source: Arc<dyn JobSource> =
        Arc::new(HttpJobSource::new(&config.server, &config.station.id)?);
    let scheduler = Scheduler::start(&config.scheduler);
    let runner = Arc::new(JobRunner::new(&config, scheduler.clone()));
    let adapter = JobAdapter::new(
        scheduler.clone(),
        source,
        runner,
        Duration::from_secs(config.server.poll_interval_secs),
    );

    if cli.once {
        let summary = adapter.poll_once().await?;
        info!(?summary, "single poll complete; waiting for jobs");
        tokio::select! {
            _ = drained(&scheduler) => {}
            res = shutdown_signal() => res?,
        }
    } else {
        let shutdown = CancellationToken::new();
        let poller = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { adapter.run(shutdown).await }
        });

        shutdown_signal().await?;
        info!("shutdown signal received");
        shutdown.cancel();
        poller.await?;
    }

    if scheduler.has_running_job() {
        warn!(running = ?scheduler.running_ids(), "interrupting running jobs");
    }
    scheduler.shutdown().await;
    info!("station agent stopped");
    Ok(())
}

/// Resolves once nothing is queued or running.
async fn drained(scheduler: &Scheduler) {
    let mut ticker = tokio::time::interval(Duration::from_millis(500));
    loop {
        ticker.tick().await;
        if scheduler.queued_len() == 0 && !scheduler.has_running_job() {
            return;
        }
    }
}

/// SIGINT or SIGTERM on Unix, Ctrl+C elsewhere.
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = sigint.recv() => {}
            _ = sigterm.recv() => {}
        }
        Ok(())
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}
