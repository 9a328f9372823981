//! Job Agent - batch job monitoring agent
//!
//! This binary runs as a single-replica Deployment per cluster, watching
//! batch Jobs, pushing aggregate metrics to the machine agent and per-job
//! records to the events service.

use anyhow::{Context, Result};
use job_agent_lib::{
    cache::{JobCache, JobWatcher},
    health::HealthRegistry,
    observability::{AgentMetrics, StructuredLogger},
    sink::{EventsApiClient, MachineAgentClient},
    JobsWorker,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting job-agent");

    let config = config::AgentConfig::load()?;
    info!(
        app_name = %config.app_name,
        cluster = %config.cluster_name,
        node_name = %config.node_name,
        event_api_limit = config.event_api_limit,
        "Agent configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register_all().await;

    let metrics = AgentMetrics::new();
    let logger = StructuredLogger::new(&config.cluster_name);
    logger.log_startup(AGENT_VERSION);

    let (stop_tx, _) = broadcast::channel::<()>(1);

    // Health endpoints come up first so probes see "not ready" while syncing
    let app_state = Arc::new(api::AppState::new(health_registry.clone(), metrics));
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state, stop_tx.subscribe()));

    let cache = Arc::new(JobCache::with_logging_notifier());
    let watcher = JobWatcher::connect(cache)
        .await
        .context("Failed to initialize job watcher")?;

    let metrics_sink = MachineAgentClient::new(config.machine_agent_config())
        .context("Failed to create machine agent client")?;
    let event_sink = EventsApiClient::new(config.events_api_config())
        .context("Failed to create events API client")?;

    let worker = JobsWorker::builder()
        .watcher(watcher)
        .metrics_sink(Arc::new(metrics_sink))
        .event_sink(Arc::new(event_sink))
        .aggregator_config(config.aggregator_config())
        .flush_config(config.flush_config())
        .health(health_registry)
        .logger(logger)
        .build()
        .context("Failed to build jobs worker")?;

    let worker_handle = tokio::spawn(worker.run(stop_tx.clone()));

    shutdown_signal().await?;
    info!("Shutdown signal received, stopping workers");
    // No receivers left only if every task already exited
    let _ = stop_tx.send(());

    worker_handle.await.context("Jobs worker panicked")?;
    match api_handle.await {
        Ok(Err(e)) => warn!(error = %e, "API server exited with error"),
        Err(e) => warn!(error = %e, "API server task panicked"),
        Ok(Ok(())) => {}
    }

    info!("Shutdown complete");
    Ok(())
}

/// Resolve on Ctrl-C or SIGTERM
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.context("Failed to listen for Ctrl-C")?,
            _ = terminate.recv() => {}
        }
    }

    #[cfg(not(unix))]
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    Ok(())
}
