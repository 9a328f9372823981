//! Lifecycle of the job agent
//!
//! [`JobsWorker`] starts the watch loop, waits for the cache to sync, then
//! runs the aggregation and flush loops until the shared stop signal fires.
//! Its state moves through [`LifecycleState`] and can be observed through
//! [`JobsWorker::state_receiver`].

use crate::aggregator::{AggregatorConfig, MetricsAggregator};
use crate::cache::{JobCache, JobWatcher};
use crate::error::{AgentError, Result};
use crate::flusher::{FlushConfig, QueueFlusher};
use crate::health::{components, HealthRegistry};
use crate::models::QueuedRecord;
use crate::observability::StructuredLogger;
use crate::queue::RateLimitingQueue;
use crate::sink::{EventSink, MetricsSink};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Initializing,
    /// Watch loop running, waiting for the initial list
    Syncing,
    Running,
    Stopping,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// How often the cache is checked for sync (default: 100 ms)
    pub sync_poll_interval: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            sync_poll_interval: Duration::from_millis(100),
        }
    }
}

/// Supervisor owning the watch loop and both periodic loops
pub struct JobsWorker {
    watcher: JobWatcher,
    aggregator: MetricsAggregator,
    flusher: QueueFlusher,
    queue: Arc<RateLimitingQueue<QueuedRecord>>,
    config: OrchestratorConfig,
    health: HealthRegistry,
    logger: StructuredLogger,
    state: watch::Sender<LifecycleState>,
}

impl JobsWorker {
    pub fn builder() -> JobsWorkerBuilder {
        JobsWorkerBuilder::new()
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Receiver that follows every state transition, including after `run` consumes the worker
    pub fn state_receiver(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    /// The event queue between aggregator and flusher
    pub fn queue(&self) -> Arc<RateLimitingQueue<QueuedRecord>> {
        Arc::clone(&self.queue)
    }

    pub fn cache(&self) -> Arc<JobCache> {
        Arc::clone(self.watcher.cache())
    }

    /// Run until a message is sent on `stop` (or every sender is dropped).
    ///
    /// Returns once all background tasks have exited; the state is then `Stopped`.
    pub async fn run(self, stop: broadcast::Sender<()>) {
        let JobsWorker {
            watcher,
            aggregator,
            flusher,
            queue,
            config,
            health,
            logger,
            state,
        } = self;

        // Subscribe everything before the first await so no signal is missed
        let mut stop_rx = stop.subscribe();
        let watcher_stop = stop.subscribe();
        let aggregator_stop = stop.subscribe();
        let flusher_stop = stop.subscribe();
        drop(stop);

        let cache = Arc::clone(watcher.cache());
        state.send_replace(LifecycleState::Syncing);
        info!("Waiting for job cache to sync");

        let mut tasks: Vec<(&'static str, JoinHandle<()>)> =
            vec![("watcher", tokio::spawn(watcher.run(watcher_stop)))];

        if wait_for_sync(&cache, config.sync_poll_interval, &mut stop_rx).await {
            logger.log_cache_synced(cache.len());
            health.set_healthy(components::JOB_CACHE).await;
            health.set_ready(true).await;

            tasks.push(("aggregator", tokio::spawn(aggregator.run(aggregator_stop))));
            tasks.push(("flusher", tokio::spawn(flusher.run(flusher_stop))));
            state.send_replace(LifecycleState::Running);

            // Err means every sender is gone, which is a stop as well
            let _ = stop_rx.recv().await;
        } else {
            logger.log_cache_not_synced();
        }

        state.send_replace(LifecycleState::Stopping);
        logger.log_shutdown("stop signal received");
        health.set_ready(false).await;
        queue.shut_down();

        for (name, task) in tasks {
            if let Err(e) = task.await {
                error!(task = name, error = %e, "Background task did not exit cleanly");
            }
        }

        state.send_replace(LifecycleState::Stopped);
        info!("Job agent stopped");
    }
}

/// Poll until the cache has synced. Returns false if stopped first.
async fn wait_for_sync(
    cache: &JobCache,
    poll_interval: Duration,
    stop: &mut broadcast::Receiver<()>,
) -> bool {
    let mut ticker = tokio::time::interval(poll_interval);

    loop {
        tokio::select! {
            biased;
            _ = stop.recv() => return false,
            _ = ticker.tick() => {
                if cache.has_synced() {
                    return true;
                }
            }
        }
    }
}

/// Builder for [`JobsWorker`]
pub struct JobsWorkerBuilder {
    watcher: Option<JobWatcher>,
    metrics_sink: Option<Arc<dyn MetricsSink>>,
    event_sink: Option<Arc<dyn EventSink>>,
    aggregator_config: AggregatorConfig,
    flush_config: FlushConfig,
    config: OrchestratorConfig,
    health: Option<HealthRegistry>,
    logger: Option<StructuredLogger>,
}

impl JobsWorkerBuilder {
    pub fn new() -> Self {
        Self {
            watcher: None,
            metrics_sink: None,
            event_sink: None,
            aggregator_config: AggregatorConfig::default(),
            flush_config: FlushConfig::default(),
            config: OrchestratorConfig::default(),
            health: None,
            logger: None,
        }
    }

    pub fn watcher(mut self, watcher: JobWatcher) -> Self {
        self.watcher = Some(watcher);
        self
    }

    pub fn metrics_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.metrics_sink = Some(sink);
        self
    }

    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = Some(sink);
        self
    }

    pub fn aggregator_config(mut self, config: AggregatorConfig) -> Self {
        self.aggregator_config = config;
        self
    }

    pub fn flush_config(mut self, config: FlushConfig) -> Self {
        self.flush_config = config;
        self
    }

    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Share a health registry with the HTTP endpoints (a private one is used otherwise)
    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn build(self) -> Result<JobsWorker> {
        let watcher = self
            .watcher
            .ok_or_else(|| AgentError::InvalidConfig("watcher is required".to_string()))?;
        let metrics_sink = self
            .metrics_sink
            .ok_or_else(|| AgentError::InvalidConfig("metrics sink is required".to_string()))?;
        let event_sink = self
            .event_sink
            .ok_or_else(|| AgentError::InvalidConfig("event sink is required".to_string()))?;

        self.aggregator_config.validate()?;
        self.flush_config.validate()?;
        if self.config.sync_poll_interval.is_zero() {
            return Err(AgentError::InvalidConfig(
                "sync poll interval must be non-zero".to_string(),
            ));
        }

        let health = self.health.unwrap_or_default();
        let logger = self
            .logger
            .unwrap_or_else(|| StructuredLogger::new(&self.aggregator_config.cluster_name));
        let queue = Arc::new(RateLimitingQueue::with_default_rate_limiter());

        let aggregator = MetricsAggregator::new(
            Arc::clone(watcher.cache()),
            metrics_sink,
            self.aggregator_config,
        )
        .with_queue(Arc::clone(&queue))
        .with_health(health.clone())
        .with_logger(logger.clone());

        let flusher = QueueFlusher::new(Arc::clone(&queue), event_sink, self.flush_config)
            .with_health(health.clone())
            .with_logger(logger.clone());

        let (state, _) = watch::channel(LifecycleState::Initializing);

        Ok(JobsWorker {
            watcher,
            aggregator,
            flusher,
            queue,
            config: self.config,
            health,
            logger,
            state,
        })
    }
}

impl Default for JobsWorkerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
