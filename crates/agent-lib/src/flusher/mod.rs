//! Periodic batched delivery of queued job records to the events API
//!
//! Each flush drains at most `event_api_limit` records that were pending when
//! it started, makes sure the record schema exists on the backend and posts
//! the batch. Drained items are forgotten immediately: a failed post drops
//! the batch and the next flush starts fresh.


use crate::error::{AgentError, Result};
use crate::health::{components, HealthRegistry};
use crate::models::{JobRecord, JobSchemaDefinition, QueuedRecord};
use crate::observability::{AgentMetrics, StructuredLogger};
use crate::queue::RateLimitingQueue;
use crate::sink::EventSink;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval_at, Instant};
use tracing::{debug, info, info_span, warn, Instrument};

/// Configuration for the flush loop
#[derive(Debug, Clone)]
pub struct FlushConfig {
    /// Time between flushes (default: 15 seconds)
    pub interval: Duration,
    /// Maximum records posted in one call
    pub event_api_limit: usize,
    /// Schema the records are published under
    pub schema_name: String,
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
            event_api_limit: 100,
            schema_name: "job_schema".to_string(),
        }
    }
}

impl FlushConfig {
    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(AgentError::InvalidConfig(
                "flush interval must be non-zero".to_string(),
            ));
        }
        if self.event_api_limit == 0 {
            return Err(AgentError::InvalidConfig(
                "event_api_limit must be at least 1".to_string(),
            ));
        }
        if self.schema_name.is_empty() {
            return Err(AgentError::InvalidConfig(
                "schema name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Outcome of one flush
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Items taken off the queue
    pub dequeued: usize,
    /// Records accepted by the backend
    pub posted: usize,
    pub schema_created: bool,
    /// The queue was shutting down while draining
    pub shutdown_observed: bool,
}

/// Drains the event queue into an [`EventSink`]
pub struct QueueFlusher {
    queue: Arc<RateLimitingQueue<QueuedRecord>>,
    sink: Arc<dyn EventSink>,
    config: FlushConfig,
    schema: JobSchemaDefinition,
    metrics: AgentMetrics,
    health: Option<HealthRegistry>,
    logger: Option<StructuredLogger>,
}

impl QueueFlusher {
    pub fn new(
        queue: Arc<RateLimitingQueue<QueuedRecord>>,
        sink: Arc<dyn EventSink>,
        config: FlushConfig,
    ) -> Self {
        Self {
            queue,
            sink,
            config,
            schema: JobSchemaDefinition::new(),
            metrics: AgentMetrics::new(),
            health: None,
            logger: None,
        }
    }

    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Flush one batch. An empty queue makes no backend calls.
    pub async fn flush(&self) -> Result<FlushReport> {
        let span = info_span!("flush_job_events_queue", schema = %self.config.schema_name);
        self.flush_batch().instrument(span).await
    }

    async fn flush_batch(&self) -> Result<FlushReport> {
        let mut report = FlushReport::default();

        let pending = self.queue.len();
        if pending == 0 {
            debug!("Event queue empty, nothing to flush");
            return Ok(report);
        }

        let limit = pending.min(self.config.event_api_limit);
        let batch = self.drain(limit, &mut report).await;
        report.dequeued = batch.len();
        self.metrics.set_queue_depth(self.queue.len());

        if batch.is_empty() {
            return Ok(report);
        }

        let payload = serde_json::to_vec(&batch)
            .map_err(|e| AgentError::serialization("job record batch", e))?;
        let definition = serde_json::to_vec(&self.schema)
            .map_err(|e| AgentError::serialization("job schema", e))?;

        report.schema_created = self.ensure_schema(&definition).await;

        self.sink
            .post_events(&self.config.schema_name, &payload)
            .await?;
        report.posted = batch.len();

        Ok(report)
    }

    /// Take up to `limit` records off the queue, marking each done and forgotten
    async fn drain(&self, limit: usize, report: &mut FlushReport) -> Vec<JobRecord> {
        let mut batch = Vec::with_capacity(limit);

        while batch.len() < limit {
            if self.queue.is_shutting_down() && !report.shutdown_observed {
                report.shutdown_observed = true;
                info!(remaining = limit - batch.len(), "Event queue shutting down during flush");
            }

            match self.queue.get().await {
                Some(item) => {
                    self.queue.forget(&item);
                    self.queue.done(&item);
                    batch.push(item.record);
                }
                None => {
                    report.shutdown_observed = true;
                    info!(dequeued = batch.len(), "Event queue shut down, stopping drain");
                    break;
                }
            }
        }

        batch
    }

    /// Create the schema when the backend lacks it. Failures are logged only;
    /// the post that follows may then be rejected.
    async fn ensure_schema(&self, definition: &[u8]) -> bool {
        let schema = &self.config.schema_name;

        match self.sink.schema_exists(schema).await {
            Ok(true) => {
                debug!(schema = %schema, "Schema already exists");
                false
            }
            Ok(false) => match self.sink.create_schema(schema, definition).await {
                Ok(()) => {
                    info!(schema = %schema, "Schema created");
                    self.metrics.inc_schemas_created();
                    true
                }
                Err(e) => {
                    warn!(schema = %schema, error = %e, "Failed to create schema");
                    false
                }
            },
            Err(e) => {
                warn!(schema = %schema, error = %e, "Failed to check schema existence");
                false
            }
        }
    }

    /// Flush every interval until the stop signal fires.
    ///
    /// The first flush happens one full interval after start.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let period = self.config.interval;
        info!(
            interval_secs = period.as_secs(),
            event_api_limit = self.config.event_api_limit,
            "Starting event queue flush loop"
        );

        let mut ticker = interval_at(Instant::now() + period, period);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick().await,
                _ = shutdown.recv() => {
                    info!("Shutting down event queue flush loop");
                    break;
                }
            }
        }
    }

    async fn tick(&self) {
        match self.flush().await {
            Ok(report) => {
                if report.posted > 0 {
                    self.metrics.record_flush(report.posted);
                    if let Some(logger) = &self.logger {
                        logger.log_batch_flushed(&self.config.schema_name, report.posted);
                    }
                    if let Some(health) = &self.health {
                        health.set_healthy(components::FLUSHER).await;
                        health.set_healthy(components::EVENT_SINK).await;
                    }
                }
            }
            Err(e) => {
                self.metrics.inc_flush_errors();
                warn!(error = %e, "Failed to flush job records, batch dropped");
                if let Some(health) = &self.health {
                    let component = match e {
                        AgentError::Serialization { .. } => components::FLUSHER,
                        _ => components::EVENT_SINK,
                    };
                    health.set_degraded(component, e.to_string()).await;
                }
            }
        }
    }
}
