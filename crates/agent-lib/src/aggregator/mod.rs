//! Periodic metrics aggregation over the job cache
//!
//! Every pass takes a fresh snapshot of the cache, normalizes each job into a
//! [`JobRecord`], folds the records into cluster and per-namespace summaries
//! and submits the flattened metrics in a single call. The summaries are owned
//! by the pass and dropped once converted.

mod record;
mod summary;

#[cfg(test)]
mod tests;

pub use record::normalize_job;
pub use summary::{GroupKey, JobSummary, SummarySet};

use crate::cache::JobCache;
use crate::error::{AgentError, Result};
use crate::health::{components, HealthRegistry};
use crate::models::{JobRecord, QueuedRecord};
use crate::observability::{AgentMetrics, StructuredLogger};
use crate::queue::RateLimitingQueue;
use crate::sink::MetricsSink;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval_at, Instant};
use tracing::{debug, info, info_span, warn, Instrument};

/// Configuration for the aggregation loop
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Time between passes (default: 45 seconds)
    pub interval: Duration,
    /// Component name in the metric path
    pub tier_name: String,
    /// Cluster identity stamped on every record
    pub cluster_name: String,
    /// Namespace for jobs without one; its bucket is always reported
    pub default_namespace: String,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(45),
            tier_name: "ClusterAgent".to_string(),
            cluster_name: String::new(),
            default_namespace: "default".to_string(),
        }
    }
}

impl AggregatorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(AgentError::InvalidConfig(
                "aggregation interval must be non-zero".to_string(),
            ));
        }
        if self.default_namespace.is_empty() {
            return Err(AgentError::InvalidConfig(
                "default namespace must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Outcome of one aggregation pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassReport {
    pub jobs: i64,
    pub metrics: usize,
}

/// Snapshot-based aggregator feeding the metrics sink and the event queue
pub struct MetricsAggregator {
    cache: Arc<JobCache>,
    sink: Arc<dyn MetricsSink>,
    queue: Option<Arc<RateLimitingQueue<QueuedRecord>>>,
    config: AggregatorConfig,
    metrics: AgentMetrics,
    health: Option<HealthRegistry>,
    logger: Option<StructuredLogger>,
}

impl MetricsAggregator {
    pub fn new(cache: Arc<JobCache>, sink: Arc<dyn MetricsSink>, config: AggregatorConfig) -> Self {
        Self {
            cache,
            sink,
            queue: None,
            config,
            metrics: AgentMetrics::new(),
            health: None,
            logger: None,
        }
    }

    /// Enqueue every normalized record for the flusher
    pub fn with_queue(mut self, queue: Arc<RateLimitingQueue<QueuedRecord>>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    /// Build this pass's summaries from the current cache snapshot
    pub fn summarize(&self, now: DateTime<Utc>) -> SummarySet {
        let mut summaries = SummarySet::new(&self.config.tier_name, &self.config.default_namespace);

        for job in self.cache.list() {
            let record = normalize_job(
                &job,
                &self.config.cluster_name,
                &self.config.default_namespace,
                now,
            );
            summaries.fold(&record);
            self.enqueue(record);
        }

        if let Some(queue) = &self.queue {
            self.metrics.set_queue_depth(queue.len());
        }
        summaries
    }

    fn enqueue(&self, record: JobRecord) {
        if let Some(queue) = &self.queue {
            queue.add(QueuedRecord::new(record));
        }
    }

    /// Run one aggregation pass and submit its metrics
    pub async fn run_once(&self) -> Result<PassReport> {
        let span = info_span!("send_job_metrics", cluster = %self.config.cluster_name);
        self.pass(Utc::now()).instrument(span).await
    }

    async fn pass(&self, now: DateTime<Utc>) -> Result<PassReport> {
        let start = Instant::now();

        let summaries = self.summarize(now);
        let jobs = summaries.global().map_or(0, |s| s.job_count);
        let list = summaries.into_metrics();

        let result = self.sink.post_metrics(&list).await;
        self.metrics
            .observe_aggregation_latency(start.elapsed().as_secs_f64());

        if let Err(e) = result {
            self.metrics.inc_metrics_errors();
            return Err(e);
        }

        self.metrics.add_metrics_submitted(list.len());
        debug!(jobs, metrics = list.len(), "Aggregation pass complete");
        Ok(PassReport {
            jobs,
            metrics: list.len(),
        })
    }

    /// Run passes every interval until the stop signal fires.
    ///
    /// The first pass happens one full interval after start.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let period = self.config.interval;
        info!(
            interval_secs = period.as_secs(),
            "Starting metrics aggregation loop"
        );

        let mut ticker = interval_at(Instant::now() + period, period);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick().await,
                _ = shutdown.recv() => {
                    info!("Shutting down metrics aggregation loop");
                    break;
                }
            }
        }
    }

    async fn tick(&self) {
        match self.run_once().await {
            Ok(report) => {
                if let Some(logger) = &self.logger {
                    logger.log_metrics_pushed(report.jobs, report.metrics);
                }
                if let Some(health) = &self.health {
                    health.set_healthy(components::AGGREGATOR).await;
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to push job metrics");
                if let Some(health) = &self.health {
                    health
                        .set_degraded(components::AGGREGATOR, e.to_string())
                        .await;
                }
            }
        }
    }
}
