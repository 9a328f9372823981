//! Observability infrastructure for the job agent
//!
//! Provides:
//! - Prometheus metrics (cache size, aggregation latency, queue depth, flush outcomes)
//! - Structured JSON logging with tracing

use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for pass latency (in seconds); passes include network calls
const LATENCY_BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<AgentMetricsInner> = OnceLock::new();

struct AgentMetricsInner {
    jobs_cached: IntGauge,
    watch_events: IntCounterVec,
    watch_errors: IntCounter,
    aggregation_latency_seconds: Histogram,
    metrics_submitted: IntCounter,
    metrics_errors: IntCounter,
    queue_depth: IntGauge,
    records_flushed: IntCounter,
    flush_batches: IntCounter,
    flush_errors: IntCounter,
    schemas_created: IntCounter,
}

impl AgentMetricsInner {
    fn new() -> Self {
        Self {
            jobs_cached: register_int_gauge!(
                "job_agent_jobs_cached",
                "Number of batch jobs currently held in the local cache"
            )
            .expect("Failed to register jobs_cached"),

            watch_events: register_int_counter_vec!(
                "job_agent_watch_events_total",
                "Job changes applied to the cache, by kind",
                &["kind"]
            )
            .expect("Failed to register watch_events"),

            watch_errors: register_int_counter!(
                "job_agent_watch_errors_total",
                "Errors surfaced by the job watch stream before it retried"
            )
            .expect("Failed to register watch_errors"),

            aggregation_latency_seconds: register_histogram!(
                "job_agent_aggregation_latency_seconds",
                "Time spent on one aggregation pass including metric submission",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register aggregation_latency_seconds"),

            metrics_submitted: register_int_counter!(
                "job_agent_metrics_submitted_total",
                "Flat metrics accepted by the metrics sink"
            )
            .expect("Failed to register metrics_submitted"),

            metrics_errors: register_int_counter!(
                "job_agent_metrics_errors_total",
                "Aggregation passes whose submission failed"
            )
            .expect("Failed to register metrics_errors"),

            queue_depth: register_int_gauge!(
                "job_agent_event_queue_depth",
                "Records waiting in the event queue"
            )
            .expect("Failed to register queue_depth"),

            records_flushed: register_int_counter!(
                "job_agent_records_flushed_total",
                "Job records posted to the events API"
            )
            .expect("Failed to register records_flushed"),

            flush_batches: register_int_counter!(
                "job_agent_flush_batches_total",
                "Batches posted to the events API"
            )
            .expect("Failed to register flush_batches"),

            flush_errors: register_int_counter!(
                "job_agent_flush_errors_total",
                "Flushes that failed to serialize or post their batch"
            )
            .expect("Failed to register flush_errors"),

            schemas_created: register_int_counter!(
                "job_agent_schemas_created_total",
                "Event schemas created on the backend"
            )
            .expect("Failed to register schemas_created"),
        }
    }
}

/// Agent metrics for Prometheus exposition
///
/// Lightweight handle to the process-wide metrics; clones share them.
#[derive(Clone)]
pub struct AgentMetrics {
    _private: (),
}

impl Default for AgentMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(AgentMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &AgentMetricsInner {
        GLOBAL_METRICS.get_or_init(AgentMetricsInner::new)
    }

    pub fn set_jobs_cached(&self, count: i64) {
        self.inner().jobs_cached.set(count);
    }

    /// Count one cache change (`added`, `updated`, `deleted`)
    pub fn inc_watch_event(&self, kind: &str) {
        self.inner().watch_events.with_label_values(&[kind]).inc();
    }

    pub fn inc_watch_errors(&self) {
        self.inner().watch_errors.inc();
    }

    #[cfg(test)]
    pub(crate) fn watch_errors(&self) -> u64 {
        self.inner().watch_errors.get()
    }

    pub fn observe_aggregation_latency(&self, duration_secs: f64) {
        self.inner().aggregation_latency_seconds.observe(duration_secs);
    }

    pub fn add_metrics_submitted(&self, count: usize) {
        self.inner().metrics_submitted.inc_by(count as u64);
    }

    pub fn inc_metrics_errors(&self) {
        self.inner().metrics_errors.inc();
    }

    pub fn set_queue_depth(&self, depth: usize) {
        self.inner().queue_depth.set(depth as i64);
    }

    /// Record one successfully posted batch
    pub fn record_flush(&self, records: usize) {
        self.inner().flush_batches.inc();
        self.inner().records_flushed.inc_by(records as u64);
    }

    pub fn inc_flush_errors(&self) {
        self.inner().flush_errors.inc();
    }

    pub fn inc_schemas_created(&self) {
        self.inner().schemas_created.inc();
    }
}

/// Structured logger for agent lifecycle events
#[derive(Clone)]
pub struct StructuredLogger {
    cluster_name: String,
}

impl StructuredLogger {
    pub fn new(cluster_name: impl Into<String>) -> Self {
        Self {
            cluster_name: cluster_name.into(),
        }
    }

    pub fn log_startup(&self, version: &str) {
        info!(
            event = "agent_started",
            cluster = %self.cluster_name,
            agent_version = %version,
            "Job agent started"
        );
    }

    pub fn log_cache_synced(&self, jobs: usize) {
        info!(
            event = "cache_synced",
            cluster = %self.cluster_name,
            jobs = jobs,
            "Cache synchronized, starting the processing"
        );
    }

    pub fn log_cache_not_synced(&self) {
        warn!(
            event = "cache_sync_aborted",
            cluster = %self.cluster_name,
            "Stop signal received before the job cache synced"
        );
    }

    pub fn log_metrics_pushed(&self, jobs: i64, metrics: usize) {
        info!(
            event = "metrics_pushed",
            cluster = %self.cluster_name,
            jobs = jobs,
            metrics = metrics,
            "Pushed job metrics"
        );
    }

    pub fn log_batch_flushed(&self, schema: &str, records: usize) {
        info!(
            event = "batch_flushed",
            cluster = %self.cluster_name,
            schema = %schema,
            records = records,
            "Posted job records to events API"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "agent_shutdown",
            cluster = %self.cluster_name,
            reason = %reason,
            "Job agent shutting down"
        );
    }
}
