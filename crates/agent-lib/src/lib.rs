//! Agent library for batch job monitoring
//!
//! This crate provides the core functionality for:
//! - A watch-fed local cache of every batch Job in the cluster
//! - Periodic aggregation into cluster and per-namespace metrics
//! - A rate-limited event queue flushed in batches to an events API
//! - Lifecycle orchestration, health checks and observability

pub mod aggregator;
pub mod cache;
pub mod error;
pub mod flusher;
pub mod health;
pub mod models;
pub mod observability;
pub mod orchestrator;
pub mod queue;
pub mod sink;

pub use aggregator::{AggregatorConfig, MetricsAggregator, PassReport};
pub use cache::{ChangeNotifier, JobCache, JobWatcher, LoggingNotifier};
pub use error::{AgentError, Result};
pub use flusher::{FlushConfig, FlushReport, QueueFlusher};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{AgentMetrics, StructuredLogger};
pub use orchestrator::{JobsWorker, JobsWorkerBuilder, LifecycleState, OrchestratorConfig};
pub use sink::{
    EventSink, EventsApiClient, EventsApiConfig, MachineAgentClient, MachineAgentConfig,
    MetricsSink,
};
