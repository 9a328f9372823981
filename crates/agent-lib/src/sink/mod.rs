//! Backends that receive aggregate metrics and per-job event records

mod events_api;
mod machine_agent;

pub use events_api::{EventsApiClient, EventsApiConfig};
pub use machine_agent::{MachineAgentClient, MachineAgentConfig};

use crate::error::Result;
use crate::models::MetricList;
use async_trait::async_trait;

/// Receives the flattened metric list of one aggregation pass
#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn post_metrics(&self, metrics: &MetricList) -> Result<()>;
}

/// Analytics backend for event records, keyed by schema name
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Whether the schema is already declared on the backend
    async fn schema_exists(&self, schema_name: &str) -> Result<bool>;

    async fn create_schema(&self, schema_name: &str, definition: &[u8]) -> Result<()>;

    /// Publish a serialized batch of records under the schema
    async fn post_events(&self, schema_name: &str, batch: &[u8]) -> Result<()>;
}
