//! Agent configuration

use anyhow::{bail, Context, Result};
use job_agent_lib::{AggregatorConfig, EventsApiConfig, FlushConfig, MachineAgentConfig};
use serde::Deserialize;
use std::time::Duration;

/// Agent configuration, read from `AGENT_*` environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Application the cluster is reported under
    #[serde(default = "default_app_name")]
    pub app_name: String,

    /// Component (tier) name used in metric paths
    #[serde(default = "default_tier_name")]
    pub tier_name: String,

    /// Cluster identity stamped on every job record
    #[serde(default = "default_cluster_name")]
    pub cluster_name: String,

    /// Node name from Kubernetes downward API
    #[serde(default = "default_node_name")]
    pub node_name: String,

    /// Events service account name
    #[serde(default)]
    pub global_account: String,

    /// Events service API key
    #[serde(default)]
    pub event_key: String,

    #[serde(default = "default_event_service_url")]
    pub event_service_url: String,

    /// Machine agent HTTP listener
    #[serde(default = "default_machine_agent_url")]
    pub machine_agent_url: String,

    /// Maximum records posted per flush
    #[serde(default = "default_event_api_limit")]
    pub event_api_limit: usize,

    #[serde(default = "default_job_schema_name")]
    pub job_schema_name: String,

    /// Namespace for jobs without one
    #[serde(default = "default_namespace")]
    pub default_namespace: String,

    #[serde(default = "default_metrics_interval")]
    pub metrics_interval_secs: u64,

    #[serde(default = "default_flush_interval")]
    pub flush_interval_secs: u64,

    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,
}

fn default_app_name() -> String {
    "k8s-cluster".to_string()
}

fn default_tier_name() -> String {
    "ClusterAgent".to_string()
}

fn default_cluster_name() -> String {
    std::env::var("CLUSTER_NAME").unwrap_or_else(|_| default_app_name())
}

fn default_node_name() -> String {
    std::env::var("NODE_NAME").unwrap_or_else(|_| "unknown".to_string())
}

fn default_event_service_url() -> String {
    "https://analytics.api.appdynamics.com".to_string()
}

fn default_machine_agent_url() -> String {
    "http://localhost:8293".to_string()
}

fn default_event_api_limit() -> usize {
    100
}

fn default_job_schema_name() -> String {
    "job_schema".to_string()
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_metrics_interval() -> u64 {
    45
}

fn default_flush_interval() -> u64 {
    15
}

fn default_api_port() -> u16 {
    8080
}

impl AgentConfig {
    /// Load configuration from the environment
    pub fn load() -> Result<Self> {
        Self::from_source(config::Environment::with_prefix("AGENT"))
    }

    fn from_source<S>(source: S) -> Result<Self>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let config = config::Config::builder()
            .add_source(source)
            .build()
            .context("Failed to read agent configuration")?;

        let config: AgentConfig = config
            .try_deserialize()
            .context("Invalid agent configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the agent cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.metrics_interval_secs == 0 {
            bail!("metrics_interval_secs must be greater than zero");
        }
        if self.flush_interval_secs == 0 {
            bail!("flush_interval_secs must be greater than zero");
        }
        if self.event_api_limit == 0 {
            bail!("event_api_limit must be at least 1");
        }
        if self.job_schema_name.trim().is_empty() {
            bail!("job_schema_name must not be empty");
        }
        Ok(())
    }

    pub fn aggregator_config(&self) -> AggregatorConfig {
        AggregatorConfig {
            interval: Duration::from_secs(self.metrics_interval_secs),
            tier_name: self.tier_name.clone(),
            cluster_name: self.cluster_name.clone(),
            default_namespace: self.default_namespace.clone(),
        }
    }

    pub fn flush_config(&self) -> FlushConfig {
        FlushConfig {
            interval: Duration::from_secs(self.flush_interval_secs),
            event_api_limit: self.event_api_limit,
            schema_name: self.job_schema_name.clone(),
        }
    }

    pub fn events_api_config(&self) -> EventsApiConfig {
        EventsApiConfig {
            endpoint: self.event_service_url.clone(),
            account_name: self.global_account.clone(),
            api_key: self.event_key.clone(),
            ..Default::default()
        }
    }

    pub fn machine_agent_config(&self) -> MachineAgentConfig {
        MachineAgentConfig {
            endpoint: self.machine_agent_url.clone(),
            ..Default::default()
        }
    }
}
