//! Metrics sink posting to a machine agent's HTTP listener

use super::MetricsSink;
use crate::error::{AgentError, Result};
use crate::models::{AggregationType, MetricList};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;
use url::Url;

#[derive(Debug, Clone)]
pub struct MachineAgentConfig {
    /// Listener base URL, e.g. "http://localhost:8293"
    pub endpoint: String,
    pub request_timeout: Duration,
}

impl Default for MachineAgentConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8293".to_string(),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Wire format of one metric accepted by the listener
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ListenerMetric<'a> {
    metric_name: &'a str,
    aggregator_type: AggregationType,
    value: i64,
}

/// [`MetricsSink`] for the machine agent HTTP listener (`POST /api/v1/metrics`)
pub struct MachineAgentClient {
    client: Client,
    metrics_url: Url,
}

impl MachineAgentClient {
    pub fn new(config: MachineAgentConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| AgentError::transport(config.endpoint.clone(), e))?;

        let invalid = |reason: String| {
            AgentError::InvalidConfig(format!("machine agent endpoint {}: {}", config.endpoint, reason))
        };
        let mut metrics_url = Url::parse(&config.endpoint).map_err(|e| invalid(e.to_string()))?;
        metrics_url
            .path_segments_mut()
            .map_err(|_| invalid("no path".to_string()))?
            .pop_if_empty()
            .extend(["api", "v1", "metrics"]);

        Ok(Self {
            client,
            metrics_url,
        })
    }
}

#[async_trait]
impl MetricsSink for MachineAgentClient {
    async fn post_metrics(&self, metrics: &MetricList) -> Result<()> {
        let payload: Vec<ListenerMetric<'_>> = metrics
            .items
            .iter()
            .map(|m| ListenerMetric {
                metric_name: &m.path,
                aggregator_type: m.aggregation,
                value: m.value,
            })
            .collect();

        let response = self
            .client
            .post(self.metrics_url.clone())
            .json(&payload)
            .send()
            .await
            .map_err(|e| AgentError::transport(self.metrics_url.as_str(), e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::Backend {
                operation: "metric submission",
                status: status.as_u16(),
                body,
            });
        }

        debug!(count = payload.len(), "Metrics accepted by machine agent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FlatMetric;
    use mockito::Matcher;

    fn client_for(server: &mockito::ServerGuard) -> MachineAgentClient {
        MachineAgentClient::new(MachineAgentConfig {
            endpoint: server.url(),
            request_timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_post_metrics_payload() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/v1/metrics")
            .match_body(Matcher::Json(serde_json::json!([
                {
                    "metricName": "Server|Component:T|Custom Metrics|Cluster Stats|Namespaces|all|JobCount",
                    "aggregatorType": "OBSERVATION",
                    "value": 3
                }
            ])))
            .with_status(204)
            .create_async()
            .await;

        let list = MetricList {
            items: vec![FlatMetric::observation(
                "JobCount",
                3,
                "Server|Component:T|Custom Metrics|Cluster Stats|Namespaces|all|",
            )],
        };

        client_for(&server).post_metrics(&list).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_post_metrics_rejected() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/v1/metrics")
            .with_status(503)
            .create_async()
            .await;

        let err = client_for(&server)
            .post_metrics(&MetricList::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Backend { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_endpoint_path_prefix_is_kept() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/listener/api/v1/metrics")
            .with_status(204)
            .create_async()
            .await;

        let client = MachineAgentClient::new(MachineAgentConfig {
            endpoint: format!("{}/listener/", server.url()),
            request_timeout: Duration::from_secs(5),
        })
        .unwrap();
        client.post_metrics(&MetricList::default()).await.unwrap();
        mock.assert_async().await;
    }
}
