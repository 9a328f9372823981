//! REST client for the analytics events service

use super::EventSink;
use crate::error::{AgentError, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use std::time::Duration;
use tracing::debug;
use url::Url;

const EVENTS_CONTENT_TYPE: &str = "application/vnd.appd.events+json;v=2";

/// Connection settings for the events service
#[derive(Debug, Clone)]
pub struct EventsApiConfig {
    /// Base URL, e.g. "https://analytics.api.appdynamics.com"
    pub endpoint: String,
    /// Global account name sent with every request
    pub account_name: String,
    /// Events API key
    pub api_key: String,
    pub request_timeout: Duration,
}

impl Default for EventsApiConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://analytics.api.appdynamics.com".to_string(),
            account_name: String::new(),
            api_key: String::new(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// [`EventSink`] backed by the events service REST API
pub struct EventsApiClient {
    client: Client,
    base_url: Url,
    account_name: String,
    api_key: String,
}

impl EventsApiClient {
    pub fn new(config: EventsApiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| AgentError::transport(config.endpoint.clone(), e))?;

        let base_url = Url::parse(&config.endpoint).map_err(|e| {
            AgentError::InvalidConfig(format!("events endpoint {}: {}", config.endpoint, e))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(AgentError::InvalidConfig(format!(
                "events endpoint {} has no path",
                config.endpoint
            )));
        }

        Ok(Self {
            client,
            base_url,
            account_name: config.account_name,
            api_key: config.api_key,
        })
    }

    /// Append percent-encoded segments to the endpoint, keeping any path prefix
    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                AgentError::InvalidConfig(format!("events endpoint {} has no path", self.base_url))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn with_auth(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("X-Events-API-AccountName", &self.account_name)
            .header("X-Events-API-Key", &self.api_key)
            .header("Accept", EVENTS_CONTENT_TYPE)
    }

    async fn send(&self, url: &Url, request: RequestBuilder) -> Result<Response> {
        request
            .send()
            .await
            .map_err(|e| AgentError::transport(url.as_str(), e))
    }
}

/// Turn a non-success response into a backend error
async fn ensure_success(operation: &'static str, response: Response) -> Result<()> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response.text().await.unwrap_or_default();
    Err(AgentError::Backend {
        operation,
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl EventSink for EventsApiClient {
    async fn schema_exists(&self, schema_name: &str) -> Result<bool> {
        let url = self.url(&["events", "schema", schema_name])?;
        let response = self
            .send(&url, self.with_auth(self.client.get(url.clone())))
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            _ => ensure_success("schema check", response).await.map(|_| false),
        }
    }

    async fn create_schema(&self, schema_name: &str, definition: &[u8]) -> Result<()> {
        let url = self.url(&["events", "schema", schema_name])?;
        let request = self
            .with_auth(self.client.post(url.clone()))
            .header("Content-Type", EVENTS_CONTENT_TYPE)
            .body(definition.to_vec());

        let response = self.send(&url, request).await?;
        ensure_success("schema creation", response).await?;
        debug!(schema = %schema_name, "Schema created");
        Ok(())
    }

    async fn post_events(&self, schema_name: &str, batch: &[u8]) -> Result<()> {
        let url = self.url(&["events", "publish", schema_name])?;
        let request = self
            .with_auth(self.client.post(url.clone()))
            .header("Content-Type", EVENTS_CONTENT_TYPE)
            .body(batch.to_vec());

        let response = self.send(&url, request).await?;
        ensure_success("event publish", response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn client_for(server: &mockito::ServerGuard) -> EventsApiClient {
        EventsApiClient::new(EventsApiConfig {
            endpoint: server.url(),
            account_name: "customer1_abc".to_string(),
            api_key: "secret-key".to_string(),
            request_timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_schema_exists_true_on_200() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/events/schema/job_schema")
            .match_header("X-Events-API-AccountName", "customer1_abc")
            .match_header("X-Events-API-Key", "secret-key")
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        assert!(client_for(&server).schema_exists("job_schema").await.unwrap());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_schema_exists_false_on_404() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/events/schema/job_schema")
            .with_status(404)
            .create_async()
            .await;

        assert!(!client_for(&server).schema_exists("job_schema").await.unwrap());
    }

    #[tokio::test]
    async fn test_schema_exists_errors_on_server_failure() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/events/schema/job_schema")
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        let err = client_for(&server)
            .schema_exists("job_schema")
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Backend { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_create_schema_posts_definition() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/events/schema/job_schema")
            .match_header("Content-Type", EVENTS_CONTENT_TYPE)
            .match_body(Matcher::JsonString(r#"{"schema":{"name":"string"}}"#.to_string()))
            .with_status(201)
            .create_async()
            .await;

        client_for(&server)
            .create_schema("job_schema", br#"{"schema":{"name":"string"}}"#)
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_post_events_reports_rejection() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/events/publish/job_schema")
            .with_status(400)
            .with_body("schema mismatch")
            .create_async()
            .await;

        let err = client_for(&server)
            .post_events("job_schema", b"[]")
            .await
            .unwrap_err();
        match err {
            AgentError::Backend { status, body, .. } => {
                assert_eq!(status, 400);
                assert_eq!(body, "schema mismatch");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_endpoint_path_prefix_is_kept() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/proxy/events/publish/job_schema")
            .with_status(200)
            .create_async()
            .await;

        let client = EventsApiClient::new(EventsApiConfig {
            endpoint: format!("{}/proxy", server.url()),
            ..Default::default()
        })
        .unwrap();
        client.post_events("job_schema", b"[]").await.unwrap();
        mock.assert_async().await;
    }

    #[test]
    fn test_url_encodes_schema_name() {
        for endpoint in ["https://events.local/proxy", "https://events.local/proxy/"] {
            let client = EventsApiClient::new(EventsApiConfig {
                endpoint: endpoint.to_string(),
                ..Default::default()
            })
            .unwrap();

            let url = client.url(&["events", "schema", "jobs/v2 beta"]).unwrap();
            assert_eq!(
                url.as_str(),
                "https://events.local/proxy/events/schema/jobs%2Fv2%20beta"
            );
        }
    }

    #[test]
    fn test_invalid_endpoint_rejected() {
        let result = EventsApiClient::new(EventsApiConfig {
            endpoint: "not a url".to_string(),
            ..Default::default()
        });
        assert!(matches!(result, Err(AgentError::InvalidConfig(_))));
    }
}
