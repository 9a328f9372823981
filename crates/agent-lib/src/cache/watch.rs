//! List-then-watch loop that keeps the job cache current

use super::JobCache;
use crate::error::{AgentError, Result};
use crate::observability::AgentMetrics;
use k8s_openapi::api::batch::v1::Job;
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client};
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_stream::{Stream, StreamExt};
use tracing::{info, warn};

/// Stream of watch events for the job kind
pub type JobEventStream =
    Pin<Box<dyn Stream<Item = std::result::Result<watcher::Event<Job>, watcher::Error>> + Send>>;

/// Drives a watch stream into a [`JobCache`] until stopped
pub struct JobWatcher {
    events: JobEventStream,
    cache: Arc<JobCache>,
    metrics: AgentMetrics,
}

impl JobWatcher {
    /// Watch jobs in all namespaces through the given client.
    ///
    /// Relisting and retry with exponential backoff are handled by the
    /// underlying watcher stream.
    pub fn new(client: Client, cache: Arc<JobCache>) -> Self {
        let api: Api<Job> = Api::all(client);
        let events = watcher(api, watcher::Config::default()).default_backoff();
        Self::from_stream(events, cache)
    }

    /// Build the client from the ambient kubeconfig or in-cluster config.
    ///
    /// Fails fast if no client can be constructed; the caller must abort startup.
    pub async fn connect(cache: Arc<JobCache>) -> Result<Self> {
        let client = Client::try_default().await.map_err(AgentError::ClientInit)?;
        Ok(Self::new(client, cache))
    }

    /// Watch an arbitrary event stream (used for testing)
    pub fn from_stream<S>(events: S, cache: Arc<JobCache>) -> Self
    where
        S: Stream<Item = std::result::Result<watcher::Event<Job>, watcher::Error>> + Send + 'static,
    {
        Self {
            events: Box::pin(events),
            cache,
            metrics: AgentMetrics::new(),
        }
    }

    /// The cache this watcher feeds
    pub fn cache(&self) -> &Arc<JobCache> {
        &self.cache
    }

    /// Run until the stop signal fires or the stream ends
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!("Starting job watch loop");

        loop {
            tokio::select! {
                next = self.events.next() => match next {
                    Some(Ok(event)) => self.cache.apply(event),
                    Some(Err(e)) => {
                        self.metrics.inc_watch_errors();
                        warn!(error = %e, "Job watch error, stream will retry");
                    }
                    None => {
                        warn!("Job watch stream ended");
                        break;
                    }
                },
                _ = shutdown.recv() => {
                    info!("Shutting down job watch loop");
                    break;
                }
            }
        }
    }
}
