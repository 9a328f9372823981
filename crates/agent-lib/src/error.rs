//! Error type shared by every component of the job agent

use thiserror::Error;

/// Errors surfaced by the cache, sinks and orchestrator
#[derive(Debug, Error)]
pub enum AgentError {
    /// The typed Kubernetes client could not be constructed.
    /// Fatal to the watcher, so startup must abort.
    #[error("failed to initialize Kubernetes client: {0}")]
    ClientInit(#[source] kube::Error),

    /// A batch or schema definition could not be encoded
    #[error("failed to serialize {what}: {source}")]
    Serialization {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// The request never produced a response
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The backend answered with a non-success status
    #[error("backend rejected {operation} with status {status}: {body}")]
    Backend {
        operation: &'static str,
        status: u16,
        body: String,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl AgentError {
    /// Build a serialization error for the named payload
    pub fn serialization(what: &'static str, source: serde_json::Error) -> Self {
        Self::Serialization { what, source }
    }

    /// Build a transport error for the given URL
    pub fn transport(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Transport {
            url: url.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;
