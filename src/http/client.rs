//! HTTP probe client.
//!
//! # Responsibilities
//! - Issue GET requests with a per-request timeout
//! - Turn non-2xx responses into errors carrying the status
//! - Classify failures for the default retry policy
//!
//! # Design Decisions
//! - 5xx and transport failures are retryable, 4xx are terminal
//! - The body is read fully so latency covers the whole exchange

use std::time::{Duration, Instant};

use thiserror::Error;
use url::Url;

use crate::resilience::CallError;

/// Errors from a single probe request.
#[derive(Debug, Error)]
pub enum HttpError {
    /// The server answered with a non-success status.
    #[error("{url} returned HTTP {status}")]
    Status { status: u16, url: String },

    /// Connecting, sending or reading the response failed.
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

impl CallError for HttpError {
    fn status(&self) -> Option<u16> {
        match self {
            HttpError::Status { status, .. } => Some(*status),
            HttpError::Transport { source, .. } => CallError::status(source),
            HttpError::Client(_) => None,
        }
    }

    fn is_network(&self) -> bool {
        match self {
            HttpError::Transport { source, .. } => CallError::is_network(source),
            HttpError::Status { .. } | HttpError::Client(_) => false,
        }
    }
}

/// Successful probe outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResponse {
    pub status: u16,
    pub body_len: usize,
    pub latency: Duration,
}

/// GET-only client used to probe endpoints.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpProbe {
    pub fn new(timeout: Duration) -> Result<Self, HttpError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("resilient-probe/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(HttpError::Client)?;
        Ok(Self { client, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// GET `url`; any non-2xx status is an error.
    pub async fn get(&self, url: &Url) -> Result<ProbeResponse, HttpError> {
        let started = Instant::now();
        let transport = |source| HttpError::Transport {
            url: url.to_string(),
            source,
        };

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        if !status.is_success() {
            tracing::debug!(url = %url, status = %status, "Probe returned non-success status");
            return Err(HttpError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let body = response.bytes().await.map_err(transport)?;
        Ok(ProbeResponse {
            status: status.as_u16(),
            body_len: body.len(),
            latency: started.elapsed(),
        })
    }
}
