//! Network delivery of event batches.

use std::time::Duration;

use crate::events::EventBatch;
use crate::TrackerConfig;

/// Result of a single delivery attempt, driving the retry decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportOutcome {
    /// 2xx response; the batch is done.
    Delivered,
    /// 4xx response; the batch is malformed or unauthorized and retrying won't help.
    Rejected { status: u16 },
    /// Network error, timeout, or 5xx response; eligible for retry.
    TransientFailure { reason: String },
}

/// Delivery seam between the scheduler and the network.
///
/// Implementations hold no state between calls besides the configured endpoint and credentials.
#[allow(async_fn_in_trait)]
pub trait Transport: Send + 'static {
    /// Deliver one batch and classify the outcome. Must not panic.
    async fn send(&self, batch: &EventBatch) -> TransportOutcome;
}

/// HTTP transport: POSTs the serialized event array as JSON to the collection endpoint.
pub struct HttpTransport {
    // Client holds a connection pool internally, so we're reusing the client between requests.
    client: reqwest::Client,
    url: String,
    api_key: String,
    timeout: Duration,
}

impl HttpTransport {
    /// Build a transport for the endpoint and credentials in `config`.
    pub fn new(config: &TrackerConfig) -> HttpTransport {
        HttpTransport {
            client: reqwest::Client::new(),
            url: config.api_url().to_owned(),
            api_key: config.x_api_key.clone(),
            timeout: Duration::from_millis(config.batch_request_timeout_ms),
        }
    }
}

impl Transport for HttpTransport {
    async fn send(&self, batch: &EventBatch) -> TransportOutcome {
        log::debug!(target: "founderos",
                    sequence = batch.sequence, events = batch.events.len() as u64;
                    "delivering event batch");

        let result = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .header("x-api-key", &self.api_key)
            .json(&batch.events)
            .send()
            .await;

        match result {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    TransportOutcome::Delivered
                } else if status.is_client_error() {
                    TransportOutcome::Rejected {
                        status: status.as_u16(),
                    }
                } else {
                    TransportOutcome::TransientFailure {
                        reason: format!("server returned {status}"),
                    }
                }
            }
            Err(err) if err.is_timeout() => TransportOutcome::TransientFailure {
                reason: "request timed out".to_owned(),
            },
            Err(err) => TransportOutcome::TransientFailure {
                reason: err.without_url().to_string(),
            },
        }
    }
}
