//! HTTP client for the collection endpoint
//!
//! Posts event batches to `{server_url}/v1/events`, authenticated with the
//! host's API key.

use std::time::Duration;

use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};

use crate::config::CollectorConfig;
use crate::error::{Error, Result};
use crate::types::EventRecord;

use super::Transport;

const API_KEY_HEADER: &str = "X-API-Key";

/// Batch of events sent in one request
#[derive(Debug, Clone, Serialize)]
pub struct EventBatch {
    /// Client send time, seconds since the Unix epoch
    pub sent_at: i64,

    /// Events to send, oldest first
    pub events: Vec<EventRecord>,
}

impl EventBatch {
    pub fn new(events: Vec<EventRecord>) -> Self {
        Self {
            sent_at: Utc::now().timestamp(),
            events,
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Response from POST /v1/events
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventsResponse {
    /// Number of events accepted
    #[serde(default)]
    pub accepted: usize,
    /// Number of events rejected (validation errors)
    #[serde(default)]
    pub rejected: usize,
}

/// Build the shared HTTP client with auth headers for `api_key`.
pub(crate) fn build_http_client(config: &CollectorConfig, api_key: &str) -> Result<reqwest::Client> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(&format!("gameevents/{}", env!("CARGO_PKG_VERSION")))
            .map_err(|e| Error::Config(format!("invalid user agent: {}", e)))?,
    );
    headers.insert(
        API_KEY_HEADER,
        HeaderValue::from_str(api_key)
            .map_err(|e| Error::Config(format!("invalid api_key: {}", e)))?,
    );

    reqwest::Client::builder()
        .timeout(config.timeout())
        .default_headers(headers)
        .build()
        .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))
}

/// HTTP client for the collection API
pub struct CollectorClient {
    config: CollectorConfig,
    http_client: reqwest::Client,
    base_url: String,
}

impl CollectorClient {
    /// Create a new collector client bound to `api_key`
    ///
    /// Returns an error if the configuration is invalid or the key is empty.
    pub fn new(config: CollectorConfig, api_key: &str) -> Result<Self> {
        config.validate()?;

        if api_key.trim().is_empty() {
            return Err(Error::Config("api_key must not be empty".to_string()));
        }

        let http_client = build_http_client(&config, api_key)?;
        let base_url = config.base_url();

        Ok(Self {
            config,
            http_client,
            base_url,
        })
    }

    /// Send a batch of events once
    pub async fn send_events(&self, batch: &EventBatch) -> Result<EventsResponse> {
        let url = format!("{}/v1/events", self.base_url);

        let response = self
            .http_client
            .post(&url)
            .json(batch)
            .send()
            .await
            .map_err(|e| Error::Delivery(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::Delivery(format!("failed to read response: {}", e)))?;

        if !status.is_success() {
            return Err(Error::Api {
                status: status.as_u16(),
                body,
            });
        }

        // An empty 2xx body means the whole batch was taken
        if body.trim().is_empty() {
            return Ok(EventsResponse {
                accepted: batch.len(),
                rejected: 0,
            });
        }

        serde_json::from_str(&body)
            .map_err(|e| Error::Delivery(format!("failed to parse response: {}", e)))
    }

    /// Send events with retry logic
    ///
    /// Retries transient failures (5xx, 429, network) with exponential backoff.
    pub async fn send_events_with_retry(&self, batch: &EventBatch) -> Result<EventsResponse> {
        let mut last_error = None;
        let mut delay = Duration::from_millis(500);

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                tracing::debug!(
                    "Retrying send_events (attempt {}/{}), waiting {:?}",
                    attempt + 1,
                    self.config.max_retries + 1,
                    delay
                );
                tokio::time::sleep(delay).await;
                delay = std::cmp::min(delay * 2, Duration::from_secs(30));
            }

            match self.send_events(batch).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() => {
                    tracing::warn!("Transient error sending events: {}", e);
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| Error::Delivery("max retries exceeded".to_string())))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl Transport for CollectorClient {
    fn send(
        &self,
        batch: &EventBatch,
    ) -> impl std::future::Future<Output = Result<EventsResponse>> + Send {
        self.send_events_with_retry(batch)
    }
}
