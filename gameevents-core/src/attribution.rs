//! Install attribution lookup
//!
//! One lookup per session, made after identifier resolution. The result is
//! the raw attribution JSON from the backend, or `None` when there is none
//! (organic install, network failure, error response). Failures are not
//! retried.

use serde::Serialize;
use tokio::runtime::Handle;

use crate::config::CollectorConfig;
use crate::delivery::build_http_client;
use crate::error::{Error, Result};

/// Parameters of an attribution lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttributionRequest {
    /// Empty when identifier resolution failed or returned nothing
    pub advertising_id: String,
    pub user_id: String,
    pub platform: String,
    pub session_id: String,
}

pub type AttributionCallback = Box<dyn FnOnce(Option<String>) + Send + 'static>;

/// Backend attribution lookup.
///
/// The callback may run on any thread; the manager routes it back through
/// the dispatcher.
pub trait AttributionClient: Send + Sync {
    fn check(&self, request: AttributionRequest, callback: AttributionCallback);
}

/// Attribution lookup over HTTP: `POST {server_url}/v1/attribution`.
pub struct HttpAttributionClient {
    http_client: reqwest::Client,
    url: String,
    runtime: Handle,
}

impl HttpAttributionClient {
    pub fn new(config: &CollectorConfig, api_key: &str, runtime: Handle) -> Result<Self> {
        config.validate()?;
        let http_client = build_http_client(config, api_key)?;
        Ok(Self {
            http_client,
            url: format!("{}/v1/attribution", config.base_url()),
            runtime,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn lookup(
        http_client: reqwest::Client,
        url: String,
        request: AttributionRequest,
    ) -> Result<Option<String>> {
        let response = http_client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Attribution(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::Attribution(format!("failed to read response: {}", e)))?;

        if !status.is_success() {
            return Err(Error::Api {
                status: status.as_u16(),
                body,
            });
        }

        Ok(Some(body).filter(|b| !b.trim().is_empty()))
    }
}

impl AttributionClient for HttpAttributionClient {
    fn check(&self, request: AttributionRequest, callback: AttributionCallback) {
        let http_client = self.http_client.clone();
        let url = self.url.clone();

        self.runtime.spawn(async move {
            let data = match Self::lookup(http_client, url, request).await {
                Ok(data) => data,
                Err(e) => {
                    tracing::warn!(error = %e, "Attribution check failed");
                    None
                }
            };
            callback(data);
        });
    }
}
