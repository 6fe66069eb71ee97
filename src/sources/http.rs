//! Shared HTTP plumbing for the network-backed adapters.

use super::traits::ProviderError;
use crate::config::{HttpConfig, SourceConfig};
use crate::document::Source;
use crate::resilience::RateLimiter;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// HTTP client, rate limiter and settings of one provider
#[derive(Debug)]
pub struct HttpSource {
    source: Source,
    client: Client,
    limiter: Mutex<RateLimiter>,
    settings: SourceConfig,
    timeout: Duration,
}

impl HttpSource {
    pub fn new(
        source: Source,
        http: &HttpConfig,
        settings: SourceConfig,
    ) -> Result<Self, ProviderError> {
        let timeout = Duration::from_secs(http.timeout_secs);
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(http.connect_timeout_secs))
            .user_agent(&http.user_agent)
            .build()
            .map_err(|e| ProviderError::Other(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            limiter: Mutex::new(RateLimiter::new(settings.requests_per_second)),
            source,
            client,
            settings,
            timeout,
        })
    }

    #[must_use]
    pub const fn client(&self) -> &Client {
        &self.client
    }

    #[must_use]
    pub const fn settings(&self) -> &SourceConfig {
        &self.settings
    }

    /// Base URL without a trailing slash
    #[must_use]
    pub fn base_url(&self) -> &str {
        self.settings.base_url.trim_end_matches('/')
    }

    /// Send a request once the per-provider rate limit allows it
    pub async fn send(&self, request: RequestBuilder) -> Result<Response, ProviderError> {
        self.limiter.lock().await.acquire().await;

        request.send().await.map_err(|e| {
            warn!("{} request failed: {}", self.source, e);
            if e.is_timeout() {
                ProviderError::Timeout(self.timeout)
            } else {
                ProviderError::Network {
                    source_name: self.source.to_string(),
                    message: e.to_string(),
                }
            }
        })
    }

    /// Map a non-success status to a provider error, passing successes through
    pub async fn check_status(&self, response: Response) -> Result<Response, ProviderError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after = retry_after_secs(response.headers());
        let body = response.text().await.unwrap_or_default();
        debug!("{} answered HTTP {}: {}", self.source, status, truncate(&body, 200));

        Err(self.status_error(status, retry_after, &body))
    }

    pub(crate) fn status_error(
        &self,
        status: StatusCode,
        retry_after: Option<Duration>,
        body: &str,
    ) -> ProviderError {
        match status.as_u16() {
            429 => ProviderError::RateLimit { retry_after },
            401 | 403 => ProviderError::Auth(format!("HTTP {status}")),
            400 | 404 | 422 => {
                ProviderError::InvalidQuery(format!("HTTP {status}: {}", truncate(body, 200)))
            }
            500..=599 => ProviderError::ServiceUnavailable {
                source_name: self.source.to_string(),
                reason: format!("HTTP {status}"),
            },
            _ => ProviderError::Other(format!("{} answered HTTP {status}", self.source)),
        }
    }

    /// Check the status and decode a JSON body
    pub async fn json<T: DeserializeOwned>(&self, response: Response) -> Result<T, ProviderError> {
        let response = self.check_status(response).await?;
        let text = response.text().await.map_err(|e| ProviderError::Network {
            source_name: self.source.to_string(),
            message: format!("Failed to read response: {e}"),
        })?;

        serde_json::from_str(&text)
            .map_err(|e| ProviderError::Parse(format!("{} payload: {e}", self.source)))
    }
}

/// `Retry-After` in its delta-seconds form
fn retry_after_secs(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
