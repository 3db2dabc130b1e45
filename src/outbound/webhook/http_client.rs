use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, Response};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

/// Limit on response bytes kept for the attempt log
const MAX_BODY_SIZE: usize = 1024 * 1024;

/// Error type for HTTP client operations.
///
/// Only transport-level problems are errors; any HTTP status is a response.
#[derive(Debug, Error)]
pub enum HttpClientError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Request timeout after {0:?}")]
    Timeout(Duration),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Network error: {0}")]
    NetworkError(String),
}

impl HttpClientError {
    fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            HttpClientError::Timeout(timeout)
        } else if err.is_builder() {
            HttpClientError::InvalidUrl(err.to_string())
        } else if err.is_connect() {
            HttpClientError::NetworkError(err.to_string())
        } else {
            HttpClientError::RequestFailed(err.to_string())
        }
    }
}

/// What came back from one POST
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// `Retry-After` in delta-seconds; HTTP-date values are ignored
    pub fn retry_after_secs(&self) -> Option<u64> {
        self.headers
            .get(RETRY_AFTER.as_str())
            .and_then(|v| v.trim().parse::<u64>().ok())
    }
}

/// HTTP client wrapper for webhook delivery
pub struct WebhookHttpClient {
    client: Client,
    timeout: Duration,
}

impl WebhookHttpClient {
    /// Create a new HTTP client with default timeout (10 seconds)
    pub fn new() -> Result<Self, HttpClientError> {
        Self::with_timeout(Duration::from_secs(10), default_user_agent())
    }

    /// Create a new HTTP client with custom timeout and user agent
    pub fn with_timeout(timeout: Duration, user_agent: String) -> Result<Self, HttpClientError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| HttpClientError::RequestFailed(e.to_string()))?;

        Ok(Self { client, timeout })
    }

    /// POST `body` with the given headers.
    pub async fn post(
        &self,
        url: &str,
        headers: HeaderMap,
        body: String,
    ) -> Result<HttpResponse, HttpClientError> {
        debug!(url = %url, "Sending webhook");

        let start = Instant::now();

        let response = self
            .client
            .post(url)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                warn!(url = %url, error = %e, "Webhook request failed");
                HttpClientError::from_reqwest(e, self.timeout)
            })?;

        let status = response.status().as_u16();
        let headers = collect_headers(response.headers());
        let body = self.read_response_body(response).await?;
        let elapsed = start.elapsed();

        debug!(
            url = %url,
            status = %status,
            response_time_ms = %elapsed.as_millis(),
            "Webhook response received"
        );

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }

    /// Read response body with size limit
    async fn read_response_body(&self, response: Response) -> Result<String, HttpClientError> {
        let bytes = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                HttpClientError::Timeout(self.timeout)
            } else {
                HttpClientError::RequestFailed(format!("Failed to read response body: {e}"))
            }
        })?;

        if bytes.len() > MAX_BODY_SIZE {
            warn!(
                size = bytes.len(),
                max_size = MAX_BODY_SIZE,
                "Response body too large, truncating"
            );
        }

        let body = String::from_utf8_lossy(&bytes[..bytes.len().min(MAX_BODY_SIZE)]).to_string();
        Ok(body)
    }

    /// Get configured timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

pub fn default_user_agent() -> String {
    format!("SurveyWebhooks/{}", env!("CARGO_PKG_VERSION"))
}

/// Lower-cased header names; non-UTF-8 values are dropped
pub(crate) fn collect_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}
