// crates/waypoint-server/src/llm/http_client.rs
// Shared HTTP client for the inference service

use crate::error::{GatewayError, Result};
use reqwest::Client;
use std::sync::Mutex;
use std::time::Duration;
use tracing::warn;

/// Default end-to-end request timeout (local generation can be slow).
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 300;
/// Default connect timeout.
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Connection-pool holder for inference-service calls.
///
/// The pooled client is handed out per request and rebuilt after connect
/// failures, so a wedged pool never outlives the error that revealed it.
/// Retries are not done here — the resilience middleware owns backoff.
pub struct HttpClient {
    inner: Mutex<Client>,
    request_timeout: Duration,
    connect_timeout: Duration,
}

impl HttpClient {
    pub fn new(request_timeout: Duration, connect_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(build_client(request_timeout, connect_timeout)),
            request_timeout,
            connect_timeout,
        }
    }

    /// Current pooled client (cheap handle clone).
    pub fn client(&self) -> Client {
        self.inner
            .lock()
            .map(|c| c.clone())
            .unwrap_or_else(|_| build_client(self.request_timeout, self.connect_timeout))
    }

    /// Replace the pool after a connect-level failure.
    pub fn invalidate(&self) {
        warn!("Rebuilding inference-service connection pool after connect failure");
        if let Ok(mut inner) = self.inner.lock() {
            *inner = build_client(self.request_timeout, self.connect_timeout);
        }
    }

    /// Translate an HTTP status + body into the error taxonomy:
    /// 5xx and 429 are retryable (`LlmUnavailable`), other 4xx are not.
    pub fn classify_status(status: reqwest::StatusCode, body: &str) -> GatewayError {
        if status.is_server_error() || status.as_u16() == 429 {
            GatewayError::LlmUnavailable(format!("HTTP {status}: {body}"))
        } else {
            GatewayError::InvalidInput(format!("HTTP {status}: {body}"))
        }
    }

    /// Translate a transport-level reqwest failure, invalidating the pool on
    /// connect errors so the next call starts fresh.
    pub fn classify_error(&self, err: reqwest::Error) -> GatewayError {
        if err.is_connect() {
            self.invalidate();
            GatewayError::LlmUnavailable(err.to_string())
        } else if err.is_timeout() {
            GatewayError::Timeout(self.request_timeout)
        } else {
            GatewayError::LlmUnavailable(err.to_string())
        }
    }

    /// POST a JSON body and return the response text, classified per the
    /// error taxonomy.
    pub async fn post_json(&self, url: &str, body: String) -> Result<String> {
        let response = self
            .client()
            .post(url)
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| self.classify_error(e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| self.classify_error(e))?;
        if !status.is_success() {
            return Err(Self::classify_status(status, &text));
        }
        Ok(text)
    }

    /// GET a URL and return the response text, classified as above.
    pub async fn get(&self, url: &str) -> Result<String> {
        let response = self
            .client()
            .get(url)
            .send()
            .await
            .map_err(|e| self.classify_error(e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| self.classify_error(e))?;
        if !status.is_success() {
            return Err(Self::classify_status(status, &text));
        }
        Ok(text)
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new(
            Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
        )
    }
}

fn build_client(request_timeout: Duration, connect_timeout: Duration) -> Client {
    Client::builder()
        .timeout(request_timeout)
        .connect_timeout(connect_timeout)
        .build()
        .unwrap_or_else(|_| Client::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_server_errors_are_retryable() {
        let err = HttpClient::classify_status(StatusCode::INTERNAL_SERVER_ERROR, "boom");
        assert!(err.is_retryable());
        assert_eq!(err.kind(), "llm_unavailable");

        let err = HttpClient::classify_status(StatusCode::TOO_MANY_REQUESTS, "slow down");
        assert!(err.is_retryable());
    }

    #[test]
    fn test_client_errors_are_not_retryable() {
        let err = HttpClient::classify_status(StatusCode::NOT_FOUND, "no such model");
        assert!(!err.is_retryable());
        assert_eq!(err.kind(), "invalid_input");

        let err = HttpClient::classify_status(StatusCode::BAD_REQUEST, "bad body");
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_connect_refused_is_llm_unavailable() {
        // Nothing listens on this port
        let client = HttpClient::new(Duration::from_secs(2), Duration::from_millis(200));
        let err = client
            .get("http://127.0.0.1:9/api/tags")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "llm_unavailable");
        assert!(err.is_retryable());
    }

    #[test]
    fn test_invalidate_rebuilds_pool() {
        let client = HttpClient::default();
        let before = client.client();
        client.invalidate();
        let after = client.client();
        // Both are usable handles; the pool behind them was replaced
        drop((before, after));
    }
}
