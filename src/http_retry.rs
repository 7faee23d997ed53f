//! HTTP GET with bounded retry and backoff.
//!
//! Used for page scraping only. Player endpoint resolution is deliberately
//! single-shot; see [`crate::resolver`].

use reqwest::header::HeaderMap;
use reqwest::{Client, Response};
use std::time::Duration;
use tracing::warn;

/// Default number of fetch attempts (1 initial + 1 retry).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 2;

/// Default backoff between attempts in milliseconds.
pub const DEFAULT_BACKOFF_MS: u64 = 500;

/// Configuration for [`fetch_with_retry`].
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total number of attempts (minimum 1; 0 is treated as 1).
    pub max_attempts: u32,
    /// Sleep duration between consecutive attempts.
    pub backoff: Duration,
    /// Optional per-request timeout applied to each individual attempt.
    ///
    /// When `None`, the client's own timeout applies.
    pub timeout: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: Duration::from_millis(DEFAULT_BACKOFF_MS),
            timeout: None,
        }
    }
}

/// Fetch `url` with `headers`, retrying on network errors and non-2xx.
///
/// # Errors
///
/// Returns the last network or status error once all attempts are used.
pub async fn fetch_with_retry(
    client: &Client,
    url: &str,
    headers: &HeaderMap,
    config: &RetryConfig,
) -> Result<Response, reqwest::Error> {
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let mut request = client.get(url).headers(headers.clone());
        if let Some(timeout) = config.timeout {
            request = request.timeout(timeout);
        }

        let outcome = request.send().await.and_then(|r| r.error_for_status());
        match outcome {
            Ok(response) => return Ok(response),
            Err(e) if attempt >= max_attempts => {
                warn!(
                    "HTTP fetch failed for {} (attempt {}/{}): {}",
                    url, attempt, max_attempts, e
                );
                return Err(e);
            }
            Err(e) => {
                warn!(
                    "HTTP fetch failed for {} (attempt {}/{}): {}, retrying in {}ms",
                    url,
                    attempt,
                    max_attempts,
                    e,
                    config.backoff.as_millis()
                );
            }
        }

        tokio::time::sleep(config.backoff).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderValue, USER_AGENT};
    use wiremock::matchers::{header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            backoff: Duration::from_millis(1),
            timeout: None,
        }
    }

    #[test]
    fn retry_config_defaults() {
        let cfg = RetryConfig::default();
        assert_eq!(cfg.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert_eq!(cfg.backoff, Duration::from_millis(DEFAULT_BACKOFF_MS));
        assert!(cfg.timeout.is_none());
    }

    #[tokio::test]
    async fn sends_headers_and_succeeds_first_time() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("user-agent", "playlink-test"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("playlink-test"));

        let response = fetch_with_retry(&Client::new(), &server.uri(), &headers, &fast(2))
            .await
            .unwrap();
        assert_eq!(response.text().await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn retries_on_server_error_then_succeeds() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("recovered"))
            .expect(1)
            .mount(&server)
            .await;

        // Takes precedence for the first hit only
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .with_priority(1)
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;

        let response = fetch_with_retry(&Client::new(), &server.uri(), &HeaderMap::new(), &fast(2))
            .await
            .unwrap();
        assert_eq!(response.text().await.unwrap(), "recovered");
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let result = fetch_with_retry(&Client::new(), &server.uri(), &HeaderMap::new(), &fast(3)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn zero_attempts_still_tries_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let result = fetch_with_retry(&Client::new(), &server.uri(), &HeaderMap::new(), &fast(0)).await;
        assert!(result.is_err());
    }
}
