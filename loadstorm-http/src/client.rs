//! HTTP client wrapper issuing timed requests

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Instant;
use tracing::{debug, warn};

use loadstorm_core::HttpMethod;

use crate::config::HttpConfig;
use crate::error::HttpClientError;
use crate::retry::RetryPolicy;

/// One completed request with its measured latency
#[derive(Debug, Clone)]
pub struct TimedResponse {
    pub status: u16,
    pub elapsed_ms: f64,
    pub body: String,
}

impl TimedResponse {
    /// Whether the status indicates a server-side failure
    pub fn is_server_error(&self) -> bool {
        RetryPolicy::should_retry_status(self.status)
    }
}

/// Thin wrapper over a shared reqwest client
#[derive(Debug, Clone)]
pub struct RequestClient {
    client: Client,
}

impl RequestClient {
    pub fn new(config: &HttpConfig) -> Result<Self, HttpClientError> {
        debug!(
            "Creating RequestClient with timeout: {}s",
            config.timeout.as_secs()
        );
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .redirect(reqwest::redirect::Policy::limited(
                config.max_redirects as usize,
            ))
            .danger_accept_invalid_certs(!config.verify_ssl)
            .build()
            .map_err(|e| HttpClientError::Config(e.to_string()))?;
        Ok(Self { client })
    }

    /// Issue a single request and measure its wall-clock latency.
    pub async fn execute(
        &self,
        method: HttpMethod,
        url: &str,
        headers: Option<&HashMap<String, String>>,
        body: Option<&str>,
    ) -> Result<TimedResponse, HttpClientError> {
        let parsed =
            url::Url::parse(url).map_err(|_| HttpClientError::InvalidUrl(url.to_string()))?;
        let method = Method::from_str(method.as_str())
            .map_err(|_| HttpClientError::Config(format!("unsupported method {}", method)))?;

        let mut request = self.client.request(method, parsed);
        if let Some(headers) = headers {
            request = request.headers(build_header_map(headers)?);
        }
        if let Some(body) = body {
            request = request.body(body.to_string());
        }

        let start = Instant::now();
        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

        debug!(status, elapsed_ms, "request completed");
        Ok(TimedResponse {
            status,
            elapsed_ms,
            body,
        })
    }

    /// Issue a request, retrying server errors and network failures per the
    /// policy. Returns the last response or the last error once attempts are
    /// exhausted.
    pub async fn execute_with_retry(
        &self,
        method: HttpMethod,
        url: &str,
        headers: Option<&HashMap<String, String>>,
        body: Option<&str>,
        policy: &RetryPolicy,
    ) -> Result<TimedResponse, HttpClientError> {
        let mut attempt = 1;
        loop {
            match self.execute(method, url, headers, body).await {
                Ok(response) if response.is_server_error() && attempt < policy.max_attempts => {
                    let delay = policy.delay_for_attempt(attempt);
                    warn!(
                        status = response.status,
                        attempt, "server error, retrying in {:?}", delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                    let delay = policy.delay_for_attempt(attempt);
                    warn!(attempt, "network error ({}), retrying in {:?}", e, delay);
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
            attempt += 1;
        }
    }
}

fn build_header_map(headers: &HashMap<String, String>) -> Result<HeaderMap, HttpClientError> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let header_name = HeaderName::from_str(name)
            .map_err(|_| HttpClientError::InvalidHeaderName(name.clone()))?;
        let header_value = HeaderValue::from_str(value)
            .map_err(|_| HttpClientError::InvalidHeaderValue(name.clone()))?;
        map.insert(header_name, header_value);
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_builds_with_defaults() {
        let client = RequestClient::new(&HttpConfig::default());
        assert!(client.is_ok());
    }

    #[test]
    fn test_header_map_rejects_bad_names() {
        let mut headers = HashMap::new();
        headers.insert("bad header name".to_string(), "x".to_string());
        assert!(matches!(
            build_header_map(&headers),
            Err(HttpClientError::InvalidHeaderName(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_url_is_rejected_without_network() {
        let client = RequestClient::new(&HttpConfig::default()).unwrap();
        let result = client
            .execute(HttpMethod::Get, "not a url", None, None)
            .await;
        assert!(matches!(result, Err(HttpClientError::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn test_connection_refused_exhausts_retries() {
        let client = RequestClient::new(&HttpConfig::default()).unwrap();
        let policy = RetryPolicy {
            max_attempts: 2,
            base_delay: std::time::Duration::from_millis(1),
            max_delay: std::time::Duration::from_millis(2),
        };
        // Port 9 is discard; nothing listens there in the test environment.
        let result = client
            .execute_with_retry(HttpMethod::Get, "http://127.0.0.1:9/", None, None, &policy)
            .await;
        assert!(result.is_err());
    }
}
