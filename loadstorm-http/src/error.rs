//! HTTP error types

/// Error type for HTTP operations
#[derive(Debug, thiserror::Error)]
pub enum HttpClientError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid header name: {0}")]
    InvalidHeaderName(String),

    #[error("Invalid header value for {0}")]
    InvalidHeaderValue(String),

    #[error("Client configuration error: {0}")]
    Config(String),
}

impl HttpClientError {
    /// Network-level failures are retryable; configuration problems are not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, HttpClientError::Network(_))
    }
}
