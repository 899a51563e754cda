//! HTTP client support for the direct execution path
//!
//! A thin wrapper over reqwest that issues one timed request at a time, plus
//! the retry policy the direct executor applies to server errors and network
//! failures.

pub mod client;
pub mod config;
pub mod error;
pub mod retry;

pub use client::{RequestClient, TimedResponse};
pub use config::HttpConfig;
pub use error::HttpClientError;
pub use retry::RetryPolicy;
