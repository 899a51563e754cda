//! Error types for execution

use thiserror::Error;

/// Errors surfaced by the execution layer.
///
/// Only setup-phase failures propagate out of the engines; post-start
/// failures are recorded on the returned results instead.
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Environment setup failed: {0}")]
    Setup(String),

    #[error("Container runtime error: {0}")]
    Runtime(#[from] loadstorm_docker::DockerError),

    #[error("Monitor error: {0}")]
    Monitor(#[from] loadstorm_monitor::MonitorError),

    #[error("HTTP client error: {0}")]
    Http(#[from] loadstorm_http::HttpClientError),

    #[error("Invalid specification: {0}")]
    InvalidSpec(#[from] loadstorm_core::SpecError),

    #[error("Execution failed: {0}")]
    Failed(String),
}
