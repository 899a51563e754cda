//! Monitoring error types

use thiserror::Error;

use loadstorm_docker::DockerError;

/// Errors surfaced by the execution monitor
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Monitoring already active for test: {0}")]
    AlreadyMonitoring(String),

    #[error("No active monitoring for test: {0}")]
    NotMonitoring(String),

    #[error("Container runtime error: {0}")]
    Runtime(#[from] DockerError),
}
