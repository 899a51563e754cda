//! Container runtime error types

use thiserror::Error;

/// Errors surfaced by the container runtime gateway
#[derive(Error, Debug)]
pub enum DockerError {
    /// The daemon cannot be reached at all; triggers executor fallback
    #[error("Container daemon unavailable: {0}")]
    DaemonUnavailable(String),

    #[error("Container API error: {0}")]
    Api(#[from] bollard::errors::Error),

    #[error("Image pull failed for {image}: {message}")]
    ImagePull { image: String, message: String },

    #[error("No stats available for container {0}")]
    NoStats(String),
}
