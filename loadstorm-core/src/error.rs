//! Error types for specification validation

use thiserror::Error;

/// Errors raised while validating a `LoadTestSpec` before execution
#[derive(Error, Debug)]
pub enum SpecError {
    #[error("Specification has no requests, workflow, or batch to execute")]
    Empty,

    #[error("Payload template references undeclared variable: {0}")]
    UndeclaredPlaceholder(String),

    #[error("Request declares both a literal body and a payload template: {0}")]
    AmbiguousBody(String),

    #[error("Invalid specification: {0}")]
    Invalid(String),
}
