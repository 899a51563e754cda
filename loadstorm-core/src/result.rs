//! Test result and metrics types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::stats::{percentile, sort_samples};

/// Lifecycle status of a test run; also the vocabulary of the container
/// engine's state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    #[default]
    Pending,
    Preparing,
    Starting,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    /// Whether the status is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }
}

/// Which execution path produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutorKind {
    Container,
    #[default]
    Direct,
}

/// Classification of a recorded test error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Configuration,
    #[serde(rename = "runtime-unavailable")]
    RuntimeUnavailable,
    Execution,
    Http,
    Cancelled,
}

/// One recorded error with an optional remediation suggestion
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestError {
    pub message: String,
    pub kind: ErrorKind,
    #[serde(default)]
    pub suggestion: Option<String>,
}

impl TestError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind,
            suggestion: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

/// Aggregate request statistics for one completed run
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceMetrics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub min_response_time_ms: f64,
    pub max_response_time_ms: f64,
    pub avg_response_time_ms: f64,
    pub p50_response_time_ms: f64,
    pub p90_response_time_ms: f64,
    pub p95_response_time_ms: f64,
    pub p99_response_time_ms: f64,
    pub throughput_rps: f64,
    /// Fraction of requests that failed, in `[0, 1]`
    pub error_rate: f64,
}

impl PerformanceMetrics {
    /// Build metrics from per-request response time samples (milliseconds,
    /// successful requests only) plus a failure count and wall-clock elapsed
    /// seconds.
    pub fn from_samples(mut samples: Vec<f64>, failed: u64, elapsed_secs: f64) -> Self {
        let successful = samples.len() as u64;
        let total = successful + failed;
        if samples.is_empty() {
            return Self {
                total_requests: total,
                failed_requests: failed,
                error_rate: if total > 0 { 1.0 } else { 0.0 },
                ..Self::default()
            };
        }

        sort_samples(&mut samples);
        let sum: f64 = samples.iter().sum();
        Self {
            total_requests: total,
            successful_requests: successful,
            failed_requests: failed,
            min_response_time_ms: samples[0],
            max_response_time_ms: samples[samples.len() - 1],
            avg_response_time_ms: sum / samples.len() as f64,
            p50_response_time_ms: percentile(&samples, 50.0),
            p90_response_time_ms: percentile(&samples, 90.0),
            p95_response_time_ms: percentile(&samples, 95.0),
            p99_response_time_ms: percentile(&samples, 99.0),
            throughput_rps: if elapsed_secs > 0.0 {
                total as f64 / elapsed_secs
            } else {
                0.0
            },
            error_rate: if total > 0 {
                failed as f64 / total as f64
            } else {
                0.0
            },
        }
    }
}

/// Mutable, single-writer progress snapshot published while a test runs.
///
/// Observers subscribe to a stream of these; the publisher never reads
/// one back.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionMetrics {
    pub test_id: String,
    pub status: ExecutionStatus,
    pub progress_percent: f64,
    pub concurrency: u32,
    pub requests_completed: u64,
    pub requests_per_second: f64,
    pub avg_response_time_ms: f64,
    pub error_rate: f64,
    pub timestamp: DateTime<Utc>,
}

impl ExecutionMetrics {
    pub fn new(test_id: impl Into<String>, status: ExecutionStatus) -> Self {
        Self {
            test_id: test_id.into(),
            status,
            progress_percent: 0.0,
            concurrency: 0,
            requests_completed: 0,
            requests_per_second: 0.0,
            avg_response_time_ms: 0.0,
            error_rate: 0.0,
            timestamp: Utc::now(),
        }
    }
}

/// Immutable result of one executed `LoadTestSpec`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub spec_id: String,
    pub spec_name: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub status: ExecutionStatus,
    pub metrics: PerformanceMetrics,
    #[serde(default)]
    pub errors: Vec<TestError>,
    /// True when the container path failed and the direct executor ran instead
    #[serde(default)]
    pub fallback_used: bool,
    pub executor: ExecutorKind,
    #[serde(default)]
    pub raw_output: Option<serde_json::Value>,
    #[serde(default)]
    pub logs: Vec<String>,
}

impl TestResult {
    /// A complete failed-result shape; executors return this instead of
    /// propagating errors past the orchestrator boundary.
    pub fn failed(
        spec_id: impl Into<String>,
        spec_name: impl Into<String>,
        started_at: DateTime<Utc>,
        executor: ExecutorKind,
        error: TestError,
    ) -> Self {
        Self {
            spec_id: spec_id.into(),
            spec_name: spec_name.into(),
            started_at,
            completed_at: Utc::now(),
            status: ExecutionStatus::Failed,
            metrics: PerformanceMetrics::default(),
            errors: vec![error],
            fallback_used: false,
            executor,
            raw_output: None,
            logs: Vec::new(),
        }
    }
}

/// Read-only summary computed once from a completed set of results
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedMetrics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub success_rate: f64,
    pub error_rate: f64,
    pub avg_response_time_ms: f64,
    pub min_response_time_ms: f64,
    pub max_response_time_ms: f64,
    pub p50_response_time_ms: f64,
    pub p90_response_time_ms: f64,
    pub p95_response_time_ms: f64,
    pub p99_response_time_ms: f64,
    pub combined_throughput_rps: f64,
    pub wall_clock_secs: f64,
}
