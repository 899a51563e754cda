//! In-process execution path for small tests
//!
//! No container involved: requests are issued sequentially with pacing,
//! server errors retried with exponential backoff, and percentiles computed
//! locally. Failures become failed results, never errors.

use chrono::Utc;
use std::time::Duration;
use tracing::{debug, info};

use loadstorm_core::{
    ErrorKind, ExecutionStatus, ExecutorKind, LoadTestSpec, PayloadEngine, PerformanceMetrics,
    TestError, TestResult,
};
use loadstorm_http::{HttpConfig, RequestClient, RetryPolicy};

use crate::error::ExecutionError;
use crate::workflow::{LeafExecutor, LeafOutcome};

/// Direct executor tuning
#[derive(Debug, Clone)]
pub struct DirectConfig {
    /// Fixed inter-request delay for quick tests
    pub quick_delay: Duration,

    /// A test is quick when it has at most this many requests...
    pub quick_max_requests: u32,

    /// ...and at most this duration
    pub quick_max_duration_secs: u64,
}

impl Default for DirectConfig {
    fn default() -> Self {
        Self {
            quick_delay: Duration::from_millis(50),
            quick_max_requests: 50,
            quick_max_duration_secs: 60,
        }
    }
}

/// Sequential in-process request executor
pub struct DirectExecutor {
    client: RequestClient,
    retry: RetryPolicy,
    config: DirectConfig,
}

impl DirectExecutor {
    pub fn new() -> Result<Self, ExecutionError> {
        Self::with_config(
            &HttpConfig::default(),
            RetryPolicy::default(),
            DirectConfig::default(),
        )
    }

    pub fn with_config(
        http: &HttpConfig,
        retry: RetryPolicy,
        config: DirectConfig,
    ) -> Result<Self, ExecutionError> {
        let client = RequestClient::new(http)?;
        Ok(Self {
            client,
            retry,
            config,
        })
    }

    /// Execute the spec as a paced sequential request loop. Always returns a
    /// complete `TestResult`; failures are recorded on it.
    pub async fn run(&self, spec: &LoadTestSpec) -> TestResult {
        let started_at = Utc::now();

        if let Err(e) = spec.validate() {
            return TestResult::failed(
                &spec.id,
                &spec.name,
                started_at,
                ExecutorKind::Direct,
                TestError::new(ErrorKind::Configuration, e.to_string())
                    .with_suggestion("Fix the test specification and run again"),
            );
        }
        let Some(request) = spec.requests.first() else {
            return TestResult::failed(
                &spec.id,
                &spec.name,
                started_at,
                ExecutorKind::Direct,
                TestError::new(
                    ErrorKind::Configuration,
                    "specification declares no requests",
                )
                .with_suggestion("Add at least one request to the specification"),
            );
        };

        let count = spec.load_pattern.virtual_users.max(1);
        let delay = self.pacing_delay(spec, count);
        info!(test_id = %spec.id, count, ?delay, "starting direct execution");

        let engine = PayloadEngine::new();
        let mut samples = Vec::with_capacity(count as usize);
        let mut errors = Vec::new();
        let started = std::time::Instant::now();

        for index in 0..count {
            let body = self.request_body(request, &engine, index);
            let outcome = self
                .client
                .execute_with_retry(
                    request.method,
                    &request.url,
                    request.headers.as_ref(),
                    body.as_deref(),
                    &self.retry,
                )
                .await;

            match outcome {
                Ok(response) if response.status < 400 => samples.push(response.elapsed_ms),
                Ok(response) => {
                    debug!(status = response.status, index, "request failed");
                    errors.push(
                        TestError::new(
                            ErrorKind::Http,
                            format!("request {} returned status {}", index + 1, response.status),
                        )
                        .with_suggestion(suggestion_for_status(response.status)),
                    );
                }
                Err(e) => {
                    debug!(index, "request error: {}", e);
                    errors.push(
                        TestError::new(ErrorKind::Http, format!("request {}: {}", index + 1, e))
                            .with_suggestion(
                                "Verify the target is reachable from this machine",
                            ),
                    );
                }
            }

            if index + 1 < count && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }

        let failed = errors.len() as u64;
        let all_failed = samples.is_empty() && failed > 0;
        let metrics =
            PerformanceMetrics::from_samples(samples, failed, started.elapsed().as_secs_f64());

        TestResult {
            spec_id: spec.id.clone(),
            spec_name: spec.name.clone(),
            started_at,
            completed_at: Utc::now(),
            status: if all_failed {
                ExecutionStatus::Failed
            } else {
                ExecutionStatus::Completed
            },
            metrics,
            errors,
            fallback_used: false,
            executor: ExecutorKind::Direct,
            raw_output: None,
            logs: Vec::new(),
        }
    }

    /// Inter-request delay: spread requests over the test duration, or a
    /// fixed small delay for quick interactive tests.
    fn pacing_delay(&self, spec: &LoadTestSpec, count: u32) -> Duration {
        let duration_secs = spec.duration.as_secs();
        let quick = duration_secs <= self.config.quick_max_duration_secs
            && count <= self.config.quick_max_requests;
        if quick {
            self.config.quick_delay
        } else if count > 1 {
            Duration::from_secs_f64(duration_secs as f64 / (count - 1) as f64)
        } else {
            Duration::ZERO
        }
    }

    fn request_body(
        &self,
        request: &loadstorm_core::RequestSpec,
        engine: &PayloadEngine,
        index: u32,
    ) -> Option<String> {
        if let Some(payload) = &request.payload {
            Some(engine.resolve(payload, index))
        } else {
            request.body.clone()
        }
    }
}

fn suggestion_for_status(status: u16) -> &'static str {
    match status {
        401 | 403 => "Check authentication headers in the request specification",
        404 => "Verify the request URL path",
        429 => "Reduce the virtual user count or spread requests over a longer duration",
        500..=599 => "The target is failing under load; inspect its server logs",
        _ => "Inspect the target's response for details",
    }
}

#[async_trait::async_trait]
impl LeafExecutor for DirectExecutor {
    /// Execute one workflow leaf: `request_count` sequential calls with the
    /// configured retry policy, extracting the last successful JSON body for
    /// downstream correlation.
    async fn execute_request(&self, request: &loadstorm_core::WorkflowRequest) -> LeafOutcome {
        let count = request.request_count.max(1);
        let mut outcome = LeafOutcome {
            success: true,
            ..LeafOutcome::default()
        };

        for attempt_index in 0..count {
            let sent = self
                .client
                .execute_with_retry(
                    request.method,
                    &request.url,
                    request.headers.as_ref(),
                    request.body.as_deref(),
                    &self.retry,
                )
                .await;
            outcome.requests += 1;

            match sent {
                Ok(response) if response.status < 400 => {
                    outcome.successful += 1;
                    outcome.total_time_ms += response.elapsed_ms;
                    if let Ok(value) = serde_json::from_str(&response.body) {
                        outcome.extracted = Some(value);
                    }
                }
                Ok(response) => {
                    outcome.failed += 1;
                    outcome.success = false;
                    outcome.errors.push(format!(
                        "step {} request {} returned status {}",
                        request.id,
                        attempt_index + 1,
                        response.status
                    ));
                }
                Err(e) => {
                    outcome.failed += 1;
                    outcome.success = false;
                    outcome
                        .errors
                        .push(format!("step {}: {}", request.id, e));
                }
            }

            if attempt_index + 1 < count {
                tokio::time::sleep(self.config.quick_delay).await;
            }
        }
        outcome
    }
}
