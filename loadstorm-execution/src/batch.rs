//! Batch execution of independent tests
//!
//! Runs a collection of tests in parallel or sequentially, never letting one
//! item's failure abort the rest, and aggregates their metrics into a single
//! summary. Sequential batches can thread dynamic payload values through the
//! items, advancing them between runs.

use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use loadstorm_core::{
    AggregatedMetrics, AggregationMode, BatchTestSpec, DynamicPayloadSpec, ErrorKind,
    ExecutionMode, ExecutionStatus, ExecutorKind, IncrementRule, LoadTestSpec, PerformanceMetrics,
    TestError, TestResult, WorkflowStep,
};

use crate::selector::ExecutorSelector;
use crate::workflow::{LeafExecutor, WorkflowExecutionResult, WorkflowOrchestrator};

/// One item's outcome inside a batch
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchTestResult {
    pub item_id: String,
    pub item_name: String,
    pub result: TestResult,
}

/// Complete outcome of one batch run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchExecutionResult {
    pub batch_name: String,
    pub results: Vec<BatchTestResult>,
    /// Present in combined aggregation mode
    pub aggregated: Option<AggregatedMetrics>,
    pub wall_clock_secs: f64,
}

/// Per-batch mutable payload values advanced between sequential items
#[derive(Debug, Clone)]
struct DynamicPayloadState {
    values: HashMap<String, Value>,
    rules: HashMap<String, IncrementRule>,
}

impl DynamicPayloadState {
    fn new(spec: &DynamicPayloadSpec) -> Self {
        Self {
            values: spec.base_values.clone(),
            rules: spec.increment_rules.clone(),
        }
    }

    /// Substitute `{{key}}` occurrences in the item's request bodies,
    /// payload templates, and workflow steps with the current values.
    fn apply(&self, spec: &mut LoadTestSpec) {
        for request in &mut spec.requests {
            if let Some(body) = &mut request.body {
                *body = self.substitute(body);
            }
            if let Some(payload) = &mut request.payload {
                payload.template = self.substitute(&payload.template);
            }
        }
        if let Some(steps) = &mut spec.workflow {
            for step in steps {
                self.apply_step(step);
            }
        }
    }

    fn apply_step(&self, step: &mut WorkflowStep) {
        match step {
            WorkflowStep::Request(request) => {
                request.url = self.substitute(&request.url);
                if let Some(body) = &mut request.body {
                    *body = self.substitute(body);
                }
                if let Some(headers) = &mut request.headers {
                    for value in headers.values_mut() {
                        *value = self.substitute(value);
                    }
                }
            }
            WorkflowStep::Group(group) => {
                for child in &mut group.steps {
                    self.apply_step(child);
                }
            }
        }
    }

    fn substitute(&self, input: &str) -> String {
        let mut output = input.to_string();
        for (key, value) in &self.values {
            let placeholder = format!("{{{{{}}}}}", key);
            if output.contains(&placeholder) {
                let rendered = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                output = output.replace(&placeholder, &rendered);
            }
        }
        output
    }

    /// Advance every ruled value by its step. Numbers add the step; strings
    /// with a trailing numeric suffix have the suffix advanced.
    fn advance(&mut self) {
        for (key, rule) in &self.rules {
            let Some(value) = self.values.get_mut(key) else {
                continue;
            };
            match value {
                Value::Number(n) => {
                    if let Some(current) = n.as_i64() {
                        *value = Value::from(current + rule.step);
                    }
                }
                Value::String(s) => {
                    *s = advance_suffix(s, rule.step);
                }
                _ => {}
            }
        }
    }
}

/// Advance the trailing numeric suffix of a string value by `step`
fn advance_suffix(base: &str, step: i64) -> String {
    let digits_start = base
        .rfind(|c: char| !c.is_ascii_digit())
        .map(|i| i + 1)
        .unwrap_or(0);
    let (prefix, suffix) = base.split_at(digits_start);
    match suffix.parse::<i64>() {
        Ok(n) => format!("{}{}", prefix, n + step),
        Err(_) => format!("{}{}", base, step),
    }
}

/// Runs a batch of independent tests and aggregates their metrics
pub struct BatchOrchestrator {
    selector: Arc<ExecutorSelector>,
    workflow: Arc<WorkflowOrchestrator>,
}

impl BatchOrchestrator {
    pub fn new(selector: Arc<ExecutorSelector>, leaf: Arc<dyn LeafExecutor>) -> Self {
        Self {
            selector,
            workflow: Arc::new(WorkflowOrchestrator::new(leaf)),
        }
    }

    /// Execute every item in the batch. Always yields exactly one result per
    /// item; individual failures become failed results, never batch errors.
    pub async fn execute_batch(&self, batch: &BatchTestSpec) -> BatchExecutionResult {
        info!(
            batch = %batch.name,
            items = batch.tests.len(),
            mode = ?batch.execution_mode,
            "starting batch execution"
        );
        let started = std::time::Instant::now();

        let results = match batch.execution_mode {
            ExecutionMode::Parallel => self.run_parallel(batch).await,
            ExecutionMode::Sequential => self.run_sequential(batch).await,
        };

        let wall_clock_secs = started.elapsed().as_secs_f64();
        let aggregated = match batch.aggregation_mode {
            AggregationMode::Combined => Some(aggregate(&results, wall_clock_secs)),
            AggregationMode::Separate => None,
        };

        info!(
            batch = %batch.name,
            completed = results.iter().filter(|r| r.result.status == ExecutionStatus::Completed).count(),
            failed = results.iter().filter(|r| r.result.status != ExecutionStatus::Completed).count(),
            "batch finished"
        );
        BatchExecutionResult {
            batch_name: batch.name.clone(),
            results,
            aggregated,
            wall_clock_secs,
        }
    }

    /// Spawned per item so one item's panic becomes a failed result for that
    /// item instead of aborting the batch.
    async fn run_parallel(&self, batch: &BatchTestSpec) -> Vec<BatchTestResult> {
        let handles: Vec<_> = batch
            .tests
            .iter()
            .map(|item| {
                let spec = item.to_spec(
                    batch.global_load_pattern.as_ref(),
                    batch.global_duration.as_ref(),
                );
                let selector = self.selector.clone();
                let workflow = self.workflow.clone();
                tokio::spawn(async move {
                    BatchTestResult {
                        item_id: spec.id.clone(),
                        item_name: spec.name.clone(),
                        result: Self::run_item(selector, workflow, spec).await,
                    }
                })
            })
            .collect();

        let mut results = Vec::with_capacity(batch.tests.len());
        for (item, joined) in batch.tests.iter().zip(join_all(handles).await) {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => {
                    warn!(item = %item.id, "batch item aborted: {}", e);
                    results.push(BatchTestResult {
                        item_id: item.id.clone(),
                        item_name: item.name.clone(),
                        result: TestResult::failed(
                            &item.id,
                            &item.name,
                            Utc::now(),
                            ExecutorKind::Direct,
                            TestError::new(
                                ErrorKind::Execution,
                                format!("test aborted unexpectedly: {}", e),
                            ),
                        ),
                    });
                }
            }
        }
        results
    }

    async fn run_sequential(&self, batch: &BatchTestSpec) -> Vec<BatchTestResult> {
        let mut payload_state = batch
            .dynamic_payloads
            .as_ref()
            .filter(|d| d.enabled)
            .map(DynamicPayloadState::new);

        let mut results = Vec::with_capacity(batch.tests.len());
        for item in &batch.tests {
            let mut spec = item.to_spec(
                batch.global_load_pattern.as_ref(),
                batch.global_duration.as_ref(),
            );
            if let Some(state) = &payload_state {
                state.apply(&mut spec);
            }

            let item_id = spec.id.clone();
            let item_name = spec.name.clone();
            let result =
                Self::run_item(self.selector.clone(), self.workflow.clone(), spec).await;
            debug!(item = %item_id, status = ?result.status, "batch item finished");
            results.push(BatchTestResult {
                item_id,
                item_name,
                result,
            });

            if let Some(state) = &mut payload_state {
                state.advance();
            }
        }
        results
    }

    /// Dispatch one item: workflow items go to the workflow orchestrator,
    /// everything else through executor selection.
    async fn run_item(
        selector: Arc<ExecutorSelector>,
        workflow: Arc<WorkflowOrchestrator>,
        spec: LoadTestSpec,
    ) -> TestResult {
        match &spec.workflow {
            Some(steps) if !steps.is_empty() => {
                let started_at = Utc::now();
                let outcome = workflow.execute(steps).await;
                workflow_result(&spec, started_at, outcome)
            }
            _ => selector.select_and_execute(&spec).await,
        }
    }
}

/// Shape a workflow outcome into the common result type
fn workflow_result(
    spec: &LoadTestSpec,
    started_at: chrono::DateTime<Utc>,
    outcome: WorkflowExecutionResult,
) -> TestResult {
    let elapsed_secs = outcome.wall_clock_ms / 1000.0;
    let metrics = PerformanceMetrics {
        total_requests: outcome.total_requests,
        successful_requests: outcome.successful_requests,
        failed_requests: outcome.failed_requests,
        error_rate: if outcome.total_requests > 0 {
            outcome.failed_requests as f64 / outcome.total_requests as f64
        } else {
            0.0
        },
        throughput_rps: if outcome.total_requests > 0 && elapsed_secs > 0.0 {
            outcome.total_requests as f64 / elapsed_secs
        } else {
            0.0
        },
        ..PerformanceMetrics::default()
    };

    let errors = outcome
        .steps
        .iter()
        .flat_map(|s| s.errors.iter())
        .map(|message| TestError::new(ErrorKind::Execution, message.clone()))
        .collect();

    TestResult {
        spec_id: spec.id.clone(),
        spec_name: spec.name.clone(),
        started_at,
        completed_at: Utc::now(),
        status: if outcome.success {
            ExecutionStatus::Completed
        } else {
            ExecutionStatus::Failed
        },
        metrics,
        errors,
        fallback_used: false,
        executor: ExecutorKind::Direct,
        raw_output: None,
        logs: Vec::new(),
    }
}

/// Combine item metrics into one batch-level summary.
///
/// Success counts are derived as `floor(total * (1 - error_rate))` from each
/// item so aggregation stays consistent with items whose executors report
/// only a failure fraction. The response-time sample is each item's average
/// repeated once per request; percentiles use nearest rank over that sample,
/// computed as weighted runs so large batches never materialize it.
pub fn aggregate(results: &[BatchTestResult], wall_clock_secs: f64) -> AggregatedMetrics {
    let mut total = 0u64;
    let mut successful = 0u64;
    let mut runs: Vec<(f64, u64)> = Vec::with_capacity(results.len());
    let mut min = f64::MAX;
    let mut max: f64 = 0.0;

    for item in results {
        let metrics = &item.result.metrics;
        total += metrics.total_requests;
        successful += (metrics.total_requests as f64 * (1.0 - metrics.error_rate)).floor() as u64;

        if metrics.total_requests > 0 {
            runs.push((metrics.avg_response_time_ms, metrics.total_requests));
            if metrics.min_response_time_ms > 0.0 {
                min = min.min(metrics.min_response_time_ms);
            }
            max = max.max(metrics.max_response_time_ms);
        }
    }

    if total == 0 {
        return AggregatedMetrics {
            wall_clock_secs,
            ..AggregatedMetrics::default()
        };
    }

    let failed = total - successful;
    runs.sort_by(|a, b| a.0.total_cmp(&b.0));
    let weighted_sum: f64 = runs.iter().map(|(value, count)| value * *count as f64).sum();
    let avg = weighted_sum / total as f64;

    AggregatedMetrics {
        total_requests: total,
        successful_requests: successful,
        failed_requests: failed,
        success_rate: successful as f64 / total as f64,
        error_rate: failed as f64 / total as f64,
        avg_response_time_ms: avg,
        min_response_time_ms: if min == f64::MAX { 0.0 } else { min },
        max_response_time_ms: max,
        p50_response_time_ms: weighted_percentile(&runs, total, 50.0),
        p90_response_time_ms: weighted_percentile(&runs, total, 90.0),
        p95_response_time_ms: weighted_percentile(&runs, total, 95.0),
        p99_response_time_ms: weighted_percentile(&runs, total, 99.0),
        combined_throughput_rps: if wall_clock_secs > 0.0 {
            total as f64 / wall_clock_secs
        } else {
            0.0
        },
        wall_clock_secs,
    }
}

/// Nearest-rank percentile over runs of identical values, sorted ascending.
/// Equivalent to `percentile` on the expanded sample: rank
/// `ceil(p/100 * total)` clamped to `[1, total]`, then the run containing
/// that rank.
fn weighted_percentile(runs: &[(f64, u64)], total: u64, p: f64) -> f64 {
    if runs.is_empty() || total == 0 {
        return 0.0;
    }
    let rank = ((p / 100.0 * total as f64).ceil() as u64).clamp(1, total);
    let mut seen = 0u64;
    for (value, count) in runs {
        seen += count;
        if seen >= rank {
            return *value;
        }
    }
    runs[runs.len() - 1].0
}
