//! Executor selection and container-to-direct fallback
//!
//! Heavy tests go to the container engine; small ones run in-process. When
//! the container path fails before producing results, the run falls back to
//! the direct executor and the result is flagged accordingly.

use chrono::Utc;
use tracing::{info, warn};

use loadstorm_core::{ErrorKind, LoadTestSpec, PatternKind, TestError, TestResult, TestType};

use crate::direct::DirectExecutor;
use crate::engine::ContainerEngine;

/// Virtual-user count above which a test runs in a container
pub const CONTAINER_VU_THRESHOLD: u32 = 50;

/// Whether a spec is heavy enough to need the container engine
pub fn requires_container(spec: &LoadTestSpec) -> bool {
    if spec.load_pattern.virtual_users > CONTAINER_VU_THRESHOLD {
        return true;
    }
    if matches!(
        spec.load_pattern.kind,
        PatternKind::Spike | PatternKind::RampUp | PatternKind::RandomBurst
    ) {
        return true;
    }
    matches!(
        spec.test_type,
        TestType::Stress | TestType::Endurance | TestType::Volume
    )
}

/// Routes a spec to the container or direct path and handles fallback
pub struct ExecutorSelector {
    engine: ContainerEngine,
    direct: DirectExecutor,
}

impl ExecutorSelector {
    pub fn new(engine: ContainerEngine, direct: DirectExecutor) -> Self {
        Self { engine, direct }
    }

    /// Execute the spec with whichever path fits it. Container-path failures
    /// before results exist degrade to the direct executor; the returned
    /// result then carries `fallback_used` and a recorded error.
    pub async fn select_and_execute(&self, spec: &LoadTestSpec) -> TestResult {
        if !requires_container(spec) {
            info!(test_id = %spec.id, "selected direct executor");
            return self.direct.run(spec).await;
        }

        info!(test_id = %spec.id, vus = spec.load_pattern.virtual_users, "selected container engine");
        let started_at = Utc::now();
        match self.engine.run(spec).await {
            Ok(raw) => container_result(spec, started_at, raw),
            Err(e) => {
                warn!(test_id = %spec.id, "container path failed ({}), falling back to direct", e);
                let mut result = self.direct.run(spec).await;
                result.fallback_used = true;
                result.errors.insert(
                    0,
                    TestError::new(
                        ErrorKind::RuntimeUnavailable,
                        format!("container execution unavailable: {}", e),
                    )
                    .with_suggestion(
                        "Ensure the container daemon is running; results below were \
                         produced in-process at reduced concurrency",
                    ),
                );
                result
            }
        }
    }

    /// The direct path, exposed for callers that bypass selection
    pub fn direct(&self) -> &DirectExecutor {
        &self.direct
    }
}

/// Shape the engine's raw output into a `TestResult`
fn container_result(
    spec: &LoadTestSpec,
    started_at: chrono::DateTime<Utc>,
    raw: crate::engine::RawResults,
) -> TestResult {
    let mut errors = Vec::new();
    if raw.status == loadstorm_core::ExecutionStatus::Failed {
        errors.push(
            TestError::new(
                ErrorKind::Execution,
                format!("load generator exited with code {}", raw.exit_code),
            )
            .with_suggestion("Inspect the captured logs on this result"),
        );
    }
    let mut logs = raw.logs;
    logs.extend(raw.warnings.into_iter().map(|w| format!("warning: {}", w)));

    TestResult {
        spec_id: spec.id.clone(),
        spec_name: spec.name.clone(),
        started_at,
        completed_at: Utc::now(),
        status: raw.status,
        metrics: raw.metrics,
        errors,
        fallback_used: false,
        executor: loadstorm_core::ExecutorKind::Container,
        raw_output: raw.summary,
        logs,
    }
}
