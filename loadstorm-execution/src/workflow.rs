//! Multi-step workflow orchestration
//!
//! Executes ordered step trees: sequential groups run children in order
//! without short-circuiting on failure, parallel groups spawn children
//! concurrently and wait for all of them. Leaf responses feed a shared
//! extraction context so later steps can reference earlier results with
//! `{{stepId.field}}` placeholders.

use async_trait::async_trait;
use futures::future::{join_all, BoxFuture};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use loadstorm_core::{GroupKind, StepGroup, WorkflowRequest, WorkflowStep};

/// Matches `{{stepId.field.path}}` correlation placeholders
static CORRELATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{([A-Za-z0-9_-]+)\.([A-Za-z0-9_.\-]+)\}\}").expect("correlation regex")
});

/// Extracted responses keyed by step id, shared across one workflow run
type ExtractionContext = Arc<RwLock<HashMap<String, Value>>>;

/// Outcome of executing one leaf request, reported by the executor seam
#[derive(Debug, Clone, Default)]
pub struct LeafOutcome {
    pub success: bool,
    pub requests: u64,
    pub successful: u64,
    pub failed: u64,
    pub total_time_ms: f64,
    /// Parsed JSON body of the last successful response, for correlation
    pub extracted: Option<Value>,
    pub errors: Vec<String>,
}

/// Seam between the orchestrator and whatever issues the actual requests
#[async_trait]
pub trait LeafExecutor: Send + Sync {
    async fn execute_request(&self, request: &WorkflowRequest) -> LeafOutcome;
}

/// Per-step record in a workflow result
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub step_id: String,
    pub success: bool,
    pub requests: u64,
    pub successful: u64,
    pub failed: u64,
    pub total_time_ms: f64,
    pub errors: Vec<String>,
}

/// Complete outcome of one workflow run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowExecutionResult {
    /// True only when every step succeeded
    pub success: bool,
    pub steps: Vec<StepResult>,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub wall_clock_ms: f64,
}

/// Walks a workflow step tree and drives leaf execution
pub struct WorkflowOrchestrator {
    leaf: Arc<dyn LeafExecutor>,
}

impl WorkflowOrchestrator {
    pub fn new(leaf: Arc<dyn LeafExecutor>) -> Self {
        Self { leaf }
    }

    /// Execute the step tree. Top-level steps run sequentially; every step
    /// is attempted even when earlier ones fail.
    pub async fn execute(self: &Arc<Self>, steps: &[WorkflowStep]) -> WorkflowExecutionResult {
        info!(step_count = steps.len(), "starting workflow execution");
        let context: ExtractionContext = Arc::new(RwLock::new(HashMap::new()));
        let started = std::time::Instant::now();

        let mut results = Vec::new();
        for step in steps {
            results.extend(self.clone().run_step(step.clone(), context.clone()).await);
        }

        let outcome = summarize(results, started.elapsed().as_secs_f64() * 1000.0);
        info!(
            success = outcome.success,
            steps = outcome.steps.len(),
            requests = outcome.total_requests,
            "workflow finished"
        );
        outcome
    }

    /// Boxed so parallel groups can `tokio::spawn` recursive calls.
    fn run_step(
        self: Arc<Self>,
        step: WorkflowStep,
        context: ExtractionContext,
    ) -> BoxFuture<'static, Vec<StepResult>> {
        Box::pin(async move {
            match step {
                WorkflowStep::Request(request) => vec![self.run_leaf(request, context).await],
                WorkflowStep::Group(group) => self.run_group(group, context).await,
            }
        })
    }

    async fn run_group(
        self: Arc<Self>,
        group: StepGroup,
        context: ExtractionContext,
    ) -> Vec<StepResult> {
        match group.kind {
            GroupKind::Sequential => {
                let mut results = Vec::new();
                for step in group.steps {
                    // Failures are reported, never skipped past.
                    results.extend(self.clone().run_step(step, context.clone()).await);
                }
                results
            }
            GroupKind::Parallel => {
                let handles: Vec<_> = group
                    .steps
                    .into_iter()
                    .map(|step| tokio::spawn(self.clone().run_step(step, context.clone())))
                    .collect();

                let mut results = Vec::new();
                for (index, joined) in join_all(handles).await.into_iter().enumerate() {
                    match joined {
                        Ok(step_results) => results.extend(step_results),
                        Err(e) => {
                            warn!(index, "parallel step panicked: {}", e);
                            results.push(StepResult {
                                step_id: format!("parallel[{}]", index),
                                success: false,
                                requests: 0,
                                successful: 0,
                                failed: 0,
                                total_time_ms: 0.0,
                                errors: vec![format!("step aborted: {}", e)],
                            });
                        }
                    }
                }
                results
            }
        }
    }

    async fn run_leaf(
        self: Arc<Self>,
        request: WorkflowRequest,
        context: ExtractionContext,
    ) -> StepResult {
        let resolved = resolve_references(&request, &*context.read().await);
        debug!(step_id = %resolved.id, url = %resolved.url, "executing workflow step");

        let outcome = self.leaf.execute_request(&resolved).await;
        if let Some(extracted) = &outcome.extracted {
            context
                .write()
                .await
                .insert(request.id.clone(), extracted.clone());
        }

        StepResult {
            step_id: request.id,
            success: outcome.success,
            requests: outcome.requests,
            successful: outcome.successful,
            failed: outcome.failed,
            total_time_ms: outcome.total_time_ms,
            errors: outcome.errors,
        }
    }
}

/// Substitute `{{stepId.field}}` placeholders in the request's url, body,
/// and header values from previously extracted responses. Placeholders that
/// do not resolve stay verbatim.
fn resolve_references(
    request: &WorkflowRequest,
    extracted: &HashMap<String, Value>,
) -> WorkflowRequest {
    let mut resolved = request.clone();
    resolved.url = substitute(&request.url, extracted);
    resolved.body = request.body.as_deref().map(|b| substitute(b, extracted));
    if let Some(headers) = &request.headers {
        resolved.headers = Some(
            headers
                .iter()
                .map(|(k, v)| (k.clone(), substitute(v, extracted)))
                .collect(),
        );
    }
    resolved
}

fn substitute(input: &str, extracted: &HashMap<String, Value>) -> String {
    CORRELATION
        .replace_all(input, |caps: &regex::Captures<'_>| {
            let step_id = &caps[1];
            let path = &caps[2];
            match lookup(extracted.get(step_id), path) {
                Some(value) => value,
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Walk a dotted field path into an extracted JSON value
fn lookup(root: Option<&Value>, path: &str) -> Option<String> {
    let mut current = root?;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(match current {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}

fn summarize(steps: Vec<StepResult>, wall_clock_ms: f64) -> WorkflowExecutionResult {
    let success = !steps.is_empty() && steps.iter().all(|s| s.success);
    let total_requests = steps.iter().map(|s| s.requests).sum();
    let successful_requests = steps.iter().map(|s| s.successful).sum();
    let failed_requests = steps.iter().map(|s| s.failed).sum();
    WorkflowExecutionResult {
        success,
        steps,
        total_requests,
        successful_requests,
        failed_requests,
        wall_clock_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loadstorm_core::HttpMethod;
    use std::sync::Mutex;

    /// Records every request it receives; fails ids listed in `fail_ids`
    /// and serves canned extraction values keyed by id.
    #[derive(Default)]
    struct FakeLeaf {
        seen: Mutex<Vec<WorkflowRequest>>,
        fail_ids: Vec<String>,
        extractions: HashMap<String, Value>,
    }

    #[async_trait]
    impl LeafExecutor for FakeLeaf {
        async fn execute_request(&self, request: &WorkflowRequest) -> LeafOutcome {
            self.seen.lock().unwrap().push(request.clone());
            let fails = self.fail_ids.contains(&request.id);
            LeafOutcome {
                success: !fails,
                requests: 1,
                successful: if fails { 0 } else { 1 },
                failed: if fails { 1 } else { 0 },
                total_time_ms: 5.0,
                extracted: self.extractions.get(&request.id).cloned(),
                errors: if fails {
                    vec![format!("step {} failed", request.id)]
                } else {
                    vec![]
                },
            }
        }
    }

    fn leaf_step(id: &str) -> WorkflowStep {
        WorkflowStep::Request(WorkflowRequest {
            id: id.into(),
            method: HttpMethod::Get,
            url: format!("https://x/{}", id),
            headers: None,
            body: None,
            request_count: 1,
        })
    }

    fn orchestrator(leaf: FakeLeaf) -> (Arc<WorkflowOrchestrator>, Arc<FakeLeaf>) {
        let leaf = Arc::new(leaf);
        (
            Arc::new(WorkflowOrchestrator::new(leaf.clone())),
            leaf,
        )
    }

    #[tokio::test]
    async fn test_sequential_failure_does_not_short_circuit() {
        let (orchestrator, leaf) = orchestrator(FakeLeaf {
            fail_ids: vec!["a".into()],
            ..FakeLeaf::default()
        });

        let steps = vec![leaf_step("a"), leaf_step("b")];
        let result = orchestrator.execute(&steps).await;

        assert!(!result.success);
        assert_eq!(result.steps.len(), 2);
        assert!(!result.steps[0].success);
        assert!(result.steps[1].success);
        assert_eq!(leaf.seen.lock().unwrap().len(), 2);
        assert_eq!(result.total_requests, 2);
        assert_eq!(result.failed_requests, 1);
    }

    #[tokio::test]
    async fn test_parallel_group_runs_every_child() {
        let (orchestrator, leaf) = orchestrator(FakeLeaf {
            fail_ids: vec!["p2".into()],
            ..FakeLeaf::default()
        });

        let steps = vec![WorkflowStep::Group(StepGroup {
            kind: GroupKind::Parallel,
            steps: vec![leaf_step("p1"), leaf_step("p2"), leaf_step("p3")],
            id: None,
        })];
        let result = orchestrator.execute(&steps).await;

        assert!(!result.success);
        assert_eq!(result.steps.len(), 3);
        assert_eq!(leaf.seen.lock().unwrap().len(), 3);
        assert_eq!(result.successful_requests, 2);
    }

    #[tokio::test]
    async fn test_correlation_resolves_across_steps() {
        let mut extractions = HashMap::new();
        extractions.insert(
            "login".to_string(),
            serde_json::json!({"auth": {"token": "t-123"}, "userId": 42}),
        );
        let (orchestrator, leaf) = orchestrator(FakeLeaf {
            extractions,
            ..FakeLeaf::default()
        });

        let steps = vec![
            leaf_step("login"),
            WorkflowStep::Request(WorkflowRequest {
                id: "fetch".into(),
                method: HttpMethod::Get,
                url: "https://x/users/{{login.userId}}".into(),
                headers: Some(HashMap::from([(
                    "Authorization".to_string(),
                    "Bearer {{login.auth.token}}".to_string(),
                )])),
                body: Some(r#"{"missing": "{{login.nope}}"}"#.into()),
                request_count: 1,
            }),
        ];
        let result = orchestrator.execute(&steps).await;
        assert!(result.success);

        let seen = leaf.seen.lock().unwrap();
        let fetch = &seen[1];
        assert_eq!(fetch.url, "https://x/users/42");
        assert_eq!(
            fetch.headers.as_ref().unwrap()["Authorization"],
            "Bearer t-123"
        );
        // Unresolvable placeholders pass through verbatim.
        assert_eq!(
            fetch.body.as_deref(),
            Some(r#"{"missing": "{{login.nope}}"}"#)
        );
    }

    #[tokio::test]
    async fn test_nested_groups_execute_in_tree_order() {
        let (orchestrator, leaf) = orchestrator(FakeLeaf::default());

        let steps = vec![
            leaf_step("first"),
            WorkflowStep::Group(StepGroup {
                kind: GroupKind::Sequential,
                steps: vec![
                    leaf_step("second"),
                    WorkflowStep::Group(StepGroup {
                        kind: GroupKind::Parallel,
                        steps: vec![leaf_step("p1"), leaf_step("p2")],
                        id: None,
                    }),
                ],
                id: Some("outer".into()),
            }),
        ];
        let result = orchestrator.execute(&steps).await;

        assert!(result.success);
        assert_eq!(result.steps.len(), 4);
        let seen = leaf.seen.lock().unwrap();
        assert_eq!(seen[0].id, "first");
        assert_eq!(seen[1].id, "second");
        // The parallel children follow in either order.
        let tail: Vec<_> = seen[2..].iter().map(|r| r.id.clone()).collect();
        assert!(tail.contains(&"p1".to_string()));
        assert!(tail.contains(&"p2".to_string()));
    }

    #[tokio::test]
    async fn test_empty_workflow_is_not_successful() {
        let (orchestrator, _) = orchestrator(FakeLeaf::default());
        let result = orchestrator.execute(&[]).await;
        assert!(!result.success);
        assert_eq!(result.total_requests, 0);
    }
}
