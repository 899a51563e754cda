//! Test specification types
//!
//! These types mirror the JSON produced by the upstream parser (camelCase
//! field names on the wire). They are immutable descriptions of a test run
//! and are consumed read-only by every executor.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::SpecError;

/// HTTP methods supported by the request executors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
}

impl HttpMethod {
    /// Get the string representation of the HTTP method
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "DELETE" => Ok(HttpMethod::Delete),
            "PATCH" => Ok(HttpMethod::Patch),
            "HEAD" => Ok(HttpMethod::Head),
            "OPTIONS" => Ok(HttpMethod::Options),
            _ => Err(SpecError::Invalid(format!("unknown HTTP method: {}", s))),
        }
    }
}

/// The kind of load test being described
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TestType {
    #[default]
    Baseline,
    Spike,
    Stress,
    Endurance,
    Volume,
    Workflow,
    Batch,
}

/// Shape of concurrency over time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum PatternKind {
    #[default]
    Constant,
    RampUp,
    Spike,
    Step,
    RandomBurst,
}

/// Units accepted for test durations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DurationUnit {
    #[default]
    Seconds,
    Minutes,
    Hours,
}

/// A test duration as the parser supplies it: a value plus a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestDuration {
    pub value: u64,
    pub unit: DurationUnit,
}

impl TestDuration {
    pub fn seconds(value: u64) -> Self {
        Self {
            value,
            unit: DurationUnit::Seconds,
        }
    }

    /// Total duration in seconds
    pub fn as_secs(&self) -> u64 {
        match self.unit {
            DurationUnit::Seconds => self.value,
            DurationUnit::Minutes => self.value * 60,
            DurationUnit::Hours => self.value * 3600,
        }
    }
}

impl Default for TestDuration {
    fn default() -> Self {
        Self::seconds(60)
    }
}

/// Concurrency shape for a test run
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct LoadPattern {
    #[serde(rename = "type")]
    pub kind: PatternKind,
    pub virtual_users: u32,
    #[serde(default)]
    pub ramp_up: Option<TestDuration>,
    #[serde(default)]
    pub ramp_down: Option<TestDuration>,
}

/// Variable generator kinds for payload templates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GeneratorKind {
    Incremental,
    #[serde(alias = "random_id")]
    RandomId,
    Uuid,
    Timestamp,
    #[serde(alias = "random_string")]
    RandomString,
}

/// One named variable inside a payload template
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadVariable {
    #[serde(rename = "type")]
    pub kind: GeneratorKind,
    #[serde(default)]
    pub params: HashMap<String, serde_json::Value>,
}

/// A request body template with named generator variables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadSpec {
    pub template: String,
    #[serde(default)]
    pub variables: HashMap<String, PayloadVariable>,
}

/// One HTTP request inside a test specification
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestSpec {
    pub method: HttpMethod,
    pub url: String,
    #[serde(default)]
    pub headers: Option<HashMap<String, String>>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub payload: Option<PayloadSpec>,
}

/// A leaf HTTP request inside a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRequest {
    pub id: String,
    pub method: HttpMethod,
    pub url: String,
    #[serde(default)]
    pub headers: Option<HashMap<String, String>>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default = "default_request_count")]
    pub request_count: u32,
}

fn default_request_count() -> u32 {
    1
}

/// Ordering semantics of a workflow step group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GroupKind {
    #[default]
    Sequential,
    Parallel,
}

/// A group of child steps executed sequentially or in parallel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepGroup {
    #[serde(rename = "type")]
    pub kind: GroupKind,
    pub steps: Vec<WorkflowStep>,
    #[serde(default)]
    pub id: Option<String>,
}

/// One step in a workflow: a leaf request or a nested group.
///
/// The parser emits groups as objects carrying `type` and `steps`, and leaf
/// requests as objects carrying `method` and `url`, so the untagged
/// representation is unambiguous.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WorkflowStep {
    Group(StepGroup),
    Request(WorkflowRequest),
}

/// How batch items are scheduled relative to each other
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    #[default]
    Parallel,
    Sequential,
}

/// How batch metrics are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AggregationMode {
    #[default]
    Combined,
    Separate,
}

/// Per-key rule advancing a dynamic payload value between sequential items
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncrementRule {
    #[serde(default = "default_increment_step")]
    pub step: i64,
}

fn default_increment_step() -> i64 {
    1
}

/// Base values plus increment rules applied progressively across batch items
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DynamicPayloadSpec {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub base_values: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub increment_rules: HashMap<String, IncrementRule>,
}

fn default_enabled() -> bool {
    true
}

/// One independent test inside a batch.
///
/// Shaped like a `LoadTestSpec` but with optional load pattern and duration;
/// items that omit them inherit the batch-level defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchTestItem {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub test_type: TestType,
    #[serde(default)]
    pub requests: Vec<RequestSpec>,
    #[serde(default)]
    pub workflow: Option<Vec<WorkflowStep>>,
    #[serde(default)]
    pub load_pattern: Option<LoadPattern>,
    #[serde(default)]
    pub duration: Option<TestDuration>,
}

/// A named collection of independent tests executed as one batch
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchTestSpec {
    pub name: String,
    pub tests: Vec<BatchTestItem>,
    #[serde(default)]
    pub execution_mode: ExecutionMode,
    #[serde(default)]
    pub aggregation_mode: AggregationMode,
    #[serde(default)]
    pub global_load_pattern: Option<LoadPattern>,
    #[serde(default)]
    pub global_duration: Option<TestDuration>,
    #[serde(default)]
    pub dynamic_payloads: Option<DynamicPayloadSpec>,
}

impl BatchTestItem {
    /// Materialize the item into a standalone spec, filling missing load
    /// pattern and duration from the batch-level defaults.
    pub fn to_spec(
        &self,
        global_pattern: Option<&LoadPattern>,
        global_duration: Option<&TestDuration>,
    ) -> LoadTestSpec {
        LoadTestSpec {
            id: self.id.clone(),
            name: self.name.clone(),
            test_type: self.test_type,
            requests: self.requests.clone(),
            workflow: self.workflow.clone(),
            batch: None,
            load_pattern: self
                .load_pattern
                .clone()
                .or_else(|| global_pattern.cloned())
                .unwrap_or_default(),
            duration: self
                .duration
                .or_else(|| global_duration.copied())
                .unwrap_or_default(),
        }
    }
}

/// Immutable description of one load test, produced by the upstream parser
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadTestSpec {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub test_type: TestType,
    #[serde(default)]
    pub requests: Vec<RequestSpec>,
    #[serde(default)]
    pub workflow: Option<Vec<WorkflowStep>>,
    #[serde(default)]
    pub batch: Option<BatchTestSpec>,
    #[serde(default)]
    pub load_pattern: LoadPattern,
    #[serde(default)]
    pub duration: TestDuration,
}

impl LoadTestSpec {
    /// Validate structural invariants the executors rely on: the spec names
    /// something to execute, no request declares both a literal body and a
    /// payload, and every payload placeholder resolves to a declared variable.
    pub fn validate(&self) -> Result<(), SpecError> {
        if self.requests.is_empty() && self.workflow.is_none() && self.batch.is_none() {
            return Err(SpecError::Empty);
        }
        for request in &self.requests {
            if request.body.is_some() && request.payload.is_some() {
                return Err(SpecError::AmbiguousBody(request.url.clone()));
            }
            if let Some(payload) = &request.payload {
                for name in crate::payload::placeholder_names(&payload.template) {
                    if !payload.variables.contains_key(&name) {
                        return Err(SpecError::UndeclaredPlaceholder(name));
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_duration_conversions() {
        assert_eq!(TestDuration::seconds(45).as_secs(), 45);
        let m = TestDuration {
            value: 3,
            unit: DurationUnit::Minutes,
        };
        assert_eq!(m.as_secs(), 180);
        let h = TestDuration {
            value: 2,
            unit: DurationUnit::Hours,
        };
        assert_eq!(h.as_secs(), 7200);
    }

    #[test]
    fn test_spec_deserializes_camel_case() {
        let spec: LoadTestSpec = serde_json::from_value(json!({
            "id": "t-1",
            "name": "Checkout baseline",
            "testType": "baseline",
            "requests": [{
                "method": "POST",
                "url": "https://api.example.com/checkout",
                "body": "{}"
            }],
            "loadPattern": {"type": "ramp-up", "virtualUsers": 25},
            "duration": {"value": 2, "unit": "minutes"}
        }))
        .unwrap();

        assert_eq!(spec.test_type, TestType::Baseline);
        assert_eq!(spec.load_pattern.kind, PatternKind::RampUp);
        assert_eq!(spec.load_pattern.virtual_users, 25);
        assert_eq!(spec.duration.as_secs(), 120);
        assert_eq!(spec.requests[0].method, HttpMethod::Post);
    }

    #[test]
    fn test_workflow_step_untagged_deserialization() {
        let steps: Vec<WorkflowStep> = serde_json::from_value(json!([
            {"id": "login", "method": "POST", "url": "https://x/login"},
            {"type": "parallel", "steps": [
                {"id": "a", "method": "GET", "url": "https://x/a"},
                {"id": "b", "method": "GET", "url": "https://x/b", "requestCount": 3}
            ]}
        ]))
        .unwrap();

        assert!(matches!(steps[0], WorkflowStep::Request(_)));
        match &steps[1] {
            WorkflowStep::Group(group) => {
                assert_eq!(group.kind, GroupKind::Parallel);
                assert_eq!(group.steps.len(), 2);
                match &group.steps[1] {
                    WorkflowStep::Request(r) => assert_eq!(r.request_count, 3),
                    _ => panic!("expected leaf request"),
                }
            }
            _ => panic!("expected step group"),
        }
    }

    #[test]
    fn test_batch_item_inherits_global_defaults() {
        let item = BatchTestItem {
            id: "i1".into(),
            name: "item".into(),
            test_type: TestType::Baseline,
            requests: vec![],
            workflow: None,
            load_pattern: None,
            duration: None,
        };
        let pattern = LoadPattern {
            kind: PatternKind::Constant,
            virtual_users: 10,
            ramp_up: None,
            ramp_down: None,
        };
        let duration = TestDuration::seconds(30);

        let spec = item.to_spec(Some(&pattern), Some(&duration));
        assert_eq!(spec.load_pattern.virtual_users, 10);
        assert_eq!(spec.duration.as_secs(), 30);
    }

    #[test]
    fn test_validate_rejects_undeclared_placeholder() {
        let spec = LoadTestSpec {
            id: "t".into(),
            name: "t".into(),
            test_type: TestType::Baseline,
            requests: vec![RequestSpec {
                method: HttpMethod::Post,
                url: "https://x".into(),
                headers: None,
                body: None,
                payload: Some(PayloadSpec {
                    template: r#"{"user": "{{userId}}"}"#.into(),
                    variables: HashMap::new(),
                }),
            }],
            workflow: None,
            batch: None,
            load_pattern: LoadPattern::default(),
            duration: TestDuration::default(),
        };
        assert!(matches!(
            spec.validate(),
            Err(SpecError::UndeclaredPlaceholder(name)) if name == "userId"
        ));
    }

    #[test]
    fn test_validate_rejects_empty_spec() {
        let spec = LoadTestSpec {
            id: "t".into(),
            name: "t".into(),
            test_type: TestType::Baseline,
            requests: vec![],
            workflow: None,
            batch: None,
            load_pattern: LoadPattern::default(),
            duration: TestDuration::default(),
        };
        assert!(matches!(spec.validate(), Err(SpecError::Empty)));
    }
}
