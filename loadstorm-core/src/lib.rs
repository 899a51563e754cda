//! Loadstorm core data model
//!
//! This crate defines the types shared by every execution path: the
//! `LoadTestSpec` family produced by the upstream parser, the `TestResult`
//! family consumed by downstream reporting, live `ExecutionMetrics`
//! snapshots, the payload variable engine, and shared statistics helpers.

pub mod error;
pub mod payload;
pub mod result;
pub mod spec;
pub mod stats;

// Re-export main types
pub use error::SpecError;
pub use payload::PayloadEngine;
pub use result::{
    AggregatedMetrics, ErrorKind, ExecutionMetrics, ExecutionStatus, ExecutorKind,
    PerformanceMetrics, TestError, TestResult,
};
pub use spec::{
    AggregationMode, BatchTestItem, BatchTestSpec, DurationUnit, DynamicPayloadSpec, ExecutionMode,
    GeneratorKind, GroupKind, HttpMethod, IncrementRule, LoadPattern, LoadTestSpec, PatternKind,
    PayloadSpec, PayloadVariable, RequestSpec, StepGroup, TestDuration, TestType, WorkflowRequest,
    WorkflowStep,
};
pub use stats::{percentile, sort_samples};
