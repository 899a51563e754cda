//! Loadstorm execution engine
//!
//! This crate decides how a `LoadTestSpec` runs and runs it: the container
//! engine launches the load-generation tool inside a resource-limited
//! container, the direct executor issues paced in-process requests for small
//! tests, the selector picks between them with automatic fallback, and the
//! workflow and batch orchestrators compose whole trees and collections of
//! tests with aggregate statistics.

pub mod batch;
pub mod direct;
pub mod engine;
pub mod error;
pub mod script;
pub mod selector;
pub mod workflow;

// Re-export main types
pub use batch::{BatchExecutionResult, BatchOrchestrator, BatchTestResult};
pub use direct::{DirectConfig, DirectExecutor};
pub use engine::{ContainerEngine, EngineConfig, ExecutionEnvironment, RawResults};
pub use error::ExecutionError;
pub use selector::{requires_container, ExecutorSelector, CONTAINER_VU_THRESHOLD};
pub use workflow::{
    LeafExecutor, LeafOutcome, StepResult, WorkflowExecutionResult, WorkflowOrchestrator,
};
