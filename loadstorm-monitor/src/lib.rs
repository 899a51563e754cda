//! Execution monitoring
//!
//! Periodic polling of a running container's statistics, converted into
//! progress events, resource-usage snapshots, and threshold warnings, plus a
//! non-blocking publisher for live `ExecutionMetrics`.

pub mod error;
pub mod monitor;
pub mod publisher;

pub use error::MonitorError;
pub use monitor::{ExecutionMonitor, ExecutionProgress, MonitorConfig, ResourceUsage};
pub use publisher::MetricsPublisher;
