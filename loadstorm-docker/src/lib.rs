//! Container runtime gateway
//!
//! A narrow interface over the container daemon (create/start/wait/stop/
//! kill/remove/inspect/stats/pull/ping) so the execution engine can run
//! against a fake implementation in tests, plus translation of
//! human-readable resource-limit strings into engine quota units.

pub mod docker;
pub mod error;
pub mod limits;
pub mod runtime;

pub use docker::DockerRuntime;
pub use error::DockerError;
pub use limits::{parse_cpu_limit, parse_memory_limit, DEFAULT_CPU_QUOTA, DEFAULT_MEMORY_BYTES};
pub use runtime::{
    BindMount, ContainerRuntime, ContainerSpec, ContainerState, ContainerStatsSnapshot,
};
