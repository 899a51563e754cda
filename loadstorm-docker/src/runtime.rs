//! The narrow container-runtime interface consumed by the execution engine

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::DockerError;

/// A host path bound into the container
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindMount {
    pub host_path: String,
    pub container_path: String,
    pub read_only: bool,
}

impl BindMount {
    pub fn read_only(host_path: impl Into<String>, container_path: impl Into<String>) -> Self {
        Self {
            host_path: host_path.into(),
            container_path: container_path.into(),
            read_only: true,
        }
    }

    pub fn read_write(host_path: impl Into<String>, container_path: impl Into<String>) -> Self {
        Self {
            host_path: host_path.into(),
            container_path: container_path.into(),
            read_only: false,
        }
    }

    /// Render as the engine's `host:container[:ro]` bind syntax
    pub fn to_bind_string(&self) -> String {
        if self.read_only {
            format!("{}:{}:ro", self.host_path, self.container_path)
        } else {
            format!("{}:{}", self.host_path, self.container_path)
        }
    }
}

/// Everything needed to create one container
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub name: Option<String>,
    pub image: String,
    pub cmd: Vec<String>,
    pub memory_bytes: i64,
    pub cpu_quota: i64,
    pub binds: Vec<BindMount>,
    pub network_mode: String,
}

/// Point-in-time container state from inspect
#[derive(Debug, Clone, Copy, Default)]
pub struct ContainerState {
    pub running: bool,
    pub exit_code: Option<i64>,
}

/// Raw counters from one stats sample.
///
/// The `precpu_*` fields are the daemon's previous sample, which is what the
/// CPU usage formula needs.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContainerStatsSnapshot {
    pub cpu_total_usage: u64,
    pub cpu_system_usage: u64,
    pub precpu_total_usage: u64,
    pub precpu_system_usage: u64,
    pub online_cpus: u64,
    pub memory_usage_bytes: u64,
    pub memory_limit_bytes: u64,
    pub network_rx_bytes: u64,
    pub network_tx_bytes: u64,
}

impl ContainerStatsSnapshot {
    /// CPU usage percentage:
    /// `(container_delta / system_delta) * online_cpus * 100`,
    /// 0 when either delta is non-positive.
    pub fn cpu_percent(&self) -> f64 {
        let container_delta = self.cpu_total_usage as i128 - self.precpu_total_usage as i128;
        let system_delta = self.cpu_system_usage as i128 - self.precpu_system_usage as i128;
        if container_delta <= 0 || system_delta <= 0 {
            return 0.0;
        }
        (container_delta as f64 / system_delta as f64) * self.online_cpus as f64 * 100.0
    }

    /// Memory usage as a percentage of the container limit, 0 without a limit
    pub fn memory_percent(&self) -> f64 {
        if self.memory_limit_bytes == 0 {
            return 0.0;
        }
        self.memory_usage_bytes as f64 / self.memory_limit_bytes as f64 * 100.0
    }
}

/// Narrow gateway over the container daemon.
///
/// Stop, kill, and remove are idempotent: "already stopped" and "no such
/// container" are not errors.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Verify daemon connectivity
    async fn ping(&self) -> Result<(), DockerError>;

    /// Pull the image only when it is not present locally
    async fn pull_image_if_absent(&self, image: &str) -> Result<(), DockerError>;

    /// Create a container and return its identifier
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, DockerError>;

    async fn start_container(&self, id: &str) -> Result<(), DockerError>;

    /// Block until the container exits; returns its exit code
    async fn wait_container(&self, id: &str) -> Result<i64, DockerError>;

    /// Graceful stop with the given grace window in seconds
    async fn stop_container(&self, id: &str, grace_secs: i64) -> Result<(), DockerError>;

    /// Send a signal (e.g. `SIGKILL`) to the container
    async fn kill_container(&self, id: &str, signal: &str) -> Result<(), DockerError>;

    async fn remove_container(&self, id: &str, force: bool) -> Result<(), DockerError>;

    async fn inspect_container(&self, id: &str) -> Result<ContainerState, DockerError>;

    /// One point-in-time stats sample
    async fn container_stats(&self, id: &str) -> Result<ContainerStatsSnapshot, DockerError>;
}
