//! Periodic container monitoring keyed by test identifier

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use loadstorm_core::ExecutionStatus;
use loadstorm_docker::{ContainerRuntime, ContainerStatsSnapshot};

use crate::error::MonitorError;

/// Monitoring configuration: polling cadence and warning thresholds
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// How often container statistics are fetched
    pub poll_interval: Duration,

    /// Warn when memory usage exceeds this percentage of the limit
    pub max_memory_percent: f64,

    /// Warn when CPU usage exceeds this percentage
    pub max_cpu_percent: f64,

    /// Warn when combined network throughput exceeds this rate
    pub max_network_bytes_per_sec: u64,

    /// Progress window used when the caller has no duration estimate
    pub fallback_window_secs: u64,

    /// Progress event buffer size; events beyond it are dropped
    pub channel_capacity: usize,

    /// Grace window before a cancellation escalates to a forced kill
    pub stop_grace_secs: i64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            max_memory_percent: 90.0,
            max_cpu_percent: 95.0,
            max_network_bytes_per_sec: 100 * 1024 * 1024,
            fallback_window_secs: 60,
            channel_capacity: 64,
            stop_grace_secs: 5,
        }
    }
}

/// Resource usage computed from one stats sample
#[derive(Debug, Clone, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ResourceUsage {
    pub cpu_percent: f64,
    pub memory_bytes: u64,
    pub memory_percent: f64,
    pub network_rx_bytes: u64,
    pub network_tx_bytes: u64,
    pub network_bytes_per_sec: u64,
}

/// One progress event on the monitoring stream
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionProgress {
    pub test_id: String,
    pub status: ExecutionStatus,
    /// Estimated completion percentage; capped at 95 until the caller
    /// confirms completion
    pub progress_percent: f64,
    pub elapsed_secs: u64,
    pub resources: Option<ResourceUsage>,
    pub warnings: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

struct ActiveMonitor {
    container_id: String,
    tx: mpsc::Sender<ExecutionProgress>,
    handle: JoinHandle<()>,
    started: Instant,
    window_secs: u64,
}

/// Monitors running containers, one polling task per test id.
///
/// Per-test state is keyed by test identifier; starting a second monitor for
/// the same id is an error rather than a silent replacement.
pub struct ExecutionMonitor {
    runtime: Arc<dyn ContainerRuntime>,
    config: MonitorConfig,
    active: Arc<RwLock<HashMap<String, ActiveMonitor>>>,
}

impl ExecutionMonitor {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: MonitorConfig) -> Self {
        Self {
            runtime,
            config,
            active: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Begin monitoring a container. Returns the progress event stream; the
    /// stream completes when monitoring stops or the test is cancelled.
    pub async fn start_monitoring(
        &self,
        test_id: &str,
        container_id: &str,
        estimated_duration_secs: Option<u64>,
    ) -> Result<mpsc::Receiver<ExecutionProgress>, MonitorError> {
        let mut active = self.active.write().await;
        if active.contains_key(test_id) {
            return Err(MonitorError::AlreadyMonitoring(test_id.to_string()));
        }

        let (tx, rx) = mpsc::channel(self.config.channel_capacity);
        let window_secs = estimated_duration_secs
            .unwrap_or(self.config.fallback_window_secs)
            .max(1);
        let started = Instant::now();

        let handle = tokio::spawn(monitor_loop(
            self.runtime.clone(),
            self.config.clone(),
            test_id.to_string(),
            container_id.to_string(),
            window_secs,
            started,
            tx.clone(),
        ));

        info!(test_id, container_id, window_secs, "monitoring started");
        active.insert(
            test_id.to_string(),
            ActiveMonitor {
                container_id: container_id.to_string(),
                tx,
                handle,
                started,
                window_secs,
            },
        );
        Ok(rx)
    }

    /// Cancel the monitored execution: graceful stop, short grace window,
    /// then a forced kill only if the container is still running. Emits a
    /// terminal `cancelled` event before the stream completes.
    pub async fn cancel_execution(&self, test_id: &str) -> Result<(), MonitorError> {
        let entry = {
            let mut active = self.active.write().await;
            active
                .remove(test_id)
                .ok_or_else(|| MonitorError::NotMonitoring(test_id.to_string()))?
        };
        entry.handle.abort();

        info!(test_id, container_id = %entry.container_id, "cancelling execution");
        self.runtime
            .stop_container(&entry.container_id, self.config.stop_grace_secs)
            .await?;

        // Escalate only when the graceful stop did not take effect.
        let still_running = self
            .runtime
            .inspect_container(&entry.container_id)
            .await
            .map(|state| state.running)
            .unwrap_or(false);
        if still_running {
            warn!(test_id, "container survived graceful stop, sending SIGKILL");
            self.runtime
                .kill_container(&entry.container_id, "SIGKILL")
                .await?;
        }

        let elapsed = entry.started.elapsed().as_secs();
        let event = ExecutionProgress {
            test_id: test_id.to_string(),
            status: ExecutionStatus::Cancelled,
            progress_percent: estimate_progress(elapsed, entry.window_secs),
            elapsed_secs: elapsed,
            resources: None,
            warnings: Vec::new(),
            timestamp: Utc::now(),
        };
        if entry.tx.try_send(event).is_err() {
            trace!(test_id, "cancelled event dropped, receiver gone or full");
        }
        Ok(())
    }

    /// Stop monitoring without touching the container. Idempotent.
    pub async fn stop_monitoring(&self, test_id: &str) {
        let mut active = self.active.write().await;
        if let Some(entry) = active.remove(test_id) {
            entry.handle.abort();
            debug!(test_id, "monitoring stopped");
        }
    }

    /// Whether a test is currently being monitored
    pub async fn is_monitoring(&self, test_id: &str) -> bool {
        self.active.read().await.contains_key(test_id)
    }
}

/// Progress estimate: `min(95, elapsed / window * 100)`. Never reaches 100;
/// the caller marks 100 only on confirmed completion.
fn estimate_progress(elapsed_secs: u64, window_secs: u64) -> f64 {
    (elapsed_secs as f64 / window_secs as f64 * 100.0).min(95.0)
}

#[allow(clippy::too_many_arguments)]
async fn monitor_loop(
    runtime: Arc<dyn ContainerRuntime>,
    config: MonitorConfig,
    test_id: String,
    container_id: String,
    window_secs: u64,
    started: Instant,
    tx: mpsc::Sender<ExecutionProgress>,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut last_poll: Option<Instant> = None;
    let mut last_net: Option<(u64, u64, Instant)> = None;

    loop {
        ticker.tick().await;
        if tx.is_closed() {
            break;
        }

        let elapsed = started.elapsed().as_secs();
        let mut resources = None;
        let mut warnings = Vec::new();

        let due = last_poll.is_none_or(|t| t.elapsed() >= config.poll_interval);
        if due {
            last_poll = Some(Instant::now());
            match runtime.container_stats(&container_id).await {
                Ok(snapshot) => {
                    let usage = compute_usage(&snapshot, &mut last_net);
                    collect_warnings(&config, &usage, &mut warnings);
                    resources = Some(usage);
                }
                Err(e) => {
                    debug!(test_id = %test_id, "stats poll failed: {}", e);
                }
            }
        }

        let event = ExecutionProgress {
            test_id: test_id.clone(),
            status: ExecutionStatus::Running,
            progress_percent: estimate_progress(elapsed, window_secs),
            elapsed_secs: elapsed,
            resources,
            warnings,
            timestamp: Utc::now(),
        };
        match tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                trace!(test_id = %test_id, "progress buffer full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => break,
        }
    }
}

fn compute_usage(
    snapshot: &ContainerStatsSnapshot,
    last_net: &mut Option<(u64, u64, Instant)>,
) -> ResourceUsage {
    let now = Instant::now();
    let network_bytes_per_sec = match *last_net {
        Some((rx, tx, at)) => {
            let secs = now.duration_since(at).as_secs_f64();
            if secs > 0.0 {
                let delta = (snapshot.network_rx_bytes + snapshot.network_tx_bytes)
                    .saturating_sub(rx + tx);
                (delta as f64 / secs) as u64
            } else {
                0
            }
        }
        None => 0,
    };
    *last_net = Some((snapshot.network_rx_bytes, snapshot.network_tx_bytes, now));

    ResourceUsage {
        cpu_percent: snapshot.cpu_percent(),
        memory_bytes: snapshot.memory_usage_bytes,
        memory_percent: snapshot.memory_percent(),
        network_rx_bytes: snapshot.network_rx_bytes,
        network_tx_bytes: snapshot.network_tx_bytes,
        network_bytes_per_sec,
    }
}

fn collect_warnings(config: &MonitorConfig, usage: &ResourceUsage, warnings: &mut Vec<String>) {
    if usage.memory_percent > config.max_memory_percent {
        warnings.push(format!(
            "memory usage {:.1}% exceeds threshold {:.1}%",
            usage.memory_percent, config.max_memory_percent
        ));
    }
    if usage.cpu_percent > config.max_cpu_percent {
        warnings.push(format!(
            "CPU usage {:.1}% exceeds threshold {:.1}%",
            usage.cpu_percent, config.max_cpu_percent
        ));
    }
    if usage.network_bytes_per_sec > config.max_network_bytes_per_sec {
        warnings.push(format!(
            "network throughput {} B/s exceeds threshold {} B/s",
            usage.network_bytes_per_sec, config.max_network_bytes_per_sec
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use loadstorm_docker::{ContainerSpec, ContainerState, DockerError};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Runtime fake recording lifecycle calls
    #[derive(Default)]
    struct FakeRuntime {
        pub running_after_stop: AtomicBool,
        pub stop_calls: AtomicUsize,
        pub kill_calls: AtomicUsize,
        pub stats: std::sync::Mutex<ContainerStatsSnapshot>,
    }

    #[async_trait]
    impl ContainerRuntime for FakeRuntime {
        async fn ping(&self) -> Result<(), DockerError> {
            Ok(())
        }
        async fn pull_image_if_absent(&self, _image: &str) -> Result<(), DockerError> {
            Ok(())
        }
        async fn create_container(&self, _spec: &ContainerSpec) -> Result<String, DockerError> {
            Ok("c-1".into())
        }
        async fn start_container(&self, _id: &str) -> Result<(), DockerError> {
            Ok(())
        }
        async fn wait_container(&self, _id: &str) -> Result<i64, DockerError> {
            Ok(0)
        }
        async fn stop_container(&self, _id: &str, _grace_secs: i64) -> Result<(), DockerError> {
            self.stop_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn kill_container(&self, _id: &str, _signal: &str) -> Result<(), DockerError> {
            self.kill_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn remove_container(&self, _id: &str, _force: bool) -> Result<(), DockerError> {
            Ok(())
        }
        async fn inspect_container(&self, _id: &str) -> Result<ContainerState, DockerError> {
            Ok(ContainerState {
                running: self.running_after_stop.load(Ordering::SeqCst),
                exit_code: Some(0),
            })
        }
        async fn container_stats(&self, _id: &str) -> Result<ContainerStatsSnapshot, DockerError> {
            Ok(*self.stats.lock().unwrap())
        }
    }

    fn busy_stats() -> ContainerStatsSnapshot {
        ContainerStatsSnapshot {
            cpu_total_usage: 2_000,
            precpu_total_usage: 1_000,
            cpu_system_usage: 2_000,
            precpu_system_usage: 1_000,
            online_cpus: 2,
            memory_usage_bytes: 950,
            memory_limit_bytes: 1_000,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_progress_is_capped_below_100() {
        let runtime = Arc::new(FakeRuntime::default());
        let monitor = ExecutionMonitor::new(runtime, MonitorConfig::default());

        let mut rx = monitor
            .start_monitoring("t-1", "c-1", Some(1))
            .await
            .unwrap();
        let first = rx.recv().await.unwrap();
        assert!(first.progress_percent <= 95.0);
        assert_eq!(first.status, ExecutionStatus::Running);

        monitor.stop_monitoring("t-1").await;
        assert!(!monitor.is_monitoring("t-1").await);
    }

    #[tokio::test]
    async fn test_double_start_is_rejected() {
        let runtime = Arc::new(FakeRuntime::default());
        let monitor = ExecutionMonitor::new(runtime, MonitorConfig::default());

        let _rx = monitor
            .start_monitoring("t-2", "c-1", Some(10))
            .await
            .unwrap();
        let second = monitor.start_monitoring("t-2", "c-2", Some(10)).await;
        assert!(matches!(second, Err(MonitorError::AlreadyMonitoring(_))));

        monitor.stop_monitoring("t-2").await;
    }

    #[tokio::test]
    async fn test_threshold_breaches_become_warnings() {
        let runtime = Arc::new(FakeRuntime::default());
        *runtime.stats.lock().unwrap() = busy_stats();
        let monitor = ExecutionMonitor::new(runtime, MonitorConfig::default());

        let mut rx = monitor
            .start_monitoring("t-3", "c-1", Some(10))
            .await
            .unwrap();
        let first = rx.recv().await.unwrap();

        // 100% CPU on 2 cores -> 200% > 95%; 950/1000 memory -> 95% > 90%.
        assert_eq!(first.warnings.len(), 2);
        let usage = first.resources.unwrap();
        assert_eq!(usage.cpu_percent, 200.0);
        assert_eq!(usage.memory_percent, 95.0);

        monitor.stop_monitoring("t-3").await;
    }

    #[tokio::test]
    async fn test_cancel_skips_kill_when_stop_succeeds() {
        let runtime = Arc::new(FakeRuntime::default());
        let monitor = ExecutionMonitor::new(runtime.clone(), MonitorConfig::default());

        let mut rx = monitor
            .start_monitoring("t-4", "c-1", Some(10))
            .await
            .unwrap();
        monitor.cancel_execution("t-4").await.unwrap();

        assert_eq!(runtime.stop_calls.load(Ordering::SeqCst), 1);
        assert_eq!(runtime.kill_calls.load(Ordering::SeqCst), 0);

        // Drain until the terminal cancelled event; the stream then ends.
        let mut cancelled_seen = false;
        while let Some(event) = rx.recv().await {
            if event.status == ExecutionStatus::Cancelled {
                cancelled_seen = true;
            }
        }
        assert!(cancelled_seen);
    }

    #[tokio::test]
    async fn test_cancel_escalates_to_kill_when_still_running() {
        let runtime = Arc::new(FakeRuntime::default());
        runtime.running_after_stop.store(true, Ordering::SeqCst);
        let monitor = ExecutionMonitor::new(runtime.clone(), MonitorConfig::default());

        let _rx = monitor
            .start_monitoring("t-5", "c-1", Some(10))
            .await
            .unwrap();
        monitor.cancel_execution("t-5").await.unwrap();

        assert_eq!(runtime.stop_calls.load(Ordering::SeqCst), 1);
        assert_eq!(runtime.kill_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_unknown_test_errors() {
        let runtime = Arc::new(FakeRuntime::default());
        let monitor = ExecutionMonitor::new(runtime, MonitorConfig::default());
        assert!(matches!(
            monitor.cancel_execution("missing").await,
            Err(MonitorError::NotMonitoring(_))
        ));
    }

    #[test]
    fn test_estimate_progress() {
        assert_eq!(estimate_progress(0, 60), 0.0);
        assert_eq!(estimate_progress(30, 60), 50.0);
        assert_eq!(estimate_progress(60, 60), 95.0);
        assert_eq!(estimate_progress(600, 60), 95.0);
    }
}
