//! Containerized execution engine
//!
//! Runs the load-generation tool (k6) inside a resource-limited container:
//! prepares an isolated working directory, creates and starts the container,
//! monitors it while it runs, waits for exit, parses the summary output, and
//! always cleans up the container regardless of outcome.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{debug, info, warn};

use loadstorm_core::{ExecutionMetrics, ExecutionStatus, LoadTestSpec, PerformanceMetrics};
use loadstorm_docker::{
    parse_cpu_limit, parse_memory_limit, BindMount, ContainerRuntime, ContainerSpec,
};
use loadstorm_monitor::{ExecutionMonitor, MetricsPublisher};

use crate::error::ExecutionError;
use crate::script;

const CONTAINER_SCRIPT_PATH: &str = "/work/script.js";
const CONTAINER_OUTPUT_PATH: &str = "/work/output.json";
const CONTAINER_LOG_PATH: &str = "/work/execution.log";

/// Container engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Image the load-generation tool runs from
    pub image: String,

    /// Human-readable memory limit, e.g. `"512m"`
    pub memory_limit: String,

    /// Fractional-core CPU limit, e.g. `"1.0"`
    pub cpu_limit: String,

    pub network_mode: String,

    /// Pull the image before the first run when it is absent
    pub pull_image: bool,

    /// Grace window for the cleanup stop
    pub stop_grace_secs: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            image: "grafana/k6:latest".to_string(),
            memory_limit: "512m".to_string(),
            cpu_limit: "1.0".to_string(),
            network_mode: "bridge".to_string(),
            pull_image: true,
            stop_grace_secs: 5,
        }
    }
}

/// Ephemeral per-run state: the working directory with the generated script
/// and output files, and the container identifier once created. Owned by
/// exactly one engine run and destroyed with it.
#[derive(Debug)]
pub struct ExecutionEnvironment {
    pub test_id: String,
    work_dir: TempDir,
    pub script_path: PathBuf,
    pub output_path: PathBuf,
    pub log_path: PathBuf,
    pub container_id: Option<String>,
}

impl ExecutionEnvironment {
    /// Materialize a fresh working directory holding the script and an
    /// empty output file.
    fn prepare(test_id: &str, script: &str) -> Result<Self, ExecutionError> {
        let work_dir = tempfile::Builder::new()
            .prefix("loadstorm-")
            .tempdir()
            .map_err(|e| ExecutionError::Setup(format!("working directory: {}", e)))?;

        let script_path = work_dir.path().join("script.js");
        let output_path = work_dir.path().join("output.json");
        let log_path = work_dir.path().join("execution.log");

        fs::write(&script_path, script)
            .map_err(|e| ExecutionError::Setup(format!("write script: {}", e)))?;
        fs::write(&output_path, "")
            .map_err(|e| ExecutionError::Setup(format!("create output file: {}", e)))?;
        fs::write(&log_path, "")
            .map_err(|e| ExecutionError::Setup(format!("create log file: {}", e)))?;

        debug!(test_id, dir = %work_dir.path().display(), "execution environment prepared");
        Ok(Self {
            test_id: test_id.to_string(),
            work_dir,
            script_path,
            output_path,
            log_path,
            container_id: None,
        })
    }

    /// The run's working directory; removed when the environment drops
    pub fn work_dir(&self) -> &std::path::Path {
        self.work_dir.path()
    }
}

/// Raw outcome of one containerized run
#[derive(Debug, Clone)]
pub struct RawResults {
    pub status: ExecutionStatus,
    pub exit_code: i64,
    pub metrics: PerformanceMetrics,
    pub summary: Option<serde_json::Value>,
    pub warnings: Vec<String>,
    pub logs: Vec<String>,
}

/// Launches and supervises one container per test run.
///
/// Each run moves through preparing → starting → running and ends
/// completed, failed, or cancelled. Cleanup runs on every exit path.
pub struct ContainerEngine {
    runtime: Arc<dyn ContainerRuntime>,
    monitor: Arc<ExecutionMonitor>,
    publisher: Option<Arc<MetricsPublisher>>,
    config: EngineConfig,
}

impl ContainerEngine {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        monitor: Arc<ExecutionMonitor>,
        config: EngineConfig,
    ) -> Self {
        Self {
            runtime,
            monitor,
            publisher: None,
            config,
        }
    }

    /// Attach a publisher that receives live metrics during runs
    pub fn with_publisher(mut self, publisher: Arc<MetricsPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Run the spec inside a container and collect raw results.
    ///
    /// Setup and container-creation failures propagate (the selector uses
    /// them to fall back); anything after a successful start is recorded on
    /// the returned results instead.
    pub async fn run(&self, spec: &LoadTestSpec) -> Result<RawResults, ExecutionError> {
        info!(test_id = %spec.id, "preparing containerized execution");
        self.runtime
            .ping()
            .await
            .map_err(ExecutionError::Runtime)?;

        if self.config.pull_image {
            self.runtime.pull_image_if_absent(&self.config.image).await?;
        }

        let generated = script::generate_script(spec);
        let mut env = ExecutionEnvironment::prepare(&spec.id, &generated)?;

        let container_spec = self.container_spec(&env);
        let container_id = self.runtime.create_container(&container_spec).await?;
        env.container_id = Some(container_id.clone());

        let outcome = self.run_started(spec, &env, &container_id).await;
        self.cleanup(&env).await;
        outcome
    }

    fn container_spec(&self, env: &ExecutionEnvironment) -> ContainerSpec {
        ContainerSpec {
            name: Some(format!("loadstorm-{}", env.test_id)),
            image: self.config.image.clone(),
            // JSON summary to the output file, quiet mode, then the script
            cmd: vec![
                "run".to_string(),
                "--summary-export".to_string(),
                CONTAINER_OUTPUT_PATH.to_string(),
                "--quiet".to_string(),
                CONTAINER_SCRIPT_PATH.to_string(),
            ],
            memory_bytes: parse_memory_limit(&self.config.memory_limit),
            cpu_quota: parse_cpu_limit(&self.config.cpu_limit),
            binds: vec![
                BindMount::read_only(env.script_path.display().to_string(), CONTAINER_SCRIPT_PATH),
                BindMount::read_write(env.output_path.display().to_string(), CONTAINER_OUTPUT_PATH),
                BindMount::read_write(env.log_path.display().to_string(), CONTAINER_LOG_PATH),
            ],
            network_mode: self.config.network_mode.clone(),
        }
    }

    /// Everything after container creation: start, monitor, wait, collect.
    async fn run_started(
        &self,
        spec: &LoadTestSpec,
        env: &ExecutionEnvironment,
        container_id: &str,
    ) -> Result<RawResults, ExecutionError> {
        info!(test_id = %spec.id, container_id, "starting container");
        self.runtime.start_container(container_id).await?;

        match self
            .monitor
            .start_monitoring(&spec.id, container_id, Some(spec.duration.as_secs()))
            .await
        {
            Ok(progress_rx) => {
                self.spawn_progress_forwarder(spec, progress_rx);
            }
            Err(e) => warn!(test_id = %spec.id, "monitoring unavailable: {}", e),
        }

        let waited = self.runtime.wait_container(container_id).await;
        self.monitor.stop_monitoring(&spec.id).await;

        let mut warnings = Vec::new();
        let exit_code = match waited {
            Ok(code) => code,
            Err(e) => {
                warnings.push(format!("container wait failed: {}", e));
                -1
            }
        };

        let (summary, metrics) = self.collect_output(env, &mut warnings);
        let logs = self.collect_logs(env);

        let status = if exit_code == 0 {
            ExecutionStatus::Completed
        } else {
            ExecutionStatus::Failed
        };
        info!(test_id = %spec.id, exit_code, ?status, "container run finished");
        self.publish_terminal(spec, status, &metrics);

        Ok(RawResults {
            status,
            exit_code,
            metrics,
            summary,
            warnings,
            logs,
        })
    }

    /// Final snapshot on the metrics stream: monitoring progress stops at
    /// 95%, so confirmed completion is marked here with 100%.
    fn publish_terminal(
        &self,
        spec: &LoadTestSpec,
        status: ExecutionStatus,
        metrics: &PerformanceMetrics,
    ) {
        if let Some(publisher) = &self.publisher {
            let mut snapshot = ExecutionMetrics::new(spec.id.clone(), status);
            snapshot.progress_percent = 100.0;
            snapshot.concurrency = spec.load_pattern.virtual_users;
            snapshot.requests_completed = metrics.total_requests;
            snapshot.requests_per_second = metrics.throughput_rps;
            snapshot.avg_response_time_ms = metrics.avg_response_time_ms;
            snapshot.error_rate = metrics.error_rate;
            publisher.publish(snapshot);
        }
    }

    fn spawn_progress_forwarder(
        &self,
        spec: &LoadTestSpec,
        mut progress_rx: tokio::sync::mpsc::Receiver<loadstorm_monitor::ExecutionProgress>,
    ) {
        let publisher = self.publisher.clone();
        let concurrency = spec.load_pattern.virtual_users;
        tokio::spawn(async move {
            while let Some(progress) = progress_rx.recv().await {
                for warning in &progress.warnings {
                    warn!(test_id = %progress.test_id, "{}", warning);
                }
                if let Some(publisher) = &publisher {
                    let mut metrics =
                        ExecutionMetrics::new(progress.test_id.clone(), progress.status);
                    metrics.progress_percent = progress.progress_percent;
                    metrics.concurrency = concurrency;
                    publisher.publish(metrics);
                }
            }
        });
    }

    /// Read and parse the engine's summary output; absence or corruption is
    /// a warning, never a fatal error.
    fn collect_output(
        &self,
        env: &ExecutionEnvironment,
        warnings: &mut Vec<String>,
    ) -> (Option<serde_json::Value>, PerformanceMetrics) {
        let raw = match fs::read_to_string(&env.output_path) {
            Ok(raw) if !raw.trim().is_empty() => raw,
            Ok(_) => {
                warnings.push("engine produced no summary output".to_string());
                return (None, PerformanceMetrics::default());
            }
            Err(e) => {
                warnings.push(format!("summary output unreadable: {}", e));
                return (None, PerformanceMetrics::default());
            }
        };
        match serde_json::from_str::<serde_json::Value>(&raw) {
            Ok(summary) => {
                let metrics = parse_summary(&summary);
                (Some(summary), metrics)
            }
            Err(e) => {
                warnings.push(format!("summary output corrupt: {}", e));
                (None, PerformanceMetrics::default())
            }
        }
    }

    fn collect_logs(&self, env: &ExecutionEnvironment) -> Vec<String> {
        match fs::read_to_string(&env.log_path) {
            Ok(content) => content.lines().map(str::to_string).collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Guaranteed cleanup: stop if running, then force-remove. Runs on every
    /// exit path; failures here are warnings, never errors.
    async fn cleanup(&self, env: &ExecutionEnvironment) {
        if let Some(container_id) = &env.container_id {
            if let Err(e) = self
                .runtime
                .stop_container(container_id, self.config.stop_grace_secs)
                .await
            {
                warn!(container_id, "cleanup stop failed: {}", e);
            }
            if let Err(e) = self.runtime.remove_container(container_id, true).await {
                warn!(container_id, "cleanup remove failed: {}", e);
            }
            debug!(container_id, "container cleaned up");
        }
        // The working directory is removed when the environment drops.
    }
}

/// Map the k6 summary-export JSON onto `PerformanceMetrics`.
///
/// Keys: `metrics.http_reqs.{count,rate}`, `metrics.http_req_duration`
/// aggregates, and `metrics.http_req_failed.value` (failure fraction).
pub fn parse_summary(summary: &serde_json::Value) -> PerformanceMetrics {
    let metric = |name: &str, key: &str| -> f64 {
        summary
            .pointer(&format!("/metrics/{}/{}", name, key))
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0)
    };

    let total = metric("http_reqs", "count") as u64;
    let error_rate = metric("http_req_failed", "value");
    let failed = (total as f64 * error_rate).floor() as u64;
    let p95 = metric("http_req_duration", "p(95)");
    let p99 = summary
        .pointer("/metrics/http_req_duration/p(99)")
        .and_then(|v| v.as_f64())
        .unwrap_or(p95);

    PerformanceMetrics {
        total_requests: total,
        successful_requests: total - failed,
        failed_requests: failed,
        min_response_time_ms: metric("http_req_duration", "min"),
        max_response_time_ms: metric("http_req_duration", "max"),
        avg_response_time_ms: metric("http_req_duration", "avg"),
        p50_response_time_ms: metric("http_req_duration", "med"),
        p90_response_time_ms: metric("http_req_duration", "p(90)"),
        p95_response_time_ms: p95,
        p99_response_time_ms: p99,
        throughput_rps: metric("http_reqs", "rate"),
        error_rate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use loadstorm_core::{HttpMethod, LoadPattern, PatternKind, RequestSpec, TestDuration, TestType};
    use loadstorm_docker::{ContainerState, ContainerStatsSnapshot, DockerError};
    use loadstorm_monitor::MonitorConfig;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeRuntime {
        fail_create: AtomicBool,
        fail_start: AtomicBool,
        create_calls: AtomicUsize,
        stop_calls: AtomicUsize,
        remove_calls: AtomicUsize,
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
            self.create_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_create.load(Ordering::SeqCst) {
                return Err(DockerError::DaemonUnavailable("create refused".into()));
            }
            Ok("c-test".into())
        }
        async fn start_container(&self, _id: &str) -> Result<(), DockerError> {
            if self.fail_start.load(Ordering::SeqCst) {
                return Err(DockerError::DaemonUnavailable("start refused".into()));
            }
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
            Ok(())
        }
        async fn remove_container(&self, _id: &str, _force: bool) -> Result<(), DockerError> {
            self.remove_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn inspect_container(&self, _id: &str) -> Result<ContainerState, DockerError> {
            Ok(ContainerState::default())
        }
        async fn container_stats(&self, _id: &str) -> Result<ContainerStatsSnapshot, DockerError> {
            Ok(ContainerStatsSnapshot::default())
        }
    }

    fn spec() -> LoadTestSpec {
        LoadTestSpec {
            id: "engine-test".into(),
            name: "engine test".into(),
            test_type: TestType::Stress,
            requests: vec![RequestSpec {
                method: HttpMethod::Get,
                url: "https://example.com/".into(),
                headers: None,
                body: None,
                payload: None,
            }],
            workflow: None,
            batch: None,
            load_pattern: LoadPattern {
                kind: PatternKind::Constant,
                virtual_users: 100,
                ramp_up: None,
                ramp_down: None,
            },
            duration: TestDuration::seconds(10),
        }
    }

    fn engine_with(runtime: Arc<FakeRuntime>) -> ContainerEngine {
        let monitor = Arc::new(ExecutionMonitor::new(
            runtime.clone(),
            MonitorConfig::default(),
        ));
        ContainerEngine::new(runtime, monitor, EngineConfig::default())
    }

    #[tokio::test]
    async fn test_successful_run_cleans_up_exactly_once() {
        let runtime = Arc::new(FakeRuntime::default());
        let engine = engine_with(runtime.clone());

        let results = engine.run(&spec()).await.unwrap();
        assert_eq!(results.status, ExecutionStatus::Completed);
        assert_eq!(results.exit_code, 0);
        // Empty output file is a warning, not a failure.
        assert!(!results.warnings.is_empty());

        assert_eq!(runtime.stop_calls.load(Ordering::SeqCst), 1);
        assert_eq!(runtime.remove_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_create_failure_propagates_without_cleanup_calls() {
        let runtime = Arc::new(FakeRuntime::default());
        runtime.fail_create.store(true, Ordering::SeqCst);
        let engine = engine_with(runtime.clone());

        let result = engine.run(&spec()).await;
        assert!(result.is_err());
        // No container was created, so nothing to stop or remove.
        assert_eq!(runtime.stop_calls.load(Ordering::SeqCst), 0);
        assert_eq!(runtime.remove_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_start_failure_still_cleans_up_exactly_once() {
        let runtime = Arc::new(FakeRuntime::default());
        runtime.fail_start.store(true, Ordering::SeqCst);
        let engine = engine_with(runtime.clone());

        let result = engine.run(&spec()).await;
        assert!(result.is_err());
        assert_eq!(runtime.stop_calls.load(Ordering::SeqCst), 1);
        assert_eq!(runtime.remove_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_terminal_metric_published_at_100_percent() {
        let runtime = Arc::new(FakeRuntime::default());
        let monitor = Arc::new(ExecutionMonitor::new(
            runtime.clone(),
            MonitorConfig::default(),
        ));
        let publisher = Arc::new(MetricsPublisher::new(16));
        let mut rx = publisher.subscribe();
        let engine = ContainerEngine::new(runtime, monitor, EngineConfig::default())
            .with_publisher(publisher.clone());

        engine.run(&spec()).await.unwrap();

        let mut terminal = None;
        loop {
            match rx.try_recv() {
                Ok(snapshot) => {
                    if snapshot.status.is_terminal() {
                        terminal = Some(snapshot);
                    }
                }
                Err(tokio::sync::broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
        let snapshot = terminal.expect("terminal metric on the stream");
        assert_eq!(snapshot.status, ExecutionStatus::Completed);
        assert_eq!(snapshot.progress_percent, 100.0);
        assert_eq!(snapshot.test_id, "engine-test");
    }

    #[test]
    fn test_parse_summary_reads_documented_keys() {
        let summary = serde_json::json!({
            "metrics": {
                "http_reqs": {"count": 1000.0, "rate": 33.3},
                "http_req_duration": {
                    "avg": 120.5, "min": 10.0, "med": 100.0, "max": 900.0,
                    "p(90)": 200.0, "p(95)": 300.0
                },
                "http_req_failed": {"value": 0.05}
            }
        });
        let metrics = parse_summary(&summary);
        assert_eq!(metrics.total_requests, 1000);
        assert_eq!(metrics.failed_requests, 50);
        assert_eq!(metrics.successful_requests, 950);
        assert_eq!(metrics.avg_response_time_ms, 120.5);
        assert_eq!(metrics.p50_response_time_ms, 100.0);
        assert_eq!(metrics.p95_response_time_ms, 300.0);
        // p99 falls back to p95 when the export omits it.
        assert_eq!(metrics.p99_response_time_ms, 300.0);
        assert_eq!(metrics.throughput_rps, 33.3);
        assert_eq!(metrics.error_rate, 0.05);
    }

    #[test]
    fn test_parse_summary_tolerates_missing_metrics() {
        let metrics = parse_summary(&serde_json::json!({}));
        assert_eq!(metrics, PerformanceMetrics::default());
    }

    #[test]
    fn test_environment_writes_script_and_output() {
        let env = ExecutionEnvironment::prepare("env-test", "// script").unwrap();
        assert_eq!(fs::read_to_string(&env.script_path).unwrap(), "// script");
        assert!(env.output_path.exists());
        assert!(env.log_path.exists());
    }
}
