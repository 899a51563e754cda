//! Docker Engine implementation of the container runtime gateway

use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, RemoveContainerOptions, StatsOptions,
    StopContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use bollard::Docker;
use futures::StreamExt;
use tracing::{debug, info};

use crate::error::DockerError;
use crate::runtime::{ContainerRuntime, ContainerSpec, ContainerState, ContainerStatsSnapshot};

/// Gateway over a local Docker daemon
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect using the platform defaults (unix socket or named pipe)
    pub fn connect() -> Result<Self, DockerError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| DockerError::DaemonUnavailable(e.to_string()))?;
        Ok(Self { docker })
    }
}

/// Treat "already stopped" (304), "no such container" (404), and state
/// conflicts (409) as success so stop/kill/remove stay idempotent.
fn ignore_gone(result: Result<(), bollard::errors::Error>) -> Result<(), DockerError> {
    match result {
        Ok(()) => Ok(()),
        Err(bollard::errors::Error::DockerResponseServerError { status_code, .. })
            if matches!(status_code, 304 | 404 | 409) =>
        {
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

#[async_trait::async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn ping(&self) -> Result<(), DockerError> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| DockerError::DaemonUnavailable(e.to_string()))
    }

    async fn pull_image_if_absent(&self, image: &str) -> Result<(), DockerError> {
        if self.docker.inspect_image(image).await.is_ok() {
            debug!(image, "image already present");
            return Ok(());
        }

        info!(image, "pulling image");
        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };
        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(progress) = stream.next().await {
            progress.map_err(|e| DockerError::ImagePull {
                image: image.to_string(),
                message: e.to_string(),
            })?;
        }
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, DockerError> {
        let binds = spec
            .binds
            .iter()
            .map(|b| b.to_bind_string())
            .collect::<Vec<_>>();

        let host_config = HostConfig {
            memory: Some(spec.memory_bytes),
            cpu_quota: Some(spec.cpu_quota),
            binds: Some(binds),
            network_mode: Some(spec.network_mode.clone()),
            ..Default::default()
        };
        let config = Config {
            image: Some(spec.image.clone()),
            cmd: Some(spec.cmd.clone()),
            host_config: Some(host_config),
            ..Default::default()
        };
        let options = spec.name.clone().map(|name| CreateContainerOptions {
            name,
            ..Default::default()
        });

        let response = self.docker.create_container(options, config).await?;
        debug!(container_id = %response.id, image = %spec.image, "container created");
        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> Result<(), DockerError> {
        ignore_gone(self.docker.start_container::<String>(id, None).await)
    }

    async fn wait_container(&self, id: &str) -> Result<i64, DockerError> {
        let options = WaitContainerOptions {
            condition: "not-running",
        };
        let mut stream = self.docker.wait_container(id, Some(options));
        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // Non-zero exits surface as a dedicated error carrying the code
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(e.into()),
            None => Ok(0),
        }
    }

    async fn stop_container(&self, id: &str, grace_secs: i64) -> Result<(), DockerError> {
        ignore_gone(
            self.docker
                .stop_container(id, Some(StopContainerOptions { t: grace_secs }))
                .await,
        )
    }

    async fn kill_container(&self, id: &str, signal: &str) -> Result<(), DockerError> {
        ignore_gone(
            self.docker
                .kill_container(id, Some(KillContainerOptions { signal }))
                .await,
        )
    }

    async fn remove_container(&self, id: &str, force: bool) -> Result<(), DockerError> {
        ignore_gone(
            self.docker
                .remove_container(
                    id,
                    Some(RemoveContainerOptions {
                        force,
                        ..Default::default()
                    }),
                )
                .await,
        )
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerState, DockerError> {
        let response = self.docker.inspect_container(id, None).await?;
        let state = response.state.unwrap_or_default();
        Ok(ContainerState {
            running: state.running.unwrap_or(false),
            exit_code: state.exit_code,
        })
    }

    async fn container_stats(&self, id: &str) -> Result<ContainerStatsSnapshot, DockerError> {
        let options = StatsOptions {
            stream: false,
            one_shot: false,
        };
        let mut stream = self.docker.stats(id, Some(options));
        let stats = match stream.next().await {
            Some(sample) => sample?,
            None => return Err(DockerError::NoStats(id.to_string())),
        };

        let (rx, tx) = stats
            .networks
            .as_ref()
            .map(|networks| {
                networks.values().fold((0u64, 0u64), |(rx, tx), n| {
                    (rx + n.rx_bytes, tx + n.tx_bytes)
                })
            })
            .unwrap_or((0, 0));

        Ok(ContainerStatsSnapshot {
            cpu_total_usage: stats.cpu_stats.cpu_usage.total_usage,
            cpu_system_usage: stats.cpu_stats.system_cpu_usage.unwrap_or(0),
            precpu_total_usage: stats.precpu_stats.cpu_usage.total_usage,
            precpu_system_usage: stats.precpu_stats.system_cpu_usage.unwrap_or(0),
            online_cpus: stats.cpu_stats.online_cpus.unwrap_or(0),
            memory_usage_bytes: stats.memory_stats.usage.unwrap_or(0),
            memory_limit_bytes: stats.memory_stats.limit.unwrap_or(0),
            network_rx_bytes: rx,
            network_tx_bytes: tx,
        })
    }
}
