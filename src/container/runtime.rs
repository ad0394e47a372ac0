//! Container runtime API.
//!
//! Image lookup, launch, state and teardown go through a [`ContainerRuntime`].
//! [`DockerRuntime`] talks to the Docker Engine API with bollard; tests swap
//! in a fake.

use std::time::Duration;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, KillContainerOptions, RemoveContainerOptions, StartContainerOptions,
    StopContainerOptions,
};
use bollard::models::HostConfig;
use thiserror::Error;

use crate::container::spec::ContainerLaunchSpec;

/// Failures talking to the container runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The daemon could not be reached at all.
    #[error("Container runtime unavailable: {reason}")]
    Unavailable { reason: String },

    /// The image or container does not exist.
    #[error("{what} not found")]
    NotFound { what: String },

    /// The daemon rejected the request.
    #[error("{operation} failed: {reason}")]
    Api { operation: String, reason: String },

    #[error("{operation} timed out after {timeout:?}")]
    TimedOut { operation: String, timeout: Duration },
}

impl RuntimeError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RuntimeError::NotFound { .. })
    }
}

/// Operations the lifecycle controller needs from a container runtime.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Reach the daemon; returns its version.
    async fn version(&self) -> Result<String, RuntimeError>;

    /// Names of the OCI runtimes the daemon has registered.
    async fn registered_runtimes(&self) -> Result<Vec<String>, RuntimeError>;

    async fn image_exists(&self, image: &str) -> Result<bool, RuntimeError>;

    /// Create and start a container; returns its id.
    async fn launch(&self, spec: &ContainerLaunchSpec) -> Result<String, RuntimeError>;

    /// Whether the container is running. A removed container is not.
    async fn is_running(&self, container_id: &str) -> Result<bool, RuntimeError>;

    /// Ask the container to stop, giving it `grace` before the daemon kills it.
    async fn stop(&self, container_id: &str, grace: Duration) -> Result<(), RuntimeError>;

    async fn kill(&self, container_id: &str) -> Result<(), RuntimeError>;
}

/// Docker Engine API client.
///
/// Connects per call with the local defaults (`DOCKER_HOST`, else the local
/// socket). Teardown can run on a different tokio runtime than launch, and a
/// bollard client keeps its connections on the runtime that opened them.
#[derive(Debug, Clone, Copy, Default)]
pub struct DockerRuntime;

impl DockerRuntime {
    fn connect(&self) -> Result<Docker, RuntimeError> {
        Docker::connect_with_local_defaults().map_err(|e| RuntimeError::Unavailable {
            reason: e.to_string(),
        })
    }
}

fn api_error(operation: &str, what: &str, err: bollard::errors::Error) -> RuntimeError {
    match err {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        } => RuntimeError::NotFound {
            what: what.to_string(),
        },
        other => RuntimeError::Api {
            operation: operation.to_string(),
            reason: other.to_string(),
        },
    }
}

/// Whether a daemon response is "already in the requested state" (HTTP 304).
fn not_modified(err: &bollard::errors::Error) -> bool {
    matches!(
        err,
        bollard::errors::Error::DockerResponseServerError {
            status_code: 304,
            ..
        }
    )
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn version(&self) -> Result<String, RuntimeError> {
        let docker = self.connect()?;
        let version = docker
            .version()
            .await
            .map_err(|e| RuntimeError::Unavailable {
                reason: e.to_string(),
            })?;
        Ok(format!(
            "Docker {}",
            version.version.unwrap_or_else(|| "unknown".to_string())
        ))
    }

    async fn registered_runtimes(&self) -> Result<Vec<String>, RuntimeError> {
        let docker = self.connect()?;
        let info = docker
            .info()
            .await
            .map_err(|e| api_error("info", "daemon", e))?;
        Ok(info
            .runtimes
            .map(|runtimes| runtimes.into_keys().collect())
            .unwrap_or_default())
    }

    async fn image_exists(&self, image: &str) -> Result<bool, RuntimeError> {
        let docker = self.connect()?;
        match docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(e) => match api_error("inspect image", image, e) {
                RuntimeError::NotFound { .. } => Ok(false),
                other => Err(other),
            },
        }
    }

    async fn launch(&self, spec: &ContainerLaunchSpec) -> Result<String, RuntimeError> {
        let docker = self.connect()?;
        let response = docker
            .create_container::<String, String>(None, spec.to_container_config())
            .await
            .map_err(|e| api_error("create container", &spec.image_name, e))?;
        for warning in &response.warnings {
            tracing::warn!("Runtime warning: {}", warning);
        }

        if let Err(e) = docker
            .start_container(&response.id, None::<StartContainerOptions<String>>)
            .await
        {
            let _ = docker
                .remove_container(
                    &response.id,
                    Some(RemoveContainerOptions {
                        force: true,
                        ..Default::default()
                    }),
                )
                .await;
            return Err(api_error("start container", &response.id, e));
        }
        Ok(response.id)
    }

    async fn is_running(&self, container_id: &str) -> Result<bool, RuntimeError> {
        let docker = self.connect()?;
        match docker.inspect_container(container_id, None).await {
            Ok(info) => Ok(info.state.and_then(|s| s.running).unwrap_or(false)),
            Err(e) => match api_error("inspect container", container_id, e) {
                RuntimeError::NotFound { .. } => Ok(false),
                other => Err(other),
            },
        }
    }

    async fn stop(&self, container_id: &str, grace: Duration) -> Result<(), RuntimeError> {
        let docker = self.connect()?;
        let options = StopContainerOptions {
            t: i64::try_from(grace.as_secs()).unwrap_or(i64::MAX),
        };
        match docker.stop_container(container_id, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) if not_modified(&e) => Ok(()),
            Err(e) => Err(api_error("stop container", container_id, e)),
        }
    }

    async fn kill(&self, container_id: &str) -> Result<(), RuntimeError> {
        let docker = self.connect()?;
        docker
            .kill_container(container_id, None::<KillContainerOptions<String>>)
            .await
            .map_err(|e| api_error("kill container", container_id, e))
    }
}

impl ContainerLaunchSpec {
    /// Engine API form of this launch: privileged, host network, removed on exit.
    pub fn to_container_config(&self) -> Config<String> {
        let binds: Vec<String> = self.mounts.iter().map(|m| m.to_bind()).collect();
        let env: Vec<String> = self
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        let host_config = HostConfig {
            privileged: Some(true),
            network_mode: Some("host".to_string()),
            binds: if binds.is_empty() { None } else { Some(binds) },
            device_cgroup_rules: if self.device_rules.is_empty() {
                None
            } else {
                Some(self.device_rules.clone())
            },
            runtime: self.runtime.clone(),
            auto_remove: Some(true),
            ..Default::default()
        };

        Config {
            image: Some(self.image_name.clone()),
            cmd: Some(self.command()),
            env: if env.is_empty() { None } else { Some(env) },
            host_config: Some(host_config),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_container_config_software() {
        let spec = ContainerLaunchSpec::new(
            "azure-kinect-mesa-vpn",
            vec!["depthcam".to_string(), "serve".to_string()],
            8003,
        );
        let config = spec.to_container_config();
        assert_eq!(config.image.as_deref(), Some("azure-kinect-mesa-vpn"));
        assert_eq!(
            config.cmd,
            Some(
                ["depthcam", "serve", "--host", "0.0.0.0", "--port", "8003"]
                    .map(String::from)
                    .to_vec()
            )
        );
        assert_eq!(config.env, Some(vec!["DISPLAY=:0".to_string()]));

        let host = config.host_config.unwrap();
        assert_eq!(host.privileged, Some(true));
        assert_eq!(host.network_mode.as_deref(), Some("host"));
        assert_eq!(host.auto_remove, Some(true));
        assert_eq!(host.runtime, None);
        assert_eq!(
            host.binds,
            Some(vec![
                "/tmp/.X11-unix:/tmp/.X11-unix:rw".to_string(),
                "/dev:/dev:rw".to_string(),
                "/etc/udev/rules.d:/etc/udev/rules.d:rw".to_string(),
            ])
        );
        assert_eq!(
            host.device_cgroup_rules,
            Some(vec!["c 81:* rmw".to_string(), "c 189:* rmw".to_string()])
        );
    }

    #[test]
    fn test_container_config_gpu_runtime() {
        let config = ContainerLaunchSpec::new("img", vec![], 8000)
            .with_gpu_runtime()
            .to_container_config();
        assert_eq!(
            config.host_config.and_then(|h| h.runtime).as_deref(),
            Some("nvidia")
        );
    }

    #[test]
    fn test_not_found_maps_from_404() {
        let err = api_error(
            "inspect image",
            "img",
            bollard::errors::Error::DockerResponseServerError {
                status_code: 404,
                message: "No such image: img".to_string(),
            },
        );
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "img not found");
    }
}
