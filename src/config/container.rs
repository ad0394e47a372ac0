use std::path::PathBuf;
use std::time::Duration;

use crate::config::helpers::{
    EnvLookup, optional_env, parse_bool_env, parse_optional_env, process_env,
};
use crate::container::{ControllerConfig, StrategyMode};
use crate::error::ConfigError;

/// Environment-level settings for the container lifecycle controller.
///
/// CLI flags are applied on top of these before building a
/// [`ControllerConfig`].
#[derive(Debug, Clone)]
pub struct ContainerSettings {
    /// Host the client uses to reach the endpoint.
    pub host: String,
    /// Fixed endpoint port. `None` scans for a free port.
    pub port: Option<u16>,
    /// First port of the free-port scan.
    pub base_port: u16,
    /// Acceleration strategy override.
    pub strategy: StrategyMode,
    /// Explicit image name, replacing the strategy default.
    pub image: Option<String>,
    /// Whether missing images are built automatically.
    pub auto_build: bool,
    /// Bound on the reachability poll, in seconds.
    pub startup_timeout_secs: u64,
    /// Bound on an image build, in seconds.
    pub build_timeout_secs: u64,
    /// Directory searched first for build scripts.
    pub build_dir: Option<PathBuf>,
    /// Host directory mounted at `/workspace`.
    pub workspace_mount: Option<PathBuf>,
}

impl Default for ContainerSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: None,
            base_port: 8000,
            strategy: StrategyMode::Auto,
            image: None,
            auto_build: true,
            startup_timeout_secs: 60,
            build_timeout_secs: 1800,
            build_dir: None,
            workspace_mount: None,
        }
    }
}

impl ContainerSettings {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        Self::resolve_with(&process_env)
    }

    pub(crate) fn resolve_with(env: EnvLookup<'_>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let port = optional_env(env, "DEPTHCAM_PORT")
            .map(|raw| {
                raw.parse::<u16>().map_err(|e| ConfigError::InvalidValue {
                    key: "DEPTHCAM_PORT".to_string(),
                    message: format!("'{raw}': {e}"),
                })
            })
            .transpose()?;

        Ok(Self {
            host: optional_env(env, "DEPTHCAM_HOST").unwrap_or(defaults.host),
            port,
            base_port: parse_optional_env(env, "DEPTHCAM_BASE_PORT", defaults.base_port)?,
            strategy: parse_optional_env(env, "DEPTHCAM_STRATEGY", defaults.strategy)?,
            image: optional_env(env, "DEPTHCAM_IMAGE"),
            auto_build: parse_bool_env(env, "DEPTHCAM_AUTO_BUILD", defaults.auto_build)?,
            startup_timeout_secs: parse_optional_env(
                env,
                "DEPTHCAM_STARTUP_TIMEOUT_SECS",
                defaults.startup_timeout_secs,
            )?,
            build_timeout_secs: parse_optional_env(
                env,
                "DEPTHCAM_BUILD_TIMEOUT_SECS",
                defaults.build_timeout_secs,
            )?,
            build_dir: optional_env(env, "DEPTHCAM_BUILD_DIR").map(PathBuf::from),
            workspace_mount: optional_env(env, "DEPTHCAM_WORKSPACE_MOUNT").map(PathBuf::from),
        })
    }

    /// Build the controller configuration for an endpoint on `port`.
    pub fn to_controller_config(&self, port: u16) -> ControllerConfig {
        ControllerConfig {
            host: self.host.clone(),
            port,
            strategy: self.strategy,
            image: self.image.clone(),
            auto_build: self.auto_build,
            build_dir: self.build_dir.clone(),
            workspace_mount: self.workspace_mount.clone(),
            startup_timeout: Duration::from_secs(self.startup_timeout_secs),
            build_timeout: Duration::from_secs(self.build_timeout_secs),
            ..Default::default()
        }
    }
}
