use std::time::Duration;

use crate::config::helpers::{EnvLookup, optional_env, parse_optional_env, process_env};
use crate::error::ConfigError;

/// Settings of the endpoint process (`depthcam serve`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointSettings {
    pub host: String,
    pub port: u16,
    /// Capture timeout used by the auto-capture loop.
    pub capture_timeout: Duration,
}

impl Default for EndpointSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8000,
            capture_timeout: Duration::from_millis(1000),
        }
    }
}

impl EndpointSettings {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        Self::resolve_with(&process_env)
    }

    pub(crate) fn resolve_with(env: EnvLookup<'_>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let capture_timeout_ms = parse_optional_env(
            env,
            "DEPTHCAM_CAPTURE_TIMEOUT_MS",
            defaults.capture_timeout.as_millis() as u64,
        )?;

        Ok(Self {
            host: optional_env(env, "DEPTHCAM_SERVE_HOST").unwrap_or(defaults.host),
            port: parse_optional_env(env, "DEPTHCAM_SERVE_PORT", defaults.port)?,
            capture_timeout: Duration::from_millis(capture_timeout_ms),
        })
    }
}
