//! Host capability checks.
//!
//! Checks ask the [`ContainerRuntime`] or shell out through a
//! [`CommandRunner`]. They never fail hard: a check that cannot run answers "no".

use std::time::Duration;

use crate::container::process::{CommandRunner, CommandSpec};
use crate::container::runtime::{ContainerRuntime, RuntimeError};
use crate::container::spec::GPU_RUNTIME;

/// Bound on each host check.
pub const CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Host platform for install guidance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    MacOS,
    Linux,
    Windows,
}

impl Platform {
    pub fn current() -> Self {
        match std::env::consts::OS {
            "macos" => Platform::MacOS,
            "windows" => Platform::Windows,
            _ => Platform::Linux,
        }
    }

    pub fn install_hint(&self) -> &'static str {
        match self {
            Platform::MacOS => {
                "Install Docker Desktop: https://docs.docker.com/desktop/install/mac-install/"
            }
            Platform::Linux => "Install Docker Engine: https://docs.docker.com/engine/install/",
            Platform::Windows => {
                "Install Docker Desktop: https://docs.docker.com/desktop/install/windows-install/"
            }
        }
    }
}

/// Outcome of the runtime presence check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeStatus {
    /// The runtime answered; carries its version line.
    Available { version: String },
    /// The daemon is missing or did not answer.
    Missing { reason: String },
}

impl RuntimeStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, RuntimeStatus::Available { .. })
    }
}

/// Check that the runtime daemon answers.
pub async fn check_runtime(runtime: &dyn ContainerRuntime) -> RuntimeStatus {
    match tokio::time::timeout(CHECK_TIMEOUT, runtime.version()).await {
        Ok(Ok(version)) => RuntimeStatus::Available { version },
        Ok(Err(RuntimeError::Unavailable { reason })) => RuntimeStatus::Missing { reason },
        Ok(Err(e)) => RuntimeStatus::Missing {
            reason: e.to_string(),
        },
        Err(_) => RuntimeStatus::Missing {
            reason: format!("no answer within {:?}", CHECK_TIMEOUT),
        },
    }
}

/// Whether the host can pass a GPU through to containers.
///
/// True when `nvidia-container-runtime` is on PATH, or when the daemon has
/// the GPU runtime registered.
pub async fn detect_acceleration(
    runner: &dyn CommandRunner,
    runtime: &dyn ContainerRuntime,
) -> bool {
    let which =
        CommandSpec::new("which", ["nvidia-container-runtime"]).with_timeout(CHECK_TIMEOUT);
    if matches!(runner.run(&which).await, Ok(out) if out.success()) {
        return true;
    }

    match tokio::time::timeout(CHECK_TIMEOUT, runtime.registered_runtimes()).await {
        Ok(Ok(runtimes)) => runtimes.iter().any(|r| r == GPU_RUNTIME),
        Ok(Err(e)) => {
            tracing::debug!("Acceleration check failed: {}", e);
            false
        }
        Err(_) => false,
    }
}
