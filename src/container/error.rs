//! Error types for container lifecycle management.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::container::process::ProcessError;

/// Result type for container operations.
pub type Result<T> = std::result::Result<T, ContainerError>;

/// Errors that can occur while bringing the endpoint container up or down.
#[derive(Debug, Error)]
pub enum ContainerError {
    /// The container runtime binary is missing or not answering.
    #[error("Container runtime not available: {reason}")]
    RuntimeMissing {
        /// Reason, including an install hint for this platform.
        reason: String,
    },

    /// No build script for the image was found in any search location.
    #[error("Build script '{script}' not found (searched: {})", display_paths(.searched))]
    BuildScriptNotFound {
        script: String,
        searched: Vec<PathBuf>,
    },

    /// The build procedure exited unsuccessfully.
    #[error("Failed to build image '{image}': {output}")]
    BuildFailed {
        image: String,
        /// Error output of the build, verbatim.
        output: String,
    },

    /// The build procedure ran past its bound.
    #[error("Building image '{image}' timed out after {timeout:?}")]
    BuildTimeout { image: String, timeout: Duration },

    /// The image is absent and automatic building is disabled.
    #[error("Image '{image}' not found and auto-build is disabled. Build it with: {build_command}")]
    ImageMissing { image: String, build_command: String },

    /// The runtime refused to start the container.
    #[error("Failed to launch container from '{image}': {reason}")]
    LaunchFailed { image: String, reason: String },

    /// The launch command ran past its bound.
    #[error("Launching container from '{image}' timed out after {timeout:?}")]
    LaunchTimeout { image: String, timeout: Duration },

    /// The endpoint never accepted connections.
    #[error("Endpoint at {address} not reachable within {timeout:?}")]
    ReachabilityTimeout { address: String, timeout: Duration },

    /// The container stopped before the endpoint became reachable.
    #[error("Container {container_id} exited before the endpoint became reachable")]
    ContainerExited { container_id: String },

    /// The free-port scan found nothing.
    #[error("No free port in {start}..{end}")]
    NoFreePort { start: u16, end: u16 },

    /// An external command could not be run.
    #[error(transparent)]
    Process(#[from] ProcessError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
