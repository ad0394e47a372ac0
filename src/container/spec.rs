//! Execution strategies and the container launch description.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::Serialize;

/// How the endpoint container renders: GPU passthrough or software.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Accelerated,
    Software,
}

impl Strategy {
    /// Image and build procedure used for this strategy.
    pub fn profile(&self) -> ImageProfile {
        match self {
            Strategy::Accelerated => ImageProfile {
                image: "azure-kinect-prebuilt-vpn",
                build_script: "build-prebuilt-vpn.sh",
            },
            Strategy::Software => ImageProfile {
                image: "azure-kinect-mesa-vpn",
                build_script: "build-mesa-vpn.sh",
            },
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Accelerated => "accelerated",
            Strategy::Software => "software",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User override of the strategy choice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum StrategyMode {
    /// Accelerated when the host toolkit is available, software otherwise.
    #[default]
    Auto,
    Accelerated,
    Software,
}

impl StrategyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyMode::Auto => "auto",
            StrategyMode::Accelerated => "accelerated",
            StrategyMode::Software => "software",
        }
    }
}

impl FromStr for StrategyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(StrategyMode::Auto),
            "accelerated" => Ok(StrategyMode::Accelerated),
            "software" => Ok(StrategyMode::Software),
            other => Err(format!(
                "unknown strategy '{other}', expected auto, accelerated or software"
            )),
        }
    }
}

impl fmt::Display for StrategyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decide the strategy. Explicit overrides win; `Auto` follows GPU detection.
pub fn resolve_strategy(mode: StrategyMode, toolkit_available: bool) -> Strategy {
    match mode {
        StrategyMode::Accelerated => Strategy::Accelerated,
        StrategyMode::Software => Strategy::Software,
        StrategyMode::Auto if toolkit_available => Strategy::Accelerated,
        StrategyMode::Auto => Strategy::Software,
    }
}

/// Default image of a strategy and the script that builds it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageProfile {
    pub image: &'static str,
    pub build_script: &'static str,
}

/// Host path bind-mounted into the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub host: PathBuf,
    pub container: String,
    pub read_only: bool,
}

impl Mount {
    pub fn rw(host: impl Into<PathBuf>, container: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            container: container.into(),
            read_only: false,
        }
    }

    /// `host:container:mode`, as the runtime's bind list takes it.
    pub fn to_bind(&self) -> String {
        let mode = if self.read_only { "ro" } else { "rw" };
        format!("{}:{}:{}", self.host.display(), self.container, mode)
    }
}

/// The GPU runtime name passed to the container runtime.
pub const GPU_RUNTIME: &str = "nvidia";

/// Everything needed to launch the endpoint container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerLaunchSpec {
    pub image_name: String,
    /// OCI runtime override; the GPU runtime when accelerated.
    pub runtime: Option<String>,
    pub env: Vec<(String, String)>,
    pub mounts: Vec<Mount>,
    /// Device cgroup rules granting USB and video device access.
    pub device_rules: Vec<String>,
    /// Command run inside the container, before the bind arguments.
    pub entrypoint_args: Vec<String>,
    /// Address the endpoint binds inside the container.
    pub host: String,
    pub port: u16,
}

impl ContainerLaunchSpec {
    /// Launch spec with the device, display and udev access the camera needs.
    pub fn new(image_name: impl Into<String>, entrypoint_args: Vec<String>, port: u16) -> Self {
        Self {
            image_name: image_name.into(),
            runtime: None,
            env: vec![("DISPLAY".to_string(), ":0".to_string())],
            mounts: vec![
                Mount::rw("/tmp/.X11-unix", "/tmp/.X11-unix"),
                Mount::rw("/dev", "/dev"),
                Mount::rw("/etc/udev/rules.d", "/etc/udev/rules.d"),
            ],
            device_rules: vec!["c 81:* rmw".to_string(), "c 189:* rmw".to_string()],
            entrypoint_args,
            host: "0.0.0.0".to_string(),
            port,
        }
    }

    pub fn with_gpu_runtime(mut self) -> Self {
        self.runtime = Some(GPU_RUNTIME.to_string());
        self
    }

    pub fn with_mount(mut self, mount: Mount) -> Self {
        self.mounts.push(mount);
        self
    }

    pub fn uses_gpu_runtime(&self) -> bool {
        self.runtime.as_deref() == Some(GPU_RUNTIME)
    }

    /// Container command: the entrypoint followed by `--host H --port P`.
    pub fn command(&self) -> Vec<String> {
        let mut cmd = self.entrypoint_args.clone();
        cmd.push("--host".into());
        cmd.push(self.host.clone());
        cmd.push("--port".into());
        cmd.push(self.port.to_string());
        cmd
    }
}
