//! Endpoint container lifecycle.
//!
//! The controller walks `Idle -> StrategyResolved -> ImageReady -> Launching
//! -> Running -> Stopped`. It owns at most one [`ContainerHandle`]; the
//! container is stopped on [`ContainerLifecycleController::stop`], on start
//! failures after launch, and when the controller is dropped.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::net::TcpStream;

use crate::container::detect::{self, Platform, RuntimeStatus};
use crate::container::error::{ContainerError, Result};
use crate::container::process::{CommandRunner, CommandSpec, ProcessError, TokioCommandRunner};
use crate::container::runtime::{ContainerRuntime, DockerRuntime, RuntimeError};
use crate::container::spec::{self, ContainerLaunchSpec, Mount, Strategy, StrategyMode};

/// Headroom over the stop grace period before a stop request counts as hung.
const STOP_SLACK: Duration = Duration::from_secs(5);

/// Configuration of one endpoint container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Host the endpoint is reached at from this process.
    pub host: String,
    pub port: u16,
    pub strategy: StrategyMode,
    /// Explicit image; replaces the strategy default.
    pub image: Option<String>,
    pub auto_build: bool,
    /// Searched first for build scripts.
    pub build_dir: Option<PathBuf>,
    /// Host directory mounted read-write at `/workspace`.
    pub workspace_mount: Option<PathBuf>,
    /// Command that runs the endpoint inside the image.
    pub endpoint_command: Vec<String>,
    pub startup_timeout: Duration,
    pub poll_interval: Duration,
    pub connect_timeout: Duration,
    pub build_timeout: Duration,
    pub launch_timeout: Duration,
    pub stop_timeout: Duration,
    pub kill_timeout: Duration,
    /// Pause between stop and start on restart.
    pub restart_delay: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8000,
            strategy: StrategyMode::Auto,
            image: None,
            auto_build: true,
            build_dir: None,
            workspace_mount: None,
            endpoint_command: vec!["depthcam".to_string(), "serve".to_string()],
            startup_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(1),
            build_timeout: Duration::from_secs(1800),
            launch_timeout: Duration::from_secs(30),
            stop_timeout: Duration::from_secs(10),
            kill_timeout: Duration::from_secs(10),
            restart_delay: Duration::from_secs(2),
        }
    }
}

/// Lifecycle state of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerState {
    Idle,
    StrategyResolved,
    ImageReady,
    Launching,
    Running,
    Stopped,
}

impl std::fmt::Display for ControllerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ControllerState::Idle => "idle",
            ControllerState::StrategyResolved => "strategy_resolved",
            ControllerState::ImageReady => "image_ready",
            ControllerState::Launching => "launching",
            ControllerState::Running => "running",
            ControllerState::Stopped => "stopped",
        };
        write!(f, "{}", s)
    }
}

/// A launched container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerHandle {
    pub container_id: String,
    pub host: String,
    pub port: u16,
}

impl ContainerHandle {
    /// Abbreviated id, as the runtime prints it.
    pub fn short_id(&self) -> &str {
        self.container_id.get(..12).unwrap_or(&self.container_id)
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Snapshot for display and diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerInfo {
    pub host: String,
    pub port: u16,
    pub strategy_mode: StrategyMode,
    pub strategy: Option<Strategy>,
    /// Image in use, or the configured one before launch.
    pub image: Option<String>,
    pub auto_build: bool,
    pub toolkit_available: Option<bool>,
    pub using_container: bool,
    pub container_id: Option<String>,
    pub state: ControllerState,
}

/// Stops one container. Detached from the controller so it can run on any
/// exit path.
pub struct Teardown {
    runtime: Arc<dyn ContainerRuntime>,
    handle: ContainerHandle,
    stop_timeout: Duration,
    kill_timeout: Duration,
}

impl Teardown {
    pub fn handle(&self) -> &ContainerHandle {
        &self.handle
    }

    /// Graceful stop, escalating to kill when stop hangs. Never fails.
    pub async fn run(self) {
        let id = self.handle.container_id.as_str();
        tracing::info!("Stopping container {}", self.handle.short_id());

        let stopped = tokio::time::timeout(
            self.stop_timeout + STOP_SLACK,
            self.runtime.stop(id, self.stop_timeout),
        )
        .await
        .unwrap_or_else(|_| {
            Err(RuntimeError::TimedOut {
                operation: "stop container".to_string(),
                timeout: self.stop_timeout,
            })
        });

        match stopped {
            Ok(()) => tracing::info!("Stopped container {}", self.handle.short_id()),
            Err(e) if e.is_not_found() => {
                tracing::debug!("Container {} already removed", self.handle.short_id());
            }
            Err(RuntimeError::TimedOut { .. }) => {
                tracing::warn!(
                    "Container {} did not stop within {:?}, killing",
                    self.handle.short_id(),
                    self.stop_timeout
                );
                match tokio::time::timeout(self.kill_timeout, self.runtime.kill(id)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => tracing::warn!("Failed to kill container {}: {}", id, e),
                    Err(_) => tracing::warn!(
                        "Killing container {} timed out after {:?}",
                        id,
                        self.kill_timeout
                    ),
                }
            }
            Err(e) => tracing::warn!("Failed to stop container {}: {}", id, e),
        }
    }

    /// Run to completion from synchronous code, including inside an async
    /// runtime (e.g. from `Drop`).
    pub fn run_blocking(self) {
        let joined = std::thread::spawn(move || {
            match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime.block_on(self.run()),
                Err(e) => tracing::warn!("Container teardown runtime failed: {}", e),
            }
        })
        .join();
        if joined.is_err() {
            tracing::warn!("Container teardown thread panicked");
        }
    }
}

/// Drives the endpoint container from strategy selection to teardown.
pub struct ContainerLifecycleController {
    config: ControllerConfig,
    runtime: Arc<dyn ContainerRuntime>,
    runner: Arc<dyn CommandRunner>,
    state: ControllerState,
    strategy: Option<Strategy>,
    toolkit_available: Option<bool>,
    image: Option<String>,
    handle: Option<ContainerHandle>,
}

impl ContainerLifecycleController {
    /// Controller on the local Docker daemon.
    pub fn new(config: ControllerConfig) -> Self {
        Self::with_backends(config, Arc::new(DockerRuntime), Arc::new(TokioCommandRunner))
    }

    /// Controller on the given runtime; `runner` runs the build scripts and
    /// host checks.
    pub fn with_backends(
        config: ControllerConfig,
        runtime: Arc<dyn ContainerRuntime>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            config,
            runtime,
            runner,
            state: ControllerState::Idle,
            strategy: None,
            toolkit_available: None,
            image: None,
            handle: None,
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn strategy(&self) -> Option<Strategy> {
        self.strategy
    }

    pub fn handle(&self) -> Option<&ContainerHandle> {
        self.handle.as_ref()
    }

    /// Check the runtime, look for GPU support and pick a strategy.
    pub async fn resolve_strategy(&mut self) -> Result<Strategy> {
        match detect::check_runtime(self.runtime.as_ref()).await {
            RuntimeStatus::Available { version } => {
                tracing::debug!("Container runtime: {}", version)
            }
            RuntimeStatus::Missing { reason } => {
                return Err(ContainerError::RuntimeMissing {
                    reason: format!("{}. {}", reason, Platform::current().install_hint()),
                });
            }
        }

        let toolkit =
            detect::detect_acceleration(self.runner.as_ref(), self.runtime.as_ref()).await;
        let strategy = spec::resolve_strategy(self.config.strategy, toolkit);
        tracing::info!(
            "Resolved {} strategy (mode {}, GPU toolkit {})",
            strategy,
            self.config.strategy,
            if toolkit { "available" } else { "not available" }
        );

        self.toolkit_available = Some(toolkit);
        self.strategy = Some(strategy);
        self.image = None;
        self.state = ControllerState::StrategyResolved;
        Ok(strategy)
    }

    /// Reuse the image if present, else build it when auto-build is on.
    pub async fn prepare_image(&mut self) -> Result<String> {
        let strategy = self.current_strategy().await?;
        let profile = strategy.profile();
        let wanted = self
            .config
            .image
            .clone()
            .unwrap_or_else(|| profile.image.to_string());

        let exists = self.runtime.image_exists(&wanted).await.unwrap_or_else(|e| {
            tracing::warn!("Could not look up image '{}': {}", wanted, e);
            false
        });
        if exists {
            tracing::info!("Using existing image '{}'", wanted);
            return Ok(self.image_ready(wanted));
        }

        if !self.config.auto_build {
            return Err(ContainerError::ImageMissing {
                image: wanted,
                build_command: format!("./{}", profile.build_script),
            });
        }

        if wanted != profile.image {
            tracing::warn!(
                "Image '{}' not found, building the {} image '{}' instead",
                wanted,
                strategy,
                profile.image
            );
        }
        let image = self.build(strategy).await?;
        Ok(self.image_ready(image))
    }

    /// Build the image of the resolved strategy without launching anything.
    pub async fn build_image(&mut self) -> Result<String> {
        let strategy = self.current_strategy().await?;
        let image = self.build(strategy).await?;
        Ok(self.image_ready(image))
    }

    /// Start the container from the prepared image. With a live container
    /// already owned, returns its handle instead of launching another.
    async fn launch(&mut self) -> Result<ContainerHandle> {
        if let Some(handle) = &self.handle {
            return Ok(handle.clone());
        }

        let strategy = self.current_strategy().await?;
        let image = match self.image.clone() {
            Some(image) => image,
            None => self.prepare_image().await?,
        };

        // Check again: the toolkit may have gone away since the strategy was chosen.
        let accelerate = strategy == Strategy::Accelerated
            && detect::detect_acceleration(self.runner.as_ref(), self.runtime.as_ref()).await;
        if strategy == Strategy::Accelerated && !accelerate {
            tracing::warn!("GPU runtime not detected at launch, starting without it");
        }

        let mut launch = ContainerLaunchSpec::new(
            image.clone(),
            self.config.endpoint_command.clone(),
            self.config.port,
        );
        if accelerate {
            launch = launch.with_gpu_runtime();
        }
        if let Some(dir) = &self.config.workspace_mount {
            launch = launch.with_mount(Mount::rw(dir, "/workspace"));
        }

        tracing::info!(
            "Launching endpoint container from '{}' (GPU runtime: {})",
            image,
            if launch.uses_gpu_runtime() { "yes" } else { "no" }
        );
        self.state = ControllerState::Launching;

        let launched =
            match tokio::time::timeout(self.config.launch_timeout, self.runtime.launch(&launch))
                .await
            {
                Ok(result) => result,
                Err(_) => {
                    self.state = ControllerState::ImageReady;
                    return Err(ContainerError::LaunchTimeout {
                        image,
                        timeout: self.config.launch_timeout,
                    });
                }
            };

        let container_id = match launched {
            Ok(id) if !id.trim().is_empty() => id.trim().to_string(),
            Ok(_) => {
                self.state = ControllerState::ImageReady;
                return Err(ContainerError::LaunchFailed {
                    image,
                    reason: "runtime returned no container id".to_string(),
                });
            }
            Err(e) => {
                self.state = ControllerState::ImageReady;
                return Err(ContainerError::LaunchFailed {
                    image,
                    reason: e.to_string(),
                });
            }
        };

        let handle = ContainerHandle {
            container_id,
            host: self.config.host.clone(),
            port: self.config.port,
        };
        tracing::info!("Started container {}", handle.short_id());
        self.handle = Some(handle.clone());
        Ok(handle)
    }

    /// Poll until the endpoint accepts TCP connections.
    async fn wait_until_reachable(&mut self) -> Result<()> {
        let Some(handle) = self.handle.clone() else {
            return Err(ContainerError::LaunchFailed {
                image: self.image.clone().unwrap_or_default(),
                reason: "no container has been launched".to_string(),
            });
        };

        let timeout = self.config.startup_timeout;
        let start = Instant::now();
        tracing::info!("Waiting for endpoint at {}", handle.address());

        loop {
            if tcp_reachable(&handle.host, handle.port, self.config.connect_timeout).await {
                tracing::info!(
                    "Endpoint ready at {} after {:?}",
                    handle.address(),
                    start.elapsed()
                );
                self.state = ControllerState::Running;
                return Ok(());
            }

            // An unanswered inspect counts as still running.
            let running = self
                .runtime
                .is_running(&handle.container_id)
                .await
                .unwrap_or(true);
            if !running {
                return Err(ContainerError::ContainerExited {
                    container_id: handle.container_id,
                });
            }

            if start.elapsed() >= timeout {
                return Err(ContainerError::ReachabilityTimeout {
                    address: handle.address(),
                    timeout,
                });
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// Resolve, prepare, launch and wait. A container that was launched but
    /// never became reachable is stopped before the error is returned. If
    /// this future is dropped mid-wait, the launched container stays owned
    /// and is stopped with the controller.
    pub async fn start(&mut self) -> Result<ContainerHandle> {
        if let Some(handle) = &self.handle
            && self.state == ControllerState::Running
        {
            tracing::info!("Endpoint container {} already running", handle.short_id());
            return Ok(handle.clone());
        }

        // A handle left by an interrupted start is waited on, not relaunched.
        if self.handle.is_none() {
            self.resolve_strategy().await?;
            self.prepare_image().await?;
        }
        let handle = self.launch().await?;
        if let Err(e) = self.wait_until_reachable().await {
            self.stop().await;
            return Err(e);
        }
        Ok(handle)
    }

    /// Stop the container. A no-op without one; failures are logged only.
    pub async fn stop(&mut self) {
        if let Some(teardown) = self.take_teardown() {
            teardown.run().await;
            self.state = ControllerState::Stopped;
        }
    }

    /// Stop, pause, and start again with the same configuration.
    pub async fn restart(&mut self) -> Result<ContainerHandle> {
        tracing::info!("Restarting endpoint container");
        self.stop().await;
        tokio::time::sleep(self.config.restart_delay).await;
        self.start().await
    }

    pub fn server_info(&self) -> ServerInfo {
        ServerInfo {
            host: self.config.host.clone(),
            port: self.config.port,
            strategy_mode: self.config.strategy,
            strategy: self.strategy,
            image: self.image.clone().or_else(|| self.config.image.clone()),
            auto_build: self.config.auto_build,
            toolkit_available: self.toolkit_available,
            using_container: self.handle.is_some(),
            container_id: self.handle.as_ref().map(|h| h.container_id.clone()),
            state: self.state,
        }
    }

    /// Detach the teardown of the current container, if any.
    pub fn take_teardown(&mut self) -> Option<Teardown> {
        self.handle.take().map(|handle| Teardown {
            runtime: Arc::clone(&self.runtime),
            handle,
            stop_timeout: self.config.stop_timeout,
            kill_timeout: self.config.kill_timeout,
        })
    }

    async fn current_strategy(&mut self) -> Result<Strategy> {
        match self.strategy {
            Some(strategy) => Ok(strategy),
            None => self.resolve_strategy().await,
        }
    }

    fn image_ready(&mut self, image: String) -> String {
        self.image = Some(image.clone());
        self.state = ControllerState::ImageReady;
        image
    }

    async fn build(&self, strategy: Strategy) -> Result<String> {
        let profile = strategy.profile();
        let script = find_build_script(self.config.build_dir.as_deref(), profile.build_script)?;
        make_executable(&script)?;

        let cwd = script
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        tracing::info!(
            "Building image '{}' with {} (this can take a while)",
            profile.image,
            script.display()
        );

        let cmd = CommandSpec::new(script.to_string_lossy(), Vec::<String>::new())
            .with_cwd(cwd)
            .with_timeout(self.config.build_timeout);
        match self.runner.run(&cmd).await {
            Ok(out) if out.success() => {
                tracing::info!("Built image '{}'", profile.image);
                Ok(profile.image.to_string())
            }
            Ok(out) => Err(ContainerError::BuildFailed {
                image: profile.image.to_string(),
                output: out.error_text(),
            }),
            Err(ProcessError::TimedOut { .. }) => Err(ContainerError::BuildTimeout {
                image: profile.image.to_string(),
                timeout: self.config.build_timeout,
            }),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for ContainerLifecycleController {
    fn drop(&mut self) {
        if let Some(teardown) = self.take_teardown() {
            tracing::warn!(
                "Controller dropped with container {} running, stopping it",
                teardown.handle().short_id()
            );
            teardown.run_blocking();
        }
    }
}

impl std::fmt::Debug for ContainerLifecycleController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerLifecycleController")
            .field("config", &self.config)
            .field("state", &self.state)
            .field("handle", &self.handle)
            .finish()
    }
}

/// Locate `script` in `build_dir`, then `./docker`, then the working directory.
pub fn find_build_script(build_dir: Option<&Path>, script: &str) -> Result<PathBuf> {
    let cwd = std::env::current_dir()?;
    let mut searched: Vec<PathBuf> = build_dir.map(Path::to_path_buf).into_iter().collect();
    searched.push(cwd.join("docker"));
    searched.push(cwd);

    match searched.iter().map(|dir| dir.join(script)).find(|p| p.is_file()) {
        Some(path) => Ok(path),
        None => Err(ContainerError::BuildScriptNotFound {
            script: script.to_string(),
            searched,
        }),
    }
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut permissions = std::fs::metadata(path)?.permissions();
    if permissions.mode() & 0o111 != 0o111 {
        permissions.set_mode(permissions.mode() | 0o755);
        std::fs::set_permissions(path, permissions)?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}

async fn tcp_reachable(host: &str, port: u16, timeout: Duration) -> bool {
    matches!(
        tokio::time::timeout(timeout, TcpStream::connect((host, port))).await,
        Ok(Ok(_))
    )
}
