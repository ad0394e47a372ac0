//! Test doubles for the driver, container runtime and command-runner seams.
//!
//! Provides:
//! - [`StubDriverFactory`]: opens small in-memory drivers and counts their calls
//! - [`FailingDriverFactory`]: a factory whose `open` always fails
//! - [`FakeRuntime`]: an in-memory [`ContainerRuntime`] that records its calls
//! - [`ScriptedRunner`]: a [`CommandRunner`] answering from prefix rules
//! - [`TestEndpoint`]: an RPC endpoint served on an ephemeral local port
//!
//! # Usage
//!
//! ```rust,no_run
//! use depthcam_rpc::testing::{FakeRuntime, Scripted, ScriptedRunner};
//!
//! let runtime = FakeRuntime::new().with_image("azure-kinect-mesa-vpn");
//! let runner = ScriptedRunner::new()
//!     .on("which nvidia-container-runtime", Scripted::exit(1, ""))
//!     .on("/opt/build-mesa-vpn.sh", Scripted::exit(2, "E: no package"));
//! ```

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::config::DeviceConfiguration;
use crate::container::{
    CommandRunner, CommandSpec, ContainerLaunchSpec, ContainerRuntime, ProcessError,
    ProcessOutput, RuntimeError,
};
use crate::device::{
    CaptureResult, ColorFrame, DepthFrame, DeviceDriver, DeviceSession, DriverFactory, PixelFormat,
};
use crate::error::DriverError;
use crate::rpc::{RpcClient, RpcEndpoint};

/// Dimensions of the frames a [`StubDriver`] produces.
pub const STUB_WIDTH: usize = 8;
pub const STUB_HEIGHT: usize = 6;

#[derive(Debug, Default)]
struct StubCounters {
    starts: AtomicU32,
    stops: AtomicU32,
    captures: AtomicU32,
}

/// Factory for [`StubDriver`]s.
///
/// Every driver it opens shares the factory's call counters, so tests can
/// assert on calls after handing the factory to a session.
#[derive(Debug, Clone)]
pub struct StubDriverFactory {
    serial: String,
    fail_stop: bool,
    counters: Arc<StubCounters>,
}

impl StubDriverFactory {
    pub fn new(serial: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
            fail_stop: false,
            counters: Arc::new(StubCounters::default()),
        }
    }

    /// Drivers opened from here fail on `stop`.
    pub fn failing_stop(mut self) -> Self {
        self.fail_stop = true;
        self
    }

    pub fn start_calls(&self) -> u32 {
        self.counters.starts.load(Ordering::Relaxed)
    }

    pub fn stop_calls(&self) -> u32 {
        self.counters.stops.load(Ordering::Relaxed)
    }

    pub fn capture_calls(&self) -> u32 {
        self.counters.captures.load(Ordering::Relaxed)
    }
}

impl DriverFactory for StubDriverFactory {
    fn name(&self) -> &str {
        "stub"
    }

    fn open(&self, _config: &DeviceConfiguration) -> Result<Box<dyn DeviceDriver>, DriverError> {
        Ok(Box::new(StubDriver {
            serial: self.serial.clone(),
            fail_stop: self.fail_stop,
            started: false,
            counters: Arc::clone(&self.counters),
        }))
    }
}

/// In-memory driver with tiny frames.
#[derive(Debug)]
pub struct StubDriver {
    serial: String,
    fail_stop: bool,
    started: bool,
    counters: Arc<StubCounters>,
}

#[async_trait]
impl DeviceDriver for StubDriver {
    fn serial(&self) -> String {
        self.serial.clone()
    }

    async fn start(&mut self) -> Result<(), DriverError> {
        self.counters.starts.fetch_add(1, Ordering::Relaxed);
        self.started = true;
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), DriverError> {
        self.counters.stops.fetch_add(1, Ordering::Relaxed);
        self.started = false;
        if self.fail_stop {
            return Err(DriverError::Failed {
                reason: "stub stop failure".to_string(),
            });
        }
        Ok(())
    }

    async fn get_capture(&mut self, _timeout: Duration) -> Result<CaptureResult, DriverError> {
        if !self.started {
            return Err(DriverError::Failed {
                reason: "stub driver not started".to_string(),
            });
        }
        let n = self.counters.captures.fetch_add(1, Ordering::Relaxed);
        let pixels = STUB_WIDTH * STUB_HEIGHT;
        Ok(CaptureResult {
            color: Some(ColorFrame {
                width: STUB_WIDTH,
                height: STUB_HEIGHT,
                format: PixelFormat::Bgra32,
                data: [10, 20, 30, 255].repeat(pixels),
            }),
            depth: Some(DepthFrame {
                width: STUB_WIDTH,
                height: STUB_HEIGHT,
                data: (0..pixels).map(|i| (i as u16) * 100 + n as u16).collect(),
            }),
            ir: None,
            timestamp: Utc::now(),
        })
    }
}

/// A factory whose drivers never open.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingDriverFactory;

impl DriverFactory for FailingDriverFactory {
    fn name(&self) -> &str {
        "failing"
    }

    fn open(&self, _config: &DeviceConfiguration) -> Result<Box<dyn DeviceDriver>, DriverError> {
        Err(DriverError::Failed {
            reason: "no device attached".to_string(),
        })
    }
}

#[derive(Debug, Default)]
struct FakeState {
    unavailable: Option<String>,
    images: HashSet<String>,
    runtimes: Vec<String>,
    launch_ids: VecDeque<String>,
    launch_error: Option<String>,
    launched: u32,
    exit_on_launch: bool,
    hung_stops: u32,
    running: Vec<String>,
    launches: Vec<ContainerLaunchSpec>,
    calls: Vec<String>,
}

/// In-memory container runtime.
///
/// Containers "run" from launch until stopped or killed. Calls are recorded
/// as short lines (`launch <image>`, `stop <id>`, `kill <id>`, ...).
#[derive(Debug, Default)]
pub struct FakeRuntime {
    state: Mutex<FakeState>,
}

impl FakeRuntime {
    /// Version string reported by a reachable fake daemon.
    pub const VERSION: &'static str = "Docker 27.0.3";

    pub fn new() -> Self {
        Self::default()
    }

    /// Every call fails as if the daemon were down.
    pub fn unavailable(self, reason: impl Into<String>) -> Self {
        self.lock().unavailable = Some(reason.into());
        self
    }

    pub fn with_image(self, image: impl Into<String>) -> Self {
        self.lock().images.insert(image.into());
        self
    }

    /// Register the GPU runtime with the daemon.
    pub fn with_gpu_runtime(self) -> Self {
        self.lock().runtimes.push(crate::container::GPU_RUNTIME.to_string());
        self
    }

    /// Ids handed out by successive launches; generated once these run out.
    pub fn launch_ids<I, S>(self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lock().launch_ids.extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn failing_launch(self, reason: impl Into<String>) -> Self {
        self.lock().launch_error = Some(reason.into());
        self
    }

    /// Launched containers exit immediately.
    pub fn exiting_containers(self) -> Self {
        self.lock().exit_on_launch = true;
        self
    }

    /// The next stop request hangs past its grace period.
    pub fn hanging_stop(self) -> Self {
        self.lock().hung_stops += 1;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn count_matching(&self, prefix: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    /// Launch specs in order.
    pub fn launches(&self) -> Vec<ContainerLaunchSpec> {
        self.lock().launches.clone()
    }

    /// Ids of containers still running.
    pub fn running(&self) -> Vec<String> {
        self.lock().running.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, call: String) -> Result<std::sync::MutexGuard<'_, FakeState>, RuntimeError> {
        let mut state = self.lock();
        state.calls.push(call);
        match &state.unavailable {
            Some(reason) => Err(RuntimeError::Unavailable {
                reason: reason.clone(),
            }),
            None => Ok(state),
        }
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn version(&self) -> Result<String, RuntimeError> {
        self.record("version".to_string())?;
        Ok(Self::VERSION.to_string())
    }

    async fn registered_runtimes(&self) -> Result<Vec<String>, RuntimeError> {
        let state = self.record("info".to_string())?;
        let mut runtimes = vec!["runc".to_string()];
        runtimes.extend(state.runtimes.iter().cloned());
        Ok(runtimes)
    }

    async fn image_exists(&self, image: &str) -> Result<bool, RuntimeError> {
        let state = self.record(format!("image_exists {image}"))?;
        Ok(state.images.contains(image))
    }

    async fn launch(&self, spec: &ContainerLaunchSpec) -> Result<String, RuntimeError> {
        let mut state = self.record(format!("launch {}", spec.image_name))?;
        state.launches.push(spec.clone());
        if let Some(reason) = &state.launch_error {
            return Err(RuntimeError::Api {
                operation: "create container".to_string(),
                reason: reason.clone(),
            });
        }
        state.launched += 1;
        let id = match state.launch_ids.pop_front() {
            Some(id) => id,
            None => format!("fakec0ffee{:02}", state.launched),
        };
        if !state.exit_on_launch && !id.is_empty() {
            state.running.push(id.clone());
        }
        Ok(id)
    }

    async fn is_running(&self, container_id: &str) -> Result<bool, RuntimeError> {
        let state = self.record(format!("is_running {container_id}"))?;
        Ok(state.running.iter().any(|id| id == container_id))
    }

    async fn stop(&self, container_id: &str, grace: Duration) -> Result<(), RuntimeError> {
        let mut state = self.record(format!("stop {container_id}"))?;
        if state.hung_stops > 0 {
            state.hung_stops -= 1;
            return Err(RuntimeError::TimedOut {
                operation: "stop container".to_string(),
                timeout: grace,
            });
        }
        let before = state.running.len();
        state.running.retain(|id| id != container_id);
        if state.running.len() == before {
            return Err(RuntimeError::NotFound {
                what: container_id.to_string(),
            });
        }
        Ok(())
    }

    async fn kill(&self, container_id: &str) -> Result<(), RuntimeError> {
        let mut state = self.record(format!("kill {container_id}"))?;
        state.running.retain(|id| id != container_id);
        Ok(())
    }
}

/// Canned answer of a [`ScriptedRunner`] rule.
#[derive(Debug, Clone)]
pub enum Scripted {
    Output(ProcessOutput),
    SpawnError,
    TimedOut,
}

impl Scripted {
    /// Exit 0 with the given stdout.
    pub fn stdout(stdout: impl Into<String>) -> Self {
        Scripted::Output(ProcessOutput {
            status: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        })
    }

    /// Exit with `code` and the given stderr.
    pub fn exit(code: i32, stderr: impl Into<String>) -> Self {
        Scripted::Output(ProcessOutput {
            status: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        })
    }

    pub fn spawn_error() -> Self {
        Scripted::SpawnError
    }

    pub fn timed_out() -> Self {
        Scripted::TimedOut
    }

    fn answer(&self, command: &CommandSpec) -> Result<ProcessOutput, ProcessError> {
        match self {
            Scripted::Output(output) => Ok(output.clone()),
            Scripted::SpawnError => Err(ProcessError::Spawn {
                program: command.program.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
            }),
            Scripted::TimedOut => Err(ProcessError::TimedOut {
                command: command.command_line(),
                timeout: command.timeout,
            }),
        }
    }
}

#[derive(Debug)]
struct Rule {
    prefix: String,
    answers: VecDeque<Scripted>,
    sticky: bool,
}

/// A [`CommandRunner`] that answers from prefix rules instead of spawning.
///
/// Rules match against [`CommandSpec::command_line`]; the first matching
/// rule wins. [`on`](Self::on) rules answer forever; [`once`](Self::once)
/// rules answer once and are then skipped. Unmatched commands exit 0 with
/// empty output. Every command is recorded.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, prefix: impl Into<String>, answer: Scripted) -> Self {
        self.push_rule(prefix.into(), answer, true)
    }

    pub fn once(self, prefix: impl Into<String>, answer: Scripted) -> Self {
        self.push_rule(prefix.into(), answer, false)
    }

    /// Command lines run so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn count_matching(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    fn push_rule(self, prefix: String, answer: Scripted, sticky: bool) -> Self {
        self.rules
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Rule {
                prefix,
                answers: VecDeque::from([answer]),
                sticky,
            });
        self
    }

    fn answer_for(&self, line: &str) -> Option<Scripted> {
        let mut rules = self.rules.lock().unwrap_or_else(PoisonError::into_inner);
        let rule = rules
            .iter_mut()
            .find(|r| !r.answers.is_empty() && line.starts_with(&r.prefix))?;
        if rule.sticky {
            rule.answers.front().cloned()
        } else {
            rule.answers.pop_front()
        }
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, command: &CommandSpec) -> Result<ProcessOutput, ProcessError> {
        let line = command.command_line();
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line.clone());
        match self.answer_for(&line) {
            Some(answer) => answer.answer(command),
            None => Ok(ProcessOutput {
                status: Some(0),
                ..Default::default()
            }),
        }
    }
}

/// An RPC endpoint served on `127.0.0.1` at an ephemeral port.
///
/// The server shuts down when the value is dropped.
pub struct TestEndpoint {
    pub port: u16,
    pub session: DeviceSession,
    shutdown: Option<tokio::sync::oneshot::Sender<()>>,
    task: Option<tokio::task::JoinHandle<std::io::Result<()>>>,
    stopped: Arc<AtomicBool>,
}

impl TestEndpoint {
    /// Serve a simulated session.
    pub async fn start() -> std::io::Result<Self> {
        Self::with_session(DeviceSession::simulated()).await
    }

    pub async fn with_session(session: DeviceSession) -> std::io::Result<Self> {
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await?;
        let port = listener.local_addr()?.port();
        let endpoint = Arc::new(RpcEndpoint::new(session.clone()));
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let stopped = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stopped);
        let task = tokio::spawn(async move {
            let result = crate::rpc::serve(endpoint, listener, async {
                let _ = rx.await;
            })
            .await;
            flag.store(true, Ordering::SeqCst);
            result
        });
        Ok(Self {
            port,
            session,
            shutdown: Some(tx),
            task: Some(task),
            stopped,
        })
    }

    pub fn client(&self) -> RpcClient {
        match RpcClient::new("127.0.0.1", self.port) {
            Ok(client) => client,
            Err(e) => panic!("test client for port {}: {e}", self.port),
        }
    }

    /// Stop serving and wait for the server task to exit.
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl Drop for TestEndpoint {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}
