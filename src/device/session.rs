//! Device session: the single owner of the driver handle.
//!
//! All state transitions happen under one async mutex, so concurrent RPC
//! calls observe them in a single order. The session moves through
//! `Disconnected -> Connected -> Started` and back; operations called from
//! the wrong state fail with a [`DeviceError`] and change nothing.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::config::{AvailableModes, DeviceConfiguration};
use crate::device::auto_capture::{AutoCaptureConfig, AutoCaptureHandle, JOIN_TIMEOUT};
use crate::device::cache::FrameCache;
use crate::device::driver::{CaptureResult, Driver, DriverFactory};
use crate::device::imaging::{self, ColorEncoding, DepthEncoding, EncodedImage};
use crate::error::DeviceError;

/// Externally visible lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Disconnected,
    Connected,
    Started,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Disconnected => write!(f, "disconnected"),
            SessionStatus::Connected => write!(f, "connected"),
            SessionStatus::Started => write!(f, "started"),
        }
    }
}

/// Result of a successful connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOutcome {
    pub serial: String,
    pub simulated: bool,
}

/// Shapes and timestamp of a fresh capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureInfo {
    pub color_shape: Option<Vec<usize>>,
    pub depth_shape: Option<Vec<usize>>,
    pub ir_shape: Option<Vec<usize>>,
    /// Seconds since the Unix epoch.
    pub timestamp: f64,
}

impl CaptureInfo {
    fn from_capture(capture: &CaptureResult) -> Self {
        Self {
            color_shape: capture.color.as_ref().map(|f| f.shape()),
            depth_shape: capture.depth.as_ref().map(|f| f.shape()),
            ir_shape: capture.ir.as_ref().map(|f| f.shape()),
            timestamp: capture.timestamp.timestamp_micros() as f64 / 1_000_000.0,
        }
    }
}

/// Snapshot reported by `get_device_info`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub connected: bool,
    pub started: bool,
    pub serial: Option<String>,
    pub auto_capture: bool,
    pub configuration: Option<DeviceConfiguration>,
    pub available_modes: AvailableModes,
}

pub(crate) struct SessionShared {
    pub(crate) state: Mutex<SessionState>,
    pub(crate) cache: FrameCache,
    factory: Option<Arc<dyn DriverFactory>>,
}

/// Mutable session state, only touched with the session lock held.
#[derive(Default)]
pub(crate) struct SessionState {
    driver: Option<Driver>,
    config: Option<DeviceConfiguration>,
    started: bool,
    auto_capture: Option<AutoCaptureHandle>,
}

impl SessionState {
    pub(crate) fn is_started(&self) -> bool {
        self.started
    }

    fn status(&self) -> SessionStatus {
        match (&self.driver, self.started) {
            (None, _) => SessionStatus::Disconnected,
            (Some(_), false) => SessionStatus::Connected,
            (Some(_), true) => SessionStatus::Started,
        }
    }

    fn auto_capture_running(&self) -> bool {
        self.auto_capture
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Read one capture from the driver and publish it to the cache.
    pub(crate) async fn capture(
        &mut self,
        cache: &FrameCache,
        timeout: Duration,
    ) -> Result<Arc<CaptureResult>, DeviceError> {
        if !self.started {
            return Err(DeviceError::NotStarted);
        }
        let driver = self.driver.as_mut().ok_or(DeviceError::NotConnected)?;
        let capture = driver.get_capture(timeout).await?;
        Ok(cache.store(capture))
    }

    async fn stop(&mut self) -> Result<(), DeviceError> {
        if !self.started {
            return Err(DeviceError::NotStarted);
        }
        if let Some(handle) = self.auto_capture.take() {
            handle.shutdown(JOIN_TIMEOUT).await;
        }
        let result = match self.driver.as_mut() {
            Some(driver) => driver.stop().await,
            None => Ok(()),
        };
        self.started = false;
        result.map_err(DeviceError::from)
    }
}

/// Handle to a device session. Cheap to clone; clones share the session.
#[derive(Clone)]
pub struct DeviceSession {
    shared: Arc<SessionShared>,
}

impl DeviceSession {
    /// Create a session. Without a factory every connect is simulated.
    pub fn new(factory: Option<Arc<dyn DriverFactory>>) -> Self {
        Self {
            shared: Arc::new(SessionShared {
                state: Mutex::new(SessionState::default()),
                cache: FrameCache::new(),
                factory,
            }),
        }
    }

    pub fn simulated() -> Self {
        Self::new(None)
    }

    /// True when no hardware driver is installed.
    pub fn simulation_mode(&self) -> bool {
        self.shared.factory.is_none()
    }

    pub fn cache(&self) -> &FrameCache {
        &self.shared.cache
    }

    pub async fn status(&self) -> SessionStatus {
        self.shared.state.lock().await.status()
    }

    /// Open the device with `config`.
    pub async fn connect(
        &self,
        config: DeviceConfiguration,
    ) -> Result<ConnectOutcome, DeviceError> {
        let mut state = self.shared.state.lock().await;
        if state.driver.is_some() {
            return Err(DeviceError::AlreadyConnected);
        }

        let driver = Driver::select(self.shared.factory.as_ref(), &config)?;
        let outcome = ConnectOutcome {
            serial: driver.serial(),
            simulated: driver.is_simulated(),
        };
        tracing::info!(
            "Device connected: serial={} simulated={}",
            outcome.serial,
            outcome.simulated
        );

        state.driver = Some(driver);
        state.config = Some(config);
        Ok(outcome)
    }

    /// Start the camera streams.
    pub async fn start(&self) -> Result<(), DeviceError> {
        let mut state = self.shared.state.lock().await;
        if state.started {
            return Err(DeviceError::AlreadyStarted);
        }
        let driver = state.driver.as_mut().ok_or(DeviceError::NotConnected)?;
        driver.start().await?;
        state.started = true;
        tracing::info!("Device started");
        Ok(())
    }

    /// Stop the streams, ending auto-capture first.
    ///
    /// The session leaves the started state even when the driver's stop
    /// fails; that failure is still returned.
    pub async fn stop(&self) -> Result<(), DeviceError> {
        let mut state = self.shared.state.lock().await;
        let result = state.stop().await;
        if result.is_ok() {
            tracing::info!("Device stopped");
        }
        result
    }

    /// Release the device, stopping it first when started.
    pub async fn disconnect(&self) -> Result<(), DeviceError> {
        let mut state = self.shared.state.lock().await;
        if state.driver.is_none() {
            return Err(DeviceError::NotConnected);
        }
        if state.started
            && let Err(e) = state.stop().await
        {
            tracing::warn!("Stop during disconnect failed: {}", e);
        }
        state.driver = None;
        state.config = None;
        self.shared.cache.clear();
        tracing::info!("Device disconnected");
        Ok(())
    }

    /// Take a capture now and make it the cached one.
    pub async fn get_capture(&self, timeout: Duration) -> Result<CaptureInfo, DeviceError> {
        let mut state = self.shared.state.lock().await;
        let capture = state.capture(&self.shared.cache, timeout).await?;
        Ok(CaptureInfo::from_capture(&capture))
    }

    pub async fn start_auto_capture(&self, config: AutoCaptureConfig) -> Result<(), DeviceError> {
        let mut state = self.shared.state.lock().await;
        if state.auto_capture_running() {
            return Err(DeviceError::AutoCaptureRunning);
        }
        if !state.started {
            return Err(DeviceError::NotStarted);
        }
        state.auto_capture = Some(AutoCaptureHandle::spawn(
            Arc::downgrade(&self.shared),
            config,
        ));
        Ok(())
    }

    /// Cancel auto-capture. Returns whether a loop was running.
    pub async fn stop_auto_capture(&self) -> bool {
        let handle = self.shared.state.lock().await.auto_capture.take();
        match handle {
            Some(handle) => {
                let running = !handle.is_finished();
                handle.shutdown(JOIN_TIMEOUT).await;
                running
            }
            None => false,
        }
    }

    pub async fn info(&self) -> DeviceInfo {
        let state = self.shared.state.lock().await;
        DeviceInfo {
            connected: state.driver.is_some(),
            started: state.started,
            serial: state.driver.as_ref().map(Driver::serial),
            auto_capture: state.auto_capture_running(),
            configuration: state.config,
            available_modes: AvailableModes::all(),
        }
    }

    /// Derive a colour image from the cached capture.
    pub fn color_image(
        &self,
        encoding: ColorEncoding,
        quality: i64,
    ) -> Result<EncodedImage, DeviceError> {
        let capture = self.shared.cache.latest();
        let frame = capture
            .as_ref()
            .and_then(|c| c.color.as_ref())
            .ok_or(DeviceError::NoData { stream: "color" })?;
        Ok(imaging::encode_color(frame, encoding, quality)?)
    }

    /// Derive a depth image from the cached capture.
    pub fn depth_image(
        &self,
        encoding: DepthEncoding,
        min_depth: u16,
        max_depth: u16,
    ) -> Result<EncodedImage, DeviceError> {
        let capture = self.shared.cache.latest();
        let frame = capture
            .as_ref()
            .and_then(|c| c.depth.as_ref())
            .ok_or(DeviceError::NoData { stream: "depth" })?;
        Ok(imaging::encode_depth(frame, encoding, min_depth, max_depth)?)
    }

    /// Release the device if connected. Used on endpoint shutdown.
    pub async fn shutdown(&self) {
        match self.disconnect().await {
            Ok(()) | Err(DeviceError::NotConnected) => {}
            Err(e) => tracing::warn!("Device shutdown failed: {}", e),
        }
    }
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("simulation_mode", &self.simulation_mode())
            .finish()
    }
}
