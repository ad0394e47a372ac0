//! Driver seam between a device session and the camera hardware.
//!
//! A session talks to exactly one [`Driver`], chosen once at connect time:
//! the hardware driver when a [`DriverFactory`] is installed, the simulated
//! driver otherwise. Both expose the same capability set.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::DeviceConfiguration;
use crate::device::simulated::SimulatedDriver;
use crate::error::DriverError;

/// Pixel layout of a colour buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// 8-bit blue, green, red, alpha.
    Bgra32,
}

impl PixelFormat {
    pub fn channels(&self) -> usize {
        match self {
            PixelFormat::Bgra32 => 4,
        }
    }
}

/// A colour image as delivered by the device.
#[derive(Debug, Clone)]
pub struct ColorFrame {
    pub width: usize,
    pub height: usize,
    pub format: PixelFormat,
    pub data: Vec<u8>,
}

impl ColorFrame {
    /// Shape as `[height, width, channels]`.
    pub fn shape(&self) -> Vec<usize> {
        vec![self.height, self.width, self.format.channels()]
    }
}

/// A 16-bit single channel image (depth in millimetres, or IR intensity).
#[derive(Debug, Clone)]
pub struct DepthFrame {
    pub width: usize,
    pub height: usize,
    pub data: Vec<u16>,
}

impl DepthFrame {
    /// Shape as `[height, width]`.
    pub fn shape(&self) -> Vec<usize> {
        vec![self.height, self.width]
    }
}

/// One synchronized read of the device's streams.
///
/// Never mutated after the driver returns it; a newer capture replaces it.
#[derive(Debug, Clone)]
pub struct CaptureResult {
    pub color: Option<ColorFrame>,
    pub depth: Option<DepthFrame>,
    pub ir: Option<DepthFrame>,
    pub timestamp: DateTime<Utc>,
}

/// Capability set of a hardware driver.
#[async_trait]
pub trait DeviceDriver: Send {
    /// Opaque serial identifier of the opened device.
    fn serial(&self) -> String;

    async fn start(&mut self) -> Result<(), DriverError>;

    async fn stop(&mut self) -> Result<(), DriverError>;

    /// Block up to `timeout` for the next capture.
    async fn get_capture(&mut self, timeout: Duration) -> Result<CaptureResult, DriverError>;
}

/// Opens hardware drivers. Installed by hosts that link a vendor SDK.
pub trait DriverFactory: Send + Sync {
    fn name(&self) -> &str;

    fn open(&self, config: &DeviceConfiguration) -> Result<Box<dyn DeviceDriver>, DriverError>;
}

/// The driver a session holds after connecting.
pub enum Driver {
    Hardware(Box<dyn DeviceDriver>),
    Simulated(SimulatedDriver),
}

impl Driver {
    /// Pick the driver variant for a new connection.
    pub fn select(
        factory: Option<&Arc<dyn DriverFactory>>,
        config: &DeviceConfiguration,
    ) -> Result<Self, DriverError> {
        match factory {
            Some(factory) => {
                tracing::debug!("Opening hardware driver '{}'", factory.name());
                factory.open(config).map(Driver::Hardware)
            }
            None => Ok(Driver::Simulated(SimulatedDriver::new(*config))),
        }
    }

    pub fn is_simulated(&self) -> bool {
        matches!(self, Driver::Simulated(_))
    }

    pub fn serial(&self) -> String {
        match self {
            Driver::Hardware(d) => d.serial(),
            Driver::Simulated(d) => d.serial().to_string(),
        }
    }

    pub async fn start(&mut self) -> Result<(), DriverError> {
        match self {
            Driver::Hardware(d) => d.start().await,
            Driver::Simulated(d) => d.start(),
        }
    }

    pub async fn stop(&mut self) -> Result<(), DriverError> {
        match self {
            Driver::Hardware(d) => d.stop().await,
            Driver::Simulated(d) => d.stop(),
        }
    }

    pub async fn get_capture(&mut self, timeout: Duration) -> Result<CaptureResult, DriverError> {
        match self {
            Driver::Hardware(d) => d.get_capture(timeout).await,
            Driver::Simulated(d) => d.get_capture(),
        }
    }
}

impl std::fmt::Debug for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Driver::Hardware(d) => write!(f, "Driver::Hardware({})", d.serial()),
            Driver::Simulated(d) => write!(f, "Driver::Simulated({})", d.serial()),
        }
    }
}
