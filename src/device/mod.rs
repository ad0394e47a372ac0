//! Depth camera device access.
//!
//! A [`DeviceSession`] owns the driver handle and serializes every state
//! transition. Captures land in a [`FrameCache`]; colour and depth images
//! are derived from the cached capture on request. An optional auto-capture
//! loop keeps the cache fresh in the background.

mod auto_capture;
mod cache;
mod driver;
pub mod imaging;
mod session;
mod simulated;

pub use auto_capture::{AutoCaptureConfig, DEFAULT_INTERVAL as DEFAULT_AUTO_CAPTURE_INTERVAL};
pub use cache::FrameCache;
pub use driver::{
    CaptureResult, ColorFrame, DepthFrame, DeviceDriver, Driver, DriverFactory, PixelFormat,
};
pub use imaging::{ColorEncoding, DepthEncoding, EncodedImage, SampleType};
pub use session::{CaptureInfo, ConnectOutcome, DeviceInfo, DeviceSession, SessionStatus};
pub use simulated::{SIMULATED_SERIAL, SimulatedDriver};
