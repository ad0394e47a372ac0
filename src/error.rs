//! Error types shared across the crate.
//!
//! Container orchestration errors live in [`crate::container::ContainerError`].

use std::time::Duration;

use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment or CLI setting could not be parsed.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// A device configuration field is outside its enumerated domain.
    #[error("Invalid {field}: {message}")]
    InvalidDeviceSetting { field: String, message: String },
}

/// Errors raised by a device driver.
#[derive(Debug, Error)]
pub enum DriverError {
    /// The driver capability is not present on this host.
    #[error("Driver unavailable: {reason}")]
    Unavailable { reason: String },

    /// No frame arrived within the requested timeout.
    #[error("Timed out after {0:?} waiting for a capture")]
    Timeout(Duration),

    /// The driver reported a failure.
    #[error("Driver failure: {reason}")]
    Failed { reason: String },
}

/// Errors from a device session operation.
///
/// State errors leave the session untouched; callers report them and move on.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("Device already connected")]
    AlreadyConnected,

    #[error("Device not connected")]
    NotConnected,

    #[error("Device already started")]
    AlreadyStarted,

    #[error("Device not started")]
    NotStarted,

    #[error("Auto capture already running")]
    AutoCaptureRunning,

    /// No capture holds the requested stream.
    #[error("No {stream} data available")]
    NoData { stream: &'static str },

    #[error("Configuration rejected: {0}")]
    InvalidConfiguration(#[from] ConfigError),

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error(transparent)]
    Image(#[from] ImageError),
}

/// Image derivation errors.
#[derive(Debug, Error)]
pub enum ImageError {
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("JPEG quality must be between 1 and 100, got {0}")]
    InvalidQuality(i64),

    #[error("Invalid depth range: min_depth {min} is greater than max_depth {max}")]
    InvalidDepthRange { min: u16, max: u16 },

    #[error("Frame buffer does not match its shape {width}x{height}")]
    ShapeMismatch { width: usize, height: usize },

    #[error("Image encoding failed: {0}")]
    Encode(String),
}

/// Errors seen by an RPC caller.
#[derive(Debug, Error)]
pub enum RpcError {
    /// The endpoint could not be reached or the HTTP exchange failed.
    #[error("Transport error calling {method}: {source}")]
    Transport {
        method: String,
        #[source]
        source: reqwest::Error,
    },

    /// The endpoint answered with `success: false`.
    #[error("{method} failed: {message}")]
    Remote { method: String, message: String },

    /// The endpoint answered with something that is not a valid envelope.
    #[error("Invalid response from {method}: {reason}")]
    InvalidResponse { method: String, reason: String },

    /// An image payload could not be decoded.
    #[error("Failed to decode image payload: {0}")]
    Decode(String),

    #[error("Invalid endpoint address: {0}")]
    InvalidAddress(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RpcError {
    /// True when the failure happened before the endpoint answered.
    pub fn is_transport(&self) -> bool {
        matches!(self, RpcError::Transport { .. })
    }
}
