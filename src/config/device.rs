//! Device configuration and its validation.
//!
//! The configuration travels over the wire as a dictionary:
//!
//! ```json
//! {
//!   "color_resolution": "720P",
//!   "depth_mode": "NFOV_UNBINNED",
//!   "camera_fps": 30,
//!   "synchronized_images_only": true
//! }
//! ```
//!
//! Every field is checked against its enumerated domain. A value outside the
//! domain is rejected with a message naming the field; nothing is coerced to
//! a nearby value.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::ConfigError;

const FIELD_COLOR: &str = "color_resolution";
const FIELD_DEPTH: &str = "depth_mode";
const FIELD_FPS: &str = "camera_fps";
const FIELD_SYNC: &str = "synchronized_images_only";

/// Colour camera resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorResolution {
    Off,
    Res720p,
    Res1080p,
    Res1440p,
    Res2160p,
}

impl ColorResolution {
    pub const ALL: [ColorResolution; 5] = [
        Self::Off,
        Self::Res720p,
        Self::Res1080p,
        Self::Res1440p,
        Self::Res2160p,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Off => "OFF",
            Self::Res720p => "720P",
            Self::Res1080p => "1080P",
            Self::Res1440p => "1440P",
            Self::Res2160p => "2160P",
        }
    }

    /// Frame size as `(width, height)`, `None` when the stream is off.
    pub fn dimensions(&self) -> Option<(usize, usize)> {
        match self {
            Self::Off => None,
            Self::Res720p => Some((1280, 720)),
            Self::Res1080p => Some((1920, 1080)),
            Self::Res1440p => Some((2560, 1440)),
            Self::Res2160p => Some((3840, 2160)),
        }
    }
}

/// Depth camera operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DepthMode {
    Off,
    NfovUnbinned,
    Nfov2x2Binned,
    WfovUnbinned,
    Wfov2x2Binned,
}

impl DepthMode {
    pub const ALL: [DepthMode; 5] = [
        Self::Off,
        Self::NfovUnbinned,
        Self::Nfov2x2Binned,
        Self::WfovUnbinned,
        Self::Wfov2x2Binned,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Off => "OFF",
            Self::NfovUnbinned => "NFOV_UNBINNED",
            Self::Nfov2x2Binned => "NFOV_2X2BINNED",
            Self::WfovUnbinned => "WFOV_UNBINNED",
            Self::Wfov2x2Binned => "WFOV_2X2BINNED",
        }
    }

    /// Depth (and IR) frame size as `(width, height)`.
    pub fn dimensions(&self) -> Option<(usize, usize)> {
        match self {
            Self::Off => None,
            Self::NfovUnbinned => Some((640, 576)),
            Self::Nfov2x2Binned => Some((320, 288)),
            Self::WfovUnbinned => Some((1024, 1024)),
            Self::Wfov2x2Binned => Some((512, 512)),
        }
    }
}

/// Camera frame rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameRate {
    Fps5,
    Fps15,
    Fps30,
}

impl FrameRate {
    pub const ALL: [FrameRate; 3] = [Self::Fps5, Self::Fps15, Self::Fps30];

    pub fn as_u32(&self) -> u32 {
        match self {
            Self::Fps5 => 5,
            Self::Fps15 => 15,
            Self::Fps30 => 30,
        }
    }

    pub fn from_u64(value: u64) -> Option<Self> {
        Self::ALL.into_iter().find(|r| u64::from(r.as_u32()) == value)
    }
}

fn allowed_list(values: impl IntoIterator<Item = String>) -> String {
    values.into_iter().collect::<Vec<_>>().join(", ")
}

impl FromStr for ColorResolution {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| ConfigError::InvalidDeviceSetting {
                field: FIELD_COLOR.to_string(),
                message: format!(
                    "'{s}' is not one of: {}",
                    allowed_list(Self::ALL.iter().map(|r| r.as_str().to_string()))
                ),
            })
    }
}

impl FromStr for DepthMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| ConfigError::InvalidDeviceSetting {
                field: FIELD_DEPTH.to_string(),
                message: format!(
                    "'{s}' is not one of: {}",
                    allowed_list(Self::ALL.iter().map(|m| m.as_str().to_string()))
                ),
            })
    }
}

impl fmt::Display for ColorResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for DepthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for FrameRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u32())
    }
}

/// Validated device configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceConfiguration {
    pub color_resolution: ColorResolution,
    pub depth_mode: DepthMode,
    pub frame_rate: FrameRate,
    pub synchronized: bool,
}

impl Default for DeviceConfiguration {
    fn default() -> Self {
        Self {
            color_resolution: ColorResolution::Res720p,
            depth_mode: DepthMode::NfovUnbinned,
            frame_rate: FrameRate::Fps30,
            synchronized: true,
        }
    }
}

impl DeviceConfiguration {
    /// Wire dictionary form of this configuration.
    pub fn to_value(&self) -> Value {
        serde_json::json!({
            FIELD_COLOR: self.color_resolution.as_str(),
            FIELD_DEPTH: self.depth_mode.as_str(),
            FIELD_FPS: self.frame_rate.as_u32(),
            FIELD_SYNC: self.synchronized,
        })
    }
}

impl Serialize for DeviceConfiguration {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for DeviceConfiguration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        validate_config(&value).map_err(serde::de::Error::custom)
    }
}

/// The default configuration as a wire dictionary.
pub fn create_default_config() -> Value {
    DeviceConfiguration::default().to_value()
}

/// Validate a configuration dictionary.
///
/// `null` yields the default configuration. Missing keys take their default
/// value; unknown keys and values of the wrong type are rejected.
pub fn validate_config(value: &Value) -> Result<DeviceConfiguration, ConfigError> {
    let map = match value {
        Value::Null => return Ok(DeviceConfiguration::default()),
        Value::Object(map) => map,
        other => {
            return Err(ConfigError::InvalidDeviceSetting {
                field: "config".to_string(),
                message: format!("expected an object, got {}", json_type(other)),
            });
        }
    };

    if let Some(unknown) = map
        .keys()
        .find(|k| ![FIELD_COLOR, FIELD_DEPTH, FIELD_FPS, FIELD_SYNC].contains(&k.as_str()))
    {
        return Err(ConfigError::InvalidDeviceSetting {
            field: unknown.clone(),
            message: "unknown configuration field".to_string(),
        });
    }

    let mut config = DeviceConfiguration::default();

    if let Some(raw) = string_field(map, FIELD_COLOR)? {
        config.color_resolution = raw.parse()?;
    }
    if let Some(raw) = string_field(map, FIELD_DEPTH)? {
        config.depth_mode = raw.parse()?;
    }
    if let Some(raw) = map.get(FIELD_FPS) {
        let allowed = allowed_list(FrameRate::ALL.iter().map(|r| r.to_string()));
        config.frame_rate = raw
            .as_u64()
            .and_then(FrameRate::from_u64)
            .ok_or_else(|| ConfigError::InvalidDeviceSetting {
                field: FIELD_FPS.to_string(),
                message: format!("{raw} is not one of: {allowed}"),
            })?;
    }
    if let Some(raw) = map.get(FIELD_SYNC) {
        config.synchronized = raw
            .as_bool()
            .ok_or_else(|| ConfigError::InvalidDeviceSetting {
                field: FIELD_SYNC.to_string(),
                message: format!("must be a boolean, got {}", json_type(raw)),
            })?;
    }

    Ok(config)
}

fn string_field<'a>(
    map: &'a Map<String, Value>,
    field: &str,
) -> Result<Option<&'a str>, ConfigError> {
    match map.get(field) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(other) => Err(ConfigError::InvalidDeviceSetting {
            field: field.to_string(),
            message: format!("must be a string, got {}", json_type(other)),
        }),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Every accepted value per field, as reported by `get_device_info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailableModes {
    pub color_resolutions: Vec<String>,
    pub depth_modes: Vec<String>,
    pub frame_rates: Vec<u32>,
}

impl AvailableModes {
    pub fn all() -> Self {
        Self {
            color_resolutions: ColorResolution::ALL
                .iter()
                .map(|r| r.as_str().to_string())
                .collect(),
            depth_modes: DepthMode::ALL
                .iter()
                .map(|m| m.as_str().to_string())
                .collect(),
            frame_rates: FrameRate::ALL.iter().map(|r| r.as_u32()).collect(),
        }
    }
}
