//! Wire types shared by the endpoint and the client.
//!
//! Every procedure answers with an [`Envelope`]: `success`, a human readable
//! `message`, the `simulation_mode` flag, and a procedure specific payload
//! flattened alongside them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const DEVICE_CONNECT: &str = "device_connect";
pub const DEVICE_START: &str = "device_start";
pub const DEVICE_STOP: &str = "device_stop";
pub const DEVICE_DISCONNECT: &str = "device_disconnect";
pub const GET_CAPTURE: &str = "get_capture";
pub const GET_COLOR_IMAGE: &str = "get_color_image";
pub const GET_DEPTH_IMAGE: &str = "get_depth_image";
pub const GET_DEVICE_INFO: &str = "get_device_info";
pub const START_AUTO_CAPTURE: &str = "start_auto_capture";
pub const STOP_AUTO_CAPTURE: &str = "stop_auto_capture";
pub const LIST_METHODS: &str = "list_methods";

/// Every procedure the endpoint serves.
pub const METHODS: [&str; 11] = [
    DEVICE_CONNECT,
    DEVICE_START,
    DEVICE_STOP,
    DEVICE_DISCONNECT,
    GET_CAPTURE,
    GET_COLOR_IMAGE,
    GET_DEPTH_IMAGE,
    GET_DEVICE_INFO,
    START_AUTO_CAPTURE,
    STOP_AUTO_CAPTURE,
    LIST_METHODS,
];

/// A procedure call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub id: u64,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// Reply to an [`RpcRequest`], echoing its id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub id: u64,
    pub result: Envelope,
}

/// Uniform response envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub success: bool,
    pub message: String,
    pub simulation_mode: bool,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl Envelope {
    pub fn ok(message: impl Into<String>, simulation_mode: bool) -> Self {
        Self {
            success: true,
            message: message.into(),
            simulation_mode,
            payload: Map::new(),
        }
    }

    pub fn failure(message: impl Into<String>, simulation_mode: bool) -> Self {
        Self {
            success: false,
            message: message.into(),
            simulation_mode,
            payload: Map::new(),
        }
    }

    /// Attach a payload. Non-object payloads are ignored.
    pub fn with_payload<T: Serialize>(mut self, payload: &T) -> Self {
        match serde_json::to_value(payload) {
            Ok(Value::Object(map)) => self.payload.extend(map),
            Ok(_) => {}
            Err(e) => {
                self.success = false;
                self.message = format!("Failed to encode response: {e}");
            }
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectPayload {
    pub serial: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureParams {
    pub timeout_ms: u64,
}

impl Default for CaptureParams {
    fn default() -> Self {
        Self { timeout_ms: 1000 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorImageParams {
    pub format: String,
    pub quality: i64,
}

impl Default for ColorImageParams {
    fn default() -> Self {
        Self {
            format: "BGR".to_string(),
            quality: 95,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DepthImageParams {
    pub format: String,
    pub min_depth: u16,
    pub max_depth: u16,
}

impl Default for DepthImageParams {
    fn default() -> Self {
        Self {
            format: "RAW".to_string(),
            min_depth: 0,
            max_depth: 4000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoCaptureParams {
    pub interval_ms: u64,
}

impl Default for AutoCaptureParams {
    fn default() -> Self {
        Self { interval_ms: 33 }
    }
}

/// Image bytes (base64) with their interpretation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImagePayload {
    pub image_data: String,
    pub shape: Vec<usize>,
    pub format: String,
    /// Sample type of raw payloads (`uint8` or `uint16`).
    pub dtype: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth_range: Option<[u16; 2]>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodList {
    pub methods: Vec<String>,
}

/// Empty payload of procedures that only report success.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {}
