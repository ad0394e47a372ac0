//! RPC endpoint: exposes a [`DeviceSession`] over HTTP.
//!
//! `POST /rpc` takes an [`RpcRequest`] and always answers `200` with an
//! [`RpcResponse`]; failures travel inside the envelope. `GET /health`
//! answers while the server is up.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    response::IntoResponse,
    routing::{get, post},
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures::FutureExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::config::validate_config;
use crate::device::{
    AutoCaptureConfig, ColorEncoding, DepthEncoding, DeviceSession, EncodedImage,
};
use crate::error::DeviceError;
use crate::rpc::types::*;

/// Dispatches procedure calls onto a device session.
pub struct RpcEndpoint {
    session: DeviceSession,
    capture_timeout: Duration,
}

impl RpcEndpoint {
    pub fn new(session: DeviceSession) -> Self {
        Self {
            session,
            capture_timeout: Duration::from_millis(1000),
        }
    }

    /// Capture timeout used by auto-capture loops started through this endpoint.
    pub fn with_capture_timeout(mut self, timeout: Duration) -> Self {
        self.capture_timeout = timeout;
        self
    }

    pub fn session(&self) -> &DeviceSession {
        &self.session
    }

    pub fn capture_timeout(&self) -> Duration {
        self.capture_timeout
    }

    /// Run one procedure. Never fails: errors and panics become failure envelopes.
    pub async fn dispatch(&self, method: &str, params: Value) -> Envelope {
        match AssertUnwindSafe(self.route(method, params)).catch_unwind().await {
            Ok(envelope) => envelope,
            Err(_) => {
                tracing::error!("Procedure {} panicked", method);
                self.failure(format!("{method} failed: internal error"))
            }
        }
    }

    async fn route(&self, method: &str, params: Value) -> Envelope {
        tracing::debug!("RPC {} params={}", method, params);
        match method {
            DEVICE_CONNECT => self.device_connect(params).await,
            DEVICE_START => self.device_start().await,
            DEVICE_STOP => self.device_stop().await,
            DEVICE_DISCONNECT => self.device_disconnect().await,
            GET_CAPTURE => self.get_capture(params).await,
            GET_COLOR_IMAGE => self.get_color_image(params).await,
            GET_DEPTH_IMAGE => self.get_depth_image(params).await,
            GET_DEVICE_INFO => self.get_device_info().await,
            START_AUTO_CAPTURE => self.start_auto_capture(params).await,
            STOP_AUTO_CAPTURE => self.stop_auto_capture().await,
            LIST_METHODS => self.ok("Methods listed").with_payload(&MethodList {
                methods: METHODS.iter().map(|m| m.to_string()).collect(),
            }),
            other => self.failure(format!("Unknown method: {other}")),
        }
    }

    async fn device_connect(&self, params: Value) -> Envelope {
        let config = match validate_config(&params) {
            Ok(config) => config,
            Err(e) => return self.failure(format!("Connection failed: {e}")),
        };
        match self.session.connect(config).await {
            Ok(outcome) => {
                let message = if outcome.simulated {
                    "Device connected (simulation mode)"
                } else {
                    "Device connected successfully"
                };
                self.ok(message).with_payload(&ConnectPayload {
                    serial: outcome.serial,
                })
            }
            Err(e) => self.device_failure("Connection failed", e),
        }
    }

    async fn device_start(&self) -> Envelope {
        match self.session.start().await {
            Ok(()) => self.ok(self.mode_message(
                "Device started successfully",
                "Device started (simulation mode)",
            )),
            Err(e) => self.device_failure("Start failed", e),
        }
    }

    async fn device_stop(&self) -> Envelope {
        match self.session.stop().await {
            Ok(()) => self.ok(self.mode_message(
                "Device stopped successfully",
                "Device stopped (simulation mode)",
            )),
            Err(e) => self.device_failure("Stop failed", e),
        }
    }

    async fn device_disconnect(&self) -> Envelope {
        match self.session.disconnect().await {
            Ok(()) => self.ok("Device disconnected"),
            Err(e) => self.device_failure("Disconnect failed", e),
        }
    }

    async fn get_capture(&self, params: Value) -> Envelope {
        let params: CaptureParams = match parse_params(GET_CAPTURE, params) {
            Ok(p) => p,
            Err(message) => return self.failure(message),
        };
        match self
            .session
            .get_capture(Duration::from_millis(params.timeout_ms))
            .await
        {
            Ok(info) => self
                .ok(self.mode_message("Capture successful", "Capture successful (simulation)"))
                .with_payload(&info),
            Err(e) => self.device_failure("Capture failed", e),
        }
    }

    async fn get_color_image(&self, params: Value) -> Envelope {
        let params: ColorImageParams = match parse_params(GET_COLOR_IMAGE, params) {
            Ok(p) => p,
            Err(message) => return self.failure(message),
        };
        let encoding: ColorEncoding = match params.format.parse() {
            Ok(encoding) => encoding,
            Err(e) => return self.failure(format!("{e}")),
        };

        let session = self.session.clone();
        let quality = params.quality;
        let result =
            tokio::task::spawn_blocking(move || session.color_image(encoding, quality)).await;
        self.image_envelope("Color image retrieved", "Color image failed", result)
    }

    async fn get_depth_image(&self, params: Value) -> Envelope {
        let params: DepthImageParams = match parse_params(GET_DEPTH_IMAGE, params) {
            Ok(p) => p,
            Err(message) => return self.failure(message),
        };
        let encoding: DepthEncoding = match params.format.parse() {
            Ok(encoding) => encoding,
            Err(e) => return self.failure(format!("{e}")),
        };

        let session = self.session.clone();
        let (min, max) = (params.min_depth, params.max_depth);
        let result =
            tokio::task::spawn_blocking(move || session.depth_image(encoding, min, max)).await;
        self.image_envelope("Depth image retrieved", "Depth image failed", result)
    }

    async fn get_device_info(&self) -> Envelope {
        let info = self.session.info().await;
        self.ok("Device info retrieved").with_payload(&info)
    }

    async fn start_auto_capture(&self, params: Value) -> Envelope {
        let params: AutoCaptureParams = match parse_params(START_AUTO_CAPTURE, params) {
            Ok(p) => p,
            Err(message) => return self.failure(message),
        };
        let config = AutoCaptureConfig::default()
            .with_interval(Duration::from_millis(params.interval_ms))
            .with_capture_timeout(self.capture_timeout);
        match self.session.start_auto_capture(config).await {
            Ok(()) => self.ok("Auto capture started"),
            Err(e) => self.device_failure("Auto capture failed", e),
        }
    }

    async fn stop_auto_capture(&self) -> Envelope {
        self.session.stop_auto_capture().await;
        self.ok("Auto capture stopped")
    }

    fn image_envelope(
        &self,
        success: &str,
        prefix: &str,
        result: Result<Result<EncodedImage, DeviceError>, tokio::task::JoinError>,
    ) -> Envelope {
        match result {
            Ok(Ok(image)) => self.ok(success).with_payload(&ImagePayload {
                image_data: STANDARD.encode(&image.data),
                shape: image.shape,
                format: image.format,
                dtype: image.dtype.as_str().to_string(),
                depth_range: image.depth_range,
            }),
            Ok(Err(e)) => self.device_failure(prefix, e),
            Err(e) => self.failure(format!("{prefix}: {e}")),
        }
    }

    fn mode_message<'a>(&self, hardware: &'a str, simulated: &'a str) -> &'a str {
        if self.session.simulation_mode() {
            simulated
        } else {
            hardware
        }
    }

    fn ok(&self, message: impl Into<String>) -> Envelope {
        Envelope::ok(message, self.session.simulation_mode())
    }

    fn failure(&self, message: impl Into<String>) -> Envelope {
        Envelope::failure(message, self.session.simulation_mode())
    }

    /// State errors are reported as-is; everything else gets `prefix`.
    fn device_failure(&self, prefix: &str, error: DeviceError) -> Envelope {
        let message = match error {
            DeviceError::AlreadyConnected
            | DeviceError::NotConnected
            | DeviceError::AlreadyStarted
            | DeviceError::NotStarted
            | DeviceError::AutoCaptureRunning
            | DeviceError::NoData { .. } => error.to_string(),
            other => format!("{prefix}: {other}"),
        };
        self.failure(message)
    }
}

fn parse_params<T: DeserializeOwned + Default>(method: &str, params: Value) -> Result<T, String> {
    if params.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(params).map_err(|e| format!("Invalid params for {method}: {e}"))
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse { status: "healthy" })
}

async fn rpc_handler(State(endpoint): State<Arc<RpcEndpoint>>, body: Bytes) -> Json<RpcResponse> {
    match serde_json::from_slice::<RpcRequest>(&body) {
        Ok(request) => {
            let result = endpoint.dispatch(&request.method, request.params).await;
            Json(RpcResponse {
                id: request.id,
                result,
            })
        }
        Err(e) => Json(RpcResponse {
            id: 0,
            result: endpoint.failure(format!("Invalid request: {e}")),
        }),
    }
}

/// HTTP routes of the endpoint.
pub fn router(endpoint: Arc<RpcEndpoint>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/rpc", post(rpc_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(endpoint)
}

/// Serve until `shutdown` resolves, then release the device.
pub async fn serve<F>(
    endpoint: Arc<RpcEndpoint>,
    listener: TcpListener,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let session = endpoint.session().clone();
    if let Ok(addr) = listener.local_addr() {
        tracing::info!("RPC endpoint listening on {}", addr);
    }

    axum::serve(listener, router(endpoint))
        .with_graceful_shutdown(shutdown)
        .await?;

    tracing::info!("RPC endpoint shutting down");
    session.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn endpoint() -> RpcEndpoint {
        RpcEndpoint::new(DeviceSession::simulated())
    }

    #[tokio::test]
    async fn test_unknown_method_is_a_failure_envelope() {
        let env = endpoint().dispatch("self_destruct", Value::Null).await;
        assert!(!env.success);
        assert!(env.simulation_mode);
        assert_eq!(env.message, "Unknown method: self_destruct");
    }

    #[tokio::test]
    async fn test_capture_before_start() {
        let env = endpoint().dispatch(GET_CAPTURE, Value::Null).await;
        assert!(!env.success);
        assert!(env.message.contains("not started"));
    }

    #[tokio::test]
    async fn test_invalid_config_names_field() {
        let env = endpoint()
            .dispatch(DEVICE_CONNECT, json!({ "depth_mode": "ULTRA" }))
            .await;
        assert!(!env.success);
        assert!(env.message.contains("depth_mode"));
    }

    #[tokio::test]
    async fn test_connect_reports_serial() {
        let endpoint = endpoint();
        let env = endpoint.dispatch(DEVICE_CONNECT, Value::Null).await;
        assert!(env.success);
        assert_eq!(env.payload["serial"], json!(crate::device::SIMULATED_SERIAL));

        let again = endpoint.dispatch(DEVICE_CONNECT, Value::Null).await;
        assert_eq!(again.message, "Device already connected");
    }

    #[tokio::test]
    async fn test_image_errors() {
        let endpoint = endpoint();
        endpoint.dispatch(DEVICE_CONNECT, Value::Null).await;
        endpoint.dispatch(DEVICE_START, Value::Null).await;

        let env = endpoint.dispatch(GET_COLOR_IMAGE, Value::Null).await;
        assert_eq!(env.message, "No color data available");

        endpoint.dispatch(GET_CAPTURE, Value::Null).await;
        let env = endpoint
            .dispatch(GET_COLOR_IMAGE, json!({ "format": "JPEG", "quality": 0 }))
            .await;
        assert!(!env.success);
        assert!(env.message.contains("quality"));

        let env = endpoint
            .dispatch(GET_DEPTH_IMAGE, json!({ "format": "THERMAL" }))
            .await;
        assert_eq!(env.message, "Unsupported format: THERMAL");

        let env = endpoint
            .dispatch(GET_DEPTH_IMAGE, json!({ "min_depth": 3000, "max_depth": 10 }))
            .await;
        assert!(!env.success);
        assert!(env.message.contains("min_depth"));
    }

    #[tokio::test]
    async fn test_bad_params_type() {
        let env = endpoint()
            .dispatch(GET_CAPTURE, json!({ "timeout_ms": "soon" }))
            .await;
        assert!(!env.success);
        assert!(env.message.starts_with("Invalid params for get_capture"));
    }

    #[tokio::test]
    async fn test_stop_auto_capture_always_succeeds() {
        let env = endpoint().dispatch(STOP_AUTO_CAPTURE, Value::Null).await;
        assert!(env.success);
    }

    #[tokio::test]
    async fn test_list_methods() {
        let env = endpoint().dispatch(LIST_METHODS, Value::Null).await;
        let methods = env.payload["methods"].as_array().unwrap();
        assert_eq!(methods.len(), METHODS.len());
    }
}
