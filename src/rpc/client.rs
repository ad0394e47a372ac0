//! Typed client for a remote RPC endpoint.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use url::Url;

use crate::config::DeviceConfiguration;
use crate::device::{CaptureInfo, DeviceInfo};
use crate::error::RpcError;
use crate::rpc::images::decode_image_data;
use crate::rpc::types::*;

/// Default bound on a single procedure call.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Pause between frames in [`RpcClient::save_images`].
const SAVE_FRAME_DELAY: Duration = Duration::from_millis(500);

/// A successful reply: the envelope header plus the decoded payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply<T> {
    pub message: String,
    pub simulation_mode: bool,
    pub data: T,
}

/// Client for one endpoint. Cheap to clone.
#[derive(Debug, Clone)]
pub struct RpcClient {
    http: reqwest::Client,
    rpc_url: Url,
    health_url: Url,
    next_id: Arc<AtomicU64>,
}

impl RpcClient {
    pub fn new(host: &str, port: u16) -> Result<Self, RpcError> {
        Self::with_timeout(host, port, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(host: &str, port: u16, timeout: Duration) -> Result<Self, RpcError> {
        let base = Url::parse(&format!("http://{host}:{port}/"))
            .map_err(|e| RpcError::InvalidAddress(format!("{host}:{port}: {e}")))?;
        let rpc_url = base
            .join("rpc")
            .map_err(|e| RpcError::InvalidAddress(e.to_string()))?;
        let health_url = base
            .join("health")
            .map_err(|e| RpcError::InvalidAddress(e.to_string()))?;

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Ok(Self {
            http,
            rpc_url,
            health_url,
            next_id: Arc::new(AtomicU64::new(1)),
        })
    }

    /// Endpoint URL of procedure calls.
    pub fn url(&self) -> &Url {
        &self.rpc_url
    }

    /// Call a procedure and return its raw envelope, successful or not.
    pub async fn invoke(&self, method: &str, params: Value) -> Result<Envelope, RpcError> {
        let request = RpcRequest {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method: method.to_string(),
            params,
        };
        let transport = |source| RpcError::Transport {
            method: method.to_string(),
            source,
        };

        let response = self
            .http
            .post(self.rpc_url.clone())
            .json(&request)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(transport)?;
        let response: RpcResponse = response.json().await.map_err(transport)?;

        if response.id != request.id {
            return Err(RpcError::InvalidResponse {
                method: method.to_string(),
                reason: format!("expected id {}, got {}", request.id, response.id),
            });
        }
        Ok(response.result)
    }

    /// Call a procedure, turning `success: false` into [`RpcError::Remote`].
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<Reply<T>, RpcError> {
        let envelope = self.invoke(method, params).await?;
        if !envelope.success {
            return Err(RpcError::Remote {
                method: method.to_string(),
                message: envelope.message,
            });
        }
        let data = serde_json::from_value(Value::Object(envelope.payload)).map_err(|e| {
            RpcError::InvalidResponse {
                method: method.to_string(),
                reason: e.to_string(),
            }
        })?;
        Ok(Reply {
            message: envelope.message,
            simulation_mode: envelope.simulation_mode,
            data,
        })
    }

    /// Check that the endpoint answers its health route.
    pub async fn ping(&self) -> Result<(), RpcError> {
        self.http
            .get(self.health_url.clone())
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map(|_| ())
            .map_err(|source| RpcError::Transport {
                method: "health".to_string(),
                source,
            })
    }

    pub async fn device_connect(
        &self,
        config: &DeviceConfiguration,
    ) -> Result<Reply<ConnectPayload>, RpcError> {
        self.call(DEVICE_CONNECT, config.to_value()).await
    }

    pub async fn device_start(&self) -> Result<Reply<Ack>, RpcError> {
        self.call(DEVICE_START, Value::Null).await
    }

    pub async fn device_stop(&self) -> Result<Reply<Ack>, RpcError> {
        self.call(DEVICE_STOP, Value::Null).await
    }

    pub async fn device_disconnect(&self) -> Result<Reply<Ack>, RpcError> {
        self.call(DEVICE_DISCONNECT, Value::Null).await
    }

    pub async fn get_capture(&self, timeout_ms: u64) -> Result<Reply<CaptureInfo>, RpcError> {
        self.call(GET_CAPTURE, json!({ "timeout_ms": timeout_ms }))
            .await
    }

    pub async fn get_color_image(
        &self,
        format: &str,
        quality: i64,
    ) -> Result<Reply<ImagePayload>, RpcError> {
        self.call(GET_COLOR_IMAGE, json!({ "format": format, "quality": quality }))
            .await
    }

    pub async fn get_depth_image(
        &self,
        format: &str,
        min_depth: u16,
        max_depth: u16,
    ) -> Result<Reply<ImagePayload>, RpcError> {
        self.call(
            GET_DEPTH_IMAGE,
            json!({ "format": format, "min_depth": min_depth, "max_depth": max_depth }),
        )
        .await
    }

    pub async fn get_device_info(&self) -> Result<Reply<DeviceInfo>, RpcError> {
        self.call(GET_DEVICE_INFO, Value::Null).await
    }

    pub async fn start_auto_capture(&self, interval_ms: u64) -> Result<Reply<Ack>, RpcError> {
        self.call(START_AUTO_CAPTURE, json!({ "interval_ms": interval_ms }))
            .await
    }

    pub async fn stop_auto_capture(&self) -> Result<Reply<Ack>, RpcError> {
        self.call(STOP_AUTO_CAPTURE, Value::Null).await
    }

    pub async fn list_methods(&self) -> Result<Vec<String>, RpcError> {
        let reply: Reply<MethodList> = self.call(LIST_METHODS, Value::Null).await?;
        Ok(reply.data.methods)
    }

    /// Connect with `config` and start streaming. Returns the device serial.
    pub async fn connect_and_start(
        &self,
        config: &DeviceConfiguration,
    ) -> Result<String, RpcError> {
        let connected = self.device_connect(config).await?;
        tracing::info!("{} (serial {})", connected.message, connected.data.serial);
        let started = self.device_start().await?;
        tracing::info!("{}", started.message);
        Ok(connected.data.serial)
    }

    /// Capture `count` frames, writing a JPEG colour image and a normalised
    /// depth PNG per frame into `dir`. Returns the number of frames saved.
    pub async fn save_images(&self, dir: &Path, count: usize) -> Result<usize, RpcError> {
        tokio::fs::create_dir_all(dir).await?;
        let mut saved = 0;

        for i in 1..=count {
            if let Err(e) = self.get_capture(2000).await {
                tracing::warn!("Capture {} failed: {}", i, e);
                continue;
            }

            let color = self.get_color_image("JPEG", 95).await?;
            tokio::fs::write(
                dir.join(format!("color_frame_{i:03}.jpg")),
                decode_image_data(&color.data)?,
            )
            .await?;

            let depth = self.get_depth_image("NORMALIZED", 0, 4000).await?;
            tokio::fs::write(
                dir.join(format!("depth_frame_{i:03}.png")),
                decode_image_data(&depth.data)?,
            )
            .await?;

            saved += 1;
            tracing::info!("Saved frame {}/{}", i, count);
            if i < count {
                tokio::time::sleep(SAVE_FRAME_DELAY).await;
            }
        }

        Ok(saved)
    }

    /// Stop and disconnect, logging failures instead of returning them.
    pub async fn cleanup(&self) {
        if let Err(e) = self.device_stop().await {
            tracing::debug!("Cleanup stop: {}", e);
        }
        match self.device_disconnect().await {
            Ok(_) => tracing::info!("Device disconnected"),
            Err(e) => tracing::warn!("Cleanup error: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls() {
        let client = RpcClient::new("localhost", 8123).unwrap();
        assert_eq!(client.url().as_str(), "http://localhost:8123/rpc");
        assert_eq!(client.health_url.as_str(), "http://localhost:8123/health");
    }

    #[test]
    fn test_invalid_host() {
        assert!(matches!(
            RpcClient::new("bad host", 80),
            Err(RpcError::InvalidAddress(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_is_transport_error() {
        // Port 9 on loopback is reserved (discard) and refused on test hosts.
        let client = RpcClient::with_timeout("127.0.0.1", 9, Duration::from_secs(2)).unwrap();
        let err = client.device_start().await.unwrap_err();
        assert!(err.is_transport());
        assert!(client.ping().await.is_err());
    }
}
