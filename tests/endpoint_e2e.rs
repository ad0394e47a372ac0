//! End-to-end tests of the RPC endpoint over HTTP.
//!
//! Each test serves a fresh endpoint on an ephemeral loopback port and talks
//! to it with the real [`RpcClient`].

use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::{Value, json};

use depthcam_rpc::device::{DeviceSession, DriverFactory};
use depthcam_rpc::error::RpcError;
use depthcam_rpc::rpc::images::{DecodedImage, decode_image};
use depthcam_rpc::rpc::types::METHODS;
use depthcam_rpc::testing::{STUB_HEIGHT, STUB_WIDTH, StubDriverFactory, TestEndpoint};

fn camera_config() -> Value {
    json!({
        "color_resolution": "720P",
        "depth_mode": "NFOV_UNBINNED",
        "camera_fps": 30,
        "synchronized_images_only": true,
    })
}

#[tokio::test]
async fn connect_start_twice_and_capture_before_start() {
    let server = TestEndpoint::start().await.unwrap();
    let client = server.client();
    client.ping().await.unwrap();

    // Capture on a fresh session fails cleanly.
    let early = client.invoke("get_capture", json!({ "timeout_ms": 1000 })).await.unwrap();
    assert!(!early.success);
    assert!(early.message.to_lowercase().contains("not started"));

    let connected = client.invoke("device_connect", camera_config()).await.unwrap();
    assert!(connected.success, "{}", connected.message);
    assert!(connected.simulation_mode);

    let started = client.invoke("device_start", Value::Null).await.unwrap();
    assert!(started.success, "{}", started.message);

    let again = client.invoke("device_start", Value::Null).await.unwrap();
    assert!(!again.success);

    server.stop().await;
}

#[tokio::test]
async fn invalid_configuration_names_field() {
    let server = TestEndpoint::start().await.unwrap();
    let client = server.client();

    let mut config = camera_config();
    config["depth_mode"] = json!("ULTRA");
    let envelope = client.invoke("device_connect", config).await.unwrap();
    assert!(!envelope.success);
    assert!(envelope.message.contains("depth_mode"));

    // The failed connect left the session disconnected.
    let info = client.get_device_info().await.unwrap();
    assert!(!info.data.connected);
}

#[tokio::test]
async fn typed_client_round_trip() {
    let server = TestEndpoint::start().await.unwrap();
    let client = server.client();

    let mut methods = client.list_methods().await.unwrap();
    methods.sort();
    let mut expected: Vec<String> = METHODS.iter().map(|m| m.to_string()).collect();
    expected.sort();
    assert_eq!(methods, expected);

    let serial = client
        .connect_and_start(&Default::default())
        .await
        .unwrap();
    assert_eq!(serial, depthcam_rpc::device::SIMULATED_SERIAL);

    let capture = client.get_capture(1000).await.unwrap();
    assert_eq!(capture.data.color_shape, Some(vec![720, 1280, 4]));
    assert!(capture.simulation_mode);

    let color = client.get_color_image("RGB", 95).await.unwrap();
    match decode_image(&color.data).unwrap() {
        DecodedImage::U8 { shape, data } => {
            assert_eq!(shape, vec![720, 1280, 3]);
            // Simulated BGRA fill [100, 150, 200] arrives as RGB [200, 150, 100].
            assert_eq!(&data[..3], &[200, 150, 100]);
        }
        other => panic!("unexpected decode: {other:?}"),
    }

    let depth = client.get_depth_image("RAW", 1000, 2000).await.unwrap();
    let range = depth.data.depth_range.unwrap();
    assert!(range[0] >= 1000 && range[1] <= 2000);
    match decode_image(&depth.data).unwrap() {
        DecodedImage::U16 { data, .. } => {
            assert!(data.iter().all(|d| (1000..=2000).contains(d)));
        }
        other => panic!("unexpected decode: {other:?}"),
    }

    let err = client.get_color_image("TIFF", 95).await.unwrap_err();
    assert!(matches!(err, RpcError::Remote { .. }));

    client.cleanup().await;
    let info = client.get_device_info().await.unwrap();
    assert!(!info.data.connected);
}

#[tokio::test]
async fn auto_capture_over_rpc() {
    let server = TestEndpoint::start().await.unwrap();
    let client = server.client();

    let not_started = client.start_auto_capture(10).await.unwrap_err();
    assert!(matches!(not_started, RpcError::Remote { .. }));

    client.connect_and_start(&Default::default()).await.unwrap();
    client.start_auto_capture(10).await.unwrap();
    assert!(client.get_device_info().await.unwrap().data.auto_capture);

    // Frames appear without explicit get_capture calls.
    let mut ready = false;
    for _ in 0..100 {
        if client.get_depth_image("NORMALIZED", 0, 4000).await.is_ok() {
            ready = true;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert!(ready, "auto capture never produced a frame");

    client.stop_auto_capture().await.unwrap();
    assert!(!client.get_device_info().await.unwrap().data.auto_capture);
}

#[tokio::test]
async fn save_images_writes_files() {
    let server = TestEndpoint::start().await.unwrap();
    let client = server.client();
    let dir = tempfile::tempdir().unwrap();

    client.connect_and_start(&Default::default()).await.unwrap();
    let saved = client.save_images(dir.path(), 1).await.unwrap();
    assert_eq!(saved, 1);

    let color = std::fs::read(dir.path().join("color_frame_001.jpg")).unwrap();
    assert_eq!(&color[..2], &[0xFF, 0xD8]);
    let depth = std::fs::read(dir.path().join("depth_frame_001.png")).unwrap();
    assert_eq!(&depth[..4], &[0x89, b'P', b'N', b'G']);
}

#[tokio::test]
async fn hardware_driver_is_not_flagged_simulated() {
    let factory = Arc::new(StubDriverFactory::new("STUB0001"));
    let driver_factory: Arc<dyn DriverFactory> = factory.clone();
    let server = TestEndpoint::with_session(DeviceSession::new(Some(driver_factory)))
        .await
        .unwrap();
    let client = server.client();

    let serial = client.connect_and_start(&Default::default()).await.unwrap();
    assert_eq!(serial, "STUB0001");

    let capture = client.get_capture(500).await.unwrap();
    assert!(!capture.simulation_mode);
    assert_eq!(capture.data.depth_shape, Some(vec![STUB_HEIGHT, STUB_WIDTH]));
    assert_eq!(capture.data.ir_shape, None);
    assert_eq!(factory.capture_calls(), 1);

    server.stop().await;
    // Shutdown released the device.
    assert_eq!(factory.stop_calls(), 1);
}

#[tokio::test]
async fn stopped_endpoint_is_a_transport_error() {
    let server = TestEndpoint::start().await.unwrap();
    let client = server.client();
    server.stop().await;

    let err = client.device_start().await.unwrap_err();
    assert!(err.is_transport());
}
