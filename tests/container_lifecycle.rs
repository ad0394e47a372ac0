//! Container lifecycle tests against an in-memory container runtime.
//!
//! No daemon is involved: image, container and daemon calls go to a
//! [`FakeRuntime`], build scripts and host checks go through a
//! [`ScriptedRunner`], and "reachability" is a plain loopback listener.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio::net::TcpListener;

use depthcam_rpc::container::{
    ContainerError, ContainerLifecycleController, ControllerConfig, ControllerState, Strategy,
    StrategyMode,
};
use depthcam_rpc::testing::{FakeRuntime, Scripted, ScriptedRunner};

const CONTAINER_ID: &str = "4be1c0ffee5e1f2a3b4c5d6e7f";
const SOFTWARE_IMAGE: &str = "azure-kinect-mesa-vpn";
const ACCELERATED_IMAGE: &str = "azure-kinect-prebuilt-vpn";

fn config(port: u16) -> ControllerConfig {
    ControllerConfig {
        host: "127.0.0.1".to_string(),
        port,
        startup_timeout: Duration::from_millis(300),
        poll_interval: Duration::from_millis(20),
        connect_timeout: Duration::from_millis(100),
        restart_delay: Duration::from_millis(10),
        ..Default::default()
    }
}

/// Daemon up, both images present, launches hand out `CONTAINER_ID` first.
fn healthy_runtime() -> FakeRuntime {
    FakeRuntime::new()
        .with_image(SOFTWARE_IMAGE)
        .with_image(ACCELERATED_IMAGE)
        .launch_ids([CONTAINER_ID])
}

/// Host checks; `gpu` decides whether the toolkit is on PATH.
fn host(gpu: bool) -> ScriptedRunner {
    let which = if gpu {
        Scripted::stdout("/usr/bin/nvidia-container-runtime\n")
    } else {
        Scripted::exit(1, "")
    };
    ScriptedRunner::new().on("which nvidia-container-runtime", which)
}

fn controller(
    config: ControllerConfig,
    runtime: &Arc<FakeRuntime>,
    runner: ScriptedRunner,
) -> ContainerLifecycleController {
    ContainerLifecycleController::with_backends(config, runtime.clone(), Arc::new(runner))
}

async fn listener() -> (TcpListener, u16) {
    let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

#[tokio::test]
async fn start_reaches_running_and_records_handle() {
    let (_listener, port) = listener().await;
    let runtime = Arc::new(healthy_runtime());
    let mut ctl = controller(config(port), &runtime, host(false));

    let handle = ctl.start().await.unwrap();
    assert_eq!(handle.container_id, CONTAINER_ID);
    assert_eq!(ctl.state(), ControllerState::Running);
    assert_eq!(ctl.strategy(), Some(Strategy::Software));

    let launches = runtime.launches();
    assert_eq!(launches.len(), 1);
    assert_eq!(launches[0].image_name, SOFTWARE_IMAGE);
    assert_eq!(launches[0].port, port);
    assert!(!launches[0].uses_gpu_runtime());

    // Starting again reuses the running container.
    ctl.start().await.unwrap();
    assert_eq!(runtime.count_matching("launch"), 1);

    ctl.stop().await;
}

#[tokio::test]
async fn accelerated_runtime_requires_gpu_at_launch() {
    let (_listener, port) = listener().await;

    // Toolkit on PATH: GPU runtime requested.
    let runtime = Arc::new(healthy_runtime());
    let mut ctl = controller(config(port), &runtime, host(true));
    ctl.start().await.unwrap();
    let launch = &runtime.launches()[0];
    assert!(launch.uses_gpu_runtime());
    assert_eq!(launch.image_name, ACCELERATED_IMAGE);
    ctl.stop().await;

    // Forced accelerated without the toolkit: accelerated image, no GPU runtime.
    let runtime = Arc::new(healthy_runtime());
    let forced = ControllerConfig {
        strategy: StrategyMode::Accelerated,
        ..config(port)
    };
    let mut ctl = controller(forced, &runtime, host(false));
    ctl.start().await.unwrap();
    assert_eq!(ctl.strategy(), Some(Strategy::Accelerated));
    assert!(!runtime.launches()[0].uses_gpu_runtime());
    ctl.stop().await;

    // Toolkit registered with the daemon only: still counts.
    let runtime = Arc::new(healthy_runtime().with_gpu_runtime());
    let mut ctl = controller(config(port), &runtime, host(false));
    ctl.start().await.unwrap();
    assert!(runtime.launches()[0].uses_gpu_runtime());
    ctl.stop().await;

    // Forced software with the toolkit: never the GPU runtime.
    let runtime = Arc::new(healthy_runtime());
    let software = ControllerConfig {
        strategy: StrategyMode::Software,
        ..config(port)
    };
    let mut ctl = controller(software, &runtime, host(true));
    ctl.start().await.unwrap();
    assert!(!runtime.launches()[0].uses_gpu_runtime());
    ctl.stop().await;
}

#[tokio::test]
async fn stop_is_idempotent() {
    let (_listener, port) = listener().await;
    let runtime = Arc::new(healthy_runtime());
    let mut ctl = controller(config(port), &runtime, host(false));
    ctl.start().await.unwrap();

    ctl.stop().await;
    ctl.stop().await;
    assert_eq!(ctl.state(), ControllerState::Stopped);
    assert_eq!(runtime.count_matching("stop"), 1);
    assert_eq!(runtime.count_matching("kill"), 0);
}

#[tokio::test]
async fn hung_stop_escalates_to_kill() {
    let (_listener, port) = listener().await;
    let runtime = Arc::new(healthy_runtime().hanging_stop());
    let mut ctl = controller(config(port), &runtime, host(false));
    ctl.start().await.unwrap();

    ctl.stop().await;
    assert_eq!(runtime.count_matching("stop"), 1);
    assert_eq!(runtime.count_matching(&format!("kill {CONTAINER_ID}")), 1);
    assert!(runtime.running().is_empty());
    assert!(ctl.handle().is_none());
}

#[tokio::test]
async fn runtime_missing_is_a_hard_failure() {
    let runtime = Arc::new(FakeRuntime::new().unavailable("connection refused"));
    let mut ctl = controller(config(1), &runtime, host(false));

    let err = ctl.start().await.unwrap_err();
    assert!(matches!(err, ContainerError::RuntimeMissing { .. }));
    assert!(err.to_string().contains("Install Docker"));
    assert_eq!(runtime.count_matching("launch"), 0);
}

#[tokio::test]
async fn missing_image_without_auto_build_names_build_command() {
    let runtime = Arc::new(FakeRuntime::new());
    let no_build = ControllerConfig {
        auto_build: false,
        ..config(1)
    };
    let mut ctl = controller(no_build, &runtime, host(false));

    let err = ctl.start().await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "Image 'azure-kinect-mesa-vpn' not found and auto-build is disabled. \
         Build it with: ./build-mesa-vpn.sh"
    );
}

#[tokio::test]
async fn build_failure_surfaces_build_output() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("build-mesa-vpn.sh"), "#!/bin/sh\nexit 1\n").unwrap();
    let script = dir.path().join("build-mesa-vpn.sh").display().to_string();

    let runtime = Arc::new(FakeRuntime::new());
    let runner = Arc::new(host(false).on(
        script.clone(),
        Scripted::exit(2, "E: Unable to locate package libk4a1.4\n"),
    ));
    let with_dir = ControllerConfig {
        build_dir: Some(dir.path().to_path_buf()),
        ..config(1)
    };
    let mut ctl =
        ContainerLifecycleController::with_backends(with_dir, runtime.clone(), runner.clone());

    let err = ctl.start().await.unwrap_err();
    match err {
        ContainerError::BuildFailed { image, output } => {
            assert_eq!(image, SOFTWARE_IMAGE);
            assert_eq!(output, "E: Unable to locate package libk4a1.4");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(runner.count_matching(&script), 1);
    assert_eq!(runtime.count_matching("launch"), 0);
}

#[tokio::test]
async fn build_only_runs_script_without_launch() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("build-prebuilt-vpn.sh"), "#!/bin/sh\n").unwrap();

    let runtime = Arc::new(FakeRuntime::new());
    let accelerated = ControllerConfig {
        strategy: StrategyMode::Accelerated,
        build_dir: Some(dir.path().to_path_buf()),
        ..config(1)
    };
    let mut ctl = controller(accelerated, &runtime, ScriptedRunner::new());

    assert_eq!(ctl.build_image().await.unwrap(), ACCELERATED_IMAGE);
    assert_eq!(ctl.state(), ControllerState::ImageReady);
    assert_eq!(runtime.count_matching("launch"), 0);
}

#[tokio::test]
async fn unreachable_endpoint_times_out_and_stops_container() {
    // Bind then drop to get a port nobody listens on.
    let (listener, port) = listener().await;
    drop(listener);

    let runtime = Arc::new(healthy_runtime());
    let mut ctl = controller(config(port), &runtime, host(false));

    let err = ctl.start().await.unwrap_err();
    match &err {
        ContainerError::ReachabilityTimeout { timeout, .. } => {
            assert_eq!(*timeout, Duration::from_millis(300));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.to_string().contains("300ms"));
    assert!(ctl.handle().is_none());
    assert_eq!(runtime.count_matching("stop"), 1);
    assert!(runtime.running().is_empty());
}

#[tokio::test]
async fn exited_container_fails_fast() {
    let (listener, port) = listener().await;
    drop(listener);

    let runtime = Arc::new(healthy_runtime().exiting_containers());
    let patient = ControllerConfig {
        startup_timeout: Duration::from_secs(30),
        ..config(port)
    };
    let mut ctl = controller(patient, &runtime, host(false));

    let started = std::time::Instant::now();
    let err = ctl.start().await.unwrap_err();
    assert!(matches!(err, ContainerError::ContainerExited { .. }));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn restart_launches_a_fresh_container() {
    let (_listener, port) = listener().await;
    let runtime = Arc::new(healthy_runtime());
    let mut ctl = controller(config(port), &runtime, host(false));

    ctl.start().await.unwrap();
    let fresh = ctl.restart().await.unwrap();

    assert_eq!(ctl.state(), ControllerState::Running);
    assert_ne!(fresh.container_id, CONTAINER_ID);
    assert_eq!(runtime.count_matching(&format!("stop {CONTAINER_ID}")), 1);
    assert_eq!(runtime.count_matching("launch"), 2);
    assert_eq!(runtime.count_matching("version"), 2);
    assert_eq!(runtime.running(), vec![fresh.container_id.clone()]);

    let info = ctl.server_info();
    assert!(info.using_container);
    assert_eq!(info.toolkit_available, Some(false));
    ctl.stop().await;
}

#[test]
fn dropping_a_running_controller_stops_its_container() {
    let tokio_rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let runtime = Arc::new(healthy_runtime());

    tokio_rt.block_on(async {
        let (_listener, port) = listener().await;
        let mut ctl = controller(config(port), &runtime, host(false));
        ctl.start().await.unwrap();
        drop(ctl);
    });

    assert_eq!(runtime.count_matching("stop"), 1);
    assert!(runtime.running().is_empty());
}
