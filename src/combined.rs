//! Container plus client in one scoped session.
//!
//! [`CombinedSession::open`] picks a port, brings the endpoint container up
//! and attaches an [`RpcClient`] to it. The container is stopped by
//! [`CombinedSession::close`], or by the controller's `Drop` on any other
//! exit path, including an `open` future dropped before it completes.

use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::config::ContainerSettings;
use crate::container::{
    CommandRunner, ContainerError, ContainerHandle, ContainerLifecycleController,
    ContainerRuntime, ControllerConfig, DockerRuntime, ServerInfo, TokioCommandRunner,
    find_available_port,
};
use crate::error::RpcError;
use crate::rpc::{DEFAULT_REQUEST_TIMEOUT, RpcClient};

/// Errors opening or driving a [`CombinedSession`].
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Container(#[from] ContainerError),

    #[error(transparent)]
    Rpc(#[from] RpcError),
}

/// How a [`CombinedSession`] is opened.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Controller settings; `port` is replaced by the selected port.
    pub container: ControllerConfig,
    /// Fixed port. `None` scans upward from `base_port`.
    pub port: Option<u16>,
    pub base_port: u16,
    /// Launch the container during `open`.
    pub auto_start: bool,
    /// Bound on each procedure call.
    pub request_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            container: ControllerConfig::default(),
            port: None,
            base_port: 8000,
            auto_start: true,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl SessionOptions {
    pub fn from_settings(settings: &ContainerSettings) -> Self {
        let port = settings.port.unwrap_or(settings.base_port);
        Self {
            container: settings.to_controller_config(port),
            port: settings.port,
            base_port: settings.base_port,
            ..Default::default()
        }
    }
}

/// A running endpoint container and a client attached to it.
///
/// Derefs to [`RpcClient`], so procedures can be called directly on the
/// session.
#[derive(Debug)]
pub struct CombinedSession {
    controller: ContainerLifecycleController,
    client: RpcClient,
    request_timeout: Duration,
}

impl CombinedSession {
    pub async fn open(options: SessionOptions) -> Result<Self, SessionError> {
        Self::open_with_backends(options, Arc::new(DockerRuntime), Arc::new(TokioCommandRunner))
            .await
    }

    pub async fn open_with_backends(
        options: SessionOptions,
        runtime: Arc<dyn ContainerRuntime>,
        runner: Arc<dyn CommandRunner>,
    ) -> Result<Self, SessionError> {
        let mut config = options.container;
        config.port = match options.port {
            Some(port) => port,
            None => find_available_port(&config.host, options.base_port)?,
        };
        let host = config.host.clone();
        let port = config.port;
        tracing::info!("Endpoint address {}:{}", host, port);

        let mut controller = ContainerLifecycleController::with_backends(config, runtime, runner);
        if options.auto_start {
            controller.start().await?;
        }

        match RpcClient::with_timeout(&host, port, options.request_timeout) {
            Ok(client) => Ok(Self {
                controller,
                client,
                request_timeout: options.request_timeout,
            }),
            Err(e) => {
                controller.stop().await;
                Err(e.into())
            }
        }
    }

    pub fn client(&self) -> &RpcClient {
        &self.client
    }

    pub fn controller(&self) -> &ContainerLifecycleController {
        &self.controller
    }

    pub fn port(&self) -> u16 {
        self.controller.config().port
    }

    pub fn server_info(&self) -> ServerInfo {
        self.controller.server_info()
    }

    /// Start the container if `open` was told not to.
    pub async fn start_server(&mut self) -> Result<ContainerHandle, SessionError> {
        Ok(self.controller.start().await?)
    }

    /// Restart the container and attach a fresh client.
    pub async fn restart_server(&mut self) -> Result<ContainerHandle, SessionError> {
        let handle = self.controller.restart().await?;
        let config = self.controller.config();
        self.client = RpcClient::with_timeout(&config.host, config.port, self.request_timeout)?;
        Ok(handle)
    }

    /// Build the image for the resolved strategy without launching it.
    pub async fn build_image(&mut self) -> Result<String, SessionError> {
        Ok(self.controller.build_image().await?)
    }

    /// Stop the container. Errors are logged, never returned.
    pub async fn close(mut self) {
        self.controller.stop().await;
    }
}

impl Deref for CombinedSession {
    type Target = RpcClient;

    fn deref(&self) -> &RpcClient {
        &self.client
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ControllerState;
    use crate::testing::{FakeRuntime, Scripted, ScriptedRunner};

    fn no_gpu() -> Arc<ScriptedRunner> {
        Arc::new(ScriptedRunner::new().on("which", Scripted::exit(1, "")))
    }

    fn software_runtime() -> Arc<FakeRuntime> {
        Arc::new(
            FakeRuntime::new()
                .with_image("azure-kinect-mesa-vpn")
                .launch_ids(["c0ffee0123456789abcdef"]),
        )
    }

    fn options(port: u16, auto_start: bool) -> SessionOptions {
        SessionOptions {
            container: ControllerConfig {
                host: "127.0.0.1".to_string(),
                poll_interval: Duration::from_millis(10),
                ..Default::default()
            },
            port: Some(port),
            auto_start,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_open_without_auto_start() {
        let runtime = Arc::new(FakeRuntime::new());
        let runner = Arc::new(ScriptedRunner::new());
        let opts = options(8123, false);
        let session = CombinedSession::open_with_backends(opts, runtime.clone(), runner.clone())
            .await
            .unwrap();
        assert_eq!(session.port(), 8123);
        assert_eq!(session.url().as_str(), "http://127.0.0.1:8123/rpc");

        let info = session.server_info();
        assert!(!info.using_container);
        assert_eq!(info.state, ControllerState::Idle);
        session.close().await;
        assert!(runtime.calls().is_empty());
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_open_starts_and_close_stops() {
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let runtime = software_runtime();

        let opts = options(port, true);
        let session = CombinedSession::open_with_backends(opts, runtime.clone(), no_gpu())
            .await
            .unwrap();
        let info = session.server_info();
        assert!(info.using_container);
        assert_eq!(info.state, ControllerState::Running);
        assert_eq!(info.container_id.as_deref(), Some("c0ffee0123456789abcdef"));

        session.close().await;
        assert_eq!(runtime.count_matching("stop c0ffee"), 1);
        assert!(runtime.running().is_empty());
    }

    #[tokio::test]
    async fn test_drop_stops_container() {
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let runtime = software_runtime();

        let opts = options(port, true);
        let session = CombinedSession::open_with_backends(opts, runtime.clone(), no_gpu())
            .await
            .unwrap();
        drop(session);
        assert_eq!(runtime.count_matching("stop"), 1);
    }

    #[tokio::test]
    async fn test_abandoned_open_stops_launched_container() {
        // Nothing listens here, so `open` sits in the reachability poll.
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let runtime = software_runtime();
        let mut opts = options(port, true);
        opts.container.startup_timeout = Duration::from_secs(60);

        let opening = CombinedSession::open_with_backends(opts, runtime.clone(), no_gpu());
        let outcome = tokio::time::timeout(Duration::from_millis(300), opening).await;
        assert!(outcome.is_err(), "open should still be waiting");

        assert_eq!(runtime.count_matching("launch"), 1);
        assert_eq!(runtime.count_matching("stop c0ffee"), 1);
        assert!(runtime.running().is_empty());
    }

    #[tokio::test]
    async fn test_failed_start_leaves_nothing_running() {
        let runtime = Arc::new(FakeRuntime::new());
        let mut opts = options(8124, true);
        opts.container.auto_build = false;

        let err = CombinedSession::open_with_backends(opts, runtime.clone(), no_gpu())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::Container(ContainerError::ImageMissing { .. })
        ));
        assert_eq!(runtime.count_matching("launch"), 0);
        assert_eq!(runtime.count_matching("stop"), 0);
    }

    #[test]
    fn test_options_from_settings() {
        let settings = ContainerSettings {
            port: Some(8200),
            ..Default::default()
        };
        let options = SessionOptions::from_settings(&settings);
        assert_eq!(options.port, Some(8200));
        assert_eq!(options.container.port, 8200);
        assert!(options.auto_start);
    }
}
