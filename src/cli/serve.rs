//! `depthcam serve`: the endpoint process.

use std::sync::Arc;

use anyhow::Context;
use clap::Args;

use crate::config::EndpointSettings;
use crate::device::DeviceSession;
use crate::rpc::{RpcEndpoint, serve};

#[derive(Args, Debug, Clone, Default)]
pub struct ServeArgs {
    /// Bind host (default: localhost)
    #[arg(long)]
    pub host: Option<String>,

    /// Bind port (default: 8000)
    #[arg(long)]
    pub port: Option<u16>,
}

/// Serve one device session until Ctrl-C or SIGTERM.
pub async fn run_serve_command(args: ServeArgs, settings: EndpointSettings) -> anyhow::Result<()> {
    let host = args.host.clone().unwrap_or_else(|| settings.host.clone());
    let port = args.port.unwrap_or(settings.port);
    let endpoint = Arc::new(simulated_endpoint(&settings));

    let listener = tokio::net::TcpListener::bind((host.as_str(), port))
        .await
        .with_context(|| format!("failed to bind {host}:{port}"))?;

    serve(endpoint, listener, super::shutdown_signal())
        .await
        .context("endpoint server error")?;
    tracing::info!("Endpoint stopped");
    Ok(())
}

/// No hardware driver ships with this binary, so the endpoint always serves
/// the simulated camera.
fn simulated_endpoint(settings: &EndpointSettings) -> RpcEndpoint {
    tracing::warn!("No hardware driver installed, serving simulated frames");
    RpcEndpoint::new(DeviceSession::simulated()).with_capture_timeout(settings.capture_timeout)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_serves_simulated_session_with_configured_timeout() {
        let settings = EndpointSettings {
            capture_timeout: Duration::from_millis(250),
            ..Default::default()
        };
        let endpoint = simulated_endpoint(&settings);
        assert!(endpoint.session().simulation_mode());
        assert_eq!(endpoint.capture_timeout(), Duration::from_millis(250));
    }
}
