//! `depthcam run`: launch the endpoint container and exercise the camera.

use std::path::{Path, PathBuf};

use clap::Args;

use crate::combined::{CombinedSession, SessionOptions};
use crate::config::{ContainerSettings, DeviceConfiguration};
use crate::container::StrategyMode;
use crate::rpc::images::format_device_info;

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Endpoint host
    #[arg(long)]
    pub host: Option<String>,

    /// Endpoint port (default: first free port from 8000)
    #[arg(long)]
    pub port: Option<u16>,

    /// Seconds to wait for the endpoint to become reachable
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Execution strategy
    #[arg(long, value_enum)]
    pub strategy: Option<StrategyMode>,

    /// Image to launch instead of the strategy default
    #[arg(long)]
    pub image: Option<String>,

    /// Connect to an endpoint that is already running instead of launching one
    #[arg(long)]
    pub no_auto_start: bool,

    /// Fail instead of building a missing image
    #[arg(long)]
    pub no_auto_build: bool,

    /// Build the image and exit
    #[arg(long)]
    pub build_only: bool,

    /// Frames to save
    #[arg(long, default_value_t = 3)]
    pub frames: usize,

    /// Directory for saved frames
    #[arg(long, default_value = "depthcam_frames")]
    pub output: PathBuf,
}

impl Default for RunArgs {
    fn default() -> Self {
        Self {
            host: None,
            port: None,
            timeout: None,
            strategy: None,
            image: None,
            no_auto_start: false,
            no_auto_build: false,
            build_only: false,
            frames: 3,
            output: PathBuf::from("depthcam_frames"),
        }
    }
}

impl RunArgs {
    /// Lay the flags over environment settings.
    pub fn apply(&self, settings: &mut ContainerSettings) {
        if let Some(host) = &self.host {
            settings.host = host.clone();
        }
        if let Some(port) = self.port {
            settings.port = Some(port);
        }
        if let Some(timeout) = self.timeout {
            settings.startup_timeout_secs = timeout;
        }
        if let Some(strategy) = self.strategy {
            settings.strategy = strategy;
        }
        if let Some(image) = &self.image {
            settings.image = Some(image.clone());
        }
        if self.no_auto_build {
            settings.auto_build = false;
        }
    }
}

/// Run the facade: container up, connect, save frames, tear down.
///
/// Ctrl-C or SIGTERM at any point ends the run. Startup and builds are
/// abandoned mid-way, and a container that was already launched is stopped
/// as the session is dropped.
pub async fn run_facade_command(
    args: RunArgs,
    mut settings: ContainerSettings,
) -> anyhow::Result<()> {
    args.apply(&mut settings);
    let mut options = SessionOptions::from_settings(&settings);
    options.auto_start = !args.no_auto_start && !args.build_only;

    let shutdown = super::shutdown_signal();
    tokio::pin!(shutdown);

    let mut session = tokio::select! {
        opened = CombinedSession::open(options) => opened?,
        _ = &mut shutdown => {
            tracing::info!("Interrupted during startup");
            return Ok(());
        }
    };

    if args.build_only {
        let built = tokio::select! {
            built = session.build_image() => Some(built),
            _ = &mut shutdown => None,
        };
        session.close().await;
        match built {
            Some(built) => println!("Built image '{}'", built?),
            None => tracing::info!("Interrupted, build abandoned"),
        }
        return Ok(());
    }

    let outcome = tokio::select! {
        result = exercise(&session, &args.output, args.frames) => result,
        _ = &mut shutdown => {
            tracing::info!("Interrupted, shutting down");
            Ok(())
        }
    };

    session.cleanup().await;
    session.close().await;
    outcome
}

async fn exercise(session: &CombinedSession, output: &Path, frames: usize) -> anyhow::Result<()> {
    let info = session.server_info();
    println!(
        "Endpoint: {}:{} (strategy: {}, container: {})",
        info.host,
        info.port,
        info.strategy
            .map(|s| s.to_string())
            .unwrap_or_else(|| info.strategy_mode.to_string()),
        info.container_id.as_deref().unwrap_or("none"),
    );

    session.ping().await?;
    let methods = session.list_methods().await?;
    println!("Available methods: {}", methods.join(", "));

    let serial = session.connect_and_start(&DeviceConfiguration::default()).await?;
    println!("Streaming from device {}", serial);

    let device = session.get_device_info().await?;
    println!("{}", format_device_info(&device.data, device.simulation_mode));

    let saved = session.save_images(output, frames).await?;
    println!("Saved {}/{} frames to {}", saved, frames, output.display());
    Ok(())
}
