//! `depthcam client`: talk to an endpoint that is already running.

use std::path::PathBuf;

use clap::{Args, ValueEnum};

use crate::config::{ContainerSettings, DeviceConfiguration};
use crate::rpc::RpcClient;
use crate::rpc::images::format_device_info;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum ClientMode {
    /// Print the method list and device info
    #[default]
    Info,
    /// Connect, save frames, clean up
    Save,
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Endpoint host
    #[arg(long)]
    pub host: Option<String>,

    /// Endpoint port (default: 8000)
    #[arg(long)]
    pub port: Option<u16>,

    #[arg(long, value_enum, default_value_t = ClientMode::Info)]
    pub mode: ClientMode,

    /// Frames to save in `save` mode
    #[arg(long, default_value_t = 3)]
    pub count: usize,

    /// Directory for saved frames
    #[arg(long, default_value = "depthcam_frames")]
    pub output: PathBuf,
}

pub async fn run_client_command(
    args: ClientArgs,
    settings: ContainerSettings,
) -> anyhow::Result<()> {
    let host = args.host.unwrap_or(settings.host);
    let port = args.port.or(settings.port).unwrap_or(settings.base_port);
    let client = RpcClient::new(&host, port)?;
    tracing::debug!("Using endpoint {}", client.url());

    client.ping().await?;

    match args.mode {
        ClientMode::Info => {
            let methods = client.list_methods().await?;
            println!("Available methods: {}", methods.join(", "));
            let device = client.get_device_info().await?;
            println!("{}", format_device_info(&device.data, device.simulation_mode));
            Ok(())
        }
        ClientMode::Save => {
            let serial = client.connect_and_start(&DeviceConfiguration::default()).await?;
            println!("Streaming from device {}", serial);
            let saved = client.save_images(&args.output, args.count).await;
            client.cleanup().await;
            let saved = saved?;
            println!("Saved {}/{} frames to {}", saved, args.count, args.output.display());
            Ok(())
        }
    }
}
