//! depthcam - main entry point.

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use depthcam_rpc::{
    cli::{Cli, Command, run_client_command, run_facade_command, run_serve_command},
    config::Config,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "depthcam_rpc=debug,tower_http=debug"
    } else {
        "depthcam_rpc=info"
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    match run(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if cli.verbose {
                eprintln!("error: {e:?}");
            } else {
                eprintln!("error: {e}");
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli) -> anyhow::Result<()> {
    let config = Config::from_env()?;

    match cli.command_or_default() {
        Command::Run(args) => run_facade_command(args, config.container).await,
        Command::Serve(args) => run_serve_command(args, config.endpoint).await,
        Command::Client(args) => run_client_command(args, config.container).await,
    }
}
