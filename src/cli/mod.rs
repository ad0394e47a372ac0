//! CLI command handling.
//!
//! Provides subcommands for:
//! - Launching the endpoint container and exercising the camera (`run`)
//! - Serving the endpoint inside the container (`serve`)
//! - Talking to an endpoint that is already running (`client`)

mod client;
mod run;
mod serve;

pub use client::{ClientArgs, ClientMode, run_client_command};
pub use run::{RunArgs, run_facade_command};
pub use serve::{ServeArgs, run_serve_command};

use clap::{ColorChoice, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "depthcam")]
#[command(about = "Remote access to a depth camera through a containerized RPC endpoint")]
#[command(
    long_about = "depthcam launches the camera endpoint in a container and talks to it over RPC.\n\
        Examples:\n  \
        depthcam run --strategy software  # Launch and capture a few frames\n  \
        depthcam serve --host 0.0.0.0 --port 8000  # Endpoint process\n  \
        depthcam client --mode info  # Query a running endpoint"
)]
#[command(version)]
#[command(color = ColorChoice::Auto)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Verbose logging and full error chains
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Launch the endpoint container and capture frames (default)
    #[command(
        about = "Launch the endpoint and capture frames",
        long_about = "Selects a port, starts the endpoint container and saves a few frames.\n\
            Example: depthcam run --frames 5 --output ./frames"
    )]
    Run(RunArgs),

    /// Run the RPC endpoint (container entrypoint)
    #[command(
        about = "Serve the RPC endpoint",
        long_about = "Serves the camera over RPC until interrupted.\n\
            Example: depthcam serve --host 0.0.0.0 --port 8000"
    )]
    Serve(ServeArgs),

    /// Talk to an endpoint that is already running
    #[command(
        about = "Query a running endpoint",
        long_about = "Prints device info or saves frames from an existing endpoint.\n\
            Example: depthcam client --port 8001 --mode save --count 3"
    )]
    Client(ClientArgs),
}

impl Cli {
    /// The subcommand to run; `run` with its defaults when none was given.
    pub fn command_or_default(&self) -> Command {
        self.command
            .clone()
            .unwrap_or_else(|| Command::Run(RunArgs::default()))
    }
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_version() {
        let cmd = Cli::command();
        assert_eq!(
            cmd.get_version().unwrap_or("unknown"),
            env!("CARGO_PKG_VERSION")
        );
    }

    #[test]
    fn test_default_command_is_run() {
        let cli = Cli::try_parse_from(["depthcam"]).unwrap();
        assert!(matches!(cli.command_or_default(), Command::Run(_)));

        let cli = Cli::try_parse_from(["depthcam", "-v", "serve", "--port", "8100"]).unwrap();
        assert!(cli.verbose);
        match cli.command_or_default() {
            Command::Serve(args) => assert_eq!(args.port, Some(8100)),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_run_flags() {
        let cli = Cli::try_parse_from([
            "depthcam",
            "run",
            "--strategy",
            "software",
            "--no-auto-build",
            "--build-only",
            "--image",
            "custom",
        ])
        .unwrap();
        match cli.command_or_default() {
            Command::Run(args) => {
                assert_eq!(args.strategy, Some(crate::container::StrategyMode::Software));
                assert!(args.no_auto_build);
                assert!(args.build_only);
                assert_eq!(args.image.as_deref(), Some("custom"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_bad_strategy_is_rejected() {
        assert!(Cli::try_parse_from(["depthcam", "run", "--strategy", "gpu"]).is_err());
    }
}
