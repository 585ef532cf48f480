//! gpushare CLI
//!
//! Command-line interface for inspecting and exercising the gpushare daemon.

mod commands;

use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// gpusharectl - inspect the GPU sharing device plugin
#[derive(Parser, Debug)]
#[command(name = "gpusharectl")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Daemon API address
    #[arg(long, default_value = "http://localhost:9090", global = true)]
    api: String,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List devices and their health
    Devices,

    /// Show the published GPU topology
    Topology,

    /// Show daemon status
    Status,

    /// Send an allocation request for one container
    Allocate {
        /// Device ids to request
        #[arg(required = true)]
        device_ids: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    let client = commands::ApiClient::new(&cli.api);

    match cli.command {
        Commands::Devices => {
            commands::devices(&client).await?;
        }
        Commands::Topology => {
            commands::topology(&client).await?;
        }
        Commands::Status => {
            commands::status(&client).await?;
        }
        Commands::Allocate { device_ids } => {
            commands::allocate(&client, device_ids).await?;
        }
    }

    Ok(())
}
