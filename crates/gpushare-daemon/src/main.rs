//! gpushare daemon
//!
//! Node-local device plugin process: discovers the node's GPUs, publishes
//! their topology, watches their health and serves allocation requests.

mod backend;

use anyhow::Context;
use clap::Parser;
use gpushare_allocator::AllocationCoordinator;
use gpushare_api::{create_router, AppState};
use gpushare_core::{DaemonConfig, LoggingConfig};
use gpushare_device::{compute_topology, DeviceInventory};
use gpushare_health::{DeviceRegistry, HealthWatcher};
use gpushare_store::publish_topology;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// gpushare daemon - GPU sharing device plugin
#[derive(Parser, Debug)]
#[command(name = "gpushared")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Name of the node this plugin serves
    #[arg(long, env = "NODE_NAME")]
    node_name: Option<String>,

    /// Address to bind the API server
    #[arg(long)]
    address: Option<String>,

    /// Port for the REST API server
    #[arg(long)]
    port: Option<u16>,

    /// Log level
    #[arg(long)]
    log_level: Option<String>,

    /// Disable health checks ("all" or "xids")
    #[arg(long, env = "DP_DISABLE_HEALTHCHECKS")]
    disable_health_checks: Option<String>,
}

impl Args {
    /// Configuration file (or defaults) with command line overrides applied
    fn load_config(&self) -> anyhow::Result<DaemonConfig> {
        let mut config = match &self.config {
            Some(path) => DaemonConfig::from_file(path)
                .with_context(|| format!("Failed to load {}", path.display()))?,
            None => DaemonConfig::default(),
        };

        if let Some(node_name) = &self.node_name {
            config.node.node_name = node_name.clone();
        }
        if let Some(address) = &self.address {
            config.api.address = address.clone();
        }
        if let Some(port) = self.port {
            config.api.port = port;
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if let Some(disabled) = &self.disable_health_checks {
            config.health.disabled = disabled.clone();
        }

        config.validate()?;
        Ok(config)
    }
}

fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let result = if config.format.eq_ignore_ascii_case("json") {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|e| anyhow::anyhow!("Failed to set subscriber: {}", e))
}

async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown requested");
    token.cancel();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = args.load_config()?;
    init_logging(&config.logging)?;

    info!("Starting gpushare daemon v{}", env!("CARGO_PKG_VERSION"));

    let context = config.node_context();
    let devices = backend::open_devices(&config.devices)?;
    let stores = backend::open_stores(&config.store)?;

    // Discovery and topology failures are fatal
    let inventory = Arc::new(
        DeviceInventory::enumerate(devices.source.as_ref()).context("Device discovery failed")?,
    );
    info!(
        backend = devices.source.name(),
        devices = inventory.len(),
        "Discovered GPUs"
    );

    let topology = compute_topology(inventory.devices(), devices.probe.as_ref())
        .context("Topology discovery failed")?;
    if let Err(e) = publish_topology(stores.nodes.as_ref(), &context.node_name, &topology).await {
        warn!(node = %context.node_name, error = %e, "Failed to publish GPU topology");
    }

    let token = CancellationToken::new();
    let registry = Arc::new(DeviceRegistry::from_inventory(&inventory));
    let health = HealthWatcher::new(config.health.clone(), registry.clone())
        .start(devices.events, token.clone());

    let coordinator = Arc::new(AllocationCoordinator::new(
        inventory.clone(),
        stores.workloads.clone(),
        context.clone(),
        config.store.retry_policy(),
    ));

    let router = create_router(AppState {
        coordinator,
        registry,
        topology: topology.to_annotation_map(),
        node: context,
        shutdown: token.clone(),
    });

    let addr: SocketAddr = format!("{}:{}", config.api.address, config.api.port)
        .parse()
        .context("Invalid address")?;

    info!("API server listening on {}", addr);

    tokio::spawn(shutdown_signal(token.clone()));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, router)
        .with_graceful_shutdown(token.clone().cancelled_owned())
        .await
        .context("Server error")?;

    token.cancel();
    if let Some(health) = health {
        health.join().await;
    }

    info!("gpushare daemon stopped");
    Ok(())
}
