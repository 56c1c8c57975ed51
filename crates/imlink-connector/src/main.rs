//! imlink-connector: runs a connector node against one or more transfer nodes.
//!
//! Connects to every configured transfer, waits for each greet to be
//! acknowledged, then keeps the links alive until SIGINT/SIGTERM.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use imlink_connector::{
    CliOverrides, Connector, ConnectorConfig, ConnectorServices, LoggingServices,
};
use imlink_core::{RandomTokenGenerator, SnowflakeIdGenerator};

/// Connector node of the imlink cluster
#[derive(Parser, Debug)]
#[command(name = "imlink-connector", version, about = "Connector node for the imlink transfer link")]
struct Cli {
    /// Transfer address (host:port); repeat for several transfers
    #[arg(short, long = "transfer")]
    transfer: Vec<String>,

    /// Config file path
    #[arg(long, default_value = "~/.imlink/connector.toml")]
    config: String,

    /// Milliseconds to wait for the transfer to acknowledge the greet
    #[arg(long)]
    sync_timeout_ms: Option<u64>,

    /// Seconds between reconnect attempts (0 disables reconnecting)
    #[arg(long)]
    reconnect_delay: Option<u64>,

    /// Snowflake worker id (0-31)
    #[arg(long)]
    worker_id: Option<u64>,

    /// Snowflake datacenter id (0-31)
    #[arg(long)]
    datacenter_id: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    use tracing_subscriber::EnvFilter;
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting imlink-connector");

    if let Err(e) = run(cli).await {
        error!("connector failed: {e:#}");
        std::process::exit(1);
    }

    info!("imlink-connector stopped");
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config_path = PathBuf::from(&cli.config);
    let config = ConnectorConfig::load(
        Some(&config_path),
        CliOverrides {
            transfer_urls: cli.transfer,
            sync_timeout_ms: cli.sync_timeout_ms,
            reconnect_delay_secs: cli.reconnect_delay,
            worker_id: cli.worker_id,
            datacenter_id: cli.datacenter_id,
        },
    )
    .context("failed to load config")?;

    let ids = SnowflakeIdGenerator::new(config.worker_id, config.datacenter_id)
        .context("invalid id generator placement")?;
    let services = Arc::new(LoggingServices);
    let connector = Connector::new(
        ConnectorServices {
            messaging: services.clone(),
            presence: services,
            ids: Arc::new(ids),
            tokens: Arc::new(RandomTokenGenerator),
        },
        config.settings(),
    )
    .context("failed to build connector")?;

    let supervisors = connector
        .start(&config.transfer_urls)
        .await
        .context("failed to connect to transfer")?;

    info!(
        connector_id = %connector.connector_id(),
        transfers = config.transfer_urls.len(),
        "imlink-connector ready"
    );

    shutdown_signal().await;
    info!("received shutdown signal");
    for s in &supervisors {
        s.abort();
    }
    for s in supervisors {
        let _ = s.await;
    }
    Ok(())
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
