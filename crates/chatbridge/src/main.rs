//! chatbridge — reverse proxy and WebSocket relay for the chat gateway.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use chatbridge_core::config::BridgeConfig;
use chatbridge_server::{BridgeServer, ServerConfig};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Bridge between browser clients and the chat gateway.
#[derive(Debug, Parser)]
#[command(name = "chatbridge", version, about)]
struct Cli {
    /// Host to bind the bridge listener on.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to bind the bridge listener on.
    #[arg(long, default_value_t = 18790)]
    port: u16,

    /// Upstream gateway host (overrides config file).
    #[arg(long)]
    upstream_host: Option<String>,

    /// Upstream gateway port (overrides config file).
    #[arg(long)]
    upstream_port: Option<u16>,

    /// Fixed reconnect delay in milliseconds (overrides config file).
    #[arg(long)]
    reconnect_delay_ms: Option<u64>,

    /// Upstream handshake timeout in milliseconds (overrides config file).
    #[arg(long)]
    handshake_timeout_ms: Option<u64>,

    /// Directory of static UI files to serve at the root.
    #[arg(long)]
    ui_dir: Option<PathBuf>,

    /// Path to a JSON config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Emit logs as JSON.
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let mut bridge_config =
        BridgeConfig::load(cli.config.as_deref()).context("load bridge config")?;
    if let Some(host) = cli.upstream_host {
        bridge_config.upstream_host = host;
    }
    if let Some(port) = cli.upstream_port {
        bridge_config.upstream_port = port;
    }
    if let Some(delay) = cli.reconnect_delay_ms {
        bridge_config.reconnect_delay_ms = delay;
    }
    if let Some(timeout) = cli.handshake_timeout_ms {
        bridge_config.handshake_timeout_ms = timeout;
    }

    let server_config = ServerConfig {
        host: cli.host,
        port: cli.port,
        ui_dir: cli.ui_dir,
        ..ServerConfig::default()
    };

    let metrics_handle = chatbridge_server::metrics::install_recorder();
    let server =
        BridgeServer::new(server_config, bridge_config).with_metrics(metrics_handle);
    let (addr, serve_handle) = server.listen().await.context("bind listener")?;
    info!(%addr, "chatbridge ready");

    tokio::signal::ctrl_c().await.context("wait for ctrl-c")?;
    info!("shutdown signal received");
    server.shutdown(serve_handle, Duration::from_secs(10)).await;
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
