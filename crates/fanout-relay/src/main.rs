//! # fanout-relay
//!
//! Broadcast relay server binary: loads configuration, installs logging and
//! metrics, and serves the WebSocket hub until ctrl-c.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use fanout_core::logging::{DEFAULT_LEVEL, init_subscriber};
use fanout_server::config::{OverflowPolicy, ServerConfig};
use fanout_server::metrics::install_recorder;
use fanout_server::server::FanoutServer;

/// WebSocket broadcast relay.
#[derive(Parser, Debug)]
#[command(name = "fanout-relay", about = "WebSocket broadcast relay")]
struct Cli {
    /// JSON config file (missing file means defaults).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind.
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,

    /// Upgrade endpoint path.
    #[arg(long)]
    ws_path: Option<String>,

    /// Directory served for non-API paths.
    #[arg(long)]
    static_dir: Option<PathBuf>,

    /// Bound the broadcast queue (unbounded when omitted).
    #[arg(long)]
    queue_capacity: Option<usize>,

    /// Drop new envelopes instead of waiting when the queue is full.
    #[arg(long)]
    drop_when_full: bool,

    /// Keep client-supplied `sender` fields instead of stamping the connection id.
    #[arg(long)]
    keep_sender: bool,

    /// Disable the Prometheus `/metrics` endpoint.
    #[arg(long)]
    no_metrics: bool,

    /// Log filter when `RUST_LOG` is unset.
    #[arg(long, default_value = DEFAULT_LEVEL)]
    log_level: String,
}

impl Cli {
    /// Apply flags given on the command line over the loaded config.
    fn apply(&self, config: &mut ServerConfig) {
        if let Some(host) = &self.host {
            config.host.clone_from(host);
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(path) = &self.ws_path {
            config.ws_path.clone_from(path);
        }
        if let Some(dir) = &self.static_dir {
            config.static_dir = Some(dir.clone());
        }
        if let Some(cap) = self.queue_capacity {
            config.queue_capacity = Some(cap);
        }
        if self.drop_when_full {
            config.overflow_policy = OverflowPolicy::DropNewest;
        }
        if self.keep_sender {
            config.stamp_sender = false;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_subscriber(&cli.log_level);

    let mut config =
        ServerConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    cli.apply(&mut config);

    let metrics = if cli.no_metrics {
        None
    } else {
        Some(install_recorder().context("Failed to install metrics recorder")?)
    };

    let server = FanoutServer::new(config, metrics).context("Invalid configuration")?;
    let (addr, handle) = server.listen().await.context("Failed to start server")?;
    tracing::info!(
        %addr,
        ws_path = %server.config().ws_path,
        "relay ready"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    let outcome = server.stop(handle).await;
    if !outcome.queue_drained {
        tracing::warn!("broadcast queue was not fully drained");
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
