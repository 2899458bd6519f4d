//! rotation-proxy
//!
//! A reverse proxy that spreads requests over a pool of worker nodes in
//! weighted round-robin order, giving a node its turn back only when its
//! previous transaction has completed.
//!
//! # Architecture Overview
//!
//! ```text
//!                        ┌──────────────────────────────────────────────┐
//!     Client Request     │  ┌─────────┐   ┌──────────┐   ┌───────────┐  │
//!     ───────────────────┼─▶│   net   │──▶│   http   │──▶│ scheduler │  │
//!                        │  │listener │   │ dispatch │   │ rotation  │  │
//!                        │  └─────────┘   └────┬─────┘   └───────────┘  │
//!     Client Response    │                     │ forward                 │
//!     ◀──────────────────┼─────────────────────┴──────────────────────┼──── Node
//!                        │                                              │
//!     Operator           │  ┌─────────┐   ┌──────────┐   ┌───────────┐  │
//!     ───────────────────┼─▶│  admin  │   │  config  │   │ rebalance │  │
//!                        │  │ control │   │ watcher  │   │  (15 min) │  │
//!                        │  └─────────┘   └──────────┘   └───────────┘  │
//!                        └──────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use clap::Parser;

use rotation_proxy::config::validation::validate_config;
use rotation_proxy::config::{load_config, ConfigError, ProxyConfig};
use rotation_proxy::lifecycle::{spawn_signal_handler, Proxy, Shutdown};
use rotation_proxy::observability::logging::init_logging;

#[derive(Parser, Debug)]
#[command(name = "rotation-proxy", version)]
#[command(about = "Weighted round-robin reverse proxy", long_about = None)]
struct Args {
    /// TOML configuration file; watched for node list changes.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Data path listener: a port or `ip:port`.
    #[arg(long)]
    data: Option<String>,

    /// Control listener: a port or `ip:port`.
    #[arg(long)]
    ctrl: Option<String>,

    /// Serve plain HTTP even when TLS is configured.
    #[arg(long)]
    http: bool,

    /// Enable debug logging output.
    #[arg(short, long)]
    debug: bool,
}

fn listen_address(value: &str) -> String {
    match value.parse::<u16>() {
        Ok(port) => format!("0.0.0.0:{port}"),
        Err(_) => value.to_string(),
    }
}

fn apply_overrides(config: &mut ProxyConfig, args: &Args) {
    if let Some(data) = &args.data {
        config.data.bind_address = listen_address(data);
    }
    if let Some(ctrl) = &args.ctrl {
        config.control.bind_address = listen_address(ctrl);
    }
    if args.http {
        config.data.tls = None;
        config.control.tls = None;
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };
    apply_overrides(&mut config, &args);
    validate_config(&config).map_err(ConfigError::Validation)?;

    init_logging(&config.observability.log_level, args.debug);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "rotation-proxy starting");
    tracing::info!(
        data = %config.data.bind_address,
        control = %config.control.bind_address,
        control_enabled = config.control.enabled,
        path = %config.data.path,
        nodes = config.nodes.len(),
        "Configuration loaded"
    );

    let shutdown = Shutdown::new();
    spawn_signal_handler(shutdown.clone());

    let proxy = Proxy::bind(config, args.config.clone()).await?;
    proxy.run(shutdown).await?;
    Ok(())
}
