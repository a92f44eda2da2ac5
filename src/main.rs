//! MCP Auth Proxy
//!
//! Local reverse proxy that signs every forwarded request for an MCP upstream.
//!
//! # Architecture Overview
//!
//! ```text
//!                         ┌───────────────────────────────────────────────┐
//!                         │                MCP AUTH PROXY                 │
//!                         │                                               │
//!     Client Request      │  ┌──────────┐    ┌──────────────────────────┐ │
//!     ────────────────────┼─▶│  http    │───▶│ GET /mcp → event stream  │ │
//!                         │  │ dispatch │    │ GET /.well-known → 404   │ │
//!                         │  └────┬─────┘    └──────────────────────────┘ │
//!                         │       │                                       │
//!                         │       ▼                                       │
//!                         │  ┌──────────┐    ┌──────────┐    ┌──────────┐ │
//!                         │  │ forward  │───▶│  signer  │───▶│transport │─┼──▶ Upstream
//!                         │  └──────────┘    └──────────┘    └──────────┘ │
//!                         │                                               │
//!                         │  config · lifecycle · observability           │
//!                         └───────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;

use mcp_auth_proxy::config::load_config;
use mcp_auth_proxy::lifecycle::{wait_for_signal, Shutdown};
use mcp_auth_proxy::observability::{init_metrics, init_tracing};
use mcp_auth_proxy::HttpServer;

#[derive(Parser)]
#[command(name = "mcp-auth-proxy")]
#[command(about = "Signing reverse proxy for MCP upstreams", long_about = None)]
struct Cli {
    /// Optional TOML config file; MCP_* environment variables override it
    #[arg(short, long, env = "MCP_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;
    init_tracing(&config.observability)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind_address = %config.listener.bind_address,
        upstream = %config.upstream.url,
        request_timeout_secs = config.upstream.request_timeout_secs,
        read_timeout_secs = config.listener.read_timeout_secs,
        idle_timeout_secs = config.listener.idle_timeout_secs,
        session_header = config.auth.session_header()?.is_some(),
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        init_metrics(config.observability.metrics_address.parse()?)?;
    }

    let shutdown = Shutdown::new();
    let server = HttpServer::new(&config, shutdown.clone())?;

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let mut server_task = tokio::spawn(server.run(listener));

    tokio::select! {
        signal = wait_for_signal() => {
            match signal {
                Ok(signal) => tracing::info!(%signal, "Shutdown signal received"),
                Err(e) => tracing::error!(error = %e, "Signal handler failed; shutting down"),
            }
        }
        res = &mut server_task => {
            // Server exited on its own; nothing left to drain.
            res??;
            return Ok(());
        }
    }

    shutdown.trigger();

    let grace = Duration::from_secs(config.lifecycle.graceful_shutdown_secs);
    match tokio::time::timeout(grace, &mut server_task).await {
        Ok(res) => res??,
        Err(_) => {
            tracing::warn!(grace_secs = grace.as_secs(), "Graceful shutdown timed out; closing connections");
            server_task.abort();
        }
    }

    tracing::info!("Proxy stopped");
    Ok(())
}
