//! Google Analytics MCP Server
//!
//! Exposes Google Analytics (Universal Analytics and GA4) hierarchy
//! browsing, metadata catalogs and reports over the Model Context Protocol.

mod api;
mod auth;
mod cache;
mod catalog;
mod column;
mod config;
mod datasource;
mod enumerator;
mod error;
mod fetcher;
mod frame;
mod model;
mod normalizer;
mod server;

use anyhow::Context;
use clap::Parser;
use rmcp::{transport::stdio, ServiceExt};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::datasource::Analytics;
use crate::server::AnalyticsServer;

#[derive(Parser, Debug)]
#[command(name = "ga-analytics-mcp")]
#[command(author, version, about = "Google Analytics MCP Server", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.json")]
    config: String,

    /// Enable debug logging (RUST_LOG takes precedence)
    #[arg(short, long)]
    debug: bool,
}

fn init_tracing(debug: bool) {
    let default = if debug {
        "info,ga_analytics_mcp=debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    // stdout carries the protocol
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = Config::load(&args.config)
        .with_context(|| format!("failed to load configuration from {}", args.config))?;
    init_tracing(args.debug || config.debug);

    tracing::info!(
        config = %args.config,
        version = ?config.version,
        static_token = config.uses_static_token(),
        "Google Analytics MCP Server starting"
    );

    let analytics = Analytics::new(&config).context("failed to initialise API clients")?;

    let shutdown = CancellationToken::new();
    let server = AnalyticsServer::new(analytics, shutdown.clone());

    tracing::debug!("starting MCP server on stdio transport");
    let service = server.serve(stdio()).await?;
    tracing::debug!("MCP server started, waiting for messages");

    let outcome = service.waiting().await;
    shutdown.cancel();
    outcome?;

    tracing::info!("MCP server shutting down");
    Ok(())
}
