//! Ditto mock server.
//!
//! Usage:
//!   ditto [--config ditto.yaml] [--port 1080] [--host 0.0.0.0]

use anyhow::Result;
use clap::Parser;
use ditto_http_mock::{Config, MockServer, MockServerContext};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Programmable HTTP mock server
#[derive(Parser, Debug)]
#[command(name = "ditto")]
#[command(author, version, about)]
struct Args {
    /// YAML configuration file
    #[arg(short, long, env = "DITTO_CONFIG")]
    config: Option<PathBuf>,

    /// Listen port (overrides the config file)
    #[arg(short, long, env = "DITTO_PORT")]
    port: Option<u16>,

    /// Listen host (overrides the config file)
    #[arg(long, env = "DITTO_HOST")]
    host: Option<String>,

    /// Log level used when RUST_LOG is unset
    #[arg(long, env = "DITTO_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Log output format: text, json
    #[arg(long, env = "DITTO_LOG_FORMAT", default_value = "text")]
    log_format: String,
}

fn init_tracing(level: &str, format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if format.eq_ignore_ascii_case("json") {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level, &args.log_format);

    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if let Some(port) = args.port {
        config.listen.port = port;
    }
    if let Some(host) = args.host {
        config.listen.host = host;
    }

    let context = Arc::new(MockServerContext::new(config)?);
    let server = MockServer::bind(context).await?.spawn();
    info!("Control plane available at http://{}/mockserver/", server.local_addr());

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");
    server.shutdown().await;
    Ok(())
}
