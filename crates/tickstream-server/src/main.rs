//! tickstream server entry point.
//!
//! Loads the JSON configuration (defaults when no file is given), wires the
//! core pipeline and runs until interrupted. Log verbosity is controlled via
//! `RUST_LOG` (default `info`).

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tickstream_server::{Config, MarketDataCore};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "tickstream-server", about = "Market-data feed handler and replay server")]
struct Args {
    /// Path to a JSON config file; defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => {
            let config = Config::load(path)?;
            info!(path = %path.display(), "loaded configuration");
            config
        }
        None => {
            info!("no config file given, using defaults");
            Config::default()
        }
    };

    let pubsub_port = config.network.pubsub_port;
    let data_dir = config.storage.dir.clone();

    let core = Arc::new(MarketDataCore::new(config));
    core.start();

    info!(port = pubsub_port, "pub-sub listening");
    info!(dir = %data_dir.display(), "recording to");
    info!("press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    core.stop();
    Ok(())
}
