//! recorderd binary - serves recorder sessions over ZMQ

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use recconf::RecConfig;
use recorderd::{Server, ServerConfig, Services, SoftEngineFactory};
use tracing::info;

/// Recorder daemon
#[derive(Parser, Debug)]
#[command(name = "recorderd")]
#[command(about = "Recorder daemon serving per-client recorder sessions over ZMQ")]
#[command(version)]
struct Args {
    /// Config file (replaces ./recorderd.toml in the search order)
    #[arg(short, long, env = "RECORDERD_CONFIG")]
    config: Option<PathBuf>,

    /// ZMQ endpoint to bind, overriding config
    #[arg(short, long)]
    endpoint: Option<String>,

    /// Log filter, overriding config (RUST_LOG still wins)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Interval of generated silent audio frames in milliseconds (0 = off)
    #[arg(long, default_value = "20")]
    frame_ms: u64,

    /// Print the effective configuration and exit
    #[arg(long)]
    show_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let (mut config, sources) = RecConfig::load_with_sources_from(args.config.as_deref())
        .context("failed to load configuration")?;
    if let Some(endpoint) = args.endpoint {
        config.bind.endpoint = endpoint;
    }
    if let Some(level) = args.log_level {
        config.telemetry.log_level = level;
    }

    if args.show_config {
        print!("{}", config.to_toml());
        return Ok(());
    }

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.telemetry.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("recorderd {} starting", env!("CARGO_PKG_VERSION"));
    for file in &sources.files {
        info!("  config: {}", file.display());
    }
    for var in &sources.env_overrides {
        info!("  env override: {}", var);
    }
    info!("  endpoint: {}", config.endpoint());
    info!("  buffers: {}", config.paths.buffer_dir.display());

    let mut factory = SoftEngineFactory::new();
    if args.frame_ms > 0 {
        factory = factory.with_audio_generator(Duration::from_millis(args.frame_ms));
    }
    let services = Services::from_config(&config, Arc::new(factory));

    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel::<()>(1);
    let shutdown_tx_signal = shutdown_tx.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("received shutdown signal");
        let _ = shutdown_tx_signal.send(());
    });

    let server = Server::new(ServerConfig::from_config(&config), services);
    server.run(shutdown_rx).await?;

    info!("recorderd shutdown complete");
    Ok(())
}
