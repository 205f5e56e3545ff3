// Appforge API server
// Serves the engine over HTTP until interrupted

use anyhow::Context;
use api_server::serve;
use appforge_engine::config::Config;
use appforge_engine::telemetry::init_telemetry_with_level;
use appforge_engine::Engine;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

/// Appforge HTTP API server
#[derive(Parser, Debug)]
#[command(name = "appforge-server")]
#[command(version, about, long_about = None)]
struct Args {
    /// Specify alternate configuration file
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Override the bind address from the configuration
    #[arg(long, value_name = "ADDR")]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load_or_create()?,
    };
    init_telemetry_with_level(&config.core.log_level);

    let bind = args.bind.unwrap_or_else(|| config.server.bind.clone());
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;

    let engine = Arc::new(Engine::bootstrap(config).await?);

    let served = serve(Arc::clone(&engine), listener, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
        }
    })
    .await;

    engine.shutdown().await?;
    served.context("API server failed")
}
