//! muninnd: Muninn daemon.
//!
//! Serves the [`RequestGateway`](muninn::RequestGateway) over HTTP in front
//! of a local Ollama daemon.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use muninn::cache::SnapshotLoad;
use muninn::server::config::Config;
use muninn::server::router;

/// Muninn daemon: local LLM orchestration gateway.
#[derive(Parser)]
#[command(name = "muninnd")]
#[command(version = muninn::PKG_VERSION)]
#[command(about = "Muninn local LLM gateway daemon")]
struct Args {
    /// Path to configuration file.
    #[arg(short, long, env = "MUNINN_CONFIG")]
    config: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load configuration
    let config = Config::load(args.config.as_deref())?;

    // Initialise tracing (default from config; override with RUST_LOG).
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.server.log_level)),
        )
        .init();

    let (gateway, snapshot) = config.gateway_builder().build_with_snapshot()?;
    if let SnapshotLoad::CorruptIgnored(reason) = &snapshot {
        warn!(%reason, "starting with an empty response cache");
    }
    if config.transcription.enabled {
        warn!("no transcription engine is bundled; audio uploads get a placeholder transcript");
    }
    let gateway = Arc::new(gateway);

    // Startup probe: never fatal
    let probe_timeout = Duration::from_secs(config.backend.probe_timeout_secs);
    match tokio::time::timeout(probe_timeout, gateway.probe()).await {
        Ok(Ok(models)) => info!(
            backend = %config.backend.base_url,
            models = models.len(),
            "inference backend reachable"
        ),
        Ok(Err(e)) => warn!(backend = %config.backend.base_url, error = %e, "inference backend probe failed"),
        Err(_) => warn!(backend = %config.backend.base_url, "inference backend probe timed out"),
    }

    // Parse address
    let addr: SocketAddr = config
        .server
        .address
        .parse()
        .map_err(|e| muninn::MuninnError::Configuration(format!("Invalid address: {e}")))?;

    let listener = TcpListener::bind(addr).await?;
    info!(version = muninn::version_string(), %addr, "muninnd starting");

    axum::serve(listener, router(gateway.clone()))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
        })
        .await?;

    // Final unconditional snapshot
    match gateway.flush_cache() {
        Ok(entries) => info!(entries, "response cache saved"),
        Err(e) => warn!(error = %e, "failed to save response cache"),
    }

    Ok(())
}
