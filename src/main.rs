//! Blob portal API server.
//!
//! SIGTERM/SIGINT stop accepting connections and give in-flight requests
//! `server.shutdown_timeout` seconds to finish.

use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

use blob_portal::blobs::{BlobService, TransferSettings};
use blob_portal::config::{Config, LoggingConfig};
use blob_portal::retry::RetryPolicy;
use blob_portal::storage::azure::AzureBlobStore;
use blob_portal::storage::backend::BlobStore;
use blob_portal::storage::memory::MemoryBlobStore;

/// Command-line arguments for the blob portal server.
#[derive(Parser, Debug)]
#[command(
    name = "blob-portal",
    version,
    about = "JSON/streaming API over an Azure Blob Storage container"
)]
struct Cli {
    /// Path to the YAML configuration file; defaults plus environment when omitted.
    #[arg(short, long)]
    config: Option<String>,

    /// Override the bind address (host:port).
    #[arg(short, long)]
    bind: Option<String>,
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn build_store(config: &Config) -> anyhow::Result<Arc<dyn BlobStore>> {
    match config.storage.backend.as_str() {
        "memory" => {
            info!("In-memory blob store initialized");
            Ok(Arc::new(MemoryBlobStore::new()))
        }
        _ => {
            let retry = RetryPolicy::from_config(&config.http);
            let store = AzureBlobStore::from_config(&config.storage.azure, retry)?;
            Ok(Arc::new(store))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => blob_portal::config::load_config(path)?,
        None => blob_portal::config::config_from_env()?,
    };

    init_tracing(&config.logging);
    match &cli.config {
        Some(path) => info!("Configuration loaded from {}", path),
        None => info!("No configuration file given, using defaults and environment"),
    }

    let bind_addr = cli
        .bind
        .unwrap_or_else(|| format!("{}:{}", config.server.host, config.server.port));

    if config.observability.metrics {
        blob_portal::metrics::init_metrics()?;
        blob_portal::metrics::describe_metrics();
        info!("Prometheus metrics initialized");
    }

    let store = build_store(&config)?;
    let blobs = BlobService::new(store, TransferSettings::from_config(&config));

    if config.auth.enabled {
        info!("Bearer-token auth enabled ({} tokens)", config.auth.tokens.len());
    } else {
        warn!("Auth disabled: the blob API is open to every caller");
    }

    let shutdown_timeout = Duration::from_secs(config.server.shutdown_timeout);
    let state = Arc::new(blob_portal::AppState { config, blobs });
    let app = blob_portal::server::app(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Blob portal listening on {}", bind_addr);

    let server = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .into_future();
    tokio::select! {
        result = server => result?,
        _ = async {
            shutdown_signal().await;
            tokio::time::sleep(shutdown_timeout).await;
        } => {
            warn!("In-flight requests did not finish within {:?}, exiting", shutdown_timeout);
        }
    }

    info!("Blob portal shut down");

    Ok(())
}

/// Wait for SIGTERM or SIGINT (Ctrl+C), then return to trigger graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT, shutting down");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down");
        },
    }
}
