use std::path::Path;
use std::sync::Arc;

use authority::HttpAuthority;
use clap::Parser;
use observability::{LogCapture, LogRing};
use project_connector::shutdown::{shutdown_channel, wait_for_signal};
use project_connector::{Cli, Connector};

#[tokio::main]
async fn main() {
    let config = match Cli::parse().into_config() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    };

    let logs = match LogRing::open(Path::new(&config.logs.file), config.logs.capacity) {
        Ok(ring) => ring,
        Err(e) => {
            eprintln!("Failed to open log file {}: {}", config.logs.file, e);
            std::process::exit(1);
        }
    };
    let capture = LogCapture::new();
    observability::init_logging(&logs, &capture);
    tracing::info!(restored = logs.len(), "connector starting");

    let authority = match HttpAuthority::new(&config.authority.api_url, config.authority_timeout()) {
        Ok(a) => Arc::new(a),
        Err(e) => {
            tracing::error!("Failed to build authority client: {}", e);
            std::process::exit(1);
        }
    };

    let connector = match Connector::bind(config, authority, logs, capture).await {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("{}", e);
            std::process::exit(1);
        }
    };

    let (shutdown_tx, _shutdown_rx) = shutdown_channel();
    let signals = shutdown_tx.clone();
    tokio::spawn(async move {
        match wait_for_signal().await {
            Ok(()) => {
                tracing::info!("Shutdown signal received, stopping connector...");
                signals.trigger();
            }
            Err(e) => tracing::warn!("cannot listen for signals: {}", e),
        }
    });

    if let Err(e) = connector.run(shutdown_tx).await {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
    tracing::info!("Connector stopped.");
}
