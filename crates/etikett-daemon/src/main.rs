// SPDX-License-Identifier: Apache-2.0
//
// etikettd — embedded IPP label print daemon.
//
// Entry point. Initialises logging, loads configuration, starts the
// print service, and runs until interrupted.
//
// Usage: `etikettd [config.json]`.  Without an argument the daemon
// starts with defaults: port 8631, in-memory store, no printers (they
// can still be listed once configured; an empty registry answers every
// request with not-found).

mod service;

use tracing::{error, info};

use etikett_core::config::DaemonConfig;
use etikett_core::error::Result;

use service::PrintService;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => {
            info!(path = %path, "loading configuration");
            DaemonConfig::load(&path)?
        }
        None => {
            info!("no configuration file given, using defaults");
            DaemonConfig::default()
        }
    };

    info!(
        port = config.server_port,
        printers = config.printers.len(),
        "etikettd starting"
    );

    let service = PrintService::start(config).await?;

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
    }
    info!("shutdown signal received");

    service.shutdown().await
}
