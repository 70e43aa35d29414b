// SPDX-License-Identifier: GPL-3.0-only
mod api;
mod catalog;
mod codec;
mod config;
mod downloader;
mod error;
mod events;
mod extractor;
mod logging;
mod pipeline;
mod release;
mod sync;
mod utils;

#[cfg(test)]
mod test_helpers;

use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

use api::HttpServer;
use config::Config;
use downloader::HttpClient;
use events::EventBus;
use extractor::ZipExtractor;
use logging::setup_logging;
use release::ReleaseService;
use sync::FtpTransport;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    setup_logging(&config.log_level, config.log_json)?;

    info!("Starting ReleaseBuilderDaemon v{}", env!("CARGO_PKG_VERSION"));

    tokio::fs::create_dir_all(&config.working_root).await?;
    info!(working_root = %config.working_root.display(), "Working directory ready");
    if !config.ftp.has_credentials() {
        warn!("No FTP credentials configured; pushes will be refused");
    }

    let events = EventBus::new();
    let http_addr = config.local_api_bind;
    let service = Arc::new(ReleaseService::new(
        config,
        events,
        Box::new(FtpTransport::new()),
        Arc::new(HttpClient::new()?),
        Arc::new(ZipExtractor::new()),
    ));

    // Start HTTP server, the console WebSocket is served on the same port
    let http_server = HttpServer::new(Arc::clone(&service), http_addr);
    let http_task = tokio::spawn(async move {
        if let Err(e) = http_server.serve().await {
            error!(error = %e, "HTTP server error");
        }
    });

    info!("All services started. Waiting for shutdown signal...");

    // Wait for shutdown signal
    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Received shutdown signal (Ctrl+C)");
        }
        Err(err) => {
            error!(error = %err, "Unable to listen for shutdown signal");
        }
    }

    info!("Initiating graceful shutdown...");
    http_task.abort();

    if let Err(e) = service.close_session().await {
        warn!(error = %e, "Failed to close FTP session");
    }

    info!("Shutdown complete");
    Ok(())
}
