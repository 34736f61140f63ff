//! Warden - MCP server for bulk changes against a security manager
//!
//! This binary runs as an MCP server using stdio transport.
//!
//! # Configuration
//!
//! Set the following environment variables (or use a `.env` file):
//!
//! - `WARDEN_MANAGER_URL`: Base URL of the manager (e.g. `https://dsm.example.com:4119`)
//! - `WARDEN_API_SECRET`: API secret key
//! - `WARDEN_API_VERSION`: Optional, defaults to `v1`
//! - `WARDEN_TIMEOUT_SECS`: Optional, defaults to 30
//!
//! # Usage
//!
//! ```bash
//! WARDEN_MANAGER_URL=https://dsm.example.com:4119 WARDEN_API_SECRET=xxx ./warden
//! ```

use anyhow::{Context, Result};
use rmcp::{transport::stdio, ServiceExt};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, EnvFilter};

use warden::{config, manager_client, server};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (ignore errors if not found)
    dotenvy::dotenv().ok();

    // Log to stderr: stdout is reserved for MCP JSON-RPC messages
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warden=info")),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    tracing::info!("Starting Warden MCP server v{}", env!("CARGO_PKG_VERSION"));

    let config = config::Config::from_env().context("Failed to load configuration")?;

    tracing::debug!(base_url = %config.base_url, api_version = %config.api_version, "Configuration loaded");

    let client =
        manager_client::ManagerClient::new(&config).context("Failed to create manager client")?;

    tracing::info!("Testing connection to the manager...");
    if let Err(e) = client.test_connection().await {
        tracing::error!(error = %e, "Connection test failed");
        // Keep going: the manager may come up later
        tracing::warn!(
            "Server will start but may not be able to reach the manager. \
             Check configuration and network connectivity."
        );
    }

    let shutdown = CancellationToken::new();
    let server = server::WardenServer::new(client, shutdown.clone());

    tracing::info!("Server initialized, starting stdio transport");

    let service = server
        .serve(stdio())
        .await
        .inspect_err(|e| {
            tracing::error!("serving error: {:?}", e);
        })
        .context("Failed to start server")?;

    tracing::info!("Server running, waiting for requests");

    // Ends on stdin close, Ctrl-C or SIGTERM; running batches are cancelled
    server::serve_until_shutdown(service.waiting(), server::shutdown_signal(), &shutdown)
        .await
        .context("Server error during operation")?;

    tracing::info!("Server shutting down");

    Ok(())
}
