use anyhow::{Context, Result};
use std::sync::Arc;

use cloudperf::config::Config;
use cloudperf::coordinator::{CoordinatorConfig, CoordinatorServer};
use cloudperf::engine::Engine;

// ============================================================================
// Coordinator Server Implementation
// ============================================================================

/// Command line overrides of the `[server]` config section
pub struct ServeParams {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub disable_cors: bool,
    pub disable_request_logging: bool,
}

/// Start the coordinator server
pub async fn coordinator_server(config: Config, params: ServeParams) -> Result<()> {
    let ServeParams {
        host,
        port,
        disable_cors,
        disable_request_logging,
    } = params;

    let mut server_config = config.server.clone();
    if host.is_some() || port.is_some() {
        let current: std::net::SocketAddr = server_config
            .bind_address
            .parse()
            .context("Invalid bind address in configuration")?;
        let host = host.unwrap_or_else(|| current.ip().to_string());
        let port = port.unwrap_or(current.port());
        server_config.bind_address = format!("{host}:{port}");
    }
    if disable_cors {
        server_config.enable_cors = false;
    }
    if disable_request_logging {
        server_config.enable_request_logging = false;
    }

    let coordinator_config = CoordinatorConfig::from_server_config(&server_config)?;

    if let Err(e) = cloudperf::metrics::init_metrics() {
        tracing::warn!(error = %e, "Metrics initialization failed, continuing without metrics");
    }

    let engine = Arc::new(
        Engine::from_config(&config)
            .await
            .context("Failed to initialize engine")?,
    );

    let server = CoordinatorServer::new(coordinator_config.clone(), engine)
        .context("Failed to create coordinator server")?;

    println!("{}", server.info().display());
    println!();
    println!("Endpoints:");
    println!("  GET|POST /job             - Agent poll (results in, jobs out)");
    println!("  GET  /api/health          - Health check");
    println!("  GET  /api/status          - Liveness, range and queue counts");
    println!("  GET  /api/performance     - Cross-city latency rollup (?src=1,2&dist=3)");
    println!("  POST /api/pending         - Queue latency jobs for a source city");
    println!("  GET  /metrics             - Prometheus metrics endpoint");
    println!();
    println!(
        "Coordinator server listening on http://{}",
        coordinator_config.bind_address
    );
    println!("Press Ctrl+C to stop.\n");

    // Start with graceful shutdown
    server
        .start_with_shutdown(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::info!("Shutdown signal received");
                }
                Err(e) => {
                    tracing::error!("Failed to wait for Ctrl+C: {}", e);
                }
            }
        })
        .await?;

    println!("Coordinator server stopped.");
    Ok(())
}
