use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cloudperf::config::Config;

mod commands;

#[derive(Parser)]
#[command(
    name = "cloudperf",
    version,
    about = "Job coordinator and latency statistics engine for fping agents",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML); environment variables are used when absent
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json)
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the agent poll endpoint and the status API
    Serve {
        /// Host to bind
        #[arg(long)]
        host: Option<String>,

        /// Port to bind
        #[arg(short, long)]
        port: Option<u16>,

        /// Disable CORS headers
        #[arg(long, default_value = "false")]
        no_cors: bool,

        /// Disable per-request logging
        #[arg(long, default_value = "false")]
        no_request_logging: bool,
    },

    /// Run a single stale range refresh cycle
    Refresh,

    /// Show liveness, range, queue and statistics counts
    Status {
        /// Print as JSON
        #[arg(long, default_value = "false")]
        json: bool,
    },

    /// Create the SQLite schema
    InitDb {
        /// Database path (defaults to the configured path)
        #[arg(short, long)]
        path: Option<PathBuf>,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;

    // Initialize tracing/logging
    let log_format = cli
        .log_format
        .clone()
        .unwrap_or_else(|| config.logging.format.clone());
    setup_tracing(&log_format, &config.logging.level, cli.verbose)?;

    tracing::info!("cloudperf starting");

    match cli.command {
        Commands::Serve {
            host,
            port,
            no_cors,
            no_request_logging,
        } => {
            tracing::info!(
                host = ?host,
                port = ?port,
                cors = !no_cors,
                "Starting serve command"
            );
            commands::coordinator_server(
                config,
                commands::ServeParams {
                    host,
                    port,
                    disable_cors: no_cors,
                    disable_request_logging: no_request_logging,
                },
            )
            .await?;
        }

        Commands::Refresh => {
            tracing::info!("Starting refresh command");
            commands::refresh(config).await?;
        }

        Commands::Status { json } => {
            commands::status(config, json).await?;
        }

        Commands::InitDb { path } => {
            tracing::info!(path = ?path, "Starting init-db command");
            commands::init_db(config, path)?;
        }
    }

    tracing::info!("cloudperf completed successfully");
    Ok(())
}

fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("cloudperf=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("cloudperf={level},warn")))
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}
