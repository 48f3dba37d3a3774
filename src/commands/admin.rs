use anyhow::{Context, Result};
use std::path::PathBuf;

use cloudperf::config::Config;
use cloudperf::engine::Engine;
use cloudperf::scheduler::RefreshOutcome;
use cloudperf::storage::SqliteStore;

/// Run one range refresh cycle and report what was enqueued
pub async fn refresh(config: Config) -> Result<()> {
    let engine = Engine::from_config(&config)
        .await
        .context("Failed to initialize engine")?;

    let outcome = engine.refresh().await.context("Range refresh failed")?;
    match &outcome {
        RefreshOutcome::Skipped { depth } => {
            println!("Skipped: {depth} jobs already queued");
        }
        RefreshOutcome::Enqueued { ranges, batch } => {
            println!("Ranges refreshed: {ranges}");
            println!("  Jobs enqueued: {}", batch.succeeded.len());
            if !batch.failed.is_empty() {
                println!("  Jobs failed:   {}", batch.failed.len());
                for failure in &batch.failed {
                    println!("    #{}: {}", failure.id, failure.error);
                }
            }
        }
    }

    Ok(())
}

/// Print the coordination state
pub async fn status(config: Config, json: bool) -> Result<()> {
    let engine = Engine::from_config(&config)
        .await
        .context("Failed to initialize engine")?;
    let status = engine.status().await.context("Failed to read status")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("Coordination status");
    println!("{:-<40}", "");
    println!(
        "Pingable (stable/new/loss): {}/{}/{}",
        status.pingable.stable, status.pingable.new, status.pingable.loss
    );
    println!("Cities with pingable IPs:   {}", status.cities_with_pingable);
    println!(
        "Ranges ready/outdated:      {}/{}",
        status.ranges.ready, status.ranges.outdated
    );
    println!("Queue depth ({}):  {}", status.queue_backend, status.queue_depth);
    println!("City pairs with statistics: {}", status.statistics_pairs);

    Ok(())
}

/// Create the SQLite schema
pub fn init_db(config: Config, path: Option<PathBuf>) -> Result<()> {
    let path = path.unwrap_or(config.database.sqlite_path);
    if path.as_os_str().is_empty() {
        anyhow::bail!("No SQLite path configured");
    }

    SqliteStore::open(&path)
        .with_context(|| format!("Failed to initialize database at {}", path.display()))?;
    println!("Database ready at {}", path.display());
    Ok(())
}
