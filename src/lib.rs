//! cloudperf - job coordination and latency statistics for fping agents
//!
//! A fleet of unattended agents polls the coordinator for work, runs `fping`
//! locally and posts the raw output back with its next poll. The coordinator
//! decides which addresses are worth probing, keeps discovery work flowing
//! without flooding the queue, and folds latency samples into per city pair
//! percentile statistics.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`liveness`] - Fixed-width sliding window of reachability observations
//! - [`tracker`] - Per-address liveness over the pingable store
//! - [`scheduler`] - Backpressure-aware refresh of stale address ranges
//! - [`queue`] - Discovery job queue (in-process or Redis list)
//! - [`pending`] - Per source city pending latency jobs
//! - [`protocol`] - Long-poll protocol: result ingestion and job dispatch
//! - [`stats`] - Percentiles, sample aggregation and cross-city rollups
//! - [`storage`] - Catalog, pingable and statistics repositories (SQLite, memory)
//! - [`engine`] - Wiring of all components from [`config::Config`]
//! - [`coordinator`] - HTTP server
//!
//! # Example
//!
//! ```no_run
//! use cloudperf::config::Config;
//! use cloudperf::engine::Engine;
//! use cloudperf::protocol::AgentRequest;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let engine = Engine::from_config(&config).await?;
//!     let response = engine
//!         .handle_poll(&AgentRequest::get("fping-watchmen/1.0", None))
//!         .await;
//!     println!("{} jobs, next poll in {}s", response.job.len(), response.interval);
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod liveness;
pub mod metrics;
pub mod models;
pub mod pending;
pub mod protocol;
pub mod queue;
pub mod scheduler;
pub mod stats;
pub mod storage;
pub mod tracker;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::engine::{Engine, SystemStatus};
    pub use crate::error::{CloudperfErrorTrait, Error, ErrorCategory, Result};
    pub use crate::liveness::{LivenessBand, LivenessWindow};
    pub use crate::models::{CityId, IpRange, JobMessage, PingableRecord, StatisticsRow};
    pub use crate::protocol::{AgentProtocol, AgentRequest, AgentRole, JobId, PollResponse};
    pub use crate::queue::{BatchPushResult, JobQueue};
    pub use crate::scheduler::{RangeScheduler, RefreshOutcome, RefreshPolicy};
    pub use crate::tracker::PingableTracker;
}

// Direct re-exports for convenience
pub use engine::Engine;
pub use error::{Error, Result};
