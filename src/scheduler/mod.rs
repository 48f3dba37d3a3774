//! Stale range refresh
//!
//! [`RangeScheduler::refresh`] turns catalog ranges whose recheck timestamp is
//! older than `max_age` into discovery jobs. Each cycle:
//!
//! 1. reads the queue depth and stops if the backlog already holds
//!    `max_buffered_jobs` items (no catalog query, no enqueue)
//! 2. selects up to `select_limit` stale ranges, oldest first
//! 3. per range: decays the liveness of its addresses, splits it into
//!    subnets of at most `subnet_step` addresses, advances its timestamp
//! 4. enqueues every subnet as one [`JobMessage`] through `push_batch`
//!
//! Two callers may race between steps 1 and 4 and enqueue the same range
//! twice. Discovery is idempotent within a cycle, so the duplicate only costs
//! a repeated probe.

use std::net::Ipv4Addr;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::{IpRange, JobMessage};
use crate::queue::{BatchPushResult, JobQueue};
use crate::storage::CatalogRepository;
use crate::tracker::PingableTracker;

/// Refresh parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshPolicy {
    /// Ranges not checked for this many days are stale
    pub max_age_days: i64,
    /// Maximum ranges selected per cycle
    pub select_limit: usize,
    /// Queue depth at which a cycle is skipped
    pub max_buffered_jobs: usize,
    /// Maximum addresses per discovery job
    pub subnet_step: u32,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            max_age_days: 14,
            select_limit: 20,
            max_buffered_jobs: 100,
            subnet_step: 1 << 14,
        }
    }
}

impl RefreshPolicy {
    pub fn max_age(&self) -> Duration {
        Duration::days(self.max_age_days)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_age_days <= 0 {
            return Err(Error::config("scheduler.max_age_days must be positive"));
        }
        if self.select_limit == 0 {
            return Err(Error::config("scheduler.select_limit must be > 0"));
        }
        if self.max_buffered_jobs == 0 {
            return Err(Error::config("scheduler.max_buffered_jobs must be > 0"));
        }
        if self.subnet_step == 0 {
            return Err(Error::config("scheduler.subnet_step must be > 0"));
        }
        Ok(())
    }
}

/// Outcome of one refresh cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum RefreshOutcome {
    /// Backlog at or above the limit; nothing was read or enqueued
    Skipped { depth: usize },
    /// Stale ranges processed and their subnets submitted
    Enqueued {
        ranges: usize,
        batch: BatchPushResult,
    },
}

impl RefreshOutcome {
    /// Metrics label
    pub fn label(&self) -> &'static str {
        match self {
            Self::Skipped { .. } => "skipped",
            Self::Enqueued { ranges: 0, .. } => "idle",
            Self::Enqueued { batch, .. } if !batch.is_complete() => "partial",
            Self::Enqueued { .. } => "enqueued",
        }
    }
}

/// Split `[start_ip, end_ip]` into consecutive subnets of at most `step` addresses
///
/// Returns an empty list for an inverted range or a zero step.
pub fn split_range(start_ip: u32, end_ip: u32, step: u32) -> Vec<(u32, u32)> {
    if end_ip < start_ip || step == 0 {
        return Vec::new();
    }

    let (start, end, step) = (u64::from(start_ip), u64::from(end_ip), u64::from(step));
    let count = (end - start + 1).div_ceil(step);

    (0..count)
        .map(|i| {
            let lo = start + i * step;
            let hi = (lo + step - 1).min(end);
            // Both bounds stay within [start_ip, end_ip]
            (lo as u32, hi as u32)
        })
        .collect()
}

/// Backpressure-aware producer of discovery jobs
#[derive(Clone)]
pub struct RangeScheduler {
    catalog: Arc<dyn CatalogRepository>,
    tracker: PingableTracker,
    queue: Arc<dyn JobQueue>,
    policy: RefreshPolicy,
}

impl RangeScheduler {
    pub fn new(
        catalog: Arc<dyn CatalogRepository>,
        tracker: PingableTracker,
        queue: Arc<dyn JobQueue>,
        policy: RefreshPolicy,
    ) -> Self {
        Self {
            catalog,
            tracker,
            queue,
            policy,
        }
    }

    pub fn policy(&self) -> &RefreshPolicy {
        &self.policy
    }

    /// Run one refresh cycle at the current time
    pub async fn refresh(&self) -> Result<RefreshOutcome> {
        self.refresh_at(Utc::now()).await
    }

    /// Run one refresh cycle as if the clock read `now`
    pub async fn refresh_at(&self, now: DateTime<Utc>) -> Result<RefreshOutcome> {
        let depth = self.queue.depth().await?;
        if depth >= self.policy.max_buffered_jobs {
            tracing::debug!(
                depth,
                max_buffered_jobs = self.policy.max_buffered_jobs,
                "Job backlog full, skipping range refresh"
            );
            return Ok(RefreshOutcome::Skipped { depth });
        }

        let stale = self
            .catalog
            .expired_ranges(now - self.policy.max_age(), self.policy.select_limit)?;

        let mut messages = Vec::new();
        for range in &stale {
            messages.extend(self.prepare_range(range, now));
        }

        let batch = self.queue.push_batch(&messages).await;
        if !batch.is_complete() {
            tracing::warn!(
                failed = batch.failed.len(),
                succeeded = batch.succeeded.len(),
                "Some discovery jobs were not enqueued"
            );
        }

        tracing::info!(
            ranges = stale.len(),
            jobs = messages.len(),
            backlog = depth,
            "Range refresh cycle complete"
        );

        Ok(RefreshOutcome::Enqueued {
            ranges: stale.len(),
            batch,
        })
    }

    /// Touch, decay and split one range; returns its discovery messages
    ///
    /// The touch comes first so a range is decayed at most once per cycle.
    /// A range whose touch fails yields nothing and stays stale. A failed
    /// decay restores the previous check time so the next cycle retries it.
    fn prepare_range(&self, range: &IpRange, now: DateTime<Utc>) -> Vec<JobMessage> {
        if let Err(e) = self.catalog.touch_range(range.city_id, range.start_ip, now) {
            tracing::warn!(
                city_id = range.city_id,
                start_ip = %Ipv4Addr::from(range.start_ip),
                error = %e,
                "Failed to advance range check time, skipping"
            );
            return Vec::new();
        }

        if let Err(e) = self
            .tracker
            .decay_range(range.city_id, range.start_ip, range.end_ip)
        {
            tracing::warn!(
                city_id = range.city_id,
                start_ip = %Ipv4Addr::from(range.start_ip),
                error = %e,
                "Failed to decay range, skipping"
            );
            if let Err(e) =
                self.catalog
                    .touch_range(range.city_id, range.start_ip, range.last_check_time)
            {
                tracing::warn!(
                    city_id = range.city_id,
                    start_ip = %Ipv4Addr::from(range.start_ip),
                    error = %e,
                    "Failed to restore range check time"
                );
            }
            return Vec::new();
        }

        split_range(range.start_ip, range.end_ip, self.policy.subnet_step)
            .into_iter()
            .map(|(start, end)| JobMessage::discovery(start, end, range.city_id))
            .collect()
    }
}
