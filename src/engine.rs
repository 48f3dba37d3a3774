//! Assembly of the coordination engine
//!
//! [`Engine`] builds every component once from [`Config`] and hands out the
//! shared handles. The HTTP layer and the CLI only talk to the engine.

use std::collections::BTreeSet;
use std::sync::{Arc, LazyLock};

use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::cache::{connect_pool, OptionalCache};
use crate::config::{Config, QueueBackend};
use crate::error::{Error, Result};
use crate::metrics;
use crate::models::{CityId, RangeCounts};
use crate::pending::{MemoryPendingJobs, PendingJobSource, RedisPendingJobs};
use crate::protocol::{AgentProtocol, AgentRequest, PollResponse};
use crate::queue::{JobQueue, MemoryJobQueue, RedisJobQueue};
use crate::scheduler::{RangeScheduler, RefreshOutcome};
use crate::stats::{rollup_cross_city, CrossCityRollup};
use crate::storage::{open_store, Repositories};
use crate::tracker::{LivenessCounts, PingableTracker};

/// Comma separated list of city ids
static CITY_IDS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[\d,]+$").unwrap());

/// Snapshot of the coordination state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    /// Pingable addresses per liveness band
    pub pingable: LivenessCounts,
    /// Ranges checked within the refresh window vs. due for a recheck
    pub ranges: RangeCounts,
    pub queue_backend: String,
    pub queue_depth: usize,
    pub cities_with_pingable: u64,
    pub statistics_pairs: u64,
}

/// Parse a `^[\d,]+$` list of city ids, dropping empty items and duplicates
pub fn parse_city_ids(raw: &str) -> Result<Vec<CityId>> {
    if !CITY_IDS.is_match(raw) {
        return Err(Error::invalid_query(format!(
            "'{raw}' is not a comma separated list of city ids"
        )));
    }

    let ids: BTreeSet<CityId> = raw
        .split(',')
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<CityId>()
                .map_err(|_| Error::invalid_query(format!("city id '{s}' out of range")))
        })
        .collect::<Result<_>>()?;

    Ok(ids.into_iter().collect())
}

/// All coordination components, wired together
pub struct Engine {
    repositories: Repositories,
    tracker: PingableTracker,
    queue: Arc<dyn JobQueue>,
    pending: Arc<dyn PendingJobSource>,
    scheduler: RangeScheduler,
    protocol: AgentProtocol,
    cache: OptionalCache,
}

impl Engine {
    /// Build an engine from explicit backends
    pub fn new(
        repositories: Repositories,
        queue: Arc<dyn JobQueue>,
        pending: Arc<dyn PendingJobSource>,
        cache: OptionalCache,
        config: &Config,
    ) -> Result<Self> {
        config.scheduler.validate()?;
        config.protocol.validate()?;

        let tracker =
            PingableTracker::with_width(repositories.pingable.clone(), config.tracker.liveness_width)?;
        let scheduler = RangeScheduler::new(
            repositories.catalog.clone(),
            tracker.clone(),
            queue.clone(),
            config.scheduler.clone(),
        );
        let protocol = AgentProtocol::new(
            &repositories,
            tracker.clone(),
            scheduler.clone(),
            queue.clone(),
            pending.clone(),
            config.protocol.clone(),
        );

        Ok(Self {
            repositories,
            tracker,
            queue,
            pending,
            scheduler,
            protocol,
            cache,
        })
    }

    /// Open the configured store, queue, pending source and cache
    pub async fn from_config(config: &Config) -> Result<Self> {
        let repositories = open_store(&config.database)?;

        let (queue, pending): (Arc<dyn JobQueue>, Arc<dyn PendingJobSource>) =
            match config.queue.backend {
                QueueBackend::Memory => (
                    Arc::new(MemoryJobQueue::new(config.queue.capacity)),
                    Arc::new(MemoryPendingJobs::new()),
                ),
                QueueBackend::Redis => {
                    let pool = connect_pool(&config.queue.redis).await?;
                    (
                        Arc::new(RedisJobQueue::new(pool.clone(), config.queue.key.clone())),
                        Arc::new(RedisPendingJobs::new(pool, config.queue.pending_prefix.clone())),
                    )
                }
            };

        let cache = OptionalCache::from_config(&config.cache).await;

        tracing::info!(
            queue = queue.backend_name(),
            pending = pending.backend_name(),
            cache = cache.is_available(),
            "Engine initialized"
        );

        Self::new(repositories, queue, pending, cache, config)
    }

    /// Engine over in-process backends with default settings
    pub fn in_memory(repositories: Repositories) -> Self {
        let tracker = PingableTracker::new(repositories.pingable.clone());
        let queue: Arc<dyn JobQueue> = Arc::new(MemoryJobQueue::default());
        let pending: Arc<dyn PendingJobSource> = Arc::new(MemoryPendingJobs::new());
        let config = Config::default();

        let scheduler = RangeScheduler::new(
            repositories.catalog.clone(),
            tracker.clone(),
            queue.clone(),
            config.scheduler,
        );
        let protocol = AgentProtocol::new(
            &repositories,
            tracker.clone(),
            scheduler.clone(),
            queue.clone(),
            pending.clone(),
            config.protocol,
        );

        Self {
            repositories,
            tracker,
            queue,
            pending,
            scheduler,
            protocol,
            cache: OptionalCache::disabled(),
        }
    }

    pub fn repositories(&self) -> &Repositories {
        &self.repositories
    }

    pub fn tracker(&self) -> &PingableTracker {
        &self.tracker
    }

    pub fn queue(&self) -> &Arc<dyn JobQueue> {
        &self.queue
    }

    pub fn pending(&self) -> &Arc<dyn PendingJobSource> {
        &self.pending
    }

    pub fn protocol(&self) -> &AgentProtocol {
        &self.protocol
    }

    /// Handle one agent poll
    pub async fn handle_poll(&self, request: &AgentRequest) -> PollResponse {
        self.protocol.handle_poll(request).await
    }

    /// Run one refresh cycle outside of a poll
    pub async fn refresh(&self) -> Result<RefreshOutcome> {
        let outcome = self.scheduler.refresh().await;
        match &outcome {
            Ok(outcome) => metrics::record_refresh(outcome.label()),
            Err(_) => metrics::record_refresh("failed"),
        }
        outcome
    }

    /// Queue latency jobs from `src_city_id` towards each destination
    pub async fn enqueue_pending(&self, src_city_id: CityId, dist_city_ids: &[CityId]) -> Result<usize> {
        let len = self.pending.push(src_city_id, dist_city_ids).await?;
        tracing::debug!(src_city_id, added = dist_city_ids.len(), pending = len, "Queued latency jobs");
        Ok(len)
    }

    /// Counts of addresses, ranges, queued jobs and statistics
    pub async fn status(&self) -> Result<SystemStatus> {
        let fresh_since = Utc::now() - self.scheduler.policy().max_age();
        let queue_depth = self.queue.depth().await?;
        metrics::set_queue_depth(queue_depth);

        Ok(SystemStatus {
            pingable: self.tracker.liveness_counts()?,
            ranges: self.repositories.catalog.range_counts(fresh_since)?,
            queue_backend: self.queue.backend_name().to_string(),
            queue_depth,
            cities_with_pingable: self.tracker.cities_with_pingable()?,
            statistics_pairs: self.repositories.statistics.pair_count()?,
        })
    }

    /// Roll up the stored statistics between two sets of cities
    ///
    /// `src` and `dist` are comma separated city ids. Results are cached
    /// when a query cache is configured.
    pub async fn performance(&self, src: &str, dist: &str) -> Result<CrossCityRollup> {
        let srcs = parse_city_ids(src)?;
        let dists = parse_city_ids(dist)?;

        let key = format!("performance:{}:{}", join_ids(&srcs), join_ids(&dists));
        if let Some(cached) = self.cache.get::<CrossCityRollup>(&key).await {
            return Ok(cached);
        }

        let rows = self.repositories.statistics.rows_between(&srcs, &dists)?;
        let ids: Vec<CityId> = srcs
            .iter()
            .chain(dists.iter())
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let cities = self.repositories.catalog.city_objects(&ids)?;

        let rollup = rollup_cross_city(&rows, &cities);
        self.cache.set(&key, &rollup).await;
        Ok(rollup)
    }
}

fn join_ids(ids: &[CityId]) -> String {
    ids.iter().map(ToString::to_string).collect::<Vec<_>>().join(",")
}
