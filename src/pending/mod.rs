//! Pending latency jobs per source city
//!
//! A data agent located in city `S` measures latency towards the destination
//! cities queued for `S`. Each source city owns one FIFO of destination ids;
//! pulling removes the ids, so a destination is measured once per push.

use std::collections::{HashMap, VecDeque};
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use deadpool_redis::Pool;
use redis::AsyncCommands;

use crate::error::{Error, Result};
use crate::models::CityId;

/// Default key prefix of the per-city Redis lists
pub const DEFAULT_KEY_PREFIX: &str = "job";

/// Source of pending destination city ids
#[async_trait]
pub trait PendingJobSource: Send + Sync {
    /// Remove and return up to `limit` destinations queued for `src_city_id`
    async fn pull(&self, src_city_id: CityId, limit: usize) -> Result<Vec<CityId>>;

    /// Queue destinations for `src_city_id`; returns the new queue length
    async fn push(&self, src_city_id: CityId, dist_city_ids: &[CityId]) -> Result<usize>;

    /// Number of destinations queued for `src_city_id`
    async fn pending(&self, src_city_id: CityId) -> Result<usize>;

    fn backend_name(&self) -> &'static str;
}

/// In-process pending lists
#[derive(Default)]
pub struct MemoryPendingJobs {
    lists: Mutex<HashMap<CityId, VecDeque<CityId>>>,
}

impl MemoryPendingJobs {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<CityId, VecDeque<CityId>>>> {
        self.lists
            .lock()
            .map_err(|_| Error::queue("pending job mutex poisoned"))
    }
}

#[async_trait]
impl PendingJobSource for MemoryPendingJobs {
    async fn pull(&self, src_city_id: CityId, limit: usize) -> Result<Vec<CityId>> {
        let mut lists = self.lock()?;
        let Some(list) = lists.get_mut(&src_city_id) else {
            return Ok(Vec::new());
        };

        let take = limit.min(list.len());
        let pulled: Vec<CityId> = list.drain(..take).collect();
        if list.is_empty() {
            lists.remove(&src_city_id);
        }
        Ok(pulled)
    }

    async fn push(&self, src_city_id: CityId, dist_city_ids: &[CityId]) -> Result<usize> {
        let mut lists = self.lock()?;
        let list = lists.entry(src_city_id).or_default();
        list.extend(dist_city_ids.iter().copied());
        Ok(list.len())
    }

    async fn pending(&self, src_city_id: CityId) -> Result<usize> {
        Ok(self.lock()?.get(&src_city_id).map_or(0, VecDeque::len))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

/// Redis lists keyed `<prefix>:<src_city_id>`
pub struct RedisPendingJobs {
    pool: Pool,
    key_prefix: String,
}

impl RedisPendingJobs {
    pub fn new(pool: Pool, key_prefix: impl Into<String>) -> Self {
        Self {
            pool,
            key_prefix: key_prefix.into(),
        }
    }

    fn key(&self, src_city_id: CityId) -> String {
        format!("{}:{}", self.key_prefix, src_city_id)
    }
}

#[async_trait]
impl PendingJobSource for RedisPendingJobs {
    async fn pull(&self, src_city_id: CityId, limit: usize) -> Result<Vec<CityId>> {
        let Some(count) = NonZeroUsize::new(limit) else {
            return Ok(Vec::new());
        };

        let mut conn = self.pool.get().await?;
        let pulled: Option<Vec<String>> = conn.lpop(self.key(src_city_id), Some(count)).await?;

        let ids = pulled
            .unwrap_or_default()
            .into_iter()
            .filter_map(|raw| match raw.trim().parse::<CityId>() {
                Ok(id) => Some(id),
                Err(e) => {
                    tracing::warn!(src_city_id, payload = %raw, error = %e, "Dropping malformed pending job");
                    None
                }
            })
            .collect();

        Ok(ids)
    }

    async fn push(&self, src_city_id: CityId, dist_city_ids: &[CityId]) -> Result<usize> {
        let mut conn = self.pool.get().await?;
        if dist_city_ids.is_empty() {
            let len: usize = conn.llen(self.key(src_city_id)).await?;
            return Ok(len);
        }

        let len: usize = conn.rpush(self.key(src_city_id), dist_city_ids.to_vec()).await?;
        Ok(len)
    }

    async fn pending(&self, src_city_id: CityId) -> Result<usize> {
        let mut conn = self.pool.get().await?;
        let len: usize = conn.llen(self.key(src_city_id)).await?;
        Ok(len)
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}
