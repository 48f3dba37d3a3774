//! Redis list backend for the job queue
//!
//! Producers `RPUSH` JSON payloads, consumers `LPOP` them; Redis executes each
//! command atomically, so one popped item reaches exactly one coordinator.

use async_trait::async_trait;
use deadpool_redis::Pool;
use redis::AsyncCommands;

use crate::cache::{connect_pool, RedisConfig};
use crate::error::Result;
use crate::models::JobMessage;

use super::JobQueue;

/// Default list key, shared with other producers of discovery jobs
pub const DEFAULT_QUEUE_KEY: &str = "ping";

pub struct RedisJobQueue {
    pool: Pool,
    key: String,
}

impl RedisJobQueue {
    pub fn new(pool: Pool, key: impl Into<String>) -> Self {
        Self {
            pool,
            key: key.into(),
        }
    }

    /// Connect a new pool and bind it to `key`
    pub async fn connect(config: &RedisConfig, key: impl Into<String>) -> Result<Self> {
        let pool = connect_pool(config).await?;
        Ok(Self::new(pool, key))
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn push_chunk(&self, items: &[JobMessage]) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }

        let payloads = items
            .iter()
            .map(serde_json::to_string)
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut conn = self.pool.get().await?;
        conn.rpush::<_, _, ()>(&self.key, payloads).await?;
        Ok(())
    }

    async fn pop(&self) -> Result<Option<JobMessage>> {
        let mut conn = self.pool.get().await?;

        loop {
            let raw: Option<String> = conn.lpop(&self.key, None).await?;
            let Some(raw) = raw else {
                return Ok(None);
            };

            match serde_json::from_str(&raw) {
                Ok(message) => return Ok(Some(message)),
                Err(e) => {
                    tracing::warn!(key = %self.key, payload = %raw, error = %e, "Dropping malformed job payload");
                }
            }
        }
    }

    async fn depth(&self) -> Result<usize> {
        let mut conn = self.pool.get().await?;
        let depth: usize = conn.llen(&self.key).await?;
        Ok(depth)
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}
