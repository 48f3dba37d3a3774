//! Redis connection pooling and query-result caching
//!
//! Every Redis-backed component (job queue, pending job lists, query cache)
//! draws connections from a `deadpool-redis` pool built by [`connect_pool`].
//!
//! [`QueryCache`] stores expensive read results (such as cross-city
//! performance rollups) as JSON under a TTL. [`OptionalCache`] wraps it so a
//! missing or unreachable Redis only costs the cache hit, never the request.
//!
//! # Example
//!
//! ```rust,ignore
//! use cloudperf::cache::{CacheConfig, OptionalCache};
//!
//! let cache = OptionalCache::from_config(&CacheConfig::default()).await;
//! if let Some(rollup) = cache.get::<CrossCityRollup>("perf:1,2:3").await {
//!     return rollup;
//! }
//! ```

use std::time::Duration;

use deadpool_redis::{Config as PoolConfig, Pool, Runtime};
use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default TTL of cached query results (1 hour)
pub const DEFAULT_TTL_SECS: u64 = 3600;

/// Redis connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Redis URL (e.g., redis://localhost:6379)
    pub url: String,

    /// Connection pool size
    pub pool_size: usize,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            pool_size: 10,
        }
    }
}

/// Build a connection pool and verify it with `PING`
pub async fn connect_pool(config: &RedisConfig) -> Result<Pool> {
    let pool = PoolConfig::from_url(&config.url)
        .builder()
        .map_err(|e| Error::Pool(format!("Failed to create pool builder: {e}")))?
        .max_size(config.pool_size)
        .runtime(Runtime::Tokio1)
        .build()
        .map_err(|e| Error::Pool(format!("Failed to create Redis connection pool: {e}")))?;

    ping(&pool).await?;
    tracing::info!(url = %config.url, pool_size = config.pool_size, "Connected to Redis");

    Ok(pool)
}

/// Check that a pooled connection answers `PING`
async fn ping(pool: &Pool) -> Result<bool> {
    let mut conn = pool.get().await?;
    let reply: String = redis::cmd("PING").query_async(&mut *conn).await?;
    Ok(reply == "PONG")
}

/// Query cache configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Disabled caches never touch Redis
    pub enabled: bool,

    #[serde(flatten)]
    pub redis: RedisConfig,

    /// Time to live of cached results in seconds
    pub ttl_secs: u64,

    /// Key prefix for namespacing
    pub key_prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            redis: RedisConfig::default(),
            ttl_secs: DEFAULT_TTL_SECS,
            key_prefix: "cloudperf:sql".to_string(),
        }
    }
}

/// JSON values in Redis with a fixed TTL
pub struct QueryCache {
    pool: Pool,
    ttl: Duration,
    key_prefix: String,
}

impl QueryCache {
    /// Connect and verify the cache
    pub async fn new(config: &CacheConfig) -> Result<Self> {
        Ok(Self {
            pool: connect_pool(&config.redis).await?,
            ttl: Duration::from_secs(config.ttl_secs),
            key_prefix: config.key_prefix.clone(),
        })
    }

    fn key(&self, key: &str) -> String {
        format!("{}:{}", self.key_prefix, key)
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let mut conn = self.pool.get().await?;
        let value: Option<String> = conn.get(self.key(key)).await?;

        match value {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let raw = serde_json::to_string(value)?;

        conn.set_ex::<_, _, ()>(self.key(key), raw, self.ttl.as_secs())
            .await?;
        Ok(())
    }
}

/// Query cache that degrades to a no-op when Redis is absent
#[derive(Default)]
pub struct OptionalCache {
    inner: Option<QueryCache>,
}

impl OptionalCache {
    /// Cache without a backend
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    /// Create from config; disabled or unreachable caches become no-ops
    pub async fn from_config(config: &CacheConfig) -> Self {
        if !config.enabled {
            return Self::disabled();
        }
        match QueryCache::new(config).await {
            Ok(cache) => Self { inner: Some(cache) },
            Err(e) => {
                tracing::warn!(error = %e, "Redis cache unavailable, continuing without cache");
                Self::disabled()
            }
        }
    }

    pub fn is_available(&self) -> bool {
        self.inner.is_some()
    }

    /// Cached value, `None` on miss or any cache failure
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let cache = self.inner.as_ref()?;
        match cache.get(key).await {
            Ok(value) => {
                tracing::debug!(key, hit = value.is_some(), "Query cache lookup");
                value
            }
            Err(e) => {
                tracing::warn!(key, error = %e, "Query cache read failed");
                None
            }
        }
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: &T) {
        if let Some(cache) = &self.inner {
            if let Err(e) = cache.set(key, value).await {
                tracing::warn!(key, error = %e, "Query cache write failed");
            }
        }
    }
}
