//! Configuration management for the cloudperf coordinator
//!
//! Configuration comes from a TOML file or from `CLOUDPERF_*` environment
//! variables. Every section has defaults, so a file only needs the keys it
//! changes.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::cache::{CacheConfig, RedisConfig};
use crate::liveness::{LivenessWindow, DEFAULT_WIDTH};
use crate::pending::DEFAULT_KEY_PREFIX;
use crate::protocol::ProtocolSettings;
use crate::queue::memory::DEFAULT_CAPACITY;
use crate::queue::redis_list::DEFAULT_QUEUE_KEY;
use crate::scheduler::RefreshPolicy;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Catalog, pingable and statistics store
    pub database: DatabaseConfig,

    /// Discovery job queue and pending latency jobs
    pub queue: QueueConfig,

    /// Cache of performance rollups
    pub cache: CacheConfig,

    /// Liveness tracking
    pub tracker: TrackerConfig,

    /// Stale range refresh
    pub scheduler: RefreshPolicy,

    /// Poll protocol tunables
    pub protocol: ProtocolSettings,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// HTTP server
    pub server: ServerConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database path; empty selects the in-memory store
    pub sqlite_path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from("data/cloudperf.db"),
        }
    }
}

/// Where discovery jobs and pending latency jobs live
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    /// Process-local; jobs are lost on restart and not shared
    #[default]
    Memory,
    /// Redis lists shared by every coordinator process
    Redis,
}

impl FromStr for QueueBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "redis" => Ok(Self::Redis),
            other => anyhow::bail!("unknown queue backend '{}'", other),
        }
    }
}

/// Queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub backend: QueueBackend,

    /// Redis connection, used by the redis backend
    #[serde(flatten)]
    pub redis: RedisConfig,

    /// Redis list holding discovery jobs
    pub key: String,

    /// Prefix of the per-city pending latency job lists
    pub pending_prefix: String,

    /// Capacity of the memory backend
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: QueueBackend::Memory,
            redis: RedisConfig::default(),
            key: DEFAULT_QUEUE_KEY.to_string(),
            pending_prefix: DEFAULT_KEY_PREFIX.to_string(),
            capacity: DEFAULT_CAPACITY,
        }
    }
}

/// Liveness tracking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Bits of history kept per address (1..=8)
    pub liveness_width: u8,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            liveness_width: DEFAULT_WIDTH,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub enable_cors: bool,
    pub enable_request_logging: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: String::from("0.0.0.0:8080"),
            enable_cors: true,
            enable_request_logging: true,
        }
    }
}

/// Read and parse an environment variable, keeping `default` when unset or invalid
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let sqlite_path = std::env::var("CLOUDPERF_SQLITE_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.database.sqlite_path);

        let backend = match std::env::var("CLOUDPERF_QUEUE_BACKEND") {
            Ok(raw) => raw.parse().context("Invalid CLOUDPERF_QUEUE_BACKEND")?,
            Err(_) => defaults.queue.backend,
        };

        let redis_url = std::env::var("CLOUDPERF_REDIS_URL")
            .or_else(|_| std::env::var("REDIS_URL"))
            .unwrap_or(defaults.queue.redis.url);
        let redis = RedisConfig {
            url: redis_url,
            pool_size: env_or("CLOUDPERF_REDIS_POOL_SIZE", defaults.queue.redis.pool_size),
        };

        let discovery_user_agents = std::env::var("CLOUDPERF_DISCOVERY_USER_AGENTS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or(defaults.protocol.discovery_user_agents);

        Ok(Self {
            database: DatabaseConfig { sqlite_path },
            queue: QueueConfig {
                backend,
                redis: redis.clone(),
                key: env_or("CLOUDPERF_QUEUE_KEY", defaults.queue.key),
                pending_prefix: env_or("CLOUDPERF_PENDING_PREFIX", defaults.queue.pending_prefix),
                capacity: env_or("CLOUDPERF_QUEUE_CAPACITY", defaults.queue.capacity),
            },
            cache: CacheConfig {
                enabled: env_or("CLOUDPERF_CACHE_ENABLED", defaults.cache.enabled),
                redis,
                ttl_secs: env_or("CLOUDPERF_CACHE_TTL", defaults.cache.ttl_secs),
                key_prefix: defaults.cache.key_prefix,
            },
            tracker: TrackerConfig {
                liveness_width: env_or("CLOUDPERF_LIVENESS_WIDTH", defaults.tracker.liveness_width),
            },
            scheduler: RefreshPolicy {
                max_age_days: env_or("CLOUDPERF_MAX_AGE_DAYS", defaults.scheduler.max_age_days),
                select_limit: env_or("CLOUDPERF_SELECT_LIMIT", defaults.scheduler.select_limit),
                max_buffered_jobs: env_or(
                    "CLOUDPERF_MAX_BUFFERED_JOBS",
                    defaults.scheduler.max_buffered_jobs,
                ),
                subnet_step: env_or("CLOUDPERF_SUBNET_STEP", defaults.scheduler.subnet_step),
            },
            protocol: ProtocolSettings {
                discovery_user_agents,
                targets_per_job: env_or(
                    "CLOUDPERF_TARGETS_PER_JOB",
                    defaults.protocol.targets_per_job,
                ),
                idle_interval: env_or("CLOUDPERF_IDLE_INTERVAL", defaults.protocol.idle_interval),
                ..defaults.protocol
            },
            logging: LoggingConfig {
                level: env_or("CLOUDPERF_LOG_LEVEL", defaults.logging.level),
                format: env_or("CLOUDPERF_LOG_FORMAT", defaults.logging.format),
            },
            server: ServerConfig {
                bind_address: env_or("CLOUDPERF_BIND", defaults.server.bind_address),
                ..defaults.server
            },
        })
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        self.scheduler.validate()?;
        self.protocol.validate()?;
        LivenessWindow::new(self.tracker.liveness_width)?;

        if self.queue.backend == QueueBackend::Memory && self.queue.capacity == 0 {
            anyhow::bail!("queue.capacity must be greater than 0");
        }

        if self.queue.redis.pool_size == 0 {
            anyhow::bail!("queue.pool_size must be greater than 0");
        }

        if self.queue.key.is_empty() {
            anyhow::bail!("queue.key must not be empty");
        }

        Ok(())
    }
}
