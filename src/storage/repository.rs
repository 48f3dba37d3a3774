//! Repository traits for the catalog, pingable and statistics stores
//!
//! The coordinator never talks to a database directly. Each concern is a
//! `Send + Sync` trait so the tracker, scheduler and protocol can be driven
//! against SQLite in production and against [`MemoryStore`] in tests.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │          PingableTracker / RangeScheduler / AgentProtocol   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Repository Traits                         │
//! │ CatalogRepository, PingableRepository, StatisticsRepository │
//! └─────────────────────────────────────────────────────────────┘
//!                    │                        │
//!                    ▼                        ▼
//!          ┌─────────────────┐      ┌─────────────────┐
//!          │   SqliteStore   │      │   MemoryStore   │
//!          └─────────────────┘      └─────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use cloudperf::storage::{PingableRepository, SqliteStore};
//!
//! let store = SqliteStore::open("cloudperf.db")?;
//! store.observe(42, u32::from(addr), 0x80)?;
//! ```
//!
//! [`MemoryStore`]: super::memory::MemoryStore

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{CityId, CityObject, IpRange, PingableRecord, RangeCounts, StatisticsRow};

use super::memory::MemoryStore;
use super::sqlite::SqliteStore;

// ============================================================================
// Core Types
// ============================================================================

/// Catalog row of the `city` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CityRecord {
    pub id: CityId,
    pub asn: i64,
    pub country_code: String,
    pub name: String,
    pub friendly_name: Option<String>,
    pub region: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
}

impl CityRecord {
    /// Name shown in reports: the friendly name when set
    pub fn display_name(&self) -> &str {
        self.friendly_name.as_deref().unwrap_or(&self.name)
    }
}

/// Catalog row of the `asn` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsnRecord {
    pub asn: i64,
    pub name: Option<String>,
    pub domain: Option<String>,
    pub asn_type: Option<String>,
    pub ip_counts: Option<i64>,
}

/// Result of one decay pass over a range
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShiftOutcome {
    /// Records whose mask was shifted
    pub shifted: usize,
    /// Records removed because their mask reached zero
    pub reaped: usize,
}

// ============================================================================
// Repository Traits
// ============================================================================

/// Read access to the address range catalog, plus the recheck timestamp
pub trait CatalogRepository: Send + Sync {
    /// Resolve the city owning `ip`, preferring the narrowest matching range
    fn city_id_by_ip(&self, ip: Ipv4Addr) -> Result<Option<CityId>>;

    /// Ranges last checked before `older_than`, oldest first
    fn expired_ranges(&self, older_than: DateTime<Utc>, limit: usize) -> Result<Vec<IpRange>>;

    /// Advance the recheck timestamp of the range starting at `start_ip`
    fn touch_range(&self, city_id: CityId, start_ip: u32, at: DateTime<Utc>) -> Result<()>;

    /// Catalog views for the given ids; unknown ids are absent from the map
    fn city_objects(&self, ids: &[CityId]) -> Result<HashMap<CityId, CityObject>>;

    /// Ranges checked since `fresh_since` vs. older ones
    fn range_counts(&self, fresh_since: DateTime<Utc>) -> Result<RangeCounts>;
}

/// Keyed liveness store, one record per `(ip, city_id)`
pub trait PingableRepository: Send + Sync {
    /// Insert with `top_bit` or OR `top_bit` into the existing mask
    fn observe(&self, city_id: CityId, ip: u32, top_bit: u8) -> Result<()>;

    /// Right-shift every mask of the city inside `[start_ip, end_ip]` and
    /// delete the records that reach zero
    fn shift_range(&self, city_id: CityId, start_ip: u32, end_ip: u32) -> Result<ShiftOutcome>;

    /// Addresses of the city with a non-zero mask, capped at `limit`
    fn list_alive(&self, city_id: CityId, limit: usize) -> Result<Vec<u32>>;

    fn record(&self, city_id: CityId, ip: u32) -> Result<Option<PingableRecord>>;

    /// Number of live records per mask value
    fn mask_histogram(&self) -> Result<Vec<(u8, u64)>>;

    /// Number of distinct cities with at least one live record
    fn cities_with_pingable(&self) -> Result<u64>;
}

/// Durable latency aggregates keyed by `(src_city_id, dist_city_id)`
pub trait StatisticsRepository: Send + Sync {
    /// Insert or replace the row for its city pair
    fn upsert(&self, row: &StatisticsRow) -> Result<()>;

    fn row(&self, src_city_id: CityId, dist_city_id: CityId) -> Result<Option<StatisticsRow>>;

    /// Rows for every pair in `srcs × dists`
    fn rows_between(&self, srcs: &[CityId], dists: &[CityId]) -> Result<Vec<StatisticsRow>>;

    /// Number of city pairs with statistics
    fn pair_count(&self) -> Result<u64>;
}

/// Store implementing every repository, as held by the engine
pub trait Store: CatalogRepository + PingableRepository + StatisticsRepository {}

impl<T> Store for T where T: CatalogRepository + PingableRepository + StatisticsRepository {}

// ============================================================================
// Shared Repository Types
// ============================================================================

/// Shared handles to the three repositories of one store
#[derive(Clone)]
pub struct Repositories {
    pub catalog: Arc<dyn CatalogRepository>,
    pub pingable: Arc<dyn PingableRepository>,
    pub statistics: Arc<dyn StatisticsRepository>,
}

impl Repositories {
    /// Share one store behind all three repository handles
    pub fn from_store<S: Store + 'static>(store: Arc<S>) -> Self {
        Self {
            catalog: store.clone(),
            pingable: store.clone(),
            statistics: store,
        }
    }
}

/// Create a shared SQLite store
pub fn create_sqlite_store(path: impl AsRef<Path>) -> Result<Arc<SqliteStore>> {
    Ok(Arc::new(SqliteStore::open(path)?))
}

/// Create a shared in-memory store
pub fn create_memory_store() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::new())
}

// ============================================================================
// Tests
// ============================================================================
