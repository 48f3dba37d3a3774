//! In-memory implementation of the repository traits
//!
//! Backs `Engine::in_memory()` and the test suites. Mirrors the SQLite
//! semantics closely enough that the same tests run against both.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::models::{CityId, CityObject, IpRange, PingableRecord, RangeCounts, StatisticsRow};

use super::repository::{
    AsnRecord, CatalogRepository, CityRecord, PingableRepository, ShiftOutcome,
    StatisticsRepository,
};

/// In-memory store for catalog, pingable and statistics data
#[derive(Default)]
pub struct MemoryStore {
    asns: RwLock<HashMap<i64, AsnRecord>>,
    cities: RwLock<HashMap<CityId, CityRecord>>,
    ranges: RwLock<Vec<IpRange>>,
    pingable: RwLock<HashMap<(CityId, u32), u8>>,
    statistics: RwLock<HashMap<(CityId, CityId), StatisticsRow>>,
    catalog_queries: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_asn(&self, asn: &AsnRecord) -> Result<()> {
        write(&self.asns)?.insert(asn.asn, asn.clone());
        Ok(())
    }

    pub fn add_city(&self, city: &CityRecord) -> Result<()> {
        write(&self.cities)?.insert(city.id, city.clone());
        Ok(())
    }

    /// Insert or replace the range keyed by `(city_id, start_ip)`
    pub fn add_range(&self, range: &IpRange) -> Result<()> {
        let mut ranges = write(&self.ranges)?;
        ranges.retain(|r| !(r.city_id == range.city_id && r.start_ip == range.start_ip));
        ranges.push(range.clone());
        Ok(())
    }

    /// Number of `expired_ranges` calls served so far
    pub fn catalog_queries(&self) -> usize {
        self.catalog_queries.load(Ordering::Relaxed)
    }

    /// Number of pingable records
    pub fn pingable_len(&self) -> Result<usize> {
        Ok(read(&self.pingable)?.len())
    }
}

impl CatalogRepository for MemoryStore {
    fn city_id_by_ip(&self, ip: Ipv4Addr) -> Result<Option<CityId>> {
        let ranges = read(&self.ranges)?;
        Ok(ranges
            .iter()
            .filter(|r| r.contains(ip))
            .min_by_key(|r| r.len())
            .map(|r| r.city_id))
    }

    fn expired_ranges(&self, older_than: DateTime<Utc>, limit: usize) -> Result<Vec<IpRange>> {
        self.catalog_queries.fetch_add(1, Ordering::Relaxed);

        let ranges = read(&self.ranges)?;
        let mut expired: Vec<IpRange> = ranges
            .iter()
            .filter(|r| r.last_check_time < older_than)
            .cloned()
            .collect();
        expired.sort_by_key(|r| r.last_check_time);
        expired.truncate(limit);
        Ok(expired)
    }

    fn touch_range(&self, city_id: CityId, start_ip: u32, at: DateTime<Utc>) -> Result<()> {
        let mut ranges = write(&self.ranges)?;
        for range in ranges
            .iter_mut()
            .filter(|r| r.city_id == city_id && r.start_ip == start_ip)
        {
            range.last_check_time = at;
        }
        Ok(())
    }

    fn city_objects(&self, ids: &[CityId]) -> Result<HashMap<CityId, CityObject>> {
        let cities = read(&self.cities)?;
        let asns = read(&self.asns)?;
        let ranges = read(&self.ranges)?;

        let mut objects = HashMap::with_capacity(ids.len());
        for id in ids {
            let Some(city) = cities.get(id) else {
                continue;
            };
            let asn = asns.get(&city.asn);
            let first_range = ranges
                .iter()
                .filter(|r| r.city_id == city.id)
                .min_by_key(|r| r.start_ip);

            objects.insert(
                city.id,
                CityObject {
                    city_id: city.id,
                    asn: city.asn,
                    country: city.country_code.clone(),
                    name: city.display_name().to_string(),
                    region: city.region.clone(),
                    asn_name: asn.and_then(|a| a.name.clone()),
                    domain: asn.and_then(|a| a.domain.clone()),
                    latitude: city.latitude,
                    longitude: city.longitude,
                    asn_type: asn.and_then(|a| a.asn_type.clone()),
                    ip_counts: asn.and_then(|a| a.ip_counts),
                    start_ip: first_range.map(|r| r.start_ip),
                    end_ip: first_range.map(|r| r.end_ip),
                },
            );
        }

        Ok(objects)
    }

    fn range_counts(&self, fresh_since: DateTime<Utc>) -> Result<RangeCounts> {
        let ranges = read(&self.ranges)?;
        let ready = ranges
            .iter()
            .filter(|r| r.last_check_time >= fresh_since)
            .count() as u64;

        Ok(RangeCounts {
            ready,
            outdated: ranges.len() as u64 - ready,
        })
    }
}

impl PingableRepository for MemoryStore {
    fn observe(&self, city_id: CityId, ip: u32, top_bit: u8) -> Result<()> {
        let mut pingable = write(&self.pingable)?;
        *pingable.entry((city_id, ip)).or_insert(0) |= top_bit;
        Ok(())
    }

    fn shift_range(&self, city_id: CityId, start_ip: u32, end_ip: u32) -> Result<ShiftOutcome> {
        let mut pingable = write(&self.pingable)?;
        let mut outcome = ShiftOutcome::default();

        for ((city, ip), mask) in pingable.iter_mut() {
            if *city == city_id && (start_ip..=end_ip).contains(ip) {
                *mask >>= 1;
                outcome.shifted += 1;
            }
        }

        let before = pingable.len();
        pingable.retain(|&(city, ip), mask| {
            !(city == city_id && (start_ip..=end_ip).contains(&ip) && *mask == 0)
        });
        outcome.reaped = before - pingable.len();

        Ok(outcome)
    }

    fn list_alive(&self, city_id: CityId, limit: usize) -> Result<Vec<u32>> {
        let pingable = read(&self.pingable)?;
        Ok(pingable
            .iter()
            .filter(|((city, _), mask)| *city == city_id && **mask > 0)
            .map(|((_, ip), _)| *ip)
            .take(limit)
            .collect())
    }

    fn record(&self, city_id: CityId, ip: u32) -> Result<Option<PingableRecord>> {
        let pingable = read(&self.pingable)?;
        Ok(pingable.get(&(city_id, ip)).map(|mask| PingableRecord {
            ip,
            city_id,
            liveness_mask: *mask,
        }))
    }

    fn mask_histogram(&self) -> Result<Vec<(u8, u64)>> {
        let pingable = read(&self.pingable)?;
        let mut histogram: HashMap<u8, u64> = HashMap::new();
        for mask in pingable.values().filter(|m| **m > 0) {
            *histogram.entry(*mask).or_default() += 1;
        }

        let mut histogram: Vec<(u8, u64)> = histogram.into_iter().collect();
        histogram.sort_unstable();
        Ok(histogram)
    }

    fn cities_with_pingable(&self) -> Result<u64> {
        let pingable = read(&self.pingable)?;
        let mut cities: Vec<CityId> = pingable
            .iter()
            .filter(|(_, mask)| **mask > 0)
            .map(|((city, _), _)| *city)
            .collect();
        cities.sort_unstable();
        cities.dedup();
        Ok(cities.len() as u64)
    }
}

impl StatisticsRepository for MemoryStore {
    fn upsert(&self, row: &StatisticsRow) -> Result<()> {
        write(&self.statistics)?.insert((row.src_city_id, row.dist_city_id), row.clone());
        Ok(())
    }

    fn row(&self, src_city_id: CityId, dist_city_id: CityId) -> Result<Option<StatisticsRow>> {
        Ok(read(&self.statistics)?
            .get(&(src_city_id, dist_city_id))
            .cloned())
    }

    fn rows_between(&self, srcs: &[CityId], dists: &[CityId]) -> Result<Vec<StatisticsRow>> {
        let statistics = read(&self.statistics)?;
        let mut rows: Vec<StatisticsRow> = statistics
            .values()
            .filter(|r| srcs.contains(&r.src_city_id) && dists.contains(&r.dist_city_id))
            .cloned()
            .collect();
        rows.sort_by_key(|r| (r.src_city_id, r.dist_city_id));
        Ok(rows)
    }

    fn pair_count(&self) -> Result<u64> {
        Ok(read(&self.statistics)?.len() as u64)
    }
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read()
        .map_err(|_| Error::other("memory store lock poisoned"))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write()
        .map_err(|_| Error::other("memory store lock poisoned"))
}
