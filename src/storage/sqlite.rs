//! SQLite implementation of the repository traits
//!
//! Uses a `Mutex` around a single connection; every statement is short and the
//! decay pass runs inside one transaction.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

use crate::error::{Error, Result};
use crate::models::{CityId, CityObject, IpRange, PingableRecord, RangeCounts, StatisticsRow};

use super::repository::{
    AsnRecord, CatalogRepository, CityRecord, PingableRepository, ShiftOutcome,
    StatisticsRepository,
};

/// Upper bound on bound parameters per `IN (...)` query
const CHUNK_SIZE: usize = 500;

const STATISTICS_COLUMNS: &str = "src_city_id, dist_city_id, samples, latency_min, latency_max, \
     latency_avg, latency_p50, latency_p70, latency_p90, latency_p95, update_time";

/// SQLite-backed store for catalog, pingable and statistics tables
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a database file
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.create_schema()?;

        tracing::info!(path = %path.display(), "SQLite store initialized");
        Ok(store)
    }

    /// Create in-memory store (for testing)
    pub fn in_memory() -> Result<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.create_schema()?;
        Ok(store)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::other("SQLite connection mutex poisoned"))
    }

    fn create_schema(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            r#"
                CREATE TABLE IF NOT EXISTS asn (
                    asn INTEGER PRIMARY KEY,
                    name TEXT,
                    domain TEXT,
                    type TEXT,
                    ipcounts INTEGER
                );

                CREATE TABLE IF NOT EXISTS city (
                    id INTEGER PRIMARY KEY,
                    asn INTEGER NOT NULL,
                    country_code TEXT NOT NULL,
                    name TEXT NOT NULL,
                    friendly_name TEXT,
                    region TEXT,
                    latitude REAL NOT NULL DEFAULT 0,
                    longitude REAL NOT NULL DEFAULT 0
                );

                CREATE TABLE IF NOT EXISTS iprange (
                    start_ip INTEGER NOT NULL,
                    end_ip INTEGER NOT NULL,
                    city_id INTEGER NOT NULL,
                    lastcheck_time TEXT NOT NULL,
                    PRIMARY KEY (city_id, start_ip)
                );

                CREATE INDEX IF NOT EXISTS idx_iprange_lastcheck
                    ON iprange(lastcheck_time);

                CREATE INDEX IF NOT EXISTS idx_iprange_bounds
                    ON iprange(start_ip, end_ip);

                CREATE TABLE IF NOT EXISTS pingable (
                    ip INTEGER NOT NULL,
                    city_id INTEGER NOT NULL,
                    lastresult INTEGER NOT NULL,
                    PRIMARY KEY (ip, city_id)
                );

                CREATE INDEX IF NOT EXISTS idx_pingable_city
                    ON pingable(city_id, ip);

                CREATE TABLE IF NOT EXISTS statistics (
                    src_city_id INTEGER NOT NULL,
                    dist_city_id INTEGER NOT NULL,
                    samples INTEGER NOT NULL,
                    latency_min INTEGER NOT NULL,
                    latency_max INTEGER NOT NULL,
                    latency_avg INTEGER NOT NULL,
                    latency_p50 INTEGER NOT NULL,
                    latency_p70 INTEGER NOT NULL,
                    latency_p90 INTEGER NOT NULL,
                    latency_p95 INTEGER NOT NULL,
                    update_time TEXT NOT NULL,
                    PRIMARY KEY (src_city_id, dist_city_id)
                );
                "#,
        )?;

        Ok(())
    }

    /// Insert or replace an ASN catalog row
    pub fn add_asn(&self, asn: &AsnRecord) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO asn (asn, name, domain, type, ipcounts)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![asn.asn, asn.name, asn.domain, asn.asn_type, asn.ip_counts],
        )?;
        Ok(())
    }

    /// Insert or replace a city catalog row
    pub fn add_city(&self, city: &CityRecord) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO city
                (id, asn, country_code, name, friendly_name, region, latitude, longitude)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                city.id,
                city.asn,
                city.country_code,
                city.name,
                city.friendly_name,
                city.region,
                city.latitude,
                city.longitude
            ],
        )?;
        Ok(())
    }

    /// Insert or replace an address range
    pub fn add_range(&self, range: &IpRange) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO iprange (start_ip, end_ip, city_id, lastcheck_time)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                range.start_ip,
                range.end_ip,
                range.city_id,
                format_timestamp(range.last_check_time)
            ],
        )?;
        Ok(())
    }
}

impl CatalogRepository for SqliteStore {
    fn city_id_by_ip(&self, ip: Ipv4Addr) -> Result<Option<CityId>> {
        let conn = self.lock()?;
        let city_id = conn
            .query_row(
                "SELECT city_id FROM iprange
                 WHERE start_ip <= ?1 AND end_ip >= ?1
                 ORDER BY end_ip - start_ip
                 LIMIT 1",
                params![u32::from(ip)],
                |row| row.get(0),
            )
            .optional()?;

        Ok(city_id)
    }

    fn expired_ranges(&self, older_than: DateTime<Utc>, limit: usize) -> Result<Vec<IpRange>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT start_ip, end_ip, city_id, lastcheck_time FROM iprange
             WHERE lastcheck_time < ?1
             ORDER BY lastcheck_time
             LIMIT ?2",
        )?;

        let ranges = stmt
            .query_map(
                params![format_timestamp(older_than), limit as i64],
                |row| {
                    Ok(IpRange {
                        start_ip: row.get(0)?,
                        end_ip: row.get(1)?,
                        city_id: row.get(2)?,
                        last_check_time: timestamp_column(row, 3)?,
                    })
                },
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(ranges)
    }

    fn touch_range(&self, city_id: CityId, start_ip: u32, at: DateTime<Utc>) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE iprange SET lastcheck_time = ?1 WHERE city_id = ?2 AND start_ip = ?3",
            params![format_timestamp(at), city_id, start_ip],
        )?;
        Ok(())
    }

    fn city_objects(&self, ids: &[CityId]) -> Result<HashMap<CityId, CityObject>> {
        let mut objects = HashMap::with_capacity(ids.len());
        if ids.is_empty() {
            return Ok(objects);
        }

        let conn = self.lock()?;
        for chunk in ids.chunks(CHUNK_SIZE) {
            let query = format!(
                "SELECT c.id, c.asn, c.country_code, COALESCE(c.friendly_name, c.name), c.region,
                        a.name, a.domain, c.latitude, c.longitude, a.type, a.ipcounts,
                        i.start_ip, i.end_ip
                 FROM city AS c
                 LEFT JOIN asn AS a ON a.asn = c.asn
                 LEFT JOIN iprange AS i ON i.city_id = c.id
                     AND i.start_ip = (SELECT MIN(start_ip) FROM iprange WHERE city_id = c.id)
                 WHERE c.id IN ({})",
                placeholders(chunk.len())
            );

            let mut stmt = conn.prepare(&query)?;
            let rows = stmt.query_map(params_from_iter(chunk.iter()), |row| {
                Ok(CityObject {
                    city_id: row.get(0)?,
                    asn: row.get(1)?,
                    country: row.get(2)?,
                    name: row.get(3)?,
                    region: row.get(4)?,
                    asn_name: row.get(5)?,
                    domain: row.get(6)?,
                    latitude: row.get(7)?,
                    longitude: row.get(8)?,
                    asn_type: row.get(9)?,
                    ip_counts: row.get(10)?,
                    start_ip: row.get(11)?,
                    end_ip: row.get(12)?,
                })
            })?;

            for object in rows {
                let object = object?;
                objects.insert(object.city_id, object);
            }
        }

        Ok(objects)
    }

    fn range_counts(&self, fresh_since: DateTime<Utc>) -> Result<RangeCounts> {
        let conn = self.lock()?;
        let cutoff = format_timestamp(fresh_since);

        let ready: i64 = conn.query_row(
            "SELECT COUNT(*) FROM iprange WHERE lastcheck_time >= ?1",
            params![cutoff],
            |row| row.get(0),
        )?;
        let outdated: i64 = conn.query_row(
            "SELECT COUNT(*) FROM iprange WHERE lastcheck_time < ?1",
            params![cutoff],
            |row| row.get(0),
        )?;

        Ok(RangeCounts {
            ready: ready as u64,
            outdated: outdated as u64,
        })
    }
}

impl PingableRepository for SqliteStore {
    fn observe(&self, city_id: CityId, ip: u32, top_bit: u8) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            r#"
                INSERT INTO pingable (ip, city_id, lastresult)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(ip, city_id) DO UPDATE SET
                    lastresult = lastresult | excluded.lastresult
                "#,
            params![ip, city_id, top_bit],
        )?;
        Ok(())
    }

    fn shift_range(&self, city_id: CityId, start_ip: u32, end_ip: u32) -> Result<ShiftOutcome> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let shifted = tx.execute(
            "UPDATE pingable SET lastresult = lastresult >> 1
             WHERE city_id = ?1 AND ip >= ?2 AND ip <= ?3",
            params![city_id, start_ip, end_ip],
        )?;
        let reaped = tx.execute(
            "DELETE FROM pingable
             WHERE city_id = ?1 AND ip >= ?2 AND ip <= ?3 AND lastresult = 0",
            params![city_id, start_ip, end_ip],
        )?;

        tx.commit()?;
        Ok(ShiftOutcome { shifted, reaped })
    }

    fn list_alive(&self, city_id: CityId, limit: usize) -> Result<Vec<u32>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT ip FROM pingable WHERE city_id = ?1 AND lastresult > 0 LIMIT ?2",
        )?;

        let ips = stmt
            .query_map(params![city_id, limit as i64], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<u32>>>()?;

        Ok(ips)
    }

    fn record(&self, city_id: CityId, ip: u32) -> Result<Option<PingableRecord>> {
        let conn = self.lock()?;
        let record = conn
            .query_row(
                "SELECT ip, city_id, lastresult FROM pingable WHERE ip = ?1 AND city_id = ?2",
                params![ip, city_id],
                |row| {
                    Ok(PingableRecord {
                        ip: row.get(0)?,
                        city_id: row.get(1)?,
                        liveness_mask: row.get(2)?,
                    })
                },
            )
            .optional()?;

        Ok(record)
    }

    fn mask_histogram(&self) -> Result<Vec<(u8, u64)>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT lastresult, COUNT(*) FROM pingable
             WHERE lastresult > 0
             GROUP BY lastresult
             ORDER BY lastresult",
        )?;

        let histogram = stmt
            .query_map([], |row| {
                let count: i64 = row.get(1)?;
                Ok((row.get::<_, u8>(0)?, count as u64))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(histogram)
    }

    fn cities_with_pingable(&self) -> Result<u64> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(DISTINCT city_id) FROM pingable WHERE lastresult > 0",
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

impl StatisticsRepository for SqliteStore {
    fn upsert(&self, row: &StatisticsRow) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            &format!(
                r#"
                INSERT INTO statistics ({STATISTICS_COLUMNS})
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                ON CONFLICT(src_city_id, dist_city_id) DO UPDATE SET
                    samples = excluded.samples,
                    latency_min = excluded.latency_min,
                    latency_max = excluded.latency_max,
                    latency_avg = excluded.latency_avg,
                    latency_p50 = excluded.latency_p50,
                    latency_p70 = excluded.latency_p70,
                    latency_p90 = excluded.latency_p90,
                    latency_p95 = excluded.latency_p95,
                    update_time = excluded.update_time
                "#
            ),
            params![
                row.src_city_id,
                row.dist_city_id,
                row.samples,
                row.latency_min,
                row.latency_max,
                row.latency_avg,
                row.latency_p50,
                row.latency_p70,
                row.latency_p90,
                row.latency_p95,
                format_timestamp(row.update_time)
            ],
        )?;
        Ok(())
    }

    fn row(&self, src_city_id: CityId, dist_city_id: CityId) -> Result<Option<StatisticsRow>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT {STATISTICS_COLUMNS} FROM statistics
                     WHERE src_city_id = ?1 AND dist_city_id = ?2"
                ),
                params![src_city_id, dist_city_id],
                statistics_row,
            )
            .optional()?;

        Ok(row)
    }

    fn rows_between(&self, srcs: &[CityId], dists: &[CityId]) -> Result<Vec<StatisticsRow>> {
        if srcs.is_empty() || dists.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.lock()?;
        let mut rows = Vec::new();

        for src_chunk in srcs.chunks(CHUNK_SIZE / 2) {
            for dist_chunk in dists.chunks(CHUNK_SIZE / 2) {
                let query = format!(
                    "SELECT {STATISTICS_COLUMNS} FROM statistics
                     WHERE src_city_id IN ({}) AND dist_city_id IN ({})
                     ORDER BY src_city_id, dist_city_id",
                    placeholders(src_chunk.len()),
                    placeholders(dist_chunk.len())
                );

                let mut stmt = conn.prepare(&query)?;
                let found = stmt
                    .query_map(
                        params_from_iter(src_chunk.iter().chain(dist_chunk.iter())),
                        statistics_row,
                    )?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows.extend(found);
            }
        }

        Ok(rows)
    }

    fn pair_count(&self) -> Result<u64> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM statistics", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(",")
}

/// Fixed-width UTC timestamps keep lexicographic and chronological order equal
fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn timestamp_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn statistics_row(row: &Row<'_>) -> rusqlite::Result<StatisticsRow> {
    Ok(StatisticsRow {
        src_city_id: row.get(0)?,
        dist_city_id: row.get(1)?,
        samples: row.get(2)?,
        latency_min: row.get(3)?,
        latency_max: row.get(4)?,
        latency_avg: row.get(5)?,
        latency_p50: row.get(6)?,
        latency_p70: row.get(7)?,
        latency_p90: row.get(8)?,
        latency_p95: row.get(9)?,
        update_time: timestamp_column(row, 10)?,
    })
}
