//! Common test utilities

#![allow(dead_code)]

use chrono::{Duration, Utc};
use cloudperf::models::{CityId, IpRange};
use cloudperf::storage::{AsnRecord, CityRecord, MemoryStore, SqliteStore};
use std::net::Ipv4Addr;
use std::sync::Arc;

/// City 1: New York on AS7922, owner of the agent network 203.0.113.0/24
pub const AGENT_CITY: CityId = 1;

/// City 2: Frankfurt on AS3320
pub const TARGET_CITY: CityId = 2;

/// Address a data agent in [`AGENT_CITY`] polls from
pub fn agent_ip() -> Ipv4Addr {
    Ipv4Addr::new(203, 0, 113, 10)
}

pub fn test_cities() -> Vec<CityRecord> {
    vec![
        CityRecord {
            id: AGENT_CITY,
            asn: 7922,
            country_code: "US".to_string(),
            name: "New York".to_string(),
            friendly_name: Some("NYC".to_string()),
            region: Some("NY".to_string()),
            latitude: 40.71,
            longitude: -74.0,
        },
        CityRecord {
            id: TARGET_CITY,
            asn: 3320,
            country_code: "DE".to_string(),
            name: "Frankfurt am Main".to_string(),
            friendly_name: Some("Frankfurt".to_string()),
            region: Some("Hesse".to_string()),
            latitude: 50.11,
            longitude: 8.68,
        },
    ]
}

pub fn test_asns() -> Vec<AsnRecord> {
    vec![
        AsnRecord {
            asn: 7922,
            name: Some("Comcast".to_string()),
            domain: Some("comcast.net".to_string()),
            asn_type: Some("isp".to_string()),
            ip_counts: Some(70_000_000),
        },
        AsnRecord {
            asn: 3320,
            name: Some("Deutsche Telekom".to_string()),
            domain: Some("telekom.de".to_string()),
            asn_type: Some("isp".to_string()),
            ip_counts: Some(34_000_000),
        },
    ]
}

/// Agent network (fresh) plus one stale 32768-address range of the target city
pub fn test_ranges() -> Vec<IpRange> {
    let now = Utc::now();
    vec![
        IpRange {
            start_ip: u32::from(Ipv4Addr::new(203, 0, 113, 0)),
            end_ip: u32::from(Ipv4Addr::new(203, 0, 113, 255)),
            city_id: AGENT_CITY,
            last_check_time: now,
        },
        IpRange {
            start_ip: u32::from(Ipv4Addr::new(198, 18, 0, 0)),
            end_ip: u32::from(Ipv4Addr::new(198, 18, 127, 255)),
            city_id: TARGET_CITY,
            last_check_time: now - Duration::days(30),
        },
    ]
}

/// Seeded in-memory store
pub fn memory_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    for asn in test_asns() {
        store.add_asn(&asn).unwrap();
    }
    for city in test_cities() {
        store.add_city(&city).unwrap();
    }
    for range in test_ranges() {
        store.add_range(&range).unwrap();
    }
    store
}

/// Seeded SQLite store in a temporary directory
pub fn sqlite_store(dir: &tempfile::TempDir) -> Arc<SqliteStore> {
    let store = Arc::new(SqliteStore::open(dir.path().join("cloudperf.db")).unwrap());
    for asn in test_asns() {
        store.add_asn(&asn).unwrap();
    }
    for city in test_cities() {
        store.add_city(&city).unwrap();
    }
    for range in test_ranges() {
        store.add_range(&range).unwrap();
    }
    store
}

/// Results body for one discovery job
pub fn discovery_result(city_id: CityId, addresses: &[Ipv4Addr]) -> String {
    let stdout: String = addresses.iter().map(|a| format!("{a}\n")).collect();
    serde_json::json!([{
        "jobId": format!("ping{city_id}"),
        "status": 0,
        "stdout": stdout,
        "stderr": "",
    }])
    .to_string()
}

/// Results body for one latency job
pub fn latency_result(city_id: CityId, samples_ms: &[f64]) -> String {
    let samples: Vec<String> = samples_ms.iter().map(|s| s.to_string()).collect();
    serde_json::json!([{
        "jobId": format!("data{city_id}"),
        "status": 0,
        "stdout": "",
        "stderr": format!("198.18.0.1 : {}\n", samples.join(" ")),
    }])
    .to_string()
}
