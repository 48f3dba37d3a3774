// Core data structures shared by the tracker, scheduler, protocol and stores

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

/// City identifier as stored in the catalog
pub type CityId = i64;

/// Contiguous IPv4 block owned by one city
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpRange {
    pub start_ip: u32,
    pub end_ip: u32,
    pub city_id: CityId,
    pub last_check_time: DateTime<Utc>,
}

impl IpRange {
    /// Number of addresses covered, inclusive of both ends
    pub fn len(&self) -> u64 {
        if self.end_ip < self.start_ip {
            0
        } else {
            u64::from(self.end_ip) - u64::from(self.start_ip) + 1
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check if an address falls inside the range
    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        let ip = u32::from(ip);
        self.start_ip <= ip && ip <= self.end_ip
    }
}

/// Liveness state of one reachable address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingableRecord {
    pub ip: u32,
    pub city_id: CityId,
    /// Sliding window of recent observations, most significant bit = most recent
    pub liveness_mask: u8,
}

impl PingableRecord {
    pub fn address(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.ip)
    }
}

/// Discovery work item: probe `[start_ip, end_ip]` for reachable addresses
///
/// Serialized as `{"type":"pingable","start_ip":..,"end_ip":..,"city_id":..}`,
/// the payload format shared with other producers of the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum JobMessage {
    #[serde(rename = "pingable")]
    Discovery {
        start_ip: u32,
        end_ip: u32,
        city_id: CityId,
    },
}

impl JobMessage {
    /// Create a discovery message
    pub fn discovery(start_ip: u32, end_ip: u32, city_id: CityId) -> Self {
        Self::Discovery {
            start_ip,
            end_ip,
            city_id,
        }
    }

    pub fn city_id(&self) -> CityId {
        match self {
            Self::Discovery { city_id, .. } => *city_id,
        }
    }
}

/// Durable per city pair latency aggregate (all latency fields in microseconds)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatisticsRow {
    pub src_city_id: CityId,
    pub dist_city_id: CityId,
    pub samples: i64,
    pub latency_min: i64,
    pub latency_max: i64,
    pub latency_avg: i64,
    pub latency_p50: i64,
    pub latency_p70: i64,
    pub latency_p90: i64,
    pub latency_p95: i64,
    pub update_time: DateTime<Utc>,
}

/// Catalog view of a city joined with its ASN
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CityObject {
    pub city_id: CityId,
    pub asn: i64,
    pub country: String,
    /// Friendly name when one is set, otherwise the raw city name
    pub name: String,
    pub region: Option<String>,
    pub asn_name: Option<String>,
    pub domain: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub asn_type: Option<String>,
    pub ip_counts: Option<i64>,
    pub start_ip: Option<u32>,
    pub end_ip: Option<u32>,
}

impl CityObject {
    /// Label used for per-ASN breakdowns
    pub fn asn_label(&self) -> String {
        format!("AS{}", self.asn)
    }
}

/// Fresh vs. outdated address range counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RangeCounts {
    pub ready: u64,
    pub outdated: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discovery_message_wire_format() {
        let msg = JobMessage::discovery(16384, 32767, 42);
        let json = serde_json::to_value(msg).unwrap();

        assert_eq!(json["type"], "pingable");
        assert_eq!(json["start_ip"], 16384);
        assert_eq!(json["end_ip"], 32767);
        assert_eq!(json["city_id"], 42);
    }

    #[test]
    fn test_discovery_message_from_foreign_producer() {
        let raw = r#"{"type": "pingable", "start_ip": 1, "end_ip": 2, "city_id": 7}"#;
        let msg: JobMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(msg, JobMessage::discovery(1, 2, 7));
        assert_eq!(msg.city_id(), 7);
    }

    #[test]
    fn test_ip_range_len_and_contains() {
        let range = IpRange {
            start_ip: u32::from(Ipv4Addr::new(10, 0, 0, 0)),
            end_ip: u32::from(Ipv4Addr::new(10, 0, 0, 255)),
            city_id: 1,
            last_check_time: Utc::now(),
        };

        assert_eq!(range.len(), 256);
        assert!(range.contains(Ipv4Addr::new(10, 0, 0, 17)));
        assert!(!range.contains(Ipv4Addr::new(10, 0, 1, 0)));
    }

    #[test]
    fn test_full_address_space_len() {
        let range = IpRange {
            start_ip: 0,
            end_ip: u32::MAX,
            city_id: 1,
            last_check_time: Utc::now(),
        };
        assert_eq!(range.len(), 1u64 << 32);
    }
}
