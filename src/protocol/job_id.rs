//! Job identifiers exchanged with agents
//!
//! A job id is a four character tag followed by the decimal city id the job
//! belongs to: `ping42` is a discovery job for city 42, `data7` a latency
//! job towards city 7.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::Error;
use crate::models::CityId;

const DISCOVERY_TAG: &str = "ping";
const SAMPLE_TAG: &str = "data";

/// Parsed job id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobId {
    /// Reachability scan of a range owned by `city_id`
    Discovery { city_id: CityId },
    /// Latency samples towards the addresses of `city_id`
    Sample { city_id: CityId },
}

impl JobId {
    pub fn discovery(city_id: CityId) -> Self {
        Self::Discovery { city_id }
    }

    pub fn sample(city_id: CityId) -> Self {
        Self::Sample { city_id }
    }

    pub fn city_id(&self) -> CityId {
        match self {
            Self::Discovery { city_id } | Self::Sample { city_id } => *city_id,
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Self::Discovery { .. } => DISCOVERY_TAG,
            Self::Sample { .. } => SAMPLE_TAG,
        }
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.tag(), self.city_id())
    }
}

impl FromStr for JobId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| Error::InvalidJobId {
            id: s.to_string(),
            reason: reason.to_string(),
        };

        let (tag, digits) = match (s.get(..4), s.get(4..)) {
            (Some(tag), Some(digits)) => (tag, digits),
            _ => return Err(invalid("shorter than the tag")),
        };

        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid("city id is not a decimal number"));
        }
        let city_id: CityId = digits
            .parse()
            .map_err(|_| invalid("city id out of range"))?;

        match tag {
            DISCOVERY_TAG => Ok(Self::Discovery { city_id }),
            SAMPLE_TAG => Ok(Self::Sample { city_id }),
            _ => Err(invalid("unknown tag")),
        }
    }
}

impl Serialize for JobId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for JobId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tags() {
        assert_eq!("ping42".parse::<JobId>().unwrap(), JobId::discovery(42));
        assert_eq!("data7".parse::<JobId>().unwrap(), JobId::sample(7));
    }

    #[test]
    fn test_display_matches_wire_format() {
        assert_eq!(JobId::discovery(1234).to_string(), "ping1234");
        assert_eq!(JobId::sample(0).to_string(), "data0");
    }

    #[test]
    fn test_rejects_malformed_ids() {
        for raw in ["", "pin", "ping", "pong12", "ping-3", "ping+3", "data1x", "ping 1", "ping99999999999999999999"] {
            let err = raw.parse::<JobId>().unwrap_err();
            assert!(matches!(err, Error::InvalidJobId { .. }), "{raw} should be rejected");
        }
    }

    #[test]
    fn test_multibyte_input_does_not_panic() {
        assert!("pi\u{e9}g1".parse::<JobId>().is_err());
        assert!("\u{1F600}1".parse::<JobId>().is_err());
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&JobId::sample(9)).unwrap();
        assert_eq!(json, "\"data9\"");
        let back: JobId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, JobId::sample(9));
    }
}
