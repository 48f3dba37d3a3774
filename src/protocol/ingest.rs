//! Parsing of agent result payloads
//!
//! Agents post back raw fping output. Discovery jobs report one reachable
//! address per stdout line; latency jobs report `addr : s1 s2 ...` lines on
//! stderr where lost probes show as `-`.

use std::net::Ipv4Addr;

use crate::error::{Error, Result};

use super::JobResult;

/// Marker of diagnostic lines some agents interleave with the address list
const DEBUG_MARKER: &str = "[DEBUG]";

/// Decode a results body into its entries
///
/// The body must be a JSON array. Each element is decoded on its own so a
/// malformed element only loses itself; those come back as `Err`.
pub fn parse_results(body: &str) -> Result<Vec<Result<JobResult>>> {
    let elements: Vec<serde_json::Value> = serde_json::from_str(body)?;
    Ok(elements
        .into_iter()
        .map(|element| serde_json::from_value(element).map_err(Error::from))
        .collect())
}

/// Reachable addresses reported on a discovery job's stdout
pub fn discovered_addresses(stdout: &str) -> Vec<Ipv4Addr> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with(DEBUG_MARKER))
        .filter_map(|line| line.parse().ok())
        .collect()
}

/// Latency samples in milliseconds reported on a latency job's stderr
pub fn latency_samples(stderr: &str) -> Vec<f64> {
    stderr
        .split_whitespace()
        .filter_map(|token| token.parse::<f64>().ok())
        .filter(|value| value.is_finite())
        .collect()
}
