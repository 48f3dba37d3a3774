//! Test fixtures for integration tests
//!
//! Raw agent output as fping prints it

/// `fping -g ... -a -q` output of a discovery agent with debug tracing enabled
pub const DISCOVERY_STDOUT: &str = "198.18.0.1
198.18.0.7
[DEBUG] retry 2 for 198.18.0.9

198.18.0.12
";

/// Reachable addresses in [`DISCOVERY_STDOUT`]
pub const DISCOVERED: [&str; 3] = ["198.18.0.1", "198.18.0.7", "198.18.0.12"];

/// `fping -q -C 11` stderr with one lost probe per host
pub const LATENCY_STDERR: &str = "198.18.0.1  : 10.0 12.0 11.0 13.0 9.0 - 14.0 10.0 11.0 12.0 13.0
198.18.0.7  : 15.0 - - - - - - - - - -
";

/// Samples in [`LATENCY_STDERR`], in milliseconds
pub const LATENCY_SAMPLES: [f64; 11] = [10.0, 12.0, 11.0, 13.0, 9.0, 14.0, 10.0, 11.0, 12.0, 13.0, 15.0];

/// Body mixing valid and malformed entries
pub const MIXED_RESULTS: &str = r#"[
    {"jobId": "ping2", "status": 0, "stdout": "198.18.0.1\n", "stderr": ""},
    {"jobId": "pong2", "status": 0, "stdout": "198.18.0.2\n", "stderr": ""},
    {"jobid": "ping", "status": 0, "stdout": "198.18.0.3\n", "stderr": ""},
    {"jobId": "ping2x", "status": 0, "stdout": "198.18.0.4\n", "stderr": ""},
    {"jobId": "ping2", "status": 1, "stdout": "not-an-ip\n", "stderr": ""}
]"#;

pub const DISCOVERY_UA: &str = "fping-watchmen/2.1";
pub const DATA_UA: &str = "fping-agent/2.1";
