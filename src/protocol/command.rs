//! fping command lines handed to agents

use std::net::Ipv4Addr;

/// Scan `[start, end]` once with two retries and print the reachable hosts,
/// stopping after `max_found` of them
pub fn discovery_command(start: Ipv4Addr, end: Ipv4Addr, max_found: u32) -> String {
    format!("fping -g {start} {end} -r 2 -a -q -X {max_found}")
}

/// Send `count` probes to each address and report per-address samples on stderr
pub fn latency_command(addresses: &[Ipv4Addr], count: u32) -> String {
    std::iter::once(format!("fping -q -C {count}"))
        .chain(addresses.iter().map(ToString::to_string))
        .collect::<Vec<_>>()
        .join(" ")
}
