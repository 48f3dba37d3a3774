//! Per-address liveness tracking
//!
//! [`PingableTracker`] applies discovery results and decay passes to the
//! pingable store through [`LivenessWindow`] semantics: a discovery sets the
//! window's top bit, a decay shifts it, and a record that reaches zero is
//! removed by the store in the same operation.

use std::net::Ipv4Addr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::liveness::{LivenessBand, LivenessWindow, DEFAULT_WIDTH};
use crate::models::{CityId, PingableRecord};
use crate::storage::{PingableRepository, ShiftOutcome};

/// Number of live records per liveness band
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LivenessCounts {
    pub stable: u64,
    pub new: u64,
    pub loss: u64,
}

impl LivenessCounts {
    pub fn total(&self) -> u64 {
        self.stable + self.new + self.loss
    }
}

/// Liveness state manager over a pingable store
#[derive(Clone)]
pub struct PingableTracker {
    store: Arc<dyn PingableRepository>,
    width: u8,
}

impl PingableTracker {
    /// Create a tracker with the default 8-bit window
    pub fn new(store: Arc<dyn PingableRepository>) -> Self {
        Self {
            store,
            width: DEFAULT_WIDTH,
        }
    }

    /// Create a tracker with a custom window width
    pub fn with_width(store: Arc<dyn PingableRepository>, width: u8) -> Result<Self> {
        LivenessWindow::new(width)?;
        Ok(Self { store, width })
    }

    pub fn width(&self) -> u8 {
        self.width
    }

    /// Record that `ip` answered in the current round
    ///
    /// Repeated calls before the next decay leave the mask unchanged.
    pub fn mark_discovered(&self, city_id: CityId, ip: Ipv4Addr) -> Result<()> {
        let window = LivenessWindow::new(self.width)?;
        self.store.observe(city_id, u32::from(ip), window.top_bit())
    }

    /// Apply a batch of discoveries; failures are logged and skipped
    ///
    /// Returns the number of addresses applied.
    pub fn mark_discovered_many<I>(&self, city_id: CityId, ips: I) -> usize
    where
        I: IntoIterator<Item = Ipv4Addr>,
    {
        let mut applied = 0;
        for ip in ips {
            match self.mark_discovered(city_id, ip) {
                Ok(()) => applied += 1,
                Err(e) => {
                    tracing::warn!(city_id, ip = %ip, error = %e, "Failed to record discovery");
                }
            }
        }
        applied
    }

    /// Age every record of the city inside the range by one round
    pub fn decay_range(&self, city_id: CityId, start_ip: u32, end_ip: u32) -> Result<ShiftOutcome> {
        let outcome = self.store.shift_range(city_id, start_ip, end_ip)?;

        tracing::debug!(
            city_id,
            start_ip = %Ipv4Addr::from(start_ip),
            end_ip = %Ipv4Addr::from(end_ip),
            shifted = outcome.shifted,
            reaped = outcome.reaped,
            "Decayed liveness range"
        );

        Ok(outcome)
    }

    /// Reachable addresses of a city, in no particular order
    pub fn list_pingable(&self, city_id: CityId, limit: usize) -> Result<Vec<Ipv4Addr>> {
        Ok(self
            .store
            .list_alive(city_id, limit)?
            .into_iter()
            .map(Ipv4Addr::from)
            .collect())
    }

    /// Liveness window of one address, if it is tracked
    pub fn liveness(&self, city_id: CityId, ip: Ipv4Addr) -> Result<Option<LivenessWindow>> {
        self.store
            .record(city_id, u32::from(ip))?
            .map(|PingableRecord { liveness_mask, .. }| {
                LivenessWindow::from_bits(liveness_mask, self.width)
            })
            .transpose()
    }

    /// Count live records per band
    pub fn liveness_counts(&self) -> Result<LivenessCounts> {
        let mut counts = LivenessCounts::default();

        for (bits, count) in self.store.mask_histogram()? {
            match LivenessWindow::from_bits(bits, self.width)?.band() {
                Some(LivenessBand::Stable) => counts.stable += count,
                Some(LivenessBand::New) => counts.new += count,
                Some(LivenessBand::Loss) => counts.loss += count,
                None => {}
            }
        }

        Ok(counts)
    }

    /// Number of cities with at least one reachable address
    pub fn cities_with_pingable(&self) -> Result<u64> {
        self.store.cities_with_pingable()
    }
}
