//! Latency percentiles and cross-city rollups
//!
//! Agents report raw round-trip samples in milliseconds. [`aggregate`] folds
//! one sample set into integer microsecond statistics; [`rollup_cross_city`]
//! combines stored rows into sample-weighted summaries per ASN and per city.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

use crate::models::{CityId, CityObject, StatisticsRow};

/// Linear-interpolated percentile of an ascending slice
///
/// The rank is `p / 100 * (n - 1)`; the result interpolates between the
/// samples at the floor and ceiling of that rank. `None` for empty input.
pub fn percentile(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }

    let p = p.clamp(0.0, 100.0);
    let rank = p * (sorted.len() - 1) as f64 / 100.0;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;

    if lo == hi {
        return Some(sorted[lo]);
    }
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64))
}

/// Statistics of one sample set, latencies in microseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatencySummary {
    pub count: i64,
    pub min: i64,
    pub max: i64,
    pub avg: i64,
    pub p50: i64,
    pub p70: i64,
    pub p90: i64,
    pub p95: i64,
}

impl LatencySummary {
    /// Durable row for a city pair
    pub fn into_row(
        self,
        src_city_id: CityId,
        dist_city_id: CityId,
        update_time: DateTime<Utc>,
    ) -> StatisticsRow {
        StatisticsRow {
            src_city_id,
            dist_city_id,
            samples: self.count,
            latency_min: self.min,
            latency_max: self.max,
            latency_avg: self.avg,
            latency_p50: self.p50,
            latency_p70: self.p70,
            latency_p90: self.p90,
            latency_p95: self.p95,
            update_time,
        }
    }
}

/// Milliseconds to truncated microseconds
fn to_micros(ms: f64) -> i64 {
    (ms * 1000.0) as i64
}

/// Summarize millisecond samples; `None` when there are none
///
/// Non-finite values are ignored.
pub fn aggregate(samples_ms: &[f64]) -> Option<LatencySummary> {
    let mut sorted: Vec<f64> = samples_ms.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(f64::total_cmp);

    let at = |p: f64| percentile(&sorted, p).map_or(0, to_micros);

    Some(LatencySummary {
        count: sorted.len() as i64,
        min: to_micros(Statistics::min(sorted.iter())),
        max: to_micros(Statistics::max(sorted.iter())),
        avg: to_micros(Statistics::mean(sorted.iter())),
        p50: at(50.0),
        p70: at(70.0),
        p90: at(90.0),
        p95: at(95.0),
    })
}

/// Sample-weighted averages over many rows, in microseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightedLatency {
    pub samples: i64,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub p50: f64,
    pub p70: f64,
    pub p90: f64,
    pub p95: f64,
}

/// Weighted p70 of one ASN or city
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencyBreakdown {
    pub label: String,
    pub samples: i64,
    pub avg_latency: f64,
}

/// p70 of one stored city pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairLatency {
    pub src_city_id: CityId,
    pub dist_city_id: CityId,
    pub samples: i64,
    pub latency: i64,
}

/// Result of [`rollup_cross_city`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrossCityRollup {
    pub overall: WeightedLatency,
    pub asn_data: Vec<LatencyBreakdown>,
    pub city_data: Vec<LatencyBreakdown>,
    pub latency_data: Vec<PairLatency>,
}

#[derive(Default)]
struct WeightedSum {
    samples: i64,
    total: f64,
}

impl WeightedSum {
    fn add(&mut self, value: i64, samples: i64) {
        self.samples += samples;
        self.total += value as f64 * samples as f64;
    }

    fn mean(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.total / self.samples as f64
        }
    }
}

fn breakdown(sums: BTreeMap<String, WeightedSum>) -> Vec<LatencyBreakdown> {
    sums.into_iter()
        .map(|(label, sum)| LatencyBreakdown {
            label,
            samples: sum.samples,
            avg_latency: sum.mean(),
        })
        .collect()
}

/// Combine statistics rows into overall, per-ASN and per-city summaries
///
/// Rows whose source or destination is missing from `cities` are skipped.
/// Both endpoints of a row contribute its p70 to the ASN and city breakdowns;
/// breakdown entries are sorted by label.
pub fn rollup_cross_city(
    rows: &[StatisticsRow],
    cities: &HashMap<CityId, CityObject>,
) -> CrossCityRollup {
    let fields = |r: &StatisticsRow| {
        [
            r.latency_min,
            r.latency_max,
            r.latency_avg,
            r.latency_p50,
            r.latency_p70,
            r.latency_p90,
            r.latency_p95,
        ]
    };

    let mut overall: [WeightedSum; 7] = Default::default();
    let mut by_asn: BTreeMap<String, WeightedSum> = BTreeMap::new();
    let mut by_city: BTreeMap<String, WeightedSum> = BTreeMap::new();
    let mut latency_data = Vec::new();

    for row in rows {
        let (Some(src), Some(dist)) = (cities.get(&row.src_city_id), cities.get(&row.dist_city_id))
        else {
            continue;
        };

        for (sum, value) in overall.iter_mut().zip(fields(row)) {
            sum.add(value, row.samples);
        }

        for city in [src, dist] {
            by_asn
                .entry(city.asn_label())
                .or_default()
                .add(row.latency_p70, row.samples);
            by_city
                .entry(city.name.clone())
                .or_default()
                .add(row.latency_p70, row.samples);
        }

        latency_data.push(PairLatency {
            src_city_id: row.src_city_id,
            dist_city_id: row.dist_city_id,
            samples: row.samples,
            latency: row.latency_p70,
        });
    }

    let [min, max, avg, p50, p70, p90, p95] = overall.map(|s| s.mean());

    CrossCityRollup {
        overall: WeightedLatency {
            samples: overall_samples(rows, cities),
            min,
            max,
            avg,
            p50,
            p70,
            p90,
            p95,
        },
        asn_data: breakdown(by_asn),
        city_data: breakdown(by_city),
        latency_data,
    }
}

fn overall_samples(rows: &[StatisticsRow], cities: &HashMap<CityId, CityObject>) -> i64 {
    rows.iter()
        .filter(|r| cities.contains_key(&r.src_city_id) && cities.contains_key(&r.dist_city_id))
        .map(|r| r.samples)
        .sum()
}
