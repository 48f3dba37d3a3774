//! Long-poll protocol between the coordinator and fping agents
//!
//! Every poll runs two phases and keeps no state between polls:
//!
//! ```text
//!   AgentRequest
//!        |
//!        v
//!   [ingest]   POST body -> JobResult[] -> JobId
//!        |       ping<city>  stdout -> PingableTracker::mark_discovered
//!        |       data<city>  stderr -> stats::aggregate -> StatisticsRepository
//!        v
//!   [dispatch] role = hint | user agent prefix
//!        |       discovery   RangeScheduler::refresh, JobQueue::pop
//!        |       data        PendingJobSource::pull, PingableTracker::list_pingable
//!        v
//!   PollResponse { job, next, interval, status }
//! ```
//!
//! Neither phase fails the poll. Bad entries are skipped one by one and a
//! backend failure during dispatch yields an idle response.

pub mod command;
pub mod ingest;
pub mod job_id;
pub mod types;

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use chrono::Utc;

use crate::metrics;
use crate::models::{CityId, JobMessage};
use crate::pending::PendingJobSource;
use crate::queue::JobQueue;
use crate::scheduler::{RangeScheduler, RefreshOutcome};
use crate::stats;
use crate::storage::{CatalogRepository, Repositories, StatisticsRepository};
use crate::tracker::PingableTracker;

pub use command::{discovery_command, latency_command};
pub use ingest::{discovered_addresses, latency_samples, parse_results};
pub use job_id::JobId;
pub use types::{
    AgentRequest, AgentRole, IngestReport, JobCommand, JobResult, PollResponse, ProtocolSettings,
};

/// HTTP-style status reported in every poll response
const STATUS_OK: u16 = 200;

/// Source city of a poll, resolved at most once per poll
///
/// `None` until looked up; `Some(None)` when the address has no city.
type SourceCity = Option<Option<CityId>>;

/// Poll handler shared by all coordinator requests
#[derive(Clone)]
pub struct AgentProtocol {
    catalog: Arc<dyn CatalogRepository>,
    statistics: Arc<dyn StatisticsRepository>,
    tracker: PingableTracker,
    scheduler: RangeScheduler,
    queue: Arc<dyn JobQueue>,
    pending: Arc<dyn PendingJobSource>,
    settings: ProtocolSettings,
}

impl AgentProtocol {
    pub fn new(
        repositories: &Repositories,
        tracker: PingableTracker,
        scheduler: RangeScheduler,
        queue: Arc<dyn JobQueue>,
        pending: Arc<dyn PendingJobSource>,
        settings: ProtocolSettings,
    ) -> Self {
        Self {
            catalog: repositories.catalog.clone(),
            statistics: repositories.statistics.clone(),
            tracker,
            scheduler,
            queue,
            pending,
            settings,
        }
    }

    pub fn settings(&self) -> &ProtocolSettings {
        &self.settings
    }

    /// Role of the polling agent: explicit hint first, then user agent prefix
    pub fn resolve_role(&self, request: &AgentRequest) -> AgentRole {
        request
            .role_hint
            .unwrap_or_else(|| self.settings.role_for_user_agent(&request.user_agent))
    }

    /// Handle one poll: apply the posted results, then hand out new jobs
    pub async fn handle_poll(&self, request: &AgentRequest) -> PollResponse {
        let role = self.resolve_role(request);
        let _timer = metrics::start_poll_timer(role.label());
        metrics::record_poll(role.label());

        let mut source_city: SourceCity = None;

        if let Some(body) = request.results_body() {
            let report = self.ingest(body, request.source_ip, &mut source_city);
            tracing::debug!(
                role = role.label(),
                discovered = report.discovered,
                rows = report.rows,
                skipped = report.skipped,
                "Ingested agent results"
            );
        }

        let job = match role {
            AgentRole::Discovery => self.dispatch_discovery().await,
            AgentRole::Data => self.dispatch_data(request.source_ip, &mut source_city).await,
        };
        metrics::record_jobs_dispatched(role.label(), job.len());

        self.respond(role, job)
    }

    fn respond(&self, role: AgentRole, job: Vec<JobCommand>) -> PollResponse {
        let (next, interval) = if job.is_empty() {
            (String::new(), self.settings.idle_interval)
        } else {
            (role.next_tag().to_string(), self.settings.busy_interval)
        };

        PollResponse {
            job,
            next,
            interval,
            status: STATUS_OK,
        }
    }

    // ========================================================================
    // Ingest
    // ========================================================================

    /// Apply a results body; malformed bodies and entries are skipped
    pub fn ingest_results(&self, body: &str, source_ip: Option<IpAddr>) -> IngestReport {
        let mut source_city = None;
        self.ingest(body, source_ip, &mut source_city)
    }

    fn ingest(
        &self,
        body: &str,
        source_ip: Option<IpAddr>,
        source_city: &mut SourceCity,
    ) -> IngestReport {
        let mut report = IngestReport::default();

        let entries = match parse_results(body) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(error = %e, "Discarding malformed results body");
                return report;
            }
        };

        for entry in &entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::debug!(error = %e, "Skipping malformed result entry");
                    report.skipped += 1;
                    continue;
                }
            };

            let job_id = match entry.job_id.parse::<JobId>() {
                Ok(id) => id,
                Err(e) => {
                    tracing::debug!(error = %e, "Skipping result with invalid job id");
                    report.skipped += 1;
                    continue;
                }
            };

            match job_id {
                JobId::Discovery { city_id } => {
                    let found = discovered_addresses(&entry.stdout);
                    report.discovered += self.tracker.mark_discovered_many(city_id, found);
                }
                JobId::Sample { city_id } => {
                    match self.ingest_samples(city_id, &entry.stderr, source_ip, source_city) {
                        Some(true) => report.rows += 1,
                        Some(false) => {}
                        None => report.skipped += 1,
                    }
                }
            }
        }

        metrics::record_results_ingested("discovery", report.discovered);
        metrics::record_results_ingested("latency", report.rows);
        metrics::record_results_skipped(report.skipped);

        report
    }

    /// Fold one latency result into the statistics of `(source, dist_city_id)`
    ///
    /// `Some(true)` when a row was written, `Some(false)` when there were no
    /// samples, `None` when the entry had to be skipped.
    fn ingest_samples(
        &self,
        dist_city_id: CityId,
        stderr: &str,
        source_ip: Option<IpAddr>,
        source_city: &mut SourceCity,
    ) -> Option<bool> {
        let samples = latency_samples(stderr);
        let Some(summary) = stats::aggregate(&samples) else {
            return Some(false);
        };

        let Some(src_city_id) = self.source_city(source_ip, source_city) else {
            tracing::debug!(
                source_ip = ?source_ip,
                dist_city_id,
                "Skipping latency result from unknown source city"
            );
            return None;
        };

        let row = summary.into_row(src_city_id, dist_city_id, Utc::now());
        match self.statistics.upsert(&row) {
            Ok(()) => Some(true),
            Err(e) => {
                tracing::warn!(
                    src_city_id,
                    dist_city_id,
                    error = %e,
                    "Failed to store latency statistics"
                );
                None
            }
        }
    }

    /// City of the polling agent, looked up once per poll
    fn source_city(&self, source_ip: Option<IpAddr>, cached: &mut SourceCity) -> Option<CityId> {
        if let Some(city) = *cached {
            return city;
        }

        let city = source_ip.and_then(to_ipv4).and_then(|ip| {
            self.catalog
                .city_id_by_ip(ip)
                .map_err(|e| tracing::warn!(%ip, error = %e, "Failed to resolve source city"))
                .ok()
                .flatten()
        });
        *cached = Some(city);
        city
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    async fn dispatch_discovery(&self) -> Vec<JobCommand> {
        match self.scheduler.refresh().await {
            Ok(outcome) => {
                metrics::record_refresh(outcome.label());
                if let RefreshOutcome::Skipped { depth } = outcome {
                    metrics::set_queue_depth(depth);
                }
            }
            Err(e) => {
                metrics::record_refresh("failed");
                tracing::warn!(error = %e, "Range refresh failed, serving queued jobs");
            }
        }

        let mut jobs = Vec::new();
        while jobs.len() < self.settings.discovery_batch {
            let message = match self.queue.pop().await {
                Ok(Some(message)) => message,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to pop discovery job");
                    break;
                }
            };

            let JobMessage::Discovery {
                start_ip,
                end_ip,
                city_id,
            } = message;
            jobs.push(JobCommand {
                job_id: JobId::discovery(city_id),
                command: discovery_command(
                    Ipv4Addr::from(start_ip),
                    Ipv4Addr::from(end_ip),
                    self.settings.max_found,
                ),
            });
        }

        jobs
    }

    async fn dispatch_data(
        &self,
        source_ip: Option<IpAddr>,
        source_city: &mut SourceCity,
    ) -> Vec<JobCommand> {
        let Some(src_city_id) = self.source_city(source_ip, source_city) else {
            tracing::debug!(source_ip = ?source_ip, "No city for data agent, nothing to dispatch");
            return Vec::new();
        };

        let destinations = match self.pending.pull(src_city_id, self.settings.data_batch).await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::warn!(src_city_id, error = %e, "Failed to pull pending latency jobs");
                return Vec::new();
            }
        };

        let mut jobs = Vec::with_capacity(destinations.len());
        for dist_city_id in destinations {
            let targets = match self
                .tracker
                .list_pingable(dist_city_id, self.settings.targets_per_job)
            {
                Ok(targets) => targets,
                Err(e) => {
                    tracing::warn!(dist_city_id, error = %e, "Failed to list pingable addresses");
                    continue;
                }
            };

            if targets.is_empty() {
                tracing::debug!(dist_city_id, "No pingable addresses, dropping latency job");
                continue;
            }

            jobs.push(JobCommand {
                job_id: JobId::sample(dist_city_id),
                command: latency_command(&targets, self.settings.sample_count),
            });
        }

        jobs
    }
}

/// IPv4 view of an address, unwrapping IPv4-mapped IPv6
fn to_ipv4(ip: IpAddr) -> Option<Ipv4Addr> {
    match ip {
        IpAddr::V4(v4) => Some(v4),
        IpAddr::V6(v6) => v6.to_ipv4_mapped(),
    }
}
