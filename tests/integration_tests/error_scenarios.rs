//! Error scenario integration tests
//!
//! Agents send whatever they send and backends fail; a poll must still
//! produce a well-formed response.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use async_trait::async_trait;
use cloudperf::cache::OptionalCache;
use cloudperf::config::Config;
use cloudperf::engine::Engine;
use cloudperf::error::{Error, Result};
use cloudperf::models::JobMessage;
use cloudperf::pending::MemoryPendingJobs;
use cloudperf::protocol::AgentRequest;
use cloudperf::queue::{JobQueue, MemoryJobQueue};
use cloudperf::scheduler::RefreshOutcome;
use cloudperf::storage::{PingableRepository, Repositories, StatisticsRepository};

use super::fixtures::*;
use crate::common::{agent_ip, latency_result, memory_store, AGENT_CITY, TARGET_CITY};

/// Queue whose backend is unreachable
struct UnreachableQueue;

#[async_trait]
impl JobQueue for UnreachableQueue {
    async fn push_chunk(&self, _items: &[JobMessage]) -> Result<()> {
        Err(Error::queue("connection refused"))
    }

    async fn pop(&self) -> Result<Option<JobMessage>> {
        Err(Error::queue("connection refused"))
    }

    async fn depth(&self) -> Result<usize> {
        Err(Error::queue("connection refused"))
    }

    fn backend_name(&self) -> &'static str {
        "unreachable"
    }
}

fn engine_with_queue(queue: Arc<dyn JobQueue>) -> (Arc<cloudperf::storage::MemoryStore>, Engine) {
    let store = memory_store();
    let engine = Engine::new(
        Repositories::from_store(store.clone()),
        queue,
        Arc::new(MemoryPendingJobs::new()),
        OptionalCache::disabled(),
        &Config::default(),
    )
    .unwrap();
    (store, engine)
}

// ============================================================================
// Malformed Agent Input
// ============================================================================

#[tokio::test]
async fn test_malformed_body_still_dispatches() {
    let (store, engine) = engine_with_queue(Arc::new(MemoryJobQueue::default()));

    let request = AgentRequest::post(DISCOVERY_UA, None, "{not json".to_string());
    let response = engine.handle_poll(&request).await;

    assert_eq!(response.status, 200);
    assert_eq!(response.job.len(), 2);
    assert_eq!(store.pingable_len().unwrap(), 0);
}

#[tokio::test]
async fn test_mixed_entries_skip_bad_ids() {
    let (store, engine) = engine_with_queue(Arc::new(MemoryJobQueue::default()));

    let report = engine.protocol().ingest_results(MIXED_RESULTS, None);

    assert_eq!(report.discovered, 1);
    assert_eq!(report.skipped, 3);
    assert_eq!(report.rows, 0);
    assert_eq!(store.pingable_len().unwrap(), 1);
    assert!(store
        .record(TARGET_CITY, u32::from(Ipv4Addr::new(198, 18, 0, 1)))
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_latency_from_unknown_network_is_skipped() {
    let (store, engine) = engine_with_queue(Arc::new(MemoryJobQueue::default()));
    let body = latency_result(TARGET_CITY, &[10.0, 11.0]);

    let outside = Some(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)));
    let report = engine.protocol().ingest_results(&body, outside);
    assert_eq!((report.rows, report.skipped), (0, 1));

    let report = engine.protocol().ingest_results(&body, None);
    assert_eq!((report.rows, report.skipped), (0, 1));

    assert_eq!(store.pair_count().unwrap(), 0);
}

#[tokio::test]
async fn test_latency_without_samples_writes_nothing() {
    let (store, engine) = engine_with_queue(Arc::new(MemoryJobQueue::default()));
    let body = serde_json::json!([{
        "jobId": "data2",
        "status": 1,
        "stdout": "",
        "stderr": "198.18.0.1 : - - - - - - - - - - -",
    }])
    .to_string();

    let report = engine
        .protocol()
        .ingest_results(&body, Some(IpAddr::V4(agent_ip())));

    assert_eq!(report.rows, 0);
    assert_eq!(report.skipped, 0);
    assert!(store.row(AGENT_CITY, TARGET_CITY).unwrap().is_none());
}

#[tokio::test]
async fn test_empty_post_body_is_a_plain_poll() {
    let (_store, engine) = engine_with_queue(Arc::new(MemoryJobQueue::default()));

    let request = AgentRequest::post(DATA_UA, Some(IpAddr::V4(agent_ip())), "   ".to_string());
    assert!(request.results_body().is_none());

    let response = engine.handle_poll(&request).await;
    assert!(response.is_idle());
}

// ============================================================================
// Queue Failures
// ============================================================================

#[tokio::test]
async fn test_unreachable_queue_yields_idle_discovery_poll() {
    let (store, engine) = engine_with_queue(Arc::new(UnreachableQueue));

    let response = engine
        .handle_poll(&AgentRequest::get(DISCOVERY_UA, None))
        .await;

    assert!(response.is_idle());
    assert_eq!(response.status, 200);
    assert_eq!(response.interval, 3600);
    // Backlog unknown: no catalog query, nothing decayed or touched
    assert_eq!(store.catalog_queries(), 0);

    assert!(engine.refresh().await.is_err());
    assert!(engine.status().await.is_err());
}

#[tokio::test]
async fn test_unreachable_queue_does_not_block_ingest_or_data_jobs() {
    let (store, engine) = engine_with_queue(Arc::new(UnreachableQueue));
    let agent = Some(IpAddr::V4(agent_ip()));
    store
        .observe(TARGET_CITY, u32::from(Ipv4Addr::new(198, 18, 0, 1)), 0x80)
        .unwrap();
    engine.enqueue_pending(AGENT_CITY, &[TARGET_CITY]).await.unwrap();

    let body = latency_result(TARGET_CITY, &[12.0]);
    let response = engine
        .handle_poll(&AgentRequest::post(DATA_UA, agent, body))
        .await;

    assert_eq!(response.job.len(), 1);
    assert_eq!(store.pair_count().unwrap(), 1);
}

#[tokio::test]
async fn test_full_queue_reports_partial_refresh() {
    let (_store, engine) = engine_with_queue(Arc::new(MemoryJobQueue::new(1)));

    let outcome = engine.refresh().await.unwrap();
    match &outcome {
        RefreshOutcome::Enqueued { ranges, batch } => {
            assert_eq!(*ranges, 1);
            assert_eq!(batch.failed.len(), 2);
            assert!(batch.succeeded.is_empty());
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(outcome.label(), "partial");

    // The range was touched; its jobs are lost until it goes stale again
    let response = engine
        .handle_poll(&AgentRequest::get(DISCOVERY_UA, None))
        .await;
    assert!(response.is_idle());
}

#[tokio::test]
async fn test_invalid_performance_query() {
    let (_store, engine) = engine_with_queue(Arc::new(MemoryJobQueue::default()));

    let err = engine.performance("1;DROP", "2").await.unwrap_err();
    assert!(matches!(err, Error::InvalidQuery(_)));

    let err = engine.performance("1", "").await.unwrap_err();
    assert!(matches!(err, Error::InvalidQuery(_)));
}
