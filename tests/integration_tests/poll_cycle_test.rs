//! Full discovery and latency cycles through the engine

use std::net::{IpAddr, Ipv4Addr};

use cloudperf::engine::Engine;
use cloudperf::protocol::{AgentRequest, AgentRole, JobId};
use cloudperf::storage::{PingableRepository, Repositories, StatisticsRepository};

use super::fixtures::*;
use crate::common::{agent_ip, memory_store, sqlite_store, AGENT_CITY, TARGET_CITY};

fn engine() -> (std::sync::Arc<cloudperf::storage::MemoryStore>, Engine) {
    let store = memory_store();
    let engine = Engine::in_memory(Repositories::from_store(store.clone()));
    (store, engine)
}

fn results_body(job_id: &str, stdout: &str, stderr: &str) -> String {
    serde_json::json!([{"jobId": job_id, "status": 0, "stdout": stdout, "stderr": stderr}])
        .to_string()
}

#[tokio::test]
async fn test_discovery_then_latency_cycle() {
    let (store, engine) = engine();
    let agent = Some(IpAddr::V4(agent_ip()));

    // 1. Discovery agent: stale range refreshed into two /17 halves
    let response = engine
        .handle_poll(&AgentRequest::get(DISCOVERY_UA, None))
        .await;
    assert_eq!(response.next, "ping");
    assert_eq!(response.interval, 1);
    assert_eq!(response.job.len(), 2);
    assert!(response.job.iter().all(|j| j.job_id == JobId::discovery(TARGET_CITY)));
    assert_eq!(
        response.job[0].command,
        "fping -g 198.18.0.0 198.18.63.255 -r 2 -a -q -X 100"
    );
    assert_eq!(
        response.job[1].command,
        "fping -g 198.18.64.0 198.18.127.255 -r 2 -a -q -X 100"
    );

    // 2. Discovery agent posts the scan result
    let body = results_body("ping2", DISCOVERY_STDOUT, "");
    let response = engine
        .handle_poll(&AgentRequest::post(DISCOVERY_UA, None, body).with_next("ping"))
        .await;
    assert!(response.is_idle());
    assert_eq!(response.interval, 3600);
    for addr in DISCOVERED {
        let ip: Ipv4Addr = addr.parse().unwrap();
        let record = store.record(TARGET_CITY, u32::from(ip)).unwrap().unwrap();
        assert_eq!(record.liveness_mask, 0x80);
    }

    // 3. Data agent in the agent city gets a latency job towards the target
    engine.enqueue_pending(AGENT_CITY, &[TARGET_CITY]).await.unwrap();
    let response = engine.handle_poll(&AgentRequest::get(DATA_UA, agent)).await;
    assert_eq!(response.next, "data");
    assert_eq!(response.job.len(), 1);
    assert_eq!(response.job[0].job_id, JobId::sample(TARGET_CITY));
    let command = &response.job[0].command;
    assert!(command.starts_with("fping -q -C 11 "));
    for addr in DISCOVERED {
        assert!(command.contains(addr), "{command} misses {addr}");
    }

    // 4. Data agent posts the samples
    let body = results_body("data2", "", LATENCY_STDERR);
    let response = engine
        .handle_poll(&AgentRequest::post(DATA_UA, agent, body).with_next("data"))
        .await;
    assert!(response.is_idle());

    let row = store.row(AGENT_CITY, TARGET_CITY).unwrap().unwrap();
    assert_eq!(row.samples, LATENCY_SAMPLES.len() as i64);
    assert_eq!(row.latency_min, 9000);
    assert_eq!(row.latency_max, 15000);
    assert_eq!(row.latency_p50, 12000);
    assert_eq!(row.latency_p70, 13000);
    assert_eq!(row.latency_p90, 14000);
    assert_eq!(row.latency_p95, 14500);
}

#[tokio::test]
async fn test_repeated_latency_results_upsert_one_row() {
    let (store, engine) = engine();
    let agent = Some(IpAddr::V4(agent_ip()));

    for sample in [10.0, 20.0] {
        let body = results_body("data2", "", &format!("198.18.0.1 : {sample}"));
        engine
            .handle_poll(&AgentRequest::post(DATA_UA, agent, body))
            .await;
    }

    assert_eq!(store.pair_count().unwrap(), 1);
    let row = store.row(AGENT_CITY, TARGET_CITY).unwrap().unwrap();
    assert_eq!(row.samples, 1);
    assert_eq!(row.latency_avg, 20000);
}

#[tokio::test]
async fn test_rediscovery_survives_decay() {
    let (store, engine) = engine();
    let ip = Ipv4Addr::new(198, 18, 0, 1);

    let body = results_body("ping2", "198.18.0.1\n", "");
    engine.protocol().ingest_results(&body, None);
    engine.protocol().ingest_results(&body, None);
    assert_eq!(store.record(TARGET_CITY, u32::from(ip)).unwrap().unwrap().liveness_mask, 0x80);

    // Refresh decays the stale range before its jobs go out
    engine.refresh().await.unwrap();
    assert_eq!(store.record(TARGET_CITY, u32::from(ip)).unwrap().unwrap().liveness_mask, 0x40);

    engine.protocol().ingest_results(&body, None);
    assert_eq!(store.record(TARGET_CITY, u32::from(ip)).unwrap().unwrap().liveness_mask, 0xC0);
}

#[tokio::test]
async fn test_role_hint_turns_discovery_agent_into_data_agent() {
    let (store, engine) = engine();
    store
        .observe(TARGET_CITY, u32::from(Ipv4Addr::new(198, 18, 0, 1)), 0x80)
        .unwrap();
    engine.enqueue_pending(AGENT_CITY, &[TARGET_CITY]).await.unwrap();

    let request = AgentRequest::get(DISCOVERY_UA, Some(IpAddr::V4(agent_ip())))
        .with_role(AgentRole::Data);
    let response = engine.handle_poll(&request).await;

    assert_eq!(response.next, "data");
    assert_eq!(response.job[0].command, "fping -q -C 11 198.18.0.1");
}

#[tokio::test]
async fn test_refreshed_ranges_become_ready() {
    let (store, engine) = engine();

    let before = engine.status().await.unwrap();
    assert_eq!(before.ranges.ready, 1);
    assert_eq!(before.ranges.outdated, 1);

    engine.handle_poll(&AgentRequest::get(DISCOVERY_UA, None)).await;
    assert_eq!(store.catalog_queries(), 1);

    let after = engine.status().await.unwrap();
    assert_eq!(after.ranges.outdated, 0);
    assert_eq!(after.ranges.ready, 2);
    assert_eq!(after.queue_depth, 0);

    // Nothing stale left: the next poll queries the catalog but stays idle
    let response = engine.handle_poll(&AgentRequest::get(DISCOVERY_UA, None)).await;
    assert!(response.is_idle());
    assert_eq!(store.catalog_queries(), 2);
}

#[tokio::test]
async fn test_cycle_on_sqlite_store() {
    let dir = tempfile::tempdir().unwrap();
    let store = sqlite_store(&dir);
    let engine = Engine::in_memory(Repositories::from_store(store.clone()));
    let agent = Some(IpAddr::V4(agent_ip()));

    let response = engine.handle_poll(&AgentRequest::get(DISCOVERY_UA, None)).await;
    assert_eq!(response.job.len(), 2);

    let body = results_body("ping2", DISCOVERY_STDOUT, "");
    engine.handle_poll(&AgentRequest::post(DISCOVERY_UA, None, body)).await;
    assert_eq!(store.cities_with_pingable().unwrap(), 1);

    engine.enqueue_pending(AGENT_CITY, &[TARGET_CITY]).await.unwrap();
    let response = engine.handle_poll(&AgentRequest::get(DATA_UA, agent)).await;
    assert_eq!(response.job.len(), 1);

    let body = results_body("data2", "", LATENCY_STDERR);
    engine.handle_poll(&AgentRequest::post(DATA_UA, agent, body)).await;

    let rollup = engine.performance("1", "2").await.unwrap();
    assert_eq!(rollup.overall.samples, LATENCY_SAMPLES.len() as i64);
    assert_eq!(rollup.overall.p70, 13000.0);
    assert_eq!(rollup.latency_data.len(), 1);
    let labels: Vec<&str> = rollup.city_data.iter().map(|c| c.label.as_str()).collect();
    assert!(labels.contains(&"NYC"), "{labels:?}");
    assert!(labels.contains(&"Frankfurt"), "{labels:?}");
}
