//! HTTP surface of the coordinator, driven through the router without a socket

mod common;

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use cloudperf::coordinator::{CoordinatorConfig, CoordinatorServer};
use cloudperf::engine::Engine;
use cloudperf::storage::{MemoryStore, Repositories, StatisticsRepository};
use serde_json::Value;
use tower::ServiceExt;

use common::{AGENT_CITY, TARGET_CITY};

fn app() -> (Arc<MemoryStore>, Router) {
    let store = common::memory_store();
    let engine = Arc::new(Engine::in_memory(Repositories::from_store(store.clone())));
    let config = CoordinatorConfig::builder()
        .enable_request_logging(false)
        .build()
        .unwrap();
    let server = CoordinatorServer::new(config, engine).unwrap();
    (store, server.build_router())
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, body.to_vec())
}

async fn send_json(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let (status, body) = send(router, request).await;
    (status, serde_json::from_slice(&body).unwrap())
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

// ============================================================================
// Agent Protocol
// ============================================================================

#[tokio::test]
async fn test_discovery_poll_over_http() {
    let (_store, router) = app();

    let request = Request::builder()
        .uri("/job")
        .header(header::USER_AGENT, "fping-watchmen/2.1")
        .body(Body::empty())
        .unwrap();
    let (status, json) = send_json(&router, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], 200);
    assert_eq!(json["next"], "ping");
    assert_eq!(json["interval"], 1);
    assert_eq!(json["job"].as_array().unwrap().len(), 2);
    assert_eq!(json["job"][0]["jobId"], "ping2");
}

#[tokio::test]
async fn test_data_poll_without_address_is_idle() {
    let (_store, router) = app();

    let request = Request::builder()
        .uri("/job?next=data")
        .header(header::USER_AGENT, "fping-agent/2.1")
        .body(Body::empty())
        .unwrap();
    let (status, json) = send_json(&router, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["job"], serde_json::json!([]));
    assert_eq!(json["next"], "");
    assert_eq!(json["interval"], 3600);
}

#[tokio::test]
async fn test_posted_latency_uses_forwarded_address() {
    let (store, router) = app();

    let request = Request::builder()
        .method("POST")
        .uri("/job")
        .header(header::USER_AGENT, "fping-agent/2.1")
        .header("x-forwarded-for", format!("{}, 10.0.0.2", common::agent_ip()))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(common::latency_result(TARGET_CITY, &[20.0, 30.0, 40.0])))
        .unwrap();
    let (status, json) = send_json(&router, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], 200);

    let row = store.row(AGENT_CITY, TARGET_CITY).unwrap().unwrap();
    assert_eq!(row.samples, 3);
    assert_eq!(row.latency_p50, 30000);
}

#[tokio::test]
async fn test_role_header_selects_data_role() {
    let (_store, router) = app();

    // A discovery user agent asking for data work gets the data branch
    let request = Request::builder()
        .uri("/job")
        .header(header::USER_AGENT, "fping-watchmen/2.1")
        .header("x-agent-role", "data")
        .body(Body::empty())
        .unwrap();
    let (_, json) = send_json(&router, request).await;

    assert_eq!(json["job"], serde_json::json!([]));
}

// ============================================================================
// REST API
// ============================================================================

#[tokio::test]
async fn test_health() {
    let (_store, router) = app();

    let (status, json) = send_json(&router, get("/api/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(json["data"]["status"], "healthy");
    assert_eq!(json["data"]["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_status() {
    let (_store, router) = app();

    let (status, json) = send_json(&router, get("/api/status")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["queueBackend"], "memory");
    assert_eq!(json["data"]["ranges"]["outdated"], 1);
    assert_eq!(json["data"]["statisticsPairs"], 0);
}

#[tokio::test]
async fn test_pending_then_performance() {
    let (_store, router) = app();

    let request = Request::builder()
        .method("POST")
        .uri("/api/pending")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"srcCityId": 1, "distCityIds": [2]}"#))
        .unwrap();
    let (status, json) = send_json(&router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["pending"], 1);

    let (status, json) = send_json(&router, get("/api/performance?src=1&dist=2")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(json["data"]["overall"]["samples"], 0);
    assert_eq!(json["data"]["latencyData"], serde_json::json!([]));
}

#[tokio::test]
async fn test_performance_rejects_bad_ids() {
    let (_store, router) = app();

    let (status, json) = send_json(&router, get("/api/performance?src=1%3B2&dist=2")).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["success"], false);
    assert!(json["error"].as_str().unwrap().contains("city ids"));
}

#[tokio::test]
async fn test_metrics_exposes_poll_counters() {
    cloudperf::metrics::init_metrics().unwrap();
    let (_store, router) = app();

    let request = Request::builder()
        .uri("/job")
        .header(header::USER_AGENT, "fping-watchmen/2.1")
        .body(Body::empty())
        .unwrap();
    send(&router, request).await;

    let (status, body) = send(&router, get("/metrics")).await;
    let text = String::from_utf8(body).unwrap();

    assert_eq!(status, StatusCode::OK);
    assert!(text.contains("cloudperf_polls_total"));
    assert!(text.contains("cloudperf_api_requests_total"));
}

// ============================================================================
// Fallback
// ============================================================================

#[tokio::test]
async fn test_load_balancer_probe_is_healthy() {
    let (_store, router) = app();

    let request = Request::builder()
        .uri("/")
        .header(header::USER_AGENT, "ELB-HealthChecker/2.0")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&router, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"healthy");
}

#[tokio::test]
async fn test_unknown_path_is_not_found() {
    let (_store, router) = app();

    let (status, json) = send_json(&router, get("/nope")).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["success"], false);
}
