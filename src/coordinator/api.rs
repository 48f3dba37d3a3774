//! HTTP handlers of the coordinator
//!
//! `/job` speaks the agent protocol and answers with the bare poll response
//! agents expect. The `/api/*` routes wrap their payloads in [`ApiResponse`].

use std::net::{IpAddr, SocketAddr};
use std::time::Instant;

use axum::{
    body::{to_bytes, Body},
    extract::{ConnectInfo, MatchedPath, Query, Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::engine::SystemStatus;
use crate::error::{CloudperfErrorTrait, Error};
use crate::metrics;
use crate::models::CityId;
use crate::protocol::{AgentRequest, AgentRole};
use crate::stats::CrossCityRollup;

use super::server::AppState;

/// Header carrying an explicit agent role
pub const ROLE_HEADER: &str = "x-agent-role";

/// User agent prefix of load balancer health probes
const HEALTH_CHECKER_UA: &str = "ELB-HealthChecker";

// ============================================================================
// API Response Types
// ============================================================================

/// Generic API response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

/// Simple error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: message.into(),
        }
    }
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
}

/// Query string of `/job`
#[derive(Debug, Default, Deserialize)]
pub struct PollQuery {
    pub next: Option<String>,
    pub role: Option<String>,
}

/// Query string of `/api/performance`
#[derive(Debug, Deserialize)]
pub struct PerformanceQuery {
    pub src: String,
    pub dist: String,
}

/// Body of `POST /api/pending`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingRequest {
    pub src_city_id: CityId,
    pub dist_city_ids: Vec<CityId>,
}

/// Reply of `POST /api/pending`
#[derive(Debug, Serialize, Deserialize)]
pub struct PendingResponse {
    pub pending: usize,
}

// ============================================================================
// API Routes
// ============================================================================

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Agent protocol
        .route("/job", get(poll).post(poll))
        // Health endpoints
        .route("/api/health", get(health_check))
        // Coordination state
        .route("/api/status", get(get_status))
        .route("/api/performance", get(get_performance))
        .route("/api/pending", post(enqueue_pending))
        // Prometheus scrape
        .route("/metrics", get(get_metrics))
        .route_layer(middleware::from_fn(track_requests))
        .fallback(fallback)
        .with_state(state)
}

/// Record count and latency of every routed request
async fn track_requests(request: Request, next: Next) -> Response {
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_owned())
        .unwrap_or_else(|| request.uri().path().to_owned());
    let start = Instant::now();

    let response = next.run(request).await;
    metrics::record_api_request(
        &endpoint,
        response.status().as_u16(),
        start.elapsed().as_secs_f64(),
    );
    response
}

/// Map a library error onto a status code and error body
fn error_response(err: &Error) -> Response {
    let status = match err {
        Error::InvalidQuery(_) | Error::InvalidJobId { .. } => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status.is_server_error() {
        tracing::error!(category = err.category().label(), error = %err, "Request failed");
    }

    (status, Json(ErrorResponse::new(err.to_string()))).into_response()
}

// ============================================================================
// Agent Protocol Handlers
// ============================================================================

/// Address of the agent: first `X-Forwarded-For` hop, else the peer address
fn source_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<IpAddr> {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .and_then(|first| first.trim().parse().ok())
        .or_else(|| peer.map(|addr| addr.ip()))
}

/// Explicit role from the header, then the query string
fn role_hint(headers: &HeaderMap, query: &PollQuery) -> Option<AgentRole> {
    let raw = headers
        .get(ROLE_HEADER)
        .and_then(|value| value.to_str().ok())
        .or(query.role.as_deref())?;

    match raw.parse() {
        Ok(role) => Some(role),
        Err(e) => {
            tracing::debug!(role = raw, error = %e, "Ignoring unknown agent role");
            None
        }
    }
}

/// `GET|POST /job`
async fn poll(
    State(state): State<AppState>,
    Query(query): Query<PollQuery>,
    request: Request,
) -> Response {
    let (parts, body) = request.into_parts();
    let peer = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    let user_agent = parts
        .headers
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let body = read_body(body, state.config.max_body_bytes).await;

    let agent_request = AgentRequest {
        source_ip: source_ip(&parts.headers, peer),
        user_agent,
        method: parts.method,
        role_hint: role_hint(&parts.headers, &query),
        query_next: query.next,
        body,
    };

    let response = state.engine.handle_poll(&agent_request).await;
    Json(response).into_response()
}

/// Poll body as text; unreadable bodies count as absent
async fn read_body(body: Body, limit: usize) -> Option<String> {
    let bytes = match to_bytes(body, limit).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(error = %e, limit, "Failed to read poll body");
            return None;
        }
    };

    if bytes.is_empty() {
        return None;
    }

    match String::from_utf8(bytes.to_vec()) {
        Ok(text) => Some(text),
        Err(e) => {
            tracing::warn!(error = %e, "Poll body is not UTF-8");
            None
        }
    }
}

// ============================================================================
// Health Handlers
// ============================================================================

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = state.start_time.elapsed().as_secs();

    Json(ApiResponse::success(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: uptime,
    }))
}

/// Unknown paths: load balancer probes get a plain 200, everything else 404
async fn fallback(headers: HeaderMap) -> Response {
    let is_health_checker = headers
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|ua| ua.starts_with(HEALTH_CHECKER_UA));

    if is_health_checker {
        (StatusCode::OK, "healthy").into_response()
    } else {
        (StatusCode::NOT_FOUND, Json(ErrorResponse::new("Not found"))).into_response()
    }
}

// ============================================================================
// Coordination Handlers
// ============================================================================

/// `GET /api/status`
async fn get_status(State(state): State<AppState>) -> Response {
    match state.engine.status().await {
        Ok(status) => Json(ApiResponse::<SystemStatus>::success(status)).into_response(),
        Err(e) => error_response(&e),
    }
}

/// `GET /api/performance?src=1,2&dist=3`
async fn get_performance(
    State(state): State<AppState>,
    Query(query): Query<PerformanceQuery>,
) -> Response {
    match state.engine.performance(&query.src, &query.dist).await {
        Ok(rollup) => Json(ApiResponse::<CrossCityRollup>::success(rollup)).into_response(),
        Err(e) => error_response(&e),
    }
}

/// `POST /api/pending`
async fn enqueue_pending(
    State(state): State<AppState>,
    Json(request): Json<PendingRequest>,
) -> Response {
    match state
        .engine
        .enqueue_pending(request.src_city_id, &request.dist_city_ids)
        .await
    {
        Ok(pending) => Json(ApiResponse::success(PendingResponse { pending })).into_response(),
        Err(e) => error_response(&e),
    }
}

/// `GET /metrics`
async fn get_metrics() -> Response {
    match metrics::encode_metrics() {
        Ok(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new(e.to_string())),
        )
            .into_response(),
    }
}

// ============================================================================
// Tests
// ============================================================================
