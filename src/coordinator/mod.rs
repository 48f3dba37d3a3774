//! HTTP front of the coordination engine
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │            Coordinator Server            │
//! │                                          │
//! │  ┌────────────────────────────────────┐  │
//! │  │         Agent Protocol             │  │
//! │  │  GET|POST /job                     │  │
//! │  └────────────────────────────────────┘  │
//! │                                          │
//! │  ┌────────────────────────────────────┐  │
//! │  │           REST API                 │  │
//! │  │  GET  /api/health                  │  │
//! │  │  GET  /api/status                  │  │
//! │  │  GET  /api/performance             │  │
//! │  │  POST /api/pending                 │  │
//! │  │  GET  /metrics                     │  │
//! │  └────────────────────────────────────┘  │
//! └──────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use cloudperf::coordinator::{CoordinatorConfig, CoordinatorServer};
//! use cloudperf::engine::Engine;
//!
//! let engine = Arc::new(Engine::from_config(&config).await?);
//! let server = CoordinatorServer::new(CoordinatorConfig::default(), engine)?;
//! server.start().await?;
//! ```

pub mod api;
pub mod config;
pub mod server;

// Re-export main types
pub use api::{create_router, ApiResponse, ErrorResponse, HealthResponse};
pub use config::CoordinatorConfig;
pub use server::{AppState, CoordinatorServer, ServerError};
