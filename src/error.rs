//! Unified error handling for the cloudperf crate
//!
//! Every fallible operation in the library returns [`Result`], whose error
//! type wraps the failures of the backing stores (SQLite, Redis), payload
//! decoding and configuration.
//!
//! The poll protocol never surfaces these errors to agents. Ingestion skips
//! the entry that failed and dispatch degrades to "no work this round", so
//! the classification below exists for logging and metrics labels.
//!
//! # Usage
//!
//! ```rust,ignore
//! use cloudperf::error::{CloudperfErrorTrait, Error, ErrorCategory};
//!
//! fn report(err: &Error) {
//!     if err.is_recoverable() {
//!         tracing::warn!(category = ?err.category(), error = %err, "transient failure");
//!     } else {
//!         tracing::error!(error = %err, "permanent failure");
//!     }
//! }
//! ```

use std::io;
use thiserror::Error;

/// Common trait for all cloudperf error types
pub trait CloudperfErrorTrait: std::error::Error {
    /// Check if this error is likely to succeed when retried later
    fn is_recoverable(&self) -> bool;

    /// Get the error category for handling strategies
    fn category(&self) -> ErrorCategory;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Catalog, pingable and statistics store failures
    Storage,
    /// Job queue and pending job backend failures
    Queue,
    /// Malformed agent payloads
    Protocol,
    /// Configuration and validation errors
    Config,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// Short label used for metrics and log fields
    pub fn label(&self) -> &'static str {
        match self {
            Self::Storage => "storage",
            Self::Queue => "queue",
            Self::Protocol => "protocol",
            Self::Config => "config",
            Self::Other => "other",
        }
    }
}

/// Unified error type for the cloudperf crate
#[derive(Error, Debug)]
pub enum Error {
    /// SQLite errors from the catalog, pingable or statistics store
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Queue backend rejected an operation
    #[error("Queue error: {0}")]
    Queue(String),

    /// Redis command errors
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Connection pool errors
    #[error("Connection pool error: {0}")]
    Pool(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// Job id that does not follow the `<tag><city id>` encoding
    #[error("Invalid job id '{id}': {reason}")]
    InvalidJobId { id: String, reason: String },

    /// Caller supplied a malformed query parameter
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl CloudperfErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Storage(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            Self::Storage(_) => false,
            Self::Queue(_) => true,
            Self::Redis(e) => e.is_io_error() || e.is_timeout() || e.is_connection_dropped(),
            Self::Pool(_) => true,
            Self::Io(_) => true,
            Self::Json(_)
            | Self::Config(_)
            | Self::InvalidJobId { .. }
            | Self::InvalidQuery(_)
            | Self::Other { .. } => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Storage(_) | Self::Io(_) => ErrorCategory::Storage,
            Self::Queue(_) | Self::Redis(_) | Self::Pool(_) => ErrorCategory::Queue,
            Self::Json(_) | Self::InvalidJobId { .. } | Self::InvalidQuery(_) => {
                ErrorCategory::Protocol
            }
            Self::Config(_) => ErrorCategory::Config,
            Self::Other { .. } => ErrorCategory::Other,
        }
    }
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a queue backend error
    pub fn queue(msg: impl Into<String>) -> Self {
        Self::Queue(msg.into())
    }

    /// Create an invalid query error
    pub fn invalid_query(msg: impl Into<String>) -> Self {
        Self::InvalidQuery(msg.into())
    }

    /// Create a generic error with context
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            source: None,
        }
    }

    /// Create a generic error with context and source
    pub fn with_source(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Other {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }
}

impl From<deadpool_redis::PoolError> for Error {
    fn from(err: deadpool_redis::PoolError) -> Self {
        Self::Pool(err.to_string())
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;
