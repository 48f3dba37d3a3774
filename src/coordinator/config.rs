//! Coordinator configuration

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use thiserror::Error;

use crate::config::ServerConfig;

/// Default bind address of the HTTP server
pub const DEFAULT_BIND_ADDRESS: ([u8; 4], u16) = ([0, 0, 0, 0], 8080);

/// Largest results body accepted from an agent
pub const DEFAULT_MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

/// Configuration for the Coordinator server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Server bind address
    pub bind_address: SocketAddr,

    /// Enable CORS for API
    pub enable_cors: bool,

    /// Enable request logging
    pub enable_request_logging: bool,

    /// Maximum accepted poll body size in bytes
    pub max_body_bytes: usize,

    /// Seconds between queue depth gauge refreshes
    pub gauge_interval_secs: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(DEFAULT_BIND_ADDRESS),
            enable_cors: true,
            enable_request_logging: true,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            gauge_interval_secs: 30,
        }
    }
}

impl CoordinatorConfig {
    /// Create a new config builder
    pub fn builder() -> CoordinatorConfigBuilder {
        CoordinatorConfigBuilder::default()
    }

    /// Build from the `[server]` section of the application config
    pub fn from_server_config(server: &ServerConfig) -> Result<Self, ConfigError> {
        Self::builder()
            .bind_address_str(&server.bind_address)?
            .enable_cors(server.enable_cors)
            .enable_request_logging(server.enable_request_logging)
            .build()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_body_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_body_bytes".to_string(),
                reason: "Must accept a non-empty body".to_string(),
            });
        }

        if self.gauge_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "gauge_interval_secs".to_string(),
                reason: "Interval must be at least one second".to_string(),
            });
        }

        Ok(())
    }
}

/// Builder for CoordinatorConfig
#[derive(Debug, Default)]
pub struct CoordinatorConfigBuilder {
    bind_address: Option<SocketAddr>,
    enable_cors: Option<bool>,
    enable_request_logging: Option<bool>,
    max_body_bytes: Option<usize>,
    gauge_interval_secs: Option<u64>,
}

impl CoordinatorConfigBuilder {
    /// Set bind address
    pub fn bind_address(mut self, addr: SocketAddr) -> Self {
        self.bind_address = Some(addr);
        self
    }

    /// Set bind address from string
    pub fn bind_address_str(mut self, addr: &str) -> Result<Self, ConfigError> {
        self.bind_address = Some(addr.parse().map_err(|_| ConfigError::InvalidValue {
            field: "bind_address".to_string(),
            reason: format!("Invalid address: {}", addr),
        })?);
        Ok(self)
    }

    /// Enable/disable CORS
    pub fn enable_cors(mut self, enable: bool) -> Self {
        self.enable_cors = Some(enable);
        self
    }

    /// Enable/disable request logging
    pub fn enable_request_logging(mut self, enable: bool) -> Self {
        self.enable_request_logging = Some(enable);
        self
    }

    /// Set the poll body size limit
    pub fn max_body_bytes(mut self, bytes: usize) -> Self {
        self.max_body_bytes = Some(bytes);
        self
    }

    /// Set the queue depth gauge refresh interval
    pub fn gauge_interval_secs(mut self, secs: u64) -> Self {
        self.gauge_interval_secs = Some(secs);
        self
    }

    /// Build the config
    pub fn build(self) -> Result<CoordinatorConfig, ConfigError> {
        let defaults = CoordinatorConfig::default();
        let config = CoordinatorConfig {
            bind_address: self.bind_address.unwrap_or(defaults.bind_address),
            enable_cors: self.enable_cors.unwrap_or(defaults.enable_cors),
            enable_request_logging: self
                .enable_request_logging
                .unwrap_or(defaults.enable_request_logging),
            max_body_bytes: self.max_body_bytes.unwrap_or(defaults.max_body_bytes),
            gauge_interval_secs: self.gauge_interval_secs.unwrap_or(defaults.gauge_interval_secs),
        };

        config.validate()?;
        Ok(config)
    }
}

/// Configuration errors
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}
