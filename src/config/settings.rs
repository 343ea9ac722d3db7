//! # Configuration Settings
//!
//! Defines the configuration structure for the warden service.

use crate::errors::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;
use validator::Validate;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default)]
#[serde(default)]
pub struct AppConfig {
    /// HTTP server configuration
    #[validate(nested)]
    pub server: ServerConfig,

    /// Database configuration
    #[validate(nested)]
    pub database: DatabaseConfig,

    /// Token, session and access configuration
    #[validate(nested)]
    pub auth: AuthConfig,

    /// Logging and metrics configuration
    #[validate(nested)]
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<()> {
        Validate::validate(self).map_err(Error::from)?;
        self.validate_custom()
    }

    fn validate_custom(&self) -> Result<()> {
        if !self.database.is_sqlite() {
            return Err(Error::validation("Database URL must start with 'sqlite:'"));
        }

        for ip in &self.auth.internal_ips {
            ip.parse::<IpAddr>().map_err(|e| {
                Error::validation_field(
                    format!("Invalid internal IP address '{}': {}", ip, e),
                    "auth.internal_ips",
                )
            })?;
        }

        if self.observability.enable_metrics && self.observability.metrics_port == self.server.port
        {
            return Err(Error::validation("Server and metrics ports cannot be the same"));
        }

        Ok(())
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ServerConfig {
    /// Server bind address
    #[validate(length(min = 1, message = "Host cannot be empty"))]
    pub host: String,

    /// Server port
    #[validate(range(min = 1, max = 65535, message = "Port must be between 1 and 65535"))]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "0.0.0.0".to_string(), port: 8080 }
    }
}

impl ServerConfig {
    /// Get the server bind address
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database connection URL
    #[validate(length(min = 1, message = "Database URL cannot be empty"))]
    pub url: String,

    /// Maximum number of connections in the pool
    #[validate(range(min = 1, max = 100, message = "Max connections must be between 1 and 100"))]
    pub max_connections: u32,

    /// Apply pending migrations on startup
    pub auto_migrate: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://./data/warden.db".to_string(),
            max_connections: 5,
            auto_migrate: true,
        }
    }
}

impl DatabaseConfig {
    pub fn is_sqlite(&self) -> bool {
        self.url.starts_with("sqlite:")
    }

    pub fn is_in_memory(&self) -> bool {
        self.url.contains(":memory:")
    }
}

/// Token lifetime, session and network access configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct AuthConfig {
    /// Lifetime of a non-permanent API token in seconds
    #[validate(range(min = 1, message = "Token expiration must be at least 1 second"))]
    pub token_expiration_seconds: u64,

    /// Role name that grants administrative access
    #[validate(length(min = 1, message = "Admin role cannot be empty"))]
    pub admin_role: String,

    /// Lifetime of a login session in seconds
    #[validate(range(min = 60, message = "Session TTL must be at least 60 seconds"))]
    pub session_ttl_seconds: u64,

    /// Mark the session cookie `Secure`
    pub cookie_secure: bool,

    /// Addresses treated as internal in addition to loopback and private ranges
    pub internal_ips: Vec<String>,

    /// Interval between expired-token sweeps (0 = disabled)
    pub cleanup_interval_seconds: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_expiration_seconds: 3 * 24 * 60 * 60,
            admin_role: "admin".to_string(),
            session_ttl_seconds: 24 * 60 * 60,
            cookie_secure: false,
            internal_ips: Vec::new(),
            cleanup_interval_seconds: 3600,
        }
    }
}

impl AuthConfig {
    pub fn token_expiration(&self) -> Duration {
        Duration::from_secs(self.token_expiration_seconds)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_seconds)
    }

    /// Cleanup interval as Duration (None if disabled)
    pub fn cleanup_interval(&self) -> Option<Duration> {
        if self.cleanup_interval_seconds == 0 {
            None
        } else {
            Some(Duration::from_secs(self.cleanup_interval_seconds))
        }
    }

    /// Parsed internal addresses; entries are checked by [`AppConfig::validate`].
    pub fn internal_addrs(&self) -> Vec<IpAddr> {
        self.internal_ips.iter().filter_map(|ip| ip.parse().ok()).collect()
    }
}

/// Logging and metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[validate(length(min = 1, message = "Log level cannot be empty"))]
    pub log_level: String,

    /// Enable JSON structured logging
    pub json_logging: bool,

    /// Enable the Prometheus exporter
    pub enable_metrics: bool,

    /// Metrics server port (0 = disabled)
    pub metrics_port: u16,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logging: false,
            enable_metrics: false,
            metrics_port: 9090,
        }
    }
}

impl ObservabilityConfig {
    /// Get metrics bind address (None if disabled)
    pub fn metrics_bind_address(&self) -> Option<String> {
        if self.metrics_port == 0 {
            None
        } else {
            Some(format!("0.0.0.0:{}", self.metrics_port))
        }
    }
}
