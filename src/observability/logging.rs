//! # Structured Logging
//!
//! Subscriber setup and span helpers built on the tracing ecosystem.

use crate::config::{AppConfig, ObservabilityConfig};
use crate::errors::{Error, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Create a tracing span for database operations.
///
/// ```rust,ignore
/// let span = db_span!("save_token", table = "api_tokens");
/// ```
#[macro_export]
macro_rules! db_span {
    ($operation:expr) => {
        tracing::debug_span!(
            "db_operation",
            operation = %$operation,
            operation_id = %uuid::Uuid::new_v4()
        )
    };
    ($operation:expr, $($field:tt)*) => {
        tracing::debug_span!(
            "db_operation",
            operation = %$operation,
            operation_id = %uuid::Uuid::new_v4(),
            $($field)*
        )
    };
}

/// Install the global subscriber.
///
/// `RUST_LOG` wins over the configured level when set.
pub fn init_logging(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| {
            Error::config(format!("Invalid log level '{}': {}", config.log_level, e))
        })?;

    let registry = tracing_subscriber::registry().with(filter);

    let result = if config.json_logging {
        registry.with(fmt::layer().json().with_current_span(true)).try_init()
    } else {
        registry.with(fmt::layer().with_target(true)).try_init()
    };

    result.map_err(|e| Error::config(format!("Failed to install tracing subscriber: {}", e)))
}

/// Log configuration at startup
pub fn log_config_info(config: &AppConfig) {
    tracing::info!(
        server_address = %config.server.bind_address(),
        database_url = %config.database.url,
        token_expiration_seconds = config.auth.token_expiration_seconds,
        admin_role = %config.auth.admin_role,
        internal_ips = config.auth.internal_ips.len(),
        metrics_enabled = config.observability.enable_metrics,
        "Warden configuration"
    );
}
