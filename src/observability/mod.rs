//! # Observability Infrastructure
//!
//! Structured logging and Prometheus metrics.

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, log_config_info};
pub use metrics::init_metrics;

use crate::config::ObservabilityConfig;
use crate::errors::Result;
use ::tracing::info;

/// Initialize logging, then the metrics exporter if enabled.
pub fn init_observability(config: &ObservabilityConfig) -> Result<()> {
    init_logging(config)?;
    init_metrics(config)?;

    info!(
        log_level = %config.log_level,
        json_logging = config.json_logging,
        metrics_enabled = config.enable_metrics,
        "Observability initialized successfully"
    );
    Ok(())
}
