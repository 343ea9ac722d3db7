//! # Metrics Collection
//!
//! Prometheus metrics for token issuance and auth-update fan-out. The
//! recording helpers are synchronous so they can be called while a registry
//! lock is held; with no exporter installed the `metrics` macros are no-ops.

use crate::config::ObservabilityConfig;
use crate::errors::{Error, Result};
use metrics::{counter, describe_counter, describe_gauge, gauge, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::{info, warn};

/// Subscription feed label values
pub const FEED_USER: &str = "user";
pub const FEED_DIRECTORY: &str = "directory";

/// Drop reason label values
pub const DROP_SUPERSEDED: &str = "superseded";
pub const DROP_CLOSED: &str = "closed";

pub fn record_token_issued() {
    counter!("warden_tokens_issued_total").increment(1);
}

pub fn record_token_invalidated() {
    counter!("warden_tokens_invalidated_total").increment(1);
}

pub fn record_tokens_purged(count: u64) {
    counter!("warden_tokens_purged_total").increment(count);
}

pub fn record_notification_sent(feed: &'static str) {
    counter!("warden_notifications_sent_total", "feed" => feed).increment(1);
}

pub fn record_notification_dropped(feed: &'static str, reason: &'static str) {
    counter!("warden_notifications_dropped_total", "feed" => feed, "reason" => reason)
        .increment(1);
}

pub fn subscription_opened(feed: &'static str) {
    gauge!("warden_active_subscriptions", "feed" => feed).increment(1.0);
}

pub fn subscription_closed(feed: &'static str) {
    gauge!("warden_active_subscriptions", "feed" => feed).decrement(1.0);
}

/// Register descriptions and zero values so series appear before the first event.
fn register_metrics() {
    describe_counter!("warden_tokens_issued_total", Unit::Count, "API tokens issued");
    describe_counter!(
        "warden_tokens_invalidated_total",
        Unit::Count,
        "API tokens deleted because the owning identity became invalid"
    );
    describe_counter!(
        "warden_notifications_sent_total",
        Unit::Count,
        "Messages handed to subscriber channels"
    );
    describe_counter!(
        "warden_notifications_dropped_total",
        Unit::Count,
        "Messages not delivered to a subscriber"
    );
    describe_counter!(
        "warden_tokens_purged_total",
        Unit::Count,
        "Expired tokens removed by the cleanup task"
    );
    describe_gauge!(
        "warden_active_subscriptions",
        Unit::Count,
        "Currently registered subscriber channels"
    );

    counter!("warden_tokens_issued_total").absolute(0);
    counter!("warden_tokens_invalidated_total").absolute(0);
    counter!("warden_tokens_purged_total").absolute(0);
    for feed in [FEED_USER, FEED_DIRECTORY] {
        counter!("warden_notifications_sent_total", "feed" => feed).absolute(0);
        gauge!("warden_active_subscriptions", "feed" => feed).set(0.0);
    }
}

/// Initialize the Prometheus exporter
pub fn init_metrics(config: &ObservabilityConfig) -> Result<()> {
    if !config.enable_metrics {
        return Ok(());
    }

    let metrics_addr = match config.metrics_bind_address() {
        Some(addr) => addr,
        None => {
            warn!("Metrics disabled: no bind address configured");
            return Ok(());
        }
    };

    let socket_addr: SocketAddr = metrics_addr.parse().map_err(|e| {
        Error::config(format!("Invalid metrics bind address '{}': {}", metrics_addr, e))
    })?;

    PrometheusBuilder::new()
        .with_http_listener(socket_addr)
        .add_global_label("service", crate::APP_NAME)
        .install()
        .map_err(|e| Error::config(format!("Failed to initialize metrics exporter: {}", e)))?;

    register_metrics();

    info!(metrics_addr = %metrics_addr, "Metrics collection initialized");
    Ok(())
}
