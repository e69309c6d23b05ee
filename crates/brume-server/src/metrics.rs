//! Metrics collection and export for the brume relay.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "brume_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "brume_connections_active";
    pub const MESSAGES_TOTAL: &str = "brume_messages_total";
    pub const MESSAGES_BYTES: &str = "brume_messages_bytes";
    pub const TOPICS_ACTIVE: &str = "brume_topics_active";
    pub const SUBSCRIPTIONS_TOTAL: &str = "brume_subscriptions_total";
    pub const KEEPALIVE_EXPIRED_TOTAL: &str = "brume_keepalive_expired_total";
    pub const ERRORS_TOTAL: &str = "brume_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    // Describe metrics
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since relay start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(names::MESSAGES_TOTAL, "Total number of messages relayed");
    metrics::describe_counter!(names::MESSAGES_BYTES, "Total bytes of messages relayed");
    metrics::describe_gauge!(names::TOPICS_ACTIVE, "Current number of live topics");
    metrics::describe_counter!(
        names::SUBSCRIPTIONS_TOTAL,
        "Total number of topic subscriptions"
    );
    metrics::describe_counter!(
        names::KEEPALIVE_EXPIRED_TOTAL,
        "Total number of sessions closed by keepalive expiry"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a relayed message.
pub fn record_message(bytes: usize, direction: &str) {
    counter!(names::MESSAGES_TOTAL, "direction" => direction.to_string()).increment(1);
    counter!(names::MESSAGES_BYTES, "direction" => direction.to_string()).increment(bytes as u64);
}

/// Record a subscription.
pub fn record_subscription() {
    counter!(names::SUBSCRIPTIONS_TOTAL).increment(1);
}

/// Update the live topic gauge.
pub fn set_active_topics(count: usize) {
    gauge!(names::TOPICS_ACTIVE).set(count as f64);
}

/// Record a session closed by keepalive expiry.
pub fn record_keepalive_expiry() {
    counter!(names::KEEPALIVE_EXPIRED_TOTAL).increment(1);
}

/// Record an error.
pub fn record_error(error_type: &str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type.to_string()).increment(1);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}
