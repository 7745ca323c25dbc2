//! Metrics definitions for the Session Service.
//!
//! All metrics follow Prometheus naming conventions:
//! - `session_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `event`: bounded by the event catalogue (21 values)
//! - `reason`: bounded by the drop and reject reasons below (fewer than 10 values)
//!
//! Room ids and client ids are never used as labels.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize Prometheus metrics recorder and return the handle
/// for serving metrics via HTTP.
///
/// Must be called before any metrics are recorded. Route latency buckets
/// cover a lock-held handler with fan-out (p99 target < 10ms).
///
/// # Errors
///
/// Returns error if Prometheus recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("session_route_latency".to_string()),
            &[
                0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.010, 0.025, 0.050, 0.100,
            ],
        )
        .map_err(|e| format!("Failed to set route latency buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Rooms & Connections (Gauges)
// ============================================================================

/// Set the number of rooms in the registry.
///
/// Metric: `session_rooms_active`
/// Labels: none
pub fn set_rooms_active(count: usize) {
    // usize to f64 conversion is safe for realistic room counts (< 2^53)
    #[allow(clippy::cast_precision_loss)]
    gauge!("session_rooms_active").set(count as f64);
}

/// A client connection started its pumps.
///
/// Metric: `session_clients_connected`
/// Labels: none
pub fn client_connected() {
    gauge!("session_clients_connected").increment(1.0);
}

/// A client connection finished.
///
/// Metric: `session_clients_connected`
/// Labels: none
pub fn client_disconnected() {
    gauge!("session_clients_connected").decrement(1.0);
}

// ============================================================================
// Routing
// ============================================================================

/// Record a message that passed the permission check and was handled.
///
/// Metrics: `session_messages_routed_total`, `session_route_latency_seconds`
/// Labels: `event`
///
/// Latency covers lock wait, handler and fan-out.
pub fn record_message_routed(event: &str, duration: Duration) {
    counter!("session_messages_routed_total", "event" => event.to_string()).increment(1);
    histogram!("session_route_latency_seconds", "event" => event.to_string())
        .record(duration.as_secs_f64());
}

/// Record a message dropped because the sender's role lacks the tier.
///
/// Metric: `session_messages_denied_total`
/// Labels: `event`
///
/// Security-relevant; a steady non-zero rate suggests a misbehaving client.
pub fn record_message_denied(event: &str) {
    counter!("session_messages_denied_total", "event" => event.to_string()).increment(1);
}

/// Record an inbound message dropped before dispatch.
///
/// Metric: `session_messages_rejected_total`
/// Labels: `reason` (malformed, unknown_event, not_member)
pub fn record_message_rejected(reason: &str) {
    counter!("session_messages_rejected_total", "reason" => reason.to_string()).increment(1);
}

// ============================================================================
// Fan-out
// ============================================================================

/// Record an outbound frame dropped for one recipient.
///
/// Metric: `session_messages_dropped_total`
/// Labels: `reason` (queue_full, closed)
///
/// `queue_full` indicates a slow consumer.
pub fn record_frame_dropped(reason: &str) {
    counter!("session_messages_dropped_total", "reason" => reason.to_string()).increment(1);
}

/// Record a panic inside a room-empty callback.
///
/// Metric: `session_callback_panics_total`
/// Labels: none
///
/// ALERT: Any non-zero value indicates a bug and should trigger investigation.
pub fn record_callback_panic() {
    counter!("session_callback_panics_total").increment(1);
}
