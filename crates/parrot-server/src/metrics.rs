//! Metrics collection and export for Parrot.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use parrot_core::{DropReason, Handled, Routed, WaitingCounts};
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "parrot_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "parrot_connections_active";
    pub const EVENTS_TOTAL: &str = "parrot_events_total";
    pub const EVENTS_DROPPED_TOTAL: &str = "parrot_events_dropped_total";
    pub const PAIRS_FORMED_TOTAL: &str = "parrot_pairs_formed_total";
    pub const UNPAIRS_TOTAL: &str = "parrot_unpairs_total";
    pub const WAITING: &str = "parrot_waiting";
    pub const PAIRS_ACTIVE: &str = "parrot_pairs_active";
    pub const EVENT_LATENCY_SECONDS: &str = "parrot_event_latency_seconds";
    pub const ERRORS_TOTAL: &str = "parrot_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    // Describe metrics
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(names::EVENTS_TOTAL, "Inbound events by type");
    metrics::describe_counter!(
        names::EVENTS_DROPPED_TOTAL,
        "Inbound events that produced no delivery, by reason"
    );
    metrics::describe_counter!(names::PAIRS_FORMED_TOTAL, "Pairs formed, including rematches");
    metrics::describe_counter!(names::UNPAIRS_TOTAL, "Pairs dissolved, by reason");
    metrics::describe_gauge!(names::WAITING, "Users waiting, by category");
    metrics::describe_gauge!(names::PAIRS_ACTIVE, "Current number of pairs");
    metrics::describe_histogram!(
        names::EVENT_LATENCY_SECONDS,
        "Inbound event processing latency in seconds"
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

/// Record what the router did with an inbound event.
pub fn record_routed(event: &'static str, routed: &Routed) {
    counter!(names::EVENTS_TOTAL, "event" => event).increment(1);
    match routed {
        Routed::Matched { .. } => counter!(names::PAIRS_FORMED_TOTAL).increment(1),
        Routed::Skipped {
            partner: Some(_),
            rematched,
        } => {
            counter!(names::UNPAIRS_TOTAL, "reason" => "skip").increment(1);
            if *rematched {
                counter!(names::PAIRS_FORMED_TOTAL).increment(1);
            }
        }
        Routed::Dropped(reason) => record_drop(reason.as_str()),
        Routed::Skipped { partner: None, .. } | Routed::Searching | Routed::Relayed => {}
    }
}

/// Record one inbound envelope; malformed ones only count as drops.
pub fn record_handled(handled: &Handled) {
    match handled.event {
        Some(event) => record_routed(event, &handled.routed),
        None => record_drop(DropReason::Malformed.as_str()),
    }
}

/// Record an inbound event that produced no delivery.
pub fn record_drop(reason: &'static str) {
    counter!(names::EVENTS_DROPPED_TOTAL, "reason" => reason).increment(1);
}

/// Record pairs dissolved outside of a skip.
pub fn record_unpairs(reason: &'static str, count: usize, rematched: usize) {
    if count > 0 {
        counter!(names::UNPAIRS_TOTAL, "reason" => reason).increment(count as u64);
    }
    if rematched > 0 {
        counter!(names::PAIRS_FORMED_TOTAL).increment(rematched as u64);
    }
}

/// Update pool and pair gauges.
pub fn set_waiting(counts: WaitingCounts) {
    gauge!(names::WAITING, "category" => "male").set(counts.male as f64);
    gauge!(names::WAITING, "category" => "female").set(counts.female as f64);
    gauge!(names::PAIRS_ACTIVE).set(counts.pairs as f64);
}

/// Record event latency.
pub fn record_latency(seconds: f64) {
    histogram!(names::EVENT_LATENCY_SECONDS).record(seconds);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_guard() {
        // No recorder is installed; this only checks nothing panics
        let _guard = ConnectionMetricsGuard::new();
    }

    #[test]
    fn test_record_routed_without_recorder() {
        record_routed("skip", &Routed::Skipped {
            partner: Some("b".into()),
            rematched: true,
        });
        record_routed("message", &Routed::Dropped(DropReason::NotPaired));
        record_unpairs("close", 1, 0);
        set_waiting(WaitingCounts::default());
    }

    #[test]
    fn test_record_handled_without_recorder() {
        record_handled(&Handled {
            event: None,
            routed: Routed::Dropped(DropReason::Malformed),
        });
        record_handled(&Handled {
            event: Some("join"),
            routed: Routed::Matched {
                room_id: "room".into(),
            },
        });
    }
}
