//! Metrics Collector

use prometheus::{IntCounter, IntGauge, Registry, TextEncoder};
use serde::Serialize;
use tracing::error;

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub connections_accepted: u64,
    pub active_connections: i64,
    pub messages_received: u64,
    pub messages_sent: u64,
    pub send_failures: u64,
    pub messages_dropped: u64,
}

/// Collects and exports server metrics
pub struct Metrics {
    prometheus_registry: Registry,
    connections_accepted_total: IntCounter,
    active_connections: IntGauge,
    messages_received_total: IntCounter,
    messages_sent_total: IntCounter,
    send_failures_total: IntCounter,
    messages_dropped_total: IntCounter,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        let prometheus_registry = Registry::new();

        let connections_accepted_total = IntCounter::new(
            "linecast_connections_accepted_total",
            "Total number of accepted client connections"
        ).expect("Failed to create connections_accepted_total counter");

        let active_connections = IntGauge::new(
            "linecast_active_connections",
            "Number of currently registered client connections"
        ).expect("Failed to create active_connections gauge");

        let messages_received_total = IntCounter::new(
            "linecast_messages_received_total",
            "Total lines received from clients"
        ).expect("Failed to create messages_received_total counter");

        let messages_sent_total = IntCounter::new(
            "linecast_messages_sent_total",
            "Total lines written to clients"
        ).expect("Failed to create messages_sent_total counter");

        let send_failures_total = IntCounter::new(
            "linecast_send_failures_total",
            "Total failed or timed out writes"
        ).expect("Failed to create send_failures_total counter");

        let messages_dropped_total = IntCounter::new(
            "linecast_messages_dropped_total",
            "Lines dropped because the inbound queue was closed"
        ).expect("Failed to create messages_dropped_total counter");

        prometheus_registry.register(Box::new(connections_accepted_total.clone()))
            .expect("Failed to register connections_accepted_total");
        prometheus_registry.register(Box::new(active_connections.clone()))
            .expect("Failed to register active_connections");
        prometheus_registry.register(Box::new(messages_received_total.clone()))
            .expect("Failed to register messages_received_total");
        prometheus_registry.register(Box::new(messages_sent_total.clone()))
            .expect("Failed to register messages_sent_total");
        prometheus_registry.register(Box::new(send_failures_total.clone()))
            .expect("Failed to register send_failures_total");
        prometheus_registry.register(Box::new(messages_dropped_total.clone()))
            .expect("Failed to register messages_dropped_total");

        Self {
            prometheus_registry,
            connections_accepted_total,
            active_connections,
            messages_received_total,
            messages_sent_total,
            send_failures_total,
            messages_dropped_total,
        }
    }

    pub fn connection_accepted(&self) {
        self.connections_accepted_total.inc();
    }

    pub fn set_active_connections(&self, count: usize) {
        self.active_connections.set(count as i64);
    }

    pub fn message_received(&self) {
        self.messages_received_total.inc();
    }

    pub fn message_sent(&self) {
        self.messages_sent_total.inc();
    }

    pub fn send_failed(&self) {
        self.send_failures_total.inc();
    }

    pub fn message_dropped(&self) {
        self.messages_dropped_total.inc();
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_accepted: self.connections_accepted_total.get(),
            active_connections: self.active_connections.get(),
            messages_received: self.messages_received_total.get(),
            messages_sent: self.messages_sent_total.get(),
            send_failures: self.send_failures_total.get(),
            messages_dropped: self.messages_dropped_total.get(),
        }
    }

    /// Export metrics in Prometheus format
    pub fn export_prometheus(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.prometheus_registry.gather();

        match encoder.encode_to_string(&metric_families) {
            Ok(output) => output,
            Err(e) => {
                error!(error = %e, "Failed to encode Prometheus metrics");
                String::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_and_export() {
        let metrics = Metrics::new();
        metrics.connection_accepted();
        metrics.message_received();
        metrics.message_received();
        metrics.send_failed();
        metrics.set_active_connections(3);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.connections_accepted, 1);
        assert_eq!(snapshot.messages_received, 2);
        assert_eq!(snapshot.send_failures, 1);
        assert_eq!(snapshot.active_connections, 3);

        let exported = metrics.export_prometheus();
        assert!(exported.contains("linecast_messages_received_total 2"));
        assert!(exported.contains("linecast_active_connections 3"));
    }
}
