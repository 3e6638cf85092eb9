//! Metrics snapshots for an external sink.
//!
//! The wire format belongs to the embedding proxy's metrics collaborator;
//! this module only carries name/value snapshots and a plain-text rendering.

use std::collections::HashMap;

/// Snapshot of counter and gauge metrics.
#[derive(Debug, Clone, Default)]
pub struct MetricsPayload {
    /// Counter metrics (monotonically increasing).
    pub counters: HashMap<String, u64>,

    /// Gauge metrics (can go up and down).
    pub gauges: HashMap<String, f64>,
}

impl MetricsPayload {
    /// Creates a new empty payload.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a counter metric.
    pub fn counter(&mut self, name: impl Into<String>, value: u64) {
        self.counters.insert(name.into(), value);
    }

    /// Adds a gauge metric.
    pub fn gauge(&mut self, name: impl Into<String>, value: f64) {
        self.gauges.insert(name.into(), value);
    }

    /// Merges another payload into this one under a name prefix.
    pub fn merge(&mut self, prefix: &str, other: MetricsPayload) {
        for (name, value) in other.counters {
            self.counters.insert(format!("{prefix}_{name}"), value);
        }
        for (name, value) in other.gauges {
            self.gauges.insert(format!("{prefix}_{name}"), value);
        }
    }

    /// Formats metrics in Prometheus text format.
    #[must_use]
    pub fn to_prometheus(&self, prefix: &str) -> String {
        let mut output = String::new();

        let mut counters: Vec<_> = self.counters.iter().collect();
        counters.sort_by_key(|(name, _)| name.as_str());
        for (name, value) in counters {
            output.push_str(&format!("{prefix}_{name} {value}\n"));
        }

        let mut gauges: Vec<_> = self.gauges.iter().collect();
        gauges.sort_by_key(|(name, _)| name.as_str());
        for (name, value) in gauges {
            output.push_str(&format!("{prefix}_{name} {value}\n"));
        }

        output
    }
}

/// Receives periodic metrics snapshots.
pub trait MetricsSink: Send + Sync {
    /// Export one snapshot.
    fn export(&self, payload: &MetricsPayload);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_collects_values() {
        let mut payload = MetricsPayload::new();
        payload.counter("total_requests", 42);
        payload.gauge("server_count", 3.0);

        assert_eq!(payload.counters.get("total_requests"), Some(&42));
        assert_eq!(payload.gauges.get("server_count"), Some(&3.0));
    }

    #[test]
    fn test_merge_prefixes_names() {
        let mut pool = MetricsPayload::new();
        pool.counter("total_requests", 10);

        let mut top = MetricsPayload::new();
        top.merge("pool", pool);

        assert_eq!(top.counters.get("pool_total_requests"), Some(&10));
    }

    #[test]
    fn test_prometheus_rendering() {
        let mut payload = MetricsPayload::new();
        payload.counter("total_requests", 7);
        payload.gauge("healthy_servers", 2.0);

        let text = payload.to_prometheus("uplink");
        assert!(text.contains("uplink_total_requests 7\n"));
        assert!(text.contains("uplink_healthy_servers 2\n"));
    }
}
