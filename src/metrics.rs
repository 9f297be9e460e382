//! # Metrics — Prometheus Exposition
//!
//! Operational counters for the task service in the Prometheus text format,
//! served at `/metrics`.
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `hashreach_tasks_submitted_total` | Counter | — | Accepted submissions |
//! | `hashreach_tasks_finished_total` | Counter | `status` | Runs that reached a terminal state |
//! | `hashreach_candidates_tested_total` | Counter | `hash_type` | Candidates hashed |
//! | `hashreach_tasks_active` | Gauge | — | Runs not yet terminal |
//! | `hashreach_subscribers_connected` | Gauge | — | Open WebSocket subscribers |
//!
//! The registry updates counters from each run's driver; the WebSocket
//! handler maintains the subscriber gauge.

use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct StatusLabel {
    pub status: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct HashTypeLabel {
    pub hash_type: String,
}

/// All fields are atomic and safe to update from any thread or task.
pub struct Metrics {
    pub registry: Registry,
    pub tasks_submitted: Counter,
    pub tasks_finished: Family<StatusLabel, Counter>,
    pub candidates_tested: Family<HashTypeLabel, Counter>,
    pub tasks_active: Gauge,
    pub subscribers_connected: Gauge,
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let tasks_submitted = Counter::default();
        registry.register(
            "hashreach_tasks_submitted",
            "Search tasks accepted",
            tasks_submitted.clone(),
        );

        let tasks_finished = Family::<StatusLabel, Counter>::default();
        registry.register(
            "hashreach_tasks_finished",
            "Search tasks that reached a terminal state, by status",
            tasks_finished.clone(),
        );

        let candidates_tested = Family::<HashTypeLabel, Counter>::default();
        registry.register(
            "hashreach_candidates_tested",
            "Candidates hashed, by digest algorithm",
            candidates_tested.clone(),
        );

        let tasks_active = Gauge::default();
        registry.register(
            "hashreach_tasks_active",
            "Search tasks currently running",
            tasks_active.clone(),
        );

        let subscribers_connected = Gauge::default();
        registry.register(
            "hashreach_subscribers_connected",
            "Open WebSocket subscribers",
            subscribers_connected.clone(),
        );

        Self {
            registry,
            tasks_submitted,
            tasks_finished,
            candidates_tested,
            tasks_active,
            subscribers_connected,
        }
    }

    pub fn record_finished(&self, status: &str) {
        self.tasks_finished
            .get_or_create(&StatusLabel {
                status: status.to_string(),
            })
            .inc();
    }

    pub fn record_tested(&self, hash_type: &str, count: u64) {
        self.candidates_tested
            .get_or_create(&HashTypeLabel {
                hash_type: hash_type.to_string(),
            })
            .inc_by(count);
    }

    /// Render all metrics in Prometheus text exposition format.
    pub fn encode(&self) -> String {
        let mut buf = String::new();
        if let Err(e) = encode(&mut buf, &self.registry) {
            tracing::warn!(error = %e, "failed to encode metrics");
        }
        buf
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_all_families() {
        let m = Metrics::new();
        m.tasks_submitted.inc();
        m.record_finished("COMPLETED");
        m.record_tested("md5", 42);
        m.tasks_active.set(2);
        let out = m.encode();
        assert!(out.contains("hashreach_tasks_submitted_total 1"));
        assert!(out.contains("hashreach_tasks_finished_total{status=\"COMPLETED\"} 1"));
        assert!(out.contains("hashreach_candidates_tested_total{hash_type=\"md5\"} 42"));
        assert!(out.contains("hashreach_tasks_active 2"));
        assert!(out.contains("hashreach_subscribers_connected 0"));
    }

    #[test]
    fn labelled_counters_accumulate() {
        let m = Metrics::new();
        m.record_tested("sha1", 10);
        m.record_tested("sha1", 5);
        let tested = m
            .candidates_tested
            .get_or_create(&HashTypeLabel {
                hash_type: "sha1".into(),
            })
            .get();
        assert_eq!(tested, 15);
    }
}
