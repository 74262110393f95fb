//! Counter emission to an external observability collaborator.
//!
//! The engine emits labeled counters ({domain, policy_id, outcome},
//! {experiment_id, variant}, {domain, shadow_policy_id}) through the
//! [`MetricsSink`] trait. The library ships a tracing-backed sink for
//! production wiring and an in-memory sink for tests; real deployments plug
//! their own collector in.

use std::collections::BTreeMap;

use parking_lot::Mutex;

/// Destination for labeled counters.
pub trait MetricsSink: Send + Sync {
    /// Increment `name` by one for the given label set.
    fn incr(&self, name: &str, labels: &[(&str, &str)]);
}

/// Sink that drops everything.
#[derive(Debug, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn incr(&self, _name: &str, _labels: &[(&str, &str)]) {}
}

/// Sink that logs counters through `tracing` at debug level.
#[derive(Debug, Default)]
pub struct TracingMetrics;

impl MetricsSink for TracingMetrics {
    fn incr(&self, name: &str, labels: &[(&str, &str)]) {
        tracing::debug!(counter = name, ?labels, "metric");
    }
}

/// In-memory recording sink for tests and diagnostics.
#[derive(Debug, Default)]
pub struct MemoryMetrics {
    counts: Mutex<BTreeMap<String, u64>>,
}

impl MemoryMetrics {
    /// Fresh empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    fn key(name: &str, labels: &[(&str, &str)]) -> String {
        let mut sorted: Vec<_> = labels.to_vec();
        sorted.sort();
        let mut key = name.to_string();
        for (k, v) in sorted {
            key.push_str(&format!("|{k}={v}"));
        }
        key
    }

    /// Current count for a (name, labels) pair.
    pub fn get(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        self.counts
            .lock()
            .get(&Self::key(name, labels))
            .copied()
            .unwrap_or(0)
    }

    /// Total across all label sets of `name`.
    pub fn total(&self, name: &str) -> u64 {
        let prefix = format!("{name}|");
        self.counts
            .lock()
            .iter()
            .filter(|(k, _)| k.as_str() == name || k.starts_with(&prefix))
            .map(|(_, v)| *v)
            .sum()
    }
}

impl MetricsSink for MemoryMetrics {
    fn incr(&self, name: &str, labels: &[(&str, &str)]) {
        *self
            .counts
            .lock()
            .entry(Self::key(name, labels))
            .or_default() += 1;
    }
}
