//! Metrics publishing.
//!
//! Queues and the call queue manager report through the narrow [`MetricsSink`] interface and do
//! not know which registry sits behind it. [`MetricsCollector`] is the in-process
//! implementation: it aggregates gauges and counters per scope (a queue name, a call queue
//! namespace) and hands out serializable snapshots for tests, logging or an external exporter.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Publish-only view of a metrics registry.
pub trait MetricsSink: Send + Sync {
    /// Set a gauge to `value`.
    fn gauge(&self, scope: &str, name: &str, value: f64);

    /// Add `delta` to a monotonically increasing counter.
    fn increment(&self, scope: &str, name: &str, delta: u64);
}

/// Sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn gauge(&self, _scope: &str, _name: &str, _value: f64) {}

    fn increment(&self, _scope: &str, _name: &str, _delta: u64) {}
}

/// Gauges and counters recorded for one scope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScopeMetrics {
    #[serde(default)]
    pub gauges: BTreeMap<String, f64>,
    #[serde(default)]
    pub counters: BTreeMap<String, u64>,
}

/// Snapshot of every scope, ordered by scope name so JSON output is stable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub scopes: BTreeMap<String, ScopeMetrics>,
}

impl MetricsSnapshot {
    pub fn gauge(&self, scope: &str, name: &str) -> Option<f64> {
        self.scopes.get(scope)?.gauges.get(name).copied()
    }

    pub fn counter(&self, scope: &str, name: &str) -> Option<u64> {
        self.scopes.get(scope)?.counters.get(name).copied()
    }
}

/// In-memory metrics registry.
///
/// # Thread Safety
/// All scopes live behind one `Mutex`; every publish call holds it only for a map update.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    scopes: Mutex<HashMap<String, ScopeMetrics>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared handle suitable for passing to schedulers and call queue managers.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Copy the current state of every scope.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let scopes = self.scopes.lock();
        MetricsSnapshot {
            scopes: scopes
                .iter()
                .map(|(scope, metrics)| (scope.clone(), metrics.clone()))
                .collect(),
        }
    }

    /// Serialize the current snapshot as JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.snapshot())
    }

    /// Forget every recorded value.
    pub fn reset(&self) {
        self.scopes.lock().clear();
    }
}

impl MetricsSink for MetricsCollector {
    fn gauge(&self, scope: &str, name: &str, value: f64) {
        let mut scopes = self.scopes.lock();
        scopes
            .entry(scope.to_string())
            .or_default()
            .gauges
            .insert(name.to_string(), value);
    }

    fn increment(&self, scope: &str, name: &str, delta: u64) {
        let mut scopes = self.scopes.lock();
        let counter = scopes
            .entry(scope.to_string())
            .or_default()
            .counters
            .entry(name.to_string())
            .or_insert(0);
        *counter = counter.saturating_add(delta);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gauges_overwrite_and_counters_accumulate() {
        let collector = MetricsCollector::new();
        collector.gauge("root.a", "fair_share_mb", 10.0);
        collector.gauge("root.a", "fair_share_mb", 20.0);
        collector.increment("root.a", "containers_assigned", 1);
        collector.increment("root.a", "containers_assigned", 2);

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.gauge("root.a", "fair_share_mb"), Some(20.0));
        assert_eq!(snapshot.counter("root.a", "containers_assigned"), Some(3));
        assert_eq!(snapshot.gauge("root.b", "fair_share_mb"), None);
    }

    #[test]
    fn test_snapshot_serializes() {
        let collector = MetricsCollector::new();
        collector.increment("ipc", "swaps", 1);

        let json = collector.to_json().unwrap();
        let parsed: MetricsSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.counter("ipc", "swaps"), Some(1));
    }

    #[test]
    fn test_reset_clears_scopes() {
        let collector = MetricsCollector::new();
        collector.gauge("ipc", "depth", 3.0);
        collector.reset();
        assert!(collector.snapshot().scopes.is_empty());
    }
}
