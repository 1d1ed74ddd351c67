//! Observability infrastructure for the collector
//!
//! Provides:
//! - Prometheus self-metrics (cycle latency, samples emitted, relists, watch restarts)
//! - Structured JSON logging with tracing

use crate::models::ResourceKind;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge_vec,
    Histogram, IntCounter, IntCounterVec, IntGaugeVec,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for cycle latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<CollectorMetricsInner> = OnceLock::new();

struct CollectorMetricsInner {
    cycle_latency_seconds: Histogram,
    samples_emitted: IntCounter,
    samples_dropped: IntCounter,
    transport_failures: IntCounter,
    relists: IntCounterVec,
    watch_restarts: IntCounterVec,
    cached_objects: IntGaugeVec,
}

impl CollectorMetricsInner {
    fn new() -> Self {
        Self {
            cycle_latency_seconds: register_histogram!(
                "cluster_collector_cycle_latency_seconds",
                "Time spent deriving and emitting one collection cycle",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register cycle_latency_seconds"),

            samples_emitted: register_int_counter!(
                "cluster_collector_samples_emitted_total",
                "Datapoints accepted by the transport"
            )
            .expect("Failed to register samples_emitted"),

            samples_dropped: register_int_counter!(
                "cluster_collector_samples_dropped_total",
                "Datapoints dropped after the transport exhausted its retries"
            )
            .expect("Failed to register samples_dropped"),

            transport_failures: register_int_counter!(
                "cluster_collector_transport_failures_total",
                "Failed transport send attempts"
            )
            .expect("Failed to register transport_failures"),

            relists: register_int_counter_vec!(
                "cluster_collector_relists_total",
                "Full list calls issued by the reflectors",
                &["kind"]
            )
            .expect("Failed to register relists"),

            watch_restarts: register_int_counter_vec!(
                "cluster_collector_watch_restarts_total",
                "Watch streams that terminated and had to be re-established",
                &["kind", "reason"]
            )
            .expect("Failed to register watch_restarts"),

            cached_objects: register_int_gauge_vec!(
                "cluster_collector_cached_objects",
                "Objects currently held in the cache",
                &["kind"]
            )
            .expect("Failed to register cached_objects"),
        }
    }
}

/// Collector self-metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share the
/// same underlying metrics.
#[derive(Clone)]
pub struct CollectorMetrics {
    _private: (),
}

impl Default for CollectorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl CollectorMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(CollectorMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &CollectorMetricsInner {
        GLOBAL_METRICS.get_or_init(CollectorMetricsInner::new)
    }

    pub fn observe_cycle_latency(&self, duration_secs: f64) {
        self.inner().cycle_latency_seconds.observe(duration_secs);
    }

    pub fn add_samples_emitted(&self, count: usize) {
        self.inner().samples_emitted.inc_by(count as u64);
    }

    pub fn add_samples_dropped(&self, count: usize) {
        self.inner().samples_dropped.inc_by(count as u64);
    }

    pub fn inc_transport_failures(&self) {
        self.inner().transport_failures.inc();
    }

    pub fn inc_relists(&self, kind: ResourceKind) {
        self.inner().relists.with_label_values(&[kind.as_str()]).inc();
    }

    pub fn inc_watch_restarts(&self, kind: ResourceKind, reason: &str) {
        self.inner()
            .watch_restarts
            .with_label_values(&[kind.as_str(), reason])
            .inc();
    }

    pub fn set_cached_objects(&self, kind: ResourceKind, count: usize) {
        self.inner()
            .cached_objects
            .with_label_values(&[kind.as_str()])
            .set(count as i64);
    }
}

/// Structured logger for collector lifecycle events
#[derive(Clone)]
pub struct StructuredLogger {
    cluster_name: String,
}

impl StructuredLogger {
    pub fn new(cluster_name: impl Into<String>) -> Self {
        Self {
            cluster_name: cluster_name.into(),
        }
    }

    pub fn log_startup(&self, version: &str, namespace: Option<&str>, kinds: &[ResourceKind]) {
        let kinds: Vec<&str> = kinds.iter().map(|k| k.as_str()).collect();
        info!(
            event = "collector_started",
            cluster = %self.cluster_name,
            collector_version = %version,
            namespace = namespace.unwrap_or("*"),
            kinds = ?kinds,
            "Cluster collector started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "collector_shutdown",
            cluster = %self.cluster_name,
            reason = %reason,
            "Cluster collector shutting down"
        );
    }

    /// Log a reflector re-list and its reconciliation result
    pub fn log_relist(
        &self,
        kind: ResourceKind,
        resource_version: &str,
        objects: usize,
        changes: usize,
    ) {
        info!(
            event = "cache_relisted",
            cluster = %self.cluster_name,
            kind = %kind,
            resource_version = %resource_version,
            objects = objects,
            changes = changes,
            "Reconciled cache with full list"
        );
    }

    pub fn log_cycle(&self, samples: usize, emitted: bool, attempts: u32, elapsed_ms: u128) {
        info!(
            event = "cycle_completed",
            cluster = %self.cluster_name,
            samples = samples,
            emitted = emitted,
            attempts = attempts,
            elapsed_ms = elapsed_ms as u64,
            "Collection cycle complete"
        );
    }

    pub fn log_transport_failure(&self, samples: usize, attempts: u32, error: &str) {
        warn!(
            event = "batch_dropped",
            cluster = %self.cluster_name,
            samples = samples,
            attempts = attempts,
            error = %error,
            "Transport failed after retries, dropping batch"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collector_metrics_creation() {
        let metrics = CollectorMetrics::new();

        metrics.observe_cycle_latency(0.01);
        metrics.add_samples_emitted(10);
        metrics.add_samples_dropped(2);
        metrics.inc_transport_failures();
        metrics.inc_relists(ResourceKind::Pod);
        metrics.inc_watch_restarts(ResourceKind::Pod, "gone");
        metrics.set_cached_objects(ResourceKind::Pod, 3);

        // A second handle shares the registered collectors
        let again = CollectorMetrics::new();
        again.inc_relists(ResourceKind::Pod);
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("test-cluster");
        assert_eq!(logger.cluster_name, "test-cluster");
    }
}
