//! Metrics collector using prometheus-client.
//!
//! Provides metrics for broadcast volume, per-endpoint send results, and the
//! number of registered endpoints.

use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use std::sync::Arc;
use std::time::Duration;

/// Labels for per-endpoint send metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct SendLabels {
    pub result: SendResult,
}

/// Outcome of a single endpoint send.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum SendResult {
    Success,
    Failure,
}

/// Collects and stores all metrics.
#[derive(Clone)]
pub struct MetricsCollector {
    inner: Arc<MetricsCollectorInner>,
}

struct MetricsCollectorInner {
    /// Broadcast writes accepted.
    writes_total: Counter,
    /// Writes rejected before fan-out.
    rejected_writes_total: Counter,
    /// Payload bytes accepted (counted once per write).
    bytes_total: Counter,
    /// Endpoint sends by result.
    sends_total: Family<SendLabels, Counter>,
    /// Currently registered endpoints.
    endpoints: Gauge,
    /// Fan-out duration histogram (in seconds).
    broadcast_duration_seconds: Histogram,
    /// The prometheus registry.
    registry: Registry,
}

impl MetricsCollector {
    /// Create a new metrics collector.
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let writes_total = Counter::default();
        let rejected_writes_total = Counter::default();
        let bytes_total = Counter::default();
        let sends_total = Family::<SendLabels, Counter>::default();
        let endpoints = Gauge::default();
        // Buckets: 10us up to roughly 2.6s
        let broadcast_duration_seconds = Histogram::new(exponential_buckets(0.00001, 4.0, 10));

        registry.register(
            "logpump_writes",
            "Total number of broadcast writes",
            writes_total.clone(),
        );
        registry.register(
            "logpump_rejected_writes",
            "Writes rejected because the payload could not be framed",
            rejected_writes_total.clone(),
        );
        registry.register(
            "logpump_bytes",
            "Total payload bytes written to the pump",
            bytes_total.clone(),
        );
        registry.register(
            "logpump_sends",
            "Total endpoint sends by result",
            sends_total.clone(),
        );
        registry.register(
            "logpump_endpoints",
            "Number of registered endpoints",
            endpoints.clone(),
        );
        registry.register(
            "logpump_broadcast_duration_seconds",
            "Time spent fanning one write out to all endpoints",
            broadcast_duration_seconds.clone(),
        );

        Self {
            inner: Arc::new(MetricsCollectorInner {
                writes_total,
                rejected_writes_total,
                bytes_total,
                sends_total,
                endpoints,
                broadcast_duration_seconds,
                registry,
            }),
        }
    }

    /// Get the prometheus registry for encoding.
    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    /// Record a completed fan-out.
    pub fn record_broadcast(&self, bytes: usize, delivered: usize, failed: usize, duration: Duration) {
        self.inner.writes_total.inc();
        self.inner.bytes_total.inc_by(bytes as u64);
        self.inner
            .sends_total
            .get_or_create(&SendLabels {
                result: SendResult::Success,
            })
            .inc_by(delivered as u64);
        if failed > 0 {
            self.inner
                .sends_total
                .get_or_create(&SendLabels {
                    result: SendResult::Failure,
                })
                .inc_by(failed as u64);
        }
        self.inner
            .broadcast_duration_seconds
            .observe(duration.as_secs_f64());
    }

    /// Record a write whose payload could not be framed.
    pub fn record_rejected_write(&self) {
        self.inner.rejected_writes_total.inc();
    }

    /// Update the registered endpoint count.
    pub fn set_endpoints(&self, count: usize) {
        self.inner.endpoints.set(count as i64);
    }

    /// Current value of the endpoint gauge.
    pub fn endpoints(&self) -> i64 {
        self.inner.endpoints.get()
    }

    /// Total writes recorded so far.
    pub fn writes(&self) -> u64 {
        self.inner.writes_total.get()
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
