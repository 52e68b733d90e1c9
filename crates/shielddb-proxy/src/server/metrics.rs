//! Proxy metrics for observability.
//!
//! All metrics use atomic counters for thread-safe access without locks;
//! recording on every packet is cheap enough for the hot path.
//!
//! Two timing histograms cover the data path:
//! - `request_processing_seconds`: client packet read-to-forward latency
//! - `response_processing_seconds`: server packet read-to-forward latency
//!
//! Both carry the `protocol="postgresql"` label in the Prometheus
//! exposition.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Atomic ordering used for metrics (Relaxed is sufficient for counters).
const METRIC_ORDERING: Ordering = Ordering::Relaxed;

/// Histogram bucket upper bounds, in seconds.
const BUCKET_BOUNDS: [f64; 8] = [0.0005, 0.001, 0.0025, 0.005, 0.01, 0.05, 0.25, 1.0];

/// A fixed-bucket duration histogram backed by atomic counters.
#[derive(Debug, Default)]
pub struct DurationHistogram {
    buckets: [AtomicU64; BUCKET_BOUNDS.len()],
    count: AtomicU64,
    sum_micros: AtomicU64,
}

impl DurationHistogram {
    /// Record one observation.
    pub fn observe(&self, duration: Duration) {
        let seconds = duration.as_secs_f64();
        for (i, bound) in BUCKET_BOUNDS.iter().enumerate() {
            if seconds <= *bound {
                self.buckets[i].fetch_add(1, METRIC_ORDERING);
            }
        }
        self.count.fetch_add(1, METRIC_ORDERING);
        self.sum_micros
            .fetch_add(duration.as_micros() as u64, METRIC_ORDERING);
    }

    /// Total number of observations.
    pub fn count(&self) -> u64 {
        self.count.load(METRIC_ORDERING)
    }

    /// Render this histogram in Prometheus exposition format.
    fn write_prometheus(&self, out: &mut String, name: &str, labels: &str) {
        use std::fmt::Write;
        let _ = writeln!(out, "# HELP {} Packet processing time\n# TYPE {} histogram", name, name);
        for (i, bound) in BUCKET_BOUNDS.iter().enumerate() {
            let _ = writeln!(
                out,
                "{}_bucket{{{},le=\"{}\"}} {}",
                name,
                labels,
                bound,
                self.buckets[i].load(METRIC_ORDERING)
            );
        }
        let count = self.count.load(METRIC_ORDERING);
        let _ = writeln!(out, "{}_bucket{{{},le=\"+Inf\"}} {}", name, labels, count);
        let _ = writeln!(
            out,
            "{}_sum{{{}}} {}",
            name,
            labels,
            self.sum_micros.load(METRIC_ORDERING) as f64 / 1_000_000.0
        );
        let _ = writeln!(out, "{}_count{{{}}} {}", name, labels, count);
    }
}

/// Centralized metrics collection for the proxy.
#[derive(Debug, Default)]
pub struct ProxyMetrics {
    /// Total connections accepted since startup
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub connections_active: AtomicU64,
    /// Queries dropped by the censor
    pub queries_censored: AtomicU64,
    /// Sessions upgraded to TLS
    pub tls_upgrades: AtomicU64,
    /// Responses skipped due to decode failures
    pub responses_skipped: AtomicU64,
    /// Client packet processing latency
    pub request_processing_seconds: DurationHistogram,
    /// Server packet processing latency
    pub response_processing_seconds: DurationHistogram,
}

impl ProxyMetrics {
    /// Create a new metrics instance with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a shared metrics instance.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Record a new connection accepted.
    pub fn connection_accepted(&self) {
        self.connections_accepted.fetch_add(1, METRIC_ORDERING);
        self.connections_active.fetch_add(1, METRIC_ORDERING);
    }

    /// Record a connection closed.
    pub fn connection_closed(&self) {
        self.connections_active.fetch_sub(1, METRIC_ORDERING);
    }

    /// Record a query dropped by the censor.
    pub fn query_censored(&self) {
        self.queries_censored.fetch_add(1, METRIC_ORDERING);
    }

    /// Record a completed TLS upgrade.
    pub fn tls_upgraded(&self) {
        self.tls_upgrades.fetch_add(1, METRIC_ORDERING);
    }

    /// Record a response drained after a decode failure.
    pub fn response_skipped(&self) {
        self.responses_skipped.fetch_add(1, METRIC_ORDERING);
    }

    /// Format metrics in Prometheus exposition format.
    pub fn to_prometheus(&self) -> String {
        use std::fmt::Write;
        let mut out = String::with_capacity(2048);

        let _ = writeln!(
            out,
            "# HELP proxy_connections_accepted_total Total connections accepted\n\
             # TYPE proxy_connections_accepted_total counter\n\
             proxy_connections_accepted_total {}",
            self.connections_accepted.load(METRIC_ORDERING)
        );
        let _ = writeln!(
            out,
            "# HELP proxy_connections_active Current active connections\n\
             # TYPE proxy_connections_active gauge\n\
             proxy_connections_active {}",
            self.connections_active.load(METRIC_ORDERING)
        );
        let _ = writeln!(
            out,
            "# HELP proxy_queries_censored_total Queries dropped by the censor\n\
             # TYPE proxy_queries_censored_total counter\n\
             proxy_queries_censored_total {}",
            self.queries_censored.load(METRIC_ORDERING)
        );
        let _ = writeln!(
            out,
            "# HELP proxy_tls_upgrades_total Sessions upgraded to TLS\n\
             # TYPE proxy_tls_upgrades_total counter\n\
             proxy_tls_upgrades_total {}",
            self.tls_upgrades.load(METRIC_ORDERING)
        );
        let _ = writeln!(
            out,
            "# HELP proxy_responses_skipped_total Responses drained after decode failures\n\
             # TYPE proxy_responses_skipped_total counter\n\
             proxy_responses_skipped_total {}",
            self.responses_skipped.load(METRIC_ORDERING)
        );

        self.request_processing_seconds.write_prometheus(
            &mut out,
            "request_processing_seconds",
            "protocol=\"postgresql\"",
        );
        self.response_processing_seconds.write_prometheus(
            &mut out,
            "response_processing_seconds",
            "protocol=\"postgresql\"",
        );

        out
    }
}
