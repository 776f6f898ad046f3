//! Prometheus metrics for the demo service
//!
//! - Page hits as seen by the counter store
//! - Request counts and durations per endpoint
//! - Requests aborted by failure injection

use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};
use std::sync::Arc;

/// Service metrics registry
///
/// Thread-safe container for all Prometheus metrics, shared by both listeners.
#[derive(Clone)]
pub struct ServerMetrics {
    registry: Registry,
    /// Last hit count returned by the counter store
    pub page_hits: IntGauge,
    /// Requests by matched route and method
    pub http_requests_total: IntCounterVec,
    /// Request duration in seconds by matched route and method
    pub http_request_duration_seconds: HistogramVec,
    /// Root requests aborted by the failure injector
    pub injected_failures_total: IntCounter,
}

impl ServerMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let page_hits = IntGauge::new("kad_page_hits", "Number of page visits")?;
        registry.register(Box::new(page_hits.clone()))?;

        let http_requests_total = IntCounterVec::new(
            Opts::new("kad_http_requests_total", "Total number of HTTP requests"),
            &["endpoint", "method"],
        )?;
        registry.register(Box::new(http_requests_total.clone()))?;

        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "kad_http_request_duration_seconds",
                "Duration of HTTP requests in seconds",
            )
            .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
            &["endpoint", "method"],
        )?;
        registry.register(Box::new(http_request_duration_seconds.clone()))?;

        let injected_failures_total = IntCounter::new(
            "kad_injected_failures_total",
            "Requests aborted by failure injection",
        )?;
        registry.register(Box::new(injected_failures_total.clone()))?;

        Ok(Self {
            registry,
            page_hits,
            http_requests_total,
            http_request_duration_seconds,
            injected_failures_total,
        })
    }

    pub fn set_page_hits(&self, hits: u64) {
        self.page_hits.set(hits as i64);
    }

    pub fn record_request(&self, method: &str, endpoint: &str, duration_secs: f64) {
        self.http_requests_total
            .with_label_values(&[endpoint, method])
            .inc();
        self.http_request_duration_seconds
            .with_label_values(&[endpoint, method])
            .observe(duration_secs);
    }

    pub fn record_injected_failure(&self) {
        self.injected_failures_total.inc();
    }

    /// Encode all metrics to Prometheus text format
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| {
            prometheus::Error::Msg(format!("Failed to encode metrics as UTF-8: {}", e))
        })
    }
}

/// Shared metrics handle
pub type SharedMetrics = Arc<ServerMetrics>;

pub fn create_metrics() -> Result<SharedMetrics, prometheus::Error> {
    Ok(Arc::new(ServerMetrics::new()?))
}
