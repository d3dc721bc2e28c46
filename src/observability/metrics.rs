//! Metrics collection.
//!
//! # Responsibilities
//! - Count requests and observe latency per listener/method/endpoint
//! - Count errors per listener and error type
//! - Track active connections per listener
//!
//! Every series lives in one explicit registry so the metrics listener can
//! render it and tests can assert on it without process-global state.

use std::sync::Arc;
use std::time::Duration;

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};

/// Error-type label values.
pub const ERROR_PANIC: &str = "panic";
pub const ERROR_MARSHAL: &str = "marshal_error";
pub const ERROR_WRITE: &str = "write_error";
pub const ERROR_NIL_REQUEST: &str = "nil_request";

/// Recorder for all echo-app series.
#[derive(Debug)]
pub struct Metrics {
    registry: Registry,
    requests_total: IntCounterVec,
    request_duration: HistogramVec,
    errors_total: IntCounterVec,
    active_connections: IntGaugeVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            Opts::new("echo_app_requests_total", "Total number of requests"),
            &["listener", "method", "endpoint"],
        )
        .expect("requests_total definition");

        let request_duration = HistogramVec::new(
            HistogramOpts::new(
                "echo_app_request_duration_seconds",
                "Request duration in seconds",
            ),
            &["listener", "method", "endpoint"],
        )
        .expect("request_duration definition");

        let errors_total = IntCounterVec::new(
            Opts::new("echo_app_errors_total", "Total number of errors"),
            &["listener", "error_type"],
        )
        .expect("errors_total definition");

        let active_connections = IntGaugeVec::new(
            Opts::new("echo_app_active_connections", "Number of active connections"),
            &["listener"],
        )
        .expect("active_connections definition");

        registry
            .register(Box::new(requests_total.clone()))
            .expect("register requests_total");
        registry
            .register(Box::new(request_duration.clone()))
            .expect("register request_duration");
        registry
            .register(Box::new(errors_total.clone()))
            .expect("register errors_total");
        registry
            .register(Box::new(active_connections.clone()))
            .expect("register active_connections");

        Self {
            registry,
            requests_total,
            request_duration,
            errors_total,
            active_connections,
        }
    }

    /// Record a completed request and its latency.
    pub fn record_request(&self, listener: &str, method: &str, endpoint: &str, duration: Duration) {
        self.requests_total
            .with_label_values(&[listener, method, endpoint])
            .inc();
        self.request_duration
            .with_label_values(&[listener, method, endpoint])
            .observe(duration.as_secs_f64());
    }

    /// Record an error by type.
    pub fn record_error(&self, listener: &str, error_type: &str) {
        self.errors_total
            .with_label_values(&[listener, error_type])
            .inc();
    }

    /// A connection (or in-flight request) was admitted.
    pub fn connection_opened(&self, listener: &str) {
        self.active_connections.with_label_values(&[listener]).inc();
    }

    /// A connection (or in-flight request) finished.
    pub fn connection_closed(&self, listener: &str) {
        self.active_connections.with_label_values(&[listener]).dec();
    }

    /// Current active-connection gauge value for a listener.
    pub fn active_connections(&self, listener: &str) -> i64 {
        self.active_connections.with_label_values(&[listener]).get()
    }

    /// Render the registry in Prometheus text exposition format.
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&families, &mut buffer) {
            tracing::error!(error = %e, "failed to encode metrics");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared handle used by handlers and listeners.
pub type SharedMetrics = Arc<Metrics>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_series_rendered() {
        let metrics = Metrics::new();
        metrics.record_request("HTTP", "GET", "/", Duration::from_millis(3));
        let text = metrics.render();
        assert!(text.contains("echo_app_requests_total"));
        assert!(text.contains("listener=\"HTTP\""));
        assert!(text.contains("method=\"GET\""));
        assert!(text.contains("endpoint=\"/\""));
        assert!(text.contains("echo_app_request_duration_seconds"));
    }

    #[test]
    fn test_error_types() {
        let metrics = Metrics::new();
        metrics.record_error("TCP", ERROR_MARSHAL);
        metrics.record_error("TCP", ERROR_WRITE);
        metrics.record_error("gRPC", ERROR_PANIC);
        let text = metrics.render();
        assert!(text.contains("error_type=\"marshal_error\""));
        assert!(text.contains("error_type=\"write_error\""));
        assert!(text.contains("error_type=\"panic\""));
    }

    #[test]
    fn test_active_connection_gauge() {
        let metrics = Metrics::new();
        metrics.connection_opened("TCP");
        metrics.connection_opened("TCP");
        assert_eq!(metrics.active_connections("TCP"), 2);
        metrics.connection_closed("TCP");
        metrics.connection_closed("TCP");
        assert_eq!(metrics.active_connections("TCP"), 0);
    }
}
