//! Metrics collection and exposition.
//!
//! # Metrics
//! - `pbprox_requests_total` (counter): requests by method, status
//! - `pbprox_request_duration_seconds` (histogram): latency distribution
//! - `pbprox_auth_decisions_total` (counter): gate outcome per request
//! - `pbprox_upstream_retries_total` (counter): upstream retry attempts
//! - `pbprox_config_reloads_total` (counter): reloads by result
//!
//! # Design Decisions
//! - Recording is a no-op until [`init_metrics`] installs the exporter
//! - Labels stay low-cardinality: no paths, no users

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and its scrape listener on `addr`.
///
/// Must run inside a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

/// Record a completed request.
pub fn record_request(method: &str, status: u16, start: Instant) {
    counter!(
        "pbprox_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("pbprox_request_duration_seconds", "method" => method.to_string())
        .record(start.elapsed().as_secs_f64());
}

/// Record the gate's verdict: `exempt`, `authenticated`, `redirect`,
/// `forbidden`, `login`.
pub fn record_auth_decision(decision: &'static str) {
    counter!("pbprox_auth_decisions_total", "decision" => decision).increment(1);
}

pub fn record_upstream_retry() {
    counter!("pbprox_upstream_retries_total").increment(1);
}

/// Record a configuration reload: `loaded` or `rejected`.
pub fn record_config_reload(result: &'static str) {
    counter!("pbprox_config_reloads_total", "result" => result).increment(1);
}
