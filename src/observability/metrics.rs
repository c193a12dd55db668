//! Metrics collection and exposition.
//!
//! # Metrics
//! - `explorer_requests_total` (counter): endpoint attempts by endpoint, outcome
//! - `explorer_request_duration_seconds` (histogram): per-attempt latency
//! - `explorer_cache_events_total` (counter): hit, miss, stale, refresh
//! - `circuit_breaker_open` (gauge): 1=open, 0=closed, per domain
//! - `rate_limit_queue_depth` (gauge): queued requests per domain
//! - `rate_limit_rejections_total` (counter): queue-full rejections per domain
//! - `send_attempts_total` (counter): orchestrator outcomes
//!
//! Without an installed recorder every call is a no-op.

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(endpoint: &str, outcome: &'static str, start: Instant) {
    metrics::counter!(
        "explorer_requests_total",
        "endpoint" => endpoint.to_string(),
        "outcome" => outcome
    )
    .increment(1);
    metrics::histogram!(
        "explorer_request_duration_seconds",
        "endpoint" => endpoint.to_string()
    )
    .record(start.elapsed().as_secs_f64());
}

pub fn record_cache_event(event: &'static str) {
    metrics::counter!("explorer_cache_events_total", "event" => event).increment(1);
}

pub fn record_breaker_state(domain: &str, open: bool) {
    metrics::gauge!("circuit_breaker_open", "domain" => domain.to_string())
        .set(if open { 1.0 } else { 0.0 });
}

pub fn record_queue_depth(domain: &str, depth: usize) {
    metrics::gauge!("rate_limit_queue_depth", "domain" => domain.to_string()).set(depth as f64);
}

pub fn record_queue_rejection(domain: &str) {
    metrics::counter!("rate_limit_rejections_total", "domain" => domain.to_string()).increment(1);
}

pub fn record_send_outcome(outcome: &'static str) {
    metrics::counter!("send_attempts_total", "outcome" => outcome).increment(1);
}
