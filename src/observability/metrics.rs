//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by endpoint, method, status
//! - `gateway_request_duration_seconds` (histogram): end-to-end latency
//! - `gateway_retries_total` (counter): extra attempts by endpoint and reason
//! - `gateway_nodes` (gauge): selectable nodes per endpoint
//! - `gateway_rate_limited_total` (counter): requests rejected with 429
//! - `gateway_config_reloads_total` (counter): reloads by result
//! - `gateway_node_health` (gauge): 1=healthy, 0=unhealthy

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(endpoint: &str, method: &str, status: u16, start: Instant) {
    metrics::counter!(
        "gateway_requests_total",
        "endpoint" => endpoint.to_string(),
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!("gateway_request_duration_seconds", "endpoint" => endpoint.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_retry(endpoint: &str, reason: &'static str) {
    metrics::counter!("gateway_retries_total", "endpoint" => endpoint.to_string(), "reason" => reason).increment(1);
}

pub fn record_node_count(endpoint: &str, count: usize) {
    metrics::gauge!("gateway_nodes", "endpoint" => endpoint.to_string()).set(count as f64);
}

pub fn record_rate_limited(endpoint: &str) {
    metrics::counter!("gateway_rate_limited_total", "endpoint" => endpoint.to_string()).increment(1);
}

pub fn record_reload(success: bool) {
    let result = if success { "success" } else { "failure" };
    metrics::counter!("gateway_config_reloads_total", "result" => result).increment(1);
}

pub fn record_node_health(node: &str, healthy: bool) {
    metrics::gauge!("gateway_node_health", "node" => node.to_string()).set(if healthy { 1.0 } else { 0.0 });
}
