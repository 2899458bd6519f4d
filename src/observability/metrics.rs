//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_requests_total` (counter): requests by method, status, node
//! - `proxy_request_duration_seconds` (histogram): end-to-end latency
//! - `proxy_live_nodes` (gauge): size of the scheduler's live set
//! - `proxy_stale_tokens_total` (counter): tokens discarded after removal/rebalance
//! - `proxy_rebalance_changes_total` (counter): weights lowered by the rebalancer
//!
//! Recording is a no-op until [`init_metrics`] installs the exporter.

use std::net::SocketAddr;
use std::time::Instant;
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter with its own HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

/// Record a completed data path request.
pub fn record_request(method: &str, status: u16, node: &str, start: Instant) {
    ::metrics::counter!(
        "proxy_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string(),
        "node" => node.to_string()
    )
    .increment(1);
    ::metrics::histogram!("proxy_request_duration_seconds", "method" => method.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_live_nodes(count: usize) {
    ::metrics::gauge!("proxy_live_nodes").set(count as f64);
}

pub fn record_stale_token() {
    ::metrics::counter!("proxy_stale_tokens_total").increment(1);
}

pub fn record_rebalance_change() {
    ::metrics::counter!("proxy_rebalance_changes_total").increment(1);
}
