//! Metrics collection and exposition.
//!
//! # Metrics
//! - `overlay_sockets_opened_total` (counter): sockets created, by origin
//! - `overlay_active_sockets` (gauge): sockets not yet closed
//! - `overlay_socket_bytes_in_total` / `overlay_socket_bytes_out_total` (counter)
//! - `overlay_listeners_active` (gauge): bound listeners
//! - `overlay_requests_total` (counter): finished exchanges, by outcome
//! - `overlay_consistency_faults_total` (counter): registry misses, by registry
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op
//! - Prometheus exposition is opt-in through configuration

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Install the Prometheus recorder and its scrape endpoint.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_socket_opened(origin: &'static str) {
    metrics::counter!("overlay_sockets_opened_total", "origin" => origin).increment(1);
    metrics::gauge!("overlay_active_sockets").increment(1.0);
}

pub fn record_socket_closed() {
    metrics::gauge!("overlay_active_sockets").decrement(1.0);
}

pub fn record_bytes_in(len: usize) {
    metrics::counter!("overlay_socket_bytes_in_total").increment(len as u64);
}

pub fn record_bytes_out(len: usize) {
    metrics::counter!("overlay_socket_bytes_out_total").increment(len as u64);
}

pub fn record_listener_bound() {
    metrics::gauge!("overlay_listeners_active").increment(1.0);
}

pub fn record_listener_released() {
    metrics::gauge!("overlay_listeners_active").decrement(1.0);
}

pub fn record_request_finished(outcome: &'static str) {
    metrics::counter!("overlay_requests_total", "outcome" => outcome).increment(1);
}

pub fn record_consistency_fault(registry: &'static str) {
    metrics::counter!("overlay_consistency_faults_total", "registry" => registry).increment(1);
}
