//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_requests_total` (counter): requests by status and cache outcome
//! - `proxy_request_duration_seconds` (histogram): request latency
//! - `proxy_rate_limited_total` (counter): admissions denied
//! - `proxy_upstream_errors_total` (counter): fetch failures by kind
//! - `proxy_cache_entries_reclaimed_total` (counter): compaction removals
//! - `proxy_rate_buckets_evicted_total` (counter): idle bucket evictions
//!
//! # Design Decisions
//! - Recording helpers are free functions so call sites stay one-liners
//! - Exporter runs on its own bind address, separate from proxy traffic

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

/// Record a completed request.
pub fn record_request(status: u16, cache_outcome: &'static str, start: Instant) {
    counter!(
        "proxy_requests_total",
        "status" => status.to_string(),
        "cache" => cache_outcome,
    )
    .increment(1);
    histogram!("proxy_request_duration_seconds").record(start.elapsed().as_secs_f64());
}

/// Record a denied admission.
pub fn record_rate_limited() {
    counter!("proxy_rate_limited_total").increment(1);
}

/// Record an upstream fetch failure by kind.
pub fn record_upstream_error(kind: &'static str) {
    counter!("proxy_upstream_errors_total", "kind" => kind).increment(1);
}

/// Record entries removed by a compaction sweep.
pub fn record_cache_entries_reclaimed(count: usize) {
    counter!("proxy_cache_entries_reclaimed_total").increment(count as u64);
}

/// Record rate-limit buckets evicted for idleness.
pub fn record_buckets_evicted(count: usize) {
    counter!("proxy_rate_buckets_evicted_total").increment(count as u64);
}
