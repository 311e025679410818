//! Prometheus metrics for relay observability.

use std::net::SocketAddr;

use metrics::{counter, gauge};

/// Initialize metrics exporter (Prometheus) on the given address.
pub fn init_metrics(addr: SocketAddr) {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new().with_http_listener(addr);
    if let Err(e) = builder.install() {
        tracing::warn!("Failed to install Prometheus exporter: {}", e);
    }
}

/// Record an inbound request on a route.
pub fn request_received(route: &str) {
    counter!("relay_requests_total", "route" => route.to_string()).increment(1);
}

/// Record how a commit was handled (ignored, no_match, dispatched, invalid).
pub fn commit_handled(outcome: &'static str) {
    counter!("relay_commits_total", "outcome" => outcome).increment(1);
}

/// Record a build start request and whether the CI accepted it.
pub fn build_start_requested(accepted: bool) {
    let result = if accepted { "accepted" } else { "rejected" };
    counter!("relay_build_starts_total", "result" => result).increment(1);
}

/// Record a chat notice post/delete.
pub fn notice_sent(kind: &'static str, ok: bool) {
    let result = if ok { "ok" } else { "failed" };
    counter!("relay_notices_total", "kind" => kind, "result" => result).increment(1);
}

/// Record a lifecycle tracker rejection.
pub fn tracker_error(kind: &'static str) {
    counter!("relay_tracker_errors_total", "kind" => kind).increment(1);
}

/// Set the number of builds currently marked running.
pub fn running_builds(count: usize) {
    gauge!("relay_running_builds").set(count as f64);
}
