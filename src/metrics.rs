//! Prometheus metrics.
//!
//! Recording goes through the `metrics` facade; the exporter handle renders
//! the text exposition served at `/metrics`.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;
use tracing::warn;

static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global recorder once and return its render handle.
///
/// If another recorder is already installed, a detached recorder is built so
/// `/metrics` still answers (empty) instead of failing.
pub fn handle() -> PrometheusHandle {
    HANDLE
        .get_or_init(|| match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => handle,
            Err(e) => {
                warn!("Prometheus recorder not installed: {}", e);
                PrometheusBuilder::new().build_recorder().handle()
            }
        })
        .clone()
}

/// One refresh run finished (`outcome` is `ok` or an error kind)
pub fn record_refresh(reason: &'static str, outcome: &'static str) {
    metrics::counter!("playlink_refresh_total", "reason" => reason, "outcome" => outcome)
        .increment(1);
}

/// A caller joined a refresh already in flight
pub fn record_refresh_joined() {
    metrics::counter!("playlink_refresh_joined_total").increment(1);
}

/// One batch-scan item processed
pub fn record_scan_item(outcome: &'static str) {
    metrics::counter!("playlink_scan_items_total", "outcome" => outcome).increment(1);
}

/// Time spent on the player request, failed sends included (`outcome` is
/// `ok` or `error`)
pub fn record_resolve_duration(start: Instant, outcome: &'static str) {
    metrics::histogram!("playlink_resolve_duration_seconds", "outcome" => outcome)
        .record(start.elapsed().as_secs_f64());
}

/// One HTTP response, labelled with the matched route template
pub fn record_request(endpoint: &str, status: u16) {
    metrics::counter!(
        "playlink_http_requests_total",
        "endpoint" => endpoint.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}
