// crates/server/src/metrics.rs
//! Prometheus metrics for the gateway process.
//!
//! Stage claim and execution counters live in the worker processes, each
//! with its own endpoint.

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

/// Global Prometheus handle for rendering metrics.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Returns `true` if initialization succeeded, `false` if already initialized.
pub fn init_metrics() -> bool {
    if PROMETHEUS_HANDLE.get().is_some() {
        return false;
    }

    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();

    if metrics::set_global_recorder(recorder).is_err() {
        tracing::warn!("Failed to set global metrics recorder (already set)");
        return false;
    }

    if PROMETHEUS_HANDLE.set(handle).is_err() {
        tracing::warn!("Failed to store Prometheus handle (already set)");
    }

    describe_metrics();

    tracing::info!("Prometheus metrics initialized");
    true
}

fn describe_metrics() {
    describe_counter!("meshline_jobs_submitted_total", "Jobs created through the gateway");
    describe_counter!("meshline_jobs_completed_total", "Jobs whose terminal stage finished");
    describe_counter!("meshline_jobs_failed_total", "Jobs reported failed, by failed stage");
    describe_counter!("meshline_jobs_timed_out_total", "Waits that gave up at the deadline");
    describe_histogram!(
        "meshline_job_wait_seconds",
        "Time spent waiting for the terminal stage, by outcome"
    );
}

/// Render current metrics in Prometheus text format.
///
/// Returns `None` if metrics are not initialized.
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|h| h.render())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_then_render() {
        // Another test may have installed the recorder first; either way a
        // handle must be available afterwards.
        let _ = init_metrics();
        assert!(!init_metrics());
        assert!(render_metrics().is_some());
    }
}
