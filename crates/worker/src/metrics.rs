// crates/worker/src/metrics.rs
//! Prometheus exporter for one worker process.
//!
//! Claim and execution counters are recorded by the worker loop, so each
//! worker serves its own scrape endpoint on the stage's `metrics_port`.

use std::net::SocketAddr;

use metrics::describe_counter;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the global recorder with an HTTP listener on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    describe_metrics();
    tracing::info!(%addr, "Prometheus metrics endpoint initialized");
    Ok(())
}

pub fn describe_metrics() {
    describe_counter!("meshline_stage_claims_total", "Stage claims won, by stage");
    describe_counter!(
        "meshline_stage_executions_total",
        "Stage executions, by stage and outcome"
    );
}
