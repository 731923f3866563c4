//! Prometheus metrics for portier-server.
//!
//! Task workers expose their counters in Prometheus format over a small HTTP listener.

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use std::net::SocketAddr;

/// Install the global recorder and start serving `/metrics` on `addr`.
///
/// Must be called once, inside the runtime, before any metrics are recorded.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    describe_metrics();
    Ok(())
}

fn describe_metrics() {
    describe_counter!(
        "portier_tasks_total",
        "Processed task deliveries by family and outcome"
    );
    describe_histogram!(
        "portier_task_duration_seconds",
        "Time spent handling one task delivery"
    );
    describe_counter!(
        "portier_tasks_published_total",
        "Tasks published to a family's main queue"
    );
    describe_counter!(
        "portier_notifications_sent_total",
        "Notification emails handed to the dispatcher"
    );
    describe_counter!(
        "portier_reports_generated_total",
        "Reports generated by the report worker"
    );
    describe_counter!(
        "portier_cleanup_deleted_total",
        "Expired tokens and sessions removed by the hygiene sweep"
    );
}
