//! Prometheus metrics for the worker.

use std::net::SocketAddr;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Start the Prometheus exporter on `addr`.
///
/// Must be called from within a tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()
}

/// Metric names as constants for consistency.
pub mod names {
    // Queue metrics
    pub const BROKER_CONNECT_ATTEMPTS_TOTAL: &str = "rnode_broker_connect_attempts_total";
    pub const BROKER_BACKOFF_SECONDS: &str = "rnode_broker_backoff_seconds";
    pub const ASSIGNMENTS_IN_FLIGHT: &str = "rnode_assignments_in_flight";

    // Assignment metrics
    pub const ASSIGNMENTS_TOTAL: &str = "rnode_assignments_total";
    pub const ASSIGNMENT_FAILURES_TOTAL: &str = "rnode_assignment_failures_total";

    // Processing metrics
    pub const DOWNLOAD_DURATION_SECONDS: &str = "rnode_download_duration_seconds";
    pub const RENDER_DURATION_SECONDS: &str = "rnode_render_duration_seconds";
    pub const UPLOAD_DURATION_SECONDS: &str = "rnode_upload_duration_seconds";
}

/// Record a broker connection attempt.
pub fn record_connect_attempt(success: bool) {
    let labels = [("result", if success { "ok" } else { "error" })];
    counter!(names::BROKER_CONNECT_ATTEMPTS_TOTAL, &labels).increment(1);
}

pub fn record_backoff(delay_secs: f64) {
    histogram!(names::BROKER_BACKOFF_SECONDS).record(delay_secs);
}

pub fn set_assignments_in_flight(count: usize) {
    gauge!(names::ASSIGNMENTS_IN_FLIGHT).set(count as f64);
}

/// Record how a delivery was resolved (`ack`, `requeue`, `skipped_nack`, ...).
pub fn record_assignment(resolution: &'static str) {
    let labels = [("resolution", resolution)];
    counter!(names::ASSIGNMENTS_TOTAL, &labels).increment(1);
}

pub fn record_assignment_failure(kind: &'static str) {
    let labels = [("kind", kind)];
    counter!(names::ASSIGNMENT_FAILURES_TOTAL, &labels).increment(1);
}

pub fn record_download_duration(duration_secs: f64) {
    histogram!(names::DOWNLOAD_DURATION_SECONDS).record(duration_secs);
}

pub fn record_render_duration(duration_secs: f64) {
    histogram!(names::RENDER_DURATION_SECONDS).record(duration_secs);
}

pub fn record_upload_duration(duration_secs: f64) {
    histogram!(names::UPLOAD_DURATION_SECONDS).record(duration_secs);
}
