//! Worker metrics.

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::{WorkerError, WorkerResult};

/// Metric names as constants for consistency.
pub mod names {
    pub const JOBS_COMPLETED_TOTAL: &str = "vfactory_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "vfactory_jobs_failed_total";
    pub const JOBS_IN_FLIGHT: &str = "vfactory_jobs_in_flight";
    pub const STAGE_DURATION_SECONDS: &str = "vfactory_stage_duration_seconds";
    pub const JOB_DURATION_SECONDS: &str = "vfactory_job_duration_seconds";
}

/// Serve Prometheus metrics on `0.0.0.0:<port>`.
pub fn install_prometheus(port: u16) -> WorkerResult<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| WorkerError::config_error(format!("Failed to start metrics exporter: {}", e)))
}

pub fn record_job_completed(duration: Duration) {
    counter!(names::JOBS_COMPLETED_TOTAL).increment(1);
    histogram!(names::JOB_DURATION_SECONDS, "status" => "completed").record(duration.as_secs_f64());
}

/// `step` is the label of the step that failed.
pub fn record_job_failed(step: &str, duration: Duration) {
    counter!(names::JOBS_FAILED_TOTAL, "step" => step.to_string()).increment(1);
    histogram!(names::JOB_DURATION_SECONDS, "status" => "failed").record(duration.as_secs_f64());
}

pub fn record_stage_duration(stage: &str, success: bool, duration: Duration) {
    histogram!(
        names::STAGE_DURATION_SECONDS,
        "stage" => stage.to_string(),
        "status" => if success { "ok" } else { "error" }
    )
    .record(duration.as_secs_f64());
}

pub fn set_jobs_in_flight(count: usize) {
    gauge!(names::JOBS_IN_FLIGHT).set(count as f64);
}
