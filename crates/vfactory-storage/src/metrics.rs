//! Storage metrics.
//!
//! - Operation counters by backend, operation and outcome
//! - Retry counters

use metrics::{counter, histogram};

/// Metric name constants for consistency.
pub mod names {
    /// Total storage operations by backend, operation and status.
    pub const OPERATIONS_TOTAL: &str = "vfactory_storage_operations_total";

    /// Total retry attempts by backend and operation.
    pub const RETRIES_TOTAL: &str = "vfactory_storage_retries_total";

    /// Operation latency in seconds by backend and operation.
    pub const LATENCY_SECONDS: &str = "vfactory_storage_latency_seconds";
}

/// Record a finished storage operation.
pub fn record_operation(backend: &str, operation: &str, success: bool, latency_ms: f64) {
    counter!(
        names::OPERATIONS_TOTAL,
        "backend" => backend.to_string(),
        "operation" => operation.to_string(),
        "status" => if success { "ok" } else { "error" }
    )
    .increment(1);

    histogram!(
        names::LATENCY_SECONDS,
        "backend" => backend.to_string(),
        "operation" => operation.to_string()
    )
    .record(latency_ms / 1000.0);
}

/// Record a retry attempt.
pub fn record_retry(backend: &str, operation: &str) {
    counter!(
        names::RETRIES_TOTAL,
        "backend" => backend.to_string(),
        "operation" => operation.to_string()
    )
    .increment(1);
}
