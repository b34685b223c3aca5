//! Core metrics definitions.
//!
//! All metrics follow Prometheus naming conventions:
//! - `_total` suffix for counters
//! - `_seconds` suffix for histograms measuring duration

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, histogram};

/// Register all core metrics with descriptions.
///
/// Call once after installing a recorder so exporters carry the metadata.
pub fn register_core_metrics() {
    // Task metrics
    describe_counter!("vpool_tasks_submitted_total", "Total number of background tasks submitted");
    describe_counter!("vpool_tasks_finished_total", "Total number of tasks that finished");
    describe_counter!(
        "vpool_tasks_failed_total",
        "Total number of tasks that failed (errors and panics)"
    );
    describe_counter!(
        "vpool_tasks_rejected_total",
        "Total number of submissions refused because the queue was full"
    );
    describe_gauge!("vpool_tasks_pending", "Tasks admitted and not yet terminal");

    // Pool metrics
    describe_counter!("vpool_pool_created_total", "Total number of pools created (by type)");
    describe_counter!(
        "vpool_pool_operation_failures_total",
        "Total number of failed pool operations (by operation)"
    );
    describe_histogram!(
        "vpool_pool_operation_duration_seconds",
        "Duration of pool operations against the manager (by operation)"
    );

    // Scan metrics
    describe_counter!("vpool_scans_started_total", "Total number of deep scans started");
    describe_counter!("vpool_scan_images_found_total", "Total number of images linked by scans");
    describe_counter!("vpool_scan_cleanups_total", "Total number of scan pool teardowns");
    describe_counter!(
        "vpool_scan_cleanup_errors_total",
        "Total number of failed teardown steps (logged and ignored)"
    );

    // Database metrics
    describe_counter!("vpool_db_errors_total", "Total object store failures (by operation)");
}

pub fn record_pool_created(pool_type: &str) {
    counter!("vpool_pool_created_total", "type" => pool_type.to_string()).increment(1);
}

pub fn record_pool_operation(operation: &str, duration_secs: f64) {
    histogram!("vpool_pool_operation_duration_seconds", "operation" => operation.to_string())
        .record(duration_secs);
}

pub fn record_pool_failure(operation: &str) {
    counter!("vpool_pool_operation_failures_total", "operation" => operation.to_string())
        .increment(1);
}
