//! Metrics recording for store operations.

use std::time::Instant;

/// Records operation metrics for key store operations.
///
/// Records two metrics for each operation:
/// 1. `deltafetch_store_operations_total` - Counter for operation count by status
/// 2. `deltafetch_store_operation_duration_ms` - Histogram for operation latency
///
/// # Arguments
///
/// * `backend` - Backend name (e.g., "sqlite", "memory")
/// * `operation` - Operation name (e.g., "get", "put")
/// * `start` - Operation start time from `Instant::now()`
/// * `status` - Operation status ("success" or "error")
pub fn record_operation_metrics(
    backend: &'static str,
    operation: &'static str,
    start: Instant,
    status: &'static str,
) {
    metrics::counter!(
        "deltafetch_store_operations_total",
        "backend" => backend,
        "operation" => operation,
        "status" => status
    )
    .increment(1);
    metrics::histogram!(
        "deltafetch_store_operation_duration_ms",
        "backend" => backend,
        "operation" => operation,
        "status" => status
    )
    .record(start.elapsed().as_secs_f64() * 1000.0);
}

/// Maps a result to the status label used by [`record_operation_metrics`].
pub const fn status_label<T, E>(result: &Result<T, E>) -> &'static str {
    if result.is_ok() { "success" } else { "error" }
}
