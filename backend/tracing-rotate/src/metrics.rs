//! Prometheus metrics for the rotating writer

use once_cell::sync::Lazy;
use prometheus::{register_int_counter, IntCounter};

/// Total number of times the writer switched to a new file
#[allow(clippy::expect_used)]
pub static LOG_ROTATIONS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "log_file_rotations_total",
        "Total number of times the log writer switched to a new dated file"
    )
    .expect("Failed to register log_file_rotations_total metric")
});

/// Rotations abandoned because the new file could not be opened
#[allow(clippy::expect_used)]
pub static LOG_ROTATION_FAILURES: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "log_file_rotation_failures_total",
        "Total number of rotations that kept the previous file because the new one could not be opened"
    )
    .expect("Failed to register log_file_rotation_failures_total metric")
});

/// Forces registration so the counters are exported before the first rotation.
pub(crate) fn initialize_all_metrics() {
    Lazy::force(&LOG_ROTATIONS);
    Lazy::force(&LOG_ROTATION_FAILURES);
}
