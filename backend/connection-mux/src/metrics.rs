//! Prometheus metrics for the connection multiplexer

use once_cell::sync::Lazy;
use prometheus::{register_int_counter, register_int_counter_vec, IntCounter, IntCounterVec};

/// Connections accepted on the real listener
#[allow(clippy::expect_used)]
pub(crate) static CONNECTIONS_ACCEPTED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "mux_connections_accepted_total",
        "Total number of connections accepted on the shared listener"
    )
    .expect("Failed to register mux_connections_accepted_total metric")
});

/// Connections delivered to a virtual listener, by protocol
#[allow(clippy::expect_used)]
pub(crate) static CONNECTIONS_ROUTED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "mux_connections_routed_total",
        "Total number of connections delivered to a virtual listener",
        &["protocol"]
    )
    .expect("Failed to register mux_connections_routed_total metric")
});

/// Connections closed without being delivered, by reason
#[allow(clippy::expect_used)]
pub(crate) static CONNECTIONS_DROPPED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "mux_connections_dropped_total",
        "Total number of connections closed before reaching a virtual listener",
        &["reason"]
    )
    .expect("Failed to register mux_connections_dropped_total metric")
});

#[allow(clippy::expect_used)]
pub(crate) static ACCEPT_ERRORS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "mux_accept_errors_total",
        "Total number of failed accept calls on the shared listener"
    )
    .expect("Failed to register mux_accept_errors_total metric")
});

pub(crate) fn dropped(reason: &str) {
    CONNECTIONS_DROPPED.with_label_values(&[reason]).inc();
}
