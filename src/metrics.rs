//! Prometheus counters for the coordinator.
//!
//! Registered in the default registry, which pingora's prometheus HTTP
//! service exposes.

use once_cell::sync::Lazy;
use prometheus::{register_int_counter_vec, IntCounterVec};

static DISPATCHED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "routerflow_dispatched_total",
        "Per-router provisioning events dispatched to workers",
        &["flow"]
    )
    .unwrap()
});

static TERMINAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "routerflow_terminal_total",
        "Terminal aggregate events published",
        &[
            "flow",    // verb of the flow
            "outcome", // done, error
        ]
    )
    .unwrap()
});

static MERGE_CONFLICTS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "routerflow_merge_conflicts_total",
        "Compare-and-put conflicts while merging worker outcomes",
        &["flow"]
    )
    .unwrap()
});

static DROPPED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "routerflow_dropped_total",
        "Inbound messages dropped without producing an event",
        &["flow", "reason"]
    )
    .unwrap()
});

pub fn record_dispatch(flow: &str) {
    DISPATCHED.with_label_values(&[flow]).inc();
}

pub fn record_terminal(flow: &str, outcome: &str) {
    TERMINAL.with_label_values(&[flow, outcome]).inc();
}

pub fn record_merge_conflict(flow: &str) {
    MERGE_CONFLICTS.with_label_values(&[flow]).inc();
}

pub fn record_dropped(flow: &str, reason: &str) {
    DROPPED.with_label_values(&[flow, reason]).inc();
}
