//! Prometheus metrics for Drip runtime operations

use lazy_static::lazy_static;
use prometheus::{register_histogram_vec, register_int_counter_vec, HistogramVec, IntCounterVec};

lazy_static! {
    /// Total number of status transitions dispatched
    ///
    /// Labels:
    /// - target: "run", "batch"
    /// - status: the status transitioned to
    /// - outcome: "applied", "vetoed", "failure"
    pub static ref STATUS_TRANSITION_TOTAL: IntCounterVec = register_int_counter_vec!(
        "drip_status_transition_total",
        "Total number of run and batch status transitions",
        &["target", "status", "outcome"]
    )
    .expect("drip_status_transition_total metric registration");

    /// Total number of records processed
    ///
    /// Labels:
    /// - definition: backfill definition name
    pub static ref RECORDS_PROCESSED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "drip_records_processed_total",
        "Total number of records processed by backfills",
        &["definition"]
    )
    .expect("drip_records_processed_total metric registration");

    /// Total number of batches planned
    ///
    /// Labels:
    /// - definition: backfill definition name
    pub static ref BATCHES_PLANNED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "drip_batches_planned_total",
        "Total number of batches planned for backfill runs",
        &["definition"]
    )
    .expect("drip_batches_planned_total metric registration");

    /// Duration of processing one page, excluding the sleep that follows
    ///
    /// Labels:
    /// - definition: backfill definition name
    /// - strategy: "whole_batch", "per_element"
    pub static ref PAGE_PROCESSING_DURATION: HistogramVec = register_histogram_vec!(
        "drip_page_processing_duration_seconds",
        "Duration of processing one page of records",
        &["definition", "strategy"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .expect("drip_page_processing_duration_seconds metric registration");
}
