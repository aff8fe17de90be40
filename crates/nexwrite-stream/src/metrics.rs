//! Metrics Facade
//!
//! Prometheus counters and gauges for the write path, registered once into
//! the crate-wide registry. Every demultiplexer outcome is counted per
//! topic, which is what makes dropped-message debugging possible without
//! trawling logs.

use lazy_static::lazy_static;
use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};
use std::sync::Once;

static INIT: Once = Once::new();

lazy_static! {
    /// Registry holding every nexwrite metric.
    pub static ref REGISTRY: Registry = Registry::new();

    /// Demultiplexer outcomes per topic (`outcome` label uses
    /// `ProcessOutcome::label`).
    pub static ref MESSAGES_PROCESSED: IntCounterVec = IntCounterVec::new(
        Opts::new("nexwrite_messages_total", "Demultiplexer outcomes"),
        &["topic", "outcome"]
    ).expect("metric can be created");

    /// Transport-level poll errors per topic.
    pub static ref TRANSPORT_ERRORS: IntCounterVec = IntCounterVec::new(
        Opts::new("nexwrite_transport_errors_total", "Broker poll errors"),
        &["topic"]
    ).expect("metric can be created");

    /// Currently active jobs.
    pub static ref ACTIVE_JOBS: IntGauge = IntGauge::new(
        "nexwrite_active_jobs", "File-writing jobs currently consuming"
    ).expect("metric can be created");

    /// File flushes performed across all jobs.
    pub static ref FILE_FLUSHES: IntCounter = IntCounter::new(
        "nexwrite_file_flushes_total", "Periodic and final file flushes"
    ).expect("metric can be created");

    /// Commands rejected by validation.
    pub static ref COMMANDS_REJECTED: IntCounter = IntCounter::new(
        "nexwrite_commands_rejected_total", "Control commands rejected by validation"
    ).expect("metric can be created");
}

/// Register all metrics into [`struct@REGISTRY`]. Safe to call repeatedly.
pub fn register_metrics() {
    INIT.call_once(|| {
        let _ = REGISTRY.register(Box::new(MESSAGES_PROCESSED.clone()));
        let _ = REGISTRY.register(Box::new(TRANSPORT_ERRORS.clone()));
        let _ = REGISTRY.register(Box::new(ACTIVE_JOBS.clone()));
        let _ = REGISTRY.register(Box::new(FILE_FLUSHES.clone()));
        let _ = REGISTRY.register(Box::new(COMMANDS_REJECTED.clone()));
    });
}
