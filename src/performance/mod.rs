//! Performance measurement module
//!
//! Per-stage latency histograms (`latency`) and bounded-channel backpressure
//! accounting (`queues`) for the ingestion -> analytics -> publish pipeline.

pub mod latency;
pub mod queues;

pub use queues::*;

/// Initialize the performance subsystem (call early in main).
pub fn init() {
    let _ = latency::global_registry();
    let _ = queues::global_queue_registry();
    tracing::info!("performance subsystem initialized");
}

/// Aggregate health/performance report served by the HTTP API.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PerformanceReport {
    pub latency: latency::SystemLatencySummary,
    pub queues: Vec<queues::QueueSnapshot>,
}

pub fn report() -> PerformanceReport {
    PerformanceReport {
        latency: latency::global_registry().summary(),
        queues: queues::global_queue_registry().snapshot(),
    }
}
