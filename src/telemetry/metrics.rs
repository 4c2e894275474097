//! Runner metric instruments.
//!
//! Built from the globally-registered `MeterProvider`; without one they are
//! no-ops.

use opentelemetry::metrics::{Counter, Histogram, Meter};

use super::INSTRUMENTATION_SCOPE;

fn meter() -> Meter {
    opentelemetry::global::meter(INSTRUMENTATION_SCOPE)
}

/// Instruments one batch reports to.
#[derive(Clone)]
pub struct RunnerInstruments {
    /// Items that completed successfully.
    pub items_completed: Counter<u64>,
    /// Failed attempts put back in the queue. Labels: `class`.
    pub items_postponed: Counter<u64>,
    /// Backoff timers armed after an OS-wide limit.
    pub backoff_armed: Counter<u64>,
    /// Batches reaching an end. Labels: `result` ("completed" | "failed" | "aborted").
    pub batches_finished: Counter<u64>,
    /// Wall time from fan-out to terminal state.
    pub batch_duration_ms: Histogram<f64>,
}

impl RunnerInstruments {
    pub fn new() -> Self {
        let meter = meter();
        Self {
            items_completed: meter
                .u64_counter("fdrun.items.completed")
                .with_description("Number of batch items completed")
                .build(),
            items_postponed: meter
                .u64_counter("fdrun.items.postponed")
                .with_description("Number of attempts postponed on handle exhaustion")
                .build(),
            backoff_armed: meter
                .u64_counter("fdrun.backoff.armed")
                .with_description("Number of backoff timers armed")
                .build(),
            batches_finished: meter
                .u64_counter("fdrun.batches.finished")
                .with_description("Number of batches that reached a terminal state")
                .build(),
            batch_duration_ms: meter
                .f64_histogram("fdrun.batch.duration_ms")
                .with_description("Batch duration in milliseconds")
                .with_unit("ms")
                .build(),
        }
    }
}

impl Default for RunnerInstruments {
    fn default() -> Self {
        Self::new()
    }
}
