//! Events a batch emits to its subscriber.
//!
//! A batch produces zero or more `Item` events in completion order, followed
//! by exactly one terminal event: `Failed` or `Completed`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One event on a batch's result stream.
#[derive(Debug)]
pub enum BatchEvent<T, E> {
    /// An item completed with this value.
    Item(T),
    /// An unrecoverable error ended the batch. Terminal.
    Failed(E),
    /// Every item completed. Terminal.
    Completed(BatchSummary),
}

impl<T, E> BatchEvent<T, E> {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, BatchEvent::Item(_))
    }
}

/// What it took to complete a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub batch_id: Uuid,
    /// Number of items in the batch.
    pub items: usize,
    /// Action invocations, retries included.
    pub attempts: u64,
    /// Failures classified as a process-level handle limit.
    pub process_limit_hits: u64,
    /// Failures classified as an OS-wide handle limit.
    pub system_limit_hits: u64,
    /// Delay of every backoff timer armed, in arming order.
    pub backoff_delays_ms: Vec<u64>,
    pub elapsed_ms: u64,
}

impl BatchSummary {
    /// Attempts beyond the first one per item.
    pub fn retries(&self) -> u64 {
        self.attempts.saturating_sub(self.items as u64)
    }
}

/// Push-style consumer of a batch.
///
/// `on_next` is called once per completed item; then exactly one of
/// `on_error` or `on_complete`.
pub trait Observer<T, E> {
    fn on_next(&mut self, value: T);

    fn on_error(&mut self, error: E);

    fn on_complete(&mut self, summary: BatchSummary) {
        let _ = summary;
    }
}
