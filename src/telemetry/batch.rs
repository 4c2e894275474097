//! Batch span helpers.

use tracing::Span;
use uuid::Uuid;

/// Span wrapping a batch from fan-out to its terminal state.
pub fn start_batch_span(batch_id: &Uuid, items: usize) -> Span {
    tracing::info_span!(
        "batch.run",
        "batch.id" = %batch_id,
        "batch.items" = items,
    )
}
