//! Consumer side of a batch.

use tokio::sync::mpsc;

use crate::error::BatchError;
use crate::event::{BatchEvent, BatchSummary, Observer};

/// Single-subscriber stream of a batch's events.
///
/// Dropping the stream cancels the batch: nothing further is dispatched and
/// a pending backoff timer is discarded. Actions already running are left to
/// finish and their outcomes are ignored.
#[derive(Debug)]
pub struct ResultStream<T, E> {
    rx: mpsc::UnboundedReceiver<BatchEvent<T, E>>,
    finished: bool,
}

impl<T, E> ResultStream<T, E> {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<BatchEvent<T, E>>) -> Self {
        Self {
            rx,
            finished: false,
        }
    }

    /// Next event, or `None` after the terminal one.
    ///
    /// Also returns `None` if the batch was aborted before reaching a
    /// terminal state.
    pub async fn next(&mut self) -> Option<BatchEvent<T, E>> {
        if self.finished {
            return None;
        }
        let event = self.rx.recv().await;
        match &event {
            Some(e) if !e.is_terminal() => {}
            _ => {
                self.finished = true;
                self.rx.close();
            }
        }
        event
    }

    /// Drive the stream to its end, pushing every event into `observer`.
    ///
    /// Returns `false` if the batch was aborted without a terminal event.
    pub async fn subscribe<O>(mut self, observer: &mut O) -> bool
    where
        O: Observer<T, E> + ?Sized,
    {
        while let Some(event) = self.next().await {
            match event {
                BatchEvent::Item(value) => observer.on_next(value),
                BatchEvent::Failed(error) => {
                    observer.on_error(error);
                    return true;
                }
                BatchEvent::Completed(summary) => {
                    observer.on_complete(summary);
                    return true;
                }
            }
        }
        false
    }

    /// Gather all values in completion order.
    pub async fn collect(mut self) -> Result<(Vec<T>, BatchSummary), BatchError<E>> {
        let mut values = Vec::new();
        while let Some(event) = self.next().await {
            match event {
                BatchEvent::Item(value) => values.push(value),
                BatchEvent::Failed(error) => return Err(BatchError::Action(error)),
                BatchEvent::Completed(summary) => return Ok((values, summary)),
            }
        }
        Err(BatchError::Aborted)
    }
}
