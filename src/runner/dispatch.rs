//! The batch control task: dispatch, postponement and backoff bookkeeping.
//!
//! All batch state lives here and is only touched from this task. Actions run
//! on the runtime as separate tasks; their settlements come back through a
//! `JoinSet` one at a time.

use std::collections::VecDeque;
use std::future::Future;
use std::time::Instant;

use opentelemetry::KeyValue;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::backoff::Backoff;
use crate::classify::Recoverability;
use crate::event::{BatchEvent, BatchSummary};
use crate::telemetry::metrics::RunnerInstruments;

use super::RunnerConfig;

/// Whether the control loop keeps going after an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// Mutable progress of the batch.
#[derive(Debug, Default)]
struct RunState {
    failed: bool,
    completed: usize,
}

#[derive(Debug, Default)]
struct Tally {
    attempts: u64,
    process_limit_hits: u64,
    system_limit_hits: u64,
    backoff_delays_ms: Vec<u64>,
}

pub(crate) struct Dispatch<I, T, E, F, C> {
    batch_id: Uuid,
    items: Vec<I>,
    action: F,
    classify: C,
    tx: mpsc::UnboundedSender<BatchEvent<T, E>>,
    in_flight: JoinSet<(usize, Result<T, E>)>,
    /// Indices into `items`, oldest failure first.
    postponed: VecDeque<usize>,
    backoff: Backoff,
    state: RunState,
    tally: Tally,
    started: Instant,
    instruments: RunnerInstruments,
}

impl<I, T, E, F, Fut, C> Dispatch<I, T, E, F, C>
where
    I: Clone + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
    F: Fn(I) -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    C: Fn(&E) -> Recoverability + Send + 'static,
{
    pub(crate) fn new(
        batch_id: Uuid,
        items: Vec<I>,
        action: F,
        classify: C,
        config: &RunnerConfig,
        tx: mpsc::UnboundedSender<BatchEvent<T, E>>,
    ) -> Self {
        Self {
            batch_id,
            items,
            action,
            classify,
            tx,
            in_flight: JoinSet::new(),
            postponed: VecDeque::new(),
            backoff: Backoff::new(config.initial_backoff, config.max_backoff),
            state: RunState::default(),
            tally: Tally::default(),
            started: Instant::now(),
            instruments: RunnerInstruments::new(),
        }
    }

    /// Fan out every item at once.
    ///
    /// Returns `false` when the batch is already terminal (empty batch), in
    /// which case there is nothing left to drive.
    pub(crate) fn start(&mut self) -> bool {
        if self.items.is_empty() {
            self.finish_completed();
            return false;
        }
        for index in 0..self.items.len() {
            self.dispatch(index);
        }
        debug!(items = self.items.len(), "batch dispatched");
        true
    }

    /// Serve settlements and timer ticks until the batch is terminal or the
    /// subscriber goes away.
    pub(crate) async fn drive(mut self) {
        let mut stall_reported = false;
        loop {
            if self.in_flight.is_empty() && !self.backoff.is_pending() {
                if !stall_reported {
                    warn!(
                        postponed = self.postponed.len(),
                        "nothing in flight and no backoff pending; batch is stalled"
                    );
                    stall_reported = true;
                }
            } else {
                stall_reported = false;
            }

            let flow = tokio::select! {
                joined = next_settled(&mut self.in_flight) => self.on_settled(joined),
                () = self.backoff.fired() => {
                    debug!("backoff timer fired");
                    self.retry_next();
                    Flow::Continue
                }
                () = self.tx.closed() => {
                    info!(
                        completed = self.state.completed,
                        "result stream dropped, cancelling batch"
                    );
                    Flow::Stop
                }
            };

            if flow == Flow::Stop {
                break;
            }
        }

        if self.backoff.cancel() {
            debug!("pending backoff timer cancelled on termination");
        }
        // Running actions are not aborted; their outcomes are simply dropped.
        self.in_flight.detach_all();
    }

    fn dispatch(&mut self, index: usize) {
        let attempt = (self.action)(self.items[index].clone());
        self.tally.attempts += 1;
        self.in_flight.spawn(async move { (index, attempt.await) });
    }

    fn retry_next(&mut self) {
        if let Some(index) = self.postponed.pop_front() {
            debug!(
                item = index,
                remaining = self.postponed.len(),
                "retrying postponed item"
            );
            self.dispatch(index);
        }
    }

    fn on_settled(&mut self, joined: Result<(usize, Result<T, E>), JoinError>) -> Flow {
        match joined {
            Ok((_, Ok(value))) => self.on_success(value),
            Ok((index, Err(error))) => self.on_failure(index, error),
            Err(join_error) => {
                error!(error = %join_error, "action task did not complete, aborting batch");
                self.state.failed = true;
                self.instruments
                    .batches_finished
                    .add(1, &[KeyValue::new("result", "aborted")]);
                Flow::Stop
            }
        }
    }

    fn on_success(&mut self, value: T) -> Flow {
        if self.state.failed {
            return Flow::Continue;
        }

        // Capacity exists right now; retry directly instead of waiting.
        if self.backoff.cancel() {
            debug!("completion cancelled pending backoff timer");
        }

        let _ = self.tx.send(BatchEvent::Item(value));
        self.state.completed += 1;
        self.instruments.items_completed.add(1, &[]);

        if self.state.completed == self.items.len() {
            self.finish_completed();
            return Flow::Stop;
        }

        self.retry_next();
        Flow::Continue
    }

    fn on_failure(&mut self, index: usize, error: E) -> Flow {
        if self.state.failed {
            return Flow::Continue;
        }

        let class = (self.classify)(&error);
        match class {
            Recoverability::ProcessLimit => {
                self.tally.process_limit_hits += 1;
                self.postpone(index, class);
            }
            Recoverability::SystemLimit => {
                self.tally.system_limit_hits += 1;
                self.postpone(index, class);
                if let Some(delay) = self.backoff.arm() {
                    let delay_ms = delay.as_millis() as u64;
                    self.tally.backoff_delays_ms.push(delay_ms);
                    self.instruments.backoff_armed.add(1, &[]);
                    info!(
                        delay_ms,
                        next_delay_ms = self.backoff.next_delay().as_millis() as u64,
                        "OS-wide handle limit reached, backoff timer armed"
                    );
                }
            }
            Recoverability::Unrecoverable => {
                self.state.failed = true;
                self.backoff.cancel();
                warn!(
                    item = index,
                    completed = self.state.completed,
                    "unrecoverable action error, failing batch"
                );
                self.instruments
                    .batches_finished
                    .add(1, &[KeyValue::new("result", "failed")]);
                self.record_duration();
                let _ = self.tx.send(BatchEvent::Failed(error));
                return Flow::Stop;
            }
        }
        Flow::Continue
    }

    fn postpone(&mut self, index: usize, class: Recoverability) {
        self.postponed.push_back(index);
        self.instruments
            .items_postponed
            .add(1, &[KeyValue::new("class", class.as_str())]);
        debug!(
            item = index,
            class = %class,
            postponed = self.postponed.len(),
            "item postponed"
        );
    }

    fn finish_completed(&mut self) {
        let summary = BatchSummary {
            batch_id: self.batch_id,
            items: self.items.len(),
            attempts: self.tally.attempts,
            process_limit_hits: self.tally.process_limit_hits,
            system_limit_hits: self.tally.system_limit_hits,
            backoff_delays_ms: std::mem::take(&mut self.tally.backoff_delays_ms),
            elapsed_ms: self.started.elapsed().as_millis() as u64,
        };
        info!(
            items = summary.items,
            attempts = summary.attempts,
            elapsed_ms = summary.elapsed_ms,
            "batch completed"
        );
        self.instruments
            .batches_finished
            .add(1, &[KeyValue::new("result", "completed")]);
        self.record_duration();
        let _ = self.tx.send(BatchEvent::Completed(summary));
    }

    fn record_duration(&self) {
        self.instruments
            .batch_duration_ms
            .record(self.started.elapsed().as_secs_f64() * 1000.0, &[]);
    }
}

/// Next settled action, or never if nothing is in flight.
async fn next_settled<R: 'static>(set: &mut JoinSet<R>) -> Result<R, JoinError> {
    match set.join_next().await {
        Some(joined) => joined,
        None => std::future::pending().await,
    }
}
