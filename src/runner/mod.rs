//! Adaptive runner: full fan-out that degrades under handle exhaustion.
//!
//! Every item is started at once. Items failing with a recoverable
//! exhaustion error are postponed and retried, one per completion or per
//! backoff tick, until they succeed or the batch fails.

mod dispatch;
pub mod stream;

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::Instrument;
use uuid::Uuid;

use crate::classify::{ErrorCode, Recoverability, classify_by_code, limit_predicate};
use crate::telemetry::batch::start_batch_span;

use dispatch::Dispatch;
pub use stream::ResultStream;

/// Default delay of the first backoff timer in a batch.
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_secs(2);

/// Tuning for the runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerConfig {
    /// Delay of the first backoff timer armed in a batch.
    pub initial_backoff: Duration,
    /// Ceiling for the doubled delay. `None` lets it grow without bound.
    pub max_backoff: Option<Duration>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: None,
        }
    }
}

/// Runs batches of async actions.
///
/// Cheap to clone; each call to a `run*` method starts an independent batch
/// with its own queue and backoff state.
#[derive(Debug, Clone, Default)]
pub struct Runner {
    config: RunnerConfig,
}

impl Runner {
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Run `action` for every item, classifying failures by their
    /// `EMFILE`/`ENFILE` code.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn run<I, T, E, F, Fut>(
        &self,
        items: impl IntoIterator<Item = I>,
        action: F,
    ) -> ResultStream<T, E>
    where
        I: Clone + Send + 'static,
        T: Send + 'static,
        E: ErrorCode + Send + 'static,
        F: Fn(I) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        self.run_with(items, action, classify_by_code::<E>)
    }

    /// Run `action` for every item with a caller-supplied classifier.
    ///
    /// All actions are started before this returns. Results arrive on the
    /// returned stream in completion order.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn run_with<I, T, E, F, Fut, C>(
        &self,
        items: impl IntoIterator<Item = I>,
        action: F,
        classify: C,
    ) -> ResultStream<T, E>
    where
        I: Clone + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
        F: Fn(I) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        C: Fn(&E) -> Recoverability + Send + 'static,
    {
        let items: Vec<I> = items.into_iter().collect();
        let batch_id = Uuid::new_v4();
        let span = start_batch_span(&batch_id, items.len());
        let (tx, rx) = mpsc::unbounded_channel();

        let mut dispatch = Dispatch::new(batch_id, items, action, classify, &self.config, tx);
        if span.in_scope(|| dispatch.start()) {
            tokio::spawn(dispatch.drive().instrument(span));
        }

        ResultStream::new(rx)
    }

    /// Run `action` once per path.
    ///
    /// Shorthand for [`Runner::run`] with paths as items.
    pub fn for_each_file<T, E, F, Fut>(
        &self,
        paths: impl IntoIterator<Item = PathBuf>,
        action: F,
    ) -> ResultStream<T, E>
    where
        T: Send + 'static,
        E: ErrorCode + Send + 'static,
        F: Fn(PathBuf) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        self.run(paths, action)
    }

    /// Run a set of zero-argument async callables.
    ///
    /// `is_limit` tells whether an error means "too much is running"; such
    /// failures are postponed until the next completion. Any other error
    /// fails the batch.
    pub fn run_all<G, Fut, T, E, P>(
        &self,
        thunks: impl IntoIterator<Item = G>,
        is_limit: P,
    ) -> ResultStream<T, E>
    where
        G: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
        P: Fn(&E) -> bool + Send + 'static,
    {
        let thunks: Vec<Arc<G>> = thunks.into_iter().map(Arc::new).collect();
        self.run_with(thunks, |thunk: Arc<G>| (*thunk)(), limit_predicate(is_limit))
    }
}
