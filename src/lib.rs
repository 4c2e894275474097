//! # fdrun
//!
//! Adaptive-concurrency task runner. Starts every action of a batch at once
//! and, when the environment runs out of file handles (`EMFILE`, `ENFILE`),
//! postpones and retries the affected actions instead of failing the batch.
//!
//! ```no_run
//! # async fn demo() -> Result<(), fdrun::error::BatchError<std::io::Error>> {
//! use fdrun::runner::Runner;
//!
//! let paths = vec!["a.txt".into(), "b.txt".into()];
//! let (contents, summary) = Runner::default()
//!     .for_each_file(paths, |path: std::path::PathBuf| async move {
//!         tokio::fs::read(path).await
//!     })
//!     .collect()
//!     .await?;
//! # let _ = (contents, summary);
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod classify;
pub mod config;
pub mod error;
pub mod event;
pub mod files;
pub mod runner;
pub mod telemetry;

pub use classify::{ErrorCode, Recoverability};
pub use event::{BatchEvent, BatchSummary, Observer};
pub use runner::{ResultStream, Runner, RunnerConfig};
