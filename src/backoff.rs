//! The batch's single backoff timer.
//!
//! Armed when an OS-wide limit is hit and no timer is pending. Each newly
//! armed timer doubles the delay used by the next one. Any successful
//! completion cancels it, since that already proves some capacity exists.

use std::pin::Pin;
use std::time::Duration;

use tokio::time::{Sleep, sleep};

/// One-shot, re-armable backoff timer with doubling delay.
#[derive(Debug)]
pub struct Backoff {
    next_delay: Duration,
    max_delay: Option<Duration>,
    pending: Option<Pin<Box<Sleep>>>,
}

impl Backoff {
    pub fn new(initial_delay: Duration, max_delay: Option<Duration>) -> Self {
        Self {
            next_delay: clamp(initial_delay, max_delay),
            max_delay,
            pending: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Delay the next armed timer will use.
    pub fn next_delay(&self) -> Duration {
        self.next_delay
    }

    /// Arm the timer unless one is already pending.
    ///
    /// Returns the delay of the newly armed timer, or `None` if one was
    /// already pending (the delay is left untouched in that case).
    pub fn arm(&mut self) -> Option<Duration> {
        if self.pending.is_some() {
            return None;
        }
        let delay = self.next_delay;
        self.pending = Some(Box::pin(sleep(delay)));
        self.next_delay = clamp(delay.saturating_mul(2), self.max_delay);
        Some(delay)
    }

    /// Drop the pending timer, if any. Returns whether one was pending.
    pub fn cancel(&mut self) -> bool {
        self.pending.take().is_some()
    }

    /// Resolve when the pending timer fires, clearing it.
    ///
    /// Never resolves while no timer is pending, so it can sit in a
    /// `select!` unconditionally. Cancel-safe: dropping the future keeps the
    /// timer armed.
    pub async fn fired(&mut self) {
        match self.pending.as_mut() {
            Some(sleep) => {
                sleep.as_mut().await;
                self.pending = None;
            }
            None => std::future::pending().await,
        }
    }
}

fn clamp(delay: Duration, max: Option<Duration>) -> Duration {
    match max {
        Some(max) => delay.min(max),
        None => delay,
    }
}
