//! Failure classification.
//!
//! Exhaustion is never measured directly; it is inferred from the errors
//! actions fail with. Two conditions are recoverable: the process ran out of
//! file handles (`EMFILE`), or the whole OS did (`ENFILE`). Everything else
//! ends the batch.

use std::io;

/// How the runner should treat a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Recoverability {
    /// This process holds too many handles. Any completion in the batch
    /// frees capacity, so the item is retried on the next one.
    ProcessLimit,
    /// The OS-wide limit is reached, possibly by other processes. The item
    /// waits for the next completion or the backoff timer.
    SystemLimit,
    /// Terminal for the whole batch.
    Unrecoverable,
}

impl Recoverability {
    pub fn is_recoverable(self) -> bool {
        !matches!(self, Recoverability::Unrecoverable)
    }

    /// Label used in logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Recoverability::ProcessLimit => "process_limit",
            Recoverability::SystemLimit => "system_limit",
            Recoverability::Unrecoverable => "unrecoverable",
        }
    }
}

impl std::fmt::Display for Recoverability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that carry a conventional errno-style code such as `"EMFILE"`.
pub trait ErrorCode {
    /// The structured code, or `None` when the error has none.
    fn error_code(&self) -> Option<&str>;
}

pub const EMFILE: &str = "EMFILE";
pub const ENFILE: &str = "ENFILE";

impl ErrorCode for io::Error {
    fn error_code(&self) -> Option<&str> {
        os_code_name(self.raw_os_error()?)
    }
}

impl<T: ErrorCode + ?Sized> ErrorCode for Box<T> {
    fn error_code(&self) -> Option<&str> {
        (**self).error_code()
    }
}

impl<T: ErrorCode + ?Sized> ErrorCode for std::sync::Arc<T> {
    fn error_code(&self) -> Option<&str> {
        (**self).error_code()
    }
}

// EMFILE and ENFILE share these values on Linux, macOS and the BSDs.
#[cfg(unix)]
fn os_code_name(code: i32) -> Option<&'static str> {
    match code {
        24 => Some(EMFILE),
        23 => Some(ENFILE),
        _ => None,
    }
}

// ERROR_TOO_MANY_OPEN_FILES. Windows has no OS-wide equivalent.
#[cfg(windows)]
fn os_code_name(code: i32) -> Option<&'static str> {
    match code {
        4 => Some(EMFILE),
        _ => None,
    }
}

#[cfg(not(any(unix, windows)))]
fn os_code_name(_code: i32) -> Option<&'static str> {
    None
}

/// Classify by structured code: `EMFILE` and `ENFILE` are recoverable,
/// anything else (or no code at all) is not.
pub fn classify_by_code<E: ErrorCode + ?Sized>(error: &E) -> Recoverability {
    match error.error_code() {
        Some(EMFILE) => Recoverability::ProcessLimit,
        Some(ENFILE) => Recoverability::SystemLimit,
        _ => Recoverability::Unrecoverable,
    }
}

/// Adapt a "did we hit a limit?" predicate into a classifier.
///
/// The predicate cannot tell who holds the resource, so a hit is treated as
/// a process-level limit and retried on the next completion.
pub fn limit_predicate<E, P>(is_limit: P) -> impl Fn(&E) -> Recoverability + Send + 'static
where
    P: Fn(&E) -> bool + Send + 'static,
{
    move |error: &E| {
        if is_limit(error) {
            Recoverability::ProcessLimit
        } else {
            Recoverability::Unrecoverable
        }
    }
}
