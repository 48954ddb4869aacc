//! Errors for the pipe/supply-pipe layer.
//!
//! Important note: it is important not to use `!Send`/`!Sync` data types here, since pipes are
//! pushed into and drained from arbitrary worker threads.

use std::fmt;
use std::sync::Arc;

/// A cause recorded against a pipe when it is closed abnormally (cancellation, user-work
/// failure, …). Shared via `Arc` because the same cause is handed back to every caller that
/// subsequently fails to push or observes the close while draining.
#[derive(Clone)]
pub struct CloseReason(Arc<dyn std::error::Error + Send + Sync + 'static>);

impl CloseReason {
    /// Wraps an arbitrary error as a close reason.
    pub fn new<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self(Arc::new(err))
    }

    /// Wraps an already-shared error without re-allocating.
    #[must_use]
    pub fn from_arc(err: Arc<dyn std::error::Error + Send + Sync + 'static>) -> Self {
        Self(err)
    }

    /// Borrows the underlying error.
    #[must_use]
    pub fn cause(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        self.0.as_ref()
    }
}

impl fmt::Debug for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Errors produced by [`crate::Pipe`] and [`crate::SupplyPipe`].
#[derive(thiserror::Error, Debug, Clone)]
pub enum Error {
    /// Push attempted after the pipe closed with no cancellation cause (the normal,
    /// end-of-input case).
    #[error("push after end of input")]
    PipeClosed,

    /// Push attempted after the pipe closed carrying the cause it was closed with.
    #[error("push after end of input: {0}")]
    PipeClosedWithReason(CloseReason),

    /// The calling thread was interrupted while blocked inside `push`/`drain`.
    #[error("interrupted while blocked on a pipe")]
    BackpressureInterrupted,
}

impl Error {
    /// Builds the appropriate closed-pipe error for a given recorded reason.
    #[must_use]
    pub fn closed(reason: Option<CloseReason>) -> Self {
        match reason {
            Some(reason) => Error::PipeClosedWithReason(reason),
            None => Error::PipeClosed,
        }
    }
}

/// Formats the source chain of an error into a single display string, matching the
/// style used by the engine crate's own error formatting.
#[must_use]
pub fn format_error_sources(error: &(dyn std::error::Error + 'static)) -> String {
    let mut segments = Vec::new();
    let mut current = error.source();
    while let Some(err) = current {
        let msg = err.to_string();
        if !msg.is_empty() {
            segments.push(msg);
        }
        current = err.source();
    }

    if segments.is_empty() {
        String::new()
    } else {
        format!("; source: {}", segments.join(" -> "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(thiserror::Error, Debug)]
    #[error("boom")]
    struct Boom;

    #[test]
    fn closed_without_reason_is_plain() {
        let err = Error::closed(None);
        assert_eq!(err.to_string(), "push after end of input");
    }

    #[test]
    fn closed_with_reason_includes_cause() {
        let err = Error::closed(Some(CloseReason::new(Boom)));
        assert_eq!(err.to_string(), "push after end of input: boom");
    }
}
