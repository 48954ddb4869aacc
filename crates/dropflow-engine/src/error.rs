//! Errors for the pipeline engine (§7).
//!
//! Important note: as in the channel crate, avoid `!Send`/`!Sync` payloads here — a
//! worker's throwable can be read back from any thread racing to register a cause.

use crate::node::PipeId;
use crate::validator::Warning;
use std::fmt;
use std::sync::Arc;

/// A type-erased, cheaply cloneable error, used both for user-work failures and for
/// cancellation causes.
pub type SharedError = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// All errors that can occur while building or running a pipeline (§7's taxonomy).
///
/// `SilentStop` from the spec's taxonomy is represented here as `Cancellation { reason: None
/// }` rather than as its own variant: it is never constructed by user code and is unwrapped
/// to a clean `Ok(())` before `Pipeline::run`/`Worker::run` ever return it to a caller.
#[derive(Debug, Clone)]
pub enum Error {
    /// Graph validation rejected the pipeline; carries every warning that was not
    /// pre-declared as allowed.
    ConfigurationFault(Vec<Warning>),

    /// Two producers were wired into the same non-`SupplyPipe` pipe. Unlike
    /// `MultipleInputs`, which only warns about the `SupplyPipe` case, this is never a legal
    /// graph shape and so is never suppressible via `allow_warning` (§4.5, step 1).
    MultipleProducers(Vec<PipeId>),

    /// A supplier/function/transformer/consumer/action raised an error. `suppressed`
    /// accumulates any further faults registered against the same worker after the first
    /// (first-with-suppressed aggregation).
    UserWorkFault {
        /// The first fault registered.
        source: SharedError,
        /// Faults registered after `source`, folded in rather than discarded.
        suppressed: Vec<Error>,
    },

    /// The worker or pipeline was canceled. `reason: None` is the "silent stop" case:
    /// `stop()` was called, or a worker's cancellation carried no cause.
    Cancellation {
        /// The cause, if any, passed to `cancel`/`interrupt`.
        reason: Option<SharedError>,
    },

    /// A push failed because the pipe had already reached end-of-input.
    PipeClosed(dropflow_channel::Error),
}

impl Error {
    /// The sentinel meaning "stop cleanly, surface nothing" (§7, `SilentStop`).
    pub(crate) fn silent_stop() -> Error {
        Error::Cancellation { reason: None }
    }

    pub(crate) fn is_silent_stop(&self) -> bool {
        matches!(self, Error::Cancellation { reason: None })
    }

    /// Wraps an arbitrary user error as a [`Error::UserWorkFault`].
    pub fn user_work(err: impl std::error::Error + Send + Sync + 'static) -> Error {
        Error::UserWorkFault {
            source: Arc::new(err),
            suppressed: Vec::new(),
        }
    }

    /// Wraps an already-shared error as a [`Error::UserWorkFault`] without re-allocating.
    #[must_use]
    pub fn user_work_shared(source: SharedError) -> Error {
        Error::UserWorkFault {
            source,
            suppressed: Vec::new(),
        }
    }

    /// Builds a cancellation error with an optional cause.
    #[must_use]
    pub fn cancellation(reason: Option<SharedError>) -> Error {
        Error::Cancellation { reason }
    }

    /// Whether this error represents a cancellation/interruption (as opposed to a
    /// configuration or user-work fault). Thread-interruption-class errors bypass a retry
    /// policy's `continue` predicate (§4.3.2).
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Cancellation { .. })
    }

    /// Folds `other` into this error as a suppressed cause (first-with-suppressed, the
    /// default reducer, §6).
    #[must_use]
    pub fn with_suppressed(mut self, other: Error) -> Error {
        match &mut self {
            Error::UserWorkFault { suppressed, .. } => suppressed.push(other),
            _ => {
                // Non-UserWorkFault variants (configuration/cancellation/pipe-closed) don't
                // carry a suppressed list; the second registration is simply dropped, mirroring
                // "the worker registers the throwable once" (§4.3.3).
            }
        }
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ConfigurationFault(warnings) => {
                write!(f, "pipeline configuration rejected, unexpected warnings: ")?;
                let mut first = true;
                for w in warnings {
                    if !first {
                        write!(f, ", ")?;
                    }
                    write!(f, "{w}")?;
                    first = false;
                }
                Ok(())
            }
            Error::UserWorkFault { source, suppressed } => {
                write!(f, "user work failed: {source}")?;
                if !suppressed.is_empty() {
                    write!(f, " ({} suppressed)", suppressed.len())?;
                }
                Ok(())
            }
            Error::Cancellation { reason: Some(r) } => write!(f, "canceled: {r}"),
            Error::Cancellation { reason: None } => write!(f, "canceled"),
            Error::PipeClosed(e) => write!(f, "{e}"),
            Error::MultipleProducers(pipes) => {
                write!(f, "pipe(s) with more than one producer: ")?;
                let mut first = true;
                for p in pipes {
                    if !first {
                        write!(f, ", ")?;
                    }
                    write!(f, "{p}")?;
                    first = false;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::UserWorkFault { source, .. } => Some(source.as_ref()),
            Error::Cancellation { reason: Some(r) } => Some(r.as_ref()),
            Error::PipeClosed(e) => Some(e),
            _ => None,
        }
    }
}

impl From<dropflow_channel::Error> for Error {
    fn from(value: dropflow_channel::Error) -> Self {
        Error::PipeClosed(value)
    }
}

/// Formats the source chain of an error into a single display string; re-exported at the
/// crate root the same way the channel crate exposes its own copy.
#[must_use]
pub fn format_error_sources(error: &(dyn std::error::Error + 'static)) -> String {
    dropflow_channel::format_error_sources(error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Boom;
    impl fmt::Display for Boom {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "boom")
        }
    }
    impl std::error::Error for Boom {}

    #[test]
    fn silent_stop_is_a_reasonless_cancellation() {
        let e = Error::silent_stop();
        assert!(e.is_silent_stop());
        assert!(e.is_cancellation());
    }

    #[test]
    fn suppressed_faults_fold_into_first() {
        let first = Error::user_work(Boom);
        let second = Error::user_work(Boom);
        let combined = first.with_suppressed(second);
        match combined {
            Error::UserWorkFault { suppressed, .. } => assert_eq!(suppressed.len(), 1),
            other => panic!("expected UserWorkFault, got {other:?}"),
        }
    }
}
