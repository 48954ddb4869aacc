//! Optional per-task retry wrapping (§4.3.2, invariant 8).

use crate::error::Error;
use crate::pool::CANCELLATION_POLL_INTERVAL;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Common reducers over the list of errors a retry loop accumulated (§6, "Reducer").
pub mod reducers {
    use super::Error;

    /// Folds every later error into the first as a suppressed cause (the default).
    #[must_use]
    pub fn first_with_suppressed(mut errors: Vec<Error>) -> Option<Error> {
        if errors.is_empty() {
            return None;
        }
        let mut first = errors.remove(0);
        for e in errors {
            first = first.with_suppressed(e);
        }
        Some(first)
    }

    /// Keeps only the most recent error, discarding earlier attempts.
    #[must_use]
    pub fn last(mut errors: Vec<Error>) -> Option<Error> {
        errors.pop()
    }
}

/// `(max_tries, interval(try_n), continue(try_n, err), reducer(errors))` (§6).
pub struct RetryPolicy {
    max_tries: u32,
    interval: Arc<dyn Fn(u32) -> Duration + Send + Sync>,
    should_continue: Arc<dyn Fn(u32, &Error) -> bool + Send + Sync>,
    reduce: Arc<dyn Fn(Vec<Error>) -> Option<Error> + Send + Sync>,
}

impl RetryPolicy {
    /// Retries up to `max_tries` times (`max_tries >= 1`) with no delay between attempts,
    /// always continuing, and the default first-with-suppressed reducer.
    ///
    /// # Panics
    ///
    /// Panics if `max_tries` is zero.
    #[must_use]
    pub fn new(max_tries: u32) -> Self {
        assert!(max_tries >= 1, "retry max_tries must be >= 1");
        Self {
            max_tries,
            interval: Arc::new(|_| Duration::ZERO),
            should_continue: Arc::new(|_, _| true),
            reduce: Arc::new(reducers::first_with_suppressed),
        }
    }

    /// Overrides the sleep duration computed from the 1-based attempt number that just
    /// failed.
    #[must_use]
    pub fn with_interval<F>(mut self, interval: F) -> Self
    where
        F: Fn(u32) -> Duration + Send + Sync + 'static,
    {
        self.interval = Arc::new(interval);
        self
    }

    /// Overrides whether a retry should continue given the attempt number and the error
    /// that attempt produced.
    #[must_use]
    pub fn with_continue<F>(mut self, should_continue: F) -> Self
    where
        F: Fn(u32, &Error) -> bool + Send + Sync + 'static,
    {
        self.should_continue = Arc::new(should_continue);
        self
    }

    /// Overrides how the accumulated error list is folded into the single surfaced error.
    #[must_use]
    pub fn with_reducer<F>(mut self, reduce: F) -> Self
    where
        F: Fn(Vec<Error>) -> Option<Error> + Send + Sync + 'static,
    {
        self.reduce = Arc::new(reduce);
        self
    }

    #[must_use]
    pub fn max_tries(&self) -> u32 {
        self.max_tries
    }

    /// Runs `task` up to `max_tries` times. Cancellation-class errors bypass the
    /// `continue` predicate and are rethrown immediately (§4.3.2).
    pub fn execute<T>(
        &self,
        cancel: &CancellationToken,
        mut task: impl FnMut() -> Result<T, Error>,
    ) -> Result<T, Error> {
        let mut errors = Vec::new();
        for attempt in 1..=self.max_tries {
            match task() {
                Ok(value) => return Ok(value),
                Err(err) if err.is_cancellation() => return Err(err),
                Err(err) => {
                    let give_up =
                        attempt == self.max_tries || !(self.should_continue)(attempt, &err);
                    if give_up {
                        tracing::debug!(attempt, max_tries = self.max_tries, error = %err, "retry giving up");
                        errors.push(err);
                        break;
                    }
                    let delay = (self.interval)(attempt);
                    tracing::debug!(attempt, max_tries = self.max_tries, error = %err, delay_ms = delay.as_millis() as u64, "retrying after failure");
                    errors.push(err);
                    sleep_cancellably(cancel, delay);
                    if cancel.is_cancelled() {
                        break;
                    }
                }
            }
        }
        Err((self.reduce)(errors).unwrap_or_else(|| Error::user_work(EmptyRetryHistory)))
    }
}

/// Sleeps for `duration`, waking early (and periodically) to notice cancellation rather
/// than blocking the whole interval uninterruptibly.
fn sleep_cancellably(cancel: &CancellationToken, duration: Duration) {
    let mut remaining = duration;
    while !remaining.is_zero() {
        if cancel.is_cancelled() {
            return;
        }
        let step = remaining.min(CANCELLATION_POLL_INTERVAL);
        std::thread::sleep(step);
        remaining -= step;
    }
}

#[derive(Debug)]
struct EmptyRetryHistory;
impl std::fmt::Display for EmptyRetryHistory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("retry policy exhausted with no recorded error")
    }
}
impl std::error::Error for EmptyRetryHistory {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct Boom(u32);
    impl std::fmt::Display for Boom {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "boom on attempt {}", self.0)
        }
    }
    impl std::error::Error for Boom {}

    #[test]
    fn retries_exactly_n_times_then_succeeds() {
        let attempts = AtomicU32::new(0);
        let policy = RetryPolicy::new(3);
        let cancel = CancellationToken::new();
        let result: Result<&str, Error> = policy.execute(&cancel, || {
            let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 {
                Err(Error::user_work(Boom(n)))
            } else {
                Ok("done")
            }
        });
        assert_eq!(result.unwrap(), "done");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn exhaustion_surfaces_reduced_error() {
        let attempts = AtomicU32::new(0);
        let policy = RetryPolicy::new(3);
        let cancel = CancellationToken::new();
        let result: Result<(), Error> = policy.execute(&cancel, || {
            let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            Err(Error::user_work(Boom(n)))
        });
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn cancellation_bypasses_continue_predicate() {
        let policy = RetryPolicy::new(5).with_continue(|_, _| panic!("should not be consulted"));
        let cancel = CancellationToken::new();
        let result: Result<(), Error> =
            policy.execute(&cancel, || Err(Error::cancellation(None)));
        assert!(result.unwrap_err().is_cancellation());
    }
}
