//! The worker lifecycle state machine and the bookkeeping every concrete worker variant in
//! [`crate::workers`] is built on top of (§4.3.3, §4.3.4).

use crate::error::{Error, SharedError};
use crate::node::{NodeKind, PipeId, WorkerId};
use crate::pool::WorkerPool;
use crate::validator::WorkerDescriptor;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A worker's position in its lifecycle (§4.3.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Ready,
    Running,
    Closing,
    Aborting,
    Done,
    Aborted,
    Canceled,
}

/// Shared state and bookkeeping every worker variant embeds: lifecycle, throwable holder,
/// cancellation token, busy-time/canceled-work counters, and the one-shot run guard.
pub struct WorkerCore {
    id: WorkerId,
    name: String,
    kind: NodeKind,
    concurrency: usize,
    state: Mutex<WorkerState>,
    throwable: Mutex<Option<Error>>,
    cancel: CancellationToken,
    canceled_work: AtomicUsize,
    ran_once: AtomicBool,
    pool: Mutex<Option<Arc<WorkerPool>>>,
}

impl WorkerCore {
    #[must_use]
    pub fn new(id: WorkerId, name: impl Into<String>, kind: NodeKind, concurrency: usize) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
            concurrency,
            state: Mutex::new(WorkerState::Ready),
            throwable: Mutex::new(None),
            cancel: CancellationToken::new(),
            canceled_work: AtomicUsize::new(0),
            ran_once: AtomicBool::new(false),
            pool: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn id(&self) -> WorkerId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    #[must_use]
    pub fn state(&self) -> WorkerState {
        *self.state.lock()
    }

    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    #[must_use]
    pub fn canceled_work(&self) -> usize {
        self.canceled_work.load(Ordering::Relaxed)
    }

    /// Claims the one-shot run guarantee. Returns `false` if this worker has already run
    /// (invariant 7).
    #[must_use]
    pub fn claim_run(&self) -> bool {
        self.ran_once
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn set_running(&self) {
        *self.state.lock() = WorkerState::Running;
        tracing::debug!(worker = %self.name, kind = %self.kind, "worker started");
    }

    /// Registers `err` as the worker's throwable (first wins; later ones are folded in as
    /// suppressed, §4.3.3 step 3 / §5 "set-once").
    pub fn register_fault(&self, err: Error) {
        let mut throwable = self.throwable.lock();
        *throwable = Some(match throwable.take() {
            Some(existing) => existing.with_suppressed(err),
            None => err,
        });
    }

    #[must_use]
    pub fn has_fault(&self) -> bool {
        self.throwable.lock().is_some()
    }

    /// Takes the registered throwable, if any, unwrapping a silent stop to `Ok(())`
    /// (§4.3.3 step 4, §7).
    pub fn take_outcome(&self) -> Result<(), Error> {
        match self.throwable.lock().take() {
            None => Ok(()),
            Some(e) if e.is_silent_stop() => Ok(()),
            Some(e) => Err(e),
        }
    }

    pub fn enter_closing_or_aborting(&self) {
        let mut state = self.state.lock();
        *state = if self.has_fault() {
            WorkerState::Aborting
        } else {
            WorkerState::Closing
        };
        tracing::debug!(worker = %self.name, state = ?*state, "worker draining");
    }

    pub fn enter_terminal(&self) {
        let mut state = self.state.lock();
        *state = if self.is_cancelled() {
            if self.has_fault() {
                WorkerState::Aborted
            } else {
                WorkerState::Canceled
            }
        } else if self.has_fault() {
            WorkerState::Aborted
        } else {
            WorkerState::Done
        };
        tracing::debug!(worker = %self.name, state = ?*state, "worker terminated");
    }

    /// Lazily starts this worker's bounded pool (first call wins for the lifetime of the
    /// worker; the one-shot run guard means there is only ever one "first call").
    #[must_use]
    pub fn pool(&self) -> Arc<WorkerPool> {
        let mut slot = self.pool.lock();
        slot.get_or_insert_with(|| Arc::new(WorkerPool::new(&self.name, self.concurrency.max(1))))
            .clone()
    }

    /// `cancel(reason)`: registers a fresh [`Error::Cancellation`] carrying `reason` as the
    /// throwable, then tears down scheduling infrastructure (§4.3.4). This is the
    /// externally-facing form used by a pipeline/caller with only a generic cause in hand.
    pub fn cancel(&self, reason: Option<SharedError>) {
        self.fault_and_cancel(Error::cancellation(reason));
    }

    /// Registers `err` as-is (not re-wrapped as a `Cancellation`) and tears down scheduling
    /// infrastructure. Used when a task's own error (e.g. a `UserWorkFault`) is what should
    /// propagate as the worker's throwable (§7, "any exception inside a task triggers the
    /// worker's cancel(err) from the task body").
    pub fn fault_and_cancel(&self, err: Error) {
        if self.cancel.is_cancelled() {
            self.register_fault(err);
            return;
        }
        tracing::info!(worker = %self.name, error = %err, "worker canceling");
        self.register_fault(err);
        self.cancel.cancel();
        if let Some(pool) = self.pool.lock().clone() {
            // Snapshot before `close()`: the count of jobs actually in flight at the
            // moment cancellation takes effect, not a flat one-per-cancellation tally
            // (§4.3.4 step 3).
            let in_flight = pool.in_flight();
            // `close()` only: a task calling this from inside one of the pool's own
            // threads must not block waiting to join itself. The driver thread running
            // this worker's `run()` performs the final `join` once its drain loop returns.
            pool.close();
            self.canceled_work.fetch_add(in_flight, Ordering::Relaxed);
        }
    }

    pub fn interrupt(&self) {
        self.cancel(Some(Arc::new(WorkerInterrupted {
            name: self.name.clone(),
        })));
    }

    /// `stop()`: a reasonless cancellation; `run()` returns cleanly (§4.3.4, §7).
    pub fn stop(&self) {
        self.cancel(None);
    }

    /// Fraction of wall-clock time the pool's threads spent busy, for monitoring.
    #[must_use]
    pub fn utilization(&self, wall_nanos: u64) -> f64 {
        if wall_nanos == 0 {
            return 0.0;
        }
        let busy = self
            .pool
            .lock()
            .as_ref()
            .map_or(0, |p| p.busy_nanos());
        let denom = wall_nanos as f64 * self.concurrency.max(1) as f64;
        (busy as f64 / denom).clamp(0.0, 1.0)
    }
}

#[derive(Debug)]
struct WorkerInterrupted {
    name: String,
}
impl std::fmt::Display for WorkerInterrupted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} interrupted", self.name)
    }
}
impl std::error::Error for WorkerInterrupted {}

/// Type-erased operations [`crate::pipeline::Pipeline`] needs from any worker variant,
/// regardless of its generic payload type(s).
pub trait WorkerHandle: Send + Sync {
    fn id(&self) -> WorkerId;
    fn name(&self) -> &str;
    fn kind(&self) -> NodeKind;
    fn descriptor(&self) -> WorkerDescriptor;
    fn input_pipe_ids(&self) -> Vec<PipeId>;
    fn output_pipe_ids(&self) -> Vec<PipeId>;

    /// Runs the worker to completion on the calling thread. Blocking.
    fn run(&self) -> Result<(), Error>;

    fn cancel(&self, reason: Option<SharedError>);
    fn interrupt(&self);
    fn state(&self) -> WorkerState;
    fn concurrency(&self) -> usize;
    fn canceled_work(&self) -> usize;
    fn utilization(&self, wall_nanos: u64) -> f64;

    /// Average load of this worker's primary input pipe, if it has one (for bottleneck
    /// detection, §4.4).
    fn input_average_load(&self) -> Option<f64>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_run_is_one_shot() {
        let core = WorkerCore::new(WorkerId(0), "w", NodeKind::Consumer, 1);
        assert!(core.claim_run());
        assert!(!core.claim_run());
    }

    #[test]
    fn silent_stop_unwraps_to_ok() {
        let core = WorkerCore::new(WorkerId(0), "w", NodeKind::Consumer, 1);
        core.stop();
        assert!(core.take_outcome().is_ok());
        assert_eq!(core.state(), WorkerState::Ready);
    }

    #[test]
    fn cancellation_with_reason_surfaces_on_outcome() {
        let core = WorkerCore::new(WorkerId(0), "w", NodeKind::Consumer, 1);
        core.interrupt();
        let err = core.take_outcome().unwrap_err();
        assert!(err.is_cancellation());
        // No pool was ever started, so no task was actually in flight to cancel.
        assert_eq!(core.canceled_work(), 0);
    }

    #[test]
    fn canceled_work_counts_jobs_in_flight_at_cancellation() {
        use std::sync::mpsc;

        let core = WorkerCore::new(WorkerId(0), "w", NodeKind::Consumer, 2);
        let pool = core.pool();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let (started_tx, started_rx) = mpsc::channel::<()>();
        let release_rx = Arc::new(Mutex::new(release_rx));

        for _ in 0..2 {
            let started_tx = started_tx.clone();
            let release_rx = release_rx.clone();
            pool.submit(Box::new(move || {
                started_tx.send(()).unwrap();
                let _ = release_rx.lock().recv();
            }))
            .unwrap();
        }
        started_rx.recv().unwrap();
        started_rx.recv().unwrap();

        assert_eq!(pool.in_flight(), 2);
        core.interrupt();
        assert_eq!(core.canceled_work(), 2);

        drop(release_tx);
    }

    #[test]
    fn second_fault_is_suppressed_not_lost() {
        #[derive(Debug)]
        struct Boom;
        impl std::fmt::Display for Boom {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("boom")
            }
        }
        impl std::error::Error for Boom {}

        let core = WorkerCore::new(WorkerId(0), "w", NodeKind::Consumer, 1);
        core.register_fault(Error::user_work(Boom));
        core.register_fault(Error::user_work(Boom));
        let err = core.take_outcome().unwrap_err();
        match err {
            Error::UserWorkFault { suppressed, .. } => assert_eq!(suppressed.len(), 1),
            other => panic!("unexpected {other:?}"),
        }
    }
}
