//! The bounded, order-preserving queue ("pipe") that is the backbone of the dataflow engine.

use crate::error::{CloseReason, Error};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

/// Interval a blocked pusher backs off for before re-checking whether the out-of-order
/// buffer has drained enough to accept it (§4.1, step 3's "else" branch).
const RETRY_INTERVAL: Duration = Duration::from_millis(2);

/// A single value flowing through the pipeline, tagged with the index of its index scope.
/// Immutable once created.
#[derive(Debug, Clone)]
pub struct Item<D> {
    index: u64,
    payload: D,
}

impl<D> Item<D> {
    /// Builds an item from an explicit index and payload.
    #[must_use]
    pub fn new(index: u64, payload: D) -> Self {
        Self { index, payload }
    }

    /// The item's index within its scope.
    #[must_use]
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Borrows the payload.
    #[must_use]
    pub fn payload(&self) -> &D {
        &self.payload
    }

    /// Consumes the item, returning its `(index, payload)` pair.
    #[must_use]
    pub fn into_parts(self) -> (u64, D) {
        (self.index, self.payload)
    }
}

struct PipeState<D> {
    ready: VecDeque<Item<D>>,
    out_of_order: HashMap<u64, Item<D>>,
    expected_next: u64,
    total_pushed: u64,
    load_sum: u64,
    in_push_count: usize,
    closed: bool,
    close_reason: Option<CloseReason>,
}

impl<D> PipeState<D> {
    fn new() -> Self {
        Self {
            ready: VecDeque::new(),
            out_of_order: HashMap::new(),
            expected_next: 0,
            total_pushed: 0,
            load_sum: 0,
            in_push_count: 0,
            closed: false,
            close_reason: None,
        }
    }
}

/// A bounded FIFO that admits drops strictly in ascending index order, buffering
/// out-of-order arrivals until their turn comes up (§3, §4.1).
pub struct Pipe<D> {
    name: String,
    base_capacity: usize,
    state: Mutex<PipeState<D>>,
    not_full: Condvar,
    not_empty: Condvar,
}

impl<D> Pipe<D> {
    /// Creates a new pipe with the given diagnostic name and base capacity.
    ///
    /// # Panics
    ///
    /// Panics if `base_capacity` is zero; `BC ≥ 1` is a hard invariant (§3).
    #[must_use]
    pub fn new(name: impl Into<String>, base_capacity: usize) -> Self {
        assert!(base_capacity >= 1, "pipe base capacity must be >= 1");
        Self {
            name: name.into(),
            base_capacity,
            state: Mutex::new(PipeState::new()),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
        }
    }

    /// The pipe's diagnostic name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Blocks the caller until `item` is accepted or the pipe is closed.
    ///
    /// A `None` payload is silently dropped before it ever reaches the queue (§3).
    pub fn push(&self, item: Option<Item<D>>) -> Result<(), Error> {
        let Some(item) = item else {
            return Ok(());
        };

        let mut state = self.state.lock();
        if state.closed {
            return Err(Error::closed(state.close_reason.clone()));
        }
        state.in_push_count += 1;
        let result = self.push_locked(&mut state, item);
        state.in_push_count -= 1;
        drop(state);
        self.not_full.notify_all();
        result
    }

    fn push_locked(
        &self,
        state: &mut parking_lot::MutexGuard<'_, PipeState<D>>,
        item: Item<D>,
    ) -> Result<(), Error> {
        loop {
            if state.closed {
                return Err(Error::closed(state.close_reason.clone()));
            }

            if item.index == state.expected_next {
                self.admit(state, item)?;
                self.drain_ready_prefix(state);
                self.not_empty.notify_all();
                return Ok(());
            }

            if state.out_of_order.len() < state.in_push_count {
                let index = item.index;
                let _ = state.out_of_order.insert(index, item);
                state.total_pushed += 1;
                return Ok(());
            }

            tracing::trace!(
                pipe = %self.name,
                index = item.index,
                expected = state.expected_next,
                "out-of-order buffer saturated, backing off before retry"
            );
            // Neither branch fired: every outstanding index is spoken for by some other
            // pusher; back off briefly and retry rather than spin.
            let _ = self.not_full.wait_for(state, RETRY_INTERVAL);
        }
    }

    /// Admits `item` (already known to match `expected_next`) into the ready queue,
    /// blocking on capacity if necessary. Fails if the pipe closes while waiting.
    fn admit(
        &self,
        state: &mut parking_lot::MutexGuard<'_, PipeState<D>>,
        item: Item<D>,
    ) -> Result<(), Error> {
        while state.ready.len() >= self.base_capacity {
            if state.closed {
                return Err(Error::closed(state.close_reason.clone()));
            }
            self.not_full.wait(state);
        }
        if state.closed {
            return Err(Error::closed(state.close_reason.clone()));
        }
        state.ready.push_back(item);
        state.expected_next += 1;
        state.total_pushed += 1;
        state.load_sum += state.ready.len() as u64;
        Ok(())
    }

    /// After an admission shifts `expected_next`, promotes any now-contiguous prefix
    /// sitting in the out-of-order buffer. Stops (discarding the item it was about to
    /// promote) if the pipe closes while waiting for room.
    fn drain_ready_prefix(&self, state: &mut parking_lot::MutexGuard<'_, PipeState<D>>) {
        loop {
            if state.closed {
                return;
            }
            let Some(next) = state.out_of_order.remove(&state.expected_next) else {
                return;
            };
            loop {
                if state.closed {
                    return;
                }
                if state.ready.len() < self.base_capacity {
                    break;
                }
                self.not_full.wait(state);
            }
            state.ready.push_back(next);
            state.expected_next += 1;
            state.load_sum += state.ready.len() as u64;
        }
    }

    /// Drains items in strictly ascending index order, invoking `action` for each, until
    /// the pipe closes and the ready queue is empty. Assumes a single draining consumer.
    pub fn drain<F: FnMut(Item<D>)>(&self, mut action: F) {
        loop {
            let mut state = self.state.lock();
            while state.ready.is_empty() {
                if state.closed {
                    return;
                }
                self.not_empty.wait(&mut state);
            }
            let item = state
                .ready
                .pop_front()
                .expect("ready queue checked non-empty above");
            drop(state);
            self.not_full.notify_all();
            action(item);
        }
    }

    /// Idempotently closes the pipe. The first non-`None` reason wins; later calls
    /// (including later `None` calls) are no-ops.
    pub fn set_end_of_input(&self, reason: Option<CloseReason>) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        state.close_reason = reason;
        drop(state);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Discards all buffered items and wakes any blocked pusher/drainer, without
    /// altering the closed/open state. Used during pipeline teardown to unstick a
    /// producer that is blocked on a pipe nobody will ever drain again.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.ready.clear();
        state.out_of_order.clear();
        drop(state);
        self.not_full.notify_all();
        self.not_empty.notify_all();
    }

    /// Whether the pipe has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// The configured base capacity (`BC`).
    #[must_use]
    pub fn base_capacity(&self) -> usize {
        self.base_capacity
    }

    /// Number of drops currently sitting in the in-order ready queue.
    #[must_use]
    pub fn in_order_drops(&self) -> usize {
        self.state.lock().ready.len()
    }

    /// Number of drops currently buffered out of order.
    #[must_use]
    pub fn out_of_order_drops(&self) -> usize {
        self.state.lock().out_of_order.len()
    }

    /// Number of producer threads currently blocked inside `push`.
    #[must_use]
    pub fn in_push_drops(&self) -> usize {
        self.state.lock().in_push_count
    }

    /// Total number of drops ever accepted by `push` (ready + out-of-order admissions).
    #[must_use]
    pub fn total_pushed(&self) -> u64 {
        self.state.lock().total_pushed
    }

    /// Average fraction of the ready queue's capacity that has been occupied at
    /// admission time, in `[0, 1]`.
    #[must_use]
    pub fn average_load(&self) -> f64 {
        let state = self.state.lock();
        if state.total_pushed == 0 {
            return 0.0;
        }
        let denom = state.total_pushed as f64 * self.base_capacity as f64;
        (state.load_sum as f64 / denom).clamp(0.0, 1.0)
    }
}

impl<D> std::fmt::Debug for Pipe<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Pipe")
            .field("name", &self.name)
            .field("base_capacity", &self.base_capacity)
            .field("ready", &state.ready.len())
            .field("out_of_order", &state.out_of_order.len())
            .field("closed", &state.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn item(i: u64) -> Option<Item<char>> {
        Some(Item::new(i, (b'a' + i as u8) as char))
    }

    #[test]
    fn in_order_push_and_drain_round_trips() {
        let pipe = Pipe::new("t", 4);
        for i in 0..5 {
            pipe.push(item(i)).unwrap();
        }
        pipe.set_end_of_input(None);

        let mut seen = Vec::new();
        pipe.drain(|it| seen.push(it.payload().to_owned()));
        assert_eq!(seen, vec!['a', 'b', 'c', 'd', 'e']);
    }

    #[test]
    fn out_of_order_push_is_reordered_on_drain() {
        let pipe = Pipe::new("t", 8);
        // Pretend 3 pushers are in flight so the buffer bound allows all of this.
        {
            let mut state = pipe.state.lock();
            state.in_push_count = 3;
        }
        pipe.push(item(2)).unwrap();
        pipe.push(item(0)).unwrap();
        pipe.push(item(1)).unwrap();
        {
            let mut state = pipe.state.lock();
            state.in_push_count = 0;
        }
        pipe.set_end_of_input(None);

        let mut seen = Vec::new();
        pipe.drain(|it| seen.push(it.index()));
        assert_eq!(seen, vec![0, 1, 2]);
    }

    #[test]
    fn none_payload_is_silently_dropped() {
        let pipe: Pipe<char> = Pipe::new("t", 2);
        pipe.push(None).unwrap();
        pipe.set_end_of_input(None);
        let mut seen = 0;
        pipe.drain(|_| seen += 1);
        assert_eq!(seen, 0);
    }

    #[test]
    fn push_after_close_fails() {
        let pipe = Pipe::new("t", 2);
        pipe.set_end_of_input(None);
        let err = pipe.push(item(0)).unwrap_err();
        assert_eq!(err.to_string(), "push after end of input");
    }

    #[test]
    fn push_after_abnormal_close_carries_reason() {
        #[derive(thiserror::Error, Debug)]
        #[error("boom")]
        struct Boom;

        let pipe = Pipe::new("t", 2);
        pipe.set_end_of_input(Some(CloseReason::new(Boom)));
        let err = pipe.push(item(0)).unwrap_err();
        assert_eq!(err.to_string(), "push after end of input: boom");
    }

    #[test]
    fn drain_returns_after_close_once_ready_queue_drains() {
        let pipe = Arc::new(Pipe::new("t", 1));
        pipe.push(item(0)).unwrap();
        pipe.push(item(1)).unwrap();
        let pipe2 = pipe.clone();
        let closer = thread::spawn(move || {
            pipe2.set_end_of_input(None);
        });
        let mut seen = Vec::new();
        pipe.drain(|it| seen.push(it.index()));
        closer.join().unwrap();
        assert_eq!(seen, vec![0, 1]);
    }

    #[test]
    fn ready_queue_never_exceeds_base_capacity() {
        let pipe = Arc::new(Pipe::new("t", 2));
        for i in 0..2 {
            pipe.push(item(i)).unwrap();
        }
        assert_eq!(pipe.in_order_drops(), 2);

        let pipe2 = pipe.clone();
        let pusher = thread::spawn(move || pipe2.push(item(2)));

        thread::sleep(Duration::from_millis(20));
        assert!(
            !pusher.is_finished(),
            "push should block while the ready queue is at base capacity"
        );
        assert_eq!(pipe.in_order_drops(), 2, "ready queue must stay bounded by BC");

        // Free a slot directly (bypassing drain, which would also unblock forever since
        // nothing closes this pipe) to let the blocked pusher make progress.
        {
            let mut state = pipe.state.lock();
            let _ = state.ready.pop_front();
        }
        pipe.not_full.notify_all();

        pusher.join().unwrap().unwrap();
        assert_eq!(pipe.in_order_drops(), 2);
    }

    #[test]
    fn concurrent_producers_preserve_order() {
        let pipe = Arc::new(Pipe::new("t", 4));
        let n = 200u64;
        let mut handles = Vec::new();
        for i in 0..n {
            let p = pipe.clone();
            handles.push(thread::spawn(move || {
                p.push(Some(Item::new(i, i))).unwrap();
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        pipe.set_end_of_input(None);

        let mut seen = Vec::new();
        pipe.drain(|it| seen.push(it.index()));
        assert_eq!(seen, (0..n).collect::<Vec<_>>());
    }
}
