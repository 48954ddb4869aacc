//! `Join` (internal): K Pipes -> 1 Pipe, same scope. Per index, collects one drop from
//! each input (a blocking barrier) and reduces the K payloads to one with the configured
//! reducer (default: last), emitting `(index, reduced)` (§4.3 table, invariant 5).
//!
//! Because every input pipe already delivers its own drops in ascending index order, the
//! index at which the K-way barrier completes is itself non-decreasing across completions:
//! an input cannot contribute index `i+1` before contributing index `i`, so the barrier for
//! `i+1` cannot complete before the barrier for `i`. Barrier completions are therefore
//! already in ascending-index order and can be forwarded downstream as a plain FIFO.

use crate::error::Error;
use crate::node::{NodeKind, PipeId, WorkerId};
use crate::pipelike::PipeLike;
use crate::validator::WorkerDescriptor;
use crate::worker::{WorkerCore, WorkerHandle, WorkerState};
use dropflow_channel::{Item, Pipe};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

pub struct Join<D> {
    core: Arc<WorkerCore>,
    inputs: Vec<Arc<Pipe<D>>>,
    output: Arc<Pipe<D>>,
    reduce: Arc<dyn Fn(Vec<D>) -> D + Send + Sync>,
}

impl<D: Send + 'static> Join<D> {
    /// Builds a join with the default "last wins" reducer (§4.3 table).
    #[must_use]
    pub fn new(id: WorkerId, name: impl Into<String>, inputs: Vec<Arc<Pipe<D>>>, output: Arc<Pipe<D>>) -> Self {
        Self::with_reducer(id, name, inputs, output, |mut values: Vec<D>| {
            values.pop().expect("join barrier always collects >= 1 value")
        })
    }

    #[must_use]
    pub fn with_reducer(
        id: WorkerId,
        name: impl Into<String>,
        inputs: Vec<Arc<Pipe<D>>>,
        output: Arc<Pipe<D>>,
        reduce: impl Fn(Vec<D>) -> D + Send + Sync + 'static,
    ) -> Self {
        assert!(!inputs.is_empty(), "join requires at least one input");
        Self {
            core: Arc::new(WorkerCore::new(id, name, NodeKind::Join, 1)),
            inputs,
            output,
            reduce: Arc::new(reduce),
        }
    }
}

impl<D: Send + 'static> WorkerHandle for Join<D> {
    fn id(&self) -> WorkerId {
        self.core.id()
    }
    fn name(&self) -> &str {
        self.core.name()
    }
    fn kind(&self) -> NodeKind {
        self.core.kind()
    }
    fn descriptor(&self) -> WorkerDescriptor {
        WorkerDescriptor {
            id: self.core.id(),
            name: self.core.name().to_owned(),
            kind: self.core.kind(),
            inputs: self.inputs.iter().map(|p| p.pipe_id()).collect(),
            outputs: vec![self.output.pipe_id()],
        }
    }
    fn input_pipe_ids(&self) -> Vec<PipeId> {
        self.inputs.iter().map(|p| p.pipe_id()).collect()
    }
    fn output_pipe_ids(&self) -> Vec<PipeId> {
        vec![self.output.pipe_id()]
    }

    fn run(&self) -> Result<(), Error> {
        if !self.core.claim_run() {
            return Err(Error::user_work(super::AlreadyRan::new(self.core.name())));
        }
        self.core.set_running();
        let cancel = self.core.cancellation_token();
        let k = self.inputs.len();
        let pending: Mutex<HashMap<u64, Vec<Option<D>>>> = Mutex::new(HashMap::new());
        let (tx, rx) = crossbeam_channel::unbounded::<(u64, D)>();
        let mut aborted = false;

        std::thread::scope(|scope| {
            for (slot, input) in self.inputs.iter().enumerate() {
                let pending = &pending;
                let tx = tx.clone();
                let reduce = self.reduce.clone();
                let cancel = cancel.clone();
                scope.spawn(move || {
                    input.drain(|item| {
                        if cancel.is_cancelled() {
                            return;
                        }
                        let (index, payload) = item.into_parts();
                        let completed_values = {
                            let mut state = pending.lock();
                            let slots = state.entry(index).or_insert_with(|| {
                                let mut v = Vec::with_capacity(k);
                                v.resize_with(k, || None);
                                v
                            });
                            slots[slot] = Some(payload);
                            if slots.iter().all(Option::is_some) {
                                state.remove(&index)
                            } else {
                                None
                            }
                        };
                        if let Some(values) = completed_values {
                            let values: Vec<D> =
                                values.into_iter().map(|v| v.expect("all slots filled")).collect();
                            let _ = tx.send((index, reduce(values)));
                        }
                    });
                });
            }
            drop(tx);

            while let Ok((index, reduced)) = rx.recv() {
                if let Err(e) = self.output.push(Some(Item::new(index, reduced))) {
                    tracing::debug!(worker = self.core.name(), error = %e, "join push failed");
                    aborted = true;
                    break;
                }
            }
        });

        let _ = aborted;
        self.core.enter_closing_or_aborting();
        self.output.set_end_of_input(None);
        self.core.enter_terminal();
        self.core.take_outcome()
    }

    fn cancel(&self, reason: Option<crate::error::SharedError>) {
        self.core.cancel(reason);
        for input in &self.inputs {
            input.clear();
        }
        self.output.set_end_of_input(None);
    }
    fn interrupt(&self) {
        self.core.interrupt();
        for input in &self.inputs {
            input.clear();
        }
        self.output.set_end_of_input(None);
    }
    fn state(&self) -> WorkerState {
        self.core.state()
    }
    fn concurrency(&self) -> usize {
        1
    }
    fn canceled_work(&self) -> usize {
        self.core.canceled_work()
    }
    fn utilization(&self, _wall_nanos: u64) -> f64 {
        0.0
    }
    fn input_average_load(&self) -> Option<f64> {
        self.inputs.first().map(|p| p.average_load())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_wins_reducer_prefers_second_input() {
        let lower: Arc<Pipe<char>> = Arc::new(Pipe::new("lower", 4));
        let identity: Arc<Pipe<char>> = Arc::new(Pipe::new("identity", 4));
        for (i, c) in "abc".chars().enumerate() {
            lower.push(Some(Item::new(i as u64, c))).unwrap();
        }
        for (i, c) in "ABC".chars().enumerate() {
            identity.push(Some(Item::new(i as u64, c))).unwrap();
        }
        lower.set_end_of_input(None);
        identity.set_end_of_input(None);

        let output: Arc<Pipe<char>> = Arc::new(Pipe::new("joined", 4));
        let join = Join::new(
            WorkerId(0),
            "join",
            vec![lower, identity],
            output.clone(),
        );
        join.run().unwrap();

        let mut seen = String::new();
        output.drain(|it| seen.push(*it.payload()));
        assert_eq!(seen, "ABC");
    }
}
