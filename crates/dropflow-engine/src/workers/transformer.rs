//! `Transformer`: 1 Pipe -> 1 SupplyPipe (a fresh index scope, §3), 1-to-N, with a `tail()`
//! flush emitted once the input closes (§4.3 table).
//!
//! The `map`/`tail` closures are `FnMut`, matching the stateful-accumulator use case in the
//! spec's word-splitting scenario (buffering characters until whitespace). Because they
//! carry mutable state, every call is serialized through a `Mutex`, and the worker drives
//! its input on a single dedicated thread rather than submitting to the bounded pool:
//! running concurrently would make output order (and thus the new scope's index
//! assignment, which happens in push order) depend on accumulator-internal scheduling
//! rather than input order. The declared `concurrency` is still recorded for monitoring
//! symmetry with other worker kinds but does not parallelize this worker's own work.

use crate::error::Error;
use crate::node::{NodeKind, PipeId, WorkerId};
use crate::pipelike::PipeLike;
use crate::validator::WorkerDescriptor;
use crate::worker::{WorkerCore, WorkerHandle, WorkerState};
use dropflow_channel::{Pipe, SupplyPipe};
use parking_lot::Mutex;
use std::sync::Arc;

pub struct Transformer<In, Out> {
    core: Arc<WorkerCore>,
    input: Arc<Pipe<In>>,
    output: Arc<SupplyPipe<Out>>,
    map: Mutex<Box<dyn FnMut(In) -> Vec<Out> + Send>>,
    tail: Mutex<Box<dyn FnMut() -> Vec<Out> + Send>>,
}

impl<In: Send + 'static, Out: Send + 'static> Transformer<In, Out> {
    #[must_use]
    pub fn new(
        id: WorkerId,
        name: impl Into<String>,
        concurrency: usize,
        input: Arc<Pipe<In>>,
        output: Arc<SupplyPipe<Out>>,
        map: impl FnMut(In) -> Vec<Out> + Send + 'static,
        tail: impl FnMut() -> Vec<Out> + Send + 'static,
    ) -> Self {
        Self {
            core: Arc::new(WorkerCore::new(id, name, NodeKind::Transformer, concurrency)),
            input,
            output,
            map: Mutex::new(Box::new(map)),
            tail: Mutex::new(Box::new(tail)),
        }
    }
}

impl<In: Send + 'static, Out: Send + 'static> WorkerHandle for Transformer<In, Out> {
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
            inputs: vec![self.input.pipe_id()],
            outputs: vec![self.output.pipe().pipe_id()],
        }
    }
    fn input_pipe_ids(&self) -> Vec<PipeId> {
        vec![self.input.pipe_id()]
    }
    fn output_pipe_ids(&self) -> Vec<PipeId> {
        vec![self.output.pipe().pipe_id()]
    }

    fn run(&self) -> Result<(), Error> {
        if !self.core.claim_run() {
            return Err(Error::user_work(super::AlreadyRan::new(self.core.name())));
        }
        self.core.set_running();
        let cancel = self.core.cancellation_token();

        let mut map = self.map.lock();
        let mut aborted = false;
        self.input.drain(|item| {
            if cancel.is_cancelled() || aborted {
                return;
            }
            let (_, payload) = item.into_parts();
            for out in map(payload) {
                if let Err(e) = self.output.push(out) {
                    tracing::debug!(worker = self.core.name(), error = %e, "transformer push failed");
                    aborted = true;
                    return;
                }
            }
        });
        drop(map);

        if !aborted && !cancel.is_cancelled() {
            let mut tail = self.tail.lock();
            for out in tail() {
                if let Err(e) = self.output.push(out) {
                    tracing::debug!(worker = self.core.name(), error = %e, "transformer tail push failed");
                    break;
                }
            }
        }

        self.core.enter_closing_or_aborting();
        self.output.set_end_of_input(None);
        self.core.enter_terminal();
        self.core.take_outcome()
    }

    fn cancel(&self, reason: Option<crate::error::SharedError>) {
        self.core.cancel(reason);
        self.input.clear();
        self.output.set_end_of_input(None);
    }
    fn interrupt(&self) {
        self.core.interrupt();
        self.input.clear();
        self.output.set_end_of_input(None);
    }
    fn state(&self) -> WorkerState {
        self.core.state()
    }
    fn concurrency(&self) -> usize {
        self.core.concurrency()
    }
    fn canceled_work(&self) -> usize {
        self.core.canceled_work()
    }
    fn utilization(&self, _wall_nanos: u64) -> f64 {
        0.0
    }
    fn input_average_load(&self) -> Option<f64> {
        Some(self.input.average_load())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dropflow_channel::Item;
    use parking_lot::Mutex as PLMutex;

    #[test]
    fn splits_words_on_whitespace_and_flushes_tail() {
        let input: Arc<Pipe<char>> = Arc::new(Pipe::new("in", 4));
        for (i, c) in "one two three".chars().enumerate() {
            input.push(Some(Item::new(i as u64, c))).unwrap();
        }
        input.set_end_of_input(None);

        let output = Arc::new(SupplyPipe::<String>::new("words", 4));
        let buffer = Arc::new(PLMutex::new(String::new()));
        let buffer_map = buffer.clone();
        let buffer_tail = buffer.clone();
        let transformer = Transformer::new(
            WorkerId(0),
            "words",
            1,
            input,
            output.clone(),
            move |c: char| {
                let mut buf = buffer_map.lock();
                if c.is_whitespace() {
                    let word = std::mem::take(&mut *buf);
                    vec![word]
                } else {
                    buf.push(c);
                    Vec::new()
                }
            },
            move || {
                let mut buf = buffer_tail.lock();
                if buf.is_empty() {
                    Vec::new()
                } else {
                    vec![std::mem::take(&mut *buf)]
                }
            },
        );
        transformer.run().unwrap();

        let mut words = Vec::new();
        output.drain(|it| words.push(it.into_parts().1));
        assert_eq!(words, vec!["one".to_string(), "two".to_string(), "three".to_string()]);
    }
}
