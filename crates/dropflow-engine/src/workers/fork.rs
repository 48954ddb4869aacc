//! `Fork` (internal): 1 Pipe -> K Pipes, broadcasting each drop to every output (§4.3
//! table). Same-scope outputs are pushed synchronously, in fork-output order, because
//! ordering across a same-scope fork depends on it; new-scope (`SupplyPipe`) outputs may be
//! submitted to the shared helper pool since each starts its own independent scope.

use crate::error::Error;
use crate::node::{NodeKind, PipeId, WorkerId};
use crate::pipelike::PipeLike;
use crate::pool::SharedPool;
use crate::validator::WorkerDescriptor;
use crate::worker::{WorkerCore, WorkerHandle, WorkerState};
use dropflow_channel::{Item, Pipe, SupplyPipe};
use std::sync::Arc;

/// One of a fork's output edges.
pub enum ForkOutput<D> {
    /// Preserves the input's index scope; pushed synchronously.
    SameScope(Arc<Pipe<D>>),
    /// Starts a fresh index scope; pushed asynchronously via the shared helper pool.
    NewScope(Arc<SupplyPipe<D>>),
}

impl<D> ForkOutput<D> {
    fn pipe_id(&self) -> PipeId {
        match self {
            ForkOutput::SameScope(p) => p.pipe_id(),
            ForkOutput::NewScope(p) => p.pipe().pipe_id(),
        }
    }

    fn base_capacity(&self) -> usize {
        match self {
            ForkOutput::SameScope(p) => p.base_capacity(),
            ForkOutput::NewScope(p) => p.pipe().base_capacity(),
        }
    }
}

pub struct Fork<D> {
    core: Arc<WorkerCore>,
    input: Arc<Pipe<D>>,
    outputs: Vec<ForkOutput<D>>,
}

impl<D: Clone + Send + Sync + 'static> Fork<D> {
    #[must_use]
    pub fn new(id: WorkerId, name: impl Into<String>, input: Arc<Pipe<D>>, outputs: Vec<ForkOutput<D>>) -> Self {
        Self {
            core: Arc::new(WorkerCore::new(id, name, NodeKind::Fork, 1)),
            input,
            outputs,
        }
    }

    /// Every output's declared base capacity, for the validator's `UNBALANCED_FORK` check.
    #[must_use]
    pub fn output_base_capacities(&self) -> Vec<usize> {
        self.outputs.iter().map(ForkOutput::base_capacity).collect()
    }
}

impl<D: Clone + Send + Sync + 'static> WorkerHandle for Fork<D> {
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
            outputs: self.outputs.iter().map(ForkOutput::pipe_id).collect(),
        }
    }
    fn input_pipe_ids(&self) -> Vec<PipeId> {
        vec![self.input.pipe_id()]
    }
    fn output_pipe_ids(&self) -> Vec<PipeId> {
        self.outputs.iter().map(ForkOutput::pipe_id).collect()
    }

    fn run(&self) -> Result<(), Error> {
        if !self.core.claim_run() {
            return Err(Error::user_work(super::AlreadyRan::new(self.core.name())));
        }
        self.core.set_running();
        let cancel = self.core.cancellation_token();
        let mut aborted = false;

        self.input.drain(|item| {
            if cancel.is_cancelled() || aborted {
                return;
            }
            let (index, payload) = item.into_parts();
            for output in &self.outputs {
                match output {
                    ForkOutput::SameScope(pipe) => {
                        if let Err(e) = pipe.push(Some(Item::new(index, payload.clone()))) {
                            tracing::debug!(worker = self.core.name(), error = %e, "fork push failed");
                            aborted = true;
                            return;
                        }
                    }
                    ForkOutput::NewScope(supply) => {
                        let supply = supply.clone();
                        let value = payload.clone();
                        let name = self.core.name().to_owned();
                        SharedPool::get().submit(Box::new(move || {
                            if let Err(e) = supply.push(value) {
                                tracing::debug!(worker = %name, error = %e, "fork new-scope push failed");
                            }
                        }));
                    }
                }
            }
        });

        self.core.enter_closing_or_aborting();
        for output in &self.outputs {
            match output {
                ForkOutput::SameScope(p) => p.set_end_of_input(None),
                ForkOutput::NewScope(p) => p.set_end_of_input(None),
            }
        }
        self.core.enter_terminal();
        self.core.take_outcome()
    }

    fn cancel(&self, reason: Option<crate::error::SharedError>) {
        self.core.cancel(reason);
        self.input.clear();
    }
    fn interrupt(&self) {
        self.core.interrupt();
        self.input.clear();
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
        Some(self.input.average_load())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcasts_same_scope_outputs_with_preserved_index() {
        let input: Arc<Pipe<char>> = Arc::new(Pipe::new("in", 4));
        for (i, c) in "abc".chars().enumerate() {
            input.push(Some(Item::new(i as u64, c))).unwrap();
        }
        input.set_end_of_input(None);

        let out1: Arc<Pipe<char>> = Arc::new(Pipe::new("o1", 4));
        let out2: Arc<Pipe<char>> = Arc::new(Pipe::new("o2", 4));
        let fork = Fork::new(
            WorkerId(0),
            "split",
            input,
            vec![
                ForkOutput::SameScope(out1.clone()),
                ForkOutput::SameScope(out2.clone()),
            ],
        );
        fork.run().unwrap();

        let mut seen1 = Vec::new();
        out1.drain(|it| seen1.push(it.into_parts()));
        let mut seen2 = Vec::new();
        out2.drain(|it| seen2.push(it.into_parts()));
        assert_eq!(seen1, vec![(0, 'a'), (1, 'b'), (2, 'c')]);
        assert_eq!(seen1, seen2);
    }
}
