//! `Drain` (internal): 1 Pipe -> nothing, consumes and discards (§4.3 table). Used by the
//! builder to cap a branch nobody downstream reads from without tripping the
//! `COMPLETENESS` warning.

use crate::error::Error;
use crate::node::{NodeKind, PipeId, WorkerId};
use crate::pipelike::PipeLike;
use crate::validator::WorkerDescriptor;
use crate::worker::{WorkerCore, WorkerHandle, WorkerState};
use dropflow_channel::Pipe;
use std::sync::Arc;

pub struct Drain<D> {
    core: Arc<WorkerCore>,
    input: Arc<Pipe<D>>,
}

impl<D: Send + 'static> Drain<D> {
    #[must_use]
    pub fn new(id: WorkerId, name: impl Into<String>, input: Arc<Pipe<D>>) -> Self {
        Self {
            core: Arc::new(WorkerCore::new(id, name, NodeKind::Drain, 1)),
            input,
        }
    }
}

impl<D: Send + 'static> WorkerHandle for Drain<D> {
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
            outputs: vec![],
        }
    }
    fn input_pipe_ids(&self) -> Vec<PipeId> {
        vec![self.input.pipe_id()]
    }
    fn output_pipe_ids(&self) -> Vec<PipeId> {
        vec![]
    }

    fn run(&self) -> Result<(), Error> {
        if !self.core.claim_run() {
            return Err(Error::user_work(super::AlreadyRan::new(self.core.name())));
        }
        self.core.set_running();
        self.input.drain(|_| {});
        self.core.enter_closing_or_aborting();
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
