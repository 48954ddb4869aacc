//! `Forward` (internal): 1 Pipe -> a `SupplyPipe` entry point, re-indexing payloads into
//! another scope (§4.3 table).

use crate::error::Error;
use crate::node::{NodeKind, PipeId, WorkerId};
use crate::pipelike::PipeLike;
use crate::validator::WorkerDescriptor;
use crate::worker::{WorkerCore, WorkerHandle, WorkerState};
use dropflow_channel::{Pipe, SupplyPipe};
use std::sync::Arc;

pub struct Forward<D> {
    core: Arc<WorkerCore>,
    input: Arc<Pipe<D>>,
    output: Arc<SupplyPipe<D>>,
}

impl<D: Send + 'static> Forward<D> {
    #[must_use]
    pub fn new(id: WorkerId, name: impl Into<String>, input: Arc<Pipe<D>>, output: Arc<SupplyPipe<D>>) -> Self {
        Self {
            core: Arc::new(WorkerCore::new(id, name, NodeKind::Forward, 1)),
            input,
            output,
        }
    }
}

impl<D: Send + 'static> WorkerHandle for Forward<D> {
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
        let mut aborted = false;
        self.input.drain(|item| {
            if aborted {
                return;
            }
            let (_, payload) = item.into_parts();
            if let Err(e) = self.output.push(payload) {
                tracing::debug!(worker = self.core.name(), error = %e, "forward push failed");
                aborted = true;
            }
        });

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
