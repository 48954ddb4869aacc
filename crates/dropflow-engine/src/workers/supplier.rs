//! `Supplier`: produces drops from nothing until a `None` signals end-of-source (§4.3
//! table). Inherently sequential: the user's `produce` closure is `FnMut` and typically
//! carries its own cursor/iterator state, so it always runs on a single dedicated thread
//! regardless of the worker's declared concurrency (which is accepted for interface
//! symmetry with other variants but otherwise unused here).

use crate::error::Error;
use crate::node::{NodeKind, PipeId, WorkerId};
use crate::pipelike::PipeLike;
use crate::validator::WorkerDescriptor;
use crate::worker::{WorkerCore, WorkerHandle, WorkerState};
use dropflow_channel::SupplyPipe;
use parking_lot::Mutex;
use std::sync::Arc;

pub struct Supplier<D> {
    core: Arc<WorkerCore>,
    output: Arc<SupplyPipe<D>>,
    produce: Mutex<Box<dyn FnMut() -> Option<D> + Send>>,
}

impl<D: Send + 'static> Supplier<D> {
    #[must_use]
    pub fn new(
        id: WorkerId,
        name: impl Into<String>,
        output: Arc<SupplyPipe<D>>,
        produce: impl FnMut() -> Option<D> + Send + 'static,
    ) -> Self {
        Self {
            core: Arc::new(WorkerCore::new(id, name, NodeKind::Supplier, 1)),
            output,
            produce: Mutex::new(Box::new(produce)),
        }
    }
}

impl<D: Send + 'static> WorkerHandle for Supplier<D> {
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
            inputs: vec![],
            outputs: vec![self.output.pipe().pipe_id()],
        }
    }
    fn input_pipe_ids(&self) -> Vec<PipeId> {
        vec![]
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

        let mut produce = self.produce.lock();
        loop {
            if cancel.is_cancelled() {
                break;
            }
            let Some(payload) = produce() else {
                break;
            };
            if let Err(e) = self.output.push(payload) {
                tracing::debug!(worker = self.core.name(), error = %e, "supplier push failed, stopping");
                break;
            }
        }
        drop(produce);

        self.core.enter_closing_or_aborting();
        self.output.set_end_of_input(None);
        self.core.enter_terminal();
        self.core.take_outcome()
    }

    fn cancel(&self, reason: Option<crate::error::SharedError>) {
        self.core.cancel(reason);
        self.output.set_end_of_input(None);
    }
    fn interrupt(&self) {
        self.core.interrupt();
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
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_until_none_then_closes() {
        let output = Arc::new(SupplyPipe::new("root", 4));
        let mut chars = "ABCDE".chars();
        let supplier = Supplier::new(WorkerId(0), "source", output.clone(), move || chars.next());
        supplier.run().unwrap();

        let mut seen = String::new();
        output.drain(|it| seen.push(*it.payload()));
        assert_eq!(seen, "ABCDE");
        assert!(output.is_closed());
    }
}
