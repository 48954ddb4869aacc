//! `Consumer`: 1 Pipe -> nothing, terminal side effect (§4.3 table).

use crate::error::Error;
use crate::node::{NodeKind, PipeId, WorkerId};
use crate::pipelike::PipeLike;
use crate::retry::RetryPolicy;
use crate::validator::WorkerDescriptor;
use crate::worker::{WorkerCore, WorkerHandle, WorkerState};
use dropflow_channel::Pipe;
use std::sync::Arc;

pub struct Consumer<D> {
    core: Arc<WorkerCore>,
    input: Arc<Pipe<D>>,
    consume: Arc<dyn Fn(&D) -> Result<(), Error> + Send + Sync>,
    retry: Option<Arc<RetryPolicy>>,
}

impl<D: Send + 'static> Consumer<D> {
    #[must_use]
    pub fn new(
        id: WorkerId,
        name: impl Into<String>,
        concurrency: usize,
        input: Arc<Pipe<D>>,
        consume: impl Fn(&D) -> Result<(), Error> + Send + Sync + 'static,
        retry: Option<RetryPolicy>,
    ) -> Self {
        Self {
            core: Arc::new(WorkerCore::new(id, name, NodeKind::Consumer, concurrency)),
            input,
            consume: Arc::new(consume),
            retry: retry.map(Arc::new),
        }
    }
}

impl<D: Send + 'static> WorkerHandle for Consumer<D> {
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
        let pool = self.core.pool();
        let cancel = self.core.cancellation_token();

        self.input.drain(|item| {
            if cancel.is_cancelled() {
                return;
            }
            let (_, payload) = item.into_parts();
            let consume = self.consume.clone();
            let retry = self.retry.clone();
            let core = self.core.clone();
            let task_cancel = cancel.clone();
            let _ = pool.submit(Box::new(move || {
                let outcome = match &retry {
                    Some(retry) => retry.execute(&task_cancel, || consume(&payload)),
                    None => consume(&payload),
                };
                if let Err(e) = outcome {
                    core.fault_and_cancel(e);
                }
            }));
        });

        self.core.enter_closing_or_aborting();
        self.core.pool().shutdown();
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
        self.core.concurrency()
    }
    fn canceled_work(&self) -> usize {
        self.core.canceled_work()
    }
    fn utilization(&self, wall_nanos: u64) -> f64 {
        self.core.utilization(wall_nanos)
    }
    fn input_average_load(&self) -> Option<f64> {
        Some(self.input.average_load())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dropflow_channel::Item;
    use parking_lot::Mutex;

    #[test]
    fn consumes_everything_in_order() {
        let input: Arc<Pipe<char>> = Arc::new(Pipe::new("in", 4));
        for (i, c) in "ABCDE".chars().enumerate() {
            input.push(Some(Item::new(i as u64, c))).unwrap();
        }
        input.set_end_of_input(None);

        let buffer = Arc::new(Mutex::new(String::new()));
        let buffer2 = buffer.clone();
        let c = Consumer::new(
            WorkerId(0),
            "collect",
            1,
            input,
            move |ch: &char| {
                buffer2.lock().push(*ch);
                Ok(())
            },
            None,
        );
        c.run().unwrap();
        assert_eq!(*buffer.lock(), "ABCDE");
    }
}
