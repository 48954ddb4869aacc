//! `Function`: 1 Pipe -> 1 Pipe, same scope, one-to-one (§4.3 table).

use crate::error::Error;
use crate::node::{NodeKind, PipeId, WorkerId};
use crate::pipelike::PipeLike;
use crate::retry::RetryPolicy;
use crate::validator::WorkerDescriptor;
use crate::worker::{WorkerCore, WorkerHandle, WorkerState};
use dropflow_channel::{Item, Pipe};
use std::sync::Arc;

/// Maps each input drop to an output drop, preserving its index.
pub struct Function<In, Out> {
    core: Arc<WorkerCore>,
    input: Arc<Pipe<In>>,
    output: Arc<Pipe<Out>>,
    map: Arc<dyn Fn(&In) -> Result<Out, Error> + Send + Sync>,
    retry: Option<Arc<RetryPolicy>>,
}

impl<In, Out> Function<In, Out>
where
    In: Send + 'static,
    Out: Send + 'static,
{
    #[must_use]
    pub fn new(
        id: WorkerId,
        name: impl Into<String>,
        concurrency: usize,
        input: Arc<Pipe<In>>,
        output: Arc<Pipe<Out>>,
        map: impl Fn(&In) -> Result<Out, Error> + Send + Sync + 'static,
        retry: Option<RetryPolicy>,
    ) -> Self {
        Self {
            core: Arc::new(WorkerCore::new(id, name, NodeKind::Function, concurrency)),
            input,
            output,
            map: Arc::new(map),
            retry: retry.map(Arc::new),
        }
    }
}

impl<In, Out> WorkerHandle for Function<In, Out>
where
    In: Send + 'static,
    Out: Send + 'static,
{
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
            outputs: vec![self.output.pipe_id()],
        }
    }
    fn input_pipe_ids(&self) -> Vec<PipeId> {
        vec![self.input.pipe_id()]
    }
    fn output_pipe_ids(&self) -> Vec<PipeId> {
        vec![self.output.pipe_id()]
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
            let (index, payload) = item.into_parts();
            let output = self.output.clone();
            let map = self.map.clone();
            let retry = self.retry.clone();
            let core = self.core.clone();
            let task_cancel = cancel.clone();
            let _ = pool.submit(Box::new(move || {
                let outcome = match &retry {
                    Some(retry) => retry.execute(&task_cancel, || map(&payload)),
                    None => map(&payload),
                };
                match outcome {
                    Ok(result) => {
                        if let Err(e) = output.push(Some(Item::new(index, result))) {
                            tracing::debug!(
                                worker = core.name(),
                                error = %e,
                                "push after output closed, dropping result"
                            );
                        }
                    }
                    Err(e) => core.fault_and_cancel(e),
                }
            }));
        });

        self.core.enter_closing_or_aborting();
        self.output.set_end_of_input(None);
        self.core.pool().shutdown();
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
    use dropflow_channel::Pipe;

    #[test]
    fn maps_one_to_one_preserving_index() {
        let input: Arc<Pipe<i32>> = Arc::new(Pipe::new("in", 4));
        let output: Arc<Pipe<i32>> = Arc::new(Pipe::new("out", 4));
        for i in 0..3i64 {
            input.push(Some(Item::new(i as u64, i as i32))).unwrap();
        }
        input.set_end_of_input(None);

        let f = Function::new(
            WorkerId(0),
            "double",
            1,
            input.clone(),
            output.clone(),
            |n: &i32| Ok(n * 2),
            None,
        );
        f.run().unwrap();

        let mut seen = Vec::new();
        output.drain(|item| seen.push(item.into_parts()));
        assert_eq!(seen, vec![(0, 0), (1, 2), (2, 4)]);
    }
}
