//! `Action`: 1 Pipe -> 1 Pipe, side effect only; forwards the input drop unchanged,
//! preserving its index (§4.3 table).

use crate::error::Error;
use crate::node::{NodeKind, PipeId, WorkerId};
use crate::pipelike::PipeLike;
use crate::retry::RetryPolicy;
use crate::validator::WorkerDescriptor;
use crate::worker::{WorkerCore, WorkerHandle, WorkerState};
use dropflow_channel::{Item, Pipe};
use std::sync::Arc;

pub struct Action<D> {
    core: Arc<WorkerCore>,
    input: Arc<Pipe<D>>,
    output: Arc<Pipe<D>>,
    effect: Arc<dyn Fn(&D) -> Result<(), Error> + Send + Sync>,
    retry: Option<Arc<RetryPolicy>>,
}

impl<D: Send + 'static> Action<D> {
    #[must_use]
    pub fn new(
        id: WorkerId,
        name: impl Into<String>,
        concurrency: usize,
        input: Arc<Pipe<D>>,
        output: Arc<Pipe<D>>,
        effect: impl Fn(&D) -> Result<(), Error> + Send + Sync + 'static,
        retry: Option<RetryPolicy>,
    ) -> Self {
        Self {
            core: Arc::new(WorkerCore::new(id, name, NodeKind::Action, concurrency)),
            input,
            output,
            effect: Arc::new(effect),
            retry: retry.map(Arc::new),
        }
    }
}

impl<D: Send + 'static> WorkerHandle for Action<D> {
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
            let effect = self.effect.clone();
            let retry = self.retry.clone();
            let core = self.core.clone();
            let task_cancel = cancel.clone();
            let _ = pool.submit(Box::new(move || {
                let outcome = match &retry {
                    Some(retry) => retry.execute(&task_cancel, || effect(&payload)),
                    None => effect(&payload),
                };
                match outcome {
                    Ok(()) => {
                        if let Err(e) = output.push(Some(Item::new(index, payload))) {
                            tracing::debug!(
                                worker = core.name(),
                                error = %e,
                                "push after output closed, dropping forwarded drop"
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
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn forwards_unchanged_and_runs_side_effect() {
        let input: Arc<Pipe<char>> = Arc::new(Pipe::new("in", 4));
        let output: Arc<Pipe<char>> = Arc::new(Pipe::new("out", 4));
        for (i, c) in "abc".chars().enumerate() {
            input.push(Some(Item::new(i as u64, c))).unwrap();
        }
        input.set_end_of_input(None);

        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        let a = Action::new(
            WorkerId(0),
            "touch",
            1,
            input.clone(),
            output.clone(),
            move |_c: &char| {
                hits2.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            None,
        );
        a.run().unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 3);
        let mut seen = Vec::new();
        output.drain(|it| seen.push(it.into_parts()));
        assert_eq!(seen, vec![(0, 'a'), (1, 'b'), (2, 'c')]);
    }
}
