//! `PipelineBuilder`/`Pipeline`: owns the worker set and root supply pipe, validates the
//! graph, runs it, routes cancellation, exposes monitoring (§4.4, §9 "Builder/config").

use crate::error::{Error, SharedError};
use crate::monitoring::{MonitoringMatrix, PipeSnapshot, WorkerSnapshot, BOTTLENECK_THRESHOLD};
use crate::node::{PipeId, WorkerId};
use crate::pipelike::PipeLike;
use crate::retry::reducers::first_with_suppressed;
use crate::validator::{self, PipeDescriptor, Warning};
use crate::worker::{WorkerHandle, WorkerState};
use dropflow_channel::SupplyPipe;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Consumed-by-value builder: register the root supply pipe's payload type `D`, every
/// worker and every pipe in the graph, then `build()` to validate and freeze it into a
/// runnable [`Pipeline`] (§9, "Observable builder state").
pub struct PipelineBuilder<D> {
    name: String,
    root: Arc<SupplyPipe<D>>,
    workers: Vec<Arc<dyn WorkerHandle>>,
    pipes: Vec<Arc<dyn PipeLike>>,
    allowed_warnings: HashSet<Warning>,
}

impl<D: Send + 'static> PipelineBuilder<D> {
    #[must_use]
    pub fn new(name: impl Into<String>, root: Arc<SupplyPipe<D>>) -> Self {
        let name = name.into();
        let pipes: Vec<Arc<dyn PipeLike>> = vec![root.clone()];
        Self {
            name,
            root,
            workers: Vec::new(),
            pipes,
            allowed_warnings: HashSet::new(),
        }
    }

    #[must_use]
    pub fn add_worker(mut self, worker: Arc<dyn WorkerHandle>) -> Self {
        self.workers.push(worker);
        self
    }

    /// Registers a pipe that is part of the graph but not already known from the root, so
    /// the validator and monitoring matrix can see it (every `Pipe`/`SupplyPipe` a worker
    /// touches should be registered once).
    #[must_use]
    pub fn register_pipe<P: PipeLike + 'static>(mut self, pipe: Arc<P>) -> Self {
        self.pipes.push(pipe);
        self
    }

    #[must_use]
    pub fn allow_warning(mut self, warning: Warning) -> Self {
        self.allowed_warnings.insert(warning);
        self
    }

    /// Validates the graph and, if every emitted warning was pre-declared as allowed,
    /// returns a runnable [`Pipeline`]. Fails with [`Error::ConfigurationFault`] otherwise
    /// (§4.5).
    pub fn build(self) -> Result<Pipeline<D>, Error> {
        let worker_descriptors: Vec<_> = self.workers.iter().map(|w| w.descriptor()).collect();
        let pipe_descriptors: Vec<PipeDescriptor> = self
            .pipes
            .iter()
            .map(|p| PipeDescriptor {
                id: p.pipe_id(),
                base_capacity: p.base_capacity(),
                is_supply: p.is_supply(),
            })
            .collect();

        let result = validator::validate(self.root.pipe_id(), &worker_descriptors, &pipe_descriptors);
        if !result.multiple_producer_conflicts.is_empty() {
            return Err(Error::MultipleProducers(result.multiple_producer_conflicts));
        }
        let unexpected: Vec<Warning> = result
            .warnings
            .iter()
            .copied()
            .filter(|w| !self.allowed_warnings.contains(w))
            .collect();
        if !unexpected.is_empty() {
            return Err(Error::ConfigurationFault(unexpected));
        }

        Ok(Pipeline {
            name: self.name,
            root: self.root,
            workers: self.workers,
            pipes: self.pipes,
            matrix: MonitoringMatrix::from_layout(result.layout),
            state: Mutex::new(WorkerState::Ready),
            ran_once: AtomicBool::new(false),
            started_at: Mutex::new(None),
        })
    }
}

/// A validated, runnable pipeline (§4.4).
pub struct Pipeline<D> {
    name: String,
    root: Arc<SupplyPipe<D>>,
    workers: Vec<Arc<dyn WorkerHandle>>,
    pipes: Vec<Arc<dyn PipeLike>>,
    matrix: MonitoringMatrix,
    state: Mutex<WorkerState>,
    ran_once: AtomicBool,
    started_at: Mutex<Option<Instant>>,
}

impl<D: Send + 'static> Pipeline<D> {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn monitoring_matrix(&self) -> &MonitoringMatrix {
        &self.matrix
    }

    /// Feeds the pipeline from outside, delegating to the root `SupplyPipe`. Legal to call
    /// concurrently with a running pipeline (§4.4).
    pub fn push(&self, payload: D) -> Result<bool, Error> {
        Ok(self.root.push(payload)?)
    }

    /// Closes the root supply pipe (open pipelines only, §4.4).
    pub fn set_end_of_input(&self) {
        self.root.set_end_of_input(None);
    }

    /// Runs every worker concurrently on its own named OS thread, waits for all of them,
    /// and aggregates their outcomes with the first-with-suppressed reducer (§4.4, §7).
    ///
    /// # Panics
    ///
    /// Panics if a worker's thread cannot be spawned.
    pub fn run(&self) -> Result<(), Error> {
        if self
            .ran_once
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::user_work(super::workers::AlreadyRan::new(&self.name)));
        }
        *self.state.lock() = WorkerState::Running;
        *self.started_at.lock() = Some(Instant::now());

        let errors: Vec<Error> = std::thread::scope(|scope| {
            let handles: Vec<_> = self
                .workers
                .iter()
                .map(|worker| {
                    let worker = worker.clone();
                    let name = format!("{}-{}", self.name, worker.name());
                    std::thread::Builder::new()
                        .name(name)
                        .spawn_scoped(scope, move || worker.run())
                        .expect("failed to spawn pipeline worker thread")
                })
                .collect();

            handles
                .into_iter()
                .filter_map(|h| h.join().ok())
                .filter_map(Result::err)
                .collect()
        });

        *self.state.lock() = if errors.is_empty() {
            WorkerState::Done
        } else {
            WorkerState::Aborted
        };

        match first_with_suppressed(errors) {
            None => Ok(()),
            Some(e) if e.is_silent_stop() => Ok(()),
            Some(e) => Err(e),
        }
    }

    /// `stop()`: cancels every worker with no reason (silent stop) and clears every
    /// registered pipe to unblock any producer stuck pushing into a pipe nobody will drain
    /// again (§4.4).
    pub fn stop(&self) {
        self.cancel_all(None);
    }

    /// `interrupt()`: cancels every worker with an interruption cause.
    pub fn interrupt(&self) {
        for worker in &self.workers {
            worker.interrupt();
        }
        self.internal_close();
    }

    fn cancel_all(&self, reason: Option<SharedError>) {
        for worker in &self.workers {
            worker.cancel(reason.clone());
        }
        self.internal_close();
    }

    fn internal_close(&self) {
        self.root.clear();
        self.root.set_end_of_input(None);
    }

    /// Input-having workers whose input pipe's average load exceeds
    /// [`BOTTLENECK_THRESHOLD`] (§4.4).
    #[must_use]
    pub fn get_bottlenecks(&self) -> Vec<WorkerId> {
        self.workers
            .iter()
            .filter_map(|w| {
                let load = w.input_average_load()?;
                (load > BOTTLENECK_THRESHOLD).then(|| w.id())
            })
            .collect()
    }

    #[must_use]
    pub fn pipe_snapshots(&self) -> Vec<PipeSnapshot> {
        self.pipes.iter().map(|p| PipeSnapshot::capture(p.as_ref())).collect()
    }

    #[must_use]
    pub fn worker_snapshots(&self) -> Vec<WorkerSnapshot> {
        let wall_nanos = self
            .started_at
            .lock()
            .map(|t| t.elapsed().as_nanos() as u64)
            .unwrap_or(0);
        self.workers
            .iter()
            .map(|w| WorkerSnapshot {
                id: w.id(),
                name: w.name().to_owned(),
                kind: w.kind(),
                state: w.state(),
                concurrency: w.concurrency(),
                utilization: w.utilization(wall_nanos),
                canceled_work: w.canceled_work(),
                input_average_load: w.input_average_load(),
            })
            .collect()
    }

    #[must_use]
    pub fn root_pipe_id(&self) -> PipeId {
        self.root.pipe().pipe_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workers::drain::Drain;
    use crate::workers::function::Function;
    use crate::workers::supplier::Supplier;
    use dropflow_channel::Pipe;

    #[test]
    fn build_rejects_unexpected_completeness_warning() {
        let root = Arc::new(SupplyPipe::<char>::new("root", 4));
        let mut chars = "ab".chars();
        let supplier = Supplier::new(WorkerId::new(0), "source", root.clone(), move || chars.next());

        let orphan: Arc<Pipe<char>> = Arc::new(Pipe::new("orphan", 4));
        let function = Function::new(
            WorkerId::new(1),
            "copy",
            1,
            root.pipe(),
            orphan.clone(),
            |c: &char| Ok(*c),
            None,
        );

        let err = PipelineBuilder::new("incomplete", root)
            .add_worker(Arc::new(supplier))
            .add_worker(Arc::new(function))
            .register_pipe(orphan)
            .build()
            .unwrap_err();

        match err {
            Error::ConfigurationFault(warnings) => {
                assert!(warnings.contains(&Warning::Completeness), "{warnings:?}");
            }
            other => panic!("expected ConfigurationFault, got {other:?}"),
        }
    }

    #[test]
    fn build_rejects_two_producers_sharing_a_plain_pipe_even_if_allowed() {
        let root = Arc::new(SupplyPipe::<char>::new("root", 4));
        let mut chars = "ab".chars();
        let supplier = Supplier::new(WorkerId::new(0), "source", root.clone(), move || chars.next());

        let shared: Arc<Pipe<char>> = Arc::new(Pipe::new("shared", 4));
        let first = Function::new(
            WorkerId::new(1),
            "first",
            1,
            root.pipe(),
            shared.clone(),
            |c: &char| Ok(*c),
            None,
        );
        let second = Function::new(
            WorkerId::new(2),
            "second",
            1,
            root.pipe(),
            shared.clone(),
            |c: &char| Ok(*c),
            None,
        );
        let sink = Drain::new(WorkerId::new(3), "sink", shared.clone());

        let err = PipelineBuilder::new("conflict", root)
            .add_worker(Arc::new(supplier))
            .add_worker(Arc::new(first))
            .add_worker(Arc::new(second))
            .add_worker(Arc::new(sink))
            .register_pipe(shared)
            .allow_warning(Warning::MultipleInputs)
            .allow_warning(Warning::Discovery)
            .allow_warning(Warning::Completeness)
            .build()
            .unwrap_err();

        match err {
            Error::MultipleProducers(pipes) => assert_eq!(pipes.len(), 1),
            other => panic!("expected MultipleProducers, got {other:?}"),
        }
    }

    #[test]
    fn build_succeeds_when_warning_is_pre_declared_allowed() {
        let root = Arc::new(SupplyPipe::<char>::new("root", 4));
        let mut chars = "ab".chars();
        let supplier = Supplier::new(WorkerId::new(0), "source", root.clone(), move || chars.next());

        let orphan: Arc<Pipe<char>> = Arc::new(Pipe::new("orphan", 4));
        let function = Function::new(
            WorkerId::new(1),
            "copy",
            1,
            root.pipe(),
            orphan.clone(),
            |c: &char| Ok(*c),
            None,
        );

        PipelineBuilder::new("incomplete", root)
            .add_worker(Arc::new(supplier))
            .add_worker(Arc::new(function))
            .register_pipe(orphan)
            .allow_warning(Warning::Completeness)
            .build()
            .unwrap();
    }

    #[test]
    fn run_twice_fails_the_second_time_without_rerunning_workers() {
        let root = Arc::new(SupplyPipe::<char>::new("root", 4));
        let mut chars = "ab".chars();
        let supplier = Supplier::new(WorkerId::new(0), "source", root.clone(), move || chars.next());
        let sink = Drain::new(WorkerId::new(1), "sink", root.pipe());

        let pipeline = PipelineBuilder::new("s", root)
            .add_worker(Arc::new(supplier))
            .add_worker(Arc::new(sink))
            .build()
            .unwrap();

        pipeline.run().unwrap();
        let err = pipeline.run().unwrap_err();
        assert!(matches!(err, Error::UserWorkFault { .. }));
    }
}
