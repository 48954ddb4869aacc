// SPDX-License-Identifier: Apache-2.0

//! A concurrent dataflow pipeline engine built on top of [`dropflow_channel`]'s ordered,
//! backpressured pipes.
//!
//! A [`pipeline::Pipeline`] is a directed graph of workers (user-facing [`Supplier`],
//! [`Function`], [`Transformer`], [`Action`], [`Consumer`], plus the internal
//! [`Fork`]/[`Join`]/[`Drain`]/[`Forward`] plumbing a [`pipeline::PipelineBuilder`] wires in
//! for fan-out/fan-in) connected by [`dropflow_channel::Pipe`]/[`dropflow_channel::SupplyPipe`]
//! edges. Each worker runs on its own thread, draining its input pipe(s) and optionally
//! farming work out to a bounded, never-rejecting [`pool::WorkerPool`].
//!
//! This crate owns everything above the channel primitive: worker lifecycle, graph
//! validation, retry, monitoring, and pipeline orchestration. It has no notion of how a
//! payload is encoded or transported; that boundary is `dropflow-channel`'s.

mod error;
mod monitoring;
mod node;
mod pipelike;
mod pipeline;
mod pool;
mod retry;
mod validator;
mod worker;
mod workers;

pub use error::{format_error_sources, Error, SharedError};
pub use monitoring::{MonitoredPipe, MonitoringMatrix, PipeSnapshot, WorkerSnapshot, BOTTLENECK_THRESHOLD};
pub use node::{NodeKind, PipeId, WorkerId};
pub use pipelike::PipeLike;
pub use pipeline::{Pipeline, PipelineBuilder};
pub use pool::{current_thread_index, SharedPool, WorkerPool};
pub use retry::{reducers, RetryPolicy};
pub use validator::{Layout, PipeDescriptor, Warning, WorkerDescriptor};
pub use worker::{WorkerCore, WorkerHandle, WorkerState};
pub use workers::action::Action;
pub use workers::consumer::Consumer;
pub use workers::drain::Drain;
pub use workers::fork::{Fork, ForkOutput};
pub use workers::forward::Forward;
pub use workers::function::Function;
pub use workers::join::Join;
pub use workers::supplier::Supplier;
pub use workers::transformer::Transformer;
