// SPDX-License-Identifier: Apache-2.0

//! Bounded, order-preserving pipes.
//!
//! A [`Pipe`] admits drops strictly in ascending index order, buffering out-of-order
//! arrivals until their turn comes up, and applies backpressure once its ready queue fills.
//! A [`SupplyPipe`] is additionally an entry point: it assigns fresh indices (starting a new
//! index scope) and may filter payloads with a predicate.
//!
//! This crate has no notion of a worker, a graph, or a thread pool — it is the minimal
//! ordering/backpressure primitive that `dropflow-engine` builds workers and pipelines on
//! top of.

mod error;
mod index;
mod pipe;
mod supply_pipe;

pub use error::{format_error_sources, CloseReason, Error};
pub use index::Index;
pub use pipe::{Item, Pipe};
pub use supply_pipe::SupplyPipe;
