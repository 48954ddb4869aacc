//! A small object-safe facade over [`dropflow_channel::Pipe`] and
//! [`dropflow_channel::SupplyPipe`] so the validator and monitoring matrix can hold a single
//! `Vec` of pipes regardless of each one's payload type (§9, "cyclic references").

use crate::node::PipeId;
use dropflow_channel::{Pipe, SupplyPipe};

/// Read-only facade exposing a pipe's identity and monitoring counters.
pub trait PipeLike: Send + Sync {
    fn pipe_id(&self) -> PipeId;
    fn name(&self) -> &str;
    fn is_supply(&self) -> bool;
    fn base_capacity(&self) -> usize;
    fn in_order_drops(&self) -> usize;
    fn out_of_order_drops(&self) -> usize;
    fn in_push_drops(&self) -> usize;
    fn total_pushed(&self) -> u64;
    fn average_load(&self) -> f64;
    fn is_closed(&self) -> bool;
}

impl<D: Send> PipeLike for Pipe<D> {
    fn pipe_id(&self) -> PipeId {
        PipeId(std::ptr::from_ref(self) as usize)
    }
    fn name(&self) -> &str {
        Pipe::name(self)
    }
    fn is_supply(&self) -> bool {
        false
    }
    fn base_capacity(&self) -> usize {
        Pipe::base_capacity(self)
    }
    fn in_order_drops(&self) -> usize {
        Pipe::in_order_drops(self)
    }
    fn out_of_order_drops(&self) -> usize {
        Pipe::out_of_order_drops(self)
    }
    fn in_push_drops(&self) -> usize {
        Pipe::in_push_drops(self)
    }
    fn total_pushed(&self) -> u64 {
        Pipe::total_pushed(self)
    }
    fn average_load(&self) -> f64 {
        Pipe::average_load(self)
    }
    fn is_closed(&self) -> bool {
        Pipe::is_closed(self)
    }
}

impl<D: Send> PipeLike for SupplyPipe<D> {
    fn pipe_id(&self) -> PipeId {
        PipeId(std::ptr::from_ref(self) as usize)
    }
    fn name(&self) -> &str {
        self.pipe_ref().name()
    }
    fn is_supply(&self) -> bool {
        true
    }
    fn base_capacity(&self) -> usize {
        self.pipe_ref().base_capacity()
    }
    fn in_order_drops(&self) -> usize {
        self.pipe_ref().in_order_drops()
    }
    fn out_of_order_drops(&self) -> usize {
        self.pipe_ref().out_of_order_drops()
    }
    fn in_push_drops(&self) -> usize {
        self.pipe_ref().in_push_drops()
    }
    fn total_pushed(&self) -> u64 {
        self.pipe_ref().total_pushed()
    }
    fn average_load(&self) -> f64 {
        self.pipe_ref().average_load()
    }
    fn is_closed(&self) -> bool {
        self.pipe_ref().is_closed()
    }
}
