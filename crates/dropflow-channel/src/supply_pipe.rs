//! [`SupplyPipe`]: the entry point of an index scope.

use crate::error::{CloseReason, Error};
use crate::index::Index;
use crate::pipe::{Item, Pipe};
use std::sync::Arc;

/// A [`Pipe`] that is also an entry point into a fresh index scope: it assigns indices to
/// the payloads pushed into it and may filter them with a predicate (§3, §4.2).
///
/// The underlying pipe is `Arc`-held rather than owned outright so that a worker downstream
/// of a supply scope (e.g. a `Function` consuming a `Supplier`'s output) can hold the same
/// pipe the supply scope feeds, not a copy of it.
pub struct SupplyPipe<D> {
    pipe: Arc<Pipe<D>>,
    next_index: Index,
    predicate: Option<Box<dyn Fn(&D) -> bool + Send + Sync>>,
}

impl<D> SupplyPipe<D> {
    /// Creates a supply pipe with no filtering predicate.
    #[must_use]
    pub fn new(name: impl Into<String>, base_capacity: usize) -> Self {
        Self {
            pipe: Arc::new(Pipe::new(name, base_capacity)),
            next_index: Index::new(),
            predicate: None,
        }
    }

    /// Creates a supply pipe that only admits payloads for which `predicate` returns `true`.
    /// The predicate is the only place cardinality across a scope may shrink (§4.2).
    #[must_use]
    pub fn with_predicate<F>(name: impl Into<String>, base_capacity: usize, predicate: F) -> Self
    where
        F: Fn(&D) -> bool + Send + Sync + 'static,
    {
        Self {
            pipe: Arc::new(Pipe::new(name, base_capacity)),
            next_index: Index::new(),
            predicate: Some(Box::new(predicate)),
        }
    }

    /// Public supply form: tests the predicate (if any); on pass, allocates a fresh index
    /// atomically and performs the underlying pipe push. Blocks until accepted or closed.
    ///
    /// Returns `Ok(false)` when the predicate rejected the payload (no push happened),
    /// `Ok(true)` when it was accepted, and `Err` on a closed pipe.
    pub fn push(&self, payload: D) -> Result<bool, Error> {
        if let Some(predicate) = &self.predicate
            && !predicate(&payload)
        {
            return Ok(false);
        }
        let index = self.next_index.next();
        self.pipe.push(Some(Item::new(index, payload)))?;
        Ok(true)
    }

    /// Pushes an already-indexed item, rebasing nothing: used by internal workers (Fork,
    /// Forward) that need to hand an item with a caller-chosen index to this scope's
    /// underlying pipe directly, bypassing predicate/index assignment.
    pub fn push_item(&self, item: Item<D>) -> Result<(), Error> {
        self.pipe.push(Some(item))
    }

    /// Drains this scope's pipe (delegates to the underlying [`Pipe::drain`]).
    pub fn drain<F: FnMut(Item<D>)>(&self, action: F) {
        self.pipe.drain(action);
    }

    /// Idempotently closes the scope's pipe.
    pub fn set_end_of_input(&self, reason: Option<CloseReason>) {
        self.pipe.set_end_of_input(reason);
    }

    /// Discards buffered items, see [`Pipe::clear`].
    pub fn clear(&self) {
        self.pipe.clear();
    }

    /// Whether the scope's pipe has closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.pipe.is_closed()
    }

    /// Shares the underlying pipe, for a downstream worker to drain directly from this
    /// scope.
    #[must_use]
    pub fn pipe(&self) -> Arc<Pipe<D>> {
        self.pipe.clone()
    }

    /// Borrows the underlying pipe without bumping the refcount, for monitoring code that
    /// only needs to read counters.
    #[must_use]
    pub fn pipe_ref(&self) -> &Pipe<D> {
        &self.pipe
    }

    /// How many indices this scope has allocated so far.
    #[must_use]
    pub fn allocated_indices(&self) -> u64 {
        self.next_index.allocated()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assigns_increasing_indices_in_push_order() {
        let supply: SupplyPipe<char> = SupplyPipe::new("root", 8);
        for c in ['a', 'b', 'c'] {
            assert!(supply.push(c).unwrap());
        }
        supply.set_end_of_input(None);

        let mut seen = Vec::new();
        supply.drain(|it| seen.push(it.into_parts()));
        assert_eq!(seen, vec![(0, 'a'), (1, 'b'), (2, 'c')]);
    }

    #[test]
    fn predicate_shrinks_the_scope_without_gaps() {
        let supply = SupplyPipe::with_predicate("dashes", 8, |c: &char| *c == '-');
        for c in "a-b-c-d".chars() {
            let _ = supply.push(c).unwrap();
        }
        supply.set_end_of_input(None);

        let mut seen = Vec::new();
        supply.drain(|it| seen.push(it.payload().to_owned()));
        assert_eq!(seen, vec!['-', '-', '-']);
        // Indices are dense (0, 1, 2): the predicate shrinks cardinality, not the index
        // sequence of admitted items.
        let mut indices = Vec::new();
        let supply2 = SupplyPipe::with_predicate("dashes2", 8, |c: &char| *c == '-');
        for c in "a-b-c-d".chars() {
            let _ = supply2.push(c).unwrap();
        }
        supply2.set_end_of_input(None);
        supply2.drain(|it| indices.push(it.index()));
        assert_eq!(indices, vec![0, 1, 2]);
    }
}
