//! The user heap.
//!
//! Programs obtain memory through malloc, calloc, realloc and free. Here those primitives
//! hand out [`Allocation`]s, accounting records that free themselves when dropped, so an
//! operation that fails halfway cannot leak what it already obtained. A heap may be
//! bounded, which is how an out-of-memory kernel is modelled.

use crate::syscall::number;
use std::cell::Cell;
use std::collections::TryReserveError;
use std::rc::Rc;
use thiserror::Error;
use tracing::{debug, trace};

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("memory allocation failed")]
pub struct AllocError;

impl From<TryReserveError> for AllocError {
    fn from(_: TryReserveError) -> Self {
        AllocError
    }
}

#[derive(Debug, Default)]
struct Counters {
    limit: Cell<Option<usize>>,
    in_use: Cell<usize>,
    blocks: Cell<usize>,
}

impl Counters {
    fn charge(&self, size: usize) -> Result<(), AllocError> {
        let in_use = self.in_use.get().checked_add(size).ok_or(AllocError)?;
        if self.limit.get().is_some_and(|limit| in_use > limit) {
            debug!(size, in_use = self.in_use.get(), limit = ?self.limit.get(), "heap exhausted");
            return Err(AllocError);
        }
        self.in_use.set(in_use);
        Ok(())
    }

    fn release(&self, size: usize) {
        self.in_use.set(self.in_use.get().saturating_sub(size));
    }
}

/// Handle to a heap. Clones share the same accounting.
#[derive(Debug, Clone, Default)]
pub struct Heap {
    counters: Rc<Counters>,
}

impl Heap {
    /// A heap that only fails when the host does.
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// A heap that refuses to hand out more than `limit` bytes at once.
    pub fn with_limit(limit: usize) -> Self {
        let heap = Self::default();
        heap.set_limit(Some(limit));
        heap
    }

    pub fn set_limit(&self, limit: Option<usize>) {
        self.counters.limit.set(limit);
    }

    /// Bytes currently handed out.
    pub fn in_use(&self) -> usize {
        self.counters.in_use.get()
    }

    /// Allocations not yet freed.
    pub fn live_blocks(&self) -> usize {
        self.counters.blocks.get()
    }

    pub fn malloc(&self, size: usize) -> Result<Allocation, AllocError> {
        trace!(number = number::MALLOC, size, "malloc");
        self.allocate(size)
    }

    /// Allocate room for `nitems` elements of `size` bytes each.
    pub fn calloc(&self, nitems: usize, size: usize) -> Result<Allocation, AllocError> {
        trace!(number = number::CALLOC, nitems, size, "calloc");
        let total = nitems.checked_mul(size).ok_or(AllocError)?;
        self.allocate(total)
    }

    fn allocate(&self, size: usize) -> Result<Allocation, AllocError> {
        self.counters.charge(size)?;
        self.counters.blocks.set(self.counters.blocks.get() + 1);
        Ok(Allocation {
            counters: Rc::clone(&self.counters),
            size,
        })
    }
}

/// A live block on a [`Heap`]. Dropping it frees the block.
#[derive(Debug)]
pub struct Allocation {
    counters: Rc<Counters>,
    size: usize,
}

impl Allocation {
    pub fn size(&self) -> usize {
        self.size
    }

    /// Resize the block. On failure the block keeps its old size.
    pub fn realloc(&mut self, size: usize) -> Result<(), AllocError> {
        trace!(number = number::REALLOC, from = self.size, to = size, "realloc");
        if size > self.size {
            self.counters.charge(size - self.size)?;
        } else {
            self.counters.release(self.size - size);
        }
        self.size = size;
        Ok(())
    }
}

impl Drop for Allocation {
    fn drop(&mut self) {
        trace!(number = number::FREE, size = self.size, "free");
        self.counters.release(self.size);
        self.counters
            .blocks
            .set(self.counters.blocks.get().saturating_sub(1));
    }
}
