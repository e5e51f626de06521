//! Backend Queue: bounded single-consumer FIFO.

use crate::types::BackendRequest;
use std::collections::VecDeque;

/// Bounded FIFO of committed requests awaiting dispatch. The dispatcher is
/// the queue's unique consumer.
pub struct BackendQueue {
    capacity: usize,
    items: VecDeque<BackendRequest>,
}

impl BackendQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            items: VecDeque::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    /// Enqueue, returning the request back to the caller if the queue is at
    /// capacity: the caller restores the merge buffer rather than losing the
    /// text.
    pub fn try_push(&mut self, req: BackendRequest) -> Result<(), BackendRequest> {
        if self.is_full() {
            return Err(req);
        }
        self.items.push_back(req);
        Ok(())
    }

    pub fn pop(&mut self) -> Option<BackendRequest> {
        self.items.pop_front()
    }
}
