use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam::queue::SegQueue;

use crate::error::{OrchestratorError, Result};

/// Lock-free FIFO buffer with an optional capacity bound.
///
/// Companion primitive to the batch runner, sharing its error surface but
/// not its execution path. An unbounded queue never rejects; a bounded one
/// fails `enqueue` with `queue-capacity-exceeded` when full.
pub struct Fifo<T> {
    queue: SegQueue<T>,
    capacity: Option<usize>,
    size: AtomicUsize,
}

impl<T> Fifo<T> {
    pub fn unbounded() -> Self {
        Self {
            queue: SegQueue::new(),
            capacity: None,
            size: AtomicUsize::new(0),
        }
    }

    pub fn bounded(capacity: usize) -> Self {
        Self {
            queue: SegQueue::new(),
            capacity: Some(capacity),
            size: AtomicUsize::new(0),
        }
    }

    pub fn enqueue(&self, item: T) -> Result<()> {
        if let Some(capacity) = self.capacity {
            // Reserve a slot first; revert if the reservation overshot.
            if self.size.fetch_add(1, Ordering::AcqRel) >= capacity {
                self.size.fetch_sub(1, Ordering::AcqRel);
                return Err(OrchestratorError::QueueCapacityExceeded { capacity });
            }
        } else {
            self.size.fetch_add(1, Ordering::AcqRel);
        }
        self.queue.push(item);
        Ok(())
    }

    pub fn dequeue(&self) -> Option<T> {
        let item = self.queue.pop();
        if item.is_some() {
            self.size.fetch_sub(1, Ordering::AcqRel);
        }
        item
    }

    pub fn len(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }
}
