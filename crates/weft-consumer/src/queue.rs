//! Bounded hand-off between the pump and presentation threads.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;

struct QueueState<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// A bounded FIFO whose `push` blocks while full and whose `pop` blocks
/// while empty. Closing wakes every waiter: pushes then fail and pops drain
/// what is left before returning `None`.
pub struct FrameQueue<T> {
    state: Mutex<QueueState<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

impl<T> FrameQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity.max(1)),
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Append `item`, waiting for room. Gives the item back once closed.
    pub fn push(&self, item: T) -> Result<(), T> {
        let mut state = self.state.lock();
        while state.items.len() >= self.capacity && !state.closed {
            self.not_full.wait(&mut state);
        }
        if state.closed {
            return Err(item);
        }
        state.items.push_back(item);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Take the oldest item, waiting for one. `None` once closed and drained.
    pub fn pop(&self) -> Option<T> {
        let mut state = self.state.lock();
        while state.items.is_empty() && !state.closed {
            self.not_empty.wait(&mut state);
        }
        let item = state.items.pop_front();
        if item.is_some() {
            self.not_full.notify_one();
        }
        item
    }

    /// Drop queued items, keeping the newest `keep`. Returns how many went.
    pub fn purge(&self, keep: usize) -> usize {
        let mut state = self.state.lock();
        let dropped = state.items.len().saturating_sub(keep);
        state.items.drain(..dropped);
        if dropped > 0 {
            self.not_full.notify_all();
        }
        dropped
    }

    pub fn close(&self) {
        self.state.lock().closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Empty the queue and accept pushes again.
    pub fn reopen(&self) {
        let mut state = self.state.lock();
        state.items.clear();
        state.closed = false;
    }
}
