//! Task queue for the thread pool executor.
//!
//! Plain FIFO with an optional capacity. The executor keeps it behind the same
//! mutex as its worker counters, so every admission decision sees a consistent
//! view of both.

use std::collections::VecDeque;

/// FIFO task queue, optionally bounded.
///
/// A capacity of `Some(0)` makes this a hand-off queue: an item is only
/// accepted when an idle worker is waiting to take it.
#[derive(Debug)]
pub struct TaskQueue<T> {
    items: VecDeque<T>,
    capacity: Option<usize>,
}

impl<T> TaskQueue<T> {
    /// Create an unbounded queue.
    #[inline]
    pub fn unbounded() -> Self {
        Self::with_capacity(None)
    }

    /// Create a queue with the given capacity, `None` meaning unbounded.
    pub fn with_capacity(capacity: Option<usize>) -> Self {
        Self {
            items: VecDeque::new(),
            capacity,
        }
    }

    #[inline]
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    #[inline]
    pub fn is_hand_off(&self) -> bool {
        self.capacity == Some(0)
    }

    /// Whether one more item would be accepted while `idle_takers` workers
    /// are waiting for work.
    pub fn has_room(
        &self,
        idle_takers: usize,
    ) -> bool {
        match self.capacity {
            None => true,
            Some(0) => idle_takers > self.items.len(),
            Some(cap) => self.items.len() < cap,
        }
    }

    /// Push to the back if there is room, handing the item back otherwise.
    pub fn offer(
        &mut self,
        item: T,
        idle_takers: usize,
    ) -> Result<(), T> {
        if !self.has_room(idle_takers) {
            return Err(item);
        }
        self.items.push_back(item);
        Ok(())
    }

    /// Pop a task from the front of the queue.
    #[inline]
    pub fn pop_front(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    /// Take back the most recently offered task.
    #[inline]
    pub fn pop_back(&mut self) -> Option<T> {
        self.items.pop_back()
    }

    /// Remove everything, oldest first.
    pub fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
        self.items.drain(..)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T> Default for TaskQueue<T> {
    fn default() -> Self {
        Self::unbounded()
    }
}
