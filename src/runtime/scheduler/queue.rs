//! Work-stealing deques.
//!
//! Each worker owns a [`WorkQueue`]: it pushes and pops at the bottom (LIFO),
//! which keeps freshly split, cache-warm subtasks on the same thread. Other
//! workers hold a [`Thief`] for the same deque and steal from the top (FIFO),
//! which hands them the oldest and usually coarsest chunk of work.
//!
//! Both halves sit on `crossbeam::deque`, a Chase-Lev deque whose steal path is
//! a CAS on the top index. For any slot at most one of {owner pop, thief steal}
//! succeeds. The owner half is `!Sync`, so only the owning thread can ever
//! push or pop.

use crossbeam::deque::{Injector, Steal, Stealer, Worker};

/// How many times a thief retries after losing a race before giving up.
pub const DEFAULT_STEAL_RETRIES: usize = 8;

/// Result of a single steal attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum StealOutcome<T> {
    /// Took the oldest task.
    Success(T),
    /// Nothing to steal.
    Empty,
    /// Lost a race with the owner or another thief.
    Contended,
}

impl<T> StealOutcome<T> {
    /// The stolen task, if any.
    #[inline]
    pub fn success(self) -> Option<T> {
        match self {
            StealOutcome::Success(task) => Some(task),
            _ => None,
        }
    }
}

impl<T> From<Steal<T>> for StealOutcome<T> {
    fn from(steal: Steal<T>) -> Self {
        match steal {
            Steal::Success(task) => StealOutcome::Success(task),
            Steal::Empty => StealOutcome::Empty,
            Steal::Retry => StealOutcome::Contended,
        }
    }
}

/// Owner half of a per-worker deque.
#[derive(Debug)]
pub struct WorkQueue<T> {
    local: Worker<T>,
}

impl<T> WorkQueue<T> {
    /// Create an empty deque.
    #[inline]
    pub fn new() -> Self {
        Self {
            local: Worker::new_lifo(),
        }
    }

    /// Push a task at the bottom. Owner only, O(1).
    #[inline]
    pub fn push_bottom(
        &self,
        task: T,
    ) {
        self.local.push(task);
    }

    /// Pop the most recently pushed task. Owner only.
    #[inline]
    pub fn pop_bottom(&self) -> Option<T> {
        self.local.pop()
    }

    /// A new thief handle for this deque.
    #[inline]
    pub fn thief(&self) -> Thief<T> {
        Thief {
            stealer: self.local.stealer(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.local.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.local.is_empty()
    }

    pub(crate) fn as_worker(&self) -> &Worker<T> {
        &self.local
    }
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Thief half of a per-worker deque. Cheap to clone, usable from any thread.
#[derive(Debug)]
pub struct Thief<T> {
    stealer: Stealer<T>,
}

impl<T> Thief<T> {
    /// One steal attempt at the top of the deque.
    #[inline]
    pub fn try_steal_top(&self) -> StealOutcome<T> {
        self.stealer.steal().into()
    }

    /// Steal the oldest task, retrying up to `retries` times on contention.
    pub fn steal_top_with_retries(
        &self,
        retries: usize,
    ) -> Option<T> {
        for _ in 0..=retries {
            match self.try_steal_top() {
                StealOutcome::Success(task) => return Some(task),
                StealOutcome::Empty => return None,
                StealOutcome::Contended => std::hint::spin_loop(),
            }
        }
        None
    }

    /// Steal the oldest task with the default retry budget.
    #[inline]
    pub fn steal_top(&self) -> Option<T> {
        self.steal_top_with_retries(DEFAULT_STEAL_RETRIES)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.stealer.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.stealer.len()
    }
}

impl<T> Clone for Thief<T> {
    fn clone(&self) -> Self {
        Self {
            stealer: self.stealer.clone(),
        }
    }
}

/// Shared FIFO intake for tasks submitted from outside the pool.
#[derive(Debug)]
pub struct GlobalQueue<T> {
    injector: Injector<T>,
}

impl<T> GlobalQueue<T> {
    pub fn new() -> Self {
        Self {
            injector: Injector::new(),
        }
    }

    #[inline]
    pub fn push(
        &self,
        task: T,
    ) {
        self.injector.push(task);
    }

    /// Take one task, retrying on contention.
    pub fn pop(&self) -> Option<T> {
        loop {
            match self.injector.steal() {
                Steal::Success(task) => return Some(task),
                Steal::Empty => return None,
                Steal::Retry => std::hint::spin_loop(),
            }
        }
    }

    /// Move a batch into `dest` and return one task from it.
    pub fn pop_batch_into(
        &self,
        dest: &WorkQueue<T>,
    ) -> Option<T> {
        loop {
            match self.injector.steal_batch_and_pop(dest.as_worker()) {
                Steal::Success(task) => return Some(task),
                Steal::Empty => return None,
                Steal::Retry => std::hint::spin_loop(),
            }
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.injector.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.injector.len()
    }
}

impl<T> Default for GlobalQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
