//! Pool lifecycle flag.
//!
//! The state only ever moves forward: `Running → ShuttingDown → Stopping →
//! Terminated`. Every transition goes through `fetch_max`, so a late graceful
//! shutdown can never undo an immediate one.

use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Lifecycle state of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum PoolState {
    /// Accepting and running tasks.
    Running = 0,
    /// Graceful shutdown: no new submissions, queued work still runs.
    ShuttingDown = 1,
    /// Immediate shutdown: queued work is cancelled, running work interrupted.
    Stopping = 2,
    /// All workers have exited.
    Terminated = 3,
}

impl PoolState {
    /// Convert from u8 (for atomic storage).
    #[inline]
    pub fn from_u8(val: u8) -> Self {
        match val {
            0 => PoolState::Running,
            1 => PoolState::ShuttingDown,
            2 => PoolState::Stopping,
            _ => PoolState::Terminated,
        }
    }

    /// Convert to u8 (for atomic storage).
    #[inline]
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }
}

/// Atomically checked, monotonic lifecycle with a termination latch.
#[derive(Debug)]
pub struct Lifecycle {
    state: AtomicU8,
    lock: Mutex<()>,
    terminated: Condvar,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(PoolState::Running.as_u8()),
            lock: Mutex::new(()),
            terminated: Condvar::new(),
        }
    }

    /// Current state.
    #[inline]
    pub fn state(&self) -> PoolState {
        PoolState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Whether new submissions are accepted.
    #[inline]
    pub fn is_accepting(&self) -> bool {
        self.state() == PoolState::Running
    }

    /// Whether an immediate shutdown has been requested.
    #[inline]
    pub fn is_stopping(&self) -> bool {
        self.state() >= PoolState::Stopping
    }

    #[inline]
    pub fn is_shutdown(&self) -> bool {
        self.state() >= PoolState::ShuttingDown
    }

    #[inline]
    pub fn is_terminated(&self) -> bool {
        self.state() == PoolState::Terminated
    }

    /// Move forward to `to`. Returns `true` if this call changed the state.
    ///
    /// `Terminated` must be reached through [`Lifecycle::mark_terminated`].
    pub fn advance(
        &self,
        to: PoolState,
    ) -> bool {
        debug_assert!(to != PoolState::Terminated);
        let prev = self.state.fetch_max(to.as_u8(), Ordering::AcqRel);
        prev < to.as_u8()
    }

    /// Latch the terminal state and release every `await_termination` caller.
    pub fn mark_terminated(&self) {
        let _guard = self.lock.lock();
        self.state
            .store(PoolState::Terminated.as_u8(), Ordering::Release);
        self.terminated.notify_all();
    }

    /// Block until terminated or `timeout` elapses. A timeout too large to
    /// represent waits forever.
    pub fn await_termination(
        &self,
        timeout: Duration,
    ) -> bool {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            self.wait_terminated();
            return true;
        };
        let mut guard = self.lock.lock();
        while !self.is_terminated() {
            if self
                .terminated
                .wait_until(&mut guard, deadline)
                .timed_out()
            {
                return self.is_terminated();
            }
        }
        true
    }

    /// Block until terminated.
    pub fn wait_terminated(&self) {
        let mut guard = self.lock.lock();
        while !self.is_terminated() {
            self.terminated.wait(&mut guard);
        }
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}
