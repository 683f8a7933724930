//! Task definitions for the fork/join scheduler.
//!
//! Client code implements [`RecursiveTask`]: a single `compute` method that
//! either solves a small problem directly or splits it, forks some halves and
//! combines their results. [`ForkJoinTask`] is the handle that carries the
//! fork/join protocol.
//!
//! ```no_run
//! use taskweave::{ForkJoinPool, ForkJoinTask, RecursiveTask};
//!
//! struct Fib(u64);
//!
//! impl RecursiveTask for Fib {
//!     type Output = u64;
//!
//!     fn compute(self) -> u64 {
//!         if self.0 < 2 {
//!             return self.0;
//!         }
//!         let left = ForkJoinTask::new(Fib(self.0 - 1));
//!         left.fork();
//!         let right = Fib(self.0 - 2).compute();
//!         left.join() + right
//!     }
//! }
//!
//! let pool = ForkJoinPool::with_workers(4).unwrap();
//! assert_eq!(pool.invoke(Fib(20)).unwrap(), 6765);
//! ```

use std::fmt;
use std::panic;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use crate::error::{TaskError, TaskResult};
use crate::runtime::context;
use crate::runtime::future::{Job, TaskCell};

use super::worker;

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Unique task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl TaskId {
    /// Allocate a fresh process-wide id.
    #[inline]
    pub fn next() -> Self {
        Self(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the inner value.
    #[inline]
    pub fn inner(&self) -> u64 {
        self.0
    }
}

impl From<u64> for TaskId {
    fn from(val: u64) -> Self {
        Self(val)
    }
}

impl fmt::Display for TaskId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "Task({})", self.0)
    }
}

/// Task state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Created, not yet queued or forked.
    Pending,
    /// Pushed onto a worker deque or the global queue.
    Forked,
    /// Task is currently executing.
    Running,
    /// Task has completed successfully.
    Completed,
    /// Task payload panicked.
    Exceptional,
    /// Task was cancelled.
    Cancelled,
}

impl TaskState {
    /// Convert from u8 (for atomic storage).
    #[inline]
    pub fn from_u8(val: u8) -> Self {
        match val {
            0 => TaskState::Pending,
            1 => TaskState::Forked,
            2 => TaskState::Running,
            3 => TaskState::Completed,
            4 => TaskState::Exceptional,
            _ => TaskState::Cancelled,
        }
    }

    /// Convert to u8 (for atomic storage).
    #[inline]
    pub fn as_u8(&self) -> u8 {
        match self {
            TaskState::Pending => 0,
            TaskState::Forked => 1,
            TaskState::Running => 2,
            TaskState::Completed => 3,
            TaskState::Exceptional => 4,
            TaskState::Cancelled => 5,
        }
    }

    /// Whether the outcome is final.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Exceptional | TaskState::Cancelled
        )
    }
}

/// A divide-and-conquer computation.
///
/// `compute` either solves the problem directly or splits it into subtasks.
/// A resultless action uses `Output = ()`.
pub trait RecursiveTask: Send + 'static {
    type Output: Send + 'static;

    fn compute(self) -> Self::Output;
}

/// Handle to a task taking part in the fork/join protocol.
///
/// Not `Clone`: the handle is the single reader of the task's result, which
/// lets [`ForkJoinTask::join_owned`] move the result out without copying.
pub struct ForkJoinTask<R> {
    cell: Arc<TaskCell<R>>,
}

impl<R: Send + 'static> ForkJoinTask<R> {
    /// Wrap a [`RecursiveTask`].
    pub fn new<T>(task: T) -> Self
    where
        T: RecursiveTask<Output = R>,
    {
        Self::from_fn(move || task.compute())
    }

    /// Wrap a closure.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: FnOnce() -> R + Send + 'static,
    {
        Self {
            cell: TaskCell::new(f),
        }
    }

    pub(crate) fn cell(&self) -> &Arc<TaskCell<R>> {
        &self.cell
    }

    #[inline]
    pub fn id(&self) -> TaskId {
        self.cell.task_id()
    }

    #[inline]
    pub fn state(&self) -> TaskState {
        self.cell.load_state()
    }

    #[inline]
    pub fn is_done(&self) -> bool {
        self.cell.is_done()
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.state() == TaskState::Cancelled
    }

    /// Schedule this task for asynchronous execution and return immediately.
    ///
    /// On a pool worker the task goes onto that worker's own deque, where the
    /// worker itself picks it up next unless a thief takes it first. From any
    /// other thread it goes to the common pool. Forking a task that was
    /// already forked or started does nothing.
    pub fn fork(&self) -> &Self {
        if !self.cell.mark_forked() {
            return self;
        }
        if let Some(parent) = context::current_job() {
            let weak = Arc::downgrade(&self.cell);
            let child: Weak<dyn Job> = weak;
            parent.adopt_child(child);
        }
        worker::push_forked(self.cell.clone());
        self
    }

    /// Wait for completion, helping with other work when called from a pool
    /// worker, and report the outcome without panicking.
    pub fn try_join(&self) -> TaskResult<R>
    where
        R: Clone,
    {
        worker::help_until_done(&self.cell);
        self.cell.outcome(None)
    }

    /// Wait for completion and return the result.
    ///
    /// A failure is re-raised as a panic carrying the original [`TaskError`].
    /// Inside an enclosing task this fails that task in turn, keeping the id of
    /// the task where the failure started. Joining twice returns the same
    /// value both times.
    pub fn join(&self) -> R
    where
        R: Clone,
    {
        match self.try_join() {
            Ok(value) => value,
            Err(err) => panic::resume_unwind(Box::new(err)),
        }
    }

    /// Like [`ForkJoinTask::try_join`], moving the result out of the task.
    pub fn try_join_owned(self) -> TaskResult<R> {
        worker::help_until_done(&self.cell);
        self.cell.take_outcome()
    }

    /// Like [`ForkJoinTask::join`], moving the result out of the task.
    pub fn join_owned(self) -> R {
        match self.try_join_owned() {
            Ok(value) => value,
            Err(err) => panic::resume_unwind(Box::new(err)),
        }
    }

    /// Run the task on the current thread if nobody has started it, then join.
    pub fn invoke(self) -> R {
        self.cell.try_run_inline();
        self.join_owned()
    }

    /// Block without helping, like a plain future.
    pub fn get(&self) -> TaskResult<R>
    where
        R: Clone,
    {
        self.cell.outcome(None)
    }

    /// Block without helping for at most `timeout`. Timing out does not
    /// cancel the task.
    pub fn get_timeout(
        &self,
        timeout: Duration,
    ) -> TaskResult<R>
    where
        R: Clone,
    {
        match self.cell.outcome(Instant::now().checked_add(timeout)) {
            Err(TaskError::Timeout(_)) => Err(TaskError::Timeout(timeout)),
            other => other,
        }
    }

    /// Cancel the task and, recursively, the tasks it forked.
    pub fn cancel(
        &self,
        may_interrupt: bool,
    ) -> bool {
        self.cell.cancel_task(may_interrupt)
    }
}

impl<R> fmt::Debug for ForkJoinTask<R> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("ForkJoinTask")
            .field("cell", &self.cell)
            .finish()
    }
}

/// Fork every task but the last, run the last one inline, then join them all
/// in order.
pub fn invoke_all<R: Send + 'static>(tasks: Vec<ForkJoinTask<R>>) -> Vec<R> {
    if let Some((last, rest)) = tasks.split_last() {
        for task in rest {
            task.fork();
        }
        last.cell.try_run_inline();
    }
    tasks
        .into_iter()
        .map(ForkJoinTask::join_owned)
        .collect()
}

/// Fork `a`, run `b` inline, join both.
pub fn invoke_both<A, B>(
    a: ForkJoinTask<A>,
    b: ForkJoinTask<B>,
) -> (A, B)
where
    A: Send + 'static,
    B: Send + 'static,
{
    a.fork();
    let b = b.invoke();
    (a.join_owned(), b)
}
