//! Completion cells and result handles.
//!
//! Every submitted unit of work, whether it goes through a
//! [`ThreadPoolExecutor`](crate::runtime::executor::ThreadPoolExecutor) or a
//! [`ForkJoinPool`](crate::runtime::scheduler::ForkJoinPool), is backed by a
//! [`TaskCell`]. The cell owns the payload until a worker claims it, and the
//! write-once outcome afterwards.
//!
//! # State machine
//!
//! ```text
//! Pending ──fork──► Forked ──┐
//!    │                      ├──claim──► Running ──► Completed | Exceptional
//!    └──────────────────────┘              │
//!    (Pending | Forked | Running) ──cancel──► Cancelled
//! ```
//!
//! Only the thread that wins the CAS into a terminal state writes the outcome,
//! so the outcome is written exactly once. The outcome mutex is the single
//! synchronization point between the writer and every reader.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use once_cell::sync::OnceCell;
use parking_lot::{Condvar, Mutex, MutexGuard};
use smallvec::SmallVec;
use tracing::{trace, warn};

use crate::error::{TaskError, TaskFailure, TaskResult};
use crate::runtime::context;
use crate::runtime::scheduler::{TaskId, TaskState};

/// Callback invoked for failures nobody observed.
pub type FailureHook = Arc<dyn Fn(&TaskFailure) + Send + Sync>;

/// Slice used when a waiter must also watch its own interrupt flag.
const INTERRUPT_POLL: Duration = Duration::from_millis(5);

/// Type-erased unit of work as stored in every queue of the crate.
pub(crate) trait Job: Send + Sync {
    fn id(&self) -> TaskId;

    fn state(&self) -> TaskState;

    /// Claim and execute. A job that was already claimed or cancelled is a
    /// no-op, which is what makes stale queue entries harmless. Returns
    /// whether the payload actually ran.
    fn run(self: Arc<Self>) -> bool;

    fn cancel(
        &self,
        may_interrupt: bool,
    ) -> bool;

    /// Raise the cooperative interrupt flag without cancelling.
    fn interrupt(&self);

    fn is_interrupted(&self) -> bool;

    /// Record a task forked while this one was running.
    fn adopt_child(
        &self,
        _child: Weak<dyn Job>,
    ) {
    }
}

pub(crate) type JobRef = Arc<dyn Job>;

type Payload<R> = Box<dyn FnOnce() -> R + Send>;

/// Shared state of one task: payload, state, write-once outcome.
pub(crate) struct TaskCell<R> {
    id: TaskId,
    state: AtomicU8,
    payload: Mutex<Option<Payload<R>>>,
    outcome: Mutex<Option<TaskResult<R>>>,
    done: Condvar,
    interrupt: AtomicBool,
    observed: AtomicBool,
    hook: OnceCell<FailureHook>,
    children: Mutex<SmallVec<[Weak<dyn Job>; 4]>>,
}

impl<R: Send + 'static> TaskCell<R> {
    pub(crate) fn new<F>(f: F) -> Arc<Self>
    where
        F: FnOnce() -> R + Send + 'static,
    {
        Arc::new(Self {
            id: TaskId::next(),
            state: AtomicU8::new(TaskState::Pending.as_u8()),
            payload: Mutex::new(Some(Box::new(f))),
            outcome: Mutex::new(None),
            done: Condvar::new(),
            interrupt: AtomicBool::new(false),
            observed: AtomicBool::new(false),
            hook: OnceCell::new(),
            children: Mutex::new(SmallVec::new()),
        })
    }

    #[inline]
    pub(crate) fn task_id(&self) -> TaskId {
        self.id
    }

    #[inline]
    pub(crate) fn load_state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Attach the owning pool's uncaught-failure hook. First hook wins.
    pub(crate) fn set_failure_hook(
        &self,
        hook: Option<&FailureHook>,
    ) {
        if let Some(hook) = hook {
            let _ = self.hook.set(hook.clone());
        }
    }

    /// `Pending → Forked`. Returns `false` if the task was already forked,
    /// started or finished.
    pub(crate) fn mark_forked(&self) -> bool {
        self.transition(TaskState::Pending, TaskState::Forked)
    }

    /// `Pending | Forked → Running`.
    pub(crate) fn claim(&self) -> bool {
        loop {
            let current = self.load_state();
            if !matches!(current, TaskState::Pending | TaskState::Forked) {
                return false;
            }
            if self.transition(current, TaskState::Running) {
                return true;
            }
        }
    }

    fn transition(
        &self,
        from: TaskState,
        to: TaskState,
    ) -> bool {
        self.state
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn publish(
        &self,
        outcome: TaskResult<R>,
    ) {
        let mut slot = self.outcome.lock();
        debug_assert!(slot.is_none(), "outcome written twice");
        *slot = Some(outcome);
        self.done.notify_all();
    }

    /// Execute the payload on the current thread, assuming the claim was won.
    fn execute_claimed(self: &Arc<Self>) {
        let payload = self.payload.lock().take();
        let Some(payload) = payload else {
            return;
        };
        trace!(task = %self.id, "running");
        let scope = context::enter_task(self.clone());
        let result = panic::catch_unwind(AssertUnwindSafe(payload));
        drop(scope);
        let (outcome, next) = match result {
            Ok(value) => (Ok(value), TaskState::Completed),
            Err(panic) => (Err(TaskFailure::from_panic(self.id, panic)), TaskState::Exceptional),
        };
        if self.transition(TaskState::Running, next) {
            self.publish(outcome);
        } else {
            trace!(task = %self.id, "result discarded, task was cancelled while running");
        }
    }

    /// Claim and run inline. Returns `false` if someone else got there first.
    pub(crate) fn try_run_inline(self: &Arc<Self>) -> bool {
        if !self.claim() {
            return false;
        }
        self.execute_claimed();
        true
    }

    pub(crate) fn cancel_task(
        &self,
        may_interrupt: bool,
    ) -> bool {
        loop {
            let current = self.load_state();
            match current {
                TaskState::Pending | TaskState::Forked => {
                    if self.transition(current, TaskState::Cancelled) {
                        self.payload.lock().take();
                        break;
                    }
                },
                TaskState::Running => {
                    if self.transition(current, TaskState::Cancelled) {
                        if may_interrupt {
                            self.interrupt.store(true, Ordering::Release);
                        }
                        break;
                    }
                },
                _ => return false,
            }
        }
        for child in self.children.lock().drain(..) {
            if let Some(child) = child.upgrade() {
                child.cancel(may_interrupt);
            }
        }
        trace!(task = %self.id, "cancelled");
        self.publish(Err(TaskError::Cancelled));
        true
    }

    /// Fail a task from outside its payload. Used by periodic entries, whose
    /// handle outlives every single run.
    pub(crate) fn complete_exceptionally(
        &self,
        error: TaskError,
    ) -> bool {
        loop {
            let current = self.load_state();
            if current.is_terminal() {
                return false;
            }
            if self.transition(current, TaskState::Exceptional) {
                self.payload.lock().take();
                self.publish(Err(error));
                return true;
            }
        }
    }

    #[inline]
    pub(crate) fn is_done(&self) -> bool {
        self.load_state().is_terminal()
    }

    /// Wait for the outcome. `deadline = None` waits forever.
    ///
    /// A waiter that is itself running inside a task also watches its own
    /// interrupt flag and gives up with `Interrupted` when it is raised.
    pub(crate) fn wait_until(
        &self,
        deadline: Option<Instant>,
    ) -> TaskResult<MutexGuard<'_, Option<TaskResult<R>>>> {
        let watch_interrupt = context::has_interrupt_source();
        let mut slot = self.outcome.lock();
        while slot.is_none() {
            if watch_interrupt && context::interrupted() {
                return Err(TaskError::Interrupted);
            }
            let now = Instant::now();
            let step = match deadline {
                Some(deadline) if now >= deadline => {
                    return Err(TaskError::Timeout(Duration::ZERO));
                },
                Some(deadline) if watch_interrupt => (deadline - now).min(INTERRUPT_POLL),
                Some(deadline) => deadline - now,
                None if watch_interrupt => INTERRUPT_POLL,
                None => {
                    self.done.wait(&mut slot);
                    continue;
                },
            };
            self.done.wait_for(&mut slot, step);
        }
        Ok(slot)
    }

    /// Wait, then clone the stored outcome.
    pub(crate) fn outcome(
        &self,
        deadline: Option<Instant>,
    ) -> TaskResult<R>
    where
        R: Clone,
    {
        let slot = self.wait_until(deadline)?;
        self.observed.store(true, Ordering::Relaxed);
        match slot.as_ref() {
            Some(outcome) => outcome.clone(),
            None => Err(TaskError::Cancelled),
        }
    }

    /// Wait, then move the outcome out. Only for callers that hold the sole
    /// reading handle.
    pub(crate) fn take_outcome(&self) -> TaskResult<R> {
        let mut slot = self.wait_until(None)?;
        self.observed.store(true, Ordering::Relaxed);
        slot.take().unwrap_or(Err(TaskError::Cancelled))
    }

    /// Non-blocking read of a finished outcome.
    pub(crate) fn try_outcome(&self) -> Option<TaskResult<R>>
    where
        R: Clone,
    {
        let slot = self.outcome.lock();
        let outcome = slot.as_ref()?.clone();
        self.observed.store(true, Ordering::Relaxed);
        Some(outcome)
    }

    /// Failure without requiring `R: Clone`; used by the unobserved-failure check.
    fn stored_failure(&self) -> Option<TaskFailure> {
        match self.outcome.lock().as_ref() {
            Some(Err(TaskError::Failed(failure))) => Some(failure.clone()),
            _ => None,
        }
    }
}

impl<R: Send + 'static> Job for TaskCell<R> {
    fn id(&self) -> TaskId {
        self.id
    }

    fn state(&self) -> TaskState {
        self.load_state()
    }

    fn run(self: Arc<Self>) -> bool {
        if !self.claim() {
            trace!(task = %self.id, state = ?self.load_state(), "skipping already claimed task");
            return false;
        }
        self.execute_claimed();
        true
    }

    fn cancel(
        &self,
        may_interrupt: bool,
    ) -> bool {
        self.cancel_task(may_interrupt)
    }

    fn interrupt(&self) {
        self.interrupt.store(true, Ordering::Release);
    }

    fn is_interrupted(&self) -> bool {
        self.interrupt.load(Ordering::Acquire)
    }

    fn adopt_child(
        &self,
        child: Weak<dyn Job>,
    ) {
        let mut children = self.children.lock();
        children.retain(|c| c.strong_count() > 0);
        children.push(child);
    }
}

impl<R> Drop for TaskCell<R> {
    fn drop(&mut self) {
        if self.observed.load(Ordering::Relaxed) {
            return;
        }
        let failure = match self.outcome.get_mut().as_ref() {
            Some(Err(TaskError::Failed(failure))) => failure.clone(),
            _ => return,
        };
        match self.hook.get() {
            Some(hook) => hook(&failure),
            None => warn!(task = %failure.task(), "unobserved task failure: {}", failure.message()),
        }
    }
}

impl<R> fmt::Debug for TaskCell<R> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("TaskCell")
            .field("id", &self.id)
            .field("state", &TaskState::from_u8(self.state.load(Ordering::Acquire)))
            .finish()
    }
}

/// Handle to the eventual result of a submitted task.
///
/// Cloning a handle is cheap; every clone observes the same outcome.
pub struct ResultHandle<R> {
    cell: Arc<TaskCell<R>>,
}

impl<R: Send + 'static> ResultHandle<R> {
    pub(crate) fn from_cell(cell: Arc<TaskCell<R>>) -> Self {
        Self { cell }
    }

    /// Identity of the underlying task.
    #[inline]
    pub fn id(&self) -> TaskId {
        self.cell.task_id()
    }

    /// Current task state.
    #[inline]
    pub fn state(&self) -> TaskState {
        self.cell.load_state()
    }

    /// Whether the task reached a terminal state.
    #[inline]
    pub fn is_done(&self) -> bool {
        self.cell.is_done()
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.state() == TaskState::Cancelled
    }

    /// Cancel the task.
    ///
    /// A task that has not started will never run. A running task keeps
    /// running; with `may_interrupt` its interrupt flag is raised so it can
    /// stop early. Returns `false` if the task had already finished.
    pub fn cancel(
        &self,
        may_interrupt: bool,
    ) -> bool {
        self.cell.cancel_task(may_interrupt)
    }

    /// Block until the task is done, without reading the outcome.
    pub fn wait(&self) {
        let _ = self.cell.wait_until(None);
    }

    /// The stored failure, if the task finished with one.
    pub fn failure(&self) -> Option<TaskFailure> {
        let failure = self.cell.stored_failure();
        if failure.is_some() {
            self.cell.observed.store(true, Ordering::Relaxed);
        }
        failure
    }
}

impl<R: Clone + Send + 'static> ResultHandle<R> {
    /// Block until the result or failure is available.
    pub fn get(&self) -> TaskResult<R> {
        self.cell.outcome(None)
    }

    /// Like [`ResultHandle::get`], but give up with `TaskError::Timeout`
    /// after `timeout`. Timing out does not cancel the task. A timeout past
    /// the representable range waits forever.
    pub fn get_timeout(
        &self,
        timeout: Duration,
    ) -> TaskResult<R> {
        match self.cell.outcome(Instant::now().checked_add(timeout)) {
            Err(TaskError::Timeout(_)) => Err(TaskError::Timeout(timeout)),
            other => other,
        }
    }

    /// The outcome if the task is already done.
    pub fn try_get(&self) -> Option<TaskResult<R>> {
        self.cell.try_outcome()
    }
}

impl<R> Clone for ResultHandle<R> {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
        }
    }
}

impl<R> fmt::Debug for ResultHandle<R> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("ResultHandle")
            .field("cell", &self.cell)
            .finish()
    }
}
