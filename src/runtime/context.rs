//! Per-thread execution context: the task currently running on this thread
//! and the lifecycle of the pool that owns the thread.
//!
//! This is what makes cancellation cooperative. Task code polls
//! [`interrupted`] and decides itself when to stop.

use std::cell::RefCell;
use std::sync::Arc;

use crate::runtime::future::JobRef;
use crate::runtime::lifecycle::Lifecycle;
use crate::runtime::scheduler::TaskId;

thread_local! {
    static CURRENT_TASKS: RefCell<Vec<JobRef>> = const { RefCell::new(Vec::new()) };
    static POOL_LIFECYCLE: RefCell<Option<Arc<Lifecycle>>> = const { RefCell::new(None) };
}

/// Guard returned by [`enter_task`]; pops the task on drop.
pub(crate) struct TaskScope {
    _not_send: std::marker::PhantomData<*const ()>,
}

impl Drop for TaskScope {
    fn drop(&mut self) {
        CURRENT_TASKS.with(|tasks| {
            tasks.borrow_mut().pop();
        });
    }
}

/// Mark `job` as the innermost task running on this thread.
///
/// Nested entries happen when a worker runs another task while it waits in
/// `join`.
pub(crate) fn enter_task(job: JobRef) -> TaskScope {
    CURRENT_TASKS.with(|tasks| tasks.borrow_mut().push(job));
    TaskScope {
        _not_send: std::marker::PhantomData,
    }
}

/// The innermost task running on this thread.
pub(crate) fn current_job() -> Option<JobRef> {
    CURRENT_TASKS.with(|tasks| tasks.borrow().last().cloned())
}

/// Bind this thread to a pool for the rest of its life.
pub(crate) fn bind_pool(lifecycle: Arc<Lifecycle>) {
    POOL_LIFECYCLE.with(|slot| *slot.borrow_mut() = Some(lifecycle));
}

/// Whether a waiter on this thread could ever be interrupted.
pub(crate) fn has_interrupt_source() -> bool {
    CURRENT_TASKS.with(|tasks| !tasks.borrow().is_empty())
        || POOL_LIFECYCLE.with(|slot| slot.borrow().is_some())
}

/// Id of the task running on the calling thread, if any.
pub fn current_task_id() -> Option<TaskId> {
    current_job().map(|job| job.id())
}

/// Whether the calling task has been asked to stop.
///
/// True when the current task was cancelled with interruption, or when the
/// pool that owns this thread is shutting down immediately. Always false
/// outside of pool threads and tasks.
pub fn interrupted() -> bool {
    let task_flag = CURRENT_TASKS.with(|tasks| {
        tasks
            .borrow()
            .last()
            .map(|job| job.is_interrupted())
            .unwrap_or(false)
    });
    task_flag
        || POOL_LIFECYCLE.with(|slot| {
            slot.borrow()
                .as_ref()
                .map(|lifecycle| lifecycle.is_stopping())
                .unwrap_or(false)
        })
}
