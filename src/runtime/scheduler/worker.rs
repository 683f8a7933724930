//! Worker threads of a [`ForkJoinPool`](super::ForkJoinPool).
//!
//! Loop per worker:
//!
//! 1. pop the own deque (LIFO),
//! 2. steal from peers (FIFO, full sweep),
//! 3. take a batch from the global queue,
//! 4. park briefly.
//!
//! A worker that joins an unfinished task does not block: it keeps running
//! other work through the same loop until the awaited task is done.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::runtime::context;
use crate::runtime::future::{JobRef, TaskCell};
use crate::runtime::lifecycle::PoolState;

use super::queue::WorkQueue;
use super::task::TaskState;
use super::work_stealer::WorkStealer;
use super::{ForkJoinPool, PoolShared};

/// How long a joiner that found nothing to help with waits before looking again.
const JOIN_IDLE_WAIT: Duration = Duration::from_micros(200);

thread_local! {
    static WORKER: RefCell<Option<Rc<WorkerThread>>> = const { RefCell::new(None) };
}

/// Observable state of a worker thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    Idle,
    Running,
    Stealing,
    Parked,
    Exited,
}

impl WorkerStatus {
    #[inline]
    pub(crate) fn from_u8(val: u8) -> Self {
        match val {
            0 => WorkerStatus::Idle,
            1 => WorkerStatus::Running,
            2 => WorkerStatus::Stealing,
            3 => WorkerStatus::Parked,
            _ => WorkerStatus::Exited,
        }
    }

    #[inline]
    pub(crate) fn as_u8(&self) -> u8 {
        *self as u8
    }
}

/// Per-thread worker state. Only ever touched by its own thread.
pub(crate) struct WorkerThread {
    index: usize,
    shared: Arc<PoolShared>,
    queue: WorkQueue<JobRef>,
    stealer: RefCell<WorkStealer>,
}

impl WorkerThread {
    pub(crate) fn new(
        index: usize,
        shared: Arc<PoolShared>,
        queue: WorkQueue<JobRef>,
    ) -> Self {
        let stealer = WorkStealer::new(
            index,
            shared.config.steal_strategy,
            shared.config.steal_retries,
        );
        Self {
            index,
            shared,
            queue,
            stealer: RefCell::new(stealer),
        }
    }

    /// The worker bound to the calling thread, if any.
    pub(crate) fn current() -> Option<Rc<WorkerThread>> {
        WORKER.with(|worker| worker.borrow().clone())
    }

    #[inline]
    pub(crate) fn shared(&self) -> &Arc<PoolShared> {
        &self.shared
    }

    fn set_status(
        &self,
        status: WorkerStatus,
    ) {
        if let Some(slot) = self.shared.statuses.get(self.index) {
            slot.store(status.as_u8(), Ordering::Relaxed);
        }
    }

    /// Push a forked task onto this worker's deque.
    pub(crate) fn push(
        &self,
        job: JobRef,
    ) {
        self.shared.job_queued();
        self.queue.push_bottom(job);
        self.shared.stats.record_forked();
        self.shared.sleep.wake_one();
    }

    fn find_work(&self) -> Option<JobRef> {
        if let Some(job) = self.queue.pop_bottom() {
            return Some(job);
        }
        self.set_status(WorkerStatus::Stealing);
        let stolen = self
            .stealer
            .borrow_mut()
            .steal(&self.shared.thieves, &self.shared.steal_stats);
        if let Some(job) = stolen {
            trace!(worker = self.index, task = %job.id(), "stole task");
            return Some(job);
        }
        self.shared.injector.pop_batch_into(&self.queue)
    }

    fn execute(
        &self,
        job: JobRef,
    ) {
        if self.shared.lifecycle.is_stopping() {
            if job.cancel(true) {
                self.shared.stats.record_cancelled();
            }
            self.shared.job_finished();
            return;
        }
        self.set_status(WorkerStatus::Running);
        let start = Instant::now();
        if job.clone().run() {
            self.shared.stats.record_executed(job.state(), start.elapsed());
        }
        self.shared.job_finished();
    }

    /// Main scheduling loop.
    pub(crate) fn run_loop(&self) {
        loop {
            let state = self.shared.lifecycle.state();
            if state >= PoolState::Stopping {
                break;
            }
            if let Some(job) = self.find_work() {
                self.execute(job);
                continue;
            }
            if state == PoolState::ShuttingDown && self.shared.pending() == 0 {
                break;
            }
            self.set_status(WorkerStatus::Parked);
            self.shared.park();
            self.set_status(WorkerStatus::Idle);
        }

        let mut cancelled = 0usize;
        while let Some(job) = self.queue.pop_bottom() {
            if job.cancel(true) {
                cancelled += 1;
                self.shared.stats.record_cancelled();
            }
            self.shared.job_finished();
        }
        if cancelled > 0 {
            debug!(worker = self.index, cancelled, "cancelled queued tasks on exit");
        }
    }

    /// Run other work until `cell` is done.
    fn help_until_done<R: Send + 'static>(
        &self,
        cell: &Arc<TaskCell<R>>,
    ) {
        while !cell.is_done() {
            if self.shared.lifecycle.is_stopping() {
                return;
            }
            match self.find_work() {
                Some(job) => self.execute(job),
                None => {
                    self.set_status(WorkerStatus::Idle);
                    let _ = cell.wait_until(Some(Instant::now() + JOIN_IDLE_WAIT));
                },
            }
        }
    }
}

/// Body of a worker thread.
pub(crate) fn worker_main(
    index: usize,
    shared: Arc<PoolShared>,
    queue: WorkQueue<JobRef>,
) {
    context::bind_pool(shared.lifecycle.clone());
    let worker = Rc::new(WorkerThread::new(index, shared.clone(), queue));
    WORKER.with(|slot| *slot.borrow_mut() = Some(worker.clone()));
    debug!(pool = shared.id, worker = index, "worker started");

    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| worker.run_loop()));
    if outcome.is_err() {
        shared.abort("worker loop panicked outside of any task");
    }

    worker.set_status(WorkerStatus::Exited);
    WORKER.with(|slot| slot.borrow_mut().take());
    debug!(pool = shared.id, worker = index, "worker exited");
    shared.worker_exited();
}

/// Route a freshly forked task: own deque on a worker, common pool otherwise.
pub(crate) fn push_forked<R: Send + 'static>(cell: Arc<TaskCell<R>>) {
    match WorkerThread::current() {
        Some(worker) => {
            cell.set_failure_hook(worker.shared.failure_hook.as_ref());
            worker.push(cell);
        },
        None => {
            let shared = ForkJoinPool::common().shared();
            cell.set_failure_hook(shared.failure_hook.as_ref());
            shared.push_external(cell);
        },
    }
}

/// On a pool worker, make progress on `cell` until it is done: run it inline
/// if nobody claimed it yet, otherwise run other work meanwhile.
///
/// Any other thread leaves a queued task to its pool and the caller does a
/// plain blocking wait. Only a task that was never forked or submitted, and
/// so sits in no queue, is run inline there.
pub(crate) fn help_until_done<R: Send + 'static>(cell: &Arc<TaskCell<R>>) {
    let Some(worker) = WorkerThread::current() else {
        if cell.load_state() == TaskState::Pending {
            cell.try_run_inline();
        }
        return;
    };
    if cell.is_done() || cell.try_run_inline() {
        return;
    }
    worker.help_until_done(cell);
}
