//! Work-stealing fork/join scheduler.
//!
//! [`ForkJoinPool`] owns a fixed set of worker threads. Each worker has its own
//! deque; tasks submitted from outside go through a shared global queue.
//! Subtasks forked while a task runs go onto the executing worker's deque, and
//! idle workers steal from the far end of their peers' deques.
//!
//! See [`task`] for the task authoring contract and [`worker`] for the
//! scheduling loop.

pub mod queue;
pub mod task;
pub mod work_stealer;
pub mod worker;

pub use queue::{GlobalQueue, StealOutcome, Thief, WorkQueue};
pub use task::{invoke_all, invoke_both, ForkJoinTask, RecursiveTask, TaskId, TaskState};
pub use work_stealer::{StealStats, StealStrategy, WorkStealer};
pub use worker::WorkerStatus;

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use once_cell::sync::Lazy;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error};

use crate::error::{RejectReason, TaskError, TaskFailure, TaskResult};
use crate::runtime::executor::ExecutorService;
use crate::runtime::future::{FailureHook, JobRef, ResultHandle, TaskCell};
use crate::runtime::lifecycle::{Lifecycle, PoolState};

use worker::WorkerThread;

static NEXT_POOL_ID: AtomicUsize = AtomicUsize::new(0);

static COMMON: Lazy<ForkJoinPool> = Lazy::new(|| {
    let config = SchedulerConfig {
        thread_name: "taskweave-common".to_string(),
        ..SchedulerConfig::default()
    };
    let mut pool = ForkJoinPool::with_config(config).expect("Failed to start the common fork/join pool");
    pool.common = true;
    pool
});

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Number of worker threads.
    pub num_workers: usize,
    /// How an idle worker picks its first victim.
    pub steal_strategy: StealStrategy,
    /// Retries after losing a steal race, per victim.
    pub steal_retries: usize,
    /// Upper bound on a single park.
    pub idle_timeout: Duration,
    /// Worker thread name prefix.
    pub thread_name: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        let num_cpus = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);

        Self {
            num_workers: num_cpus,
            steal_strategy: StealStrategy::Random,
            steal_retries: queue::DEFAULT_STEAL_RETRIES,
            idle_timeout: Duration::from_millis(10),
            thread_name: "fj-worker".to_string(),
        }
    }
}

/// Scheduler statistics.
#[derive(Debug, Default)]
pub struct SchedulerStats {
    /// Tasks submitted from outside the pool.
    pub tasks_submitted: AtomicUsize,
    /// Tasks forked onto worker deques.
    pub tasks_forked: AtomicUsize,
    /// Tasks that completed normally.
    pub tasks_completed: AtomicUsize,
    /// Tasks whose payload panicked.
    pub tasks_failed: AtomicUsize,
    /// Queued tasks cancelled by the pool.
    pub tasks_cancelled: AtomicUsize,
    /// Times a worker parked.
    pub parks: AtomicUsize,
    /// Total execution time in microseconds.
    pub total_exec_time_us: AtomicUsize,
}

impl SchedulerStats {
    #[inline]
    pub fn record_submitted(&self) {
        self.tasks_submitted.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_forked(&self) {
        self.tasks_forked.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_cancelled(&self) {
        self.tasks_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_park(&self) {
        self.parks.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a task that actually ran, by its final state.
    pub fn record_executed(
        &self,
        state: TaskState,
        elapsed: Duration,
    ) {
        match state {
            TaskState::Completed => self.tasks_completed.fetch_add(1, Ordering::Relaxed),
            TaskState::Exceptional => self.tasks_failed.fetch_add(1, Ordering::Relaxed),
            _ => self.tasks_cancelled.fetch_add(1, Ordering::Relaxed),
        };
        self.total_exec_time_us
            .fetch_add(elapsed.as_micros() as usize, Ordering::Relaxed);
    }
}

/// Point-in-time copy of a pool's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStatsSnapshot {
    pub submitted: usize,
    pub forked: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub steals: usize,
    pub steal_sweeps: usize,
    pub parks: usize,
    pub exec_time: Duration,
}

/// Idle-worker parking lot.
#[derive(Debug, Default)]
pub(crate) struct Sleep {
    lock: Mutex<()>,
    cond: Condvar,
    sleepers: AtomicUsize,
}

impl Sleep {
    /// Park for at most `timeout` unless `has_work` already says otherwise.
    ///
    /// The sleeper count is raised under the lock before the final check, so a
    /// producer that pushes and then sees no sleepers cannot race past a
    /// worker that is about to wait.
    fn park(
        &self,
        timeout: Duration,
        has_work: impl Fn() -> bool,
    ) {
        let mut guard = self.lock.lock();
        self.sleepers.fetch_add(1, Ordering::SeqCst);
        if !has_work() {
            self.cond.wait_for(&mut guard, timeout);
        }
        self.sleepers.fetch_sub(1, Ordering::SeqCst);
    }

    pub(crate) fn wake_one(&self) {
        if self.sleepers.load(Ordering::SeqCst) > 0 {
            let _guard = self.lock.lock();
            self.cond.notify_one();
        }
    }

    pub(crate) fn wake_all(&self) {
        let _guard = self.lock.lock();
        self.cond.notify_all();
    }
}

/// State shared by the pool handle and all of its workers.
pub(crate) struct PoolShared {
    pub(crate) id: usize,
    pub(crate) config: SchedulerConfig,
    pub(crate) lifecycle: Arc<Lifecycle>,
    pub(crate) injector: GlobalQueue<JobRef>,
    pub(crate) thieves: Vec<Thief<JobRef>>,
    pub(crate) statuses: Vec<AtomicU8>,
    pub(crate) sleep: Sleep,
    pub(crate) stats: SchedulerStats,
    pub(crate) steal_stats: StealStats,
    pub(crate) failure_hook: Option<FailureHook>,
    /// Queue entries not yet processed, including the ones running now.
    pending: AtomicUsize,
    live_workers: AtomicUsize,
}

impl PoolShared {
    #[inline]
    pub(crate) fn job_queued(&self) {
        self.pending.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn job_finished(&self) {
        let prev = self.pending.fetch_sub(1, Ordering::SeqCst);
        if prev == 1 && self.lifecycle.state() == PoolState::ShuttingDown {
            self.sleep.wake_all();
        }
    }

    #[inline]
    pub(crate) fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub(crate) fn push_external(
        &self,
        job: JobRef,
    ) {
        self.job_queued();
        self.injector.push(job);
        self.stats.record_submitted();
        self.sleep.wake_one();
        if !self.lifecycle.is_accepting() {
            self.reap_orphans();
        }
    }

    /// Whether a worker about to park should look again instead: there is
    /// queued work, or the pool wants its workers to exit.
    fn has_visible_work(&self) -> bool {
        let state = self.lifecycle.state();
        state >= PoolState::Stopping
            || (state == PoolState::ShuttingDown && self.pending() == 0)
            || !self.injector.is_empty()
            || self.thieves.iter().any(|thief| !thief.is_empty())
    }

    pub(crate) fn park(&self) {
        self.stats.record_park();
        self.sleep
            .park(self.config.idle_timeout, || self.has_visible_work());
    }

    /// Cancel everything in the global queue.
    fn drain_injector(
        &self,
        cancelled: &mut Vec<TaskId>,
    ) {
        while let Some(job) = self.injector.pop() {
            if job.cancel(true) {
                cancelled.push(job.id());
                self.stats.record_cancelled();
            }
            self.job_finished();
        }
    }

    /// Tasks pushed after the last worker left would never run.
    fn reap_orphans(&self) {
        if self.lifecycle.is_stopping() || self.live_workers.load(Ordering::SeqCst) == 0 {
            let mut cancelled = Vec::new();
            self.drain_injector(&mut cancelled);
        }
    }

    /// Immediate shutdown: cancel every queued task, interrupt running ones.
    pub(crate) fn stop(&self) -> Vec<TaskId> {
        if self.lifecycle.advance(PoolState::Stopping) {
            debug!(pool = self.id, "stopping");
        }
        let mut cancelled = Vec::new();
        self.drain_injector(&mut cancelled);
        for thief in &self.thieves {
            while let Some(job) = thief.steal_top() {
                if job.cancel(true) {
                    cancelled.push(job.id());
                    self.stats.record_cancelled();
                }
                self.job_finished();
            }
        }
        self.sleep.wake_all();
        cancelled
    }

    /// A failure outside of any task leaves the pool in an unknown state.
    pub(crate) fn abort(
        &self,
        reason: &str,
    ) {
        error!(pool = self.id, "{}; shutting the pool down", reason);
        self.stop();
    }

    pub(crate) fn worker_exited(&self) {
        if self.live_workers.fetch_sub(1, Ordering::SeqCst) == 1 {
            let mut cancelled = Vec::new();
            self.drain_injector(&mut cancelled);
            self.lifecycle.mark_terminated();
            debug!(pool = self.id, "terminated");
        }
    }

    fn snapshot(&self) -> PoolStatsSnapshot {
        PoolStatsSnapshot {
            submitted: self.stats.tasks_submitted.load(Ordering::Relaxed),
            forked: self.stats.tasks_forked.load(Ordering::Relaxed),
            completed: self.stats.tasks_completed.load(Ordering::Relaxed),
            failed: self.stats.tasks_failed.load(Ordering::Relaxed),
            cancelled: self.stats.tasks_cancelled.load(Ordering::Relaxed),
            steals: self.steal_stats.steal_successes.load(Ordering::Relaxed),
            steal_sweeps: self.steal_stats.total_attempts.load(Ordering::Relaxed),
            parks: self.stats.parks.load(Ordering::Relaxed),
            exec_time: Duration::from_micros(
                self.stats.total_exec_time_us.load(Ordering::Relaxed) as u64,
            ),
        }
    }
}

/// Builder for [`ForkJoinPool`].
#[derive(Default)]
pub struct ForkJoinPoolBuilder {
    config: SchedulerConfig,
    failure_hook: Option<FailureHook>,
}

impl ForkJoinPoolBuilder {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(
        mut self,
        config: SchedulerConfig,
    ) -> Self {
        self.config = config;
        self
    }

    pub fn workers(
        mut self,
        n: usize,
    ) -> Self {
        self.config.num_workers = n;
        self
    }

    pub fn steal_strategy(
        mut self,
        strategy: StealStrategy,
    ) -> Self {
        self.config.steal_strategy = strategy;
        self
    }

    pub fn idle_timeout(
        mut self,
        timeout: Duration,
    ) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    pub fn thread_name(
        mut self,
        name: impl Into<String>,
    ) -> Self {
        self.config.thread_name = name.into();
        self
    }

    /// Called with failures of tasks whose handles were dropped unobserved.
    pub fn failure_hook<F>(
        mut self,
        hook: F,
    ) -> Self
    where
        F: Fn(&TaskFailure) + Send + Sync + 'static,
    {
        self.failure_hook = Some(Arc::new(hook));
        self
    }

    pub fn build(self) -> TaskResult<ForkJoinPool> {
        ForkJoinPool::start(self.config, self.failure_hook)
    }
}

/// Work-stealing pool for divide-and-conquer tasks.
pub struct ForkJoinPool {
    shared: Arc<PoolShared>,
    threads: Mutex<Vec<thread::JoinHandle<()>>>,
    common: bool,
}

impl ForkJoinPool {
    /// Pool with one worker per available CPU.
    pub fn new() -> TaskResult<Self> {
        Self::with_config(SchedulerConfig::default())
    }

    pub fn with_workers(num_workers: usize) -> TaskResult<Self> {
        Self::builder().workers(num_workers).build()
    }

    pub fn with_config(config: SchedulerConfig) -> TaskResult<Self> {
        Self::start(config, None)
    }

    #[inline]
    pub fn builder() -> ForkJoinPoolBuilder {
        ForkJoinPoolBuilder::new()
    }

    /// The process-wide pool used by `fork` outside of any pool. It is
    /// started on first use and ignores shutdown requests.
    pub fn common() -> &'static ForkJoinPool {
        &COMMON
    }

    fn start(
        config: SchedulerConfig,
        failure_hook: Option<FailureHook>,
    ) -> TaskResult<Self> {
        if config.num_workers == 0 {
            return Err(TaskError::InvalidArgument("a fork/join pool needs at least one worker"));
        }
        let num_workers = config.num_workers;
        let queues: Vec<WorkQueue<JobRef>> = (0..num_workers).map(|_| WorkQueue::new()).collect();
        let thieves = queues.iter().map(WorkQueue::thief).collect();

        let shared = Arc::new(PoolShared {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            config,
            lifecycle: Arc::new(Lifecycle::new()),
            injector: GlobalQueue::new(),
            thieves,
            statuses: (0..num_workers)
                .map(|_| AtomicU8::new(WorkerStatus::Idle.as_u8()))
                .collect(),
            sleep: Sleep::default(),
            stats: SchedulerStats::default(),
            steal_stats: StealStats::default(),
            failure_hook,
            pending: AtomicUsize::new(0),
            live_workers: AtomicUsize::new(num_workers),
        });

        let threads = Self::spawn_workers(&shared, queues)?;
        debug!(pool = shared.id, workers = num_workers, "fork/join pool started");

        Ok(Self {
            shared,
            threads: Mutex::new(threads),
            common: false,
        })
    }

    /// Spawn worker threads.
    fn spawn_workers(
        shared: &Arc<PoolShared>,
        queues: Vec<WorkQueue<JobRef>>,
    ) -> TaskResult<Vec<thread::JoinHandle<()>>> {
        let total = queues.len();
        let mut workers = Vec::with_capacity(total);

        for (worker_id, queue) in queues.into_iter().enumerate() {
            let worker_shared = shared.clone();
            let spawned = thread::Builder::new()
                .name(format!("{}-{}-{}", shared.config.thread_name, shared.id, worker_id))
                .spawn(move || worker::worker_main(worker_id, worker_shared, queue));

            match spawned {
                Ok(handle) => workers.push(handle),
                Err(err) => {
                    error!(pool = shared.id, worker = worker_id, "failed to spawn worker: {}", err);
                    // Workers that never started will never report their exit.
                    let missing = total - worker_id;
                    let before = shared.live_workers.fetch_sub(missing, Ordering::SeqCst);
                    shared.stop();
                    if before == missing {
                        shared.lifecycle.mark_terminated();
                    }
                    for handle in workers {
                        let _ = handle.join();
                    }
                    return Err(RejectReason::ThreadSpawn(err.to_string()).into());
                },
            }
        }

        Ok(workers)
    }

    pub(crate) fn shared(&self) -> &Arc<PoolShared> {
        &self.shared
    }

    /// Whether the calling thread is one of this pool's workers.
    pub fn is_current_worker(&self) -> bool {
        WorkerThread::current()
            .map(|worker| Arc::ptr_eq(worker.shared(), &self.shared))
            .unwrap_or(false)
    }

    fn push_task<R: Send + 'static>(
        &self,
        cell: &Arc<TaskCell<R>>,
    ) -> TaskResult<()> {
        if !self.shared.lifecycle.is_accepting() {
            return Err(RejectReason::Shutdown.into());
        }
        if !cell.mark_forked() {
            return Err(TaskError::InvalidArgument("task was already forked or started"));
        }
        cell.set_failure_hook(self.shared.failure_hook.as_ref());
        self.shared.push_external(cell.clone());
        Ok(())
    }

    /// Run `task` to completion and return its result.
    ///
    /// From one of this pool's workers the task runs inline; from any other
    /// thread it is submitted and the caller blocks.
    pub fn invoke<T: RecursiveTask>(
        &self,
        task: T,
    ) -> TaskResult<T::Output> {
        let task = ForkJoinTask::new(task);
        if self.is_current_worker() {
            task.cell().try_run_inline();
            return task.try_join_owned();
        }
        self.push_task(task.cell())?;
        task.cell().take_outcome()
    }

    /// Closure form of [`ForkJoinPool::invoke`].
    pub fn invoke_fn<F, R>(
        &self,
        f: F,
    ) -> TaskResult<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        struct FnTask<F>(F);

        impl<F, R> RecursiveTask for FnTask<F>
        where
            F: FnOnce() -> R + Send + 'static,
            R: Send + 'static,
        {
            type Output = R;

            fn compute(self) -> R {
                (self.0)()
            }
        }

        self.invoke(FnTask(f))
    }

    /// Submit without waiting.
    pub fn submit_task<T: RecursiveTask>(
        &self,
        task: T,
    ) -> TaskResult<ForkJoinTask<T::Output>> {
        let task = ForkJoinTask::new(task);
        self.push_task(task.cell())?;
        Ok(task)
    }

    /// Number of worker threads.
    #[inline]
    pub fn parallelism(&self) -> usize {
        self.shared.config.num_workers
    }

    /// Tasks submitted from outside and not yet picked up.
    #[inline]
    pub fn queued_submissions(&self) -> usize {
        self.shared.injector.len()
    }

    /// Queue entries not yet processed, including running tasks.
    #[inline]
    pub fn pending_tasks(&self) -> usize {
        self.shared.pending()
    }

    pub fn worker_statuses(&self) -> Vec<WorkerStatus> {
        self.shared
            .statuses
            .iter()
            .map(|s| WorkerStatus::from_u8(s.load(Ordering::Relaxed)))
            .collect()
    }

    #[inline]
    pub fn state(&self) -> PoolState {
        self.shared.lifecycle.state()
    }

    pub fn stats(&self) -> PoolStatsSnapshot {
        self.shared.snapshot()
    }

    /// Graceful shutdown: reject new submissions, finish everything queued.
    pub fn shutdown(&self) {
        if self.common {
            debug!("shutdown of the common pool ignored");
            return;
        }
        if self.shared.lifecycle.advance(PoolState::ShuttingDown) {
            debug!(pool = self.shared.id, "shutting down");
        }
        self.shared.sleep.wake_all();
    }

    /// Immediate shutdown. Returns the ids of queued tasks that were
    /// cancelled before they started.
    pub fn shutdown_now(&self) -> Vec<TaskId> {
        if self.common {
            debug!("shutdown of the common pool ignored");
            return Vec::new();
        }
        self.shared.stop()
    }

    #[inline]
    pub fn is_shutdown(&self) -> bool {
        self.shared.lifecycle.is_shutdown()
    }

    #[inline]
    pub fn is_terminated(&self) -> bool {
        self.shared.lifecycle.is_terminated()
    }

    pub fn await_termination(
        &self,
        timeout: Duration,
    ) -> bool {
        self.shared.lifecycle.await_termination(timeout)
    }
}

impl ExecutorService for ForkJoinPool {
    fn submit<F, R>(
        &self,
        f: F,
    ) -> TaskResult<ResultHandle<R>>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let cell = TaskCell::new(f);
        self.push_task(&cell)?;
        Ok(ResultHandle::from_cell(cell))
    }

    fn shutdown(&self) {
        ForkJoinPool::shutdown(self)
    }

    fn shutdown_now(&self) -> Vec<TaskId> {
        ForkJoinPool::shutdown_now(self)
    }

    fn is_shutdown(&self) -> bool {
        ForkJoinPool::is_shutdown(self)
    }

    fn is_terminated(&self) -> bool {
        ForkJoinPool::is_terminated(self)
    }

    fn await_termination(
        &self,
        timeout: Duration,
    ) -> bool {
        ForkJoinPool::await_termination(self, timeout)
    }
}

impl std::fmt::Debug for ForkJoinPool {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("ForkJoinPool")
            .field("id", &self.shared.id)
            .field("workers", &self.shared.config.num_workers)
            .field("state", &self.state())
            .finish()
    }
}

impl Drop for ForkJoinPool {
    fn drop(&mut self) {
        self.shutdown();
        if self.is_current_worker() {
            return;
        }
        for worker in self.threads.get_mut().drain(..) {
            if worker.join().is_err() {
                error!(pool = self.shared.id, "worker thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests;
