//! Managed thread pool for independently submitted tasks.
//!
//! [`ThreadPoolExecutor`] keeps between `core_threads` and `max_threads`
//! workers. Submissions are admitted in this order:
//!
//! 1. reject if the pool no longer accepts work,
//! 2. start a core thread carrying the task,
//! 3. enqueue if the queue has room,
//! 4. start an extra thread carrying the task,
//! 5. apply the [`RejectionPolicy`].
//!
//! Threads above the core size exit after `keep_alive` without work.

pub mod queue;

pub use queue::TaskQueue;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, trace, warn};

use crate::error::{RejectReason, TaskError, TaskFailure, TaskResult};
use crate::runtime::context;
use crate::runtime::future::{FailureHook, JobRef, ResultHandle, TaskCell};
use crate::runtime::lifecycle::{Lifecycle, PoolState};
use crate::runtime::scheduler::TaskId;

static NEXT_EXECUTOR_ID: AtomicUsize = AtomicUsize::new(0);

/// Keep-alive used by [`ExecutorConfig::cached`].
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(60);

/// Common surface of every pool in the crate.
pub trait ExecutorService {
    /// Submit a callable and get a handle to its eventual result.
    fn submit<F, R>(
        &self,
        f: F,
    ) -> TaskResult<ResultHandle<R>>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static;

    /// Submit an action whose result nobody reads. A panic in it goes to the
    /// pool's failure hook.
    fn execute<F>(
        &self,
        f: F,
    ) -> TaskResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit(f).map(drop)
    }

    /// Stop accepting work; queued and running tasks still finish.
    fn shutdown(&self);

    /// Stop accepting work, cancel queued tasks and interrupt running ones.
    /// Returns the ids of the cancelled tasks.
    fn shutdown_now(&self) -> Vec<TaskId>;

    fn is_shutdown(&self) -> bool;

    fn is_terminated(&self) -> bool;

    fn await_termination(
        &self,
        timeout: Duration,
    ) -> bool;

    /// Submit every callable and wait until all of them are done.
    ///
    /// If one submission is refused, the ones already submitted are
    /// cancelled and the refusal is returned.
    fn invoke_all<I, F, R>(
        &self,
        tasks: I,
    ) -> TaskResult<Vec<ResultHandle<R>>>
    where
        I: IntoIterator<Item = F>,
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let mut handles = Vec::new();
        for task in tasks {
            match self.submit(task) {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    for handle in &handles {
                        handle.cancel(true);
                    }
                    return Err(err);
                },
            }
        }
        for handle in &handles {
            handle.wait();
        }
        Ok(handles)
    }
}

/// What to do with a task that finds the queue full and no thread to spare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RejectionPolicy {
    /// Refuse with `TaskError::Rejected(QueueFull)`.
    #[default]
    Abort,
    /// Run the task on the submitting thread.
    #[serde(alias = "caller_runs")]
    CallerRuns,
    /// Cancel the new task.
    #[serde(alias = "discard_newest", alias = "discard")]
    DiscardNewest,
    /// Cancel the oldest queued task and enqueue the new one.
    #[serde(alias = "discard_oldest")]
    DiscardOldest,
}

impl std::str::FromStr for RejectionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "abort" => Ok(RejectionPolicy::Abort),
            "caller-runs" => Ok(RejectionPolicy::CallerRuns),
            "discard-newest" | "discard" => Ok(RejectionPolicy::DiscardNewest),
            "discard-oldest" => Ok(RejectionPolicy::DiscardOldest),
            other => Err(format!("unknown rejection policy: {}", other)),
        }
    }
}

/// Executor configuration.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Threads kept alive even when idle.
    pub core_threads: usize,
    /// Upper bound on live threads.
    pub max_threads: usize,
    /// Idle time after which a thread above the core size exits.
    pub keep_alive: Duration,
    /// `None` is unbounded, `Some(0)` is a hand-off queue.
    pub queue_capacity: Option<usize>,
    pub rejection: RejectionPolicy,
    /// Worker thread name prefix.
    pub thread_name: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        let num_cpus = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self::fixed(num_cpus)
    }
}

impl ExecutorConfig {
    /// `n` threads, unbounded queue.
    pub fn fixed(n: usize) -> Self {
        Self {
            core_threads: n,
            max_threads: n,
            keep_alive: Duration::ZERO,
            queue_capacity: None,
            rejection: RejectionPolicy::Abort,
            thread_name: "pool-worker".to_string(),
        }
    }

    /// No core threads, up to `max_threads` started on demand, hand-off queue.
    pub fn cached(max_threads: usize) -> Self {
        Self {
            core_threads: 0,
            max_threads,
            keep_alive: DEFAULT_KEEP_ALIVE,
            queue_capacity: Some(0),
            ..Self::fixed(max_threads)
        }
    }

    /// One thread; tasks run in submission order.
    pub fn single() -> Self {
        Self::fixed(1)
    }

    fn validate(&self) -> TaskResult<()> {
        if self.max_threads == 0 {
            return Err(TaskError::InvalidArgument("max_threads must be at least 1"));
        }
        if self.core_threads > self.max_threads {
            return Err(TaskError::InvalidArgument("core_threads exceeds max_threads"));
        }
        Ok(())
    }
}

/// Mutable pool state, all under one lock.
struct Inner {
    queue: TaskQueue<JobRef>,
    workers: usize,
    idle: usize,
    largest: usize,
    next_worker: usize,
    handles: Vec<thread::JoinHandle<()>>,
}

pub(crate) struct ExecutorShared {
    id: usize,
    config: ExecutorConfig,
    lifecycle: Arc<Lifecycle>,
    inner: Mutex<Inner>,
    available: Condvar,
    active: AtomicUsize,
    completed: AtomicUsize,
    failure_hook: Option<FailureHook>,
}

impl ExecutorShared {
    /// Start a worker, optionally carrying its first task.
    fn spawn_worker(
        self: &Arc<Self>,
        inner: &mut Inner,
        first: Option<JobRef>,
    ) -> TaskResult<()> {
        let index = inner.next_worker;
        inner.next_worker += 1;
        let shared = self.clone();
        let spawned = thread::Builder::new()
            .name(format!("{}-{}-{}", self.config.thread_name, self.id, index))
            .spawn(move || worker_main(shared, first));

        match spawned {
            Ok(handle) => {
                inner.workers += 1;
                inner.largest = inner.largest.max(inner.workers);
                inner.handles.retain(|h| !h.is_finished());
                inner.handles.push(handle);
                trace!(executor = self.id, worker = index, "worker started");
                Ok(())
            },
            Err(err) => {
                error!(executor = self.id, "failed to spawn worker: {}", err);
                Err(RejectReason::ThreadSpawn(err.to_string()).into())
            },
        }
    }

    fn run_job(
        &self,
        job: JobRef,
    ) {
        if self.lifecycle.is_stopping() {
            job.cancel(true);
            return;
        }
        self.active.fetch_add(1, Ordering::Relaxed);
        if job.run() {
            self.completed.fetch_add(1, Ordering::Relaxed);
        }
        self.active.fetch_sub(1, Ordering::Relaxed);
    }

    /// Block until there is a task for this worker. `None` means the worker
    /// should exit; its slot has already been released.
    fn next_job(&self) -> Option<JobRef> {
        let mut inner = self.inner.lock();
        loop {
            let state = self.lifecycle.state();
            if state >= PoolState::Stopping {
                break;
            }
            if let Some(job) = inner.queue.pop_front() {
                return Some(job);
            }
            if state == PoolState::ShuttingDown {
                break;
            }
            let may_time_out = inner.workers > self.config.core_threads;
            inner.idle += 1;
            let timed_out = if may_time_out {
                self.available
                    .wait_for(&mut inner, self.config.keep_alive)
                    .timed_out()
            } else {
                self.available.wait(&mut inner);
                false
            };
            inner.idle -= 1;
            if timed_out && inner.queue.is_empty() && inner.workers > self.config.core_threads {
                trace!(executor = self.id, "idle worker reaped");
                break;
            }
        }
        inner.workers -= 1;
        self.try_terminate(&mut inner);
        None
    }

    /// Latch termination once shut down with no workers and nothing queued.
    fn try_terminate(
        &self,
        inner: &mut Inner,
    ) {
        if inner.workers > 0 || !self.lifecycle.is_shutdown() || self.lifecycle.is_terminated() {
            return;
        }
        for job in inner.queue.drain() {
            job.cancel(true);
        }
        self.lifecycle.mark_terminated();
        debug!(executor = self.id, "terminated");
    }
}

fn worker_main(
    shared: Arc<ExecutorShared>,
    first: Option<JobRef>,
) {
    context::bind_pool(shared.lifecycle.clone());
    let mut next = first;
    loop {
        let job = match next.take() {
            Some(job) => job,
            None => match shared.next_job() {
                Some(job) => job,
                None => break,
            },
        };
        shared.run_job(job);
    }
}

/// Thread pool with core/max sizing, a configurable queue and a rejection
/// policy.
pub struct ThreadPoolExecutor {
    shared: Arc<ExecutorShared>,
}

impl ThreadPoolExecutor {
    /// `n` threads sharing an unbounded queue.
    pub fn fixed(n: usize) -> TaskResult<Self> {
        Self::with_config(ExecutorConfig::fixed(n))
    }

    /// Threads started on demand up to `max_threads`, reaped after 60s idle.
    pub fn cached(max_threads: usize) -> TaskResult<Self> {
        Self::with_config(ExecutorConfig::cached(max_threads))
    }

    /// One worker; tasks run one at a time in submission order.
    pub fn single() -> TaskResult<Self> {
        Self::with_config(ExecutorConfig::single())
    }

    pub fn with_config(config: ExecutorConfig) -> TaskResult<Self> {
        Self::start(config, None)
    }

    /// Like [`ThreadPoolExecutor::with_config`], with a hook for failures of
    /// tasks whose handles were dropped unobserved.
    pub fn with_failure_hook<F>(
        config: ExecutorConfig,
        hook: F,
    ) -> TaskResult<Self>
    where
        F: Fn(&TaskFailure) + Send + Sync + 'static,
    {
        Self::start(config, Some(Arc::new(hook)))
    }

    fn start(
        config: ExecutorConfig,
        failure_hook: Option<FailureHook>,
    ) -> TaskResult<Self> {
        config.validate()?;
        let shared = Arc::new(ExecutorShared {
            id: NEXT_EXECUTOR_ID.fetch_add(1, Ordering::Relaxed),
            inner: Mutex::new(Inner {
                queue: TaskQueue::with_capacity(config.queue_capacity),
                workers: 0,
                idle: 0,
                largest: 0,
                next_worker: 0,
                handles: Vec::new(),
            }),
            config,
            lifecycle: Arc::new(Lifecycle::new()),
            available: Condvar::new(),
            active: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            failure_hook,
        });
        debug!(
            executor = shared.id,
            core = shared.config.core_threads,
            max = shared.config.max_threads,
            "executor started"
        );
        Ok(Self { shared })
    }

    /// Admit a type-erased job.
    pub(crate) fn dispatch(
        &self,
        job: JobRef,
    ) -> TaskResult<()> {
        let shared = &self.shared;
        let mut inner = shared.inner.lock();
        if !shared.lifecycle.is_accepting() {
            return Err(RejectReason::Shutdown.into());
        }
        if inner.workers < shared.config.core_threads {
            return shared.spawn_worker(&mut inner, Some(job));
        }

        let idle = inner.idle;
        let job = match inner.queue.offer(job, idle) {
            Ok(()) => {
                if inner.workers == 0 {
                    if let Err(err) = shared.spawn_worker(&mut inner, None) {
                        inner.queue.pop_back();
                        return Err(err);
                    }
                }
                shared.available.notify_one();
                return Ok(());
            },
            Err(job) => job,
        };

        if inner.workers < shared.config.max_threads {
            return shared.spawn_worker(&mut inner, Some(job));
        }

        match shared.config.rejection {
            RejectionPolicy::Abort => Err(RejectReason::QueueFull.into()),
            RejectionPolicy::CallerRuns => {
                drop(inner);
                trace!(executor = shared.id, task = %job.id(), "running rejected task on caller");
                job.run();
                Ok(())
            },
            RejectionPolicy::DiscardNewest => {
                job.cancel(false);
                warn!(executor = shared.id, task = %job.id(), "queue saturated, discarded newest task");
                Ok(())
            },
            RejectionPolicy::DiscardOldest => {
                if let Some(oldest) = inner.queue.pop_front() {
                    oldest.cancel(false);
                    warn!(executor = shared.id, task = %oldest.id(), "queue saturated, discarded oldest task");
                }
                if let Err(job) = inner.queue.offer(job, idle) {
                    job.cancel(false);
                    warn!(executor = shared.id, task = %job.id(), "queue saturated, discarded newest task");
                } else {
                    shared.available.notify_one();
                }
                Ok(())
            },
        }
    }

    #[inline]
    pub fn config(&self) -> &ExecutorConfig {
        &self.shared.config
    }

    /// Threads currently running a task.
    #[inline]
    pub fn active_count(&self) -> usize {
        self.shared.active.load(Ordering::Relaxed)
    }

    /// Live worker threads.
    pub fn pool_size(&self) -> usize {
        self.shared.inner.lock().workers
    }

    /// Most threads ever alive at once.
    pub fn largest_pool_size(&self) -> usize {
        self.shared.inner.lock().largest
    }

    pub fn queued_count(&self) -> usize {
        self.shared.inner.lock().queue.len()
    }

    /// Tasks that ran to completion or failure.
    #[inline]
    pub fn completed_count(&self) -> usize {
        self.shared.completed.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn state(&self) -> PoolState {
        self.shared.lifecycle.state()
    }

    /// Whether the calling thread is one of this executor's workers.
    fn is_current_worker(&self) -> bool {
        let me = thread::current().id();
        self.shared
            .inner
            .lock()
            .handles
            .iter()
            .any(|h| h.thread().id() == me)
    }
}

impl ExecutorService for ThreadPoolExecutor {
    fn submit<F, R>(
        &self,
        f: F,
    ) -> TaskResult<ResultHandle<R>>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let cell = TaskCell::new(f);
        cell.set_failure_hook(self.shared.failure_hook.as_ref());
        self.dispatch(cell.clone())?;
        Ok(ResultHandle::from_cell(cell))
    }

    fn shutdown(&self) {
        let mut inner = self.shared.inner.lock();
        if self.shared.lifecycle.advance(PoolState::ShuttingDown) {
            debug!(executor = self.shared.id, "shutting down");
        }
        self.shared.available.notify_all();
        self.shared.try_terminate(&mut inner);
    }

    fn shutdown_now(&self) -> Vec<TaskId> {
        let mut inner = self.shared.inner.lock();
        if self.shared.lifecycle.advance(PoolState::Stopping) {
            debug!(executor = self.shared.id, "stopping");
        }
        let cancelled: Vec<TaskId> = inner
            .queue
            .drain()
            .filter(|job| job.cancel(true))
            .map(|job| job.id())
            .collect();
        self.shared.available.notify_all();
        self.shared.try_terminate(&mut inner);
        cancelled
    }

    fn is_shutdown(&self) -> bool {
        self.shared.lifecycle.is_shutdown()
    }

    fn is_terminated(&self) -> bool {
        self.shared.lifecycle.is_terminated()
    }

    fn await_termination(
        &self,
        timeout: Duration,
    ) -> bool {
        self.shared.lifecycle.await_termination(timeout)
    }
}

impl std::fmt::Debug for ThreadPoolExecutor {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("ThreadPoolExecutor")
            .field("id", &self.shared.id)
            .field("config", &self.shared.config)
            .field("state", &self.state())
            .finish()
    }
}

impl Drop for ThreadPoolExecutor {
    fn drop(&mut self) {
        self.shutdown();
        if self.is_current_worker() {
            return;
        }
        let handles = std::mem::take(&mut self.shared.inner.lock().handles);
        for handle in handles {
            if handle.join().is_err() {
                error!(executor = self.shared.id, "worker thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests;
