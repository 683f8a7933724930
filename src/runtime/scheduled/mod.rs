//! Delayed and periodic execution.
//!
//! A dedicated timer thread owns a map of entries ordered by fire time. It
//! sleeps until the earliest one is due (or a new earliest one arrives) and
//! hands due entries to an inner [`ThreadPoolExecutor`]. Periodic entries are
//! put back into the map only after their run finishes, so runs of one entry
//! never overlap.

use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, error, trace, warn};

use crate::error::{RejectReason, TaskError, TaskFailure, TaskResult};
use crate::runtime::context;
use crate::runtime::executor::{ExecutorConfig, ExecutorService, ThreadPoolExecutor};
use crate::runtime::future::{Job, JobRef, ResultHandle, TaskCell};
use crate::runtime::lifecycle::{Lifecycle, PoolState};
use crate::runtime::scheduler::{TaskId, TaskState};

static NEXT_SCHEDULER_ID: AtomicUsize = AtomicUsize::new(0);

/// Map key: fire time, then insertion sequence for equal times.
type Key = (Instant, u64);

/// When an entry fires again after a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleMode {
    /// Fire once.
    OneShot,
    /// Fire at `start + k * period`. A late run is followed immediately by the
    /// next one, then the original cadence resumes.
    FixedRate(Duration),
    /// Fire `period` after the previous run finished.
    FixedDelay(Duration),
}

impl ScheduleMode {
    #[inline]
    pub fn period(&self) -> Option<Duration> {
        match self {
            ScheduleMode::OneShot => None,
            ScheduleMode::FixedRate(period) | ScheduleMode::FixedDelay(period) => Some(*period),
        }
    }

    #[inline]
    pub fn is_periodic(&self) -> bool {
        self.period().is_some()
    }
}

/// Scheduled executor configuration.
#[derive(Debug, Clone)]
pub struct ScheduledConfig {
    /// Threads running due entries.
    pub core_threads: usize,
    /// Thread name prefix for the timer and the workers.
    pub thread_name: String,
    /// Whether one-shot entries still fire after a graceful shutdown.
    pub run_delayed_after_shutdown: bool,
}

impl Default for ScheduledConfig {
    fn default() -> Self {
        Self {
            core_threads: 1,
            thread_name: "scheduled".to_string(),
            run_delayed_after_shutdown: true,
        }
    }
}

type Action = Box<dyn FnMut() + Send>;

enum Body {
    Once(JobRef),
    Repeat {
        action: Mutex<Action>,
        cell: Arc<TaskCell<()>>,
    },
}

struct Entry {
    seq: u64,
    mode: ScheduleMode,
    body: Body,
    /// Nominal time of the next firing. Only written under the map lock.
    next_fire: Mutex<Instant>,
    /// Finished runs of a periodic entry.
    fires: AtomicUsize,
}

impl Entry {
    fn task(&self) -> &dyn Job {
        match &self.body {
            Body::Once(job) => job.as_ref(),
            Body::Repeat { cell, .. } => cell.as_ref(),
        }
    }

    #[inline]
    fn is_done(&self) -> bool {
        self.task().state().is_terminal()
    }

    #[inline]
    fn key(&self) -> Key {
        (*self.next_fire.lock(), self.seq)
    }
}

struct TimerShared {
    id: usize,
    config: ScheduledConfig,
    lifecycle: Lifecycle,
    entries: Mutex<BTreeMap<Key, Arc<Entry>>>,
    wakeup: Condvar,
    next_seq: AtomicU64,
    executor: ThreadPoolExecutor,
}

impl TimerShared {
    fn insert_locked(
        &self,
        entries: &mut BTreeMap<Key, Arc<Entry>>,
        entry: Arc<Entry>,
        at: Instant,
    ) {
        *entry.next_fire.lock() = at;
        let key = (at, entry.seq);
        let earliest = entries
            .first_key_value()
            .map(|(first, _)| key < *first)
            .unwrap_or(true);
        entries.insert(key, entry);
        if earliest {
            self.wakeup.notify_one();
        }
    }

    /// Put a periodic entry back after a run, unless it was cancelled or the
    /// scheduler is shutting down.
    fn rearm(
        &self,
        entry: Arc<Entry>,
        at: Instant,
    ) {
        let mut entries = self.entries.lock();
        if entry.is_done() {
            return;
        }
        if self.lifecycle.is_shutdown() {
            entry.task().cancel(false);
            return;
        }
        self.insert_locked(&mut entries, entry, at);
    }

    fn remove(
        &self,
        entry: &Entry,
    ) {
        let mut entries = self.entries.lock();
        let key = entry.key();
        entries.remove(&key);
    }

    /// Hand a due entry to the executor.
    fn fire(
        self: &Arc<Self>,
        entry: Arc<Entry>,
    ) {
        if entry.is_done() {
            return;
        }
        let dispatched = match &entry.body {
            Body::Once(job) => self.executor.dispatch(job.clone()),
            Body::Repeat { .. } => {
                let timer = Arc::downgrade(self);
                let periodic = entry.clone();
                let runner = TaskCell::new(move || run_periodic(timer, periodic));
                self.executor.dispatch(runner)
            },
        };
        if let Err(err) = dispatched {
            warn!(scheduler = self.id, task = %entry.task().id(), "could not dispatch due task: {}", err);
            entry.task().cancel(false);
        }
    }
}

/// One run of a periodic entry, followed by re-arming it.
fn run_periodic(
    timer: Weak<TimerShared>,
    entry: Arc<Entry>,
) {
    let Body::Repeat { action, cell } = &entry.body else {
        return;
    };
    if cell.is_done() {
        return;
    }
    let scope = context::enter_task(cell.clone());
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        let mut guard = action.lock();
        let run: &mut Action = &mut guard;
        run()
    }));
    drop(scope);
    entry.fires.fetch_add(1, Ordering::Relaxed);

    if let Err(payload) = result {
        debug!(task = %cell.task_id(), "periodic task failed, no further runs");
        cell.complete_exceptionally(TaskFailure::from_panic(cell.task_id(), payload));
        return;
    }
    let next = match entry.mode {
        ScheduleMode::FixedRate(period) => entry.next_fire.lock().checked_add(period),
        ScheduleMode::FixedDelay(period) => Instant::now().checked_add(period),
        ScheduleMode::OneShot => return,
    };
    let Some(next) = next else {
        debug!(task = %cell.task_id(), "next firing is out of range, no further runs");
        cell.cancel_task(false);
        return;
    };
    if let Some(timer) = timer.upgrade() {
        timer.rearm(entry.clone(), next);
    }
}

fn timer_main(shared: Arc<TimerShared>) {
    debug!(scheduler = shared.id, "timer started");
    let mut entries = shared.entries.lock();
    loop {
        if shared.lifecycle.is_stopping() {
            break;
        }
        let next = entries.first_key_value().map(|(key, _)| key.0);
        match next {
            None if shared.lifecycle.is_shutdown() => break,
            None => shared.wakeup.wait(&mut entries),
            Some(at) if at > Instant::now() => {
                shared.wakeup.wait_until(&mut entries, at);
            },
            Some(_) => {
                if let Some((_, entry)) = entries.pop_first() {
                    trace!(scheduler = shared.id, task = %entry.task().id(), "firing");
                    MutexGuard::unlocked(&mut entries, || shared.fire(entry));
                }
            },
        }
    }
    let leftovers: Vec<_> = std::mem::take(&mut *entries).into_values().collect();
    drop(entries);
    for entry in leftovers {
        entry.task().cancel(true);
    }

    if shared.lifecycle.is_stopping() {
        shared.executor.shutdown_now();
    } else {
        shared.executor.shutdown();
    }
    shared.executor.await_termination(Duration::MAX);
    shared.lifecycle.mark_terminated();
    debug!(scheduler = shared.id, "terminated");
}

/// Handle to a scheduled entry.
///
/// For a one-shot entry the outcome is the callable's result. A periodic
/// entry never completes normally: its handle ends cancelled, or failed if a
/// run panicked.
pub struct ScheduledHandle<R> {
    result: ResultHandle<R>,
    entry: Arc<Entry>,
    timer: Weak<TimerShared>,
}

impl<R: Send + 'static> ScheduledHandle<R> {
    #[inline]
    pub fn id(&self) -> TaskId {
        self.result.id()
    }

    #[inline]
    pub fn mode(&self) -> ScheduleMode {
        self.entry.mode
    }

    #[inline]
    pub fn state(&self) -> TaskState {
        self.result.state()
    }

    #[inline]
    pub fn is_done(&self) -> bool {
        self.result.is_done()
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.result.is_cancelled()
    }

    /// Time left until the next firing; zero once due or done.
    pub fn delay(&self) -> Duration {
        if self.is_done() {
            return Duration::ZERO;
        }
        self.entry
            .next_fire
            .lock()
            .saturating_duration_since(Instant::now())
    }

    /// Runs that finished so far, whether they returned or panicked.
    pub fn fire_count(&self) -> usize {
        match &self.entry.body {
            Body::Once(job) => match job.state() {
                TaskState::Completed | TaskState::Exceptional => 1,
                _ => 0,
            },
            Body::Repeat { .. } => self.entry.fires.load(Ordering::Relaxed),
        }
    }

    /// Cancel the entry. Before it fires it is removed from the schedule;
    /// during a run only later firings are prevented.
    pub fn cancel(
        &self,
        may_interrupt: bool,
    ) -> bool {
        if may_interrupt {
            self.entry.task().interrupt();
        }
        let cancelled = self.result.cancel(may_interrupt);
        if cancelled {
            if let Some(timer) = self.timer.upgrade() {
                timer.remove(&self.entry);
            }
        }
        cancelled
    }

    pub fn wait(&self) {
        self.result.wait()
    }

    pub fn failure(&self) -> Option<TaskFailure> {
        self.result.failure()
    }
}

impl<R: Clone + Send + 'static> ScheduledHandle<R> {
    pub fn get(&self) -> TaskResult<R> {
        self.result.get()
    }

    pub fn get_timeout(
        &self,
        timeout: Duration,
    ) -> TaskResult<R> {
        self.result.get_timeout(timeout)
    }

    pub fn try_get(&self) -> Option<TaskResult<R>> {
        self.result.try_get()
    }
}

impl<R> fmt::Debug for ScheduledHandle<R> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("ScheduledHandle")
            .field("result", &self.result)
            .field("mode", &self.entry.mode)
            .finish()
    }
}

/// Runs callables after a delay, or periodically.
pub struct ScheduledExecutor {
    shared: Arc<TimerShared>,
}

impl ScheduledExecutor {
    /// Scheduler running due entries on `core_threads` threads.
    pub fn new(core_threads: usize) -> TaskResult<Self> {
        Self::with_config(ScheduledConfig {
            core_threads,
            ..ScheduledConfig::default()
        })
    }

    pub fn with_config(config: ScheduledConfig) -> TaskResult<Self> {
        let id = NEXT_SCHEDULER_ID.fetch_add(1, Ordering::Relaxed);
        let executor = ThreadPoolExecutor::with_config(ExecutorConfig {
            thread_name: format!("{}-{}-worker", config.thread_name, id),
            ..ExecutorConfig::fixed(config.core_threads)
        })?;
        let shared = Arc::new(TimerShared {
            id,
            config,
            lifecycle: Lifecycle::new(),
            entries: Mutex::new(BTreeMap::new()),
            wakeup: Condvar::new(),
            next_seq: AtomicU64::new(0),
            executor,
        });

        let timer_shared = shared.clone();
        thread::Builder::new()
            .name(format!("{}-{}-timer", shared.config.thread_name, id))
            .spawn(move || timer_main(timer_shared))
            .map_err(|err| {
                error!(scheduler = id, "failed to spawn timer thread: {}", err);
                TaskError::from(RejectReason::ThreadSpawn(err.to_string()))
            })?;

        Ok(Self { shared })
    }

    fn enqueue(
        &self,
        mode: ScheduleMode,
        body: Body,
        delay: Duration,
    ) -> TaskResult<Arc<Entry>> {
        if mode.period() == Some(Duration::ZERO) {
            return Err(TaskError::InvalidArgument("period must be greater than zero"));
        }
        let at = Instant::now()
            .checked_add(delay)
            .ok_or(TaskError::InvalidArgument("delay is too large"))?;
        if let Some(period) = mode.period() {
            at.checked_add(period)
                .ok_or(TaskError::InvalidArgument("period is too large"))?;
        }
        let entry = Arc::new(Entry {
            seq: self.shared.next_seq.fetch_add(1, Ordering::Relaxed),
            mode,
            body,
            next_fire: Mutex::new(at),
            fires: AtomicUsize::new(0),
        });
        let mut entries = self.shared.entries.lock();
        if !self.shared.lifecycle.is_accepting() {
            return Err(RejectReason::Shutdown.into());
        }
        self.shared.insert_locked(&mut entries, entry.clone(), at);
        Ok(entry)
    }

    /// Run `f` once after `delay`.
    pub fn schedule<F, R>(
        &self,
        f: F,
        delay: Duration,
    ) -> TaskResult<ScheduledHandle<R>>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let cell = TaskCell::new(f);
        let entry = self.enqueue(ScheduleMode::OneShot, Body::Once(cell.clone()), delay)?;
        Ok(self.handle(cell, entry))
    }

    /// Run `f` first after `initial_delay`, then every `period` measured
    /// between start times.
    pub fn schedule_at_fixed_rate<F>(
        &self,
        f: F,
        initial_delay: Duration,
        period: Duration,
    ) -> TaskResult<ScheduledHandle<()>>
    where
        F: FnMut() + Send + 'static,
    {
        self.schedule_entry(f, initial_delay, ScheduleMode::FixedRate(period))
    }

    /// Run `f` first after `initial_delay`, then `period` after each run ends.
    pub fn schedule_with_fixed_delay<F>(
        &self,
        f: F,
        initial_delay: Duration,
        period: Duration,
    ) -> TaskResult<ScheduledHandle<()>>
    where
        F: FnMut() + Send + 'static,
    {
        self.schedule_entry(f, initial_delay, ScheduleMode::FixedDelay(period))
    }

    /// General form of the schedule calls for repeatable actions.
    pub fn schedule_entry<F>(
        &self,
        mut f: F,
        delay: Duration,
        mode: ScheduleMode,
    ) -> TaskResult<ScheduledHandle<()>>
    where
        F: FnMut() + Send + 'static,
    {
        if mode == ScheduleMode::OneShot {
            return self.schedule(move || f(), delay);
        }
        let cell = TaskCell::new(|| ());
        let body = Body::Repeat {
            action: Mutex::new(Box::new(f)),
            cell: cell.clone(),
        };
        let entry = self.enqueue(mode, body, delay)?;
        Ok(self.handle(cell, entry))
    }

    fn handle<R: Send + 'static>(
        &self,
        cell: Arc<TaskCell<R>>,
        entry: Arc<Entry>,
    ) -> ScheduledHandle<R> {
        ScheduledHandle {
            result: ResultHandle::from_cell(cell),
            entry,
            timer: Arc::downgrade(&self.shared),
        }
    }

    /// Entries waiting for their fire time.
    pub fn scheduled_count(&self) -> usize {
        self.shared.entries.lock().len()
    }

    #[inline]
    pub fn state(&self) -> PoolState {
        self.shared.lifecycle.state()
    }
}

impl ExecutorService for ScheduledExecutor {
    fn submit<F, R>(
        &self,
        f: F,
    ) -> TaskResult<ResultHandle<R>>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.schedule(f, Duration::ZERO).map(|handle| handle.result)
    }

    /// Periodic entries are cancelled. One-shot entries still fire unless
    /// `run_delayed_after_shutdown` is off.
    fn shutdown(&self) {
        let shared = &self.shared;
        let mut entries = shared.entries.lock();
        if shared.lifecycle.advance(PoolState::ShuttingDown) {
            debug!(scheduler = shared.id, "shutting down");
        }
        let keep_delayed = shared.config.run_delayed_after_shutdown;
        entries.retain(|_, entry| {
            let keep = keep_delayed && !entry.mode.is_periodic();
            if !keep {
                entry.task().cancel(false);
            }
            keep
        });
        shared.wakeup.notify_one();
    }

    fn shutdown_now(&self) -> Vec<TaskId> {
        let shared = &self.shared;
        let mut cancelled = Vec::new();
        {
            let mut entries = shared.entries.lock();
            if shared.lifecycle.advance(PoolState::Stopping) {
                debug!(scheduler = shared.id, "stopping");
            }
            for entry in std::mem::take(&mut *entries).into_values() {
                if entry.task().cancel(true) {
                    cancelled.push(entry.task().id());
                }
            }
            shared.wakeup.notify_one();
        }
        cancelled.extend(shared.executor.shutdown_now());
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

impl fmt::Debug for ScheduledExecutor {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("ScheduledExecutor")
            .field("id", &self.shared.id)
            .field("state", &self.state())
            .field("scheduled", &self.scheduled_count())
            .finish()
    }
}

impl Drop for ScheduledExecutor {
    /// Graceful shutdown without blocking: the timer thread keeps running
    /// until the remaining one-shot entries have fired.
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests;
