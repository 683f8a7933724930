//! ThreadPoolExecutor tests

use crate::error::{RejectReason, TaskError};
use crate::runtime::context;
use crate::runtime::executor::{
    ExecutorConfig, ExecutorService, RejectionPolicy, ThreadPoolExecutor,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

/// One worker, a queue of `capacity`, and a blocker occupying the worker
/// until the returned sender fires.
fn saturated(
    capacity: usize,
    rejection: RejectionPolicy,
) -> (ThreadPoolExecutor, mpsc::Sender<()>) {
    let pool = ThreadPoolExecutor::with_config(ExecutorConfig {
        queue_capacity: Some(capacity),
        rejection,
        ..ExecutorConfig::single()
    })
    .unwrap();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let (started_tx, started_rx) = mpsc::channel();
    pool.execute(move || {
        started_tx.send(()).unwrap();
        let _ = release_rx.recv_timeout(Duration::from_secs(5));
    })
    .unwrap();
    started_rx.recv().unwrap();
    (pool, release_tx)
}

#[test]
fn test_config_validation() {
    assert!(matches!(
        ThreadPoolExecutor::fixed(0),
        Err(TaskError::InvalidArgument(_))
    ));
    let config = ExecutorConfig {
        core_threads: 4,
        max_threads: 2,
        ..ExecutorConfig::default()
    };
    assert!(ThreadPoolExecutor::with_config(config).is_err());
}

#[test]
fn test_rejection_policy_from_str() {
    assert_eq!("abort".parse(), Ok(RejectionPolicy::Abort));
    assert_eq!("caller_runs".parse(), Ok(RejectionPolicy::CallerRuns));
    assert_eq!("Discard-Oldest".parse(), Ok(RejectionPolicy::DiscardOldest));
    assert!("drop".parse::<RejectionPolicy>().is_err());
}

#[test]
fn test_submit_and_get() {
    let pool = ThreadPoolExecutor::fixed(2).unwrap();
    let handle = pool.submit(|| 6 * 7).unwrap();
    assert_eq!(handle.get(), Ok(42));
    assert!(handle.is_done());
    assert_eq!(pool.pool_size(), 1);
}

#[test]
fn test_fixed_pool_runs_in_parallel() {
    let pool = ThreadPoolExecutor::fixed(4).unwrap();
    let barrier = Arc::new(Barrier::new(4));
    let handles: Vec<_> = (0..4)
        .map(|i| {
            let barrier = barrier.clone();
            pool.submit(move || {
                barrier.wait();
                i
            })
            .unwrap()
        })
        .collect();
    let sum: i32 = handles.iter().map(|h| h.get().unwrap()).sum();
    assert_eq!(sum, 6);
    assert_eq!(pool.largest_pool_size(), 4);
}

#[test]
fn test_single_preserves_submission_order() {
    let pool = ThreadPoolExecutor::single().unwrap();
    let order = Arc::new(Mutex::new(Vec::new()));
    for i in 0..50 {
        let order = order.clone();
        pool.execute(move || order.lock().push(i)).unwrap();
    }
    pool.shutdown();
    assert!(pool.await_termination(Duration::from_secs(5)));
    assert_eq!(*order.lock(), (0..50).collect::<Vec<_>>());
    assert_eq!(pool.completed_count(), 50);
}

#[test]
fn test_failure_does_not_kill_worker() {
    let pool = ThreadPoolExecutor::single().unwrap();
    let bad = pool.submit(|| -> u8 { panic!("broken task") }).unwrap();
    let good = pool.submit(|| 1u8).unwrap();
    let err = bad.get().unwrap_err();
    assert_eq!(err.failure().unwrap().message(), "broken task");
    assert_eq!(err.failure().unwrap().task(), bad.id());
    // Every getter sees the same failure.
    assert_eq!(bad.get(), Err(err));
    assert_eq!(good.get(), Ok(1));
}

#[test]
fn test_get_timeout_leaves_task_running() {
    let pool = ThreadPoolExecutor::single().unwrap();
    let (tx, rx) = mpsc::channel::<()>();
    let handle = pool
        .submit(move || {
            let _ = rx.recv_timeout(Duration::from_secs(5));
            "late"
        })
        .unwrap();
    assert_eq!(
        handle.get_timeout(Duration::from_millis(20)),
        Err(TaskError::Timeout(Duration::from_millis(20)))
    );
    assert!(!handle.is_cancelled());
    tx.send(()).unwrap();
    assert_eq!(handle.get(), Ok("late"));
}

#[test]
fn test_cancel_queued_task() {
    let (pool, release) = saturated(4, RejectionPolicy::Abort);
    let ran = Arc::new(AtomicUsize::new(0));
    let queued = {
        let ran = ran.clone();
        pool.submit(move || ran.fetch_add(1, Ordering::SeqCst)).unwrap()
    };
    assert!(queued.cancel(false));
    release.send(()).unwrap();
    pool.shutdown();
    assert!(pool.await_termination(Duration::from_secs(5)));
    assert_eq!(queued.get(), Err(TaskError::Cancelled));
    assert_eq!(ran.load(Ordering::SeqCst), 0);
}

#[test]
fn test_cancel_running_task_is_cooperative() {
    let pool = ThreadPoolExecutor::single().unwrap();
    let (started_tx, started_rx) = mpsc::channel();
    let observed = Arc::new(AtomicUsize::new(0));
    let handle = {
        let observed = observed.clone();
        pool.submit(move || {
            started_tx.send(()).unwrap();
            while !context::interrupted() {
                thread::sleep(Duration::from_millis(1));
            }
            observed.store(1, Ordering::SeqCst);
        })
        .unwrap()
    };
    started_rx.recv().unwrap();
    assert!(handle.cancel(true));
    assert_eq!(handle.get(), Err(TaskError::Cancelled));
    pool.shutdown();
    assert!(pool.await_termination(Duration::from_secs(5)));
    assert_eq!(observed.load(Ordering::SeqCst), 1);
}

#[test]
fn test_abort_policy_rejects_when_saturated() {
    let (pool, release) = saturated(1, RejectionPolicy::Abort);
    let queued = pool.submit(|| 1).unwrap();
    assert!(matches!(
        pool.submit(|| 2),
        Err(TaskError::Rejected(RejectReason::QueueFull))
    ));
    release.send(()).unwrap();
    assert_eq!(queued.get(), Ok(1));
}

#[test]
fn test_caller_runs_policy_runs_on_submitter() {
    let (pool, release) = saturated(1, RejectionPolicy::CallerRuns);
    let _queued = pool.submit(|| ()).unwrap();
    let caller = thread::current().id();
    let handle = pool.submit(move || thread::current().id() == caller).unwrap();
    // Already done by the time submit returns.
    assert_eq!(handle.try_get(), Some(Ok(true)));
    release.send(()).unwrap();
}

#[test]
fn test_discard_newest_cancels_new_task() {
    let (pool, release) = saturated(1, RejectionPolicy::DiscardNewest);
    let first = pool.submit(|| 1).unwrap();
    let dropped = pool.submit(|| 2).unwrap();
    assert_eq!(dropped.get(), Err(TaskError::Cancelled));
    release.send(()).unwrap();
    assert_eq!(first.get(), Ok(1));
}

#[test]
fn test_discard_oldest_replaces_queued_task() {
    let (pool, release) = saturated(1, RejectionPolicy::DiscardOldest);
    let oldest = pool.submit(|| 1).unwrap();
    let newest = pool.submit(|| 2).unwrap();
    assert_eq!(oldest.get(), Err(TaskError::Cancelled));
    release.send(()).unwrap();
    assert_eq!(newest.get(), Ok(2));
}

#[test]
fn test_cached_pool_grows_and_reaps() {
    let pool = ThreadPoolExecutor::with_config(ExecutorConfig {
        keep_alive: Duration::from_millis(30),
        ..ExecutorConfig::cached(4)
    })
    .unwrap();
    let barrier = Arc::new(Barrier::new(3));
    let handles: Vec<_> = (0..3)
        .map(|_| {
            let barrier = barrier.clone();
            pool.submit(move || {
                barrier.wait();
            })
            .unwrap()
        })
        .collect();
    for handle in &handles {
        handle.get().unwrap();
    }
    assert_eq!(pool.largest_pool_size(), 3);

    let deadline = Instant::now() + Duration::from_secs(5);
    while pool.pool_size() > 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(pool.pool_size(), 0);

    // A reaped pool starts threads again on demand.
    assert_eq!(pool.submit(|| 5).unwrap().get(), Ok(5));
}

#[test]
fn test_shutdown_rejects_and_drains() {
    let pool = ThreadPoolExecutor::fixed(2).unwrap();
    let counter = Arc::new(AtomicUsize::new(0));
    for _ in 0..20 {
        let counter = counter.clone();
        pool.execute(move || {
            thread::sleep(Duration::from_millis(1));
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    }
    pool.shutdown();
    assert!(pool.is_shutdown());
    assert!(matches!(
        pool.execute(|| ()),
        Err(TaskError::Rejected(RejectReason::Shutdown))
    ));
    assert!(pool.await_termination(Duration::from_secs(5)));
    assert_eq!(counter.load(Ordering::SeqCst), 20);
    assert_eq!(pool.pool_size(), 0);
}

#[test]
fn test_shutdown_now_returns_queued_ids() {
    let (pool, release) = saturated(8, RejectionPolicy::Abort);
    let queued: Vec<_> = (0..5).map(|i| pool.submit(move || i).unwrap()).collect();
    let cancelled = pool.shutdown_now();
    assert_eq!(cancelled, queued.iter().map(|h| h.id()).collect::<Vec<_>>());
    for handle in &queued {
        assert_eq!(handle.get(), Err(TaskError::Cancelled));
    }
    // The blocker does not poll `interrupted`; it ends once its sender drops.
    drop(release);
    assert!(pool.await_termination(Duration::from_secs(10)));
}

#[test]
fn test_shutdown_now_interrupts_waiting_task() {
    let pool = ThreadPoolExecutor::fixed(2).unwrap();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let slow = pool
        .submit(move || {
            let _ = release_rx.recv_timeout(Duration::from_secs(5));
        })
        .unwrap();
    let (waiting_tx, waiting_rx) = mpsc::channel();
    let waiter = {
        let slow = slow.clone();
        pool.submit(move || {
            waiting_tx.send(()).unwrap();
            slow.get()
        })
        .unwrap()
    };
    waiting_rx.recv().unwrap();
    thread::sleep(Duration::from_millis(20));

    assert!(pool.shutdown_now().is_empty());
    assert_eq!(waiter.get(), Ok(Err(TaskError::Interrupted)));

    release_tx.send(()).unwrap();
    assert_eq!(slow.get(), Ok(()));
    assert!(pool.await_termination(Duration::from_secs(5)));
}

#[test]
fn test_shutdown_of_idle_pool_terminates_at_once() {
    let pool = ThreadPoolExecutor::cached(2).unwrap();
    pool.shutdown();
    assert!(pool.is_terminated());
    assert!(pool.shutdown_now().is_empty());
}

#[test]
fn test_invoke_all_waits_for_every_task() {
    let pool = ThreadPoolExecutor::fixed(3).unwrap();
    let handles = pool
        .invoke_all((0..10u64).map(|i| {
            move || {
                thread::sleep(Duration::from_millis(i));
                i * i
            }
        }))
        .unwrap();
    assert!(handles.iter().all(|h| h.is_done()));
    let squares: Vec<_> = handles.iter().map(|h| h.get().unwrap()).collect();
    assert_eq!(squares, (0..10).map(|i| i * i).collect::<Vec<_>>());
}

#[test]
fn test_unobserved_failure_reaches_hook() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let pool = {
        let seen = seen.clone();
        ThreadPoolExecutor::with_failure_hook(ExecutorConfig::single(), move |failure| {
            seen.lock().push(failure.message().to_string())
        })
        .unwrap()
    };
    pool.execute(|| panic!("fire and forget")).unwrap();
    pool.shutdown();
    assert!(pool.await_termination(Duration::from_secs(5)));
    drop(pool);
    assert_eq!(*seen.lock(), vec!["fire and forget".to_string()]);
}
