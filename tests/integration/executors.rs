//! Thread-pool and scheduled executors working together.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use taskweave::tasks::SumTask;
use taskweave::{
    ExecutorConfig, ExecutorService, ForkJoinPool, PoolState, RejectionPolicy, ScheduledExecutor,
    TaskError, ThreadPoolExecutor,
};

#[test]
fn test_executor_runs_fork_join_work() {
    let executor = ThreadPoolExecutor::fixed(2).unwrap();
    let pool = Arc::new(ForkJoinPool::with_workers(2).unwrap());
    let handles: Vec<_> = (1..=4)
        .map(|n| {
            let pool = pool.clone();
            executor
                .submit(move || {
                    let data: Arc<[i64]> = (1..=n * 1000).collect::<Vec<_>>().into();
                    pool.invoke(SumTask::new(data).with_threshold(100))
                })
                .unwrap()
        })
        .collect();
    for (n, handle) in (1..=4i64).zip(handles) {
        let m = n * 1000;
        assert_eq!(handle.get().unwrap().unwrap(), m * (m + 1) / 2);
    }
    executor.shutdown();
    assert!(executor.await_termination(Duration::from_secs(5)));
}

#[test]
fn test_bounded_executor_abort_policy() {
    let executor = ThreadPoolExecutor::with_config(ExecutorConfig {
        core_threads: 1,
        max_threads: 1,
        queue_capacity: Some(1),
        rejection: RejectionPolicy::Abort,
        ..ExecutorConfig::default()
    })
    .unwrap();
    let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
    let blocker = executor
        .submit(move || {
            let _ = release_rx.recv();
        })
        .unwrap();
    let queued = executor.submit(|| 1).unwrap();
    let rejected = executor.submit(|| 2);
    assert!(matches!(rejected, Err(TaskError::Rejected(_))));
    release_tx.send(()).unwrap();
    blocker.get().unwrap();
    assert_eq!(queued.get().unwrap(), 1);
    executor.shutdown();
}

#[test]
fn test_scheduler_feeds_executor() {
    let scheduler = ScheduledExecutor::new(1).unwrap();
    let executor = Arc::new(ThreadPoolExecutor::fixed(2).unwrap());
    let done = Arc::new(AtomicUsize::new(0));
    let ticks = {
        let executor = executor.clone();
        let done = done.clone();
        scheduler
            .schedule_at_fixed_rate(
                move || {
                    let done = done.clone();
                    let _ = executor.execute(move || {
                        done.fetch_add(1, Ordering::SeqCst);
                    });
                },
                Duration::ZERO,
                Duration::from_millis(10),
            )
            .unwrap()
    };
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while done.load(Ordering::SeqCst) < 5 && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert!(done.load(Ordering::SeqCst) >= 5);
    assert!(ticks.cancel(false));
    scheduler.shutdown();
    assert!(scheduler.await_termination(Duration::from_secs(5)));
    assert_eq!(scheduler.state(), PoolState::Terminated);
    executor.shutdown();
    assert!(executor.await_termination(Duration::from_secs(5)));
}
