//! Fork/join pool driven through the bundled tasks.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use taskweave::tasks::{IncrementTask, Matrix, MaxTask, MergeSortTask, SumTask};
use taskweave::{ForkJoinPool, ForkJoinTask, PoolState, StealStrategy, TaskError};

#[test]
fn test_one_pool_many_workloads() {
    let pool = ForkJoinPool::with_workers(4).unwrap();
    let data: Arc<[i64]> = (0..100_000).map(|i| i % 977 - 488).collect::<Vec<_>>().into();
    let expected: i64 = data.iter().sum();

    assert_eq!(
        pool.invoke(SumTask::new(data.clone()).with_threshold(500))
            .unwrap(),
        expected
    );
    assert_eq!(
        pool.invoke(MaxTask::new(data.clone()).with_threshold(500))
            .unwrap(),
        Some(488)
    );

    let mut expected_sorted = data.to_vec();
    expected_sorted.sort();
    let sorted = pool
        .invoke(MergeSortTask::new(data.to_vec()).with_threshold(500))
        .unwrap();
    assert_eq!(sorted, expected_sorted);

    let stats = pool.stats();
    assert_eq!(stats.submitted, 3);
    assert!(stats.forked > 0);
    assert_eq!(stats.failed, 0);

    pool.shutdown();
    assert!(pool.await_termination(Duration::from_secs(5)));
    assert_eq!(pool.state(), PoolState::Terminated);
}

#[test]
fn test_random_strategy_increment() {
    let pool = ForkJoinPool::builder()
        .workers(3)
        .steal_strategy(StealStrategy::Random)
        .build()
        .unwrap();
    let cells = IncrementTask::atomics(std::iter::repeat(10).take(10_000));
    pool.invoke(IncrementTask::new(cells.clone(), -4).with_threshold(64))
        .unwrap();
    assert!(cells.iter().all(|c| c.load(Ordering::Relaxed) == 6));
}

#[test]
fn test_matmul_on_common_pool() {
    let a = Arc::new(Matrix::from_fn(24, 24, |r, c| (r as f64) - (c as f64)));
    let b = Arc::new(Matrix::identity(24));
    let product = Matrix::par_multiply(a.clone(), b, ForkJoinPool::common(), 2).unwrap();
    assert_eq!(product, *a);
}

#[test]
fn test_fork_outside_pool_uses_common_pool() {
    let task = ForkJoinTask::new(SumTask::new(vec![1, 2, 3, 4].into()));
    task.fork();
    assert_eq!(task.join_owned(), 10);
}

#[test]
fn test_submit_after_shutdown_rejected() {
    let pool = ForkJoinPool::with_workers(2).unwrap();
    pool.shutdown();
    let err = pool
        .invoke(SumTask::new(vec![1].into()))
        .unwrap_err();
    assert!(matches!(err, TaskError::Rejected(_)));
}
