//! Parallel results agree with sequential ones for arbitrary inputs.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use once_cell::sync::Lazy;
use proptest::prelude::*;

use taskweave::tasks::{IncrementTask, MaxTask, MergeSortTask, SumTask};
use taskweave::ForkJoinPool;

static POOL: Lazy<ForkJoinPool> = Lazy::new(|| ForkJoinPool::with_workers(4).unwrap());

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_sum_matches_sequential(
        values in prop::collection::vec(-1_000_000i64..1_000_000, 0..2_000),
        threshold in 1usize..64,
    ) {
        let expected: i64 = values.iter().sum();
        let data: Arc<[i64]> = values.into();
        let total = POOL.invoke(SumTask::new(data).with_threshold(threshold)).unwrap();
        prop_assert_eq!(total, expected);
    }

    #[test]
    fn prop_max_matches_sequential(
        values in prop::collection::vec(any::<i64>(), 0..2_000),
        threshold in 1usize..64,
    ) {
        let expected = values.iter().copied().max();
        let max = POOL.invoke(MaxTask::new(values.into()).with_threshold(threshold)).unwrap();
        prop_assert_eq!(max, expected);
    }

    #[test]
    fn prop_sort_is_stable_permutation(
        keys in prop::collection::vec(0u8..16, 0..1_500),
        threshold in 1usize..64,
    ) {
        let tagged: Vec<(u8, usize)> = keys.into_iter().enumerate().map(|(i, k)| (k, i)).collect();
        let mut expected = tagged.clone();
        expected.sort_by_key(|&(k, _)| k);
        let sorted = POOL.invoke(MergeSortTask::new(tagged).with_threshold(threshold)).unwrap();
        prop_assert_eq!(sorted, expected);
    }

    #[test]
    fn prop_increment_touches_each_cell_once(
        len in 0usize..3_000,
        delta in -50i64..50,
        threshold in 1usize..128,
    ) {
        let cells = IncrementTask::atomics(0..len as i64);
        POOL.invoke(IncrementTask::new(cells.clone(), delta).with_threshold(threshold)).unwrap();
        for (i, cell) in cells.iter().enumerate() {
            prop_assert_eq!(cell.load(Ordering::Relaxed), i as i64 + delta);
        }
    }
}
