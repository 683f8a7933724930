use crate::runtime::scheduler::{ForkJoinTask, RecursiveTask};

use super::DEFAULT_THRESHOLD;

/// Stable merge sort that sorts the halves in parallel.
#[derive(Debug, Clone)]
pub struct MergeSortTask<T> {
    data: Vec<T>,
    threshold: usize,
}

impl<T> MergeSortTask<T>
where
    T: Ord + Send + 'static,
{
    pub fn new(data: Vec<T>) -> Self {
        Self {
            data,
            threshold: DEFAULT_THRESHOLD,
        }
    }

    pub fn with_threshold(
        mut self,
        threshold: usize,
    ) -> Self {
        self.threshold = threshold.max(1);
        self
    }
}

impl<T> RecursiveTask for MergeSortTask<T>
where
    T: Ord + Send + 'static,
{
    type Output = Vec<T>;

    fn compute(mut self) -> Vec<T> {
        if self.data.len() <= self.threshold {
            self.data.sort();
            return self.data;
        }
        let upper = self.data.split_off(self.data.len() / 2);
        let left = ForkJoinTask::new(MergeSortTask {
            data: self.data,
            threshold: self.threshold,
        });
        left.fork();
        let right = MergeSortTask {
            data: upper,
            threshold: self.threshold,
        }
        .compute();
        merge(left.join_owned(), right)
    }
}

/// Merge two sorted vectors; on ties the left element comes first.
fn merge<T: Ord>(
    left: Vec<T>,
    right: Vec<T>,
) -> Vec<T> {
    let mut merged = Vec::with_capacity(left.len() + right.len());
    let mut left = left.into_iter().peekable();
    let mut right = right.into_iter().peekable();
    loop {
        let take_left = match (left.peek(), right.peek()) {
            (Some(l), Some(r)) => l <= r,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => break,
        };
        let next = if take_left { left.next() } else { right.next() };
        merged.extend(next);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ForkJoinPool;

    #[test]
    fn test_merge_keeps_left_on_ties() {
        let merged = merge(vec![(1, 'a'), (3, 'a')], vec![(1, 'b'), (2, 'b')]);
        assert_eq!(merged, vec![(1, 'a'), (1, 'b'), (2, 'b'), (3, 'a')]);
    }

    #[test]
    fn test_sort_reversed_input() {
        let pool = ForkJoinPool::with_workers(4).unwrap();
        let input: Vec<u32> = (0..20_000).rev().collect();
        let sorted = pool
            .invoke(MergeSortTask::new(input).with_threshold(256))
            .unwrap();
        assert_eq!(sorted, (0..20_000).collect::<Vec<u32>>());
    }
}
