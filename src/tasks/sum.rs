use std::ops::Range;
use std::sync::Arc;

use crate::runtime::scheduler::{ForkJoinTask, RecursiveTask};

use super::{midpoint, DEFAULT_THRESHOLD};

/// Sum of a slice of `i64`.
#[derive(Debug, Clone)]
pub struct SumTask {
    data: Arc<[i64]>,
    range: Range<usize>,
    threshold: usize,
}

impl SumTask {
    pub fn new(data: Arc<[i64]>) -> Self {
        let len = data.len();
        Self {
            data,
            range: 0..len,
            threshold: DEFAULT_THRESHOLD,
        }
    }

    /// Sequential cutoff; clamped to at least 1.
    pub fn with_threshold(
        mut self,
        threshold: usize,
    ) -> Self {
        self.threshold = threshold.max(1);
        self
    }

    fn part(
        &self,
        range: Range<usize>,
    ) -> Self {
        Self {
            data: self.data.clone(),
            range,
            threshold: self.threshold,
        }
    }
}

impl RecursiveTask for SumTask {
    type Output = i64;

    fn compute(self) -> i64 {
        let Range { start, end } = self.range;
        if end - start <= self.threshold {
            return self.data[start..end].iter().sum();
        }
        let mid = midpoint(start, end);
        let left = ForkJoinTask::new(self.part(start..mid));
        left.fork();
        let right = self.part(mid..end).compute();
        left.join_owned() + right
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ForkJoinPool;

    #[test]
    fn test_sum_matches_sequential() {
        let data: Arc<[i64]> = (1..=10_000).collect::<Vec<i64>>().into();
        let pool = ForkJoinPool::with_workers(4).unwrap();
        let total = pool
            .invoke(SumTask::new(data).with_threshold(100))
            .unwrap();
        assert_eq!(total, 50_005_000);
    }

    #[test]
    fn test_empty_sum() {
        let data: Arc<[i64]> = Vec::new().into();
        assert_eq!(SumTask::new(data).compute(), 0);
    }
}
