use std::ops::Range;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use crate::runtime::context;
use crate::runtime::scheduler::{invoke_all, ForkJoinTask, RecursiveTask};

use super::{midpoint, DEFAULT_THRESHOLD};

/// Add `delta` to every element in place. Stops early, leaving the rest
/// untouched, if the running task is interrupted.
#[derive(Debug, Clone)]
pub struct IncrementTask {
    data: Arc<[AtomicI64]>,
    range: Range<usize>,
    delta: i64,
    threshold: usize,
}

impl IncrementTask {
    pub fn new(
        data: Arc<[AtomicI64]>,
        delta: i64,
    ) -> Self {
        let len = data.len();
        Self {
            data,
            range: 0..len,
            delta,
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

    /// Wrap plain values for use with this task.
    pub fn atomics(values: impl IntoIterator<Item = i64>) -> Arc<[AtomicI64]> {
        values.into_iter().map(AtomicI64::new).collect()
    }
}

impl RecursiveTask for IncrementTask {
    type Output = ();

    fn compute(self) {
        let Range { start, end } = self.range;
        if end - start <= self.threshold {
            if context::interrupted() {
                return;
            }
            for cell in &self.data[start..end] {
                cell.fetch_add(self.delta, Ordering::Relaxed);
            }
            return;
        }
        let mid = midpoint(start, end);
        let halves = vec![
            ForkJoinTask::new(IncrementTask {
                data: self.data.clone(),
                range: start..mid,
                delta: self.delta,
                threshold: self.threshold,
            }),
            ForkJoinTask::new(IncrementTask {
                data: self.data,
                range: mid..end,
                delta: self.delta,
                threshold: self.threshold,
            }),
        ];
        invoke_all(halves);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ForkJoinPool;

    #[test]
    fn test_every_element_incremented_once() {
        let data = IncrementTask::atomics(0..4_096);
        let pool = ForkJoinPool::with_workers(4).unwrap();
        pool.invoke(IncrementTask::new(data.clone(), 3).with_threshold(32))
            .unwrap();
        for (i, cell) in data.iter().enumerate() {
            assert_eq!(cell.load(Ordering::Relaxed), i as i64 + 3);
        }
    }
}
