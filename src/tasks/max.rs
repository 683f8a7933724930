use std::ops::Range;
use std::sync::Arc;

use crate::runtime::scheduler::{invoke_all, ForkJoinTask, RecursiveTask};

use super::{midpoint, DEFAULT_THRESHOLD};

/// Largest element of a slice, `None` when empty.
#[derive(Debug, Clone)]
pub struct MaxTask {
    data: Arc<[i64]>,
    range: Range<usize>,
    threshold: usize,
}

impl MaxTask {
    pub fn new(data: Arc<[i64]>) -> Self {
        let len = data.len();
        Self {
            data,
            range: 0..len,
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

impl RecursiveTask for MaxTask {
    type Output = Option<i64>;

    fn compute(self) -> Option<i64> {
        let Range { start, end } = self.range;
        if end - start <= self.threshold {
            return self.data[start..end].iter().copied().max();
        }
        let mid = midpoint(start, end);
        let halves = [start..mid, mid..end]
            .into_iter()
            .map(|range| {
                ForkJoinTask::new(MaxTask {
                    data: self.data.clone(),
                    range,
                    threshold: self.threshold,
                })
            })
            .collect();
        invoke_all(halves).into_iter().flatten().max()
    }
}
