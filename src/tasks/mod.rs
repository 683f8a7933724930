//! Ready-made divide-and-conquer tasks.
//!
//! Each task splits its input in halves until a piece is at most `threshold`
//! elements, then solves that piece sequentially. They drive the CLI, the
//! benches and the integration tests, and double as examples of the
//! [`RecursiveTask`](crate::RecursiveTask) contract.

pub mod increment;
pub mod matmul;
pub mod max;
pub mod sort;
pub mod sum;

pub use increment::IncrementTask;
pub use matmul::{Matrix, MatrixMultiplyTask};
pub use max::MaxTask;
pub use sort::MergeSortTask;
pub use sum::SumTask;

/// Sequential cutoff used when none is given.
pub const DEFAULT_THRESHOLD: usize = 1_000;

/// Midpoint of `lo..hi`.
#[inline]
pub(crate) fn midpoint(
    lo: usize,
    hi: usize,
) -> usize {
    lo + (hi - lo) / 2
}
