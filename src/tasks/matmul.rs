use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use crate::error::{TaskError, TaskResult};
use crate::runtime::scheduler::{invoke_both, ForkJoinPool, ForkJoinTask, RecursiveTask};

use super::midpoint;

/// Dense row-major matrix of `f64`.
#[derive(Clone, PartialEq)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl Matrix {
    pub fn zeros(
        rows: usize,
        cols: usize,
    ) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    pub fn identity(n: usize) -> Self {
        Self::from_fn(n, n, |r, c| if r == c { 1.0 } else { 0.0 })
    }

    pub fn from_fn(
        rows: usize,
        cols: usize,
        mut f: impl FnMut(usize, usize) -> f64,
    ) -> Self {
        let mut data = Vec::with_capacity(rows * cols);
        for r in 0..rows {
            for c in 0..cols {
                data.push(f(r, c));
            }
        }
        Self { rows, cols, data }
    }

    /// Build from row-major values. Fails if `data.len() != rows * cols`.
    pub fn from_vec(
        rows: usize,
        cols: usize,
        data: Vec<f64>,
    ) -> TaskResult<Self> {
        if data.len() != rows * cols {
            return Err(TaskError::InvalidArgument(
                "matrix data length must equal rows * cols",
            ));
        }
        Ok(Self { rows, cols, data })
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    #[inline]
    pub fn get(
        &self,
        row: usize,
        col: usize,
    ) -> f64 {
        self.data[row * self.cols + col]
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    fn check_product(
        &self,
        rhs: &Matrix,
    ) -> TaskResult<()> {
        if self.cols != rhs.rows {
            return Err(TaskError::InvalidArgument(
                "left column count must equal right row count",
            ));
        }
        Ok(())
    }

    /// Rows `rows` of `self * rhs`, row-major.
    fn product_rows(
        &self,
        rhs: &Matrix,
        rows: Range<usize>,
    ) -> Vec<f64> {
        let mut out = vec![0.0; rows.len() * rhs.cols];
        for (i, r) in rows.enumerate() {
            let dst = &mut out[i * rhs.cols..(i + 1) * rhs.cols];
            for k in 0..self.cols {
                let a = self.get(r, k);
                let src = &rhs.data[k * rhs.cols..(k + 1) * rhs.cols];
                for (d, b) in dst.iter_mut().zip(src) {
                    *d += a * b;
                }
            }
        }
        out
    }

    pub fn multiply(
        &self,
        rhs: &Matrix,
    ) -> TaskResult<Matrix> {
        self.check_product(rhs)?;
        Ok(Matrix {
            rows: self.rows,
            cols: rhs.cols,
            data: self.product_rows(rhs, 0..self.rows),
        })
    }

    /// `lhs * rhs` computed on `pool`, splitting by rows.
    pub fn par_multiply(
        lhs: Arc<Matrix>,
        rhs: Arc<Matrix>,
        pool: &ForkJoinPool,
        threshold: usize,
    ) -> TaskResult<Matrix> {
        lhs.check_product(&rhs)?;
        let rows = lhs.rows;
        let cols = rhs.cols;
        let data = pool.invoke(MatrixMultiplyTask::new(lhs, rhs).with_threshold(threshold))?;
        Ok(Matrix { rows, cols, data })
    }
}

impl fmt::Debug for Matrix {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Matrix")
            .field("rows", &self.rows)
            .field("cols", &self.cols)
            .finish_non_exhaustive()
    }
}

/// Row block of a matrix product. The output holds the block's rows of
/// `lhs * rhs`, row-major.
///
/// Dimensions are not checked here; [`Matrix::par_multiply`] does that.
#[derive(Debug, Clone)]
pub struct MatrixMultiplyTask {
    lhs: Arc<Matrix>,
    rhs: Arc<Matrix>,
    rows: Range<usize>,
    threshold: usize,
}

impl MatrixMultiplyTask {
    pub fn new(
        lhs: Arc<Matrix>,
        rhs: Arc<Matrix>,
    ) -> Self {
        let rows = 0..lhs.rows;
        Self {
            lhs,
            rhs,
            rows,
            threshold: 16,
        }
    }

    /// Maximum rows computed by one leaf; clamped to at least 1.
    pub fn with_threshold(
        mut self,
        threshold: usize,
    ) -> Self {
        self.threshold = threshold.max(1);
        self
    }

    fn block(
        &self,
        rows: Range<usize>,
    ) -> Self {
        Self {
            lhs: self.lhs.clone(),
            rhs: self.rhs.clone(),
            rows,
            threshold: self.threshold,
        }
    }
}

impl RecursiveTask for MatrixMultiplyTask {
    type Output = Vec<f64>;

    fn compute(self) -> Vec<f64> {
        let Range { start, end } = self.rows;
        if end - start <= self.threshold {
            return self.lhs.product_rows(&self.rhs, start..end);
        }
        let mid = midpoint(start, end);
        let (mut top, bottom) = invoke_both(
            ForkJoinTask::new(self.block(start..mid)),
            ForkJoinTask::new(self.block(mid..end)),
        );
        top.extend(bottom);
        top
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_product() {
        let a = Arc::new(Matrix::from_fn(37, 23, |r, c| (r * 23 + c) as f64));
        let id = Arc::new(Matrix::identity(23));
        let pool = ForkJoinPool::with_workers(4).unwrap();
        let product = Matrix::par_multiply(a.clone(), id, &pool, 4).unwrap();
        assert_eq!(product, *a);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let a = Arc::new(Matrix::from_fn(40, 30, |r, c| ((r + 2 * c) % 7) as f64));
        let b = Arc::new(Matrix::from_fn(30, 20, |r, c| ((3 * r + c) % 5) as f64 - 2.0));
        let pool = ForkJoinPool::with_workers(3).unwrap();
        let parallel = Matrix::par_multiply(a.clone(), b.clone(), &pool, 3).unwrap();
        assert_eq!(parallel, a.multiply(&b).unwrap());
        assert_eq!((parallel.rows(), parallel.cols()), (40, 20));
    }

    #[test]
    fn test_dimension_mismatch() {
        let a = Arc::new(Matrix::zeros(2, 3));
        let b = Arc::new(Matrix::zeros(2, 3));
        let pool = ForkJoinPool::with_workers(1).unwrap();
        assert!(matches!(
            Matrix::par_multiply(a, b, &pool, 1),
            Err(TaskError::InvalidArgument(_))
        ));
        assert!(Matrix::from_vec(2, 2, vec![1.0]).is_err());
    }
}
