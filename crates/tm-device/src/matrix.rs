use std::fmt;
use std::sync::Arc;

use crate::device::Device;
use crate::error::{DeviceError, Result};
use crate::host::{self, MatmulOptions};
use crate::kernels::MatmulKernel;

/// A dense row-major matrix of f32 values living in host memory.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    data: Vec<f32>,
    rows: usize,
    cols: usize,
}

impl Matrix {
    /// Create a matrix from row-major data.
    ///
    /// # Errors
    /// Returns an error if `rows * cols` overflows or `data.len() != rows * cols`.
    pub fn new(rows: usize, cols: usize, data: Vec<f32>) -> Result<Self> {
        let len = element_count(rows, cols)?;
        if data.len() != len {
            return Err(DeviceError::DataLength {
                len: data.len(),
                rows,
                cols,
            });
        }
        Ok(Matrix { data, rows, cols })
    }

    /// Create a zero-filled matrix.
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self::filled(rows, cols, 0.0)
    }

    /// Create a matrix with every element set to `value`.
    ///
    /// # Panics
    /// Panics with a capacity overflow if `rows * cols` does not fit in `usize`.
    pub fn filled(rows: usize, cols: usize, value: f32) -> Self {
        Matrix {
            data: vec![value; rows.saturating_mul(cols)],
            rows,
            cols,
        }
    }

    /// Create an `n x n` identity matrix.
    pub fn identity(n: usize) -> Self {
        let mut m = Self::zeros(n, n);
        for i in 0..n {
            m.data[i * n + i] = 1.0;
        }
        m
    }

    /// Create a matrix from a slice of rows.
    ///
    /// # Errors
    /// Returns an error if the rows have differing lengths.
    pub fn from_rows<R: AsRef<[f32]>>(rows: &[R]) -> Result<Self> {
        let cols = rows.first().map(|r| r.as_ref().len()).unwrap_or(0);
        let mut data = Vec::with_capacity(rows.len() * cols);
        for row in rows {
            let row = row.as_ref();
            if row.len() != cols {
                return Err(DeviceError::DataLength {
                    len: row.len(),
                    rows: 1,
                    cols,
                });
            }
            data.extend_from_slice(row);
        }
        Self::new(rows.len(), cols, data)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the row-major data.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Consumes the matrix, returning its row-major data.
    pub fn into_data(self) -> Vec<f32> {
        self.data
    }

    /// Returns the element at `(row, col)`, or `None` if out of range.
    pub fn get(&self, row: usize, col: usize) -> Option<f32> {
        if row < self.rows && col < self.cols {
            Some(self.data[row * self.cols + col])
        } else {
            None
        }
    }

    /// Multiply `self` (`m x k`) by `other` (`k x n`) on `device` with the
    /// given kernel, returning the `m x n` product.
    pub fn matmul(
        &self,
        other: &Matrix,
        device: &Device,
        kernel: &Arc<dyn MatmulKernel>,
    ) -> Result<Matrix> {
        host::multiply(device, kernel, self, other, &MatmulOptions::default())
    }
}

impl fmt::Display for Matrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{} matrix", self.rows, self.cols)
    }
}

/// Number of elements in a `rows x cols` matrix.
///
/// # Errors
/// Returns `DimensionOverflow` if the count does not fit in `usize`.
pub fn element_count(rows: usize, cols: usize) -> Result<usize> {
    rows.checked_mul(cols)
        .ok_or(DeviceError::DimensionOverflow { rows, cols })
}

/// Dimensions of a validated product `C[m x n] = A[m x k] * B[k x n]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatmulDims {
    pub m: usize,
    pub k: usize,
    pub n: usize,
}

impl MatmulDims {
    /// Validates that `a` and `b` can be multiplied.
    ///
    /// The contraction dimensions must agree and no dimension may be zero.
    /// Since `C` is always sized `rows(A) x cols(B)`, `cols(B) == cols(C)`
    /// holds for every value returned here.
    pub fn of(a: &Matrix, b: &Matrix) -> Result<Self> {
        for m in [a, b] {
            if m.is_empty() {
                return Err(DeviceError::EmptyMatrix {
                    rows: m.rows,
                    cols: m.cols,
                });
            }
        }
        if a.cols != b.rows {
            return Err(DeviceError::DimensionMismatch {
                a_rows: a.rows,
                a_cols: a.cols,
                b_rows: b.rows,
                b_cols: b.cols,
            });
        }
        Ok(MatmulDims {
            m: a.rows,
            k: a.cols,
            n: b.cols,
        })
    }

    /// Element counts of A, B and C.
    pub fn lens(&self) -> (usize, usize, usize) {
        (self.m * self.k, self.k * self.n, self.m * self.n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_matrix() {
        let m = Matrix::new(2, 3, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        assert_eq!(m.rows(), 2);
        assert_eq!(m.cols(), 3);
        assert_eq!(m.get(1, 0), Some(4.0));
        assert_eq!(m.get(2, 0), None);
        assert_eq!(m.get(0, 3), None);
    }

    #[test]
    fn test_new_length_mismatch() {
        assert!(matches!(
            Matrix::new(2, 2, vec![1.0; 3]),
            Err(DeviceError::DataLength { len: 3, rows: 2, cols: 2 })
        ));
    }

    #[test]
    fn test_new_dimension_overflow() {
        assert!(matches!(
            Matrix::new(usize::MAX, 2, Vec::new()),
            Err(DeviceError::DimensionOverflow { rows: usize::MAX, cols: 2 })
        ));
        assert!(matches!(
            element_count(1 << (usize::BITS / 2), 1 << (usize::BITS / 2)),
            Err(DeviceError::DimensionOverflow { .. })
        ));
        assert_eq!(element_count(3, 4).unwrap(), 12);
    }

    #[test]
    #[should_panic(expected = "capacity overflow")]
    fn test_filled_overflow_panics() {
        Matrix::filled(usize::MAX, 2, 0.0);
    }

    #[test]
    fn test_identity() {
        let i = Matrix::identity(3);
        assert_eq!(i.data(), &[1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_from_rows() {
        let m = Matrix::from_rows(&[[1.0, 2.0], [3.0, 4.0]]).unwrap();
        assert_eq!(m.data(), &[1.0, 2.0, 3.0, 4.0]);
        assert!(Matrix::from_rows(&[vec![1.0, 2.0], vec![3.0]]).is_err());
    }

    #[test]
    fn test_dims_valid() {
        let a = Matrix::zeros(2, 3);
        let b = Matrix::zeros(3, 4);
        let dims = MatmulDims::of(&a, &b).unwrap();
        assert_eq!(dims, MatmulDims { m: 2, k: 3, n: 4 });
        assert_eq!(dims.lens(), (6, 12, 8));
    }

    #[test]
    fn test_dims_mismatch() {
        let a = Matrix::zeros(2, 3);
        let b = Matrix::zeros(2, 3);
        assert!(matches!(
            MatmulDims::of(&a, &b),
            Err(DeviceError::DimensionMismatch { a_cols: 3, b_rows: 2, .. })
        ));
    }

    #[test]
    fn test_dims_empty() {
        let a = Matrix::zeros(0, 3);
        let b = Matrix::zeros(3, 2);
        assert!(matches!(
            MatmulDims::of(&a, &b),
            Err(DeviceError::EmptyMatrix { rows: 0, cols: 3 })
        ));
    }
}
