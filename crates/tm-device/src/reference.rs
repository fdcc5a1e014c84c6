// Host-side reference multiplication.
//
// Straightforward i-j-p loops with a left-to-right running sum. Used to
// produce expected outputs for datasets and as the ground truth in tests.

use crate::error::Result;
use crate::matrix::{MatmulDims, Matrix};

/// Compute `a * b` on the host.
pub fn matmul(a: &Matrix, b: &Matrix) -> Result<Matrix> {
    let MatmulDims { m, k, n } = MatmulDims::of(a, b)?;
    let (a, b) = (a.data(), b.data());

    let mut c = vec![0.0f32; m * n];
    for i in 0..m {
        for j in 0..n {
            let mut sum = 0.0f32;
            for p in 0..k {
                sum += a[i * k + p] * b[p * n + j];
            }
            c[i * n + j] = sum;
        }
    }
    Matrix::new(m, n, c)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matmul_identity() {
        // 2x2 identity @ [1,2;3,4]
        let i = Matrix::identity(2);
        let x = Matrix::new(2, 2, vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let c = matmul(&i, &x).unwrap();
        assert_eq!(c.data(), &[1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_matmul_basic() {
        // [1,2;3,4] @ [5,6;7,8] = [19,22;43,50]
        let a = Matrix::new(2, 2, vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let b = Matrix::new(2, 2, vec![5.0, 6.0, 7.0, 8.0]).unwrap();
        let c = matmul(&a, &b).unwrap();
        assert_eq!(c.data(), &[19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn test_matmul_rectangular() {
        // [1,2] @ [3;4] = [11]
        let a = Matrix::new(1, 2, vec![1.0, 2.0]).unwrap();
        let b = Matrix::new(2, 1, vec![3.0, 4.0]).unwrap();
        assert_eq!(matmul(&a, &b).unwrap().data(), &[11.0]);
    }

    #[test]
    fn test_matmul_dimension_mismatch() {
        let a = Matrix::zeros(1, 3);
        let b = Matrix::zeros(2, 2);
        assert!(matmul(&a, &b).is_err());
    }
}
