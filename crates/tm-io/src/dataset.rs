use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tm_device::{element_count, reference, Matrix};

use crate::error::Result;
use crate::raw;

pub const INPUT_A: &str = "input0.raw";
pub const INPUT_B: &str = "input1.raw";
pub const EXPECTED_OUTPUT: &str = "output.raw";

/// Paths of one matmul test case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dataset {
    pub a: PathBuf,
    pub b: PathBuf,
    pub expected: Option<PathBuf>,
}

impl Dataset {
    /// The conventional layout inside `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Dataset {
            a: dir.join(INPUT_A),
            b: dir.join(INPUT_B),
            expected: Some(dir.join(EXPECTED_OUTPUT)),
        }
    }

    /// Inputs given explicitly; the expected output is looked up next to `a`
    /// and used only if it exists.
    pub fn for_inputs(a: impl Into<PathBuf>, b: impl Into<PathBuf>) -> Self {
        let a = a.into();
        let expected = a
            .parent()
            .map(|dir| dir.join(EXPECTED_OUTPUT))
            .filter(|p| p.is_file());
        Dataset {
            a,
            b: b.into(),
            expected,
        }
    }

    pub fn with_expected(mut self, expected: impl Into<PathBuf>) -> Self {
        self.expected = Some(expected.into());
        self
    }

    pub fn load_inputs(&self) -> Result<(Matrix, Matrix)> {
        Ok((raw::import(&self.a)?, raw::import(&self.b)?))
    }

    pub fn load_expected(&self) -> Result<Option<Matrix>> {
        self.expected.as_ref().map(raw::import).transpose()
    }
}

/// Matrix of the given shape with elements drawn uniformly from [-1, 1).
pub fn random_matrix(rng: &mut impl Rng, rows: usize, cols: usize) -> Result<Matrix> {
    let len = element_count(rows, cols)?;
    let data = (0..len).map(|_| rng.gen_range(-1.0f32..1.0)).collect();
    Ok(Matrix::new(rows, cols, data)?)
}

/// Write a random `m x k` by `k x n` dataset and its reference product to `dir`.
pub fn generate(dir: impl AsRef<Path>, m: usize, k: usize, n: usize, seed: u64) -> Result<Dataset> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir)?;

    let mut rng = StdRng::seed_from_u64(seed);
    let a = random_matrix(&mut rng, m, k)?;
    let b = random_matrix(&mut rng, k, n)?;
    let c = reference::matmul(&a, &b)?;

    let dataset = Dataset::in_dir(dir);
    raw::export(&dataset.a, &a)?;
    raw::export(&dataset.b, &b)?;
    if let Some(expected) = &dataset.expected {
        raw::export(expected, &c)?;
    }
    tracing::info!(dir = %dir.display(), m, k, n, seed, "generated dataset");
    Ok(dataset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DataError;
    use approx::assert_relative_eq;
    use tm_device::DeviceError;
    use tempfile::tempdir;

    #[test]
    fn test_generate_layout_and_product() {
        let dir = tempdir().unwrap();
        let ds = generate(dir.path(), 5, 7, 3, 9).unwrap();
        assert_eq!(ds, Dataset::in_dir(dir.path()));

        let (a, b) = ds.load_inputs().unwrap();
        assert_eq!((a.rows(), a.cols()), (5, 7));
        assert_eq!((b.rows(), b.cols()), (7, 3));
        assert!(a.data().iter().all(|v| (-1.0..1.0).contains(v)));

        let c = ds.load_expected().unwrap().unwrap();
        let want = reference::matmul(&a, &b).unwrap();
        for (x, y) in c.data().iter().zip(want.data()) {
            assert_relative_eq!(*x, *y);
        }
    }

    #[test]
    fn test_generate_is_seeded() {
        let (d1, d2) = (tempdir().unwrap(), tempdir().unwrap());
        let a1 = generate(d1.path(), 3, 3, 3, 1).unwrap().load_inputs().unwrap();
        let a2 = generate(d2.path(), 3, 3, 3, 1).unwrap().load_inputs().unwrap();
        assert_eq!(a1, a2);
    }

    #[test]
    fn test_random_matrix_dimension_overflow() {
        let mut rng = StdRng::seed_from_u64(0);
        assert!(matches!(
            random_matrix(&mut rng, usize::MAX, 3),
            Err(DataError::Matrix(DeviceError::DimensionOverflow { .. }))
        ));
    }

    #[test]
    fn test_generate_rejects_overflowing_shape() {
        let dir = tempdir().unwrap();
        let err = generate(dir.path(), usize::MAX, 2, 1, 0).unwrap_err();
        assert!(matches!(
            err,
            DataError::Matrix(DeviceError::DimensionOverflow { .. })
        ));
        assert!(!dir.path().join(INPUT_A).exists());
    }

    #[test]
    fn test_for_inputs_finds_implicit_expected() {
        let dir = tempdir().unwrap();
        let a = dir.path().join(INPUT_A);
        let b = dir.path().join(INPUT_B);

        assert_eq!(Dataset::for_inputs(&a, &b).expected, None);

        std::fs::write(dir.path().join(EXPECTED_OUTPUT), "1 1\n0\n").unwrap();
        let ds = Dataset::for_inputs(&a, &b);
        assert_eq!(ds.expected, Some(dir.path().join(EXPECTED_OUTPUT)));

        let explicit = ds.with_expected("elsewhere.raw");
        assert_eq!(explicit.expected, Some(PathBuf::from("elsewhere.raw")));
    }
}
