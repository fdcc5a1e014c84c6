use tm_device::Matrix;

use crate::error::{DataError, Result};

/// Acceptance bounds for comparing a computed product with an expected one.
///
/// An element passes when `|got - expected| <= max(absolute, relative * |expected|)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tolerance {
    pub relative: f32,
    pub absolute: f32,
}

impl Default for Tolerance {
    fn default() -> Self {
        Tolerance {
            relative: 1e-3,
            absolute: 1e-3,
        }
    }
}

impl Tolerance {
    pub fn accepts(&self, got: f32, expected: f32) -> bool {
        // Matching infinities differ by NaN.
        if got == expected {
            return true;
        }
        let bound = self.absolute.max(self.relative * expected.abs());
        (got - expected).abs() <= bound
    }
}

/// Compare `actual` against `expected` element by element.
///
/// # Errors
/// `SolutionShape` if the shapes differ, otherwise `SolutionMismatch` naming
/// the first failing element and how many elements failed in total.
pub fn check(actual: &Matrix, expected: &Matrix, tolerance: Tolerance) -> Result<()> {
    if actual.rows() != expected.rows() || actual.cols() != expected.cols() {
        return Err(DataError::SolutionShape {
            expected_rows: expected.rows(),
            expected_cols: expected.cols(),
            got_rows: actual.rows(),
            got_cols: actual.cols(),
        });
    }

    let mut first = None;
    let mut mismatches = 0;
    for (i, (&got, &want)) in actual.data().iter().zip(expected.data()).enumerate() {
        if !tolerance.accepts(got, want) {
            mismatches += 1;
            first.get_or_insert((i, got, want));
        }
    }

    match first {
        None => Ok(()),
        Some((i, got, expected_value)) => {
            let cols = expected.cols();
            tracing::debug!(mismatches, "solution check failed");
            Err(DataError::SolutionMismatch {
                row: i / cols,
                col: i % cols,
                expected: expected_value,
                got,
                mismatches,
            })
        }
    }
}
