use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DataError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{path}: file is empty")]
    EmptyFile { path: PathBuf },
    #[error("matrix file is not valid UTF-8")]
    NotUtf8,
    #[error("missing `rows cols` header")]
    MissingHeader,
    #[error("invalid header: {0}")]
    InvalidHeader(String),
    #[error("invalid value {token:?} at element {index}")]
    InvalidValue { index: usize, token: String },
    #[error("expected {expected} values, got {got}")]
    ValueCount { expected: usize, got: usize },
    #[error("matrix error: {0}")]
    Matrix(#[from] tm_device::DeviceError),
    #[error("solution shape {got_rows}x{got_cols} does not match expected {expected_rows}x{expected_cols}")]
    SolutionShape {
        expected_rows: usize,
        expected_cols: usize,
        got_rows: usize,
        got_cols: usize,
    },
    #[error(
        "solution differs at ({row}, {col}): expected {expected}, got {got} \
         ({mismatches} mismatching elements)"
    )]
    SolutionMismatch {
        row: usize,
        col: usize,
        expected: f32,
        got: f32,
        mismatches: usize,
    },
}

pub type Result<T> = std::result::Result<T, DataError>;
