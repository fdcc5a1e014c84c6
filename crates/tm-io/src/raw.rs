// Raw matrix files.
//
// A text header `rows cols` followed by `rows * cols` whitespace-separated
// floats in row-major order. Line breaks carry no meaning on input; on
// output each matrix row gets its own line.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use memmap2::Mmap;
use tm_device::{DeviceError, Matrix};

use crate::error::{DataError, Result};

/// Read a raw matrix file.
pub fn import(path: impl AsRef<Path>) -> Result<Matrix> {
    let path = path.as_ref();
    let file = File::open(path)?;
    // Mapping a zero-length file fails on some platforms.
    if file.metadata()?.len() == 0 {
        return Err(DataError::EmptyFile {
            path: path.to_path_buf(),
        });
    }
    let mmap = unsafe { Mmap::map(&file)? };
    let text = std::str::from_utf8(&mmap).map_err(|_| DataError::NotUtf8)?;
    let matrix = parse(text)?;
    tracing::debug!(
        path = %path.display(),
        rows = matrix.rows(),
        cols = matrix.cols(),
        "imported matrix"
    );
    Ok(matrix)
}

/// Parse the contents of a raw matrix file.
pub fn parse(text: &str) -> Result<Matrix> {
    let mut tokens = text.split_ascii_whitespace();
    let rows = parse_dim(tokens.next(), "rows")?;
    let cols = parse_dim(tokens.next(), "cols")?;
    if rows == 0 || cols == 0 {
        return Err(DeviceError::EmptyMatrix { rows, cols }.into());
    }
    let expected = rows
        .checked_mul(cols)
        .ok_or_else(|| DataError::InvalidHeader(format!("{} x {} overflows", rows, cols)))?;

    let values: Vec<&str> = tokens.collect();
    if values.len() != expected {
        return Err(DataError::ValueCount {
            expected,
            got: values.len(),
        });
    }
    let data = values
        .iter()
        .enumerate()
        .map(|(index, token)| {
            token.parse::<f32>().map_err(|_| DataError::InvalidValue {
                index,
                token: token.to_string(),
            })
        })
        .collect::<Result<Vec<f32>>>()?;
    Ok(Matrix::new(rows, cols, data)?)
}

fn parse_dim(token: Option<&str>, name: &str) -> Result<usize> {
    let token = token.ok_or(DataError::MissingHeader)?;
    token
        .parse::<usize>()
        .map_err(|_| DataError::InvalidHeader(format!("{} is not a count: {:?}", name, token)))
}

/// Write `matrix` to `path` in raw format, replacing any existing file.
pub fn export(path: impl AsRef<Path>, matrix: &Matrix) -> Result<()> {
    let path = path.as_ref();
    let mut writer = BufWriter::new(File::create(path)?);
    write_to(&mut writer, matrix)?;
    writer.flush()?;
    tracing::debug!(
        path = %path.display(),
        rows = matrix.rows(),
        cols = matrix.cols(),
        "exported matrix"
    );
    Ok(())
}

/// Write `matrix` in raw format to any writer.
pub fn write_to<W: Write>(writer: &mut W, matrix: &Matrix) -> Result<()> {
    writeln!(writer, "{} {}", matrix.rows(), matrix.cols())?;
    for row in matrix.data().chunks(matrix.cols().max(1)) {
        let mut first = true;
        for value in row {
            if !first {
                write!(writer, " ")?;
            }
            // `{:?}` keeps enough digits to round-trip every f32.
            write!(writer, "{:?}", value)?;
            first = false;
        }
        writeln!(writer)?;
    }
    Ok(())
}
