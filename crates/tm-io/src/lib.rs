//! `tm-io` - Dataset files for tilemm.
//!
//! Reads and writes the raw text matrix format, locates dataset files,
//! generates random datasets with their reference product and checks a
//! computed product against an expected one.

pub mod dataset;
pub mod error;
pub mod raw;
pub mod solution;

pub use dataset::{generate, Dataset};
pub use error::{DataError, Result};
pub use raw::{export, import};
pub use solution::{check, Tolerance};
