//! Shared pieces of the `tilemm` and `tilemm-gen` binaries.

pub mod error;
pub mod logging;

pub use error::{CliError, Result};
