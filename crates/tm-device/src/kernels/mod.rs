pub mod naive;
pub mod tiled;

use std::fmt::{self, Debug};
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{DeviceError, DeviceFault, Result};
use crate::group::WorkerContext;
use crate::launch::LaunchConfig;
use crate::matrix::MatmulDims;
use crate::memory::{DeviceBuffer, DeviceMemory};

pub use naive::NaiveKernel;
pub use tiled::{TiledKernel, TILE_WIDTH};

/// A device kernel computing `C = A * B`.
///
/// Implementations share one mathematical contract and differ only in how
/// they schedule the work, so the host orchestrator can run any of them and
/// tests can compare their outputs directly.
pub trait MatmulKernel: Send + Sync + Debug {
    /// Returns the name of this kernel (e.g., "naive", "tiled").
    fn name(&self) -> &str;

    /// Grid and block shape covering the `m x n` output.
    fn launch_config(&self, dims: MatmulDims) -> LaunchConfig;

    /// Check a launch configuration before it is enqueued.
    ///
    /// Returns a human-readable reason if this kernel cannot run with
    /// `config`. The default accepts every configuration.
    fn validate(&self, _config: &LaunchConfig) -> std::result::Result<(), String> {
        Ok(())
    }

    /// Body of the kernel, run once by every worker of every work-group.
    fn execute(
        &self,
        ctx: &WorkerContext<'_>,
        args: &MatmulArgs,
    ) -> std::result::Result<(), DeviceFault>;
}

/// Device buffers and dimensions handed to a matmul kernel.
#[derive(Debug, Clone)]
pub struct MatmulArgs {
    dims: MatmulDims,
    a: Arc<DeviceMemory>,
    b: Arc<DeviceMemory>,
    c: Arc<DeviceMemory>,
}

impl MatmulArgs {
    pub fn new(dims: MatmulDims, a: &DeviceBuffer, b: &DeviceBuffer, c: &DeviceBuffer) -> Self {
        MatmulArgs {
            dims,
            a: Arc::clone(a.memory()),
            b: Arc::clone(b.memory()),
            c: Arc::clone(c.memory()),
        }
    }

    pub fn dims(&self) -> MatmulDims {
        self.dims
    }

    /// Row-major `m x k` input.
    pub fn a(&self) -> &DeviceMemory {
        &self.a
    }

    /// Row-major `k x n` input.
    pub fn b(&self) -> &DeviceMemory {
        &self.b
    }

    /// Row-major `m x n` output.
    pub fn c(&self) -> &DeviceMemory {
        &self.c
    }

    /// Checks that every buffer holds exactly as many elements as `dims` implies.
    pub(crate) fn check_lengths(&self) -> std::result::Result<(), String> {
        let (a_len, b_len, c_len) = self.dims.lens();
        for (name, expected, got) in [
            ("A", a_len, self.a.len()),
            ("B", b_len, self.b.len()),
            ("C", c_len, self.c.len()),
        ] {
            if expected != got {
                return Err(format!(
                    "buffer {} holds {} elements but dimensions need {}",
                    name, got, expected
                ));
            }
        }
        Ok(())
    }
}

/// The kernel variants shipped with this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KernelKind {
    Naive,
    Tiled,
}

impl KernelKind {
    pub const ALL: [KernelKind; 2] = [KernelKind::Naive, KernelKind::Tiled];

    /// Build the kernel with the given block (naive) or tile (tiled) width.
    pub fn build(self, width: usize) -> Result<Arc<dyn MatmulKernel>> {
        Ok(match self {
            KernelKind::Naive => Arc::new(NaiveKernel::new(width)?),
            KernelKind::Tiled => Arc::new(TiledKernel::new(width)?),
        })
    }
}

impl fmt::Display for KernelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelKind::Naive => write!(f, "naive"),
            KernelKind::Tiled => write!(f, "tiled"),
        }
    }
}

impl FromStr for KernelKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "naive" | "simple" => Ok(KernelKind::Naive),
            "tiled" | "shared" => Ok(KernelKind::Tiled),
            other => Err(format!("unknown kernel '{}'", other)),
        }
    }
}

/// Reject a zero block or tile width.
pub(crate) fn check_width(width: usize) -> Result<usize> {
    if width == 0 {
        return Err(DeviceError::InvalidTileWidth(width));
    }
    Ok(width)
}
