use crate::error::{DeviceFault, Result};
use crate::group::WorkerContext;
use crate::launch::LaunchConfig;
use crate::matrix::MatmulDims;

use super::{check_width, MatmulArgs, MatmulKernel, TILE_WIDTH};

/// One output element per worker, reading its whole row of A and column of
/// B straight from global memory. No shared memory, no barriers.
#[derive(Debug, Clone)]
pub struct NaiveKernel {
    block_width: usize,
}

impl NaiveKernel {
    /// Create a naive kernel launched with `block_width x block_width` groups.
    pub fn new(block_width: usize) -> Result<Self> {
        Ok(NaiveKernel {
            block_width: check_width(block_width)?,
        })
    }

    pub fn block_width(&self) -> usize {
        self.block_width
    }
}

impl Default for NaiveKernel {
    fn default() -> Self {
        NaiveKernel {
            block_width: TILE_WIDTH,
        }
    }
}

impl MatmulKernel for NaiveKernel {
    fn name(&self) -> &str {
        "naive"
    }

    fn launch_config(&self, dims: MatmulDims) -> LaunchConfig {
        LaunchConfig::covering(dims.m, dims.n, self.block_width, 0)
    }

    fn execute(
        &self,
        ctx: &WorkerContext<'_>,
        args: &MatmulArgs,
    ) -> std::result::Result<(), DeviceFault> {
        let MatmulDims { m, k, n } = args.dims();
        let (block, dim, thread) = (ctx.block_idx(), ctx.block_dim(), ctx.thread_idx());
        let col = block.x * dim.x + thread.x;
        let row = block.y * dim.y + thread.y;

        // The grid is rounded up, so edge groups carry idle workers.
        if row >= m || col >= n {
            return Ok(());
        }

        let mut acc = 0.0f32;
        for i in 0..k {
            acc += args.a().load(row * k + i)? * args.b().load(i * n + col)?;
        }
        args.c().store(row * n + col, acc)
    }
}
