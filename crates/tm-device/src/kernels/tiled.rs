use crate::error::{DeviceFault, Result};
use crate::group::WorkerContext;
use crate::launch::{ceil_div, Dim3, LaunchConfig};
use crate::matrix::MatmulDims;

use super::{check_width, MatmulArgs, MatmulKernel};

/// Default tile width.
pub const TILE_WIDTH: usize = 16;

/// Shared-memory tiled multiplication.
///
/// Each `tile_width x tile_width` work-group owns one tile of C. The
/// contraction dimension is swept in `ceil(k / tile_width)` phases; in each
/// phase every worker copies one element of A and one of B into the group's
/// shared tiles, the group synchronises, every worker accumulates one
/// tile-wide partial dot product, and the group synchronises again before
/// the tiles are overwritten.
///
/// Loads outside A or B (the ragged last phase, or rows/columns past the
/// edge of C) stage `0.0` instead, which leaves the sum unchanged. Workers
/// whose output coordinate lies outside C still take part in loading and in
/// both barriers; they only skip the final store.
///
/// Accumulation runs phase by phase and within a phase in tile order. The
/// padded terms are exact zeros, so the running sum sees the same real
/// terms in the same order as a plain left-to-right dot product; callers
/// should nonetheless compare against other kernels with a tolerance.
#[derive(Debug, Clone)]
pub struct TiledKernel {
    tile_width: usize,
}

impl TiledKernel {
    pub fn new(tile_width: usize) -> Result<Self> {
        Ok(TiledKernel {
            tile_width: check_width(tile_width)?,
        })
    }

    pub fn tile_width(&self) -> usize {
        self.tile_width
    }

    /// Shared cells used by one group: one A tile followed by one B tile.
    pub fn shared_floats(&self) -> usize {
        2 * self.tile_width * self.tile_width
    }
}

impl Default for TiledKernel {
    fn default() -> Self {
        TiledKernel {
            tile_width: TILE_WIDTH,
        }
    }
}

impl MatmulKernel for TiledKernel {
    fn name(&self) -> &str {
        "tiled"
    }

    fn launch_config(&self, dims: MatmulDims) -> LaunchConfig {
        LaunchConfig::covering(dims.m, dims.n, self.tile_width, self.shared_floats())
    }

    fn validate(&self, config: &LaunchConfig) -> std::result::Result<(), String> {
        let expected = Dim3::xy(self.tile_width, self.tile_width);
        if config.block != expected {
            return Err(format!(
                "block {} must match the {}x{} tile",
                config.block, self.tile_width, self.tile_width
            ));
        }
        if config.shared_floats < self.shared_floats() {
            return Err(format!(
                "needs {} shared floats per group, config provides {}",
                self.shared_floats(),
                config.shared_floats
            ));
        }
        Ok(())
    }

    fn execute(
        &self,
        ctx: &WorkerContext<'_>,
        args: &MatmulArgs,
    ) -> std::result::Result<(), DeviceFault> {
        let width = self.tile_width;
        let MatmulDims { m, k, n } = args.dims();
        let (tx, ty) = (ctx.thread_idx().x, ctx.thread_idx().y);
        let col = ctx.block_idx().x * width + tx;
        let row = ctx.block_idx().y * width + ty;

        let shared = ctx.shared();
        let tile_a = 0;
        let tile_b = width * width;
        let slot = ty * width + tx;

        let mut acc = 0.0f32;
        for phase in 0..ceil_div(k, width) {
            let a_col = phase * width + tx;
            let a_val = if row < m && a_col < k {
                args.a().load(row * k + a_col)?
            } else {
                0.0
            };
            shared.store(tile_a + slot, a_val)?;

            let b_row = phase * width + ty;
            let b_val = if b_row < k && col < n {
                args.b().load(b_row * n + col)?
            } else {
                0.0
            };
            shared.store(tile_b + slot, b_val)?;

            ctx.sync_threads()?;

            for i in 0..width {
                let a_elem = shared.load(tile_a + ty * width + i)?;
                let b_elem = shared.load(tile_b + i * width + tx)?;
                acc += a_elem * b_elem;
            }

            ctx.sync_threads()?;
        }

        if row < m && col < n {
            args.c().store(row * n + col, acc)?;
        }
        Ok(())
    }
}
