//! `tm-device` - Simulated accelerator and matmul kernels for tilemm.
//!
//! This crate provides:
//! - A `Matrix` type for row-major f32 host data
//! - A `Device` with byte-accounted buffers, an in-order launch stream and
//!   a work-group executor with shared memory and barriers
//! - A `MatmulKernel` trait with `NaiveKernel` and `TiledKernel`
//! - Launch configuration helpers (`Dim3`, `LaunchConfig`)
//! - The host orchestrator (`host::multiply`) and a host reference matmul

pub mod device;
pub mod error;
mod executor;
pub mod group;
pub mod host;
pub mod kernels;
pub mod launch;
pub mod matrix;
pub mod memory;
pub mod reference;

// Re-export primary types at the crate root for convenience.
pub use device::{Device, DeviceConfig};
pub use error::{DeviceError, DeviceFault, Result, TransferDirection};
pub use group::{SharedMemory, WorkerContext};
pub use host::{multiply, MatmulOptions, Phase};
pub use kernels::{KernelKind, MatmulArgs, MatmulKernel, NaiveKernel, TiledKernel, TILE_WIDTH};
pub use launch::{ceil_div, Dim3, LaunchConfig};
pub use matrix::{element_count, MatmulDims, Matrix};
pub use memory::{DeviceBuffer, DeviceMemory};
