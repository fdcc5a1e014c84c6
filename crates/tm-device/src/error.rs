use std::fmt;

use thiserror::Error;

use crate::launch::Dim3;

/// Direction of a host/device copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    HostToDevice,
    DeviceToHost,
}

impl fmt::Display for TransferDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferDirection::HostToDevice => write!(f, "host-to-device"),
            TransferDirection::DeviceToHost => write!(f, "device-to-host"),
        }
    }
}

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("matmul dimension mismatch: [{a_rows}x{a_cols}] @ [{b_rows}x{b_cols}]")]
    DimensionMismatch {
        a_rows: usize,
        a_cols: usize,
        b_rows: usize,
        b_cols: usize,
    },
    #[error("empty matrix: {rows}x{cols}")]
    EmptyMatrix { rows: usize, cols: usize },
    #[error("matrix dimensions {rows}x{cols} overflow the address space")]
    DimensionOverflow { rows: usize, cols: usize },
    #[error("data length {len} does not match a {rows}x{cols} matrix")]
    DataLength { len: usize, rows: usize, cols: usize },
    #[error("invalid tile width: {0}")]
    InvalidTileWidth(usize),
    #[error("invalid device config: {0}")]
    InvalidConfig(String),
    #[error("failed to start device stream: {0}")]
    StreamStart(String),
    #[error("device out of memory: requested {requested} bytes, {available} available")]
    OutOfMemory { requested: usize, available: usize },
    #[error("host allocation of {bytes} bytes failed")]
    HostAllocation { bytes: usize },
    #[error("{direction} transfer failed: {reason}")]
    Transfer {
        direction: TransferDirection,
        reason: String,
    },
    #[error("failed to launch kernel '{kernel}': {reason}")]
    Launch { kernel: String, reason: String },
    #[error("kernel '{kernel}' faulted: {fault}")]
    Synchronize { kernel: String, fault: DeviceFault },
    #[error("output element {index} written {writes} times, expected exactly once")]
    WriteCoverage { index: usize, writes: u32 },
}

/// A fault raised while a kernel is running on the device.
///
/// Faults never escape a worker directly. They are collected by the
/// executor and reported by `Device::synchronize`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeviceFault {
    #[error("global memory access out of bounds: index {index}, length {len}")]
    GlobalOutOfBounds { index: usize, len: usize },
    #[error("shared memory access out of bounds: index {index}, length {len}")]
    SharedOutOfBounds { index: usize, len: usize },
    #[error("barrier divergence in work-group {group}")]
    BarrierDivergence { group: Dim3 },
    #[error("work-group barrier abandoned after a fault elsewhere")]
    BarrierAbandoned,
    #[error("worker panicked: {0}")]
    WorkerPanic(String),
    #[error("failed to spawn worker thread: {0}")]
    WorkerSpawn(String),
    #[error("device stream terminated before the kernel completed")]
    StreamTerminated,
}

pub type Result<T> = std::result::Result<T, DeviceError>;
