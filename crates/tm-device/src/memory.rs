use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::{DeviceError, DeviceFault, Result};

const F32_BYTES: usize = std::mem::size_of::<f32>();

/// Byte accounting for a device's memory pool.
#[derive(Debug)]
pub struct MemoryLedger {
    capacity: usize,
    used: AtomicUsize,
}

impl MemoryLedger {
    pub fn new(capacity: usize) -> Self {
        MemoryLedger {
            capacity,
            used: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn used(&self) -> usize {
        self.used.load(Ordering::Acquire)
    }

    /// Reserve `bytes` from the pool.
    ///
    /// # Errors
    /// Returns `OutOfMemory` if fewer than `bytes` remain.
    pub fn reserve(&self, bytes: usize) -> Result<()> {
        self.used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(bytes).filter(|&total| total <= self.capacity)
            })
            .map(|_| ())
            .map_err(|used| DeviceError::OutOfMemory {
                requested: bytes,
                available: self.capacity.saturating_sub(used),
            })
    }

    /// Return `bytes` to the pool.
    pub fn release(&self, bytes: usize) {
        self.used.fetch_sub(bytes, Ordering::AcqRel);
    }
}

/// Device-resident f32 cells.
///
/// Every access is bounds-checked: a kernel reading or writing outside the
/// allocation gets a `DeviceFault` instead of touching foreign memory.
/// Cells are stored as raw bits in atomics so that workers on different
/// threads can share one allocation; ordering between workers comes from
/// barriers and from the launch/synchronize handshake.
#[derive(Debug)]
pub struct DeviceMemory {
    cells: Box<[AtomicU32]>,
    writes: Option<Box<[AtomicU32]>>,
    bytes: usize,
    ledger: Arc<MemoryLedger>,
}

impl DeviceMemory {
    /// Number of f32 cells.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Read the cell at `index`.
    pub fn load(&self, index: usize) -> std::result::Result<f32, DeviceFault> {
        self.cells
            .get(index)
            .map(|cell| f32::from_bits(cell.load(Ordering::Relaxed)))
            .ok_or(DeviceFault::GlobalOutOfBounds {
                index,
                len: self.cells.len(),
            })
    }

    /// Write `value` to the cell at `index`.
    pub fn store(&self, index: usize, value: f32) -> std::result::Result<(), DeviceFault> {
        let cell = self.cells.get(index).ok_or(DeviceFault::GlobalOutOfBounds {
            index,
            len: self.cells.len(),
        })?;
        cell.store(value.to_bits(), Ordering::Relaxed);
        if let Some(writes) = &self.writes {
            writes[index].fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    fn fill_from(&self, src: &[f32]) {
        for (cell, v) in self.cells.iter().zip(src) {
            cell.store(v.to_bits(), Ordering::Relaxed);
        }
    }

    fn read_into(&self, dst: &mut [f32]) {
        for (v, cell) in dst.iter_mut().zip(self.cells.iter()) {
            *v = f32::from_bits(cell.load(Ordering::Relaxed));
        }
    }
}

impl Drop for DeviceMemory {
    fn drop(&mut self) {
        self.ledger.release(self.bytes);
        tracing::trace!(
            bytes = self.bytes,
            used = self.ledger.used(),
            "released device buffer"
        );
    }
}

/// Owning handle to a device allocation.
///
/// The allocation is returned to the device pool when the last reference is
/// dropped. A kernel that is still running holds its own reference, so
/// dropping a handle mid-launch cannot free memory under a worker.
#[derive(Debug)]
pub struct DeviceBuffer {
    memory: Arc<DeviceMemory>,
}

impl DeviceBuffer {
    pub(crate) fn allocate(
        ledger: &Arc<MemoryLedger>,
        len: usize,
        track_writes: bool,
    ) -> Result<Self> {
        let per_element = F32_BYTES * if track_writes { 2 } else { 1 };
        let bytes = len
            .checked_mul(per_element)
            .ok_or(DeviceError::OutOfMemory {
                requested: usize::MAX,
                available: ledger.capacity().saturating_sub(ledger.used()),
            })?;
        ledger.reserve(bytes)?;
        let cells = zeroed_cells(len);
        let writes = if track_writes {
            zeroed_cells(len).map(Some)
        } else {
            Some(None)
        };
        let (Some(cells), Some(writes)) = (cells, writes) else {
            ledger.release(bytes);
            return Err(DeviceError::OutOfMemory {
                requested: bytes,
                available: ledger.capacity().saturating_sub(ledger.used()),
            });
        };
        Ok(DeviceBuffer {
            memory: Arc::new(DeviceMemory {
                cells,
                writes,
                bytes,
                ledger: Arc::clone(ledger),
            }),
        })
    }

    /// Number of f32 elements.
    pub fn len(&self) -> usize {
        self.memory.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memory.is_empty()
    }

    /// Bytes charged against the device pool for this buffer.
    pub fn bytes(&self) -> usize {
        self.memory.bytes
    }

    /// Per-element store counts, if the buffer was allocated tracked.
    pub fn write_counts(&self) -> Option<Vec<u32>> {
        self.memory
            .writes
            .as_ref()
            .map(|w| w.iter().map(|c| c.load(Ordering::Acquire)).collect())
    }

    pub(crate) fn memory(&self) -> &Arc<DeviceMemory> {
        &self.memory
    }

    pub(crate) fn upload(&self, src: &[f32]) {
        self.memory.fill_from(src);
    }

    pub(crate) fn download(&self, dst: &mut [f32]) {
        self.memory.read_into(dst);
    }
}

fn zeroed_cells(len: usize) -> Option<Box<[AtomicU32]>> {
    let mut cells = Vec::new();
    cells.try_reserve_exact(len).ok()?;
    cells.extend((0..len).map(|_| AtomicU32::new(0)));
    Some(cells.into_boxed_slice())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger(capacity: usize) -> Arc<MemoryLedger> {
        Arc::new(MemoryLedger::new(capacity))
    }

    #[test]
    fn test_reserve_and_release() {
        let l = ledger(100);
        l.reserve(60).unwrap();
        assert_eq!(l.used(), 60);
        assert!(matches!(
            l.reserve(50),
            Err(DeviceError::OutOfMemory { requested: 50, available: 40 })
        ));
        l.release(60);
        assert_eq!(l.used(), 0);
    }

    #[test]
    fn test_buffer_released_on_drop() {
        let l = ledger(1024);
        let buf = DeviceBuffer::allocate(&l, 16, false).unwrap();
        assert_eq!(buf.bytes(), 64);
        assert_eq!(l.used(), 64);
        drop(buf);
        assert_eq!(l.used(), 0);
    }

    #[test]
    fn test_tracked_buffer_costs_double() {
        let l = ledger(1024);
        let buf = DeviceBuffer::allocate(&l, 16, true).unwrap();
        assert_eq!(l.used(), 128);
        assert_eq!(buf.write_counts(), Some(vec![0; 16]));
    }

    #[test]
    fn test_allocation_over_capacity() {
        let l = ledger(32);
        assert!(DeviceBuffer::allocate(&l, 9, false).is_err());
        assert_eq!(l.used(), 0);
    }

    #[test]
    fn test_load_store_bounds() {
        let l = ledger(1024);
        let buf = DeviceBuffer::allocate(&l, 4, true).unwrap();
        let mem = buf.memory();
        mem.store(3, 2.5).unwrap();
        assert_eq!(mem.load(3).unwrap(), 2.5);
        assert_eq!(
            mem.store(4, 1.0),
            Err(DeviceFault::GlobalOutOfBounds { index: 4, len: 4 })
        );
        assert_eq!(
            mem.load(7),
            Err(DeviceFault::GlobalOutOfBounds { index: 7, len: 4 })
        );
        assert_eq!(buf.write_counts(), Some(vec![0, 0, 0, 1]));
    }

    #[test]
    fn test_upload_download() {
        let l = ledger(1024);
        let buf = DeviceBuffer::allocate(&l, 3, false).unwrap();
        buf.upload(&[1.0, -2.0, 3.5]);
        let mut out = vec![0.0; 3];
        buf.download(&mut out);
        assert_eq!(out, vec![1.0, -2.0, 3.5]);
    }
}
