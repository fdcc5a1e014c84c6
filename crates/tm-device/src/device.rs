use std::sync::{mpsc, Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use crate::error::{DeviceError, DeviceFault, Result, TransferDirection};
use crate::executor;
use crate::kernels::{MatmulArgs, MatmulKernel};
use crate::launch::LaunchConfig;
use crate::memory::{DeviceBuffer, MemoryLedger};

/// Limits of the simulated accelerator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Size of the device memory pool in bytes.
    pub memory_bytes: usize,
    /// Number of work-groups that may execute concurrently.
    pub compute_units: usize,
    /// Maximum number of workers in one work-group.
    pub max_threads_per_block: usize,
    /// Maximum shared memory per work-group in bytes.
    pub max_shared_bytes_per_block: usize,
    /// Upper bound on worker threads alive during one launch, summed over
    /// all lanes. Large blocks get fewer concurrent lanes.
    pub max_worker_threads: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            memory_bytes: 1 << 30,
            compute_units: thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            max_threads_per_block: 1024,
            max_shared_bytes_per_block: 48 * 1024,
            max_worker_threads: 4096,
        }
    }
}

impl DeviceConfig {
    fn validate(&self) -> Result<()> {
        if self.compute_units == 0 {
            return Err(DeviceError::InvalidConfig(
                "compute_units must be > 0".to_string(),
            ));
        }
        if self.max_threads_per_block == 0 {
            return Err(DeviceError::InvalidConfig(
                "max_threads_per_block must be > 0".to_string(),
            ));
        }
        if self.max_worker_threads < self.max_threads_per_block {
            return Err(DeviceError::InvalidConfig(format!(
                "max_worker_threads ({}) must hold at least one block of {} workers",
                self.max_worker_threads, self.max_threads_per_block
            )));
        }
        Ok(())
    }

    /// Number of executor lanes used for `launch`.
    ///
    /// Bounded by `compute_units`, by the number of work-groups and by how
    /// many whole blocks fit in `max_worker_threads`; never less than one.
    pub fn lanes_for(&self, launch: &LaunchConfig) -> usize {
        let blocks_in_budget = self.max_worker_threads / launch.threads_per_block().max(1);
        self.compute_units
            .min(blocks_in_budget)
            .min(launch.num_groups())
            .max(1)
    }
}

/// A kernel waiting on the stream thread.
struct StreamTask {
    kernel: Arc<dyn MatmulKernel>,
    config: LaunchConfig,
    args: MatmulArgs,
    done: mpsc::Sender<std::result::Result<(), DeviceFault>>,
}

struct PendingLaunch {
    kernel: String,
    done: mpsc::Receiver<std::result::Result<(), DeviceFault>>,
}

/// A simulated accelerator: a byte-accounted memory pool plus an in-order
/// launch stream whose kernels run on host threads.
///
/// `launch` returns as soon as the kernel is enqueued; `synchronize` blocks
/// until every enqueued kernel has completed and reports the first fault.
/// Copies between host and device drain the stream first, so a copy never
/// observes a half-finished kernel.
pub struct Device {
    config: DeviceConfig,
    ledger: Arc<MemoryLedger>,
    tx: Option<mpsc::Sender<StreamTask>>,
    stream: Option<JoinHandle<()>>,
    pending: Mutex<Vec<PendingLaunch>>,
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("config", &self.config)
            .field("allocated_bytes", &self.allocated_bytes())
            .finish()
    }
}

impl Device {
    /// Create a device with the given limits and start its launch stream.
    pub fn new(config: DeviceConfig) -> Result<Self> {
        config.validate()?;

        let (tx, rx) = mpsc::channel::<StreamTask>();
        let limits = config.clone();
        let stream = thread::Builder::new()
            .name("tilemm-stream".to_string())
            .spawn(move || {
                for task in rx.iter() {
                    let outcome = executor::run_grid(
                        task.kernel.as_ref(),
                        &task.config,
                        &task.args,
                        limits.lanes_for(&task.config),
                    );
                    // The host may have stopped waiting (device dropped).
                    let _ = task.done.send(outcome);
                }
            })
            .map_err(|e| DeviceError::StreamStart(e.to_string()))?;

        tracing::debug!(
            memory_bytes = config.memory_bytes,
            compute_units = config.compute_units,
            max_worker_threads = config.max_worker_threads,
            "created device"
        );
        Ok(Device {
            ledger: Arc::new(MemoryLedger::new(config.memory_bytes)),
            config,
            tx: Some(tx),
            stream: Some(stream),
            pending: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Bytes currently allocated from the device pool.
    pub fn allocated_bytes(&self) -> usize {
        self.ledger.used()
    }

    /// Allocate a zero-filled buffer of `len` f32 elements.
    pub fn alloc(&self, len: usize) -> Result<DeviceBuffer> {
        self.alloc_inner(len, false)
    }

    /// Allocate a buffer that also counts how often each element is stored to.
    ///
    /// Tracked buffers are charged twice their data size.
    pub fn alloc_tracked(&self, len: usize) -> Result<DeviceBuffer> {
        self.alloc_inner(len, true)
    }

    fn alloc_inner(&self, len: usize, track_writes: bool) -> Result<DeviceBuffer> {
        let buf = DeviceBuffer::allocate(&self.ledger, len, track_writes)?;
        tracing::debug!(
            len,
            bytes = buf.bytes(),
            used = self.ledger.used(),
            track_writes,
            "allocated device buffer"
        );
        Ok(buf)
    }

    /// Copy `src` from host memory into `dst`.
    pub fn copy_to_device(&self, dst: &DeviceBuffer, src: &[f32]) -> Result<()> {
        self.drain()?;
        check_transfer(TransferDirection::HostToDevice, dst.len(), src.len())?;
        dst.upload(src);
        Ok(())
    }

    /// Copy `src` from device memory into `dst`.
    pub fn copy_to_host(&self, src: &DeviceBuffer, dst: &mut [f32]) -> Result<()> {
        self.drain()?;
        check_transfer(TransferDirection::DeviceToHost, src.len(), dst.len())?;
        src.download(dst);
        Ok(())
    }

    /// Enqueue `kernel` on the launch stream.
    ///
    /// The launch is validated against the device limits and the kernel's
    /// own requirements before anything runs; a rejected launch enqueues
    /// nothing. Faults raised while the kernel runs are reported by the next
    /// `synchronize` (or by the next copy).
    pub fn launch(
        &self,
        kernel: Arc<dyn MatmulKernel>,
        config: LaunchConfig,
        args: MatmulArgs,
    ) -> Result<()> {
        let name = kernel.name().to_string();
        let reject = |reason: String| DeviceError::Launch {
            kernel: name.clone(),
            reason,
        };

        if config.grid.is_empty() || config.block.is_empty() {
            return Err(reject(format!(
                "empty launch: grid {} block {}",
                config.grid, config.block
            )));
        }
        if config.threads_per_block() > self.config.max_threads_per_block {
            return Err(reject(format!(
                "{} threads per block exceeds the device limit of {}",
                config.threads_per_block(),
                self.config.max_threads_per_block
            )));
        }
        if config.shared_bytes() > self.config.max_shared_bytes_per_block {
            return Err(reject(format!(
                "{} bytes of shared memory exceeds the device limit of {}",
                config.shared_bytes(),
                self.config.max_shared_bytes_per_block
            )));
        }
        args.check_lengths().map_err(reject)?;
        kernel.validate(&config).map_err(reject)?;

        tracing::debug!(
            kernel = %name,
            grid = %config.grid,
            block = %config.block,
            shared_bytes = config.shared_bytes(),
            "launching kernel"
        );

        let (done, done_rx) = mpsc::channel();
        let task = StreamTask {
            kernel,
            config,
            args,
            done,
        };
        self.tx
            .as_ref()
            .ok_or_else(|| reject("device stream is closed".to_string()))?
            .send(task)
            .map_err(|_| reject("device stream is closed".to_string()))?;

        self.lock_pending().push(PendingLaunch {
            kernel: name,
            done: done_rx,
        });
        Ok(())
    }

    /// Block until every enqueued kernel has finished.
    ///
    /// # Errors
    /// Returns `DeviceError::Synchronize` carrying the first fault raised by
    /// a kernel since the last synchronization.
    pub fn synchronize(&self) -> Result<()> {
        self.drain()
    }

    fn drain(&self) -> Result<()> {
        let pending = std::mem::take(&mut *self.lock_pending());
        let mut first_error = None;
        for launch in pending {
            let fault = match launch.done.recv() {
                Ok(Ok(())) => continue,
                Ok(Err(fault)) => fault,
                Err(_) => DeviceFault::StreamTerminated,
            };
            tracing::debug!(kernel = %launch.kernel, %fault, "kernel faulted");
            first_error.get_or_insert(DeviceError::Synchronize {
                kernel: launch.kernel,
                fault,
            });
        }
        first_error.map_or(Ok(()), Err)
    }

    fn lock_pending(&self) -> MutexGuard<'_, Vec<PendingLaunch>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        if let Err(e) = self.drain() {
            tracing::warn!(error = %e, "unsynchronized kernel fault at device teardown");
        }
        // Closing the channel ends the stream thread's loop.
        self.tx.take();
        if let Some(stream) = self.stream.take() {
            if stream.join().is_err() {
                tracing::warn!("device stream thread panicked");
            }
        }
    }
}

fn check_transfer(direction: TransferDirection, device_len: usize, host_len: usize) -> Result<()> {
    if device_len != host_len {
        return Err(DeviceError::Transfer {
            direction,
            reason: format!(
                "device buffer holds {} elements, host buffer holds {}",
                device_len, host_len
            ),
        });
    }
    Ok(())
}
