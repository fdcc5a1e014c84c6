use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use crate::error::DeviceFault;
use crate::launch::Dim3;

/// Group-scoped scratch memory, the simulated equivalent of on-chip shared
/// memory. Every worker of a work-group sees the same cells.
#[derive(Debug)]
pub struct SharedMemory {
    cells: Box<[AtomicU32]>,
}

impl SharedMemory {
    pub fn new(len: usize) -> Self {
        SharedMemory {
            cells: (0..len).map(|_| AtomicU32::new(0)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn load(&self, index: usize) -> Result<f32, DeviceFault> {
        self.cells
            .get(index)
            .map(|cell| f32::from_bits(cell.load(Ordering::Relaxed)))
            .ok_or(DeviceFault::SharedOutOfBounds {
                index,
                len: self.cells.len(),
            })
    }

    pub fn store(&self, index: usize, value: f32) -> Result<(), DeviceFault> {
        let cell = self.cells.get(index).ok_or(DeviceFault::SharedOutOfBounds {
            index,
            len: self.cells.len(),
        })?;
        cell.store(value.to_bits(), Ordering::Relaxed);
        Ok(())
    }
}

/// Why a barrier stopped admitting workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BarrierBreak {
    /// Some workers reached `sync` while others had already finished.
    Divergent,
    /// A fault elsewhere poisoned the barrier.
    Abandoned,
}

impl BarrierBreak {
    pub(crate) fn into_fault(self, group: Dim3) -> DeviceFault {
        match self {
            BarrierBreak::Divergent => DeviceFault::BarrierDivergence { group },
            BarrierBreak::Abandoned => DeviceFault::BarrierAbandoned,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Arrival {
    Sync,
    Finish,
}

#[derive(Debug, Default)]
struct BarrierState {
    synced: usize,
    finished: usize,
    generation: u64,
    broken: Option<BarrierBreak>,
}

/// Rendezvous point for the workers of one work-group.
///
/// Workers arrive either through `sync` (an explicit barrier inside the
/// kernel) or through `finish` (the implicit end of a work-group). A
/// rendezvous completes once every worker has arrived; if the arrivals are
/// a mix of both kinds, some worker skipped a barrier the others reached
/// and the barrier breaks with `Divergent`. A broken barrier never blocks
/// again: every current and future arrival fails immediately.
#[derive(Debug)]
pub(crate) struct GroupBarrier {
    parties: usize,
    state: Mutex<BarrierState>,
    cvar: Condvar,
}

impl GroupBarrier {
    pub(crate) fn new(parties: usize) -> Self {
        GroupBarrier {
            parties,
            state: Mutex::new(BarrierState::default()),
            cvar: Condvar::new(),
        }
    }

    pub(crate) fn sync(&self) -> Result<(), BarrierBreak> {
        self.arrive(Arrival::Sync)
    }

    pub(crate) fn finish(&self) -> Result<(), BarrierBreak> {
        self.arrive(Arrival::Finish)
    }

    /// Break the barrier, releasing every waiting worker.
    pub(crate) fn poison(&self) {
        let mut state = self.lock();
        if state.broken.is_none() {
            state.broken = Some(BarrierBreak::Abandoned);
        }
        self.cvar.notify_all();
    }

    fn lock(&self) -> MutexGuard<'_, BarrierState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn arrive(&self, arrival: Arrival) -> Result<(), BarrierBreak> {
        let mut state = self.lock();
        if let Some(broken) = state.broken {
            return Err(broken);
        }
        match arrival {
            Arrival::Sync => state.synced += 1,
            Arrival::Finish => state.finished += 1,
        }

        if state.synced + state.finished == self.parties {
            if state.synced > 0 && state.finished > 0 {
                state.broken = Some(BarrierBreak::Divergent);
                self.cvar.notify_all();
                return Err(BarrierBreak::Divergent);
            }
            state.synced = 0;
            state.finished = 0;
            state.generation = state.generation.wrapping_add(1);
            self.cvar.notify_all();
            return Ok(());
        }

        let generation = state.generation;
        while state.generation == generation && state.broken.is_none() {
            state = self
                .cvar
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        if state.generation != generation {
            return Ok(());
        }
        state.broken.map_or(Ok(()), Err)
    }
}

/// Everything one worker can see while executing a kernel: its position in
/// the launch, the group's shared memory and the group's barrier.
#[derive(Debug)]
pub struct WorkerContext<'g> {
    thread_idx: Dim3,
    block_idx: Dim3,
    block_dim: Dim3,
    grid_dim: Dim3,
    shared: &'g SharedMemory,
    barrier: &'g GroupBarrier,
}

impl<'g> WorkerContext<'g> {
    pub(crate) fn new(
        thread_idx: Dim3,
        block_idx: Dim3,
        block_dim: Dim3,
        grid_dim: Dim3,
        shared: &'g SharedMemory,
        barrier: &'g GroupBarrier,
    ) -> Self {
        WorkerContext {
            thread_idx,
            block_idx,
            block_dim,
            grid_dim,
            shared,
            barrier,
        }
    }

    pub fn thread_idx(&self) -> Dim3 {
        self.thread_idx
    }

    pub fn block_idx(&self) -> Dim3 {
        self.block_idx
    }

    pub fn block_dim(&self) -> Dim3 {
        self.block_dim
    }

    pub fn grid_dim(&self) -> Dim3 {
        self.grid_dim
    }

    pub fn shared(&self) -> &SharedMemory {
        self.shared
    }

    /// Block until every worker of this work-group reaches the same barrier.
    ///
    /// Every worker must call this the same number of times per group.
    /// Skipping a barrier that others reach is reported as
    /// `DeviceFault::BarrierDivergence`.
    pub fn sync_threads(&self) -> Result<(), DeviceFault> {
        self.barrier
            .sync()
            .map_err(|broken| broken.into_fault(self.block_idx))
    }
}
