// Grid executor for the simulated device.
//
// A launch is spread over the lanes the device grants it (see
// `DeviceConfig::lanes_for`). Each lane owns one persistent host thread per
// worker of a work-group plus the group's shared memory and barrier, and walks the groups `lane, lane + lanes, ...` of the
// linearised grid. Consecutive groups on a lane are separated by the
// barrier's `finish` rendezvous, so no worker starts group g+1 while another
// is still inside group g.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Mutex, PoisonError};
use std::thread;

use crate::error::DeviceFault;
use crate::group::{GroupBarrier, SharedMemory, WorkerContext};
use crate::kernels::{MatmulArgs, MatmulKernel};
use crate::launch::{Dim3, LaunchConfig};

const WORKER_STACK_BYTES: usize = 256 * 1024;

struct Lane {
    id: usize,
    shared: SharedMemory,
    barrier: GroupBarrier,
}

/// First fault raised anywhere in the grid.
#[derive(Default)]
struct FaultSlot(Mutex<Option<DeviceFault>>);

impl FaultSlot {
    fn record(&self, fault: DeviceFault) {
        let mut slot = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(fault);
        }
    }

    fn into_inner(self) -> Option<DeviceFault> {
        self.0.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Run `kernel` over every work-group of `config`, returning the first fault.
pub(crate) fn run_grid(
    kernel: &dyn MatmulKernel,
    config: &LaunchConfig,
    args: &MatmulArgs,
    lanes: usize,
) -> Result<(), DeviceFault> {
    let n_lanes = lanes.min(config.num_groups()).max(1);
    let lanes: Vec<Lane> = (0..n_lanes)
        .map(|id| Lane {
            id,
            shared: SharedMemory::new(config.shared_floats),
            barrier: GroupBarrier::new(config.threads_per_block()),
        })
        .collect();
    let faults = FaultSlot::default();

    thread::scope(|scope| {
        let (lanes, faults) = (&lanes, &faults);
        for lane in lanes {
            for t in 0..config.threads_per_block() {
                let thread_idx = config.block.delinearize(t);
                let spawned = thread::Builder::new()
                    .name(format!("tilemm-lane{}-w{}", lane.id, t))
                    .stack_size(WORKER_STACK_BYTES)
                    .spawn_scoped(scope, move || {
                        run_worker(kernel, config, args, lane, lanes, thread_idx, faults)
                    });
                if let Err(e) = spawned {
                    faults.record(DeviceFault::WorkerSpawn(e.to_string()));
                    poison_all(lanes);
                    return;
                }
            }
        }
    });

    faults.into_inner().map_or(Ok(()), Err)
}

fn run_worker(
    kernel: &dyn MatmulKernel,
    config: &LaunchConfig,
    args: &MatmulArgs,
    lane: &Lane,
    lanes: &[Lane],
    thread_idx: Dim3,
    faults: &FaultSlot,
) {
    let mut group = lane.id;
    while group < config.num_groups() {
        let block_idx = config.grid.delinearize(group);
        let ctx = WorkerContext::new(
            thread_idx,
            block_idx,
            config.block,
            config.grid,
            &lane.shared,
            &lane.barrier,
        );

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| kernel.execute(&ctx, args)))
            .unwrap_or_else(|payload| Err(DeviceFault::WorkerPanic(panic_message(&*payload))))
            .and_then(|()| {
                lane.barrier
                    .finish()
                    .map_err(|broken| broken.into_fault(block_idx))
            });

        if let Err(fault) = outcome {
            if fault != DeviceFault::BarrierAbandoned {
                tracing::debug!(group = %block_idx, thread = %thread_idx, %fault, "worker faulted");
                faults.record(fault);
            }
            poison_all(lanes);
            return;
        }
        group += lanes.len();
    }
}

fn poison_all(lanes: &[Lane]) {
    for lane in lanes {
        lane.barrier.poison();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
