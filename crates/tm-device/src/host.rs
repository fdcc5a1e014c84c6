use std::fmt;
use std::sync::Arc;

use crate::device::Device;
use crate::error::{DeviceError, Result};
use crate::kernels::{MatmulArgs, MatmulKernel};
use crate::matrix::{MatmulDims, Matrix};

/// The instrumented phases of one multiplication run.
///
/// `Import` belongs to whoever loads the input matrices; the orchestrator
/// covers the other five.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Import,
    DeviceAlloc,
    CopyToDevice,
    Compute,
    CopyToHost,
    DeviceFree,
}

impl Phase {
    pub const ALL: [Phase; 6] = [
        Phase::Import,
        Phase::DeviceAlloc,
        Phase::CopyToDevice,
        Phase::Compute,
        Phase::CopyToHost,
        Phase::DeviceFree,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Import => "import",
            Phase::DeviceAlloc => "device_alloc",
            Phase::CopyToDevice => "copy_to_device",
            Phase::Compute => "compute",
            Phase::CopyToHost => "copy_to_host",
            Phase::DeviceFree => "device_free",
        }
    }

    /// Run `f` inside a `phase` span, logging the failure if it returns an error.
    pub fn run<T, E: fmt::Display>(
        self,
        f: impl FnOnce() -> std::result::Result<T, E>,
    ) -> std::result::Result<T, E> {
        let span = tracing::info_span!("phase", phase = self.as_str());
        let _entered = span.enter();
        tracing::trace!("enter");
        let result = f();
        match &result {
            Ok(_) => tracing::trace!("exit"),
            Err(e) => tracing::error!(error = %e, "phase failed"),
        }
        result
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options for a single host-orchestrated multiplication.
#[derive(Debug, Clone, Default)]
pub struct MatmulOptions {
    /// Allocate C with per-element write counters and fail unless every
    /// element was stored exactly once.
    pub verify_writes: bool,
}

/// Compute `a * b` on `device` with `kernel`.
///
/// Sequence: validate dimensions, allocate the host result, allocate device
/// buffers for A, B and C, copy A and B in, launch, synchronize, copy C out,
/// free the device buffers. The first failing step aborts the run; device
/// buffers acquired before the failure are released on the way out.
pub fn multiply(
    device: &Device,
    kernel: &Arc<dyn MatmulKernel>,
    a: &Matrix,
    b: &Matrix,
    options: &MatmulOptions,
) -> Result<Matrix> {
    let dims = MatmulDims::of(a, b)?;
    let (a_len, b_len, c_len) = dims.lens();
    tracing::debug!(
        kernel = kernel.name(),
        "A is {}x{}, B is {}x{}, C is {}x{}",
        dims.m,
        dims.k,
        dims.k,
        dims.n,
        dims.m,
        dims.n
    );

    let mut host_c = host_alloc(c_len)?;

    let (dev_a, dev_b, dev_c) = Phase::DeviceAlloc.run(|| {
        let dev_a = device.alloc(a_len)?;
        let dev_b = device.alloc(b_len)?;
        let dev_c = if options.verify_writes {
            device.alloc_tracked(c_len)?
        } else {
            device.alloc(c_len)?
        };
        Ok::<_, DeviceError>((dev_a, dev_b, dev_c))
    })?;

    Phase::CopyToDevice.run(|| {
        device.copy_to_device(&dev_a, a.data())?;
        device.copy_to_device(&dev_b, b.data())
    })?;

    let config = kernel.launch_config(dims);
    Phase::Compute.run(|| {
        let args = MatmulArgs::new(dims, &dev_a, &dev_b, &dev_c);
        device.launch(Arc::clone(kernel), config, args)?;
        device.synchronize()
    })?;

    Phase::CopyToHost.run(|| device.copy_to_host(&dev_c, &mut host_c))?;

    if let Some(counts) = dev_c.write_counts() {
        check_coverage(&counts)?;
    }

    Phase::DeviceFree.run(move || {
        drop(dev_a);
        drop(dev_b);
        drop(dev_c);
        Ok::<_, DeviceError>(())
    })?;

    Matrix::new(dims.m, dims.n, host_c)
}

fn host_alloc(len: usize) -> Result<Vec<f32>> {
    let mut data = Vec::new();
    data.try_reserve_exact(len)
        .map_err(|_| DeviceError::HostAllocation {
            bytes: len * std::mem::size_of::<f32>(),
        })?;
    data.resize(len, 0.0);
    Ok(data)
}

fn check_coverage(counts: &[u32]) -> Result<()> {
    match counts.iter().position(|&writes| writes != 1) {
        Some(index) => Err(DeviceError::WriteCoverage {
            index,
            writes: counts[index],
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceConfig;
    use crate::error::DeviceFault;
    use crate::group::WorkerContext;
    use crate::kernels::{KernelKind, NaiveKernel, TiledKernel};
    use crate::launch::LaunchConfig;
    use std::sync::Mutex;
    use tracing::field::{Field, Visit};
    use tracing::span::{Attributes, Id};
    use tracing::Subscriber;
    use tracing_subscriber::layer::{Context, SubscriberExt};
    use tracing_subscriber::Layer;

    fn device() -> Device {
        Device::new(DeviceConfig {
            compute_units: 4,
            ..DeviceConfig::default()
        })
        .unwrap()
    }

    fn sample_a() -> Matrix {
        Matrix::from_rows(&[[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]).unwrap()
    }

    fn sample_b() -> Matrix {
        Matrix::from_rows(&[[7.0, 8.0], [9.0, 10.0], [11.0, 12.0]]).unwrap()
    }

    #[test]
    fn test_multiply_both_kernels() {
        let dev = device();
        for kind in KernelKind::ALL {
            let kernel = kind.build(16).unwrap();
            let c = multiply(&dev, &kernel, &sample_a(), &sample_b(), &MatmulOptions::default())
                .unwrap();
            assert_eq!(c.rows(), 2);
            assert_eq!(c.cols(), 2);
            assert_eq!(c.data(), &[58.0, 64.0, 139.0, 154.0]);
        }
        assert_eq!(dev.allocated_bytes(), 0);
    }

    #[test]
    fn test_dimension_mismatch_before_device_work() {
        let dev = device();
        let kernel = KernelKind::Tiled.build(16).unwrap();
        let err = multiply(&dev, &kernel, &sample_a(), &sample_a(), &MatmulOptions::default())
            .unwrap_err();
        assert!(matches!(err, DeviceError::DimensionMismatch { .. }));
        assert_eq!(dev.allocated_bytes(), 0);
    }

    #[test]
    fn test_allocation_failure_releases_partial_buffers() {
        // Room for A (6 floats) but not for A and B together.
        let dev = Device::new(DeviceConfig {
            memory_bytes: 40,
            ..DeviceConfig::default()
        })
        .unwrap();
        let kernel = KernelKind::Naive.build(16).unwrap();
        let err = multiply(&dev, &kernel, &sample_a(), &sample_b(), &MatmulOptions::default())
            .unwrap_err();
        assert!(matches!(err, DeviceError::OutOfMemory { requested: 24, .. }));
        assert_eq!(dev.allocated_bytes(), 0);
    }

    #[test]
    fn test_launch_failure_releases_buffers() {
        // 64x64 tiles need 4096 workers per group.
        let dev = device();
        let kernel: Arc<dyn MatmulKernel> = Arc::new(TiledKernel::new(64).unwrap());
        let err = multiply(&dev, &kernel, &sample_a(), &sample_b(), &MatmulOptions::default())
            .unwrap_err();
        assert!(matches!(err, DeviceError::Launch { .. }));
        assert_eq!(dev.allocated_bytes(), 0);
    }

    #[test]
    fn test_shared_memory_limit() {
        let dev = Device::new(DeviceConfig {
            max_shared_bytes_per_block: 1024,
            ..DeviceConfig::default()
        })
        .unwrap();
        // 2 * 16 * 16 floats = 2048 bytes.
        let kernel = KernelKind::Tiled.build(16).unwrap();
        let err = multiply(&dev, &kernel, &sample_a(), &sample_b(), &MatmulOptions::default())
            .unwrap_err();
        assert!(matches!(err, DeviceError::Launch { .. }));
    }

    /// Reads one element past the end of A.
    #[derive(Debug)]
    struct OverreadKernel;

    impl MatmulKernel for OverreadKernel {
        fn name(&self) -> &str {
            "overread"
        }

        fn launch_config(&self, dims: MatmulDims) -> LaunchConfig {
            LaunchConfig::covering(dims.m, dims.n, 2, 0)
        }

        fn execute(
            &self,
            _ctx: &WorkerContext<'_>,
            args: &MatmulArgs,
        ) -> std::result::Result<(), DeviceFault> {
            args.a().load(args.a().len())?;
            Ok(())
        }
    }

    #[test]
    fn test_kernel_fault_reported_at_synchronize() {
        let dev = device();
        let kernel: Arc<dyn MatmulKernel> = Arc::new(OverreadKernel);
        let err = multiply(&dev, &kernel, &sample_a(), &sample_b(), &MatmulOptions::default())
            .unwrap_err();
        match err {
            DeviceError::Synchronize { kernel, fault } => {
                assert_eq!(kernel, "overread");
                assert_eq!(fault, DeviceFault::GlobalOutOfBounds { index: 6, len: 6 });
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(dev.allocated_bytes(), 0);
    }

    /// Writes every output element twice.
    #[derive(Debug)]
    struct DoubleStoreKernel(NaiveKernel);

    impl MatmulKernel for DoubleStoreKernel {
        fn name(&self) -> &str {
            "double-store"
        }

        fn launch_config(&self, dims: MatmulDims) -> LaunchConfig {
            self.0.launch_config(dims)
        }

        fn execute(
            &self,
            ctx: &WorkerContext<'_>,
            args: &MatmulArgs,
        ) -> std::result::Result<(), DeviceFault> {
            self.0.execute(ctx, args)?;
            self.0.execute(ctx, args)
        }
    }

    #[test]
    fn test_verify_writes() {
        let dev = device();
        let options = MatmulOptions { verify_writes: true };
        for kind in KernelKind::ALL {
            let kernel = kind.build(16).unwrap();
            assert!(multiply(&dev, &kernel, &sample_a(), &sample_b(), &options).is_ok());
        }

        let kernel: Arc<dyn MatmulKernel> = Arc::new(DoubleStoreKernel(NaiveKernel::default()));
        let err = multiply(&dev, &kernel, &sample_a(), &sample_b(), &options).unwrap_err();
        assert!(matches!(err, DeviceError::WriteCoverage { index: 0, writes: 2 }));
        assert_eq!(dev.allocated_bytes(), 0);
    }

    #[test]
    fn test_matrix_matmul_delegates() {
        let dev = device();
        let kernel = KernelKind::Tiled.build(2).unwrap();
        let c = sample_a().matmul(&sample_b(), &dev, &kernel).unwrap();
        assert_eq!(c.data(), &[58.0, 64.0, 139.0, 154.0]);
    }

    /// Collects the `phase` field of every span created.
    struct PhaseRecorder(Arc<Mutex<Vec<String>>>);

    struct PhaseVisitor(Option<String>);

    impl Visit for PhaseVisitor {
        fn record_str(&mut self, field: &Field, value: &str) {
            if field.name() == "phase" {
                self.0 = Some(value.to_string());
            }
        }

        fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
            if field.name() == "phase" {
                self.0 = Some(format!("{:?}", value).trim_matches('"').to_string());
            }
        }
    }

    impl<S: Subscriber> Layer<S> for PhaseRecorder {
        fn on_new_span(&self, attrs: &Attributes<'_>, _id: &Id, _ctx: Context<'_, S>) {
            let mut visitor = PhaseVisitor(None);
            attrs.record(&mut visitor);
            if let Some(phase) = visitor.0 {
                self.0.lock().unwrap().push(phase);
            }
        }
    }

    #[test]
    fn test_phase_spans_emitted_in_order() {
        let phases = Arc::new(Mutex::new(Vec::new()));
        let subscriber = tracing_subscriber::registry().with(PhaseRecorder(Arc::clone(&phases)));

        tracing::subscriber::with_default(subscriber, || {
            let dev = device();
            let kernel = KernelKind::Tiled.build(16).unwrap();
            multiply(&dev, &kernel, &sample_a(), &sample_b(), &MatmulOptions::default()).unwrap();
        });

        let expected: Vec<String> = Phase::ALL[1..]
            .iter()
            .map(|p| p.as_str().to_string())
            .collect();
        assert_eq!(*phases.lock().unwrap(), expected);
    }

    #[test]
    fn test_check_coverage() {
        assert!(check_coverage(&[1, 1, 1]).is_ok());
        assert!(matches!(
            check_coverage(&[1, 0, 1]),
            Err(DeviceError::WriteCoverage { index: 1, writes: 0 })
        ));
    }
}
