use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use clap::{ArgAction, Parser, ValueEnum};
use tm_device::{
    multiply, Device, DeviceConfig, KernelKind, MatmulKernel, MatmulOptions, Matrix, Phase,
    TILE_WIDTH,
};
use tm_io::{Dataset, Tolerance};

use tm_cli::{logging, CliError, Result};

#[derive(Parser, Debug)]
#[command(
    name = "tilemm",
    version,
    about = "Multiply two raw matrices on the simulated device",
    long_about = "Multiply two raw matrices on the simulated device with the naive \
                  and/or tiled shared-memory kernel, timing each phase.\n\n\
                  If no --expected file is given, `output.raw` next to A is used \
                  when it exists."
)]
struct Cli {
    /// Raw file holding A (m x k)
    a: PathBuf,
    /// Raw file holding B (k x n)
    b: PathBuf,
    /// Raw file holding the expected product C (m x n)
    #[arg(short, long)]
    expected: Option<PathBuf>,
    /// Write the computed product to this raw file
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Kernel to run
    #[arg(long, value_enum, default_value_t = KernelChoice::Tiled)]
    kernel: KernelChoice,
    /// Tile width (tiled) or block width (naive)
    #[arg(long, default_value_t = TILE_WIDTH)]
    tile_width: usize,
    /// Work-groups executed concurrently [default: available parallelism]
    #[arg(long)]
    compute_units: Option<usize>,
    /// Cap on worker threads alive at once across all work-groups
    #[arg(long)]
    max_worker_threads: Option<usize>,
    /// Device memory pool size in MiB
    #[arg(long, default_value_t = 1024)]
    device_memory_mib: usize,
    /// Fail unless every output element is written exactly once
    #[arg(long)]
    verify_writes: bool,
    /// More logging (-v debug, -vv trace); RUST_LOG overrides
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
    /// Only log errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum KernelChoice {
    Naive,
    Tiled,
    /// Run both and compare the results
    Both,
}

impl KernelChoice {
    fn kinds(self) -> &'static [KernelKind] {
        match self {
            KernelChoice::Naive => &[KernelKind::Naive],
            KernelChoice::Tiled => &[KernelKind::Tiled],
            KernelChoice::Both => &KernelKind::ALL,
        }
    }
}

fn device_config(cli: &Cli) -> Result<DeviceConfig> {
    let memory_bytes = cli
        .device_memory_mib
        .checked_mul(1 << 20)
        .ok_or_else(|| CliError::InvalidArgument("device memory size overflows".to_string()))?;
    let mut config = DeviceConfig {
        memory_bytes,
        ..DeviceConfig::default()
    };
    if let Some(units) = cli.compute_units {
        config.compute_units = units;
    }
    if let Some(threads) = cli.max_worker_threads {
        config.max_worker_threads = threads;
    }
    Ok(config)
}

fn run(cli: &Cli) -> Result<()> {
    let mut dataset = Dataset::for_inputs(&cli.a, &cli.b);
    if let Some(expected) = &cli.expected {
        dataset = dataset.with_expected(expected);
    }

    let (a, b, expected) = Phase::Import.run(|| {
        let (a, b) = dataset.load_inputs()?;
        let expected = dataset.load_expected()?;
        Ok::<_, tm_io::DataError>((a, b, expected))
    })?;
    tracing::info!(m = a.rows(), k = a.cols(), n = b.cols(), "imported inputs");

    let device = Device::new(device_config(cli)?)?;
    let options = MatmulOptions {
        verify_writes: cli.verify_writes,
    };

    let mut results: Vec<(KernelKind, Matrix)> = Vec::new();
    for &kind in cli.kernel.kinds() {
        let kernel: Arc<dyn MatmulKernel> = kind.build(cli.tile_width)?;
        let span = tracing::info_span!("kernel", name = kernel.name());
        let _entered = span.enter();

        let start = Instant::now();
        let c = multiply(&device, &kernel, &a, &b, &options)?;
        tracing::info!(
            elapsed_ms = start.elapsed().as_secs_f64() * 1e3,
            "multiplication done"
        );
        results.push((kind, c));
    }

    if let [(_, naive), (_, tiled)] = results.as_slice() {
        tm_io::check(tiled, naive, Tolerance::default()).map_err(CliError::KernelDisagreement)?;
        tracing::info!("naive and tiled results agree");
    }

    let Some((kind, c)) = results.last() else {
        return Ok(());
    };
    match &expected {
        Some(expected) => {
            tm_io::check(c, expected, Tolerance::default())?;
            println!(
                "{}: {}x{} product matches the expected output",
                kind,
                c.rows(),
                c.cols()
            );
        }
        None => println!("{}: computed {}x{} product", kind, c.rows(), c.cols()),
    }

    if let Some(path) = &cli.output {
        tm_io::export(path, c)?;
        tracing::info!(path = %path.display(), "wrote product");
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.quiet);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("tilemm: {}", e);
            ExitCode::FAILURE
        }
    }
}
