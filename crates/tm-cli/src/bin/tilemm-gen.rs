use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser};
use tm_cli::logging;

/// Write a random matmul dataset (`input0.raw`, `input1.raw`, `output.raw`).
#[derive(Parser, Debug)]
#[command(name = "tilemm-gen", version)]
struct Args {
    /// Rows of A and C
    #[arg(long)]
    rows: usize,
    /// Columns of A and rows of B
    #[arg(long)]
    inner: usize,
    /// Columns of B and C
    #[arg(long)]
    cols: usize,
    /// Seed for the random inputs
    #[arg(long, default_value_t = 0)]
    seed: u64,
    /// More logging (-v debug, -vv trace); RUST_LOG overrides
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
    /// Output directory, created if missing
    dir: PathBuf,
}

fn main() -> ExitCode {
    let args = Args::parse();
    logging::init(args.verbose, false);

    match tm_io::generate(&args.dir, args.rows, args.inner, args.cols, args.seed) {
        Ok(dataset) => {
            println!("wrote {}", args.dir.display());
            tracing::debug!(?dataset, "dataset paths");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("tilemm-gen: {}", e);
            ExitCode::FAILURE
        }
    }
}
