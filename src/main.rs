use anyhow::{Context, Result};
use clap::Parser;
use silva::{process, Options};
use std::fs;
use std::path::PathBuf;

/// silva — structured-IR optimizer for WebAssembly modules.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Input WebAssembly binary (.wasm)
    input: PathBuf,

    /// Output file for the IR dump
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// Parse and print without running the optimizer
    #[arg(long)]
    no_optimize: bool,

    /// Let the optimizer assume memory accesses and division never trap
    #[arg(long)]
    ignore_implicit_traps: bool,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    eprintln!(
        "silva: processing {} (optimize={})",
        cli.input.display(),
        !cli.no_optimize,
    );

    let wasm_bytes =
        fs::read(&cli.input).with_context(|| format!("failed to read {}", cli.input.display()))?;

    let options = Options {
        optimize: !cli.no_optimize,
        ignore_implicit_traps: cli.ignore_implicit_traps,
    };

    let dump = process(&wasm_bytes, &options).context("processing failed")?;

    if let Some(output_path) = cli.output {
        fs::write(&output_path, &dump)
            .with_context(|| format!("failed to write {}", output_path.display()))?;
        eprintln!("silva: wrote {}", output_path.display());
    } else {
        print!("{}", dump);
    }

    Ok(())
}
