//! silva — structured-IR optimizer for WebAssembly.
//!
//! This crate parses a WebAssembly module into an expression-tree IR,
//! merges and flattens its blocks, and prints the optimized IR as a
//! wat-flavored dump.

pub mod ir;
pub mod optimizer;
pub mod parser;
pub mod printer;

// Re-export key types for convenience
pub use anyhow::{Context, Result};
use ir::build_module;
use optimizer::{optimize_module, PassOptions};
use parser::parse_wasm;

/// Configuration options for the pipeline
#[derive(Debug, Clone)]
pub struct Options {
    /// Run the optimizer (off = parse and print only)
    pub optimize: bool,
    /// Let passes assume memory accesses and division never trap
    pub ignore_implicit_traps: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            optimize: true,
            ignore_implicit_traps: false,
        }
    }
}

/// Process a WebAssembly module: parse, optimize, print.
///
/// This is the main entry point for the pipeline. It takes raw WASM bytes
/// and returns the optimized IR as text.
///
/// # Example
/// ```no_run
/// use silva::{process, Options};
///
/// let wasm_bytes = std::fs::read("input.wasm").unwrap();
/// let dump = process(&wasm_bytes, &Options::default()).unwrap();
/// println!("{}", dump);
/// ```
pub fn process(wasm_bytes: &[u8], options: &Options) -> Result<String> {
    // Parse the WebAssembly binary
    let parsed = parse_wasm(wasm_bytes).context("failed to parse WebAssembly module")?;

    // Build the expression-tree IR
    let mut module = build_module(&parsed).context("failed to build module IR")?;

    if options.optimize {
        let pass_options = PassOptions {
            ignore_implicit_traps: options.ignore_implicit_traps,
        };
        optimize_module(&mut module, &pass_options);
    }

    Ok(printer::print_module(&module))
}
