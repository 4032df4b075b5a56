//! IR optimization passes.
//!
//! This module implements optimizations on the expression-tree IR. Each pass
//! is a self-contained sub-module behind the [`Pass`] trait; [`run_pass`]
//! schedules a pass over a module, processing independent functions on
//! worker threads when the pass allows it.
//!
//! Determinism: within a function, rewrites are applied in a fixed
//! post-order, and functions never share state (each owns its arena), so a
//! run produces identical output regardless of worker count.

use crate::ir::{Function, Module};
use std::time::Instant;

pub mod effects;
pub mod merge_blocks;

pub use merge_blocks::{create_merge_blocks_pass, MergeBlocksPass};

/// Configuration forwarded to passes and the effect analyzer.
#[derive(Debug, Clone, Default)]
pub struct PassOptions {
    /// Treat implicit traps (memory accesses, integer division, indirect
    /// calls) as removable, the way an optimizer that assumes no trapping
    /// would.
    pub ignore_implicit_traps: bool,
}

/// An optimization pass over single functions.
pub trait Pass {
    fn name(&self) -> &'static str;

    /// Whether independent functions may be processed concurrently.
    fn is_function_parallel(&self) -> bool {
        true
    }

    fn run_on_function(&self, options: &PassOptions, func: &mut Function);
}

/// Run a pass over every function in the module, function-parallel when the
/// pass allows it.
pub fn run_pass(module: &mut Module, pass: &(dyn Pass + Sync), options: &PassOptions) {
    let start = Instant::now();
    let n = module.functions.len();
    if n == 0 {
        return;
    }

    let workers = std::thread::available_parallelism()
        .map(|w| w.get())
        .unwrap_or(1)
        .min(n);

    if !pass.is_function_parallel() || workers <= 1 {
        for func in &mut module.functions {
            pass.run_on_function(options, func);
        }
    } else {
        let chunk = n.div_ceil(workers);
        std::thread::scope(|scope| {
            for funcs in module.functions.chunks_mut(chunk) {
                scope.spawn(move || {
                    for func in funcs {
                        pass.run_on_function(options, func);
                    }
                });
            }
        });
    }

    log::debug!(
        "pass {} over {} functions took {:?}",
        pass.name(),
        n,
        start.elapsed()
    );
}

/// Run the standard pass pipeline on a module.
pub fn optimize_module(module: &mut Module, options: &PassOptions) {
    let pass = create_merge_blocks_pass();
    run_pass(module, pass.as_ref(), options);
}
