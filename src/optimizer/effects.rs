//! Effect analysis for expression subtrees.
//!
//! Passes ask two questions before reordering code: "does this subtree have
//! side effects?" and "do the effects of an earlier expression invalidate
//! moving this one across it?". [`analyze`] walks a subtree once and collects
//! everything both answers need into an [`Effects`] summary.
//!
//! The [`EffectOracle`] trait is the seam the passes consume; the default
//! implementation simply runs [`analyze`]. Tests substitute their own
//! oracles to pin down boundary behavior.

use super::PassOptions;
use crate::ir::{for_each_child, Expr, ExprId, ExprKind};
use id_arena::Arena;
use std::collections::HashSet;

/// Summary of what a subtree reads, writes, and may do to control flow.
#[derive(Debug, Default, Clone)]
pub struct Effects {
    /// Contains a break, switch, return, or trap instruction.
    pub branches: bool,
    /// Contains a call; calls may read and write anything.
    pub calls: bool,
    pub reads_memory: bool,
    pub writes_memory: bool,
    pub locals_read: HashSet<u32>,
    pub locals_written: HashSet<u32>,
    pub globals_read: HashSet<u32>,
    pub globals_written: HashSet<u32>,
    /// May trap at runtime (memory access, integer division, indirect call).
    pub implicit_trap: bool,
}

impl Effects {
    pub fn accesses_memory(&self) -> bool {
        self.reads_memory || self.writes_memory
    }

    pub fn accesses_globals(&self) -> bool {
        !self.globals_read.is_empty() || !self.globals_written.is_empty()
    }

    /// Whether removing or duplicating this subtree could be observed.
    pub fn has_side_effects(&self) -> bool {
        self.branches
            || self.calls
            || !self.locals_written.is_empty()
            || self.writes_memory
            || !self.globals_written.is_empty()
            || self.implicit_trap
    }

    /// Whether executing `self` first invalidates moving `other` before it.
    pub fn invalidates(&self, other: &Effects) -> bool {
        // transfers of control cannot be reordered with anything
        if self.branches || other.branches {
            return true;
        }
        // writers clobber readers and other writers; calls may do both
        if (self.writes_memory || self.calls)
            && (other.accesses_memory() || other.calls || other.accesses_globals())
        {
            return true;
        }
        if (other.writes_memory || other.calls)
            && (self.accesses_memory() || self.accesses_globals())
        {
            return true;
        }
        for local in &self.locals_written {
            if other.locals_written.contains(local) || other.locals_read.contains(local) {
                return true;
            }
        }
        for local in &self.locals_read {
            if other.locals_written.contains(local) {
                return true;
            }
        }
        for global in &self.globals_written {
            if other.globals_written.contains(global) || other.globals_read.contains(global) {
                return true;
            }
        }
        for global in &self.globals_read {
            if other.globals_written.contains(global) {
                return true;
            }
        }
        // a trap must stay ordered relative to any observable effect
        if (self.implicit_trap && other.has_side_effects())
            || (other.implicit_trap && self.has_side_effects())
        {
            return true;
        }
        false
    }
}

/// Analyze the subtree rooted at `expr`.
pub fn analyze(arena: &Arena<Expr>, expr: ExprId, options: &PassOptions) -> Effects {
    let mut effects = Effects::default();
    visit(arena, expr, options, &mut effects);
    effects
}

fn visit(arena: &Arena<Expr>, id: ExprId, options: &PassOptions, effects: &mut Effects) {
    match &arena[id].kind {
        ExprKind::Break { .. }
        | ExprKind::Switch { .. }
        | ExprKind::Return { .. }
        | ExprKind::Unreachable => {
            effects.branches = true;
        }
        ExprKind::Call { .. } | ExprKind::CallImport { .. } => {
            effects.calls = true;
        }
        ExprKind::CallIndirect { .. } => {
            effects.calls = true;
            if !options.ignore_implicit_traps {
                effects.implicit_trap = true;
            }
        }
        ExprKind::Load { .. } => {
            effects.reads_memory = true;
            if !options.ignore_implicit_traps {
                effects.implicit_trap = true;
            }
        }
        ExprKind::Store { .. } => {
            effects.writes_memory = true;
            if !options.ignore_implicit_traps {
                effects.implicit_trap = true;
            }
        }
        ExprKind::AtomicRmw { .. } | ExprKind::AtomicCmpxchg { .. } => {
            effects.reads_memory = true;
            effects.writes_memory = true;
            if !options.ignore_implicit_traps {
                effects.implicit_trap = true;
            }
        }
        ExprKind::LocalGet { index } => {
            effects.locals_read.insert(*index);
        }
        ExprKind::LocalSet { index, .. } => {
            effects.locals_written.insert(*index);
        }
        ExprKind::GlobalGet { index } => {
            effects.globals_read.insert(*index);
        }
        ExprKind::GlobalSet { index, .. } => {
            effects.globals_written.insert(*index);
        }
        ExprKind::Binary { op, left, .. } => {
            if !options.ignore_implicit_traps && op.can_trap(arena[*left].ty) {
                effects.implicit_trap = true;
            }
        }
        _ => {}
    }
    for_each_child(&arena[id].kind, |child| visit(arena, child, options, effects));
}

/// The seam the merge pass consumes: side-effect and reordering queries on
/// arbitrary subtrees.
pub trait EffectOracle {
    fn has_side_effects(&self, arena: &Arena<Expr>, expr: ExprId) -> bool;

    /// Whether `earlier`'s effects forbid moving `later`'s evaluation in
    /// front of it.
    fn invalidates(&self, arena: &Arena<Expr>, earlier: ExprId, later: ExprId) -> bool;
}

/// Default oracle backed by [`analyze`].
pub struct DefaultEffectOracle<'a> {
    options: &'a PassOptions,
}

impl<'a> DefaultEffectOracle<'a> {
    pub fn new(options: &'a PassOptions) -> Self {
        DefaultEffectOracle { options }
    }
}

impl EffectOracle for DefaultEffectOracle<'_> {
    fn has_side_effects(&self, arena: &Arena<Expr>, expr: ExprId) -> bool {
        analyze(arena, expr, self.options).has_side_effects()
    }

    fn invalidates(&self, arena: &Arena<Expr>, earlier: ExprId, later: ExprId) -> bool {
        analyze(arena, earlier, self.options).invalidates(&analyze(arena, later, self.options))
    }
}
