//! Block merging.
//!
//! Merges blocks into their parents: an anonymous child block's statements
//! are spliced into the enclosing block's list, removing a nesting level.
//! The pass also restructures expressions to create such opportunities. For
//! example,
//!
//! ```text
//! (i32.store
//!   (block (result i32)
//!     (call $foo)
//!     (i32.load (i32.const 100)))
//!   (i32.const 0))
//! ```
//!
//! becomes
//!
//! ```text
//! (block
//!   (call $foo)
//!   (i32.store
//!     (i32.load (i32.const 100))
//!     (i32.const 0)))
//! ```
//!
//! The block now sits outside the store and can merge with an enclosing
//! block. Hoisting a later operand has to respect evaluation order: earlier
//! operands left in place must not be invalidated by the code moving across
//! them, which is what the effect oracle decides.
//!
//! A `(drop (block ..))` gets special treatment: the drop is sunk onto the
//! block's tail element, after which the block is an ordinary statement and
//! merges like any other. For labeled blocks this first requires removing
//! the values from every break that targets the label, which is only legal
//! when no `br_if`'s flowed value is actually consumed and no switch
//! targets the label ([`ProblemFinder`] checks, [`BreakValueStripper`]
//! rewrites).

use super::effects::{DefaultEffectOracle, EffectOracle};
use super::{Pass, PassOptions};
use crate::ir::{
    finalize, finalize_to, for_each_child, for_each_child_mut, has_unreachable_child, Builder,
    Expr, ExprId, ExprKind, Function, Name, Type,
};
use id_arena::Arena;

/// The merge-blocks pass object.
pub struct MergeBlocksPass;

impl Pass for MergeBlocksPass {
    fn name(&self) -> &'static str {
        "merge-blocks"
    }

    fn run_on_function(&self, options: &PassOptions, func: &mut Function) {
        optimize(func, options);
    }
}

/// Create the merge-blocks pass.
pub fn create_merge_blocks_pass() -> Box<dyn Pass + Send + Sync> {
    Box::new(MergeBlocksPass)
}

/// Run the pass on one function with the default effect oracle.
pub fn optimize(func: &mut Function, options: &PassOptions) {
    let oracle = DefaultEffectOracle::new(options);
    optimize_with_oracle(func, options, &oracle);
}

/// Run the pass on one function with a caller-supplied effect oracle.
pub fn optimize_with_oracle(func: &mut Function, options: &PassOptions, oracle: &dyn EffectOracle) {
    let mut merger = MergeBlocks {
        options,
        oracle,
        rewrites: 0,
    };
    func.body = merger.walk(&mut func.arena, func.body);
    if merger.rewrites > 0 {
        log::trace!(
            "merge-blocks: {} rewrites in {}",
            merger.rewrites,
            func.name
        );
    }
}

/// Addresses one child slot of an expression, so a rewrite can read and
/// write "the operand" without borrowing through the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Value,
    Ptr,
    Left,
    Right,
    Condition,
    Expected,
    Replacement,
    IfTrue,
    IfFalse,
    Target,
    Operand(usize),
}

fn slot_get(arena: &Arena<Expr>, parent: ExprId, slot: Slot) -> Option<ExprId> {
    match (&arena[parent].kind, slot) {
        (ExprKind::Unary { value, .. }, Slot::Value)
        | (ExprKind::LocalSet { value, .. }, Slot::Value)
        | (ExprKind::Drop { value }, Slot::Value)
        | (ExprKind::Store { value, .. }, Slot::Value)
        | (ExprKind::AtomicRmw { value, .. }, Slot::Value) => Some(*value),
        (ExprKind::Return { value }, Slot::Value)
        | (ExprKind::Break { value, .. }, Slot::Value)
        | (ExprKind::Switch { value, .. }, Slot::Value) => *value,
        (ExprKind::Break { condition, .. }, Slot::Condition) => *condition,
        (ExprKind::Switch { condition, .. }, Slot::Condition)
        | (ExprKind::Select { condition, .. }, Slot::Condition) => Some(*condition),
        (ExprKind::Load { ptr, .. }, Slot::Ptr)
        | (ExprKind::Store { ptr, .. }, Slot::Ptr)
        | (ExprKind::AtomicRmw { ptr, .. }, Slot::Ptr)
        | (ExprKind::AtomicCmpxchg { ptr, .. }, Slot::Ptr) => Some(*ptr),
        (ExprKind::AtomicCmpxchg { expected, .. }, Slot::Expected) => Some(*expected),
        (ExprKind::AtomicCmpxchg { replacement, .. }, Slot::Replacement) => Some(*replacement),
        (ExprKind::Binary { left, .. }, Slot::Left) => Some(*left),
        (ExprKind::Binary { right, .. }, Slot::Right) => Some(*right),
        (ExprKind::Select { if_true, .. }, Slot::IfTrue) => Some(*if_true),
        (ExprKind::Select { if_false, .. }, Slot::IfFalse) => Some(*if_false),
        (ExprKind::Call { operands, .. }, Slot::Operand(i))
        | (ExprKind::CallImport { operands, .. }, Slot::Operand(i))
        | (ExprKind::CallIndirect { operands, .. }, Slot::Operand(i)) => operands.get(i).copied(),
        (ExprKind::CallIndirect { target, .. }, Slot::Target) => Some(*target),
        _ => None,
    }
}

fn slot_set(arena: &mut Arena<Expr>, parent: ExprId, slot: Slot, new: ExprId) {
    match (&mut arena[parent].kind, slot) {
        (ExprKind::Unary { value, .. }, Slot::Value)
        | (ExprKind::LocalSet { value, .. }, Slot::Value)
        | (ExprKind::Drop { value }, Slot::Value)
        | (ExprKind::Store { value, .. }, Slot::Value)
        | (ExprKind::AtomicRmw { value, .. }, Slot::Value) => *value = new,
        (ExprKind::Return { value }, Slot::Value)
        | (ExprKind::Break { value, .. }, Slot::Value)
        | (ExprKind::Switch { value, .. }, Slot::Value) => *value = Some(new),
        (ExprKind::Break { condition, .. }, Slot::Condition) => *condition = Some(new),
        (ExprKind::Switch { condition, .. }, Slot::Condition)
        | (ExprKind::Select { condition, .. }, Slot::Condition) => *condition = new,
        (ExprKind::Load { ptr, .. }, Slot::Ptr)
        | (ExprKind::Store { ptr, .. }, Slot::Ptr)
        | (ExprKind::AtomicRmw { ptr, .. }, Slot::Ptr)
        | (ExprKind::AtomicCmpxchg { ptr, .. }, Slot::Ptr) => *ptr = new,
        (ExprKind::AtomicCmpxchg { expected, .. }, Slot::Expected) => *expected = new,
        (ExprKind::AtomicCmpxchg { replacement, .. }, Slot::Replacement) => *replacement = new,
        (ExprKind::Binary { left, .. }, Slot::Left) => *left = new,
        (ExprKind::Binary { right, .. }, Slot::Right) => *right = new,
        (ExprKind::Select { if_true, .. }, Slot::IfTrue) => *if_true = new,
        (ExprKind::Select { if_false, .. }, Slot::IfFalse) => *if_false = new,
        (ExprKind::Call { operands, .. }, Slot::Operand(i))
        | (ExprKind::CallImport { operands, .. }, Slot::Operand(i))
        | (ExprKind::CallIndirect { operands, .. }, Slot::Operand(i)) => {
            if let Some(op) = operands.get_mut(i) {
                *op = new;
            }
        }
        (ExprKind::CallIndirect { target, .. }, Slot::Target) => *target = new,
        _ => debug_assert!(false, "invalid slot for expression kind"),
    }
}

struct MergeBlocks<'a> {
    options: &'a PassOptions,
    oracle: &'a dyn EffectOracle,
    rewrites: u32,
}

impl MergeBlocks<'_> {
    /// Post-order traversal. Returns the expression now standing where `id`
    /// stood, so the caller writes it back into the parent slot.
    fn walk(&mut self, arena: &mut Arena<Expr>, id: ExprId) -> ExprId {
        let mut kind = std::mem::replace(&mut arena[id].kind, ExprKind::Nop);
        for_each_child_mut(&mut kind, |slot| {
            *slot = self.walk(arena, *slot);
        });
        arena[id].kind = kind;
        self.visit(arena, id)
    }

    /// Per-kind rewrite dispatch, in the order operands evaluate.
    fn visit(&mut self, arena: &mut Arena<Expr>, id: ExprId) -> ExprId {
        match &arena[id].kind {
            ExprKind::Block { .. } => {
                self.optimize_block(arena, id);
                id
            }
            ExprKind::Unary { .. }
            | ExprKind::LocalSet { .. }
            | ExprKind::Drop { .. }
            | ExprKind::Return { .. } => self
                .hoist(arena, id, Slot::Value, None, None)
                .unwrap_or(id),
            ExprKind::Load { .. } => self.hoist(arena, id, Slot::Ptr, None, None).unwrap_or(id),
            ExprKind::Binary { .. } => {
                let outer = self.hoist(arena, id, Slot::Left, None, None);
                let dep = slot_get(arena, id, Slot::Left);
                self.hoist(arena, id, Slot::Right, outer, dep).unwrap_or(id)
            }
            ExprKind::Store { .. } | ExprKind::AtomicRmw { .. } => {
                let outer = self.hoist(arena, id, Slot::Ptr, None, None);
                let dep = slot_get(arena, id, Slot::Ptr);
                self.hoist(arena, id, Slot::Value, outer, dep).unwrap_or(id)
            }
            ExprKind::Break { .. } | ExprKind::Switch { .. } => {
                let outer = self.hoist(arena, id, Slot::Value, None, None);
                let dep = slot_get(arena, id, Slot::Value);
                self.hoist(arena, id, Slot::Condition, outer, dep)
                    .unwrap_or(id)
            }
            ExprKind::AtomicCmpxchg { .. } => {
                self.hoist_ternary(arena, id, [Slot::Ptr, Slot::Expected, Slot::Replacement])
            }
            ExprKind::Select { .. } => {
                self.hoist_ternary(arena, id, [Slot::IfTrue, Slot::IfFalse, Slot::Condition])
            }
            ExprKind::Call { operands, .. } | ExprKind::CallImport { operands, .. } => {
                let n = operands.len();
                self.hoist_operands(arena, id, n, false)
            }
            ExprKind::CallIndirect { operands, .. } => {
                let n = operands.len();
                self.hoist_operands(arena, id, n, true)
            }
            _ => id,
        }
    }

    /// Given
    ///
    /// ```text
    /// (curr
    ///  (block=child
    ///   (..more..)
    ///   (back))
    ///  (..other..children..))
    /// ```
    ///
    /// move the block around to
    ///
    /// ```text
    /// (block
    ///  (..more..)
    ///  (curr
    ///   (back)
    ///   (..other..children..)))
    /// ```
    ///
    /// so the block ends up outside and potentially mergeable with an outer
    /// block. The first hoisted operand reuses `child` as the outer block;
    /// later operands append their prefix to it. `dependency` is an earlier
    /// operand still in place; when its effects invalidate the code being
    /// moved across it, nothing happens.
    ///
    /// Returns the outer block after this step, if any.
    fn hoist(
        &mut self,
        arena: &mut Arena<Expr>,
        curr: ExprId,
        slot: Slot,
        outer: Option<ExprId>,
        dependency: Option<ExprId>,
    ) -> Option<ExprId> {
        let Some(child) = slot_get(arena, curr, slot) else {
            return outer;
        };
        if let Some(dep) = dependency {
            if self.oracle.invalidates(arena, dep, child) {
                return outer;
            }
        }
        let back = match &arena[child].kind {
            ExprKind::Block { name: None, list } => match list.split_last() {
                Some((&back, rest)) if !rest.is_empty() => back,
                _ => return outer,
            },
            _ => return outer,
        };
        if arena[curr].ty == Type::None && has_unreachable_child(arena, child) {
            // moving the block outside would replace a none with an unreachable
            return outer;
        }
        if arena[back].ty == Type::Unreachable {
            // curr is unreachable; leave it for dce
            return outer;
        }
        // curr will consume the tail directly, so the types must agree
        if arena[child].ty != arena[back].ty {
            return outer;
        }

        slot_set(arena, curr, slot, back);
        self.rewrites += 1;
        match outer {
            None => {
                // reuse the block: curr becomes its tail, and the block takes
                // curr's place in the tree
                let curr_ty = arena[curr].ty;
                if let ExprKind::Block { list, .. } = &mut arena[child].kind {
                    if let Some(tail) = list.last_mut() {
                        *tail = curr;
                    }
                }
                finalize_to(arena, child, curr_ty);
                Some(child)
            }
            Some(outer_id) => {
                // append this operand's prefix to the existing outer block
                let prefix: Vec<ExprId> = match &arena[child].kind {
                    ExprKind::Block { list, .. } => list[..list.len() - 1].to_vec(),
                    _ => Vec::new(),
                };
                if let ExprKind::Block { list, .. } = &mut arena[outer_id].kind {
                    let popped = list.pop();
                    debug_assert_eq!(popped, Some(curr), "outer block must end with curr");
                    list.extend(prefix);
                    list.push(curr);
                }
                Some(outer_id)
            }
        }
    }

    /// Three-operand forms stop at the first side-effecting operand rather
    /// than doing precise dependency analysis.
    fn hoist_ternary(&mut self, arena: &mut Arena<Expr>, id: ExprId, slots: [Slot; 3]) -> ExprId {
        let mut outer = None;
        for slot in slots {
            if let Some(op) = slot_get(arena, id, slot) {
                if self.oracle.has_side_effects(arena, op) {
                    break;
                }
                outer = self.hoist(arena, id, slot, outer, None);
            }
        }
        outer.unwrap_or(id)
    }

    /// Calls likewise abort at the first side-effecting operand.
    fn hoist_operands(
        &mut self,
        arena: &mut Arena<Expr>,
        id: ExprId,
        count: usize,
        then_target: bool,
    ) -> ExprId {
        let mut outer = None;
        for i in 0..count {
            let Some(op) = slot_get(arena, id, Slot::Operand(i)) else {
                break;
            };
            if self.oracle.has_side_effects(arena, op) {
                return outer.unwrap_or(id);
            }
            outer = self.hoist(arena, id, Slot::Operand(i), outer, None);
        }
        if then_target {
            if let Some(target) = slot_get(arena, id, Slot::Target) {
                if self.oracle.has_side_effects(arena, target) {
                    return outer.unwrap_or(id);
                }
                outer = self.hoist(arena, id, Slot::Target, outer, None);
            }
        }
        outer.unwrap_or(id)
    }

    /// Core block rewrite: splice anonymous child blocks into the parent and
    /// sink drops into dropped blocks, iterating to a fixed point.
    fn optimize_block(&mut self, arena: &mut Arena<Expr>, block: ExprId) {
        let original_ty = arena[block].ty;
        let mut more = true;
        let mut changed = false;
        while more {
            more = false;
            let len = match &arena[block].kind {
                ExprKind::Block { list, .. } => list.len(),
                _ => return,
            };
            for i in 0..len {
                let item = match &arena[block].kind {
                    ExprKind::Block { list, .. } => list[i],
                    _ => return,
                };
                let mut child: Option<ExprId> = match arena[item].kind {
                    ExprKind::Block { .. } => Some(item),
                    _ => None,
                };
                if child.is_none() {
                    // a (drop (block ..)) lets us sink the drop into the
                    // block, making the block itself mergeable
                    if let ExprKind::Drop { value: inner } = arena[item].kind {
                        child = self.try_sink_drop(arena, block, i, item, inner);
                        if child.is_some() {
                            more = true;
                            changed = true;
                        }
                    }
                }
                let Some(child_id) = child else {
                    continue;
                };
                // named blocks can have breaks to them
                let child_list = match &arena[child_id].kind {
                    ExprKind::Block { name: None, list } => list.clone(),
                    _ => continue,
                };
                if has_unreachable_child(arena, child_id) {
                    // unreachable code stays put; dce is the caller's job
                    continue;
                }
                let mut merged: Vec<ExprId> = Vec::with_capacity(len - 1 + child_list.len());
                if let ExprKind::Block { list, .. } = &arena[block].kind {
                    merged.extend_from_slice(&list[..i]);
                    merged.extend_from_slice(&child_list);
                    merged.extend_from_slice(&list[i + 1..]);
                }
                // if we merged a concrete element into the middle, drop it
                if let Some(&last) = merged.last() {
                    for item in merged.iter_mut() {
                        if *item != last && arena[*item].ty.is_concrete() {
                            *item = Builder::new(arena).make_drop(*item);
                        }
                    }
                }
                if let ExprKind::Block { list, .. } = &mut arena[block].kind {
                    *list = merged;
                }
                more = true;
                changed = true;
                break;
            }
        }
        if changed {
            finalize_to(arena, block, original_ty);
            self.rewrites += 1;
        }
    }

    /// Step 2 of the block rewrite: turn `list[i] = Drop(Block[.., back])`
    /// into `list[i] = Block[.., Drop(back)]`, reusing the drop node.
    /// Labeled blocks additionally need every break-to-them stripped of its
    /// value first. Returns the block now at `list[i]`, or `None` if the
    /// rewrite does not apply.
    fn try_sink_drop(
        &mut self,
        arena: &mut Arena<Expr>,
        block: ExprId,
        i: usize,
        drop_id: ExprId,
        inner: ExprId,
    ) -> Option<ExprId> {
        let name = match &arena[inner].kind {
            ExprKind::Block { list, name } if !list.is_empty() => name.clone(),
            _ => return None,
        };
        if has_unreachable_child(arena, inner) {
            // don't move around unreachable code, as it can change types;
            // dce should have been run anyhow
            return None;
        }
        if let Some(label) = name {
            // check it's ok to remove the value from all breaks to us
            let mut finder = ProblemFinder::new(label.clone(), self.options);
            finder.walk(arena, inner);
            if finder.found() {
                return None;
            }
            // fix up breaks
            BreakValueStripper {
                origin: label,
                merger: self,
            }
            .walk(arena, inner);
        }
        // reuse the drop
        let back = match &arena[inner].kind {
            ExprKind::Block { list, .. } => *list.last()?,
            _ => return None,
        };
        if let ExprKind::Drop { value } = &mut arena[drop_id].kind {
            *value = back;
        }
        finalize(arena, drop_id);
        if let ExprKind::Block { list, .. } = &mut arena[inner].kind {
            if let Some(tail) = list.last_mut() {
                *tail = drop_id;
            }
        }
        finalize(arena, inner);
        if let ExprKind::Block { list, .. } = &mut arena[block].kind {
            list[i] = inner;
        }
        Some(inner)
    }
}

/// Looks for reasons we can't remove the values from breaks to an origin.
/// For example, if a switch targets the label, the value can't be removed
/// from its other targets, so nothing can change.
struct ProblemFinder<'a> {
    origin: Name,
    options: &'a PassOptions,
    found_problem: bool,
    /// Count br_ifs, and dropped br_ifs. If they don't match, some br_if's
    /// flowed value is consumed, and we can't drop it.
    br_ifs: u32,
    dropped_br_ifs: u32,
}

impl<'a> ProblemFinder<'a> {
    fn new(origin: Name, options: &'a PassOptions) -> Self {
        ProblemFinder {
            origin,
            options,
            found_problem: false,
            br_ifs: 0,
            dropped_br_ifs: 0,
        }
    }

    fn walk(&mut self, arena: &Arena<Expr>, id: ExprId) {
        match &arena[id].kind {
            ExprKind::Break {
                name,
                condition,
                value,
            } if *name == self.origin => {
                if condition.is_some() {
                    self.br_ifs += 1;
                }
                // if the value has side effects, we can't remove it
                if let Some(value) = value {
                    if super::effects::analyze(arena, *value, self.options).has_side_effects() {
                        self.found_problem = true;
                    }
                }
            }
            ExprKind::Drop { value } => {
                if let ExprKind::Break {
                    name,
                    condition: Some(_),
                    ..
                } = &arena[*value].kind
                {
                    if *name == self.origin {
                        self.dropped_br_ifs += 1;
                    }
                }
            }
            ExprKind::Switch {
                targets, default, ..
            } => {
                if *default == self.origin || targets.contains(&self.origin) {
                    self.found_problem = true;
                }
            }
            _ => {}
        }
        for_each_child(&arena[id].kind, |child| self.walk(arena, child));
    }

    fn found(&self) -> bool {
        assert!(self.br_ifs >= self.dropped_br_ifs);
        self.found_problem || self.br_ifs > self.dropped_br_ifs
    }
}

/// Drops values from breaks to an origin. While doing so it can create new
/// blocks, so it merges blocks as well.
struct BreakValueStripper<'p, 'a> {
    origin: Name,
    merger: &'p mut MergeBlocks<'a>,
}

impl BreakValueStripper<'_, '_> {
    fn walk(&mut self, arena: &mut Arena<Expr>, id: ExprId) -> ExprId {
        let mut kind = std::mem::replace(&mut arena[id].kind, ExprKind::Nop);
        for_each_child_mut(&mut kind, |slot| {
            *slot = self.walk(arena, *slot);
        });
        arena[id].kind = kind;
        self.visit(arena, id)
    }

    fn visit(&mut self, arena: &mut Arena<Expr>, id: ExprId) -> ExprId {
        match &arena[id].kind {
            ExprKind::Block { .. } => {
                self.merger.optimize_block(arena, id);
                id
            }
            ExprKind::Break {
                name,
                value: Some(value),
                ..
            } if *name == self.origin => {
                let value = *value;
                if arena[value].ty == Type::Unreachable {
                    // the break isn't even reached
                    return value;
                }
                if let ExprKind::Break { value, .. } = &mut arena[id].kind {
                    *value = None;
                }
                finalize(arena, id);
                let mut b = Builder::new(arena);
                let dropped = b.make_drop(value);
                b.make_sequence(dropped, id)
            }
            ExprKind::Drop { value } => {
                // when a dropped br_if loses its value we end up dropping a
                // none-typed block, which needs no drop; likewise
                // unreachable. only drops of concrete values remain.
                let value = *value;
                if !arena[value].ty.is_concrete() {
                    value
                } else {
                    id
                }
            }
            _ => id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Literal;

    fn func_with_body<F>(build: F) -> Function
    where
        F: FnOnce(&mut Builder) -> ExprId,
    {
        let mut func = Function::default();
        let mut b = Builder::new(&mut func.arena);
        func.body = build(&mut b);
        func
    }

    fn run(func: &mut Function) {
        optimize(func, &PassOptions::default());
    }

    fn body_list(func: &Function) -> Vec<ExprId> {
        match &func.arena[func.body].kind {
            ExprKind::Block { list, .. } => list.clone(),
            other => panic!("expected Block body, got {:?}", other),
        }
    }

    // statement helpers — local.set is a convenient none-typed statement
    fn set(b: &mut Builder, index: u32) -> ExprId {
        let c = b.make_const(Literal::I32(index as i32));
        b.make_local_set(index, c)
    }

    fn call_void(b: &mut Builder) -> ExprId {
        b.make_call(0, vec![], Type::None)
    }

    fn load_at(b: &mut Builder, addr: i32) -> ExprId {
        let ptr = b.make_const(Literal::I32(addr));
        b.make_load(4, false, 0, ptr, Type::I32)
    }

    // ── Splicing (flattening) ────────────────────────────────────────────

    #[test]
    fn splices_anonymous_child_block() {
        // Block[ s0; Block[ s1; s2 ]; s3 ]  →  Block[ s0; s1; s2; s3 ]
        let mut func = func_with_body(|b| {
            let s0 = set(b, 0);
            let s1 = set(b, 1);
            let s2 = set(b, 2);
            let s3 = set(b, 3);
            let inner = b.make_block(None, vec![s1, s2]);
            b.make_block(None, vec![s0, inner, s3])
        });
        run(&mut func);
        let list = body_list(&func);
        assert_eq!(list.len(), 4);
        for (i, &item) in list.iter().enumerate() {
            match &func.arena[item].kind {
                ExprKind::LocalSet { index, .. } => assert_eq!(*index, i as u32),
                other => panic!("expected LocalSet, got {:?}", other),
            }
        }
        assert_eq!(func.arena[func.body].ty, Type::None);
    }

    #[test]
    fn flattens_deep_nesting_in_one_run() {
        let mut func = func_with_body(|b| {
            let s0 = set(b, 0);
            let innermost = b.make_block(None, vec![s0]);
            let mid = b.make_block(None, vec![innermost]);
            b.make_block(None, vec![mid])
        });
        run(&mut func);
        let list = body_list(&func);
        assert_eq!(list.len(), 1);
        assert!(matches!(
            func.arena[list[0]].kind,
            ExprKind::LocalSet { .. }
        ));
    }

    #[test]
    fn labeled_child_block_is_not_spliced() {
        let mut func = func_with_body(|b| {
            let s0 = set(b, 0);
            let s1 = set(b, 1);
            let c = b.make_const(Literal::I32(1));
            let br = b.make_break(Name::from("l"), Some(c), None);
            let inner = b.make_block(Some(Name::from("l")), vec![s1, br]);
            b.make_block(None, vec![s0, inner])
        });
        run(&mut func);
        let list = body_list(&func);
        assert_eq!(list.len(), 2);
        assert!(matches!(
            &func.arena[list[1]].kind,
            ExprKind::Block { name: Some(_), .. }
        ));
    }

    #[test]
    fn spliced_concrete_middle_element_gets_dropped() {
        // Block[ Block[ s0; const ]; s1 ] — the const lands mid-list and
        // must be wrapped in a drop
        let mut func = func_with_body(|b| {
            let s0 = set(b, 0);
            let c = b.make_const(Literal::I32(5));
            let inner = b.make_block(None, vec![s0, c]);
            let s1 = set(b, 1);
            b.make_block(None, vec![inner, s1])
        });
        run(&mut func);
        let list = body_list(&func);
        assert_eq!(list.len(), 3);
        assert!(matches!(func.arena[list[0]].kind, ExprKind::LocalSet { .. }));
        assert!(matches!(func.arena[list[1]].kind, ExprKind::Drop { .. }));
        assert!(matches!(func.arena[list[2]].kind, ExprKind::LocalSet { .. }));
    }

    #[test]
    fn block_type_is_preserved() {
        // Block[ Block[ s0; const ] ] : i32 stays i32 with the const as tail
        let mut func = func_with_body(|b| {
            let s0 = set(b, 0);
            let c = b.make_const(Literal::I32(5));
            let inner = b.make_block(None, vec![s0, c]);
            b.make_block(None, vec![inner])
        });
        assert_eq!(func.arena[func.body].ty, Type::I32);
        run(&mut func);
        let list = body_list(&func);
        assert_eq!(list.len(), 2);
        assert_eq!(func.arena[func.body].ty, Type::I32);
        assert!(matches!(func.arena[list[1]].kind, ExprKind::Const { .. }));
    }

    #[test]
    fn block_with_unreachable_child_is_not_spliced() {
        let mut func = func_with_body(|b| {
            let s0 = set(b, 0);
            let u = b.make_unreachable();
            let inner = b.make_block(None, vec![s0, u]);
            let s1 = set(b, 1);
            b.make_block(None, vec![inner, s1])
        });
        run(&mut func);
        let list = body_list(&func);
        assert_eq!(list.len(), 2);
        assert!(matches!(func.arena[list[0]].kind, ExprKind::Block { .. }));
    }

    // ── Drop-of-block sinking ────────────────────────────────────────────

    #[test]
    fn drop_of_block_sinks_the_drop() {
        // Block[ Drop(Block[ call; load ]) ]  →  Block[ call; Drop(load) ]
        let mut func = func_with_body(|b| {
            let call = call_void(b);
            let load = load_at(b, 100);
            let inner = b.make_block(None, vec![call, load]);
            let drop = b.make_drop(inner);
            b.make_block(None, vec![drop])
        });
        run(&mut func);
        let list = body_list(&func);
        assert_eq!(list.len(), 2);
        assert!(matches!(func.arena[list[0]].kind, ExprKind::Call { .. }));
        match &func.arena[list[1]].kind {
            ExprKind::Drop { value } => {
                assert!(matches!(func.arena[*value].kind, ExprKind::Load { .. }));
            }
            other => panic!("expected Drop, got {:?}", other),
        }
    }

    #[test]
    fn drop_of_labeled_block_strips_break_values() {
        // Block[ Drop(Block $l (result i32) [ Drop(br_if $l v c); const 2 ]) ]
        // The only br_if is itself dropped, so stripping is allowed; the
        // break loses its value and the drop sinks onto the tail.
        let mut func = func_with_body(|b| {
            let v = b.make_const(Literal::I32(1));
            let c = b.make_const(Literal::I32(0));
            let br_if = b.make_break(Name::from("l"), Some(c), Some(v));
            let dropped_br = b.make_drop(br_if);
            let tail = b.make_const(Literal::I32(2));
            let inner = b.make_block(Some(Name::from("l")), vec![dropped_br, tail]);
            let drop = b.make_drop(inner);
            b.make_block(None, vec![drop])
        });
        run(&mut func);
        let list = body_list(&func);
        // the labeled block stays (it still has breaks), with the drop sunk
        assert_eq!(list.len(), 1);
        match &func.arena[list[0]].kind {
            ExprKind::Block { name, list } => {
                assert!(name.is_some());
                assert_eq!(func.arena[body_list(&func)[0]].ty, Type::None);
                // [ Drop(v); br_if without value; Drop(const 2) ]
                assert_eq!(list.len(), 3);
                assert!(matches!(func.arena[list[0]].kind, ExprKind::Drop { .. }));
                match &func.arena[list[1]].kind {
                    ExprKind::Break {
                        condition, value, ..
                    } => {
                        assert!(condition.is_some());
                        assert!(value.is_none());
                    }
                    other => panic!("expected stripped br_if, got {:?}", other),
                }
                assert!(matches!(func.arena[list[2]].kind, ExprKind::Drop { .. }));
            }
            other => panic!("expected labeled Block, got {:?}", other),
        }
    }

    #[test]
    fn consumed_br_if_value_prevents_stripping() {
        // The br_if's value is consumed as the block tail, not dropped:
        // br_ifs > dropped_br_ifs, so the rewrite must not happen.
        let mut func = func_with_body(|b| {
            let v = b.make_const(Literal::I32(1));
            let c = b.make_const(Literal::I32(0));
            let s0 = set(b, 0);
            let br_if = b.make_break(Name::from("l"), Some(c), Some(v));
            let inner = b.make_block(Some(Name::from("l")), vec![s0, br_if]);
            let drop = b.make_drop(inner);
            b.make_block(None, vec![drop])
        });
        run(&mut func);
        let list = body_list(&func);
        assert_eq!(list.len(), 1);
        // still Drop(Block $l ..)
        match &func.arena[list[0]].kind {
            ExprKind::Drop { value } => {
                assert!(matches!(
                    &func.arena[*value].kind,
                    ExprKind::Block { name: Some(_), .. }
                ));
            }
            other => panic!("expected Drop to remain, got {:?}", other),
        }
    }

    #[test]
    fn switch_target_prevents_stripping() {
        // the switch sits inside an if arm so the labeled block has no
        // unreachable direct child; the problem finder still sees it
        let mut func = func_with_body(|b| {
            let idx = b.make_const(Literal::I32(0));
            let v = b.make_const(Literal::I32(1));
            let sw = b.make_switch(vec![Name::from("l")], Name::from("l"), idx, Some(v));
            let cond = b.make_const(Literal::I32(0));
            let guarded = b.make_if(cond, sw, None);
            let tail = b.make_const(Literal::I32(2));
            let inner = b.make_block(Some(Name::from("l")), vec![guarded, tail]);
            let drop = b.make_drop(inner);
            b.make_block(None, vec![drop])
        });
        run(&mut func);
        let list = body_list(&func);
        assert!(matches!(func.arena[list[0]].kind, ExprKind::Drop { .. }));
    }

    #[test]
    fn unreachable_child_prevents_drop_sinking() {
        let mut func = func_with_body(|b| {
            let u = b.make_unreachable();
            let tail = b.make_const(Literal::I32(2));
            let inner = b.make_block(None, vec![u, tail]);
            let drop = b.make_drop(inner);
            b.make_block(None, vec![drop])
        });
        run(&mut func);
        let list = body_list(&func);
        assert_eq!(list.len(), 1);
        assert!(matches!(func.arena[list[0]].kind, ExprKind::Drop { .. }));
    }

    // ── Expression hoisting ──────────────────────────────────────────────

    #[test]
    fn hoists_store_value_operand() {
        // Store(const 0, Block[ call; load ])
        //   →  Block[ call; Store(const 0, load) ]
        let mut func = func_with_body(|b| {
            let ptr = b.make_const(Literal::I32(0));
            let call = call_void(b);
            let load = load_at(b, 100);
            let value = b.make_block(None, vec![call, load]);
            b.make_store(4, 0, ptr, value)
        });
        run(&mut func);
        let list = body_list(&func);
        assert_eq!(list.len(), 2);
        assert!(matches!(func.arena[list[0]].kind, ExprKind::Call { .. }));
        match &func.arena[list[1]].kind {
            ExprKind::Store { ptr, value, .. } => {
                assert!(matches!(func.arena[*ptr].kind, ExprKind::Const { .. }));
                assert!(matches!(func.arena[*value].kind, ExprKind::Load { .. }));
            }
            other => panic!("expected Store, got {:?}", other),
        }
        assert_eq!(func.arena[func.body].ty, Type::None);
    }

    #[test]
    fn hoists_both_store_operands_into_one_block() {
        // Store(Block[ call f; const 100 ], Block[ call g; const 200 ])
        //   →  Block[ call f; call g; Store(const 100, const 200) ]
        let mut func = func_with_body(|b| {
            let f = call_void(b);
            let c100 = b.make_const(Literal::I32(100));
            let ptr = b.make_block(None, vec![f, c100]);
            let g = b.make_call(1, vec![], Type::None);
            let c200 = b.make_const(Literal::I32(200));
            let value = b.make_block(None, vec![g, c200]);
            b.make_store(4, 0, ptr, value)
        });
        run(&mut func);
        let list = body_list(&func);
        assert_eq!(list.len(), 3);
        assert!(matches!(
            func.arena[list[0]].kind,
            ExprKind::Call { index: 0, .. }
        ));
        assert!(matches!(
            func.arena[list[1]].kind,
            ExprKind::Call { index: 1, .. }
        ));
        match &func.arena[list[2]].kind {
            ExprKind::Store { ptr, value, .. } => {
                assert!(matches!(
                    func.arena[*ptr].kind,
                    ExprKind::Const {
                        value: Literal::I32(100)
                    }
                ));
                assert!(matches!(
                    func.arena[*value].kind,
                    ExprKind::Const {
                        value: Literal::I32(200)
                    }
                ));
            }
            other => panic!("expected Store, got {:?}", other),
        }
    }

    #[test]
    fn dependency_invalidation_keeps_second_operand_in_place() {
        // After hoisting the pointer, the in-place pointer expression reads
        // memory; the value operand's prefix writes memory, so moving it
        // across the read is not allowed.
        let mut func = func_with_body(|b| {
            let f = call_void(b);
            let load = load_at(b, 0);
            let ptr = b.make_block(None, vec![f, load]);
            let sptr = b.make_const(Literal::I32(8));
            let sval = b.make_const(Literal::I32(9));
            let store = b.make_store(4, 0, sptr, sval);
            let c200 = b.make_const(Literal::I32(200));
            let value = b.make_block(None, vec![store, c200]);
            b.make_store(4, 0, ptr, value)
        });
        run(&mut func);
        let list = body_list(&func);
        assert_eq!(list.len(), 2);
        match &func.arena[list[1]].kind {
            ExprKind::Store { ptr, value, .. } => {
                assert!(matches!(func.arena[*ptr].kind, ExprKind::Load { .. }));
                // the value operand is still a block
                assert!(matches!(func.arena[*value].kind, ExprKind::Block { .. }));
            }
            other => panic!("expected Store, got {:?}", other),
        }
    }

    #[test]
    fn hoists_binary_operands_left_to_right() {
        let mut func = func_with_body(|b| {
            let s0 = set(b, 0);
            let c1 = b.make_const(Literal::I32(1));
            let left = b.make_block(None, vec![s0, c1]);
            let s1 = set(b, 1);
            let c2 = b.make_const(Literal::I32(2));
            let right = b.make_block(None, vec![s1, c2]);
            let add = b.make_binary(crate::ir::BinaryOp::Add, left, right);
            b.make_drop(add)
        });
        run(&mut func);
        let list = body_list(&func);
        // [ set 0; set 1; Drop(Add(c1, c2)) ] after the drop's own hoist
        // merges with the outer block
        assert_eq!(list.len(), 3);
        assert!(matches!(
            func.arena[list[0]].kind,
            ExprKind::LocalSet { index: 0, .. }
        ));
        assert!(matches!(
            func.arena[list[1]].kind,
            ExprKind::LocalSet { index: 1, .. }
        ));
        match &func.arena[list[2]].kind {
            ExprKind::Drop { value } => match &func.arena[*value].kind {
                ExprKind::Binary { left, right, .. } => {
                    assert!(matches!(func.arena[*left].kind, ExprKind::Const { .. }));
                    assert!(matches!(func.arena[*right].kind, ExprKind::Const { .. }));
                }
                other => panic!("expected Binary, got {:?}", other),
            },
            other => panic!("expected Drop, got {:?}", other),
        }
    }

    #[test]
    fn hoists_return_value() {
        let mut func = func_with_body(|b| {
            let s0 = set(b, 0);
            let c = b.make_const(Literal::I32(3));
            let block = b.make_block(None, vec![s0, c]);
            b.make_return(Some(block))
        });
        func.result = Type::I32;
        run(&mut func);
        let list = body_list(&func);
        assert_eq!(list.len(), 2);
        match &func.arena[list[1]].kind {
            ExprKind::Return { value: Some(v) } => {
                assert!(matches!(func.arena[*v].kind, ExprKind::Const { .. }));
            }
            other => panic!("expected Return, got {:?}", other),
        }
    }

    #[test]
    fn single_element_blocks_are_not_hoisted() {
        let mut func = func_with_body(|b| {
            let c = b.make_const(Literal::I32(3));
            let block = b.make_block(None, vec![c]);
            let set = b.make_local_set(0, block);
            b.make_block(None, vec![set])
        });
        run(&mut func);
        let list = body_list(&func);
        match &func.arena[list[0]].kind {
            ExprKind::LocalSet { value, .. } => {
                // operand untouched (a one-element block has no prefix to move)
                assert!(matches!(func.arena[*value].kind, ExprKind::Block { .. }));
            }
            other => panic!("expected LocalSet, got {:?}", other),
        }
    }

    #[test]
    fn unreachable_tail_is_left_for_dce() {
        let mut func = func_with_body(|b| {
            let s0 = set(b, 0);
            let u = b.make_unreachable();
            let block = b.make_block(None, vec![s0, u]);
            let set = b.make_local_set(0, block);
            b.make_block(None, vec![set])
        });
        run(&mut func);
        let list = body_list(&func);
        match &func.arena[list[0]].kind {
            ExprKind::LocalSet { value, .. } => {
                assert!(matches!(func.arena[*value].kind, ExprKind::Block { .. }));
            }
            other => panic!("expected LocalSet, got {:?}", other),
        }
    }

    #[test]
    fn none_typed_parent_keeps_block_with_unreachable_child() {
        // hoisting would change the parent's effective type from none to
        // unreachable
        let mut func = func_with_body(|b| {
            let ret = b.make_return(None);
            let c = b.make_const(Literal::I32(1));
            let block = b.make_block(None, vec![ret, c]);
            b.make_local_set(0, block)
        });
        run(&mut func);
        match &func.arena[func.body].kind {
            ExprKind::LocalSet { value, .. } => {
                assert!(matches!(func.arena[*value].kind, ExprKind::Block { .. }));
            }
            other => panic!("expected LocalSet body, got {:?}", other),
        }
    }

    #[test]
    fn select_with_side_effecting_operand_is_not_rewritten() {
        let mut func = func_with_body(|b| {
            let call = b.make_call(0, vec![], Type::I32);
            let c1 = b.make_const(Literal::I32(1));
            let if_true = b.make_block(None, vec![call, c1]);
            let if_false = b.make_const(Literal::I32(2));
            let cond = b.make_const(Literal::I32(0));
            let sel = b.make_select(if_true, if_false, cond);
            b.make_drop(sel)
        });
        run(&mut func);
        // the drop's own hoist also declines (its operand is the select,
        // not a block), so the body shape is unchanged
        match &func.arena[func.body].kind {
            ExprKind::Drop { value } => match &func.arena[*value].kind {
                ExprKind::Select { if_true, .. } => {
                    assert!(matches!(func.arena[*if_true].kind, ExprKind::Block { .. }));
                }
                other => panic!("expected Select, got {:?}", other),
            },
            other => panic!("expected Drop, got {:?}", other),
        }
    }

    #[test]
    fn select_with_pure_operands_is_rewritten() {
        let mut func = func_with_body(|b| {
            let n = b.make_nop();
            let c1 = b.make_const(Literal::I32(1));
            let if_true = b.make_block(None, vec![n, c1]);
            let if_false = b.make_const(Literal::I32(2));
            let cond = b.make_const(Literal::I32(0));
            let sel = b.make_select(if_true, if_false, cond);
            b.make_drop(sel)
        });
        run(&mut func);
        let list = body_list(&func);
        assert_eq!(list.len(), 2);
        assert!(matches!(func.arena[list[0]].kind, ExprKind::Nop));
        match &func.arena[list[1]].kind {
            ExprKind::Drop { value } => {
                assert!(matches!(func.arena[*value].kind, ExprKind::Select { .. }));
            }
            other => panic!("expected Drop, got {:?}", other),
        }
    }

    #[test]
    fn call_operands_abort_on_side_effects() {
        let mut func = func_with_body(|b| {
            let inner_call = b.make_call(1, vec![], Type::I32);
            let c = b.make_const(Literal::I32(1));
            let arg = b.make_block(None, vec![inner_call, c]);
            b.make_call(0, vec![arg], Type::None)
        });
        run(&mut func);
        match &func.arena[func.body].kind {
            ExprKind::Call { operands, .. } => {
                assert!(matches!(
                    func.arena[operands[0]].kind,
                    ExprKind::Block { .. }
                ));
            }
            other => panic!("expected Call body, got {:?}", other),
        }
    }

    #[test]
    fn call_with_pure_block_operand_is_rewritten() {
        let mut func = func_with_body(|b| {
            let n = b.make_nop();
            let c = b.make_const(Literal::I32(1));
            let arg = b.make_block(None, vec![n, c]);
            b.make_call(0, vec![arg], Type::None)
        });
        run(&mut func);
        let list = body_list(&func);
        assert_eq!(list.len(), 2);
        assert!(matches!(func.arena[list[0]].kind, ExprKind::Nop));
        match &func.arena[list[1]].kind {
            ExprKind::Call { operands, .. } => {
                assert!(matches!(func.arena[operands[0]].kind, ExprKind::Const { .. }));
            }
            other => panic!("expected Call, got {:?}", other),
        }
    }

    #[test]
    fn hoists_br_if_value() {
        // Drop(br_if $l (block [set; const]) (const)) — the break's value
        // prefix moves out, preserving the flowed value
        let mut func = func_with_body(|b| {
            let s0 = set(b, 0);
            let v = b.make_const(Literal::I32(7));
            let value = b.make_block(None, vec![s0, v]);
            let cond = b.make_const(Literal::I32(1));
            let br = b.make_break(Name::from("l"), Some(cond), Some(value));
            let drop = b.make_drop(br);
            b.make_block(Some(Name::from("l")), vec![drop])
        });
        run(&mut func);
        let list = body_list(&func);
        assert_eq!(list.len(), 2);
        assert!(matches!(
            func.arena[list[0]].kind,
            ExprKind::LocalSet { .. }
        ));
        match &func.arena[list[1]].kind {
            ExprKind::Drop { value } => match &func.arena[*value].kind {
                ExprKind::Break { value: Some(v), .. } => {
                    assert!(matches!(func.arena[*v].kind, ExprKind::Const { .. }));
                }
                other => panic!("expected Break, got {:?}", other),
            },
            other => panic!("expected Drop, got {:?}", other),
        }
    }

    // ── Properties ───────────────────────────────────────────────────────

    #[test]
    fn pass_is_idempotent() {
        let mut func = func_with_body(|b| {
            let s0 = set(b, 0);
            let s1 = set(b, 1);
            let s2 = set(b, 2);
            let inner = b.make_block(None, vec![s1, s2]);
            let call = call_void(b);
            let load = load_at(b, 100);
            let dropped = b.make_block(None, vec![call, load]);
            let drop = b.make_drop(dropped);
            b.make_block(None, vec![s0, inner, drop])
        });
        run(&mut func);
        let first = format!("{:?}", func.arena[func.body]);
        let first_len = body_list(&func).len();
        run(&mut func);
        assert_eq!(format!("{:?}", func.arena[func.body]), first);
        assert_eq!(body_list(&func).len(), first_len);
    }

    #[test]
    fn pass_factory_reports_metadata() {
        let pass = create_merge_blocks_pass();
        assert_eq!(pass.name(), "merge-blocks");
        assert!(pass.is_function_parallel());
    }
}
