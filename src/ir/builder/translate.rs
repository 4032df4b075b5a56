//! Operator translation — folds the Wasm operator stream into expression
//! trees.
//!
//! The translator simulates the Wasm evaluation stack with `ExprId`s and
//! keeps a control stack of open `block`/`loop`/`if` frames. Finished
//! statements accumulate per frame; closing a frame turns its statement list
//! into a `Block` (or the arm of an `If`, or a `Loop` body).
//!
//! Two details keep the reconstruction faithful:
//!
//! - When a statement is emitted while values are still pending on the
//!   stack, the pending values are spilled into scratch locals first, so the
//!   tree evaluates them in their original order. Constants (and reads of
//!   already-spilled scratch locals) commute with anything and stay put.
//! - After an unconditional transfer (`br`, `br_table`, `return`,
//!   `unreachable`) the rest of the frame is dead; operators are skipped
//!   until the frame closes.

use super::{Builder, ModuleContext};
use crate::ir::types::*;
use anyhow::{bail, Context, Result};
use wasmparser::{BinaryReader, MemArg, Operator};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    Func,
    Block,
    Loop,
    If,
    Else,
}

/// An open control-flow frame.
#[derive(Debug)]
struct Frame {
    kind: FrameKind,
    /// Minted eagerly; attached to the construct only when `targeted`.
    label: Name,
    /// Whether some branch targets this frame.
    targeted: bool,
    /// Declared result type (`Type::None` for void).
    result: Type,
    /// Value-stack height at frame entry.
    stack_base: usize,
    /// Finished statements, in order.
    stmts: Vec<ExprId>,
    /// The rest of the frame is dead code.
    unreachable: bool,
    /// If/Else only: the popped condition.
    condition: Option<ExprId>,
    /// Else only: the completed true arm.
    true_arm: Option<ExprId>,
}

struct FunctionTranslator<'m> {
    ctx: &'m ModuleContext,
    func: Function,
    value_stack: Vec<ExprId>,
    frames: Vec<Frame>,
    next_label: u32,
    /// Nesting depth of constructs being skipped as dead code.
    skip_depth: u32,
    /// First scratch-local index; reads at or above it are spill reads.
    first_scratch: usize,
    /// Completed function body, set when the outermost frame closes.
    done: Option<ExprId>,
}

/// Translate one function body from Wasm bytecode to an expression tree.
pub(super) fn translate_function(
    name: String,
    sig: &FuncSignature,
    locals: &[wasmparser::ValType],
    body: &[u8],
    ctx: &ModuleContext,
) -> Result<Function> {
    let mut local_types = Vec::with_capacity(locals.len());
    for &vt in locals {
        local_types
            .push(Type::from_val_type(vt).with_context(|| format!("unsupported local {:?}", vt))?);
    }

    let first_scratch = sig.params.len() + local_types.len();
    let mut t = FunctionTranslator {
        ctx,
        func: Function {
            name,
            params: sig.params.clone(),
            result: sig.result,
            locals: local_types,
            ..Function::default()
        },
        value_stack: Vec::new(),
        frames: Vec::new(),
        next_label: 0,
        skip_depth: 0,
        first_scratch,
        done: None,
    };

    let label = t.mint_label();
    t.push_frame(FrameKind::Func, label, sig.result);

    let mut reader = BinaryReader::new(body, 0);
    while !reader.eof() {
        let op = reader.read_operator().context("reading operator")?;
        t.translate_operator(&op)
            .with_context(|| format!("translating operator {:?}", op))?;
    }
    if !t.frames.is_empty() {
        bail!("function body ended with unclosed control frames");
    }

    let body = t.done.context("function body produced no expression")?;
    let mut func = t.func;
    func.body = body;
    Ok(func)
}

impl FunctionTranslator<'_> {
    fn mint_label(&mut self) -> Name {
        let n = self.next_label;
        self.next_label += 1;
        Name::new(format!("label${}", n))
    }

    fn push_frame(&mut self, kind: FrameKind, label: Name, result: Type) {
        self.frames.push(Frame {
            kind,
            label,
            targeted: false,
            result,
            stack_base: self.value_stack.len(),
            stmts: Vec::new(),
            unreachable: false,
            condition: None,
            true_arm: None,
        });
    }

    fn skipping(&self) -> bool {
        self.frames.last().map_or(false, |f| f.unreachable)
    }

    fn push_value(&mut self, id: ExprId) {
        self.value_stack.push(id);
    }

    fn pop_value(&mut self) -> Result<ExprId> {
        let base = self.frames.last().map_or(0, |f| f.stack_base);
        if self.value_stack.len() <= base {
            bail!("value stack underflow");
        }
        self.value_stack.pop().context("value stack underflow")
    }

    /// Spill every pending value into a scratch local so a statement can be
    /// emitted without reordering evaluation. Each spill's `local.set` lands
    /// in the frame that owns the value, which at this point is exactly
    /// "right before whatever that frame appends next".
    fn flush_pending(&mut self) -> Result<()> {
        for j in 0..self.frames.len() {
            let start = self.frames[j].stack_base;
            let end = if j + 1 < self.frames.len() {
                self.frames[j + 1].stack_base
            } else {
                self.value_stack.len()
            };
            for i in start..end {
                let v = self.value_stack[i];
                let ty = self.func.arena[v].ty;
                if !ty.is_concrete() {
                    continue;
                }
                match self.func.arena[v].kind {
                    // constants commute with anything
                    ExprKind::Const { .. } => continue,
                    // reads of scratch locals are already spill results
                    ExprKind::LocalGet { index } if index as usize >= self.first_scratch => {
                        continue
                    }
                    _ => {}
                }
                let scratch = self.func.add_local(ty);
                let mut b = Builder::new(&mut self.func.arena);
                let set = b.make_local_set(scratch, v);
                let get = b.make_local_get(scratch, ty);
                self.frames[j].stmts.push(set);
                self.value_stack[i] = get;
            }
        }
        Ok(())
    }

    /// Append a statement to the current frame; an unreachable-typed
    /// statement makes the rest of the frame dead.
    fn push_statement(&mut self, stmt: ExprId) -> Result<()> {
        self.flush_pending()?;
        let ty = self.func.arena[stmt].ty;
        let frame = self
            .frames
            .last_mut()
            .context("statement outside any frame")?;
        frame.stmts.push(stmt);
        if ty == Type::Unreachable {
            frame.unreachable = true;
        }
        Ok(())
    }

    /// Route a completed construct by its declared type: value producers go
    /// on the stack (even when internally unreachable — stack polymorphism),
    /// the rest become statements.
    fn dispose(&mut self, expr: ExprId, declared: Type) -> Result<()> {
        if declared.is_concrete() {
            self.push_value(expr);
            Ok(())
        } else {
            self.push_statement(expr)
        }
    }

    /// Resolve a branch depth to its frame: marks it targeted and returns
    /// the label plus the type of value the branch carries (loops take
    /// none on their back edge).
    fn branch_target(&mut self, depth: u32) -> Result<(Name, Type)> {
        let idx = self
            .frames
            .len()
            .checked_sub(depth as usize + 1)
            .with_context(|| format!("branch depth {} exceeds control stack", depth))?;
        let frame = &mut self.frames[idx];
        frame.targeted = true;
        let value_ty = match frame.kind {
            FrameKind::Loop => Type::None,
            _ => frame.result,
        };
        Ok((frame.label.clone(), value_ty))
    }

    /// Collect a closing frame's statements, popping its result value into
    /// tail position if it completed with one.
    fn finish_stmts(&mut self, frame: &mut Frame) -> Result<Vec<ExprId>> {
        if !frame.unreachable && frame.result.is_concrete() {
            if self.value_stack.len() <= frame.stack_base {
                bail!("missing result value at end of block");
            }
            let v = self.value_stack.pop().context("missing result value")?;
            frame.stmts.push(v);
        }
        if !frame.unreachable && self.value_stack.len() != frame.stack_base {
            bail!("unbalanced value stack at end of block");
        }
        self.value_stack.truncate(frame.stack_base);
        Ok(std::mem::take(&mut frame.stmts))
    }

    /// A statement list as a single expression: unwrapped when singleton,
    /// else an anonymous block.
    fn body_expr(&mut self, mut stmts: Vec<ExprId>) -> ExprId {
        if stmts.len() == 1 {
            stmts.remove(0)
        } else {
            Builder::new(&mut self.func.arena).make_block(None, stmts)
        }
    }

    /// Close the current frame and emit its construct.
    fn finish_frame(&mut self) -> Result<()> {
        let mut frame = self.frames.pop().context("end without open frame")?;
        let stmts = self.finish_stmts(&mut frame)?;

        match frame.kind {
            FrameKind::Func | FrameKind::Block => {
                let expr = if frame.targeted {
                    let block = Builder::new(&mut self.func.arena)
                        .make_block(Some(frame.label.clone()), stmts);
                    // breaks can complete the block even when the body
                    // doesn't fall through, so the declared type stands
                    finalize_to(&mut self.func.arena, block, frame.result);
                    block
                } else {
                    self.body_expr(stmts)
                };
                if frame.kind == FrameKind::Func {
                    self.done = Some(expr);
                } else {
                    self.dispose(expr, frame.result)?;
                }
            }
            FrameKind::Loop => {
                let body = self.body_expr(stmts);
                let name = if frame.targeted {
                    Some(frame.label.clone())
                } else {
                    None
                };
                let l = Builder::new(&mut self.func.arena).make_loop(name, body);
                self.dispose(l, frame.result)?;
            }
            FrameKind::If | FrameKind::Else => {
                let arm = self.body_expr(stmts);
                let (if_true, if_false) = match frame.kind {
                    FrameKind::If => (arm, None),
                    _ => (
                        frame.true_arm.take().context("else frame lost its arm")?,
                        Some(arm),
                    ),
                };
                let condition = frame.condition.take().context("if frame lost condition")?;
                let mut expr =
                    Builder::new(&mut self.func.arena).make_if(condition, if_true, if_false);
                if frame.targeted {
                    let block = Builder::new(&mut self.func.arena)
                        .make_block(Some(frame.label.clone()), vec![expr]);
                    finalize_to(&mut self.func.arena, block, frame.result);
                    expr = block;
                }
                self.dispose(expr, frame.result)?;
            }
        }
        Ok(())
    }

    /// Turn the current `If` frame into its `Else` half.
    fn handle_else(&mut self) -> Result<()> {
        let mut frame = self.frames.pop().context("else without open frame")?;
        if frame.kind != FrameKind::If {
            bail!("else without matching if");
        }
        let stmts = self.finish_stmts(&mut frame)?;
        let arm = self.body_expr(stmts);
        frame.true_arm = Some(arm);
        frame.kind = FrameKind::Else;
        frame.unreachable = false;
        self.frames.push(frame);
        Ok(())
    }

    fn block_result(&self, bt: wasmparser::BlockType) -> Result<Type> {
        match bt {
            wasmparser::BlockType::Empty => Ok(Type::None),
            wasmparser::BlockType::Type(vt) => {
                Type::from_val_type(vt).with_context(|| format!("unsupported block type {:?}", vt))
            }
            wasmparser::BlockType::FuncType(_) => {
                bail!("multi-value block signatures not supported")
            }
        }
    }

    fn mem_offset(memarg: &MemArg) -> Result<u32> {
        u32::try_from(memarg.offset).context("memory offset exceeds 32 bits")
    }

    // ── Emit helpers ─────────────────────────────────────────────────────

    fn emit_binary(&mut self, op: BinaryOp) -> Result<()> {
        let right = self.pop_value()?;
        let left = self.pop_value()?;
        let e = Builder::new(&mut self.func.arena).make_binary(op, left, right);
        self.push_value(e);
        Ok(())
    }

    fn emit_unary(&mut self, op: UnaryOp) -> Result<()> {
        let value = self.pop_value()?;
        let e = Builder::new(&mut self.func.arena).make_unary(op, value);
        self.push_value(e);
        Ok(())
    }

    fn emit_load(&mut self, bytes: u8, signed: bool, memarg: &MemArg, ty: Type) -> Result<()> {
        let offset = Self::mem_offset(memarg)?;
        let ptr = self.pop_value()?;
        let e = Builder::new(&mut self.func.arena).make_load(bytes, signed, offset, ptr, ty);
        self.push_value(e);
        Ok(())
    }

    fn emit_store(&mut self, bytes: u8, memarg: &MemArg) -> Result<()> {
        let offset = Self::mem_offset(memarg)?;
        let value = self.pop_value()?;
        let ptr = self.pop_value()?;
        let e = Builder::new(&mut self.func.arena).make_store(bytes, offset, ptr, value);
        self.push_statement(e)
    }

    fn emit_rmw(&mut self, op: AtomicOp, bytes: u8, memarg: &MemArg, ty: Type) -> Result<()> {
        let offset = Self::mem_offset(memarg)?;
        let value = self.pop_value()?;
        let ptr = self.pop_value()?;
        let e = Builder::new(&mut self.func.arena).make_atomic_rmw(op, bytes, offset, ptr, value, ty);
        self.push_value(e);
        Ok(())
    }

    fn emit_cmpxchg(&mut self, bytes: u8, memarg: &MemArg, ty: Type) -> Result<()> {
        let offset = Self::mem_offset(memarg)?;
        let replacement = self.pop_value()?;
        let expected = self.pop_value()?;
        let ptr = self.pop_value()?;
        let e = Builder::new(&mut self.func.arena)
            .make_atomic_cmpxchg(bytes, offset, ptr, expected, replacement, ty);
        self.push_value(e);
        Ok(())
    }

    fn emit_call(&mut self, function_index: u32) -> Result<()> {
        let (argc, result) = *self
            .ctx
            .func_sigs
            .get(function_index as usize)
            .with_context(|| format!("call to unknown function {}", function_index))?;
        let mut operands = Vec::with_capacity(argc);
        for _ in 0..argc {
            operands.push(self.pop_value()?);
        }
        operands.reverse();
        let imports = self.ctx.num_imported_functions;
        let mut b = Builder::new(&mut self.func.arena);
        let e = if function_index < imports {
            b.make_call_import(function_index, operands, result)
        } else {
            b.make_call(function_index - imports, operands, result)
        };
        if result.is_concrete() {
            self.push_value(e);
            Ok(())
        } else {
            self.push_statement(e)
        }
    }

    // ── Operator dispatch ────────────────────────────────────────────────

    fn translate_operator(&mut self, op: &Operator) -> Result<()> {
        // Dead code after an unconditional transfer: skip until the frame
        // closes, tracking nested constructs.
        if self.skipping() {
            match op {
                Operator::Block { .. } | Operator::Loop { .. } | Operator::If { .. } => {
                    self.skip_depth += 1;
                }
                Operator::Else if self.skip_depth == 0 => return self.handle_else(),
                Operator::End => {
                    if self.skip_depth > 0 {
                        self.skip_depth -= 1;
                    } else {
                        return self.finish_frame();
                    }
                }
                _ => {}
            }
            return Ok(());
        }

        match op {
            // Control flow
            Operator::Block { blockty } => {
                let result = self.block_result(*blockty)?;
                let label = self.mint_label();
                self.push_frame(FrameKind::Block, label, result);
            }
            Operator::Loop { blockty } => {
                let result = self.block_result(*blockty)?;
                let label = self.mint_label();
                self.push_frame(FrameKind::Loop, label, result);
            }
            Operator::If { blockty } => {
                let result = self.block_result(*blockty)?;
                let condition = self.pop_value()?;
                let label = self.mint_label();
                self.push_frame(FrameKind::If, label, result);
                if let Some(frame) = self.frames.last_mut() {
                    frame.condition = Some(condition);
                }
            }
            Operator::Else => self.handle_else()?,
            Operator::End => self.finish_frame()?,

            Operator::Br { relative_depth } => {
                let (name, value_ty) = self.branch_target(*relative_depth)?;
                let value = if value_ty.is_concrete() {
                    Some(self.pop_value()?)
                } else {
                    None
                };
                let e = Builder::new(&mut self.func.arena).make_break(name, None, value);
                self.push_statement(e)?;
            }
            Operator::BrIf { relative_depth } => {
                let condition = self.pop_value()?;
                let (name, value_ty) = self.branch_target(*relative_depth)?;
                if value_ty.is_concrete() {
                    // a br_if with a value flows the value onward
                    let value = self.pop_value()?;
                    let e = Builder::new(&mut self.func.arena).make_break(
                        name,
                        Some(condition),
                        Some(value),
                    );
                    self.push_value(e);
                } else {
                    let e =
                        Builder::new(&mut self.func.arena).make_break(name, Some(condition), None);
                    self.push_statement(e)?;
                }
            }
            Operator::BrTable { targets } => {
                let condition = self.pop_value()?;
                let (default, value_ty) = self.branch_target(targets.default())?;
                let mut names = Vec::with_capacity(targets.len() as usize);
                for depth in targets.targets() {
                    let depth = depth.context("reading br_table target")?;
                    let (name, _) = self.branch_target(depth)?;
                    names.push(name);
                }
                let value = if value_ty.is_concrete() {
                    Some(self.pop_value()?)
                } else {
                    None
                };
                let e = Builder::new(&mut self.func.arena)
                    .make_switch(names, default, condition, value);
                self.push_statement(e)?;
            }
            Operator::Return => {
                let value = if self.func.result.is_concrete() {
                    Some(self.pop_value()?)
                } else {
                    None
                };
                let e = Builder::new(&mut self.func.arena).make_return(value);
                self.push_statement(e)?;
            }
            Operator::Unreachable => {
                let e = Builder::new(&mut self.func.arena).make_unreachable();
                self.push_statement(e)?;
            }
            Operator::Nop => {
                // harmless; keep it without disturbing pending values
                let e = Builder::new(&mut self.func.arena).make_nop();
                if let Some(frame) = self.frames.last_mut() {
                    frame.stmts.push(e);
                }
            }

            // Parametric
            Operator::Drop => {
                let value = self.pop_value()?;
                let e = Builder::new(&mut self.func.arena).make_drop(value);
                self.push_statement(e)?;
            }
            Operator::Select => {
                let condition = self.pop_value()?;
                let if_false = self.pop_value()?;
                let if_true = self.pop_value()?;
                let e = Builder::new(&mut self.func.arena).make_select(if_true, if_false, condition);
                self.push_value(e);
            }

            // Locals and globals
            Operator::LocalGet { local_index } => {
                let ty = self
                    .func
                    .local_type(*local_index)
                    .with_context(|| format!("local.get {} out of range", local_index))?;
                let e = Builder::new(&mut self.func.arena).make_local_get(*local_index, ty);
                self.push_value(e);
            }
            Operator::LocalSet { local_index } => {
                let value = self.pop_value()?;
                let e = Builder::new(&mut self.func.arena).make_local_set(*local_index, value);
                self.push_statement(e)?;
            }
            Operator::LocalTee { local_index } => {
                let value = self.pop_value()?;
                let e = Builder::new(&mut self.func.arena).make_local_tee(*local_index, value);
                self.push_value(e);
            }
            Operator::GlobalGet { global_index } => {
                let ty = *self
                    .ctx
                    .globals
                    .get(*global_index as usize)
                    .with_context(|| format!("global.get {} out of range", global_index))?;
                let e = Builder::new(&mut self.func.arena).make_global_get(*global_index, ty);
                self.push_value(e);
            }
            Operator::GlobalSet { global_index } => {
                let value = self.pop_value()?;
                let e = Builder::new(&mut self.func.arena).make_global_set(*global_index, value);
                self.push_statement(e)?;
            }

            // Constants
            Operator::I32Const { value } => {
                let e = Builder::new(&mut self.func.arena).make_const(Literal::I32(*value));
                self.push_value(e);
            }
            Operator::I64Const { value } => {
                let e = Builder::new(&mut self.func.arena).make_const(Literal::I64(*value));
                self.push_value(e);
            }
            Operator::F32Const { value } => {
                let e = Builder::new(&mut self.func.arena)
                    .make_const(Literal::F32(f32::from_bits(value.bits())));
                self.push_value(e);
            }
            Operator::F64Const { value } => {
                let e = Builder::new(&mut self.func.arena)
                    .make_const(Literal::F64(f64::from_bits(value.bits())));
                self.push_value(e);
            }

            // Calls
            Operator::Call { function_index } => self.emit_call(*function_index)?,
            Operator::CallIndirect {
                type_index,
                table_index,
            } => {
                if *table_index != 0 {
                    bail!("call_indirect through table {} not supported", table_index);
                }
                let (argc, result) = *self
                    .ctx
                    .type_sigs
                    .get(*type_index as usize)
                    .with_context(|| format!("call_indirect to unknown type {}", type_index))?;
                let target = self.pop_value()?;
                let mut operands = Vec::with_capacity(argc);
                for _ in 0..argc {
                    operands.push(self.pop_value()?);
                }
                operands.reverse();
                let e = Builder::new(&mut self.func.arena)
                    .make_call_indirect(*type_index, target, operands, result);
                if result.is_concrete() {
                    self.push_value(e);
                } else {
                    self.push_statement(e)?;
                }
            }

            // Memory
            Operator::I32Load { memarg } => self.emit_load(4, false, memarg, Type::I32)?,
            Operator::I64Load { memarg } => self.emit_load(8, false, memarg, Type::I64)?,
            Operator::F32Load { memarg } => self.emit_load(4, false, memarg, Type::F32)?,
            Operator::F64Load { memarg } => self.emit_load(8, false, memarg, Type::F64)?,
            Operator::I32Load8S { memarg } => self.emit_load(1, true, memarg, Type::I32)?,
            Operator::I32Load8U { memarg } => self.emit_load(1, false, memarg, Type::I32)?,
            Operator::I32Load16S { memarg } => self.emit_load(2, true, memarg, Type::I32)?,
            Operator::I32Load16U { memarg } => self.emit_load(2, false, memarg, Type::I32)?,
            Operator::I64Load8S { memarg } => self.emit_load(1, true, memarg, Type::I64)?,
            Operator::I64Load8U { memarg } => self.emit_load(1, false, memarg, Type::I64)?,
            Operator::I64Load16S { memarg } => self.emit_load(2, true, memarg, Type::I64)?,
            Operator::I64Load16U { memarg } => self.emit_load(2, false, memarg, Type::I64)?,
            Operator::I64Load32S { memarg } => self.emit_load(4, true, memarg, Type::I64)?,
            Operator::I64Load32U { memarg } => self.emit_load(4, false, memarg, Type::I64)?,
            Operator::I32Store { memarg } => self.emit_store(4, memarg)?,
            Operator::I64Store { memarg } => self.emit_store(8, memarg)?,
            Operator::F32Store { memarg } => self.emit_store(4, memarg)?,
            Operator::F64Store { memarg } => self.emit_store(8, memarg)?,
            Operator::I32Store8 { memarg } => self.emit_store(1, memarg)?,
            Operator::I32Store16 { memarg } => self.emit_store(2, memarg)?,
            Operator::I64Store8 { memarg } => self.emit_store(1, memarg)?,
            Operator::I64Store16 { memarg } => self.emit_store(2, memarg)?,
            Operator::I64Store32 { memarg } => self.emit_store(4, memarg)?,

            // Atomics (full-width only)
            Operator::I32AtomicRmwAdd { memarg } => {
                self.emit_rmw(AtomicOp::Add, 4, memarg, Type::I32)?
            }
            Operator::I32AtomicRmwSub { memarg } => {
                self.emit_rmw(AtomicOp::Sub, 4, memarg, Type::I32)?
            }
            Operator::I32AtomicRmwAnd { memarg } => {
                self.emit_rmw(AtomicOp::And, 4, memarg, Type::I32)?
            }
            Operator::I32AtomicRmwOr { memarg } => {
                self.emit_rmw(AtomicOp::Or, 4, memarg, Type::I32)?
            }
            Operator::I32AtomicRmwXor { memarg } => {
                self.emit_rmw(AtomicOp::Xor, 4, memarg, Type::I32)?
            }
            Operator::I32AtomicRmwXchg { memarg } => {
                self.emit_rmw(AtomicOp::Xchg, 4, memarg, Type::I32)?
            }
            Operator::I64AtomicRmwAdd { memarg } => {
                self.emit_rmw(AtomicOp::Add, 8, memarg, Type::I64)?
            }
            Operator::I64AtomicRmwSub { memarg } => {
                self.emit_rmw(AtomicOp::Sub, 8, memarg, Type::I64)?
            }
            Operator::I64AtomicRmwAnd { memarg } => {
                self.emit_rmw(AtomicOp::And, 8, memarg, Type::I64)?
            }
            Operator::I64AtomicRmwOr { memarg } => {
                self.emit_rmw(AtomicOp::Or, 8, memarg, Type::I64)?
            }
            Operator::I64AtomicRmwXor { memarg } => {
                self.emit_rmw(AtomicOp::Xor, 8, memarg, Type::I64)?
            }
            Operator::I64AtomicRmwXchg { memarg } => {
                self.emit_rmw(AtomicOp::Xchg, 8, memarg, Type::I64)?
            }
            Operator::I32AtomicRmwCmpxchg { memarg } => self.emit_cmpxchg(4, memarg, Type::I32)?,
            Operator::I64AtomicRmwCmpxchg { memarg } => self.emit_cmpxchg(8, memarg, Type::I64)?,

            // i32 binary
            Operator::I32Add => self.emit_binary(BinaryOp::Add)?,
            Operator::I32Sub => self.emit_binary(BinaryOp::Sub)?,
            Operator::I32Mul => self.emit_binary(BinaryOp::Mul)?,
            Operator::I32DivS => self.emit_binary(BinaryOp::DivS)?,
            Operator::I32DivU => self.emit_binary(BinaryOp::DivU)?,
            Operator::I32RemS => self.emit_binary(BinaryOp::RemS)?,
            Operator::I32RemU => self.emit_binary(BinaryOp::RemU)?,
            Operator::I32And => self.emit_binary(BinaryOp::And)?,
            Operator::I32Or => self.emit_binary(BinaryOp::Or)?,
            Operator::I32Xor => self.emit_binary(BinaryOp::Xor)?,
            Operator::I32Shl => self.emit_binary(BinaryOp::Shl)?,
            Operator::I32ShrS => self.emit_binary(BinaryOp::ShrS)?,
            Operator::I32ShrU => self.emit_binary(BinaryOp::ShrU)?,
            Operator::I32Rotl => self.emit_binary(BinaryOp::Rotl)?,
            Operator::I32Rotr => self.emit_binary(BinaryOp::Rotr)?,
            Operator::I32Eq => self.emit_binary(BinaryOp::Eq)?,
            Operator::I32Ne => self.emit_binary(BinaryOp::Ne)?,
            Operator::I32LtS => self.emit_binary(BinaryOp::LtS)?,
            Operator::I32LtU => self.emit_binary(BinaryOp::LtU)?,
            Operator::I32GtS => self.emit_binary(BinaryOp::GtS)?,
            Operator::I32GtU => self.emit_binary(BinaryOp::GtU)?,
            Operator::I32LeS => self.emit_binary(BinaryOp::LeS)?,
            Operator::I32LeU => self.emit_binary(BinaryOp::LeU)?,
            Operator::I32GeS => self.emit_binary(BinaryOp::GeS)?,
            Operator::I32GeU => self.emit_binary(BinaryOp::GeU)?,

            // i64 binary
            Operator::I64Add => self.emit_binary(BinaryOp::Add)?,
            Operator::I64Sub => self.emit_binary(BinaryOp::Sub)?,
            Operator::I64Mul => self.emit_binary(BinaryOp::Mul)?,
            Operator::I64DivS => self.emit_binary(BinaryOp::DivS)?,
            Operator::I64DivU => self.emit_binary(BinaryOp::DivU)?,
            Operator::I64RemS => self.emit_binary(BinaryOp::RemS)?,
            Operator::I64RemU => self.emit_binary(BinaryOp::RemU)?,
            Operator::I64And => self.emit_binary(BinaryOp::And)?,
            Operator::I64Or => self.emit_binary(BinaryOp::Or)?,
            Operator::I64Xor => self.emit_binary(BinaryOp::Xor)?,
            Operator::I64Shl => self.emit_binary(BinaryOp::Shl)?,
            Operator::I64ShrS => self.emit_binary(BinaryOp::ShrS)?,
            Operator::I64ShrU => self.emit_binary(BinaryOp::ShrU)?,
            Operator::I64Rotl => self.emit_binary(BinaryOp::Rotl)?,
            Operator::I64Rotr => self.emit_binary(BinaryOp::Rotr)?,
            Operator::I64Eq => self.emit_binary(BinaryOp::Eq)?,
            Operator::I64Ne => self.emit_binary(BinaryOp::Ne)?,
            Operator::I64LtS => self.emit_binary(BinaryOp::LtS)?,
            Operator::I64LtU => self.emit_binary(BinaryOp::LtU)?,
            Operator::I64GtS => self.emit_binary(BinaryOp::GtS)?,
            Operator::I64GtU => self.emit_binary(BinaryOp::GtU)?,
            Operator::I64LeS => self.emit_binary(BinaryOp::LeS)?,
            Operator::I64LeU => self.emit_binary(BinaryOp::LeU)?,
            Operator::I64GeS => self.emit_binary(BinaryOp::GeS)?,
            Operator::I64GeU => self.emit_binary(BinaryOp::GeU)?,

            // f32 binary
            Operator::F32Add => self.emit_binary(BinaryOp::Add)?,
            Operator::F32Sub => self.emit_binary(BinaryOp::Sub)?,
            Operator::F32Mul => self.emit_binary(BinaryOp::Mul)?,
            Operator::F32Div => self.emit_binary(BinaryOp::Div)?,
            Operator::F32Min => self.emit_binary(BinaryOp::Min)?,
            Operator::F32Max => self.emit_binary(BinaryOp::Max)?,
            Operator::F32Copysign => self.emit_binary(BinaryOp::Copysign)?,
            Operator::F32Eq => self.emit_binary(BinaryOp::Eq)?,
            Operator::F32Ne => self.emit_binary(BinaryOp::Ne)?,
            Operator::F32Lt => self.emit_binary(BinaryOp::Lt)?,
            Operator::F32Gt => self.emit_binary(BinaryOp::Gt)?,
            Operator::F32Le => self.emit_binary(BinaryOp::Le)?,
            Operator::F32Ge => self.emit_binary(BinaryOp::Ge)?,

            // f64 binary
            Operator::F64Add => self.emit_binary(BinaryOp::Add)?,
            Operator::F64Sub => self.emit_binary(BinaryOp::Sub)?,
            Operator::F64Mul => self.emit_binary(BinaryOp::Mul)?,
            Operator::F64Div => self.emit_binary(BinaryOp::Div)?,
            Operator::F64Min => self.emit_binary(BinaryOp::Min)?,
            Operator::F64Max => self.emit_binary(BinaryOp::Max)?,
            Operator::F64Copysign => self.emit_binary(BinaryOp::Copysign)?,
            Operator::F64Eq => self.emit_binary(BinaryOp::Eq)?,
            Operator::F64Ne => self.emit_binary(BinaryOp::Ne)?,
            Operator::F64Lt => self.emit_binary(BinaryOp::Lt)?,
            Operator::F64Gt => self.emit_binary(BinaryOp::Gt)?,
            Operator::F64Le => self.emit_binary(BinaryOp::Le)?,
            Operator::F64Ge => self.emit_binary(BinaryOp::Ge)?,

            // unary
            Operator::I32Eqz => self.emit_unary(UnaryOp::Eqz)?,
            Operator::I64Eqz => self.emit_unary(UnaryOp::Eqz)?,
            Operator::I32Clz => self.emit_unary(UnaryOp::Clz)?,
            Operator::I32Ctz => self.emit_unary(UnaryOp::Ctz)?,
            Operator::I32Popcnt => self.emit_unary(UnaryOp::Popcnt)?,
            Operator::I64Clz => self.emit_unary(UnaryOp::Clz)?,
            Operator::I64Ctz => self.emit_unary(UnaryOp::Ctz)?,
            Operator::I64Popcnt => self.emit_unary(UnaryOp::Popcnt)?,
            Operator::F32Abs => self.emit_unary(UnaryOp::Abs)?,
            Operator::F32Neg => self.emit_unary(UnaryOp::Neg)?,
            Operator::F32Ceil => self.emit_unary(UnaryOp::Ceil)?,
            Operator::F32Floor => self.emit_unary(UnaryOp::Floor)?,
            Operator::F32Trunc => self.emit_unary(UnaryOp::Trunc)?,
            Operator::F32Nearest => self.emit_unary(UnaryOp::Nearest)?,
            Operator::F32Sqrt => self.emit_unary(UnaryOp::Sqrt)?,
            Operator::F64Abs => self.emit_unary(UnaryOp::Abs)?,
            Operator::F64Neg => self.emit_unary(UnaryOp::Neg)?,
            Operator::F64Ceil => self.emit_unary(UnaryOp::Ceil)?,
            Operator::F64Floor => self.emit_unary(UnaryOp::Floor)?,
            Operator::F64Trunc => self.emit_unary(UnaryOp::Trunc)?,
            Operator::F64Nearest => self.emit_unary(UnaryOp::Nearest)?,
            Operator::F64Sqrt => self.emit_unary(UnaryOp::Sqrt)?,
            Operator::I32WrapI64 => self.emit_unary(UnaryOp::WrapI64)?,
            Operator::I64ExtendI32S => self.emit_unary(UnaryOp::ExtendI32S)?,
            Operator::I64ExtendI32U => self.emit_unary(UnaryOp::ExtendI32U)?,

            _ => bail!("unsupported operator: {:?}", op),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::ir::types::*;
    use crate::ir::build_module;
    use crate::parser::parse_wasm;

    fn build(wat: &str) -> Module {
        let wasm = wat::parse_str(wat).unwrap();
        let parsed = parse_wasm(&wasm).unwrap();
        build_module(&parsed).unwrap()
    }

    fn body_kind(func: &Function) -> &ExprKind {
        &func.arena[func.body].kind
    }

    #[test]
    fn add_function_becomes_binary_tree() {
        let module = build(
            r#"
            (module
                (func (param i32 i32) (result i32)
                    local.get 0
                    local.get 1
                    i32.add
                )
            )
        "#,
        );
        let func = &module.functions[0];
        assert_eq!(func.result, Type::I32);
        match body_kind(func) {
            ExprKind::Binary { op, .. } => assert_eq!(*op, BinaryOp::Add),
            other => panic!("expected Binary body, got {:?}", other),
        }
        assert_eq!(func.arena[func.body].ty, Type::I32);
    }

    #[test]
    fn untargeted_block_is_anonymous() {
        let module = build(
            r#"
            (module
                (func (result i32)
                    (block (result i32)
                        (nop)
                        (i32.const 7)
                    )
                )
            )
        "#,
        );
        let func = &module.functions[0];
        match body_kind(func) {
            ExprKind::Block { name, list } => {
                assert!(name.is_none());
                assert_eq!(list.len(), 2);
            }
            other => panic!("expected anonymous Block, got {:?}", other),
        }
    }

    #[test]
    fn targeted_block_keeps_its_label() {
        let module = build(
            r#"
            (module
                (func (result i32)
                    (block $out (result i32)
                        (br $out (i32.const 1))
                    )
                )
            )
        "#,
        );
        let func = &module.functions[0];
        match body_kind(func) {
            ExprKind::Block { name, .. } => {
                let name = name.as_ref().expect("label should survive");
                match &func.arena[func.body].kind {
                    ExprKind::Block { list, .. } => match &func.arena[list[0]].kind {
                        ExprKind::Break { name: target, .. } => assert_eq!(target, name),
                        other => panic!("expected Break, got {:?}", other),
                    },
                    _ => unreachable!(),
                }
            }
            other => panic!("expected labeled Block, got {:?}", other),
        }
        assert_eq!(func.arena[func.body].ty, Type::I32);
    }

    #[test]
    fn br_if_with_value_flows_the_value() {
        let module = build(
            r#"
            (module
                (func (result i32)
                    (block $out (result i32)
                        (drop (br_if $out (i32.const 10) (i32.const 0)))
                        (i32.const 20)
                    )
                )
            )
        "#,
        );
        let func = &module.functions[0];
        // body is block $out [ drop(br_if), const 20 ]
        match body_kind(func) {
            ExprKind::Block { list, .. } => {
                match &func.arena[list[0]].kind {
                    ExprKind::Drop { value } => match &func.arena[*value].kind {
                        ExprKind::Break {
                            condition, value, ..
                        } => {
                            assert!(condition.is_some());
                            assert!(value.is_some());
                            assert_eq!(func.arena[list[0]].ty, Type::None);
                        }
                        other => panic!("expected Break under Drop, got {:?}", other),
                    },
                    other => panic!("expected Drop, got {:?}", other),
                }
            }
            other => panic!("expected Block, got {:?}", other),
        }
    }

    #[test]
    fn dead_code_after_return_is_dropped() {
        let module = build(
            r#"
            (module
                (func (result i32)
                    (return (i32.const 1))
                    (i32.const 2)
                    (i32.const 3)
                    i32.add
                )
            )
        "#,
        );
        let func = &module.functions[0];
        match body_kind(func) {
            ExprKind::Return { value } => assert!(value.is_some()),
            other => panic!("expected lone Return, got {:?}", other),
        }
    }

    #[test]
    fn pending_value_spills_before_statement() {
        // local.get 0 is pending when the store executes; it must be
        // spilled so its read happens before the store.
        let module = build(
            r#"
            (module
                (memory 1)
                (func (param i32) (result i32)
                    local.get 0
                    (i32.store (i32.const 0) (i32.const 5))
                    i32.const 1
                    i32.add
                )
            )
        "#,
        );
        let func = &module.functions[0];
        match body_kind(func) {
            ExprKind::Block { list, .. } => {
                // spill set, store, then the add of the spilled read
                assert!(matches!(
                    func.arena[list[0]].kind,
                    ExprKind::LocalSet { .. }
                ));
                assert!(matches!(func.arena[list[1]].kind, ExprKind::Store { .. }));
                match &func.arena[list[2]].kind {
                    ExprKind::Binary { left, .. } => {
                        assert!(matches!(
                            func.arena[*left].kind,
                            ExprKind::LocalGet { .. }
                        ));
                    }
                    other => panic!("expected Binary tail, got {:?}", other),
                }
            }
            other => panic!("expected Block body, got {:?}", other),
        }
        // one scratch local was added
        assert_eq!(func.locals.len(), 1);
    }

    #[test]
    fn loop_with_continue_keeps_loop_label() {
        let module = build(
            r#"
            (module
                (func (param i32)
                    (loop $l
                        (br_if $l (local.get 0))
                    )
                )
            )
        "#,
        );
        let func = &module.functions[0];
        match body_kind(func) {
            ExprKind::Loop { name, body } => {
                let name = name.as_ref().expect("loop label should survive");
                match &func.arena[*body].kind {
                    ExprKind::Break {
                        name: target,
                        condition,
                        value,
                    } => {
                        assert_eq!(target, name);
                        assert!(condition.is_some());
                        assert!(value.is_none());
                    }
                    other => panic!("expected Break body, got {:?}", other),
                }
            }
            other => panic!("expected Loop, got {:?}", other),
        }
    }

    #[test]
    fn if_else_builds_both_arms() {
        let module = build(
            r#"
            (module
                (func (param i32) (result i32)
                    (if (result i32) (local.get 0)
                        (then (i32.const 1))
                        (else (i32.const 2))
                    )
                )
            )
        "#,
        );
        let func = &module.functions[0];
        match body_kind(func) {
            ExprKind::If {
                if_false: Some(_), ..
            } => {}
            other => panic!("expected If with else, got {:?}", other),
        }
        assert_eq!(func.arena[func.body].ty, Type::I32);
    }

    #[test]
    fn call_separates_imports_from_local_functions() {
        let module = build(
            r#"
            (module
                (import "env" "log" (func $log (param i32)))
                (func $local (result i32) (i32.const 3))
                (func (result i32)
                    (call $log (i32.const 1))
                    (call $local)
                )
            )
        "#,
        );
        let func = &module.functions[1];
        match body_kind(func) {
            ExprKind::Block { list, .. } => {
                assert!(matches!(
                    func.arena[list[0]].kind,
                    ExprKind::CallImport { index: 0, .. }
                ));
                assert!(matches!(
                    func.arena[list[1]].kind,
                    ExprKind::Call { index: 0, .. }
                ));
            }
            other => panic!("expected Block, got {:?}", other),
        }
    }
}
