//! S-expression printer for the IR.
//!
//! Produces a deterministic, wat-flavored dump of a module. This is the
//! observable output of the pipeline: the CLI prints it, and the end-to-end
//! tests assert on it. It is a readable rendition of the tree, not a
//! re-encodable text format.

use crate::ir::{ExprId, ExprKind, Function, Module, Type, UnaryOp};
use std::fmt::Write;

/// Print a whole module.
pub fn print_module(module: &Module) -> String {
    let mut p = Printer::new(module);
    p.open("(module");
    for import in &module.func_imports {
        p.line(&format!(
            "(import \"{}\" \"{}\" (func ${}{}{}))",
            import.module_name,
            import.func_name,
            import.func_name,
            signature_params(&import.signature.params),
            signature_result(import.signature.result),
        ));
    }
    if let Some(memory) = &module.memory {
        match memory.maximum_pages {
            Some(max) => p.line(&format!("(memory {} {})", memory.initial_pages, max)),
            None => p.line(&format!("(memory {})", memory.initial_pages)),
        }
    }
    for export in &module.func_exports {
        let name = module
            .functions
            .get(export.index as usize)
            .map(|f| f.name.as_str())
            .unwrap_or("unknown");
        p.line(&format!("(export \"{}\" (func ${}))", export.name, name));
    }
    for func in &module.functions {
        p.print_function(func);
    }
    p.close();
    p.out
}

/// Print a single function.
pub fn print_function(module: &Module, func: &Function) -> String {
    let mut p = Printer::new(module);
    p.print_function(func);
    p.out
}

fn signature_params(params: &[Type]) -> String {
    if params.is_empty() {
        String::new()
    } else {
        let mut s = String::from(" (param");
        for ty in params {
            let _ = write!(s, " {}", ty);
        }
        s.push(')');
        s
    }
}

fn signature_result(result: Type) -> String {
    if result.is_concrete() {
        format!(" (result {})", result)
    } else {
        String::new()
    }
}

struct Printer<'m> {
    module: &'m Module,
    out: String,
    indent: usize,
}

impl<'m> Printer<'m> {
    fn new(module: &'m Module) -> Self {
        Printer {
            module,
            out: String::new(),
            indent: 0,
        }
    }

    fn pad(&mut self) {
        for _ in 0..self.indent {
            self.out.push(' ');
        }
    }

    /// A complete line at the current indent.
    fn line(&mut self, text: &str) {
        self.pad();
        self.out.push_str(text);
        self.out.push('\n');
    }

    /// Opens a form whose children follow on their own lines.
    fn open(&mut self, head: &str) {
        self.line(head);
        self.indent += 1;
    }

    fn close(&mut self) {
        self.indent -= 1;
        self.line(")");
    }

    fn print_function(&mut self, func: &Function) {
        self.open(&format!(
            "(func ${}{}{}",
            func.name,
            signature_params(&func.params),
            signature_result(func.result),
        ));
        if !func.locals.is_empty() {
            let mut locals = String::from("(local");
            for ty in &func.locals {
                let _ = write!(locals, " {}", ty);
            }
            locals.push(')');
            self.line(&locals);
        }
        self.print_expr(func, func.body);
        self.close();
    }

    fn print_expr(&mut self, func: &Function, id: ExprId) {
        let expr = &func.arena[id];
        match &expr.kind {
            ExprKind::Block { name, list } => {
                let mut head = String::from("(block");
                if let Some(name) = name {
                    let _ = write!(head, " ${}", name);
                }
                head.push_str(&signature_result(expr.ty));
                self.open(&head);
                for &item in list {
                    self.print_expr(func, item);
                }
                self.close();
            }
            ExprKind::If {
                condition,
                if_true,
                if_false,
            } => {
                self.open(&format!("(if{}", signature_result(expr.ty)));
                self.print_expr(func, *condition);
                self.print_expr(func, *if_true);
                if let Some(if_false) = if_false {
                    self.print_expr(func, *if_false);
                }
                self.close();
            }
            ExprKind::Loop { name, body } => {
                let mut head = String::from("(loop");
                if let Some(name) = name {
                    let _ = write!(head, " ${}", name);
                }
                head.push_str(&signature_result(expr.ty));
                self.open(&head);
                self.print_expr(func, *body);
                self.close();
            }
            ExprKind::Break {
                name,
                condition,
                value,
            } => {
                let op = if condition.is_some() { "br_if" } else { "br" };
                if condition.is_none() && value.is_none() {
                    self.line(&format!("(br ${})", name));
                } else {
                    self.open(&format!("({} ${}", op, name));
                    if let Some(value) = value {
                        self.print_expr(func, *value);
                    }
                    if let Some(condition) = condition {
                        self.print_expr(func, *condition);
                    }
                    self.close();
                }
            }
            ExprKind::Switch {
                targets,
                default,
                condition,
                value,
            } => {
                let mut head = String::from("(br_table");
                for target in targets {
                    let _ = write!(head, " ${}", target);
                }
                let _ = write!(head, " ${}", default);
                self.open(&head);
                if let Some(value) = value {
                    self.print_expr(func, *value);
                }
                self.print_expr(func, *condition);
                self.close();
            }
            ExprKind::Call { index, operands } => {
                let callee = self
                    .module
                    .functions
                    .get(*index as usize)
                    .map(|f| f.name.clone())
                    .unwrap_or_else(|| format!("func_{}", index));
                if operands.is_empty() {
                    self.line(&format!("(call ${})", callee));
                } else {
                    self.open(&format!("(call ${}", callee));
                    for &op in operands {
                        self.print_expr(func, op);
                    }
                    self.close();
                }
            }
            ExprKind::CallImport { index, operands } => {
                let callee = self
                    .module
                    .func_imports
                    .get(*index as usize)
                    .map(|i| i.func_name.clone())
                    .unwrap_or_else(|| format!("import_{}", index));
                if operands.is_empty() {
                    self.line(&format!("(call_import ${})", callee));
                } else {
                    self.open(&format!("(call_import ${}", callee));
                    for &op in operands {
                        self.print_expr(func, op);
                    }
                    self.close();
                }
            }
            ExprKind::CallIndirect {
                type_index,
                target,
                operands,
            } => {
                self.open(&format!("(call_indirect (type {})", type_index));
                for &op in operands {
                    self.print_expr(func, op);
                }
                self.print_expr(func, *target);
                self.close();
            }
            ExprKind::LocalGet { index } => self.line(&format!("(local.get {})", index)),
            ExprKind::LocalSet { index, value } => {
                let op = if expr.ty.is_concrete() {
                    "local.tee"
                } else {
                    "local.set"
                };
                self.open(&format!("({} {}", op, index));
                self.print_expr(func, *value);
                self.close();
            }
            ExprKind::GlobalGet { index } => self.line(&format!("(global.get {})", index)),
            ExprKind::GlobalSet { index, value } => {
                self.open(&format!("(global.set {}", index));
                self.print_expr(func, *value);
                self.close();
            }
            ExprKind::Load {
                bytes,
                signed,
                offset,
                ptr,
            } => {
                self.open(&format!(
                    "({}{}",
                    memory_op_name(expr.ty, "load", *bytes, Some(*signed)),
                    offset_suffix(*offset),
                ));
                self.print_expr(func, *ptr);
                self.close();
            }
            ExprKind::Store {
                bytes,
                offset,
                ptr,
                value,
            } => {
                let value_ty = func.arena[*value].ty;
                self.open(&format!(
                    "({}{}",
                    memory_op_name(value_ty, "store", *bytes, None),
                    offset_suffix(*offset),
                ));
                self.print_expr(func, *ptr);
                self.print_expr(func, *value);
                self.close();
            }
            ExprKind::AtomicRmw {
                op,
                bytes: _,
                offset,
                ptr,
                value,
            } => {
                let name = match op {
                    crate::ir::AtomicOp::Add => "add",
                    crate::ir::AtomicOp::Sub => "sub",
                    crate::ir::AtomicOp::And => "and",
                    crate::ir::AtomicOp::Or => "or",
                    crate::ir::AtomicOp::Xor => "xor",
                    crate::ir::AtomicOp::Xchg => "xchg",
                };
                self.open(&format!(
                    "({}.atomic.rmw.{}{}",
                    expr.ty,
                    name,
                    offset_suffix(*offset),
                ));
                self.print_expr(func, *ptr);
                self.print_expr(func, *value);
                self.close();
            }
            ExprKind::AtomicCmpxchg {
                bytes: _,
                offset,
                ptr,
                expected,
                replacement,
            } => {
                self.open(&format!(
                    "({}.atomic.rmw.cmpxchg{}",
                    expr.ty,
                    offset_suffix(*offset),
                ));
                self.print_expr(func, *ptr);
                self.print_expr(func, *expected);
                self.print_expr(func, *replacement);
                self.close();
            }
            ExprKind::Const { value } => {
                self.line(&format!("({}.const {})", value.ty(), value));
            }
            ExprKind::Unary { op, value } => {
                self.open(&format!("({}", unary_name(*op, func.arena[*value].ty)));
                self.print_expr(func, *value);
                self.close();
            }
            ExprKind::Binary { op, left, right } => {
                self.open(&format!(
                    "({}.{}",
                    func.arena[*left].ty,
                    binary_name(*op)
                ));
                self.print_expr(func, *left);
                self.print_expr(func, *right);
                self.close();
            }
            ExprKind::Select {
                if_true,
                if_false,
                condition,
            } => {
                self.open("(select");
                self.print_expr(func, *if_true);
                self.print_expr(func, *if_false);
                self.print_expr(func, *condition);
                self.close();
            }
            ExprKind::Drop { value } => {
                self.open("(drop");
                self.print_expr(func, *value);
                self.close();
            }
            ExprKind::Return { value } => match value {
                Some(value) => {
                    self.open("(return");
                    self.print_expr(func, *value);
                    self.close();
                }
                None => self.line("(return)"),
            },
            ExprKind::Nop => self.line("(nop)"),
            ExprKind::Unreachable => self.line("(unreachable)"),
        }
    }
}

fn offset_suffix(offset: u32) -> String {
    if offset == 0 {
        String::new()
    } else {
        format!(" offset={}", offset)
    }
}

/// `i32.load`, `i32.load8_s`, `i64.store32`, ...
fn memory_op_name(ty: Type, op: &str, bytes: u8, signed: Option<bool>) -> String {
    let full_width = match ty {
        Type::I32 | Type::F32 => 4,
        Type::I64 | Type::F64 => 8,
        _ => bytes,
    };
    if bytes >= full_width {
        format!("{}.{}", ty, op)
    } else {
        let sign = match signed {
            Some(true) => "_s",
            Some(false) => "_u",
            None => "",
        };
        format!("{}.{}{}{}", ty, op, bytes as u32 * 8, sign)
    }
}

fn unary_name(op: UnaryOp, operand: Type) -> String {
    match op {
        UnaryOp::WrapI64 => "i32.wrap_i64".to_string(),
        UnaryOp::ExtendI32S => "i64.extend_i32_s".to_string(),
        UnaryOp::ExtendI32U => "i64.extend_i32_u".to_string(),
        _ => {
            let name = match op {
                UnaryOp::Eqz => "eqz",
                UnaryOp::Clz => "clz",
                UnaryOp::Ctz => "ctz",
                UnaryOp::Popcnt => "popcnt",
                UnaryOp::Abs => "abs",
                UnaryOp::Neg => "neg",
                UnaryOp::Ceil => "ceil",
                UnaryOp::Floor => "floor",
                UnaryOp::Trunc => "trunc",
                UnaryOp::Nearest => "nearest",
                UnaryOp::Sqrt => "sqrt",
                _ => "unknown",
            };
            format!("{}.{}", operand, name)
        }
    }
}

fn binary_name(op: crate::ir::BinaryOp) -> &'static str {
    use crate::ir::BinaryOp;
    match op {
        BinaryOp::Add => "add",
        BinaryOp::Sub => "sub",
        BinaryOp::Mul => "mul",
        BinaryOp::DivS => "div_s",
        BinaryOp::DivU => "div_u",
        BinaryOp::RemS => "rem_s",
        BinaryOp::RemU => "rem_u",
        BinaryOp::And => "and",
        BinaryOp::Or => "or",
        BinaryOp::Xor => "xor",
        BinaryOp::Shl => "shl",
        BinaryOp::ShrS => "shr_s",
        BinaryOp::ShrU => "shr_u",
        BinaryOp::Rotl => "rotl",
        BinaryOp::Rotr => "rotr",
        BinaryOp::Div => "div",
        BinaryOp::Min => "min",
        BinaryOp::Max => "max",
        BinaryOp::Copysign => "copysign",
        BinaryOp::Eq => "eq",
        BinaryOp::Ne => "ne",
        BinaryOp::LtS => "lt_s",
        BinaryOp::LtU => "lt_u",
        BinaryOp::GtS => "gt_s",
        BinaryOp::GtU => "gt_u",
        BinaryOp::LeS => "le_s",
        BinaryOp::LeU => "le_u",
        BinaryOp::GeS => "ge_s",
        BinaryOp::GeU => "ge_u",
        BinaryOp::Lt => "lt",
        BinaryOp::Gt => "gt",
        BinaryOp::Le => "le",
        BinaryOp::Ge => "ge",
    }
}
