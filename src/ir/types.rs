//! IR type definitions.
//!
//! These types represent a WebAssembly function body as a tree of expression
//! nodes, the shape the structured optimizer works on. Each node carries a
//! kind with its ordered children and a type; blocks may carry a label that
//! breaks and switches target by name.
//!
//! Nodes live in an [`Arena`] owned by their [`Function`]. Child slots are
//! [`ExprId`]s into that arena, so a structural rewrite is a slot
//! reassignment, never a deep copy. Nodes detached from the tree simply
//! become unreachable in the arena.

use id_arena::{Arena, Id};
use std::fmt;

/// Handle to an expression node in a function's arena.
pub type ExprId = Id<Expr>;

/// A block/loop label. Breaks and switches refer to their target by name.
///
/// Labels are unique within a function: the IR builder mints a fresh name for
/// every construct that is actually targeted by a branch, and leaves the rest
/// anonymous.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Name(String);

impl Name {
    pub fn new(name: impl Into<String>) -> Self {
        Name(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Name {
    fn from(s: &str) -> Self {
        Name(s.to_string())
    }
}

/// Expression types.
///
/// `None` is the type of statements, `Unreachable` the type of expressions
/// that never fall through (breaks, returns, traps). The other four are the
/// Wasm value types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Type {
    None,
    Unreachable,
    I32,
    I64,
    F32,
    F64,
}

impl Type {
    /// A concrete type is an actual value type, i.e. not `None` and not
    /// `Unreachable`.
    pub fn is_concrete(self) -> bool {
        !matches!(self, Type::None | Type::Unreachable)
    }

    /// Convert a wasmparser value type. Returns `None` for reference types
    /// and other post-MVP types the IR does not model.
    pub fn from_val_type(vt: wasmparser::ValType) -> Option<Self> {
        use wasmparser::ValType;
        match vt {
            ValType::I32 => Some(Type::I32),
            ValType::I64 => Some(Type::I64),
            ValType::F32 => Some(Type::F32),
            ValType::F64 => Some(Type::F64),
            _ => None,
        }
    }

    /// Whether this is an integer value type.
    pub fn is_integer(self) -> bool {
        matches!(self, Type::I32 | Type::I64)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Type::None => "none",
            Type::Unreachable => "unreachable",
            Type::I32 => "i32",
            Type::I64 => "i64",
            Type::F32 => "f32",
            Type::F64 => "f64",
        };
        write!(f, "{}", s)
    }
}

/// Constant value in the IR.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Literal {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
}

impl Literal {
    /// Returns the value type of this constant.
    pub fn ty(&self) -> Type {
        match self {
            Literal::I32(_) => Type::I32,
            Literal::I64(_) => Type::I64,
            Literal::F32(_) => Type::F32,
            Literal::F64(_) => Type::F64,
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::I32(v) => write!(f, "{}", v),
            Literal::I64(v) => write!(f, "{}", v),
            Literal::F32(v) => write!(f, "{}", v),
            Literal::F64(v) => write!(f, "{}", v),
        }
    }
}

/// Unary operations. The operand type lives on the node, so one variant
/// covers every value type it is defined for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    // integer
    Eqz,
    Clz,
    Ctz,
    Popcnt,

    // float
    Abs,
    Neg,
    Ceil,
    Floor,
    Trunc,
    Nearest,
    Sqrt,

    // integer width changes
    WrapI64,
    ExtendI32S,
    ExtendI32U,
}

impl UnaryOp {
    /// Result type, given the operand's type.
    pub fn result_type(self, operand: Type) -> Type {
        match self {
            UnaryOp::Eqz => Type::I32,
            UnaryOp::WrapI64 => Type::I32,
            UnaryOp::ExtendI32S | UnaryOp::ExtendI32U => Type::I64,
            _ => operand,
        }
    }
}

/// Binary operations, likewise type-generic. Comparisons always produce i32.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    // arithmetic / bitwise
    Add,
    Sub,
    Mul,
    DivS,
    DivU,
    RemS,
    RemU,
    And,
    Or,
    Xor,
    Shl,
    ShrS,
    ShrU,
    Rotl,
    Rotr,

    // float arithmetic
    Div,
    Min,
    Max,
    Copysign,

    // integer comparisons
    Eq,
    Ne,
    LtS,
    LtU,
    GtS,
    GtU,
    LeS,
    LeU,
    GeS,
    GeU,

    // float comparisons
    Lt,
    Gt,
    Le,
    Ge,
}

impl BinaryOp {
    /// Whether this operation is a comparison (result is always i32).
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq
                | BinaryOp::Ne
                | BinaryOp::LtS
                | BinaryOp::LtU
                | BinaryOp::GtS
                | BinaryOp::GtU
                | BinaryOp::LeS
                | BinaryOp::LeU
                | BinaryOp::GeS
                | BinaryOp::GeU
                | BinaryOp::Lt
                | BinaryOp::Gt
                | BinaryOp::Le
                | BinaryOp::Ge
        )
    }

    /// Result type, given the operands' type.
    pub fn result_type(self, operand: Type) -> Type {
        if self.is_comparison() {
            Type::I32
        } else {
            operand
        }
    }

    /// Whether this operation can trap at runtime for the given operand type
    /// (integer division and remainder trap on zero and on overflow).
    pub fn can_trap(self, operand: Type) -> bool {
        operand.is_integer()
            && matches!(
                self,
                BinaryOp::DivS | BinaryOp::DivU | BinaryOp::RemS | BinaryOp::RemU
            )
    }
}

/// Read-modify-write operator for atomic accesses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtomicOp {
    Add,
    Sub,
    And,
    Or,
    Xor,
    Xchg,
}

/// An expression node: a kind with its children, plus the node's type.
#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub ty: Type,
}

/// The closed set of expression kinds.
///
/// Children are `ExprId`s in execution order. Optional children model
/// constructs that may or may not carry a value (break values, return
/// values, if-else arms).
#[derive(Debug, Clone)]
pub enum ExprKind {
    /// Statement list; the tail element provides the block's value. A block
    /// with a name can be targeted by breaks; an anonymous one cannot.
    Block {
        name: Option<Name>,
        list: Vec<ExprId>,
    },
    /// Structured conditional. `if_false` is absent for a plain `if`.
    If {
        condition: ExprId,
        if_true: ExprId,
        if_false: Option<ExprId>,
    },
    /// Loop header; breaks to `name` continue the loop.
    Loop { name: Option<Name>, body: ExprId },
    /// Branch to an enclosing label. With a condition this is `br_if`, which
    /// flows its value onward when not taken; without one it never falls
    /// through.
    Break {
        name: Name,
        condition: Option<ExprId>,
        value: Option<ExprId>,
    },
    /// Multi-way branch (`br_table`).
    Switch {
        targets: Vec<Name>,
        default: Name,
        condition: ExprId,
        value: Option<ExprId>,
    },
    /// Direct call to a function defined in this module.
    Call { index: u32, operands: Vec<ExprId> },
    /// Direct call to an imported function.
    CallImport { index: u32, operands: Vec<ExprId> },
    /// Indirect call through the table.
    CallIndirect {
        type_index: u32,
        target: ExprId,
        operands: Vec<ExprId>,
    },
    LocalGet { index: u32 },
    /// `local.set`, or `local.tee` when the node's type is concrete.
    LocalSet { index: u32, value: ExprId },
    GlobalGet { index: u32 },
    GlobalSet { index: u32, value: ExprId },
    /// Memory load. `bytes` is the access width; `signed` applies to
    /// sub-width loads only.
    Load {
        bytes: u8,
        signed: bool,
        offset: u32,
        ptr: ExprId,
    },
    /// Memory store. `bytes` is the access width.
    Store {
        bytes: u8,
        offset: u32,
        ptr: ExprId,
        value: ExprId,
    },
    AtomicRmw {
        op: AtomicOp,
        bytes: u8,
        offset: u32,
        ptr: ExprId,
        value: ExprId,
    },
    AtomicCmpxchg {
        bytes: u8,
        offset: u32,
        ptr: ExprId,
        expected: ExprId,
        replacement: ExprId,
    },
    Const { value: Literal },
    Unary { op: UnaryOp, value: ExprId },
    Binary {
        op: BinaryOp,
        left: ExprId,
        right: ExprId,
    },
    Select {
        if_true: ExprId,
        if_false: ExprId,
        condition: ExprId,
    },
    Drop { value: ExprId },
    Return { value: Option<ExprId> },
    Nop,
    Unreachable,
}

/// Calls `f` with every direct child of `kind`, in execution order.
pub fn for_each_child<F: FnMut(ExprId)>(kind: &ExprKind, mut f: F) {
    match kind {
        ExprKind::Block { list, .. } => {
            for &item in list {
                f(item);
            }
        }
        ExprKind::If {
            condition,
            if_true,
            if_false,
        } => {
            f(*condition);
            f(*if_true);
            if let Some(e) = if_false {
                f(*e);
            }
        }
        ExprKind::Loop { body, .. } => f(*body),
        ExprKind::Break {
            condition, value, ..
        } => {
            if let Some(e) = value {
                f(*e);
            }
            if let Some(e) = condition {
                f(*e);
            }
        }
        ExprKind::Switch {
            condition, value, ..
        } => {
            if let Some(e) = value {
                f(*e);
            }
            f(*condition);
        }
        ExprKind::Call { operands, .. } | ExprKind::CallImport { operands, .. } => {
            for &op in operands {
                f(op);
            }
        }
        ExprKind::CallIndirect {
            target, operands, ..
        } => {
            for &op in operands {
                f(op);
            }
            f(*target);
        }
        ExprKind::LocalSet { value, .. } | ExprKind::GlobalSet { value, .. } => f(*value),
        ExprKind::Load { ptr, .. } => f(*ptr),
        ExprKind::Store { ptr, value, .. } | ExprKind::AtomicRmw { ptr, value, .. } => {
            f(*ptr);
            f(*value);
        }
        ExprKind::AtomicCmpxchg {
            ptr,
            expected,
            replacement,
            ..
        } => {
            f(*ptr);
            f(*expected);
            f(*replacement);
        }
        ExprKind::Unary { value, .. } | ExprKind::Drop { value } => f(*value),
        ExprKind::Binary { left, right, .. } => {
            f(*left);
            f(*right);
        }
        ExprKind::Select {
            if_true,
            if_false,
            condition,
        } => {
            f(*if_true);
            f(*if_false);
            f(*condition);
        }
        ExprKind::Return { value } => {
            if let Some(e) = value {
                f(*e);
            }
        }
        ExprKind::LocalGet { .. }
        | ExprKind::GlobalGet { .. }
        | ExprKind::Const { .. }
        | ExprKind::Nop
        | ExprKind::Unreachable => {}
    }
}

/// Calls `f` with a mutable reference to every direct child slot of `kind`,
/// in execution order. Walkers use this to write replacements back into the
/// parent's slot.
pub fn for_each_child_mut<F: FnMut(&mut ExprId)>(kind: &mut ExprKind, mut f: F) {
    match kind {
        ExprKind::Block { list, .. } => {
            for item in list.iter_mut() {
                f(item);
            }
        }
        ExprKind::If {
            condition,
            if_true,
            if_false,
        } => {
            f(condition);
            f(if_true);
            if let Some(e) = if_false {
                f(e);
            }
        }
        ExprKind::Loop { body, .. } => f(body),
        ExprKind::Break {
            condition, value, ..
        } => {
            if let Some(e) = value {
                f(e);
            }
            if let Some(e) = condition {
                f(e);
            }
        }
        ExprKind::Switch {
            condition, value, ..
        } => {
            if let Some(e) = value {
                f(e);
            }
            f(condition);
        }
        ExprKind::Call { operands, .. } | ExprKind::CallImport { operands, .. } => {
            for op in operands.iter_mut() {
                f(op);
            }
        }
        ExprKind::CallIndirect {
            target, operands, ..
        } => {
            for op in operands.iter_mut() {
                f(op);
            }
            f(target);
        }
        ExprKind::LocalSet { value, .. } | ExprKind::GlobalSet { value, .. } => f(value),
        ExprKind::Load { ptr, .. } => f(ptr),
        ExprKind::Store { ptr, value, .. } | ExprKind::AtomicRmw { ptr, value, .. } => {
            f(ptr);
            f(value);
        }
        ExprKind::AtomicCmpxchg {
            ptr,
            expected,
            replacement,
            ..
        } => {
            f(ptr);
            f(expected);
            f(replacement);
        }
        ExprKind::Unary { value, .. } | ExprKind::Drop { value } => f(value),
        ExprKind::Binary { left, right, .. } => {
            f(left);
            f(right);
        }
        ExprKind::Select {
            if_true,
            if_false,
            condition,
        } => {
            f(if_true);
            f(if_false);
            f(condition);
        }
        ExprKind::Return { value } => {
            if let Some(e) = value {
                f(e);
            }
        }
        ExprKind::LocalGet { .. }
        | ExprKind::GlobalGet { .. }
        | ExprKind::Const { .. }
        | ExprKind::Nop
        | ExprKind::Unreachable => {}
    }
}

/// Compute a node's type from its children, without writing it back.
///
/// Kinds whose type is not derivable from children (loads, calls, local and
/// global reads) keep their stored type, except that an unreachable child
/// makes the whole node unreachable.
fn computed_type(arena: &Arena<Expr>, id: ExprId) -> Type {
    let expr = &arena[id];
    match &expr.kind {
        ExprKind::Block { list, .. } => match list.last() {
            Some(&tail) => {
                let ty = arena[tail].ty;
                // a none tail after an unreachable element never executes
                if ty == Type::None && list.iter().any(|&e| arena[e].ty == Type::Unreachable) {
                    Type::Unreachable
                } else {
                    ty
                }
            }
            None => Type::None,
        },
        ExprKind::If {
            condition,
            if_true,
            if_false,
        } => {
            if arena[*condition].ty == Type::Unreachable {
                return Type::Unreachable;
            }
            match if_false {
                None => Type::None,
                Some(if_false) => {
                    let t = arena[*if_true].ty;
                    let f = arena[*if_false].ty;
                    if t == f {
                        t
                    } else if t == Type::Unreachable {
                        f
                    } else if f == Type::Unreachable {
                        t
                    } else {
                        Type::None
                    }
                }
            }
        }
        ExprKind::Loop { body, .. } => arena[*body].ty,
        ExprKind::Break {
            condition, value, ..
        } => match condition {
            None => Type::Unreachable,
            Some(_) => value.map_or(Type::None, |v| arena[v].ty),
        },
        ExprKind::Switch { .. } | ExprKind::Return { .. } | ExprKind::Unreachable => {
            Type::Unreachable
        }
        ExprKind::Drop { value } => {
            if arena[*value].ty == Type::Unreachable {
                Type::Unreachable
            } else {
                Type::None
            }
        }
        ExprKind::Const { value } => value.ty(),
        ExprKind::Unary { op, value } => {
            let vt = arena[*value].ty;
            if vt == Type::Unreachable {
                Type::Unreachable
            } else {
                op.result_type(vt)
            }
        }
        ExprKind::Binary { op, left, right } => {
            let lt = arena[*left].ty;
            if lt == Type::Unreachable || arena[*right].ty == Type::Unreachable {
                Type::Unreachable
            } else {
                op.result_type(lt)
            }
        }
        ExprKind::Select {
            if_true,
            if_false,
            condition,
        } => {
            if arena[*if_true].ty == Type::Unreachable
                || arena[*if_false].ty == Type::Unreachable
                || arena[*condition].ty == Type::Unreachable
            {
                Type::Unreachable
            } else {
                arena[*if_true].ty
            }
        }
        ExprKind::LocalSet { value, .. } => {
            if arena[*value].ty == Type::Unreachable {
                Type::Unreachable
            } else if expr.ty.is_concrete() {
                // a tee keeps flowing its value's type
                expr.ty
            } else {
                Type::None
            }
        }
        ExprKind::GlobalSet { value, .. } => {
            if arena[*value].ty == Type::Unreachable {
                Type::Unreachable
            } else {
                Type::None
            }
        }
        ExprKind::Store { ptr, value, .. } => {
            if arena[*ptr].ty == Type::Unreachable || arena[*value].ty == Type::Unreachable {
                Type::Unreachable
            } else {
                Type::None
            }
        }
        ExprKind::Nop => Type::None,
        // Loads, calls, atomics and local/global reads carry a type that the
        // builder derived from context; an unreachable child overrides it.
        _ => {
            let mut unreachable = false;
            for_each_child(&expr.kind, |c| {
                if arena[c].ty == Type::Unreachable {
                    unreachable = true;
                }
            });
            if unreachable {
                Type::Unreachable
            } else {
                expr.ty
            }
        }
    }
}

/// Recompute a node's type from its children after a structural rewrite.
pub fn finalize(arena: &mut Arena<Expr>, id: ExprId) {
    let ty = computed_type(arena, id);
    arena[id].ty = ty;
}

/// Force a block's type after a rewrite that must preserve an outer type.
///
/// The computed type must agree unless the tail is unreachable; a mismatch
/// is a bug in the rewrite that produced it.
pub fn finalize_to(arena: &mut Arena<Expr>, id: ExprId, ty: Type) {
    debug_assert!(matches!(arena[id].kind, ExprKind::Block { .. }));
    let computed = computed_type(arena, id);
    debug_assert!(
        computed == ty || computed == Type::Unreachable,
        "finalize mismatch: computed {} but forcing {}",
        computed,
        ty
    );
    arena[id].ty = ty;
}

/// Whether any direct child of `block` has unreachable type.
pub fn has_unreachable_child(arena: &Arena<Expr>, block: ExprId) -> bool {
    match &arena[block].kind {
        ExprKind::Block { list, .. } => list.iter().any(|&e| arena[e].ty == Type::Unreachable),
        _ => false,
    }
}

/// Signature of a function (MVP: at most one result).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuncSignature {
    pub params: Vec<Type>,
    /// `Type::None` for void functions.
    pub result: Type,
}

/// An imported function.
#[derive(Debug, Clone)]
pub struct FuncImport {
    /// Import module name (e.g., "env").
    pub module_name: String,
    /// Import field name (e.g., "log").
    pub func_name: String,
    pub signature: FuncSignature,
}

/// An exported function mapping.
#[derive(Debug, Clone)]
pub struct FuncExport {
    /// The exported name.
    pub name: String,
    /// Index into the local function index space (imports excluded).
    pub index: u32,
}

/// Linear memory declaration.
#[derive(Debug, Clone, Copy)]
pub struct MemoryDecl {
    pub initial_pages: u64,
    pub maximum_pages: Option<u64>,
}

/// A function body as an expression tree, with its own node arena.
///
/// Each function owning its arena is what makes function-parallel passes
/// safe: workers touch disjoint allocations.
#[derive(Debug)]
pub struct Function {
    pub name: String,
    pub params: Vec<Type>,
    /// `Type::None` for void functions.
    pub result: Type,
    /// Declared locals, after the params in the local index space.
    pub locals: Vec<Type>,
    pub arena: Arena<Expr>,
    pub body: ExprId,
}

impl Function {
    /// Type of a local by its Wasm local index (params first).
    pub fn local_type(&self, index: u32) -> Option<Type> {
        let i = index as usize;
        if i < self.params.len() {
            Some(self.params[i])
        } else {
            self.locals.get(i - self.params.len()).copied()
        }
    }

    /// Append a scratch local and return its index.
    pub fn add_local(&mut self, ty: Type) -> u32 {
        self.locals.push(ty);
        (self.params.len() + self.locals.len() - 1) as u32
    }
}

impl Default for Function {
    fn default() -> Self {
        let mut arena = Arena::new();
        let body = arena.alloc(Expr {
            kind: ExprKind::Nop,
            ty: Type::None,
        });
        Function {
            name: String::new(),
            params: Vec::new(),
            result: Type::None,
            locals: Vec::new(),
            arena,
            body,
        }
    }
}

/// A parsed module's IR: signatures, imports, and function bodies.
#[derive(Debug, Default)]
pub struct Module {
    /// Type section signatures.
    pub signatures: Vec<FuncSignature>,
    /// Imported functions, in import declaration order.
    pub func_imports: Vec<FuncImport>,
    /// Locally defined functions.
    pub functions: Vec<Function>,
    /// Exported functions.
    pub func_exports: Vec<FuncExport>,
    /// Linear memory, if the module declares or imports one.
    pub memory: Option<MemoryDecl>,
}

impl Module {
    /// Find the export name for a local function index, if any.
    pub fn export_name(&self, index: u32) -> Option<&str> {
        self.func_exports
            .iter()
            .find(|e| e.index == index)
            .map(|e| e.name.as_str())
    }
}
