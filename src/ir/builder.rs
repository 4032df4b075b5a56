//! # IR Builder
//!
//! Translates a `ParsedModule` (parsed WebAssembly) into a [`Module`] of
//! expression trees.
//!
//! ## Pipeline overview
//!
//! ```text
//! ParsedModule
//!      │
//!      ├── signatures / imports / globals  ─► ModuleContext
//!      │
//!      └─[translate]
//!         for each local function:
//!           FunctionTranslator::translate()
//!             └── for each Operator:
//!                   value-stack + control-frame reconstruction
//!          ─► Vec<Function>  ─► Module
//! ```
//!
//! The translator is a stack machine interpreter: it simulates the Wasm
//! evaluation stack with `ExprId`s and folds operators into trees, tracking
//! nested `block`/`loop`/`if` frames on a control stack. Labels are attached
//! only to constructs some branch actually targets, so straight-line
//! `block`s come out anonymous and stay mergeable.
//!
//! [`Builder`] is the low-level node factory the translator and the
//! optimizer share: every constructor allocates a node and derives its type
//! the same way `finalize` would.

mod translate;

use super::types::*;
use crate::parser::{ImportKind, ParsedModule};
use anyhow::{bail, Context, Result};
use id_arena::Arena;

/// Node construction helpers over a function's arena.
///
/// Each `make_*` allocates a finalized node: the node's type is derived from
/// its children at construction time.
pub struct Builder<'a> {
    arena: &'a mut Arena<Expr>,
}

impl<'a> Builder<'a> {
    pub fn new(arena: &'a mut Arena<Expr>) -> Self {
        Builder { arena }
    }

    fn alloc(&mut self, kind: ExprKind, ty: Type) -> ExprId {
        let id = self.arena.alloc(Expr { kind, ty });
        finalize(self.arena, id);
        id
    }

    pub fn make_nop(&mut self) -> ExprId {
        self.alloc(ExprKind::Nop, Type::None)
    }

    pub fn make_unreachable(&mut self) -> ExprId {
        self.alloc(ExprKind::Unreachable, Type::Unreachable)
    }

    pub fn make_const(&mut self, value: Literal) -> ExprId {
        let ty = value.ty();
        self.alloc(ExprKind::Const { value }, ty)
    }

    pub fn make_block(&mut self, name: Option<Name>, list: Vec<ExprId>) -> ExprId {
        self.alloc(ExprKind::Block { name, list }, Type::None)
    }

    /// Anonymous two-element block; its value is `b`'s.
    pub fn make_sequence(&mut self, a: ExprId, b: ExprId) -> ExprId {
        self.make_block(None, vec![a, b])
    }

    pub fn make_drop(&mut self, value: ExprId) -> ExprId {
        self.alloc(ExprKind::Drop { value }, Type::None)
    }

    pub fn make_if(
        &mut self,
        condition: ExprId,
        if_true: ExprId,
        if_false: Option<ExprId>,
    ) -> ExprId {
        self.alloc(
            ExprKind::If {
                condition,
                if_true,
                if_false,
            },
            Type::None,
        )
    }

    pub fn make_loop(&mut self, name: Option<Name>, body: ExprId) -> ExprId {
        self.alloc(ExprKind::Loop { name, body }, Type::None)
    }

    pub fn make_break(
        &mut self,
        name: Name,
        condition: Option<ExprId>,
        value: Option<ExprId>,
    ) -> ExprId {
        self.alloc(
            ExprKind::Break {
                name,
                condition,
                value,
            },
            Type::None,
        )
    }

    pub fn make_switch(
        &mut self,
        targets: Vec<Name>,
        default: Name,
        condition: ExprId,
        value: Option<ExprId>,
    ) -> ExprId {
        self.alloc(
            ExprKind::Switch {
                targets,
                default,
                condition,
                value,
            },
            Type::Unreachable,
        )
    }

    pub fn make_local_get(&mut self, index: u32, ty: Type) -> ExprId {
        self.alloc(ExprKind::LocalGet { index }, ty)
    }

    pub fn make_local_set(&mut self, index: u32, value: ExprId) -> ExprId {
        self.alloc(ExprKind::LocalSet { index, value }, Type::None)
    }

    /// A tee: sets the local and flows the value onward.
    pub fn make_local_tee(&mut self, index: u32, value: ExprId) -> ExprId {
        let ty = self.arena[value].ty;
        self.alloc(ExprKind::LocalSet { index, value }, ty)
    }

    pub fn make_global_get(&mut self, index: u32, ty: Type) -> ExprId {
        self.alloc(ExprKind::GlobalGet { index }, ty)
    }

    pub fn make_global_set(&mut self, index: u32, value: ExprId) -> ExprId {
        self.alloc(ExprKind::GlobalSet { index, value }, Type::None)
    }

    pub fn make_load(
        &mut self,
        bytes: u8,
        signed: bool,
        offset: u32,
        ptr: ExprId,
        ty: Type,
    ) -> ExprId {
        self.alloc(
            ExprKind::Load {
                bytes,
                signed,
                offset,
                ptr,
            },
            ty,
        )
    }

    pub fn make_store(&mut self, bytes: u8, offset: u32, ptr: ExprId, value: ExprId) -> ExprId {
        self.alloc(
            ExprKind::Store {
                bytes,
                offset,
                ptr,
                value,
            },
            Type::None,
        )
    }

    pub fn make_atomic_rmw(
        &mut self,
        op: AtomicOp,
        bytes: u8,
        offset: u32,
        ptr: ExprId,
        value: ExprId,
        ty: Type,
    ) -> ExprId {
        self.alloc(
            ExprKind::AtomicRmw {
                op,
                bytes,
                offset,
                ptr,
                value,
            },
            ty,
        )
    }

    pub fn make_atomic_cmpxchg(
        &mut self,
        bytes: u8,
        offset: u32,
        ptr: ExprId,
        expected: ExprId,
        replacement: ExprId,
        ty: Type,
    ) -> ExprId {
        self.alloc(
            ExprKind::AtomicCmpxchg {
                bytes,
                offset,
                ptr,
                expected,
                replacement,
            },
            ty,
        )
    }

    pub fn make_unary(&mut self, op: UnaryOp, value: ExprId) -> ExprId {
        self.alloc(ExprKind::Unary { op, value }, Type::None)
    }

    pub fn make_binary(&mut self, op: BinaryOp, left: ExprId, right: ExprId) -> ExprId {
        self.alloc(ExprKind::Binary { op, left, right }, Type::None)
    }

    pub fn make_select(&mut self, if_true: ExprId, if_false: ExprId, condition: ExprId) -> ExprId {
        self.alloc(
            ExprKind::Select {
                if_true,
                if_false,
                condition,
            },
            Type::None,
        )
    }

    pub fn make_call(&mut self, index: u32, operands: Vec<ExprId>, result: Type) -> ExprId {
        self.alloc(ExprKind::Call { index, operands }, result)
    }

    pub fn make_call_import(&mut self, index: u32, operands: Vec<ExprId>, result: Type) -> ExprId {
        self.alloc(ExprKind::CallImport { index, operands }, result)
    }

    pub fn make_call_indirect(
        &mut self,
        type_index: u32,
        target: ExprId,
        operands: Vec<ExprId>,
        result: Type,
    ) -> ExprId {
        self.alloc(
            ExprKind::CallIndirect {
                type_index,
                target,
                operands,
            },
            result,
        )
    }

    pub fn make_return(&mut self, value: Option<ExprId>) -> ExprId {
        self.alloc(ExprKind::Return { value }, Type::Unreachable)
    }
}

/// Per-module context the function translator consults for call and global
/// typing.
pub(crate) struct ModuleContext {
    /// (param count, result type) for every function in the global index
    /// space: imports first, then local functions.
    pub(crate) func_sigs: Vec<(usize, Type)>,
    /// (param count, result type) per type-section index.
    pub(crate) type_sigs: Vec<(usize, Type)>,
    /// Number of imported functions.
    pub(crate) num_imported_functions: u32,
    /// Value type of every global, imports first.
    pub(crate) globals: Vec<Type>,
}

fn sig_of(signatures: &[FuncSignature], type_idx: u32) -> Result<&FuncSignature> {
    signatures
        .get(type_idx as usize)
        .with_context(|| format!("type index {} out of range", type_idx))
}

fn convert_signature(ft: &wasmparser::FuncType) -> Result<FuncSignature> {
    let mut params = Vec::with_capacity(ft.params().len());
    for &p in ft.params() {
        params.push(
            Type::from_val_type(p).with_context(|| format!("unsupported param type {:?}", p))?,
        );
    }
    let result = match ft.results() {
        [] => Type::None,
        [r] => {
            Type::from_val_type(*r).with_context(|| format!("unsupported result type {:?}", r))?
        }
        results => bail!("multi-value results not supported ({} results)", results.len()),
    };
    Ok(FuncSignature { params, result })
}

/// Build the module IR from a parsed WebAssembly module.
///
/// This is the main entry point for IR construction: it resolves signatures
/// and imports, then translates every local function body into an
/// expression tree.
pub fn build_module(parsed: &ParsedModule) -> Result<Module> {
    let signatures: Vec<FuncSignature> = parsed
        .types
        .iter()
        .enumerate()
        .map(|(i, ft)| convert_signature(ft).with_context(|| format!("type {}", i)))
        .collect::<Result<_>>()?;

    // Imported functions and globals, in declaration order.
    let mut func_imports = Vec::new();
    let mut globals: Vec<Type> = Vec::new();
    for import in &parsed.imports {
        match &import.kind {
            ImportKind::Function(type_idx) => {
                func_imports.push(FuncImport {
                    module_name: import.module_name.clone(),
                    func_name: import.name.clone(),
                    signature: sig_of(&signatures, *type_idx)?.clone(),
                });
            }
            ImportKind::Global { val_type, .. } => {
                globals.push(
                    Type::from_val_type(*val_type).context("unsupported imported global type")?,
                );
            }
            _ => {}
        }
    }
    for global in &parsed.globals {
        globals.push(Type::from_val_type(global.val_type).context("unsupported global type")?);
    }

    // Full function index space: imports first.
    let mut func_sigs: Vec<(usize, Type)> = func_imports
        .iter()
        .map(|i| (i.signature.params.len(), i.signature.result))
        .collect();
    for func in &parsed.functions {
        let sig = sig_of(&signatures, func.type_idx)?;
        func_sigs.push((sig.params.len(), sig.result));
    }

    let ctx = ModuleContext {
        func_sigs,
        type_sigs: signatures
            .iter()
            .map(|s| (s.params.len(), s.result))
            .collect(),
        num_imported_functions: parsed.num_imported_functions,
        globals,
    };

    let func_exports: Vec<FuncExport> = parsed
        .exports
        .iter()
        .filter(|e| e.kind == crate::parser::ExportKind::Func)
        .filter(|e| e.index >= parsed.num_imported_functions)
        .map(|e| FuncExport {
            name: e.name.clone(),
            index: e.index - parsed.num_imported_functions,
        })
        .collect();

    let mut functions = Vec::with_capacity(parsed.functions.len());
    for (i, parsed_func) in parsed.functions.iter().enumerate() {
        let sig = sig_of(&signatures, parsed_func.type_idx)?;
        let name = func_exports
            .iter()
            .find(|e| e.index as usize == i)
            .map(|e| e.name.clone())
            .unwrap_or_else(|| format!("func_{}", i));
        let func =
            translate::translate_function(name, sig, &parsed_func.locals, &parsed_func.body, &ctx)
                .with_context(|| format!("translating function {}", i))?;
        functions.push(func);
    }

    Ok(Module {
        signatures,
        func_imports,
        functions,
        func_exports,
        memory: parsed.memory.map(|m| MemoryDecl {
            initial_pages: m.initial_pages,
            maximum_pages: m.maximum_pages,
        }),
    })
}
