//! WebAssembly module parser.
//!
//! This module wraps the `wasmparser` crate to extract structured
//! information from `.wasm` binary files: signatures, imports, function
//! bodies (locals plus raw operator bytes), globals, memory, and exports.
//! Element and data segments carry nothing the optimizer consumes, so they
//! are skipped.

use anyhow::{Context, Result};
use wasmparser::{ExternalKind, FuncType, Parser, Payload, TypeRef, ValType};

/// Memory information from the Wasm module.
#[derive(Debug, Clone, Copy)]
pub struct MemoryInfo {
    /// Initial size in pages (64 KiB each)
    pub initial_pages: u64,

    /// Maximum size in pages (None = unlimited, up to implementation limit)
    pub maximum_pages: Option<u64>,
}

/// Information about a single Wasm global variable.
#[derive(Debug, Clone, Copy)]
pub struct GlobalInfo {
    /// The value type of the global (i32, i64, f32, f64).
    pub val_type: ValType,
    /// Whether the global is mutable.
    pub mutable: bool,
}

/// An export from the Wasm module.
#[derive(Debug, Clone)]
pub struct ExportInfo {
    /// The exported name.
    pub name: String,
    /// What kind of item is exported.
    pub kind: ExportKind,
    /// Index into the corresponding index space.
    pub index: u32,
}

/// Kind of export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKind {
    Func,
    Table,
    Memory,
    Global,
}

/// An import from the host environment.
#[derive(Debug, Clone)]
pub struct ImportInfo {
    /// The import module name (e.g., "env").
    pub module_name: String,
    /// The import field name (e.g., "log").
    pub name: String,
    /// What kind of item is imported.
    pub kind: ImportKind,
}

/// Kind of import.
#[derive(Debug, Clone)]
pub enum ImportKind {
    /// Imported function (index into the type section).
    Function(u32),
    /// Imported global.
    Global { val_type: ValType, mutable: bool },
    /// Imported memory.
    Memory {
        initial_pages: u64,
        maximum_pages: Option<u64>,
    },
    /// Imported table.
    Table { initial_size: u64 },
}

/// Parsed WebAssembly module.
#[derive(Debug, Clone)]
pub struct ParsedModule {
    /// Type section: function signatures
    pub types: Vec<FuncType>,

    /// Locally defined functions (type index + locals + bytecode)
    pub functions: Vec<ParsedFunction>,

    /// Memory (Wasm MVP has at most one, index 0)
    pub memory: Option<MemoryInfo>,

    /// Global variables, imports excluded
    pub globals: Vec<GlobalInfo>,

    /// Exports
    pub exports: Vec<ExportInfo>,

    /// Imports from the host environment
    pub imports: Vec<ImportInfo>,

    /// Number of imported functions (these occupy indices 0..N-1 in the
    /// function index space, before local functions).
    pub num_imported_functions: u32,
}

/// A single function in the module.
#[derive(Debug, Clone)]
pub struct ParsedFunction {
    /// Index into the types section
    pub type_idx: u32,

    /// Local variable types (parameters are in the function type)
    pub locals: Vec<ValType>,

    /// Function body (Wasm bytecode, parsed later by the IR builder)
    pub body: Vec<u8>,
}

/// Parse a function code section entry, extracting locals and bytecode.
fn parse_code_entry(body: wasmparser::FunctionBody, type_idx: u32) -> Result<ParsedFunction> {
    let mut locals = Vec::new();
    let locals_reader = body.get_locals_reader().context("getting locals reader")?;
    for local in locals_reader {
        let (count, val_type) = local.context("reading local")?;
        for _ in 0..count {
            locals.push(val_type);
        }
    }

    // Extract operators as raw bytes (parsed later in the IR builder)
    let operators_reader = body
        .get_operators_reader()
        .context("getting operators reader")?;
    let mut binary_reader = operators_reader.get_binary_reader();
    let remaining = binary_reader.bytes_remaining();
    let body_bytes = binary_reader
        .read_bytes(remaining)
        .context("reading body bytes")?;

    Ok(ParsedFunction {
        type_idx,
        locals,
        body: body_bytes.to_vec(),
    })
}

/// Parse a WebAssembly binary into a structured module.
pub fn parse_wasm(wasm_bytes: &[u8]) -> Result<ParsedModule> {
    let parser = Parser::new(0);

    let mut types = Vec::new();
    let mut function_types: Vec<u32> = Vec::new(); // type index for each function
    let mut functions = Vec::new();
    let mut memory: Option<MemoryInfo> = None;
    let mut globals = Vec::new();
    let mut exports = Vec::new();
    let mut imports = Vec::new();
    let mut num_imported_functions: u32 = 0;

    for payload in parser.parse_all(wasm_bytes) {
        let payload = payload.context("parsing wasm payload")?;

        match payload {
            Payload::TypeSection(reader) => {
                for rec_group in reader {
                    let rec_group = rec_group.context("reading rec group")?;
                    for sub_type in rec_group.types() {
                        match &sub_type.composite_type.inner {
                            wasmparser::CompositeInnerType::Func(func_ty) => {
                                types.push(func_ty.clone());
                            }
                            _ => {
                                // GC proposal types (arrays, structs) have no
                                // counterpart in the expression IR
                            }
                        }
                    }
                }
            }

            Payload::ImportSection(reader) => {
                for import in reader {
                    let import = import.context("reading import")?;
                    let kind = match import.ty {
                        TypeRef::Func(type_idx) => {
                            num_imported_functions += 1;
                            ImportKind::Function(type_idx)
                        }
                        TypeRef::Global(global_ty) => ImportKind::Global {
                            val_type: global_ty.content_type,
                            mutable: global_ty.mutable,
                        },
                        TypeRef::Memory(mem_ty) => {
                            if memory.is_none() {
                                memory = Some(MemoryInfo {
                                    initial_pages: mem_ty.initial,
                                    maximum_pages: mem_ty.maximum,
                                });
                            }
                            ImportKind::Memory {
                                initial_pages: mem_ty.initial,
                                maximum_pages: mem_ty.maximum,
                            }
                        }
                        TypeRef::Table(table_ty) => ImportKind::Table {
                            initial_size: table_ty.initial,
                        },
                        _ => continue,
                    };
                    imports.push(ImportInfo {
                        module_name: import.module.to_string(),
                        name: import.name.to_string(),
                        kind,
                    });
                }
            }

            Payload::FunctionSection(reader) => {
                for func_type_idx in reader {
                    let func_type_idx = func_type_idx.context("reading function type index")?;
                    function_types.push(func_type_idx);
                }
            }

            Payload::CodeSectionEntry(body) => {
                let type_idx = *function_types
                    .get(functions.len())
                    .context("code entry without matching function section entry")?;
                let parsed_func = parse_code_entry(body, type_idx)?;
                functions.push(parsed_func);
            }

            Payload::MemorySection(reader) => {
                // Wasm MVP: at most one memory (index 0)
                if let Some(mem) = reader.into_iter().next() {
                    let memory_type = mem.context("reading memory type")?;
                    memory = Some(MemoryInfo {
                        initial_pages: memory_type.initial,
                        maximum_pages: memory_type.maximum,
                    });
                }
            }

            Payload::GlobalSection(reader) => {
                for global in reader {
                    let global = global.context("reading global")?;
                    globals.push(GlobalInfo {
                        val_type: global.ty.content_type,
                        mutable: global.ty.mutable,
                    });
                }
            }

            Payload::ExportSection(reader) => {
                for export in reader {
                    let export = export.context("reading export")?;
                    let kind = match export.kind {
                        ExternalKind::Func => ExportKind::Func,
                        ExternalKind::Table => ExportKind::Table,
                        ExternalKind::Memory => ExportKind::Memory,
                        ExternalKind::Global => ExportKind::Global,
                        _ => continue,
                    };
                    exports.push(ExportInfo {
                        name: export.name.to_string(),
                        kind,
                        index: export.index,
                    });
                }
            }

            _ => {}
        }
    }

    Ok(ParsedModule {
        types,
        functions,
        memory,
        globals,
        exports,
        imports,
        num_imported_functions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_module() {
        let wat = r#"
            (module)
        "#;
        let wasm = wat::parse_str(wat).unwrap();
        let module = parse_wasm(&wasm).unwrap();
        assert_eq!(module.types.len(), 0);
        assert_eq!(module.functions.len(), 0);
    }

    #[test]
    fn parse_add_function() {
        let wat = r#"
            (module
                (func (param i32 i32) (result i32)
                    local.get 0
                    local.get 1
                    i32.add
                )
            )
        "#;
        let wasm = wat::parse_str(wat).unwrap();
        let module = parse_wasm(&wasm).unwrap();
        assert_eq!(module.types.len(), 1);
        assert_eq!(module.functions.len(), 1);
        assert!(module.memory.is_none());
    }

    #[test]
    fn parse_locals_are_expanded() {
        let wat = r#"
            (module
                (func (local i32 i32) (local i64)
                    nop
                )
            )
        "#;
        let wasm = wat::parse_str(wat).unwrap();
        let module = parse_wasm(&wasm).unwrap();
        let locals = &module.functions[0].locals;
        assert_eq!(locals, &[ValType::I32, ValType::I32, ValType::I64]);
    }

    #[test]
    fn parse_imports_count_functions() {
        let wat = r#"
            (module
                (import "env" "log" (func (param i32)))
                (import "env" "base" (global i32))
                (func (result i32) (i32.const 1))
            )
        "#;
        let wasm = wat::parse_str(wat).unwrap();
        let module = parse_wasm(&wasm).unwrap();
        assert_eq!(module.num_imported_functions, 1);
        assert_eq!(module.imports.len(), 2);
        assert_eq!(module.functions.len(), 1);
    }

    #[test]
    fn parse_memory_and_exports() {
        let wat = r#"
            (module
                (memory 2 4)
                (func $f (result i32) (i32.const 1))
                (export "f" (func $f))
                (export "mem" (memory 0))
            )
        "#;
        let wasm = wat::parse_str(wat).unwrap();
        let module = parse_wasm(&wasm).unwrap();
        let mem = module.memory.expect("memory should be parsed");
        assert_eq!(mem.initial_pages, 2);
        assert_eq!(mem.maximum_pages, Some(4));
        assert_eq!(module.exports.len(), 2);
        assert_eq!(module.exports[0].kind, ExportKind::Func);
        assert_eq!(module.exports[0].name, "f");
    }

    #[test]
    fn parse_globals() {
        let wat = r#"
            (module
                (global $g (mut i32) (i32.const 0))
                (global $h f64 (f64.const 1.5))
            )
        "#;
        let wasm = wat::parse_str(wat).unwrap();
        let module = parse_wasm(&wasm).unwrap();
        assert_eq!(module.globals.len(), 2);
        assert!(module.globals[0].mutable);
        assert_eq!(module.globals[0].val_type, ValType::I32);
        assert!(!module.globals[1].mutable);
        assert_eq!(module.globals[1].val_type, ValType::F64);
    }
}
