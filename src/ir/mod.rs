//! Intermediate Representation (IR) for the structured Wasm optimizer.
//!
//! This module defines an expression-tree IR mirroring WebAssembly's
//! structured control flow. Function bodies are trees of typed expression
//! nodes inside a per-function arena; optimization passes rewrite them in
//! place.
//!
//! It includes:
//! - **Expression tree** ([`Expr`], [`ExprKind`], [`Type`]): typed nodes with ordered children
//! - **Module-level IR** ([`Module`], [`Function`] and related types): structure and metadata
//! - **Construction** ([`Builder`], [`build_module`]): node helpers and the Wasm frontend

mod types;
pub use types::*;

pub mod builder;
pub use builder::{build_module, Builder};
