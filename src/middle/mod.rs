//! Bytecode generation
//!
//! This module handles the transformation from the syntax tree to op arrays
//! and declaration descriptors.

pub mod codegen;
pub mod decl;
pub mod registry;

pub use codegen::{CodegenContext, CompileError, CompileResult, CompiledScript};
