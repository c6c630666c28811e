//! opline: syntax tree → bytecode translator for a PHP-style language
//!
//! Takes the syntax tree produced by an external parser and emits three-address
//! bytecode: one op array per unit (top-level script, function, method, closure)
//! plus function and class descriptors registered in a caller-owned registry.
//!
//! # Example
//!
//! ```
//! use opline::frontend::ast::{Expr, Program, Stmt};
//! use opline::{compile, Registry};
//!
//! let program = Program::new(vec![Stmt::Echo(vec![Expr::string("hello")])]);
//! let mut registry = Registry::new();
//! let script = compile(&program, &mut registry).unwrap();
//! assert_eq!(script.main.len(), 3);
//! ```

#![doc(html_root_url = "https://docs.rs/opline")]
#![warn(rust_2018_idioms)]

// Public modules
pub mod frontend;
pub mod middle;
pub mod vm;

// Utility modules
pub mod util;

// Re-exports
pub use anyhow::{Context, Result};
pub use frontend::ast::Program;
pub use middle::codegen::{CodegenContext, CompileError, CompileResult, CompiledScript};
pub use middle::registry::{Registry, RegistryError};
pub use util::config::CodegenConfig;

use std::fs;
use std::path::Path;
use tracing::debug;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = "opline";

/// Translate a program with the default configuration
pub fn compile(
    program: &Program,
    registry: &mut Registry,
) -> CompileResult<CompiledScript> {
    compile_with_config(program, registry, CodegenConfig::default())
}

/// Translate a program
///
/// Declarations that completed before an error stay registered; no bytecode
/// is returned for the script itself.
pub fn compile_with_config(
    program: &Program,
    registry: &mut Registry,
    config: CodegenConfig,
) -> CompileResult<CompiledScript> {
    CodegenContext::with_config(registry, config).generate(program)
}

/// Deserialize a syntax tree handed over as JSON
pub fn parse_program_json(json: &str) -> Result<Program> {
    serde_json::from_str(json).context("Failed to decode syntax tree JSON")
}

/// Translate a syntax tree handed over as JSON
pub fn compile_json(
    json: &str,
    registry: &mut Registry,
) -> Result<CompiledScript> {
    let program = parse_program_json(json)?;
    debug!(
        "decoded syntax tree: {} top-level statements",
        program.statements.len()
    );
    compile(&program, registry).map_err(|e| anyhow::anyhow!("Codegen failed: {}", e))
}

/// Translate a JSON syntax tree file
pub fn compile_file(
    path: &Path,
    registry: &mut Registry,
    config: CodegenConfig,
) -> Result<CompiledScript> {
    let json = fs::read_to_string(path)
        .with_context(|| format!("Failed to read syntax tree: {}", path.display()))?;
    let program = parse_program_json(&json)
        .with_context(|| format!("Invalid syntax tree: {}", path.display()))?;
    compile_with_config(&program, registry, config)
        .with_context(|| format!("Codegen failed: {}", path.display()))
}

/// Human-readable listing of a compiled script
///
/// Functions and classes are looked up in the registry they were compiled into.
pub fn disassemble(
    script: &CompiledScript,
    registry: &Registry,
) -> String {
    let mut out = String::new();
    out.push_str("=== {main} ===\n");
    out.push_str(&script.main.to_string());

    for name in &script.functions {
        if let Some(function) = registry.function(name) {
            out.push_str(&format!("\n=== function {} ===\n", function.name));
            out.push_str(&function.op_array.to_string());
        }
    }
    for name in &script.classes {
        let Some(class) = registry.class(name) else {
            continue;
        };
        for method in class.methods.values() {
            out.push_str(&format!("\n=== {}::{} ===\n", class.name, method.name));
            out.push_str(&method.op_array.to_string());
        }
    }
    for (index, closure) in script.closures.iter().enumerate() {
        out.push_str(&format!("\n=== closure #{} ===\n", index));
        out.push_str(&closure.op_array.to_string());
    }
    out
}
