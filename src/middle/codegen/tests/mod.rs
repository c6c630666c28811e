//! 代码生成测试
//!
//! 直接构造语法树，检查生成的指令序列与注册表内容。

mod control_flow;
mod expr;

use crate::frontend::ast::{Expr, Program, Stmt};
use crate::middle::codegen::bytecode::{Instruction, OpArray, Operand, OperandKind};
use crate::middle::codegen::{CodegenContext, CompileResult, CompiledScript};
use crate::middle::registry::Registry;
use crate::util::config::CodegenConfig;
use crate::util::logger::{self, LogLevel};
use crate::vm::opcode::Opcode;

/// 翻译一组顶层语句
pub(super) fn compile_stmts(stmts: Vec<Stmt>) -> CompileResult<(CompiledScript, Registry)> {
    compile_with(stmts, CodegenConfig::default())
}

pub(super) fn compile_with(
    stmts: Vec<Stmt>,
    config: CodegenConfig,
) -> CompileResult<(CompiledScript, Registry)> {
    logger::try_init_with_level(LogLevel::Warn);
    let mut registry = Registry::new();
    let script =
        CodegenContext::with_config(&mut registry, config).generate(&Program::new(stmts))?;
    Ok((script, registry))
}

/// 翻译并断言成功
pub(super) fn compile_ok(stmts: Vec<Stmt>) -> (CompiledScript, Registry) {
    match compile_stmts(stmts) {
        Ok(result) => result,
        Err(err) => panic!("compilation failed: {}", err),
    }
}

/// 翻译并断言失败
pub(super) fn compile_err(stmts: Vec<Stmt>) -> crate::middle::codegen::CompileError {
    match compile_stmts(stmts) {
        Ok((script, _)) => panic!("expected an error, got:\n{}", script.main),
        Err(err) => err,
    }
}

pub(super) fn expr_stmt(expr: Expr) -> Stmt {
    Stmt::Expr(expr)
}

pub(super) fn opcodes(op_array: &OpArray) -> Vec<Opcode> {
    op_array.instructions.iter().map(|i| i.opcode).collect()
}

/// 所有地址操作数都落在 op array 范围内（含末尾地址）
pub(super) fn assert_addresses_in_range(op_array: &OpArray) {
    let len = op_array.len() as u32;
    for (addr, instr) in op_array.instructions.iter().enumerate() {
        for target in instr.jump_targets() {
            assert!(
                target <= len,
                "instruction {} ({}) jumps to {} outside 0..={}",
                addr,
                instr,
                target,
                len
            );
        }
    }
}

pub(super) fn first(
    op_array: &OpArray,
    opcode: Opcode,
) -> (usize, Instruction) {
    match op_array.find(opcode).next() {
        Some((addr, instr)) => (addr, *instr),
        None => panic!("no {} in\n{}", opcode, op_array),
    }
}

pub(super) fn address(op: Operand) -> usize {
    assert_eq!(op.kind, OperandKind::Address, "not an address operand: {}", op);
    op.value as usize
}
