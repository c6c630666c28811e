//! 翻译器配置

use opline::frontend::ast::{Expr, Program, Stmt};
use opline::middle::codegen::bytecode::OperandKind;
use opline::vm::Opcode;
use opline::{compile, compile_with_config, CodegenConfig, CompileError, Registry};
use std::io::Write;

fn unknown_operator_program() -> Program {
    Program::new(vec![Stmt::Echo(vec![Expr::binary(
        "~~~",
        Expr::Int(1),
        Expr::Int(2),
    )])])
}

#[test]
fn test_unknown_operator_is_an_error_by_default() {
    let mut registry = Registry::new();
    let err = compile(&unknown_operator_program(), &mut registry).unwrap_err();
    assert_eq!(
        err,
        CompileError::UnknownOperator {
            op: "~~~".to_string()
        }
    );
}

#[test]
fn test_permissive_operators_from_ron() {
    let config =
        CodegenConfig::from_ron_str("(permissive_operators: true, temp_base: 10)").unwrap();
    let mut registry = Registry::new();
    let script =
        compile_with_config(&unknown_operator_program(), &mut registry, config).unwrap();

    assert_eq!(script.main.count(Opcode::Nop), 1);
    let temps: Vec<u32> = script
        .main
        .instructions
        .iter()
        .flat_map(|i| [i.op1, i.op2, i.result])
        .filter(|op| op.kind == OperandKind::Temp)
        .map(|op| op.value)
        .collect();
    assert!(!temps.is_empty());
    assert!(temps.iter().all(|&t| t >= 10));
}

#[test]
fn test_without_implicit_return() {
    let config = CodegenConfig {
        implicit_return: false,
        ..CodegenConfig::default()
    };
    let program = Program::new(vec![Stmt::Echo(vec![Expr::string("x")])]);
    let mut registry = Registry::new();
    let script = compile_with_config(&program, &mut registry, config).unwrap();
    assert_eq!(script.main.count(Opcode::Return), 0);
    assert_eq!(script.main.len(), 2);
}

#[test]
fn test_load_config_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(b"(max_const_depth: 8, dump_units: true)").unwrap();

    let config = CodegenConfig::load(file.path()).unwrap();
    assert_eq!(config.max_const_depth, 8);
    assert!(config.dump_units);
    assert!(config.implicit_return);
    assert!(!config.permissive_operators);
}

#[test]
fn test_invalid_config_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(b"(temp_base: \"ten\")").unwrap();
    assert!(CodegenConfig::load(file.path()).is_err());
}
