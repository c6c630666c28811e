//! JSON 语法树输入

use opline::vm::Opcode;
use opline::{compile_file, compile_json, disassemble, CodegenConfig, Registry};
use std::io::Write;

const HELLO: &str = r#"{
    "statements": [
        {"Function": {
            "name": "hello",
            "params": [],
            "body": [{"Echo": [{"String": "hi"}]}],
            "by_ref_return": false,
            "return_type": null
        }},
        {"Expr": {"Call": {"callee": {"Name": "hello"}, "args": []}}}
    ]
}"#;

#[test]
fn test_compile_json_registers_function() {
    let mut registry = Registry::new();
    let script = compile_json(HELLO, &mut registry).unwrap();

    assert_eq!(script.functions, vec!["hello".to_string()]);
    let hello = registry.function("HELLO").unwrap();
    let opcodes: Vec<Opcode> = hello.op_array.instructions.iter().map(|i| i.opcode).collect();
    assert_eq!(opcodes, vec![Opcode::LoadConst, Opcode::Echo, Opcode::Return]);

    assert_eq!(script.main.count(Opcode::InitFcall), 1);
    assert_eq!(script.main.count(Opcode::DoCall), 1);
    let (_, init) = script.main.find(Opcode::InitFcall).next().unwrap();
    assert_eq!(
        script.main.constant(init.op2).and_then(|c| c.as_str()),
        Some("hello")
    );
}

#[test]
fn test_malformed_json_is_reported() {
    let mut registry = Registry::new();
    let err = compile_json("{\"statements\": [{\"Echo\": 1}]}", &mut registry).unwrap_err();
    assert!(err.to_string().contains("syntax tree"));
    assert_eq!(registry.functions().count(), 0);
}

#[test]
fn test_codegen_error_through_json() {
    let mut registry = Registry::new();
    let err = compile_json(r#"{"statements": [{"Break": null}]}"#, &mut registry).unwrap_err();
    assert!(err
        .to_string()
        .contains("'break' not in the 'loop' or 'switch' context"));
}

#[test]
fn test_compile_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(HELLO.as_bytes()).unwrap();

    let mut registry = Registry::new();
    let script = compile_file(file.path(), &mut registry, CodegenConfig::default()).unwrap();
    assert!(registry.function("hello").is_some());

    let listing = disassemble(&script, &registry);
    assert!(listing.starts_with("=== {main} ==="));
    assert!(listing.contains("=== function hello ==="));
}

#[test]
fn test_compile_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing.json");
    let mut registry = Registry::new();
    let err = compile_file(&missing, &mut registry, CodegenConfig::default()).unwrap_err();
    assert!(err.to_string().contains("missing.json"));
}

#[test]
fn test_script_serializes_to_json() {
    let mut registry = Registry::new();
    let script = compile_json(HELLO, &mut registry).unwrap();
    let json = script.to_json().unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["functions"][0], "hello");
    assert!(value["main"]["instructions"].is_array());
}
