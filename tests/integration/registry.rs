//! 注册表跨编译共享

use opline::frontend::ast::{ClassDef, ClassKind, ClassRef, ConstDecl, Expr, FunctionDef, Program, Stmt};
use opline::middle::codegen::bytecode::Constant;
use opline::middle::decl::{ClassConstDecl, ClassDecl, FunctionDecl};
use opline::{compile, CompileError, Registry, RegistryError};

fn function(name: &str) -> Stmt {
    Stmt::Function(FunctionDef {
        name: name.to_string(),
        params: Vec::new(),
        body: Vec::new(),
        by_ref_return: false,
        return_type: None,
    })
}

#[test]
fn test_builtin_function_cannot_be_redeclared() {
    let mut registry = Registry::new();
    registry
        .register_builtin_function(FunctionDecl::new("strlen"))
        .unwrap();

    let err = compile(&Program::new(vec![function("StrLen")]), &mut registry).unwrap_err();
    assert!(err.is_redeclaration());
    assert_eq!(err.declaration(), Some("StrLen"));
    assert_eq!(
        err.root().to_string(),
        "Cannot redeclare built-in function StrLen"
    );
    assert!(registry.is_builtin_function("strlen"));
}

#[test]
fn test_registry_shared_between_compiles() {
    let mut registry = Registry::new();
    compile(&Program::new(vec![function("helper")]), &mut registry).unwrap();

    let err = compile(&Program::new(vec![function("helper")]), &mut registry).unwrap_err();
    assert!(matches!(
        err.root(),
        CompileError::Registry(RegistryError::Duplicate { .. })
    ));
}

#[test]
fn test_completed_declarations_survive_error() {
    let mut registry = Registry::new();
    let program = Program::new(vec![
        function("first"),
        Stmt::Continue(None),
        function("second"),
    ]);

    assert!(compile(&program, &mut registry).is_err());
    assert!(registry.function("first").is_some());
    assert!(registry.function("second").is_none());
}

#[test]
fn test_constant_from_registered_class() {
    let mut config = ClassDecl::new("Config", ClassKind::Class);
    config
        .add_constant(ClassConstDecl::new("VERSION", Constant::Int(3)))
        .unwrap();
    let mut registry = Registry::new();
    registry.register_builtin_class(config).unwrap();

    let program = Program::new(vec![Stmt::Const(vec![ConstDecl::new(
        "V",
        Expr::binary(
            "+",
            Expr::ClassConst {
                class: ClassRef::Named("config".to_string()),
                name: "VERSION".to_string(),
            },
            Expr::Int(1),
        ),
    )])]);
    let script = compile(&program, &mut registry).unwrap();
    assert_eq!(script.constants.get("V"), Some(&Constant::Int(4)));
}

#[test]
fn test_unknown_class_in_constant() {
    let mut registry = Registry::new();
    let program = Program::new(vec![Stmt::Const(vec![ConstDecl::new(
        "V",
        Expr::ClassConst {
            class: ClassRef::Named("Missing".to_string()),
            name: "X".to_string(),
        },
    )])]);
    let err = compile(&program, &mut registry).unwrap_err();
    assert!(matches!(err.root(), CompileError::ConstEval(_)));
}

#[test]
fn test_anonymous_classes_numbered_across_compiles() {
    let program = Program::new(vec![Stmt::Expr(Expr::New {
        class: ClassRef::Anonymous(Box::new(ClassDef::new("", ClassKind::Class))),
        args: Vec::new(),
    })]);
    let mut registry = Registry::new();

    let first = compile(&program, &mut registry).unwrap();
    let second = compile(&program, &mut registry).unwrap();
    assert_eq!(first.classes, vec!["class@anonymous#0"]);
    assert_eq!(second.classes, vec!["class@anonymous#1"]);
    assert!(registry.class("class@anonymous#0").is_some());
    assert!(registry.class("class@anonymous#1").is_some());
}
