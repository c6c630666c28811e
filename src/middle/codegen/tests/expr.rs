//! 表达式代码生成测试

use super::*;
use crate::frontend::ast::{Arg, ClassRef, ListItem, Member};
use crate::middle::codegen::bytecode::{Constant, EXT_BY_NAME};
use crate::middle::codegen::CompileError;

fn assign_op(
    op: &str,
    target: Expr,
    value: Expr,
) -> Expr {
    Expr::Assign {
        op: op.to_string(),
        target: Box::new(target),
        value: Box::new(value),
    }
}

fn dim(
    array: Expr,
    index: Option<Expr>,
) -> Expr {
    Expr::ArrayDim {
        array: Box::new(array),
        index: index.map(Box::new),
    }
}

fn prop(
    object: Expr,
    name: &str,
    nullsafe: bool,
) -> Expr {
    Expr::Property {
        object: Box::new(object),
        property: Member::name(name),
        nullsafe,
    }
}

fn incdec(
    increment: bool,
    prefix: bool,
    target: Expr,
) -> Expr {
    Expr::IncDec {
        increment,
        prefix,
        target: Box::new(target),
    }
}

#[test]
fn test_literal_loads_into_fresh_temp() {
    let (script, _) = compile_ok(vec![expr_stmt(Expr::Int(42))]);
    let main = &script.main;
    assert_eq!(main.constants[0], Constant::Int(42));
    assert_eq!(
        main.instructions[0],
        Instruction::new(Opcode::LoadConst)
            .with_op1(Operand::constant(0))
            .with_result(Operand::temp(0))
    );
    assert_eq!(main.count(Opcode::LoadConst), 1);
}

#[test]
fn test_increment_by_assignment() {
    // $x = $x + 1;
    let (script, _) = compile_ok(vec![expr_stmt(Expr::assign(
        Expr::var("x"),
        Expr::binary("+", Expr::var("x"), Expr::Int(1)),
    ))]);
    let main = &script.main;
    assert_eq!(
        opcodes(main),
        vec![Opcode::LoadConst, Opcode::Add, Opcode::Assign, Opcode::Return]
    );
    let x = Operand::var(0);
    assert_eq!(main.var_names, vec!["x".to_string()]);
    assert_eq!(main.instructions[1].op1, x);
    assert_eq!(main.instructions[1].op2, Operand::temp(0));
    assert_eq!(main.instructions[2].op1, main.instructions[1].result);
    assert_eq!(main.instructions[2].result, x);
}

#[test]
fn test_compound_assignment_is_one_instruction() {
    let (script, _) = compile_ok(vec![expr_stmt(assign_op(
        "+=",
        Expr::var("x"),
        Expr::Int(2),
    ))]);
    let main = &script.main;
    assert_eq!(main.count(Opcode::AssignOp), 1);
    assert_eq!(main.count(Opcode::Add), 0);
    let (_, instr) = first(main, Opcode::AssignOp);
    assert_eq!(instr.extended, Opcode::Add as u32);
    assert_eq!(instr.result, Operand::var(0));
}

#[test]
fn test_compound_assignment_on_dim_carries_op_data() {
    // $a['k'] .= 'x';
    let (script, _) = compile_ok(vec![expr_stmt(assign_op(
        ".=",
        dim(Expr::var("a"), Some(Expr::string("k"))),
        Expr::string("x"),
    ))]);
    let main = &script.main;
    let (addr, instr) = first(main, Opcode::AssignDimOp);
    assert_eq!(instr.extended, Opcode::Concat as u32);
    assert_eq!(instr.op1, Operand::var(0));
    assert_eq!(main.instructions[addr + 1].opcode, Opcode::OpData);
    // 右值最先求值
    assert_eq!(main.instructions[addr + 1].op1, Operand::temp(0));
}

#[test]
fn test_nested_dim_write_fetches_in_write_mode() {
    // $a[1][2] = 3;
    let (script, _) = compile_ok(vec![expr_stmt(Expr::assign(
        dim(dim(Expr::var("a"), Some(Expr::Int(1))), Some(Expr::Int(2))),
        Expr::Int(3),
    ))]);
    let main = &script.main;
    let (fetch_addr, fetch) = first(main, Opcode::FetchDimW);
    let (assign_addr, assign) = first(main, Opcode::AssignDim);
    assert!(fetch_addr < assign_addr);
    assert_eq!(assign.op1, fetch.result);
    assert_eq!(main.count(Opcode::FetchDimR), 0);
    assert_eq!(main.instructions[assign_addr + 1].opcode, Opcode::OpData);
}

#[test]
fn test_append_assignment_leaves_key_unused() {
    let (script, _) = compile_ok(vec![expr_stmt(Expr::assign(
        dim(Expr::var("list"), None),
        Expr::Int(1),
    ))]);
    let (_, instr) = first(&script.main, Opcode::AssignDim);
    assert!(instr.op2.is_unused());
}

#[test]
fn test_append_in_read_context_is_structural() {
    let err = compile_err(vec![Stmt::Echo(vec![dim(Expr::var("a"), None)])]);
    assert!(err.is_structural());
    assert_eq!(err.to_string(), "Cannot use [] for reading");
}

#[test]
fn test_unknown_operator_fails_by_default() {
    let stmts = vec![expr_stmt(Expr::binary("<=>>", Expr::Int(1), Expr::Int(2)))];
    let err = compile_err(stmts.clone());
    assert_eq!(
        err,
        CompileError::UnknownOperator {
            op: "<=>>".to_string()
        }
    );

    let config = CodegenConfig {
        permissive_operators: true,
        ..CodegenConfig::default()
    };
    let (script, _) = compile_with(stmts, config).unwrap();
    assert_eq!(script.main.count(Opcode::Nop), 1);
}

#[test]
fn test_list_destructure_skips_holes() {
    // list($a, , $b) = $arr;
    let target = Expr::List(vec![
        Some(ListItem::target(Expr::var("a"))),
        None,
        Some(ListItem::target(Expr::var("b"))),
    ]);
    let (script, _) = compile_ok(vec![expr_stmt(Expr::assign(target, Expr::var("arr")))]);
    let main = &script.main;
    let fetches: Vec<&Instruction> = main.find(Opcode::FetchListR).map(|(_, i)| i).collect();
    assert_eq!(fetches.len(), 2);
    assert_eq!(main.constant(fetches[0].op2), Some(&Constant::Int(0)));
    assert_eq!(main.constant(fetches[1].op2), Some(&Constant::Int(2)));
    assert!(fetches.iter().all(|i| i.op1 == Operand::var(0)));
}

#[test]
fn test_list_destructure_errors() {
    let empty = Expr::List(vec![None, None]);
    let err = compile_err(vec![expr_stmt(Expr::assign(empty, Expr::var("arr")))]);
    assert_eq!(err.to_string(), "Cannot use empty list");

    let mixed = Expr::List(vec![
        Some(ListItem {
            key: Some(Expr::string("id")),
            target: Expr::var("id"),
            by_ref: false,
        }),
        Some(ListItem::target(Expr::var("name"))),
    ]);
    let err = compile_err(vec![expr_stmt(Expr::assign(mixed, Expr::var("row")))]);
    assert_eq!(
        err.to_string(),
        "Cannot mix keyed and unkeyed array entries in assignments"
    );
}

#[test]
fn test_list_as_rvalue_is_rejected() {
    let list = Expr::List(vec![Some(ListItem::target(Expr::var("a")))]);
    let err = compile_err(vec![expr_stmt(Expr::assign(Expr::var("b"), list))]);
    assert!(err.is_structural());
}

#[test]
fn test_postfix_increment_yields_old_value() {
    // $y = $x++;
    let (script, _) = compile_ok(vec![expr_stmt(Expr::assign(
        Expr::var("y"),
        incdec(true, false, Expr::var("x")),
    ))]);
    let main = &script.main;
    let (_, old) = first(main, Opcode::QmAssign);
    let (_, add) = first(main, Opcode::Add);
    assert_eq!(add.op1, old.result);
    assert_eq!(main.constant(add.op2), Some(&Constant::Int(1)));
    let last_assign = main
        .find(Opcode::Assign)
        .last()
        .map(|(_, i)| *i)
        .unwrap();
    assert_eq!(last_assign.op1, old.result);
    assert_eq!(last_assign.result, Operand::var(1));
}

#[test]
fn test_prefix_decrement_yields_new_value() {
    let (script, _) = compile_ok(vec![expr_stmt(Expr::assign(
        Expr::var("y"),
        incdec(false, true, Expr::var("x")),
    ))]);
    let main = &script.main;
    let (_, sub) = first(main, Opcode::Sub);
    let last_assign = main
        .find(Opcode::Assign)
        .last()
        .map(|(_, i)| *i)
        .unwrap();
    assert_eq!(last_assign.op1, sub.result);
}

#[test]
fn test_property_increment_reads_and_writes_back() {
    let (script, _) = compile_ok(vec![expr_stmt(incdec(
        true,
        false,
        prop(Expr::var("counter"), "hits", false),
    ))]);
    let ops = opcodes(&script.main);
    let read = ops.iter().position(|o| *o == Opcode::FetchObjR).unwrap();
    let write = ops.iter().position(|o| *o == Opcode::AssignObj).unwrap();
    assert!(read < write);
    assert_eq!(ops[write + 1], Opcode::OpData);
}

#[test]
fn test_static_property_increment_outside_class() {
    let target = Expr::StaticProperty {
        class: ClassRef::Named("Counter".to_string()),
        property: "total".to_string(),
    };
    let (script, _) = compile_ok(vec![expr_stmt(incdec(true, true, target))]);
    let main = &script.main;
    let (_, read) = first(main, Opcode::FetchStaticPropR);
    assert_eq!(main.constant(read.op1), Some(&Constant::string("total")));
    assert_eq!(main.constant(read.op2), Some(&Constant::string("Counter")));
    assert_eq!(main.count(Opcode::AssignStaticProp), 1);
}

#[test]
fn test_increment_of_append_is_structural() {
    let err = compile_err(vec![expr_stmt(incdec(true, true, dim(Expr::var("a"), None)))]);
    assert_eq!(err.to_string(), "Cannot use [] for reading");
}

#[test]
fn test_nullsafe_property_jumps_past_fetch() {
    let (script, _) = compile_ok(vec![Stmt::Echo(vec![prop(
        Expr::var("user"),
        "name",
        true,
    )])]);
    let main = &script.main;
    let (_, guard) = first(main, Opcode::JmpNull);
    let (qm_addr, qm) = first(main, Opcode::QmAssign);
    assert_eq!(address(guard.op2), qm_addr + 1);
    assert_eq!(guard.result, qm.result);
    assert_addresses_in_range(main);
}

#[test]
fn test_nullsafe_in_write_context_is_rejected() {
    let err = compile_err(vec![expr_stmt(Expr::assign(
        prop(Expr::var("user"), "name", true),
        Expr::string("x"),
    ))]);
    assert_eq!(err.to_string(), "Can't use nullsafe operator in write context");
}

#[test]
fn test_this_cannot_be_reassigned() {
    let err = compile_err(vec![expr_stmt(Expr::assign(Expr::var("this"), Expr::Null))]);
    assert_eq!(err.to_string(), "Cannot re-assign $this");
}

#[test]
fn test_coalesce_assign_uses_isset_fetch() {
    // $cache['k'] ??= 1;
    let (script, _) = compile_ok(vec![expr_stmt(assign_op(
        "??=",
        dim(Expr::var("cache"), Some(Expr::string("k"))),
        Expr::Int(1),
    ))]);
    let main = &script.main;
    let (is_addr, _) = first(main, Opcode::FetchDimIs);
    let (co_addr, coalesce) = first(main, Opcode::Coalesce);
    let (assign_addr, _) = first(main, Opcode::AssignDim);
    assert!(is_addr < co_addr && co_addr < assign_addr);
    assert!(address(coalesce.op2) > assign_addr);
    assert_addresses_in_range(main);
}

#[test]
fn test_short_circuit_shares_result() {
    let (script, _) = compile_ok(vec![Stmt::Echo(vec![Expr::binary(
        "&&",
        Expr::var("a"),
        Expr::var("b"),
    )])]);
    let main = &script.main;
    let bools: Vec<&Instruction> = main.find(Opcode::Bool).map(|(_, i)| i).collect();
    assert_eq!(bools.len(), 2);
    assert_eq!(bools[0].result, bools[1].result);
    let (_, jump) = first(main, Opcode::JmpIfFalse);
    assert_eq!(jump.op1, bools[0].result);
    assert_addresses_in_range(main);
}

#[test]
fn test_greater_than_swaps_operands() {
    let (script, _) = compile_ok(vec![Stmt::Echo(vec![Expr::binary(
        ">",
        Expr::var("a"),
        Expr::var("b"),
    )])]);
    let (_, cmp) = first(&script.main, Opcode::IsSmaller);
    assert_eq!(cmp.op1, Operand::var(1));
    assert_eq!(cmp.op2, Operand::var(0));
}

#[test]
fn test_call_sends_arguments_in_order() {
    // foo($a, 1, ...$rest, flag: true);
    let args = vec![
        Arg::positional(Expr::var("a")),
        Arg::positional(Expr::Int(1)),
        Arg {
            value: Expr::var("rest"),
            name: None,
            spread: true,
        },
        Arg {
            value: Expr::Constant("true".to_string()),
            name: Some("flag".to_string()),
            spread: false,
        },
    ];
    let call = Expr::Call {
        callee: crate::frontend::ast::Callee::Name("foo".to_string()),
        args,
    };
    let (script, _) = compile_ok(vec![expr_stmt(call)]);
    let main = &script.main;
    let (_, init) = first(main, Opcode::InitFcall);
    assert_eq!(init.extended, 4);
    assert_eq!(main.constant(init.op2), Some(&Constant::string("foo")));
    let sends: Vec<(Opcode, u32)> = main
        .instructions
        .iter()
        .filter(|i| matches!(i.opcode, Opcode::SendVal | Opcode::SendVar | Opcode::SendUnpack))
        .map(|i| (i.opcode, i.extended))
        .collect();
    assert_eq!(
        sends,
        vec![
            (Opcode::SendVar, 0),
            (Opcode::SendVal, 1),
            (Opcode::SendUnpack, 2),
            (Opcode::SendVal, 3),
        ]
    );
    let (_, named) = main.find(Opcode::SendVal).last().unwrap();
    assert_eq!(main.constant(named.op2), Some(&Constant::string("flag")));
    assert_eq!(main.count(Opcode::DoCall), 1);
}

#[test]
fn test_variable_variable_isset_by_name() {
    let (script, _) = compile_ok(vec![Stmt::Echo(vec![Expr::Isset(vec![
        Expr::VariableVariable(Box::new(Expr::string("name"))),
    ])])]);
    let (_, isset) = first(&script.main, Opcode::IssetIsEmptyVar);
    assert_eq!(isset.extended & EXT_BY_NAME, EXT_BY_NAME);
}

#[test]
fn test_self_outside_class_is_structural() {
    let err = compile_err(vec![Stmt::Echo(vec![Expr::ClassConst {
        class: ClassRef::SelfRef,
        name: "X".to_string(),
    }])]);
    assert_eq!(
        err.to_string(),
        "Cannot use \"self\" when no class scope is active"
    );
}

#[test]
fn test_yield_at_top_level_is_structural() {
    let err = compile_err(vec![expr_stmt(Expr::Yield {
        key: None,
        value: Some(Box::new(Expr::Int(1))),
    })]);
    assert!(err.is_structural());
}

#[test]
fn test_interpolation_builds_concat_chain() {
    let (script, _) = compile_ok(vec![Stmt::Echo(vec![Expr::Interpolated(vec![
        Expr::string("Hello, "),
        Expr::var("name"),
        Expr::string("!"),
    ])])]);
    assert_eq!(script.main.count(Opcode::Concat), 2);
}

#[test]
fn test_unset_forms() {
    let (script, _) = compile_ok(vec![Stmt::Unset(vec![
        Expr::var("a"),
        dim(Expr::var("b"), Some(Expr::Int(0))),
        prop(Expr::var("c"), "d", false),
    ])]);
    let ops = opcodes(&script.main);
    assert!(ops.contains(&Opcode::UnsetVar));
    assert!(ops.contains(&Opcode::UnsetDim));
    assert!(ops.contains(&Opcode::UnsetObj));

    let err = compile_err(vec![Stmt::Unset(vec![dim(Expr::var("a"), None)])]);
    assert_eq!(err.to_string(), "Cannot use [] for unsetting");
}
