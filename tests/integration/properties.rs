//! 随机程序的性质测试

use opline::frontend::ast::{Expr, Program, Stmt};
use opline::vm::Opcode;
use opline::{compile, Registry};
use proptest::prelude::*;

/// 变量名
fn name_strategy() -> impl Strategy<Value = &'static str> {
    prop_oneof![Just("a"), Just("b"), Just("c"), Just("d")]
}

/// 简单表达式
fn expr_strategy() -> impl Strategy<Value = Expr> {
    let leaf = prop_oneof![
        any::<i64>().prop_map(Expr::Int),
        any::<bool>().prop_map(Expr::Bool),
        name_strategy().prop_map(Expr::var),
    ];
    leaf.prop_recursive(2, 8, 2, |inner| {
        prop_oneof![
            (inner.clone(), inner.clone()).prop_map(|(l, r)| Expr::binary("+", l, r)),
            (inner.clone(), inner.clone()).prop_map(|(l, r)| Expr::binary("&&", l, r)),
            (inner.clone(), inner).prop_map(|(l, r)| Expr::binary("??", l, r)),
        ]
    })
}

/// 不含跨循环 break 的语句
fn stmt_strategy() -> impl Strategy<Value = Stmt> {
    let leaf = prop_oneof![
        expr_strategy().prop_map(|e| Stmt::Echo(vec![e])),
        (name_strategy(), expr_strategy())
            .prop_map(|(n, e)| Stmt::Expr(Expr::assign(Expr::var(n), e))),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        let block = prop::collection::vec(inner, 0..4);
        prop_oneof![
            (expr_strategy(), block.clone(), prop::option::of(block.clone())).prop_map(
                |(condition, then_branch, else_branch)| Stmt::If {
                    condition,
                    then_branch,
                    elseif_branches: Vec::new(),
                    else_branch,
                    alternative: false,
                }
            ),
            (name_strategy(), block.clone(), any::<bool>()).prop_map(|(n, mut body, brk)| {
                if brk {
                    body.push(Stmt::Break(None));
                }
                Stmt::While {
                    condition: Expr::var(n),
                    body,
                    alternative: false,
                }
            }),
            (name_strategy(), name_strategy(), block, any::<bool>()).prop_map(
                |(subject, value, mut body, cont)| {
                    if cont {
                        body.insert(0, Stmt::Continue(None));
                    }
                    Stmt::Foreach {
                        subject: Expr::var(subject),
                        key: None,
                        value: Expr::var(value),
                        by_ref: false,
                        body,
                        alternative: false,
                    }
                }
            ),
        ]
    })
}

fn program_strategy() -> impl Strategy<Value = Program> {
    prop::collection::vec(stmt_strategy(), 0..8).prop_map(Program::new)
}

proptest! {
    #[test]
    fn test_jump_targets_in_range(program in program_strategy()) {
        let mut registry = Registry::new();
        let script = compile(&program, &mut registry).unwrap();
        let len = script.main.len() as u32;
        for instr in &script.main.instructions {
            for target in instr.jump_targets() {
                prop_assert!(target < len, "jump to {} in {} instructions", target, len);
            }
        }
        prop_assert_eq!(
            script.main.instructions.last().map(|i| i.opcode),
            Some(Opcode::Return)
        );
    }

    #[test]
    fn test_compilation_is_deterministic(program in program_strategy()) {
        let first = compile(&program, &mut Registry::new()).unwrap();
        let second = compile(&program, &mut Registry::new()).unwrap();
        prop_assert_eq!(first, second);
    }

    #[test]
    fn test_iterators_are_freed(program in program_strategy()) {
        let script = compile(&program, &mut Registry::new()).unwrap();
        prop_assert!(
            script.main.count(Opcode::FeFree) >= script.main.count(Opcode::FeReset)
        );
    }
}

mod quickcheck_tests {
    use super::*;
    use quickcheck::TestResult;
    use quickcheck_macros::quickcheck;

    /// echo 每个整数：LoadConst + Echo，外加隐式 Return
    #[quickcheck]
    fn quickcheck_echo_layout(values: Vec<i64>) -> bool {
        let n = values.len();
        let program = Program::new(
            values
                .into_iter()
                .map(|v| Stmt::Echo(vec![Expr::Int(v)]))
                .collect(),
        );
        let script = compile(&program, &mut Registry::new()).unwrap();
        script.main.len() == 2 * n + 1 && script.main.count(Opcode::Echo) == n
    }

    /// 每个不同的变量名占用一个槽位
    #[quickcheck]
    fn quickcheck_variable_slots(names: Vec<u8>) -> TestResult {
        if names.len() > 64 {
            return TestResult::discard();
        }
        let program = Program::new(
            names
                .iter()
                .map(|n| {
                    Stmt::Expr(Expr::assign(
                        Expr::var(&format!("v{}", n % 16)),
                        Expr::Int(*n as i64),
                    ))
                })
                .collect(),
        );
        let script = compile(&program, &mut Registry::new()).unwrap();

        let mut distinct: Vec<u8> = names.iter().map(|n| n % 16).collect();
        distinct.sort_unstable();
        distinct.dedup();
        TestResult::from_bool(script.main.var_names.len() == distinct.len())
    }
}
