//! 控制流代码生成测试

use super::*;
use crate::frontend::ast::CatchClause;

fn echo(value: i64) -> Stmt {
    Stmt::Echo(vec![Expr::Int(value)])
}

fn catch_all(body: Vec<Stmt>) -> CatchClause {
    CatchClause {
        types: vec!["Exception".to_string()],
        variable: None,
        body,
    }
}

fn while_loop(
    condition: Expr,
    body: Vec<Stmt>,
) -> Stmt {
    Stmt::While {
        condition,
        body,
        alternative: false,
    }
}

#[test]
fn test_if_else_jump_structure() {
    // if ($a) { echo 1; } else { echo 2; }
    let (script, _) = compile_ok(vec![Stmt::If {
        condition: Expr::var("a"),
        then_branch: vec![echo(1)],
        elseif_branches: vec![],
        else_branch: Some(vec![echo(2)]),
        alternative: false,
    }]);
    let main = &script.main;
    assert_eq!(
        opcodes(main),
        vec![
            Opcode::JmpIfFalse,
            Opcode::LoadConst,
            Opcode::Echo,
            Opcode::Jmp,
            Opcode::LoadConst,
            Opcode::Echo,
            Opcode::Return,
        ]
    );
    // 条件为假跳到 else 分支的第一条指令，then 分支结束后跳过 else
    assert_eq!(address(main.instructions[0].op2), 4);
    assert_eq!(address(main.instructions[3].op1), 6);
    assert_addresses_in_range(main);
}

#[test]
fn test_if_without_else_has_no_trailing_jump() {
    let (script, _) = compile_ok(vec![Stmt::If {
        condition: Expr::var("a"),
        then_branch: vec![echo(1)],
        elseif_branches: vec![(Expr::var("b"), vec![echo(2)])],
        else_branch: None,
        alternative: true,
    }]);
    let main = &script.main;
    // 只有第一个分支需要跳过后续分支
    assert_eq!(main.count(Opcode::Jmp), 1);
    assert_eq!(main.count(Opcode::JmpIfFalse), 2);
    let (_, first_cond) = first(main, Opcode::JmpIfFalse);
    let (second_cond_addr, _) = main.find(Opcode::JmpIfFalse).nth(1).unwrap();
    assert_eq!(address(first_cond.op2), second_cond_addr);
    assert_addresses_in_range(main);
}

#[test]
fn test_break_targets_innermost_loop_and_restores_outer() {
    // while ($a) { while ($b) { break; } break; }
    let (script, _) = compile_ok(vec![while_loop(
        Expr::var("a"),
        vec![
            while_loop(Expr::var("b"), vec![Stmt::Break(None)]),
            Stmt::Break(None),
        ],
    )]);
    let main = &script.main;
    assert_eq!(
        opcodes(main),
        vec![
            Opcode::JmpIfFalse, // 0: outer head
            Opcode::JmpIfFalse, // 1: inner head
            Opcode::Jmp,        // 2: inner break
            Opcode::Jmp,        // 3: inner back edge
            Opcode::Jmp,        // 4: outer break
            Opcode::Jmp,        // 5: outer back edge
            Opcode::Return,
        ]
    );
    assert_eq!(address(main.instructions[2].op1), 4);
    assert_eq!(address(main.instructions[3].op1), 1);
    assert_eq!(address(main.instructions[4].op1), 6);
    assert_eq!(address(main.instructions[5].op1), 0);
}

#[test]
fn test_continue_two_levels() {
    // while ($a) { while ($b) { continue 2; } }
    let (script, _) = compile_ok(vec![while_loop(
        Expr::var("a"),
        vec![while_loop(Expr::var("b"), vec![Stmt::Continue(Some(2))])],
    )]);
    let main = &script.main;
    assert_eq!(address(main.instructions[2].op1), 0);
}

#[test]
fn test_break_errors() {
    let err = compile_err(vec![Stmt::Break(None)]);
    assert_eq!(err.to_string(), "'break' not in the 'loop' or 'switch' context");

    let err = compile_err(vec![while_loop(Expr::var("a"), vec![Stmt::Break(Some(3))])]);
    assert_eq!(err.to_string(), "Cannot 'break' 3 levels");

    let err = compile_err(vec![while_loop(Expr::var("a"), vec![Stmt::Continue(Some(0))])]);
    assert_eq!(
        err.to_string(),
        "'continue' operator accepts only positive integers"
    );
}

#[test]
fn test_try_catch_finally_layout() {
    // try { f(); } catch (A | B $e) { echo 1; } catch (C) { echo 2; } finally { echo 3; }
    let (script, _) = compile_ok(vec![Stmt::Try {
        body: vec![Stmt::Expr(Expr::call("f", vec![]))],
        catches: vec![
            CatchClause {
                types: vec!["A".to_string(), "B".to_string()],
                variable: Some("e".to_string()),
                body: vec![echo(1)],
            },
            CatchClause {
                types: vec!["C".to_string()],
                variable: None,
                body: vec![echo(2)],
            },
        ],
        finally: Some(vec![echo(3)]),
    }]);
    let main = &script.main;
    assert_addresses_in_range(main);

    let (_, install) = first(main, Opcode::InstallHandler);
    let catches: Vec<(usize, &Instruction)> = main.find(Opcode::Catch).collect();
    assert_eq!(catches.len(), 3);
    let (finally_end, _) = first(main, Opcode::FinallyEnd);

    // 处理器指向第一个 catch
    assert_eq!(address(install.op1), catches[0].0);
    // A 不匹配时尝试 B
    assert_eq!(address(catches[0].1.op2), catches[1].0);
    // B 不匹配时尝试下一个子句 C
    assert_eq!(address(catches[1].1.op2), catches[2].0);
    // C 不匹配时进入 finally
    let finally_start = address(install.op2);
    assert_eq!(address(catches[2].1.op2), finally_start);
    assert!(finally_start < finally_end);
    // 异常变量
    assert_eq!(catches[0].1.result, Operand::var(0));
    assert!(catches[2].1.result.is_unused());
    assert_eq!(main.count(Opcode::PopHandler), 1);
}

#[test]
fn test_try_without_finally_rethrows_on_last_catch() {
    let (script, _) = compile_ok(vec![Stmt::Try {
        body: vec![],
        catches: vec![CatchClause {
            types: vec!["Exception".to_string()],
            variable: Some("e".to_string()),
            body: vec![],
        }],
        finally: None,
    }]);
    let main = &script.main;
    let (_, install) = first(main, Opcode::InstallHandler);
    assert!(install.op2.is_unused());
    let (_, catch) = first(main, Opcode::Catch);
    assert!(catch.op2.is_unused());
}

#[test]
fn test_nested_try_resolves_each_handler() {
    let inner = Stmt::Try {
        body: vec![echo(1)],
        catches: vec![CatchClause {
            types: vec!["Inner".to_string()],
            variable: None,
            body: vec![],
        }],
        finally: None,
    };
    let (script, _) = compile_ok(vec![Stmt::Try {
        body: vec![inner],
        catches: vec![CatchClause {
            types: vec!["Outer".to_string()],
            variable: None,
            body: vec![],
        }],
        finally: None,
    }]);
    let main = &script.main;
    let handlers: Vec<&Instruction> = main.find(Opcode::InstallHandler).map(|(_, i)| i).collect();
    let catches: Vec<usize> = main.find(Opcode::Catch).map(|(a, _)| a).collect();
    assert_eq!(address(handlers[0].op1), catches[1]);
    assert_eq!(address(handlers[1].op1), catches[0]);
    assert_addresses_in_range(main);
}

#[test]
fn test_try_requires_catch_or_finally() {
    let err = compile_err(vec![Stmt::Try {
        body: vec![],
        catches: vec![],
        finally: None,
    }]);
    assert_eq!(err.to_string(), "Cannot use try without catch or finally");
}

#[test]
fn test_return_in_try_runs_finally() {
    // try { return $x; } finally { echo 2; }
    let (script, _) = compile_ok(vec![Stmt::Try {
        body: vec![Stmt::Return(Some(Expr::var("x")))],
        catches: vec![],
        finally: Some(vec![echo(2)]),
    }]);
    let main = &script.main;
    assert_eq!(
        opcodes(main),
        vec![
            Opcode::InstallHandler, // 0
            Opcode::QmAssign,       // 1: 返回值先复制
            Opcode::PopHandler,     // 2
            Opcode::FastCall,       // 3
            Opcode::Return,         // 4
            Opcode::PopHandler,     // 5: 正常路径
            Opcode::Jmp,            // 6
            Opcode::LoadConst,      // 7: finally
            Opcode::Echo,
            Opcode::FinallyEnd,
            Opcode::Return,
        ]
    );
    let (_, install) = first(main, Opcode::InstallHandler);
    let (_, copy) = first(main, Opcode::QmAssign);
    let (_, call) = first(main, Opcode::FastCall);
    let (_, finally_end) = first(main, Opcode::FinallyEnd);
    assert_eq!(address(call.op1), address(install.op2));
    assert_eq!(address(main.instructions[6].op1), 7);
    assert!(call.result.is_temp());
    assert_eq!(finally_end.op1, call.result);
    assert_eq!(copy.op1, Operand::var(0));
    assert_eq!(main.instructions[4].op1, copy.result);
    assert_addresses_in_range(main);
}

#[test]
fn test_return_inside_finally_does_not_reenter_it() {
    // try { f(); } finally { return 1; }
    let (script, _) = compile_ok(vec![Stmt::Try {
        body: vec![Stmt::Expr(Expr::call("f", vec![]))],
        catches: vec![],
        finally: Some(vec![Stmt::Return(Some(Expr::Int(1)))]),
    }]);
    let main = &script.main;
    assert_eq!(main.count(Opcode::FastCall), 0);
    assert_eq!(main.count(Opcode::PopHandler), 1);
}

#[test]
fn test_break_inside_try_pops_handler() {
    // while ($a) { try { break; } catch (Exception) {} }
    let (script, _) = compile_ok(vec![while_loop(
        Expr::var("a"),
        vec![Stmt::Try {
            body: vec![Stmt::Break(None)],
            catches: vec![catch_all(vec![])],
            finally: None,
        }],
    )]);
    let main = &script.main;
    assert_eq!(
        opcodes(main)[..4],
        [
            Opcode::JmpIfFalse,
            Opcode::InstallHandler,
            Opcode::PopHandler,
            Opcode::Jmp,
        ]
    );
    // break 跳到循环之后的隐式返回
    assert_eq!(address(main.instructions[3].op1), main.len() - 1);
    assert_eq!(main.count(Opcode::PopHandler), 2);
    assert_addresses_in_range(main);
}

#[test]
fn test_continue_from_catch_runs_finally() {
    // while ($a) { try { f(); } catch (Exception) { continue; } finally { echo 1; } }
    let (script, _) = compile_ok(vec![while_loop(
        Expr::var("a"),
        vec![Stmt::Try {
            body: vec![Stmt::Expr(Expr::call("f", vec![]))],
            catches: vec![catch_all(vec![Stmt::Continue(None)])],
            finally: Some(vec![echo(1)]),
        }],
    )]);
    let main = &script.main;
    let (_, install) = first(main, Opcode::InstallHandler);
    let (call_addr, call) = first(main, Opcode::FastCall);
    let (catch_addr, _) = first(main, Opcode::Catch);
    // catch 中处理器已卸载，只执行 finally
    assert!(call_addr > catch_addr);
    assert_eq!(main.count(Opcode::PopHandler), 1);
    assert_eq!(address(call.op1), address(install.op2));
    let next = main.instructions[call_addr + 1];
    assert_eq!(next.opcode, Opcode::Jmp);
    assert_eq!(address(next.op1), 0);
    assert_addresses_in_range(main);
}

#[test]
fn test_return_inside_foreach_frees_iterator() {
    // foreach ($arr as $v) { return $v; }
    let (script, _) = compile_ok(vec![Stmt::Foreach {
        subject: Expr::var("arr"),
        key: None,
        value: Expr::var("v"),
        by_ref: false,
        body: vec![Stmt::Return(Some(Expr::var("v")))],
        alternative: false,
    }]);
    let main = &script.main;
    assert_eq!(
        opcodes(main),
        vec![
            Opcode::FeReset,
            Opcode::FeFetch,
            Opcode::Assign,
            Opcode::FeFree,
            Opcode::Return,
            Opcode::Jmp,
            Opcode::FeFree,
            Opcode::Return,
        ]
    );
    let (_, reset) = first(main, Opcode::FeReset);
    assert_eq!(main.instructions[3].op1, reset.result);
    assert_eq!(main.instructions[4].op1, Operand::var(1));
}

#[test]
fn test_goto_out_of_try_goes_through_trampoline() {
    // try { goto out; } finally { echo 1; } out: echo 2;
    let (script, _) = compile_ok(vec![
        Stmt::Try {
            body: vec![Stmt::Goto("out".to_string())],
            catches: vec![],
            finally: Some(vec![echo(1)]),
        },
        Stmt::Label("out".to_string()),
        echo(2),
    ]);
    let main = &script.main;
    assert_eq!(
        opcodes(main),
        vec![
            Opcode::InstallHandler, // 0
            Opcode::Jmp,            // 1: goto -> 跳板
            Opcode::PopHandler,     // 2
            Opcode::Jmp,            // 3
            Opcode::LoadConst,      // 4: finally
            Opcode::Echo,
            Opcode::FinallyEnd,
            Opcode::LoadConst, // 7: out
            Opcode::Echo,
            Opcode::Return,
            Opcode::PopHandler, // 10: 跳板
            Opcode::FastCall,
            Opcode::Jmp,
        ]
    );
    assert_eq!(address(main.instructions[1].op1), 10);
    assert_eq!(address(main.instructions[11].op1), 4);
    assert_eq!(address(main.instructions[12].op1), 7);
    assert_addresses_in_range(main);
}

#[test]
fn test_backward_goto_out_of_try_pops_handler() {
    // back: try { goto back; } catch (Exception) {}
    let (script, _) = compile_ok(vec![
        Stmt::Label("back".to_string()),
        Stmt::Try {
            body: vec![Stmt::Goto("back".to_string())],
            catches: vec![catch_all(vec![])],
            finally: None,
        },
    ]);
    let main = &script.main;
    assert_eq!(
        opcodes(main)[..3],
        [Opcode::InstallHandler, Opcode::PopHandler, Opcode::Jmp]
    );
    assert_eq!(address(main.instructions[2].op1), 0);
}

#[test]
fn test_jumps_across_finally_and_into_try_rejected() {
    let err = compile_err(vec![while_loop(
        Expr::var("a"),
        vec![Stmt::Try {
            body: vec![],
            catches: vec![],
            finally: Some(vec![Stmt::Break(None)]),
        }],
    )]);
    assert_eq!(err.to_string(), "jump out of a finally block is disallowed");

    let err = compile_err(vec![
        Stmt::Try {
            body: vec![],
            catches: vec![],
            finally: Some(vec![Stmt::Goto("out".to_string())]),
        },
        Stmt::Label("out".to_string()),
    ]);
    assert_eq!(err.to_string(), "jump out of a finally block is disallowed");

    let err = compile_err(vec![
        Stmt::Goto("inside".to_string()),
        Stmt::Try {
            body: vec![Stmt::Label("inside".to_string())],
            catches: vec![catch_all(vec![])],
            finally: None,
        },
    ]);
    assert_eq!(err.to_string(), "'goto' into a try block is disallowed");

    // 循环完全位于 finally 内时可以 break
    let (script, _) = compile_ok(vec![Stmt::Try {
        body: vec![],
        catches: vec![],
        finally: Some(vec![while_loop(Expr::var("a"), vec![Stmt::Break(None)])]),
    }]);
    assert_eq!(script.main.count(Opcode::FastCall), 0);
}

#[test]
fn test_goto_backward_and_forward() {
    let (script, _) = compile_ok(vec![
        Stmt::Label("start".to_string()),
        Stmt::Goto("end".to_string()),
        echo(1),
        Stmt::Goto("start".to_string()),
        Stmt::Label("end".to_string()),
    ]);
    let main = &script.main;
    let jumps: Vec<&Instruction> = main.find(Opcode::Jmp).map(|(_, i)| i).collect();
    assert_eq!(address(jumps[0].op1), 4);
    assert_eq!(address(jumps[1].op1), 0);
    // 标签位于末尾，隐式返回仍然生成
    assert_eq!(main.instructions[4].opcode, Opcode::Return);
}

#[test]
fn test_goto_undefined_label() {
    let err = compile_err(vec![Stmt::Goto("nowhere".to_string())]);
    assert_eq!(err.to_string(), "'goto' to undefined label 'nowhere'");
}

#[test]
fn test_duplicate_label() {
    let err = compile_err(vec![
        Stmt::Label("a".to_string()),
        Stmt::Label("a".to_string()),
    ]);
    assert_eq!(err.to_string(), "Label 'a' already defined");
}

#[test]
fn test_return_in_middle_keeps_implicit_return_for_label() {
    // if ($a) { return; }  -- 末尾有标签指向，仍需隐式返回
    let (script, _) = compile_ok(vec![Stmt::If {
        condition: Expr::var("a"),
        then_branch: vec![Stmt::Return(None)],
        elseif_branches: vec![],
        else_branch: None,
        alternative: false,
    }]);
    let main = &script.main;
    assert_eq!(
        opcodes(main),
        vec![Opcode::JmpIfFalse, Opcode::Return, Opcode::Return]
    );
    assert_eq!(address(main.instructions[0].op2), 2);
    // 无值的 return 直接引用常量，不占临时值
    assert!(main.instructions[1].op1.is_const());
    assert_eq!(main.temp_count, 0);
}
