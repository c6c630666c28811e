//! 控制流代码生成
//!
//! if/elseif/else、break/continue、return、goto 与 try/catch/finally。
//! 所有跳转目标（包括异常处理器地址）都经由同一套标签回填。

use super::bytecode::{Constant, Instruction, Label, Operand, OperandSlot};
use super::flow::{Exit, LoopKind, PendingGoto, TryPhase, TryRegion};
use super::{CodegenContext, CompileError, CompileResult};
use crate::frontend::ast::{Block, CatchClause, Expr, Stmt};
use crate::vm::opcode::Opcode;
use tracing::trace;

impl CodegenContext<'_> {
    pub(crate) fn compile_if(
        &mut self,
        condition: &Expr,
        then_branch: &[Stmt],
        elseif_branches: &[(Expr, Block)],
        else_branch: Option<&[Stmt]>,
        alternative: bool,
    ) -> CompileResult<()> {
        let end = self.new_label();
        let branches = std::iter::once((condition, then_branch))
            .chain(elseif_branches.iter().map(|(c, b)| (c, b.as_slice())));
        let count = elseif_branches.len() + 1;

        for (index, (condition, body)) in branches.enumerate() {
            let is_last = index + 1 == count && else_branch.is_none();
            let next = self.new_label();

            // 条件为假则跳到下一个分支
            let cond = self.compile_expr(condition)?;
            self.emit_jump_if(Opcode::JmpIfFalse, cond, next);

            self.compile_alt_block(body, alternative)?;
            if !is_last {
                self.emit_jump(end);
            }
            self.place_label(next)?;
        }

        if let Some(else_branch) = else_branch {
            self.compile_alt_block(else_branch, alternative)?;
        }
        self.place_label(end)
    }

    /// `break N` / `continue N`
    ///
    /// 途经的 foreach 释放迭代器，途经的 switch 释放条件临时值，途经的 try
    /// 卸载处理器并执行 finally；目标层本身的清理由其出口代码完成。
    pub(crate) fn compile_break(
        &mut self,
        depth: u32,
        is_continue: bool,
    ) -> CompileResult<()> {
        let keyword = if is_continue { "continue" } else { "break" };
        if depth == 0 {
            return Err(CompileError::structural(format!(
                "'{}' operator accepts only positive integers",
                keyword
            )));
        }
        let target = match self.unit.scopes.loop_target(depth) {
            Some(target) => target,
            None if self.unit.scopes.active_loops().is_empty() => {
                return Err(CompileError::structural(format!(
                    "'{}' not in the 'loop' or 'switch' context",
                    keyword
                )));
            }
            None => {
                return Err(CompileError::structural(format!(
                    "Cannot '{}' {} level{}",
                    keyword,
                    depth,
                    if depth == 1 { "" } else { "s" }
                )));
            }
        };

        // 目标层在由外向内数的第 keep 层
        let keep = self.unit.scopes.active_loops().len() + 1 - depth as usize;
        let exits = self.unit.scopes.exits(keep);
        self.leave_regions(&exits, false)?;
        let label = if is_continue {
            target.continue_label
        } else {
            target.break_label
        };
        self.emit_jump(label);
        Ok(())
    }

    /// `return`：先离开全部循环与 try 区域
    ///
    /// 需要执行 finally 时，变量返回值先复制到临时值，finally 对变量的修改不影响返回值。
    pub(crate) fn compile_return(
        &mut self,
        value: Option<&Expr>,
    ) -> CompileResult<()> {
        let mut value = match value {
            Some(value) => self.compile_expr(value)?,
            None => self.constant(Constant::Null),
        };
        let exits = self.unit.scopes.exits(0);
        let runs_finally = exits.iter().any(|exit| {
            matches!(exit, Exit::Try(region)
                if region.phase != TryPhase::Finally && region.finally.is_some())
        });
        if runs_finally && value.is_var() {
            value = self.emit_to_temp(Opcode::QmAssign, value, Operand::UNUSED);
        }
        self.leave_regions(&exits, true)?;
        self.emit(Instruction::new(Opcode::Return).with_op1(value));
        Ok(())
    }

    /// 按由内向外的顺序离开各层
    fn leave_regions(
        &mut self,
        exits: &[Exit],
        returning: bool,
    ) -> CompileResult<()> {
        for exit in exits {
            match *exit {
                Exit::Loop(labels) => self.free_loop_state(labels.kind, labels.iterator),
                Exit::Try(region) => self.leave_try_region(region, returning)?,
            }
        }
        Ok(())
    }

    /// 离开一层 try：受保护区域先卸载处理器，有 finally 则经 `FastCall` 执行
    ///
    /// finally 内只允许 `return` 离开，此时 finally 本身已在执行，直接跳过。
    fn leave_try_region(
        &mut self,
        region: TryRegion,
        returning: bool,
    ) -> CompileResult<()> {
        match region.phase {
            TryPhase::Finally if returning => return Ok(()),
            TryPhase::Finally => {
                return Err(CompileError::structural(
                    "jump out of a finally block is disallowed",
                ));
            }
            TryPhase::Body => {
                self.emit(Instruction::new(Opcode::PopHandler));
            }
            TryPhase::Catch => {}
        }
        if let Some((label, slot)) = region.finally {
            self.emit_with_targets(
                Instruction::new(Opcode::FastCall).with_result(slot),
                &[(OperandSlot::Op1, label)],
            );
        }
        Ok(())
    }

    /// `goto name`
    ///
    /// 目标已放置（向后跳）时立即检查并清理途经的 try 区域；
    /// 向前跳且身处 try 区域时先跳到单元末尾的跳板，由 `resolve_goto` 补齐清理。
    pub(crate) fn compile_goto(
        &mut self,
        name: &str,
    ) -> CompileResult<()> {
        let target = self.unit.flow.goto_label(name);
        let here = self.unit.scopes.active_tries().to_vec();
        if let Some(there) = self.unit.flow.goto_regions(target).map(<[TryRegion]>::to_vec) {
            for region in goto_exits(&here, &there)? {
                self.leave_try_region(region, false)?;
            }
            self.emit_jump(target);
            return Ok(());
        }

        let trampoline = if here.is_empty() {
            self.emit_jump(target);
            None
        } else {
            let trampoline = self.new_label();
            self.emit_jump(trampoline);
            Some(trampoline)
        };
        self.unit.flow.add_pending_goto(PendingGoto {
            target,
            regions: here,
            trampoline,
        });
        Ok(())
    }

    /// goto 标签：记录所在的 try 区域
    pub(crate) fn compile_goto_label(
        &mut self,
        name: &str,
    ) -> CompileResult<()> {
        let label = self.unit.flow.goto_label(name);
        if self.unit.flow.address_of(label).is_some() {
            return Err(CompileError::structural(format!(
                "Label '{}' already defined",
                name
            )));
        }
        trace!("goto label `{}`", name);
        let regions = self.unit.scopes.active_tries().to_vec();
        self.unit.flow.set_goto_regions(label, regions);
        self.place_label(label)
    }

    /// 单元结束时检查向前的 goto，并在末尾生成跳板
    pub(crate) fn resolve_goto(
        &mut self,
        goto: PendingGoto,
    ) -> CompileResult<()> {
        let Some(there) = self
            .unit
            .flow
            .goto_regions(goto.target)
            .map(<[TryRegion]>::to_vec)
        else {
            let name = self.unit.flow.goto_name(goto.target).unwrap_or_default();
            return Err(CompileError::structural(format!(
                "'goto' to undefined label '{}'",
                name
            )));
        };
        let exited = goto_exits(&goto.regions, &there)?;
        if let Some(trampoline) = goto.trampoline {
            self.place_label(trampoline)?;
            for region in exited {
                self.leave_try_region(region, false)?;
            }
            self.emit_jump(goto.target);
        }
        Ok(())
    }

    fn free_loop_state(
        &mut self,
        kind: LoopKind,
        iterator: Option<Operand>,
    ) {
        match (kind, iterator) {
            (LoopKind::Foreach, Some(it)) => {
                self.emit(Instruction::new(Opcode::FeFree).with_op1(it));
            }
            (LoopKind::Switch, Some(subject)) => self.free_if_temp(subject),
            _ => {}
        }
    }

    /// try / catch / finally
    ///
    /// ```text
    ///     InstallHandler  @catch0, @finally
    ///     <body>
    ///     PopHandler
    ///     Jmp             @finally | @end
    /// catch0:
    ///     Catch           A, @catch1 -> $e
    ///     <catch body>
    ///     Jmp             @finally | @end
    /// catch1: ...
    /// finally:
    ///     <finally body>
    ///     FinallyEnd      ~slot
    /// end:
    /// ```
    ///
    /// 提前离开时以 `FastCall @finally -> ~slot` 进入 finally，`FinallyEnd` 据此跳回。
    pub(crate) fn compile_try(
        &mut self,
        body: &[Stmt],
        catches: &[CatchClause],
        finally: Option<&[Stmt]>,
    ) -> CompileResult<()> {
        if catches.is_empty() && finally.is_none() {
            return Err(CompileError::structural(
                "Cannot use try without catch or finally",
            ));
        }
        let end = self.new_label();
        let finally_label = finally.map(|_| self.new_label());
        let slot = finally.map(|_| self.alloc_temp());
        let exit = finally_label.unwrap_or(end);
        let catch_labels: Vec<Label> = catches.iter().map(|_| self.new_label()).collect();

        let mut targets = Vec::new();
        if let Some(first) = catch_labels.first() {
            targets.push((OperandSlot::Op1, *first));
        }
        if let Some(label) = finally_label {
            targets.push((OperandSlot::Op2, label));
        }
        self.emit_with_targets(Instruction::new(Opcode::InstallHandler), &targets);

        // 受保护区域
        self.unit.scopes.enter_try(finally_label.zip(slot));
        self.compile_block(body)?;
        self.emit(Instruction::new(Opcode::PopHandler));
        self.emit_jump(exit);

        self.unit.scopes.set_try_phase(TryPhase::Catch);

        for (index, clause) in catches.iter().enumerate() {
            self.place_label(catch_labels[index])?;
            // 全部不匹配时交给 finally，没有 finally 则重新抛出
            let fallthrough = catch_labels.get(index + 1).copied().or(finally_label);
            self.compile_catch(clause, fallthrough)?;
            self.compile_block(&clause.body)?;
            self.emit_jump(exit);
        }

        if let (Some(label), Some(block), Some(slot)) = (finally_label, finally, slot) {
            self.unit.scopes.set_try_phase(TryPhase::Finally);
            self.place_label(label)?;
            self.compile_block(block)?;
            self.emit(Instruction::new(Opcode::FinallyEnd).with_op1(slot));
        }
        self.unit.scopes.leave_try();
        self.place_label(end)
    }

    /// 一个 catch 子句的类型匹配链（`catch (A | B $e)`）
    fn compile_catch(
        &mut self,
        clause: &CatchClause,
        fallthrough: Option<Label>,
    ) -> CompileResult<()> {
        let Some((last, init)) = clause.types.split_last() else {
            return Err(CompileError::structural("catch clause without a class"));
        };
        let variable = match &clause.variable {
            Some(name) => self.variable(name),
            None => Operand::UNUSED,
        };
        let matched = self.new_label();

        for class in init {
            let next = self.new_label();
            let class = self.name_constant(class.trim_start_matches('\\'));
            self.emit_with_targets(
                Instruction::new(Opcode::Catch)
                    .with_op1(class)
                    .with_result(variable),
                &[(OperandSlot::Op2, next)],
            );
            self.emit_jump(matched);
            self.place_label(next)?;
        }

        let class = self.name_constant(last.trim_start_matches('\\'));
        let instr = Instruction::new(Opcode::Catch)
            .with_op1(class)
            .with_result(variable);
        match fallthrough {
            Some(label) => self.emit_with_targets(instr, &[(OperandSlot::Op2, label)]),
            None => self.emit(instr),
        };
        self.place_label(matched)
    }
}

/// goto 途经需要离开的 try 区域（由内向外）
///
/// `from` 与 `to` 都是由外向内的区域快照；目标只能位于二者共同的区域内。
fn goto_exits(
    from: &[TryRegion],
    to: &[TryRegion],
) -> CompileResult<Vec<TryRegion>> {
    let common = from
        .iter()
        .zip(to)
        .take_while(|(a, b)| a.same_part(b))
        .count();
    if let Some(entered) = to.get(common) {
        return Err(CompileError::structural(if entered.phase == TryPhase::Finally {
            "jump into a finally block is disallowed"
        } else {
            "'goto' into a try block is disallowed"
        }));
    }
    let exited: Vec<TryRegion> = from[common..].iter().rev().copied().collect();
    if exited.iter().any(|r| r.phase == TryPhase::Finally) {
        return Err(CompileError::structural(
            "jump out of a finally block is disallowed",
        ));
    }
    Ok(exited)
}
