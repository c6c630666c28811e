//! 循环代码生成
//!
//! while / do-while / for / foreach。循环体运行期间在当前作用域登记
//! break/continue 目标，离开时恢复外层目标。

use super::bytecode::{Instruction, Label, Operand, OperandSlot, EXT_BY_REF};
use super::flow::{LoopKind, LoopLabels};
use super::{CodegenContext, CompileError, CompileResult};
use crate::frontend::ast::{Expr, Stmt};
use crate::vm::opcode::Opcode;

impl CodegenContext<'_> {
    /// 在登记了 break/continue 目标的情况下生成循环体
    pub(crate) fn with_loop<T>(
        &mut self,
        labels: LoopLabels,
        f: impl FnOnce(&mut Self) -> CompileResult<T>,
    ) -> CompileResult<T> {
        self.unit.scopes.enter_loop(labels);
        let result = f(self);
        self.unit.scopes.leave_loop();
        result
    }

    fn loop_labels(
        kind: LoopKind,
        break_label: Label,
        continue_label: Label,
    ) -> LoopLabels {
        LoopLabels {
            kind,
            break_label,
            continue_label,
            iterator: None,
        }
    }

    /// ```text
    /// head: cond; JmpIfFalse end
    ///       <body>
    ///       Jmp head
    /// end:
    /// ```
    pub(crate) fn compile_while(
        &mut self,
        condition: &Expr,
        body: &[Stmt],
        alternative: bool,
    ) -> CompileResult<()> {
        let head = self.new_label();
        let end = self.new_label();

        self.place_label(head)?;
        let cond = self.compile_expr(condition)?;
        self.emit_jump_if(Opcode::JmpIfFalse, cond, end);

        self.with_loop(Self::loop_labels(LoopKind::Loop, end, head), |ctx| {
            ctx.compile_alt_block(body, alternative)
        })?;
        self.emit_jump(head);
        self.place_label(end)
    }

    pub(crate) fn compile_do_while(
        &mut self,
        body: &[Stmt],
        condition: &Expr,
    ) -> CompileResult<()> {
        let start = self.new_label();
        let cont = self.new_label();
        let end = self.new_label();

        self.place_label(start)?;
        self.with_loop(Self::loop_labels(LoopKind::Loop, end, cont), |ctx| {
            ctx.compile_block(body)
        })?;

        // continue 跳到条件判断处
        self.place_label(cont)?;
        let cond = self.compile_expr(condition)?;
        self.emit_jump_if(Opcode::JmpIfTrue, cond, start);
        self.place_label(end)
    }

    /// `for (init; cond; update)`：多个条件表达式时以最后一个为准
    pub(crate) fn compile_for(
        &mut self,
        init: &[Expr],
        condition: &[Expr],
        update: &[Expr],
        body: &[Stmt],
        alternative: bool,
    ) -> CompileResult<()> {
        for expr in init {
            let value = self.compile_expr(expr)?;
            self.free_if_temp(value);
        }

        let head = self.new_label();
        let cont = self.new_label();
        let end = self.new_label();

        self.place_label(head)?;
        if let Some((last, init)) = condition.split_last() {
            for expr in init {
                let value = self.compile_expr(expr)?;
                self.free_if_temp(value);
            }
            let cond = self.compile_expr(last)?;
            self.emit_jump_if(Opcode::JmpIfFalse, cond, end);
        }

        self.with_loop(Self::loop_labels(LoopKind::Loop, end, cont), |ctx| {
            ctx.compile_alt_block(body, alternative)
        })?;

        self.place_label(cont)?;
        for expr in update {
            let value = self.compile_expr(expr)?;
            self.free_if_temp(value);
        }
        self.emit_jump(head);
        self.place_label(end)
    }

    /// ```text
    ///       FeReset  subject -> it
    /// head: FeFetch  it, @end -> v
    ///       FeKey    it -> k            (有 key 时)
    ///       <绑定 value / key>
    ///       <body>
    ///       Jmp head
    /// end:  FeFree   it
    /// ```
    pub(crate) fn compile_foreach(
        &mut self,
        subject: &Expr,
        key: Option<&Expr>,
        value: &Expr,
        by_ref: bool,
        body: &[Stmt],
        alternative: bool,
    ) -> CompileResult<()> {
        if matches!(key, Some(Expr::List(_) | Expr::Array(_))) {
            return Err(CompileError::structural("Cannot use list as key element"));
        }
        let ext = if by_ref { EXT_BY_REF } else { 0 };

        let subject = if by_ref {
            self.compile_ref_source(subject)?
        } else {
            self.compile_expr(subject)?
        };
        let iterator = self.alloc_temp();
        self.emit(
            Instruction::new(Opcode::FeReset)
                .with_op1(subject)
                .with_result(iterator)
                .with_extended(ext),
        );

        let head = self.new_label();
        let end = self.new_label();
        self.place_label(head)?;

        // 迭代结束时跳到出口
        let current = self.alloc_temp();
        self.emit_with_targets(
            Instruction::new(Opcode::FeFetch)
                .with_op1(iterator)
                .with_result(current)
                .with_extended(ext),
            &[(OperandSlot::Op2, end)],
        );
        self.bind_foreach_value(value, current, by_ref)?;
        if let Some(key) = key {
            let key_value = self.emit_to_temp(Opcode::FeKey, iterator, Operand::UNUSED);
            self.assign_to(key, key_value)?;
        }

        let labels = LoopLabels {
            iterator: Some(iterator),
            ..Self::loop_labels(LoopKind::Foreach, end, head)
        };
        self.with_loop(labels, |ctx| ctx.compile_alt_block(body, alternative))?;
        self.emit_jump(head);

        self.place_label(end)?;
        self.emit(Instruction::new(Opcode::FeFree).with_op1(iterator));
        Ok(())
    }

    fn bind_foreach_value(
        &mut self,
        target: &Expr,
        current: Operand,
        by_ref: bool,
    ) -> CompileResult<()> {
        match target {
            // list 解构中的引用由各元素自身的标记决定
            Expr::List(_) | Expr::Array(_) => self.assign_to(target, current)?,
            _ if by_ref => self.assign_ref_to(target, current)?,
            _ => self.assign_to(target, current)?,
        };
        Ok(())
    }
}
