//! switch 与 match 代码生成
//!
//! switch 是一串宽松比较（`Case`），match 是一串严格比较（`IsIdentical`）。
//! 两者都先生成全部比较，再依次生成各分支体。

use super::bytecode::{Instruction, Label, Operand};
use super::flow::{LoopKind, LoopLabels};
use super::{CodegenContext, CompileError, CompileResult};
use crate::frontend::ast::{Expr, MatchArm, SwitchCase};
use crate::vm::opcode::Opcode;
use tracing::trace;

impl CodegenContext<'_> {
    /// ```text
    ///     Case      subject, c0 -> t; JmpIfTrue t, @case0
    ///     Case      subject, c1 -> t; JmpIfTrue t, @case1
    ///     Jmp       @default | @end
    /// case0: ...            (fall through)
    /// case1: ...
    /// end:    Free subject
    /// ```
    pub(crate) fn compile_switch(
        &mut self,
        subject: &Expr,
        cases: &[SwitchCase],
        alternative: bool,
    ) -> CompileResult<()> {
        if cases.iter().filter(|c| c.condition.is_none()).count() > 1 {
            return Err(CompileError::structural(
                "Switch statements may only contain one default clause",
            ));
        }
        let subject = self.compile_expr(subject)?;
        let end = self.new_label();
        let case_labels: Vec<Label> = cases.iter().map(|_| self.new_label()).collect();

        // 比较链
        let mut default = None;
        for (case, label) in cases.iter().zip(&case_labels) {
            match &case.condition {
                Some(condition) => {
                    let value = self.compile_expr(condition)?;
                    let matched = self.emit_to_temp(Opcode::Case, subject, value);
                    self.emit_jump_if(Opcode::JmpIfTrue, matched, *label);
                }
                None => default = Some(*label),
            }
        }
        self.emit_jump(default.unwrap_or(end));
        trace!("switch: {} cases", cases.len());

        // 分支体按源码顺序排列，未 break 时顺次落入下一分支
        let labels = LoopLabels {
            kind: LoopKind::Switch,
            break_label: end,
            continue_label: end,
            iterator: Some(subject),
        };
        self.with_loop(labels, |ctx| {
            for (case, label) in cases.iter().zip(&case_labels) {
                ctx.place_label(*label)?;
                ctx.compile_alt_block(&case.body, alternative)?;
            }
            Ok(())
        })?;

        self.place_label(end)?;
        self.free_if_temp(subject);
        Ok(())
    }

    /// match 表达式：没有 default 且无分支匹配时发射 `MatchError`
    pub(crate) fn compile_match(
        &mut self,
        subject: &Expr,
        arms: &[MatchArm],
    ) -> CompileResult<Operand> {
        if arms.iter().filter(|a| a.conditions.is_none()).count() > 1 {
            return Err(CompileError::structural(
                "Match expressions may only contain one default arm",
            ));
        }
        let subject = self.compile_expr(subject)?;
        let result = self.alloc_temp();
        let end = self.new_label();
        let arm_labels: Vec<Label> = arms.iter().map(|_| self.new_label()).collect();

        let mut default = None;
        for (arm, label) in arms.iter().zip(&arm_labels) {
            let Some(conditions) = &arm.conditions else {
                default = Some(*label);
                continue;
            };
            for condition in conditions {
                let value = self.compile_expr(condition)?;
                let matched = self.emit_to_temp(Opcode::IsIdentical, subject, value);
                self.emit_jump_if(Opcode::JmpIfTrue, matched, *label);
            }
        }
        match default {
            Some(label) => {
                self.emit_jump(label);
            }
            None => {
                self.emit(Instruction::new(Opcode::MatchError).with_op1(subject));
            }
        }

        for (arm, label) in arms.iter().zip(&arm_labels) {
            self.place_label(*label)?;
            let value = self.compile_expr(&arm.body)?;
            self.emit(Instruction::new(Opcode::QmAssign).with_op1(value).with_result(result));
            self.emit_jump(end);
        }
        self.place_label(end)?;
        Ok(result)
    }
}
