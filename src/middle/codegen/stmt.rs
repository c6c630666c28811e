//! 语句代码生成
//!
//! 语句分发入口。控制流、循环、switch、函数与类声明分别在各自的模块中实现。

use super::bytecode::{Constant, Instruction, Operand};
use super::{CodegenContext, CompileError, CompileResult, ConstSite};
use crate::frontend::ast::{ConstDecl, Stmt, StaticVar};
use crate::vm::opcode::Opcode;

impl CodegenContext<'_> {
    /// 生成单条语句
    pub fn compile_stmt(
        &mut self,
        stmt: &Stmt,
    ) -> CompileResult<()> {
        match stmt {
            Stmt::Expr(expr) => {
                let value = self.compile_expr(expr)?;
                self.free_if_temp(value);
            }
            Stmt::Echo(values) => {
                for value in values {
                    let value = self.compile_expr(value)?;
                    self.emit(Instruction::new(Opcode::Echo).with_op1(value));
                }
            }
            Stmt::InlineHtml(text) => {
                let text = self.constant(Constant::String(text.clone()));
                self.emit(Instruction::new(Opcode::Echo).with_op1(text));
            }
            Stmt::Return(value) => self.compile_return(value.as_ref())?,
            Stmt::If {
                condition,
                then_branch,
                elseif_branches,
                else_branch,
                alternative,
            } => self.compile_if(
                condition,
                then_branch,
                elseif_branches,
                else_branch.as_deref(),
                *alternative,
            )?,
            Stmt::While {
                condition,
                body,
                alternative,
            } => self.compile_while(condition, body, *alternative)?,
            Stmt::DoWhile { body, condition } => self.compile_do_while(body, condition)?,
            Stmt::For {
                init,
                condition,
                update,
                body,
                alternative,
            } => self.compile_for(init, condition, update, body, *alternative)?,
            Stmt::Foreach {
                subject,
                key,
                value,
                by_ref,
                body,
                alternative,
            } => self.compile_foreach(subject, key.as_ref(), value, *by_ref, body, *alternative)?,
            Stmt::Switch {
                subject,
                cases,
                alternative,
            } => self.compile_switch(subject, cases, *alternative)?,
            Stmt::Break(depth) => self.compile_break(depth.unwrap_or(1), false)?,
            Stmt::Continue(depth) => self.compile_break(depth.unwrap_or(1), true)?,
            Stmt::Block(stmts) => self.compile_block(stmts)?,
            Stmt::Try {
                body,
                catches,
                finally,
            } => self.compile_try(body, catches, finally.as_deref())?,
            Stmt::Throw(exception) => {
                let exception = self.compile_expr(exception)?;
                self.emit(Instruction::new(Opcode::Throw).with_op1(exception));
            }
            Stmt::Global(names) => {
                for name in names {
                    let var = self.variable(name);
                    let name = self.name_constant(name);
                    self.emit(Instruction::new(Opcode::BindGlobal).with_op1(var).with_op2(name));
                }
            }
            Stmt::Static(vars) => self.compile_static_vars(vars)?,
            Stmt::Unset(targets) => {
                for target in targets {
                    self.compile_unset(target)?;
                }
            }
            Stmt::Const(decls) => self.compile_global_consts(decls)?,
            Stmt::Function(def) => self.compile_function_decl(def)?,
            Stmt::Class(def) => self.compile_class_decl(def)?,
            Stmt::Goto(name) => self.compile_goto(name)?,
            Stmt::Label(name) => self.compile_goto_label(name)?,
            Stmt::Nop => {}
        }
        Ok(())
    }

    /// 顺序生成语句块
    pub(crate) fn compile_block(
        &mut self,
        stmts: &[Stmt],
    ) -> CompileResult<()> {
        for stmt in stmts {
            self.compile_stmt(stmt)?;
        }
        Ok(())
    }

    /// 替代语法（`: ... endif;`）的块另开一层非函数边界作用域
    pub(crate) fn compile_alt_block(
        &mut self,
        stmts: &[Stmt],
        alternative: bool,
    ) -> CompileResult<()> {
        if !alternative {
            return self.compile_block(stmts);
        }
        self.unit.scopes.push(false);
        let compiled = self.compile_block(stmts);
        self.unit.scopes.pop();
        compiled
    }

    /// `static $a = 1;`：默认值必须是编译期常量
    fn compile_static_vars(
        &mut self,
        vars: &[StaticVar],
    ) -> CompileResult<()> {
        for StaticVar { name, default } in vars {
            let value = match default {
                Some(expr) => self.evaluate_const(expr, None, ConstSite::Initializer)?,
                None => Constant::Null,
            };
            self.unit.static_vars.insert(name.clone(), value.clone());
            let var = self.variable(name);
            let value = self.constant(value);
            self.emit(Instruction::new(Opcode::BindStatic).with_op1(var).with_op2(value));
        }
        Ok(())
    }

    /// 顶层 `const A = expr;`
    fn compile_global_consts(
        &mut self,
        decls: &[ConstDecl],
    ) -> CompileResult<()> {
        for decl in decls {
            let value =
                self.evaluate_const(&decl.value, decl.type_hint.as_deref(), ConstSite::Initializer)?;
            if self.globals.contains_key(&decl.name) {
                return Err(CompileError::redeclaration("constant", decl.name.clone()));
            }
            self.globals.insert(decl.name.clone(), value.clone());
            let name = self.name_constant(&decl.name);
            let value: Operand = self.constant(value);
            self.emit(
                Instruction::new(Opcode::DeclareConst)
                    .with_op1(name)
                    .with_op2(value),
            );
        }
        Ok(())
    }
}
