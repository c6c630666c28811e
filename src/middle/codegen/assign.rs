//! 赋值代码生成
//!
//! 覆盖简单赋值、复合赋值、`??=`、引用赋值、list 解构、自增自减与 unset。
//! 右值总是先于左值翻译；嵌套的数组写入逐层以写模式取得中间层级。

use super::bytecode::{Constant, Instruction, Operand, OperandSlot, EXT_BY_NAME};
use super::expr::binary_opcode;
use super::{CodegenContext, CompileError, CompileResult};
use crate::frontend::ast::{ArrayItem, Expr, ListItem};
use crate::vm::opcode::Opcode;
use tracing::warn;

/// 解构目标的一个位置
struct DestructureItem<'a> {
    key: Option<&'a Expr>,
    target: &'a Expr,
    by_ref: bool,
}

/// 把 `list(...)` 与短语法 `[...]` 统一为解构位置
fn destructure_items<'a>(target: &'a Expr) -> CompileResult<Option<Vec<Option<DestructureItem<'a>>>>> {
    match target {
        Expr::List(items) => Ok(Some(
            items
                .iter()
                .map(|item| {
                    item.as_ref().map(|ListItem { key, target, by_ref }| DestructureItem {
                        key: key.as_ref(),
                        target,
                        by_ref: *by_ref,
                    })
                })
                .collect(),
        )),
        Expr::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for ArrayItem {
                key,
                value,
                by_ref,
                spread,
            } in items
            {
                if *spread {
                    return Err(CompileError::structural(
                        "Spread operator is not supported in assignments",
                    ));
                }
                out.push(Some(DestructureItem {
                    key: key.as_ref(),
                    target: value,
                    by_ref: *by_ref,
                }));
            }
            Ok(Some(out))
        }
        _ => Ok(None),
    }
}

impl CodegenContext<'_> {
    /// `target op= value`
    pub(crate) fn compile_assign(
        &mut self,
        op: &str,
        target: &Expr,
        value: &Expr,
    ) -> CompileResult<Operand> {
        match op {
            "=" => {
                if let Some(items) = destructure_items(target)? {
                    let source = self.compile_expr(value)?;
                    self.compile_destructure(&items, source)?;
                    return Ok(source);
                }
                let value = self.compile_expr(value)?;
                self.assign_to(target, value)
            }
            "??=" => self.compile_coalesce_assign(target, value),
            compound => {
                let sub = compound
                    .strip_suffix('=')
                    .and_then(binary_opcode)
                    .filter(|(opcode, swapped)| opcode.is_binary_arith() && !swapped)
                    .map(|(opcode, _)| opcode);
                match sub {
                    Some(sub) => self.compile_compound_assign(sub, target, value),
                    None if self.config.permissive_operators => {
                        warn!("unknown assignment operator `{}` compiled as plain assignment", op);
                        let value = self.compile_expr(value)?;
                        self.emit(Instruction::new(Opcode::Nop));
                        self.assign_to(target, value)
                    }
                    None => Err(CompileError::UnknownOperator { op: op.to_string() }),
                }
            }
        }
    }

    /// 把已求值的值写入目标，返回赋值表达式的结果
    pub(crate) fn assign_to(
        &mut self,
        target: &Expr,
        value: Operand,
    ) -> CompileResult<Operand> {
        if let Some(items) = destructure_items(target)? {
            self.compile_destructure(&items, value)?;
            return Ok(value);
        }
        match target {
            Expr::Variable(name) if name == "this" => {
                Err(CompileError::structural("Cannot re-assign $this"))
            }
            Expr::Variable(name) => {
                let var = self.variable(name);
                self.emit(Instruction::new(Opcode::Assign).with_op1(value).with_result(var));
                Ok(var)
            }
            Expr::VariableVariable(name) => {
                let name = self.compile_expr(name)?;
                let var = self.emit_to_temp(Opcode::FetchVarW, name, Operand::UNUSED);
                self.emit(Instruction::new(Opcode::Assign).with_op1(value).with_result(var));
                Ok(var)
            }
            Expr::ArrayDim { array, index } => {
                let container = self.compile_write_container(array)?;
                let key = match index {
                    Some(index) => self.compile_expr(index)?,
                    None => Operand::UNUSED,
                };
                Ok(self.emit_with_op_data(Opcode::AssignDim, container, key, value, 0))
            }
            Expr::Property {
                object,
                property,
                nullsafe,
            } => {
                Self::reject_nullsafe_write(*nullsafe)?;
                let object = self.compile_write_container(object)?;
                let name = self.compile_member(property)?;
                Ok(self.emit_with_op_data(Opcode::AssignObj, object, name, value, 0))
            }
            Expr::StaticProperty { class, property } => {
                let class = self.compile_class_ref(class)?;
                let name = self.name_constant(property);
                Ok(self.emit_with_op_data(Opcode::AssignStaticProp, name, class, value, 0))
            }
            other => Err(CompileError::structural(format!(
                "Cannot assign to {}",
                other.kind_name()
            ))),
        }
    }

    /// 三输入写入：主指令 + OpData(value)
    fn emit_with_op_data(
        &mut self,
        opcode: Opcode,
        op1: Operand,
        op2: Operand,
        value: Operand,
        extended: u32,
    ) -> Operand {
        let result = self.alloc_temp();
        self.emit(
            Instruction::new(opcode)
                .with_op1(op1)
                .with_op2(op2)
                .with_result(result)
                .with_extended(extended),
        );
        self.emit(Instruction::new(Opcode::OpData).with_op1(value));
        result
    }

    fn reject_nullsafe_write(nullsafe: bool) -> CompileResult<()> {
        if nullsafe {
            return Err(CompileError::structural(
                "Can't use nullsafe operator in write context",
            ));
        }
        Ok(())
    }

    /// 写入路径上的容器（嵌套的中间层级以写模式取得）
    pub(crate) fn compile_write_container(
        &mut self,
        expr: &Expr,
    ) -> CompileResult<Operand> {
        match expr {
            Expr::Variable(name) => Ok(self.compile_variable(name)),
            Expr::VariableVariable(name) => {
                let name = self.compile_expr(name)?;
                Ok(self.emit_to_temp(Opcode::FetchVarW, name, Operand::UNUSED))
            }
            Expr::ArrayDim { array, index } => {
                let container = self.compile_write_container(array)?;
                let key = match index {
                    Some(index) => self.compile_expr(index)?,
                    None => Operand::UNUSED,
                };
                Ok(self.emit_to_temp(Opcode::FetchDimW, container, key))
            }
            Expr::Property {
                object,
                property,
                nullsafe,
            } => {
                Self::reject_nullsafe_write(*nullsafe)?;
                let object = self.compile_write_container(object)?;
                let name = self.compile_member(property)?;
                Ok(self.emit_to_temp(Opcode::FetchObjW, object, name))
            }
            Expr::StaticProperty { class, property } => {
                let class = self.compile_class_ref(class)?;
                let name = self.name_constant(property);
                Ok(self.emit_to_temp(Opcode::FetchStaticPropW, name, class))
            }
            Expr::Call { .. } | Expr::MethodCall { .. } | Expr::StaticCall { .. } => {
                self.compile_expr(expr)
            }
            other => Err(CompileError::structural(format!(
                "Cannot use {} in write context",
                other.kind_name()
            ))),
        }
    }

    /// 引用来源（写模式取得）
    pub(crate) fn compile_ref_source(
        &mut self,
        expr: &Expr,
    ) -> CompileResult<Operand> {
        match expr {
            Expr::Variable(name) if name != "this" => Ok(self.variable(name)),
            Expr::VariableVariable(_)
            | Expr::ArrayDim { .. }
            | Expr::Property { .. }
            | Expr::StaticProperty { .. } => self.compile_write_container(expr),
            Expr::Call { .. } | Expr::MethodCall { .. } | Expr::StaticCall { .. } | Expr::New { .. } => {
                self.compile_expr(expr)
            }
            _ => Err(CompileError::structural(
                "Cannot assign reference to non referenceable value",
            )),
        }
    }

    /// `$a = &$b`
    pub(crate) fn compile_assign_ref(
        &mut self,
        target: &Expr,
        source: &Expr,
    ) -> CompileResult<Operand> {
        if matches!(target, Expr::List(_) | Expr::Array(_)) {
            return Err(CompileError::structural(
                "Cannot assign reference to list; use by-reference elements instead",
            ));
        }
        let source = self.compile_ref_source(source)?;
        self.assign_ref_to(target, source)
    }

    /// 把引用绑定到目标
    pub(crate) fn assign_ref_to(
        &mut self,
        target: &Expr,
        source: Operand,
    ) -> CompileResult<Operand> {
        let target = match target {
            Expr::Variable(name) if name == "this" => {
                return Err(CompileError::structural("Cannot re-assign $this"));
            }
            Expr::Variable(name) => self.variable(name),
            Expr::VariableVariable(_)
            | Expr::ArrayDim { .. }
            | Expr::Property { .. }
            | Expr::StaticProperty { .. } => self.compile_write_container(target)?,
            other => {
                return Err(CompileError::structural(format!(
                    "Cannot assign reference to {}",
                    other.kind_name()
                )))
            }
        };
        self.emit(
            Instruction::new(Opcode::AssignRef)
                .with_op1(source)
                .with_result(target),
        );
        Ok(target)
    }

    /// list 解构：逐个位置以 FetchListR / FetchListW 取出并写入
    fn compile_destructure(
        &mut self,
        items: &[Option<DestructureItem<'_>>],
        source: Operand,
    ) -> CompileResult<()> {
        if items.iter().all(Option::is_none) {
            return Err(CompileError::structural("Cannot use empty list"));
        }
        let keyed = items.iter().flatten().filter(|i| i.key.is_some()).count();
        if keyed != 0 && keyed != items.iter().flatten().count() {
            return Err(CompileError::structural(
                "Cannot mix keyed and unkeyed array entries in assignments",
            ));
        }

        for (position, item) in items.iter().enumerate() {
            let Some(item) = item else {
                continue;
            };
            let key = match item.key {
                Some(key) => self.compile_expr(key)?,
                None => self.constant(Constant::Int(position as i64)),
            };
            let fetch = if item.by_ref {
                Opcode::FetchListW
            } else {
                Opcode::FetchListR
            };
            let element = self.emit_to_temp(fetch, source, key);
            if let Some(nested) = destructure_items(item.target)? {
                self.compile_destructure(&nested, element)?;
            } else if item.by_ref {
                self.assign_ref_to(item.target, element)?;
            } else {
                self.assign_to(item.target, element)?;
            }
        }
        Ok(())
    }

    /// 复合赋值：一条原地指令，子操作码放在 extended
    fn compile_compound_assign(
        &mut self,
        sub: Opcode,
        target: &Expr,
        value: &Expr,
    ) -> CompileResult<Operand> {
        let value = self.compile_expr(value)?;
        let sub = sub as u32;
        match target {
            Expr::Variable(name) if name == "this" => {
                Err(CompileError::structural("Cannot re-assign $this"))
            }
            Expr::Variable(_) | Expr::VariableVariable(_) => {
                let var = self.compile_write_container(target)?;
                self.emit(
                    Instruction::new(Opcode::AssignOp)
                        .with_op1(value)
                        .with_result(var)
                        .with_extended(sub),
                );
                Ok(var)
            }
            Expr::ArrayDim { array, index } => {
                let index = index.as_deref().ok_or_else(|| {
                    CompileError::structural("Cannot use [] for reading")
                })?;
                let container = self.compile_write_container(array)?;
                let key = self.compile_expr(index)?;
                Ok(self.emit_with_op_data(Opcode::AssignDimOp, container, key, value, sub))
            }
            Expr::Property {
                object,
                property,
                nullsafe,
            } => {
                Self::reject_nullsafe_write(*nullsafe)?;
                let object = self.compile_write_container(object)?;
                let name = self.compile_member(property)?;
                Ok(self.emit_with_op_data(Opcode::AssignObjOp, object, name, value, sub))
            }
            Expr::StaticProperty { class, property } => {
                let class = self.compile_class_ref(class)?;
                let name = self.name_constant(property);
                Ok(self.emit_with_op_data(Opcode::AssignStaticPropOp, name, class, value, sub))
            }
            other => Err(CompileError::structural(format!(
                "Cannot use compound assignment on {}",
                other.kind_name()
            ))),
        }
    }

    /// `$a ??= v`：已设置时跳过右值与赋值
    fn compile_coalesce_assign(
        &mut self,
        target: &Expr,
        value: &Expr,
    ) -> CompileResult<Operand> {
        if destructure_items(target)?.is_some() {
            return Err(CompileError::structural(
                "Cannot use list() with the null coalescing assignment operator",
            ));
        }
        let result = self.alloc_temp();
        let end = self.new_label();
        let current = self.compile_fetch_is(target)?;
        self.emit_with_targets(
            Instruction::new(Opcode::Coalesce)
                .with_op1(current)
                .with_result(result),
            &[(OperandSlot::Op2, end)],
        );
        let value = self.compile_expr(value)?;
        let assigned = self.assign_to(target, value)?;
        self.emit(
            Instruction::new(Opcode::QmAssign)
                .with_op1(assigned)
                .with_result(result),
        );
        self.place_label(end)?;
        Ok(result)
    }

    /// 自增自减
    ///
    /// 按操作数形状分路径（变量、静态属性、对象属性、数组元素）：
    /// 读出当前值，加减常量 1 后写回，前缀返回新值，后缀返回旧值。
    pub(crate) fn compile_incdec(
        &mut self,
        increment: bool,
        prefix: bool,
        target: &Expr,
    ) -> CompileResult<Operand> {
        let step = if increment { Opcode::Add } else { Opcode::Sub };
        let one = self.constant(Constant::Int(1));

        let (old, new) = match target {
            Expr::Variable(name) if name == "this" => {
                return Err(CompileError::structural("Cannot increment/decrement $this"));
            }
            Expr::Variable(_) | Expr::VariableVariable(_) => {
                let var = self.compile_write_container(target)?;
                let old = self.emit_to_temp(Opcode::QmAssign, var, Operand::UNUSED);
                let new = self.emit_to_temp(step, old, one);
                self.emit(Instruction::new(Opcode::Assign).with_op1(new).with_result(var));
                (old, new)
            }
            Expr::StaticProperty { class, property } => {
                let class = self.compile_class_ref(class)?;
                self.incdec_static_property(class, property, step, one)
            }
            Expr::Property {
                object,
                property,
                nullsafe,
            } => {
                Self::reject_nullsafe_write(*nullsafe)?;
                let object = self.compile_write_container(object)?;
                let name = self.compile_member(property)?;
                let old = self.emit_to_temp(Opcode::FetchObjR, object, name);
                let new = self.emit_to_temp(step, old, one);
                self.emit_with_op_data(Opcode::AssignObj, object, name, new, 0);
                (old, new)
            }
            Expr::ArrayDim { array, index } => {
                let index = index.as_deref().ok_or_else(|| {
                    CompileError::structural("Cannot use [] for reading")
                })?;
                let container = self.compile_write_container(array)?;
                let key = self.compile_expr(index)?;
                let old = self.emit_to_temp(Opcode::FetchDimR, container, key);
                let new = self.emit_to_temp(step, old, one);
                self.emit_with_op_data(Opcode::AssignDim, container, key, new, 0);
                (old, new)
            }
            other => {
                return Err(CompileError::structural(format!(
                    "Cannot increment/decrement {}",
                    other.kind_name()
                )))
            }
        };
        Ok(if prefix { new } else { old })
    }

    fn incdec_static_property(
        &mut self,
        class: Operand,
        property: &str,
        step: Opcode,
        one: Operand,
    ) -> (Operand, Operand) {
        let name = self.name_constant(property);
        let old = self.emit_to_temp(Opcode::FetchStaticPropR, name, class);
        let new = self.emit_to_temp(step, old, one);
        self.emit_with_op_data(Opcode::AssignStaticProp, name, class, new, 0);
        (old, new)
    }

    /// `unset(...)` 的一个目标
    pub(crate) fn compile_unset(
        &mut self,
        target: &Expr,
    ) -> CompileResult<()> {
        let instr = match target {
            Expr::Variable(name) if name == "this" => {
                return Err(CompileError::structural("Cannot unset $this"));
            }
            Expr::Variable(name) => Instruction::new(Opcode::UnsetVar).with_op1(self.variable(name)),
            Expr::VariableVariable(name) => Instruction::new(Opcode::UnsetVar)
                .with_op1(self.compile_expr(name)?)
                .with_extended(EXT_BY_NAME),
            Expr::ArrayDim { array, index } => {
                let index = index.as_deref().ok_or_else(|| {
                    CompileError::structural("Cannot use [] for unsetting")
                })?;
                let container = self.compile_write_container(array)?;
                let key = self.compile_expr(index)?;
                Instruction::new(Opcode::UnsetDim)
                    .with_op1(container)
                    .with_op2(key)
            }
            Expr::Property {
                object,
                property,
                nullsafe,
            } => {
                Self::reject_nullsafe_write(*nullsafe)?;
                let object = self.compile_write_container(object)?;
                let name = self.compile_member(property)?;
                Instruction::new(Opcode::UnsetObj)
                    .with_op1(object)
                    .with_op2(name)
            }
            Expr::StaticProperty { .. } => {
                return Err(CompileError::structural("Attempt to unset static property"));
            }
            other => {
                return Err(CompileError::structural(format!(
                    "Cannot unset {}",
                    other.kind_name()
                )))
            }
        };
        self.emit(instr);
        Ok(())
    }
}
