//! 表达式代码生成

use super::bytecode::{
    cast_ext, ClassFetchKind, Constant, Instruction, IssetMode, Operand, OperandSlot, EXT_BY_NAME,
    EXT_BY_REF,
};
use super::{CodegenContext, CompileError, CompileResult, UnitKind};
use crate::frontend::ast::{Arg, ArrayItem, Callee, CastKind, ClassRef, Expr, MagicConst, Member};
use crate::vm::opcode::Opcode;
use tracing::warn;

/// 编译期能否确定类名
enum ResolvedClass {
    Name(String),
    Runtime(ClassFetchKind),
}

/// 二元运算符记号 → (操作码, 是否交换操作数)
pub(crate) fn binary_opcode(op: &str) -> Option<(Opcode, bool)> {
    let mapped = match op {
        "+" => (Opcode::Add, false),
        "-" => (Opcode::Sub, false),
        "*" => (Opcode::Mul, false),
        "/" => (Opcode::Div, false),
        "%" => (Opcode::Mod, false),
        "**" => (Opcode::Pow, false),
        "." => (Opcode::Concat, false),
        "<<" => (Opcode::ShiftLeft, false),
        ">>" => (Opcode::ShiftRight, false),
        "&" => (Opcode::BitwiseAnd, false),
        "|" => (Opcode::BitwiseOr, false),
        "^" => (Opcode::BitwiseXor, false),
        "==" => (Opcode::IsEqual, false),
        "!=" | "<>" => (Opcode::IsNotEqual, false),
        "===" => (Opcode::IsIdentical, false),
        "!==" => (Opcode::IsNotIdentical, false),
        "<" => (Opcode::IsSmaller, false),
        "<=" => (Opcode::IsSmallerOrEqual, false),
        ">" => (Opcode::IsSmaller, true),
        ">=" => (Opcode::IsSmallerOrEqual, true),
        "<=>" => (Opcode::Spaceship, false),
        _ if op.eq_ignore_ascii_case("xor") => (Opcode::BooleanXor, false),
        _ => return None,
    };
    Some(mapped)
}

/// 一元运算符记号 → 操作码
pub(crate) fn unary_opcode(op: &str) -> Option<Opcode> {
    match op {
        "!" => Some(Opcode::BooleanNot),
        "~" => Some(Opcode::BitwiseNot),
        "-" => Some(Opcode::Negate),
        "+" => Some(Opcode::UnaryPlus),
        _ => None,
    }
}

impl CodegenContext<'_> {
    /// 生成表达式，返回存放结果的操作数
    ///
    /// 结果不一定是临时值：变量直接返回其槽位，`exit`、作为表达式的 `throw`
    /// 等不产生值的表达式返回常量操作数。只有临时值需要 `free_if_temp` 释放。
    pub fn compile_expr(
        &mut self,
        expr: &Expr,
    ) -> CompileResult<Operand> {
        match expr {
            Expr::Null => Ok(self.load_literal(Constant::Null)),
            Expr::Bool(b) => Ok(self.load_literal(Constant::Bool(*b))),
            Expr::Int(n) => Ok(self.load_literal(Constant::Int(*n))),
            Expr::Float(x) => Ok(self.load_literal(Constant::Float(*x))),
            Expr::String(s) => Ok(self.load_literal(Constant::String(s.clone()))),
            Expr::Interpolated(parts) => self.compile_interpolated(parts),
            Expr::Array(items) => self.compile_array(items),
            Expr::Variable(name) => Ok(self.compile_variable(name)),
            Expr::VariableVariable(name) => {
                let name = self.compile_expr(name)?;
                Ok(self.emit_to_temp(Opcode::FetchVarR, name, Operand::UNUSED))
            }
            Expr::Constant(name) => Ok(self.compile_constant(name)),
            Expr::MagicConst(magic) => Ok(self.compile_magic_constant(*magic)),
            Expr::Binary { op, left, right } => self.compile_binary(op, left, right),
            Expr::Unary { op, operand } => self.compile_unary(op, operand),
            Expr::Assign { op, target, value } => self.compile_assign(op, target, value),
            Expr::AssignRef { target, source } => self.compile_assign_ref(target, source),
            Expr::IncDec {
                increment,
                prefix,
                target,
            } => self.compile_incdec(*increment, *prefix, target),
            Expr::Ternary {
                condition,
                then,
                otherwise,
            } => self.compile_ternary(condition, then.as_deref(), otherwise),
            Expr::ArrayDim { array, index } => {
                let index = index.as_deref().ok_or_else(|| {
                    CompileError::structural("Cannot use [] for reading")
                })?;
                let container = self.compile_expr(array)?;
                let key = self.compile_expr(index)?;
                Ok(self.emit_to_temp(Opcode::FetchDimR, container, key))
            }
            Expr::Property {
                object,
                property,
                nullsafe,
            } => self.compile_property_read(object, property, *nullsafe),
            Expr::StaticProperty { class, property } => {
                let class = self.compile_class_ref(class)?;
                let name = self.name_constant(property);
                Ok(self.emit_to_temp(Opcode::FetchStaticPropR, name, class))
            }
            Expr::ClassConst { class, name } => self.compile_class_constant(class, name),
            Expr::Call { callee, args } => self.compile_call(callee, args),
            Expr::MethodCall {
                object,
                method,
                args,
                nullsafe,
            } => self.compile_method_call(object, method, args, *nullsafe),
            Expr::StaticCall {
                class,
                method,
                args,
            } => self.compile_static_call(class, method, args),
            Expr::New { class, args } => self.compile_new(class, args),
            Expr::List(_) => Err(CompileError::structural(
                "list() can only be used as an assignment target",
            )),
            Expr::Isset(vars) => self.compile_isset_list(vars),
            Expr::Empty(target) => self.compile_isset_one(target, IssetMode::Empty),
            Expr::Cast { kind, expr } => {
                let value = self.compile_expr(expr)?;
                let result = self.alloc_temp();
                self.emit(
                    Instruction::new(Opcode::Cast)
                        .with_op1(value)
                        .with_result(result)
                        .with_extended(cast_ext(*kind)),
                );
                Ok(result)
            }
            Expr::InstanceOf { expr, class } => {
                let value = self.compile_expr(expr)?;
                let class = self.compile_class_ref(class)?;
                Ok(self.emit_to_temp(Opcode::InstanceOf, value, class))
            }
            Expr::Clone(object) => {
                let object = self.compile_expr(object)?;
                Ok(self.emit_to_temp(Opcode::Clone, object, Operand::UNUSED))
            }
            Expr::Print(value) => {
                let value = self.compile_expr(value)?;
                self.emit(Instruction::new(Opcode::Echo).with_op1(value));
                Ok(self.load_literal(Constant::Int(1)))
            }
            Expr::Exit(status) => {
                let status = match status {
                    Some(status) => self.compile_expr(status)?,
                    None => Operand::UNUSED,
                };
                self.emit(Instruction::new(Opcode::Exit).with_op1(status));
                Ok(self.constant(Constant::Null))
            }
            Expr::Include { kind, expr } => {
                let path = self.compile_expr(expr)?;
                let result = self.alloc_temp();
                self.emit(
                    Instruction::new(Opcode::IncludeOrEval)
                        .with_op1(path)
                        .with_result(result)
                        .with_extended(*kind as u32),
                );
                Ok(result)
            }
            Expr::Silence(inner) => {
                let level = self.alloc_temp();
                self.emit(Instruction::new(Opcode::BeginSilence).with_result(level));
                let value = self.compile_expr(inner)?;
                self.emit(Instruction::new(Opcode::EndSilence).with_op1(level));
                Ok(value)
            }
            Expr::Yield { key, value } => {
                self.mark_generator("yield")?;
                let value = match value {
                    Some(v) => self.compile_expr(v)?,
                    None => Operand::UNUSED,
                };
                let key = match key {
                    Some(k) => self.compile_expr(k)?,
                    None => Operand::UNUSED,
                };
                Ok(self.emit_to_temp(Opcode::Yield, value, key))
            }
            Expr::YieldFrom(source) => {
                self.mark_generator("yield from")?;
                let source = self.compile_expr(source)?;
                Ok(self.emit_to_temp(Opcode::YieldFrom, source, Operand::UNUSED))
            }
            Expr::Throw(exception) => {
                let exception = self.compile_expr(exception)?;
                self.emit(Instruction::new(Opcode::Throw).with_op1(exception));
                Ok(self.constant(Constant::Null))
            }
            Expr::Closure(def) => self.compile_closure(def),
            Expr::ArrowFunction(def) => self.compile_arrow_function(def),
            Expr::Match { subject, arms } => self.compile_match(subject, arms),
        }
    }

    /// 变量读取：`$this` 走 FetchThis，其余直接返回槽位
    pub(crate) fn compile_variable(
        &mut self,
        name: &str,
    ) -> Operand {
        if name == "this" {
            return self.emit_to_temp(Opcode::FetchThis, Operand::UNUSED, Operand::UNUSED);
        }
        self.variable(name)
    }

    fn mark_generator(
        &mut self,
        construct: &str,
    ) -> CompileResult<()> {
        if self.unit_kind() == UnitKind::Script {
            return Err(CompileError::structural(format!(
                "The \"{}\" expression can only be used inside a function",
                construct
            )));
        }
        self.unit.is_generator = true;
        Ok(())
    }

    fn compile_interpolated(
        &mut self,
        parts: &[Expr],
    ) -> CompileResult<Operand> {
        let Some((first, rest)) = parts.split_first() else {
            return Ok(self.load_literal(Constant::string("")));
        };
        let mut acc = self.compile_expr(first)?;
        if rest.is_empty() {
            let result = self.alloc_temp();
            self.emit(
                Instruction::new(Opcode::Cast)
                    .with_op1(acc)
                    .with_result(result)
                    .with_extended(cast_ext(CastKind::String)),
            );
            return Ok(result);
        }
        for part in rest {
            let value = self.compile_expr(part)?;
            acc = self.emit_to_temp(Opcode::Concat, acc, value);
        }
        Ok(acc)
    }

    fn compile_array(
        &mut self,
        items: &[ArrayItem],
    ) -> CompileResult<Operand> {
        let array = self.alloc_temp();
        self.emit(Instruction::new(Opcode::InitArray).with_result(array));
        for item in items {
            if item.spread {
                let source = self.compile_expr(&item.value)?;
                self.emit(
                    Instruction::new(Opcode::AddArrayUnpack)
                        .with_op1(source)
                        .with_result(array),
                );
                continue;
            }
            let key = match &item.key {
                Some(key) => self.compile_expr(key)?,
                None => Operand::UNUSED,
            };
            let value = if item.by_ref {
                self.compile_ref_source(&item.value)?
            } else {
                self.compile_expr(&item.value)?
            };
            self.emit(
                Instruction::new(Opcode::AddArrayElement)
                    .with_op1(value)
                    .with_op2(key)
                    .with_result(array)
                    .with_extended(if item.by_ref { EXT_BY_REF } else { 0 }),
            );
        }
        Ok(array)
    }

    fn compile_constant(
        &mut self,
        name: &str,
    ) -> Operand {
        let bare = name.trim_start_matches('\\');
        let literal = match bare.to_ascii_lowercase().as_str() {
            "true" => Some(Constant::Bool(true)),
            "false" => Some(Constant::Bool(false)),
            "null" => Some(Constant::Null),
            _ => None,
        };
        match literal {
            Some(value) => self.load_literal(value),
            None => {
                let name = self.name_constant(bare);
                self.emit_to_temp(Opcode::FetchConstant, name, Operand::UNUSED)
            }
        }
    }

    fn compile_magic_constant(
        &mut self,
        magic: MagicConst,
    ) -> Operand {
        let class = self
            .class_scope()
            .map(|c| (c.name.clone(), c.is_trait()));
        let function = self.unit.function.clone();
        let value = match (magic, class) {
            (MagicConst::Class, Some((_, true))) => {
                return self.fetch_class_name(ClassFetchKind::SelfRef);
            }
            (MagicConst::Class, Some((name, false))) => name,
            (MagicConst::Trait, Some((name, true))) => name,
            (MagicConst::Class | MagicConst::Trait, _) => String::new(),
            (MagicConst::Function, _) => function,
            (MagicConst::Method, Some((name, _))) if function.is_empty() => name,
            (MagicConst::Method, Some((name, _))) => format!("{}::{}", name, function),
            (MagicConst::Method, None) => function,
        };
        self.load_literal(Constant::String(value))
    }

    fn fetch_class_name(
        &mut self,
        kind: ClassFetchKind,
    ) -> Operand {
        let result = self.alloc_temp();
        self.emit(
            Instruction::new(Opcode::FetchClassName)
                .with_result(result)
                .with_extended(kind as u32),
        );
        result
    }

    /// 未知运算符：默认报错，宽松模式下降级为 Nop
    fn unknown_operator(
        &mut self,
        op: &str,
    ) -> CompileResult<Operand> {
        if !self.config.permissive_operators {
            return Err(CompileError::UnknownOperator { op: op.to_string() });
        }
        warn!("unknown operator `{}` compiled as Nop", op);
        let result = self.alloc_temp();
        self.emit(Instruction::new(Opcode::Nop).with_result(result));
        Ok(result)
    }

    fn compile_binary(
        &mut self,
        op: &str,
        left: &Expr,
        right: &Expr,
    ) -> CompileResult<Operand> {
        match op.to_ascii_lowercase().as_str() {
            "&&" | "and" => return self.compile_short_circuit(Opcode::JmpIfFalse, left, right),
            "||" | "or" => return self.compile_short_circuit(Opcode::JmpIfTrue, left, right),
            "??" => return self.compile_coalesce(left, right),
            _ => {}
        }
        let lhs = self.compile_expr(left)?;
        let rhs = self.compile_expr(right)?;
        match binary_opcode(op) {
            Some((opcode, false)) => Ok(self.emit_to_temp(opcode, lhs, rhs)),
            Some((opcode, true)) => Ok(self.emit_to_temp(opcode, rhs, lhs)),
            None => self.unknown_operator(op),
        }
    }

    /// `&&` / `||`：两侧都写入同一个布尔结果
    fn compile_short_circuit(
        &mut self,
        jump: Opcode,
        left: &Expr,
        right: &Expr,
    ) -> CompileResult<Operand> {
        let result = self.alloc_temp();
        let end = self.new_label();
        let lhs = self.compile_expr(left)?;
        self.emit(Instruction::new(Opcode::Bool).with_op1(lhs).with_result(result));
        self.emit_jump_if(jump, result, end);
        let rhs = self.compile_expr(right)?;
        self.emit(Instruction::new(Opcode::Bool).with_op1(rhs).with_result(result));
        self.place_label(end)?;
        Ok(result)
    }

    /// `a ?? b`
    fn compile_coalesce(
        &mut self,
        left: &Expr,
        right: &Expr,
    ) -> CompileResult<Operand> {
        let result = self.alloc_temp();
        let end = self.new_label();
        let lhs = self.compile_fetch_is(left)?;
        self.emit_with_targets(
            Instruction::new(Opcode::Coalesce)
                .with_op1(lhs)
                .with_result(result),
            &[(OperandSlot::Op2, end)],
        );
        let rhs = self.compile_expr(right)?;
        self.emit(Instruction::new(Opcode::QmAssign).with_op1(rhs).with_result(result));
        self.place_label(end)?;
        Ok(result)
    }

    /// 以 isset 模式读取（不产生未定义警告），用于 `??`、`??=`、isset
    pub(crate) fn compile_fetch_is(
        &mut self,
        expr: &Expr,
    ) -> CompileResult<Operand> {
        match expr {
            Expr::Variable(name) => Ok(self.compile_variable(name)),
            Expr::ArrayDim { array, index } => {
                let index = index.as_deref().ok_or_else(|| {
                    CompileError::structural("Cannot use [] for reading")
                })?;
                let container = self.compile_fetch_is(array)?;
                let key = self.compile_expr(index)?;
                Ok(self.emit_to_temp(Opcode::FetchDimIs, container, key))
            }
            Expr::Property {
                object,
                property,
                nullsafe: false,
            } => {
                let object = self.compile_fetch_is(object)?;
                let name = self.compile_member(property)?;
                Ok(self.emit_to_temp(Opcode::FetchObjIs, object, name))
            }
            Expr::StaticProperty { class, property } => {
                let class = self.compile_class_ref(class)?;
                let name = self.name_constant(property);
                Ok(self.emit_to_temp(Opcode::FetchStaticPropIs, name, class))
            }
            other => self.compile_expr(other),
        }
    }

    fn compile_unary(
        &mut self,
        op: &str,
        operand: &Expr,
    ) -> CompileResult<Operand> {
        let value = self.compile_expr(operand)?;
        match unary_opcode(op) {
            Some(opcode) => Ok(self.emit_to_temp(opcode, value, Operand::UNUSED)),
            None => self.unknown_operator(op),
        }
    }

    /// 三元与短三元：两个分支写入同一个结果临时值
    fn compile_ternary(
        &mut self,
        condition: &Expr,
        then: Option<&Expr>,
        otherwise: &Expr,
    ) -> CompileResult<Operand> {
        let result = self.alloc_temp();
        let end = self.new_label();
        let cond = self.compile_expr(condition)?;
        match then {
            Some(then) => {
                let else_label = self.new_label();
                self.emit_jump_if(Opcode::JmpIfFalse, cond, else_label);
                let value = self.compile_expr(then)?;
                self.emit(Instruction::new(Opcode::QmAssign).with_op1(value).with_result(result));
                self.emit_jump(end);
                self.place_label(else_label)?;
            }
            None => {
                self.emit(Instruction::new(Opcode::QmAssign).with_op1(cond).with_result(result));
                self.emit_jump_if(Opcode::JmpIfTrue, cond, end);
            }
        }
        let value = self.compile_expr(otherwise)?;
        self.emit(Instruction::new(Opcode::QmAssign).with_op1(value).with_result(result));
        self.place_label(end)?;
        Ok(result)
    }

    /// 属性名或方法名
    pub(crate) fn compile_member(
        &mut self,
        member: &Member,
    ) -> CompileResult<Operand> {
        match member {
            Member::Name(name) => Ok(self.name_constant(name)),
            Member::Dynamic(expr) => self.compile_expr(expr),
        }
    }

    fn compile_property_read(
        &mut self,
        object: &Expr,
        property: &Member,
        nullsafe: bool,
    ) -> CompileResult<Operand> {
        let object = self.compile_expr(object)?;
        if !nullsafe {
            let name = self.compile_member(property)?;
            return Ok(self.emit_to_temp(Opcode::FetchObjR, object, name));
        }
        let result = self.alloc_temp();
        let end = self.new_label();
        self.emit_with_targets(
            Instruction::new(Opcode::JmpNull)
                .with_op1(object)
                .with_result(result),
            &[(OperandSlot::Op2, end)],
        );
        let name = self.compile_member(property)?;
        let value = self.emit_to_temp(Opcode::FetchObjR, object, name);
        self.emit(Instruction::new(Opcode::QmAssign).with_op1(value).with_result(result));
        self.place_label(end)?;
        Ok(result)
    }

    fn compile_class_constant(
        &mut self,
        class: &ClassRef,
        name: &str,
    ) -> CompileResult<Operand> {
        if name.eq_ignore_ascii_case("class") {
            return self.compile_class_name(class);
        }
        let class = self.compile_class_ref(class)?;
        let name = self.name_constant(name);
        Ok(self.emit_to_temp(Opcode::FetchClassConstant, class, name))
    }

    /// `X::class`
    fn compile_class_name(
        &mut self,
        class: &ClassRef,
    ) -> CompileResult<Operand> {
        match class {
            ClassRef::Named(name) => {
                Ok(self.load_literal(Constant::string(name.trim_start_matches('\\'))))
            }
            ClassRef::Dynamic(expr) => {
                let value = self.compile_expr(expr)?;
                let result = self.alloc_temp();
                self.emit(
                    Instruction::new(Opcode::FetchClassName)
                        .with_op1(value)
                        .with_result(result),
                );
                Ok(result)
            }
            ClassRef::Anonymous(_) => Err(CompileError::structural(
                "Cannot use ::class on an anonymous class declaration",
            )),
            keyword => match self.resolve_class_keyword(keyword)? {
                ResolvedClass::Name(name) => Ok(self.load_literal(Constant::String(name))),
                ResolvedClass::Runtime(kind) => Ok(self.fetch_class_name(kind)),
            },
        }
    }

    /// self / parent / static 的解析结果
    fn resolve_class_keyword(
        &self,
        class: &ClassRef,
    ) -> CompileResult<ResolvedClass> {
        let (word, kind) = match class {
            ClassRef::Parent => ("parent", ClassFetchKind::Parent),
            ClassRef::Static => ("static", ClassFetchKind::Static),
            _ => ("self", ClassFetchKind::SelfRef),
        };
        let scope = self.class_scope().ok_or_else(|| {
            CompileError::structural(format!(
                "Cannot use \"{}\" when no class scope is active",
                word
            ))
        })?;
        if scope.is_trait() {
            return Ok(ResolvedClass::Runtime(kind));
        }
        match kind {
            ClassFetchKind::SelfRef => Ok(ResolvedClass::Name(scope.name.clone())),
            ClassFetchKind::Parent => scope
                .parent
                .clone()
                .map(ResolvedClass::Name)
                .ok_or_else(|| {
                    CompileError::structural(
                        "Cannot use \"parent\" when current class scope has no parent",
                    )
                }),
            ClassFetchKind::Static => Ok(ResolvedClass::Runtime(kind)),
        }
    }

    /// 类引用 → 操作数
    ///
    /// 具名类与类体内的 self/parent 在编译期解析为名称常量；
    /// `static`、trait 内的引用与动态类名在运行期经 FetchClass 解析。
    pub(crate) fn compile_class_ref(
        &mut self,
        class: &ClassRef,
    ) -> CompileResult<Operand> {
        match class {
            ClassRef::Named(name) => Ok(self.name_constant(name.trim_start_matches('\\'))),
            ClassRef::Dynamic(expr) => {
                let value = self.compile_expr(expr)?;
                let result = self.alloc_temp();
                self.emit(
                    Instruction::new(Opcode::FetchClass)
                        .with_op1(value)
                        .with_result(result),
                );
                Ok(result)
            }
            ClassRef::Anonymous(def) => self.compile_anonymous_class(def),
            keyword => match self.resolve_class_keyword(keyword)? {
                ResolvedClass::Name(name) => Ok(self.name_constant(&name)),
                ResolvedClass::Runtime(kind) => {
                    let result = self.alloc_temp();
                    self.emit(
                        Instruction::new(Opcode::FetchClass)
                            .with_result(result)
                            .with_extended(kind as u32),
                    );
                    Ok(result)
                }
            },
        }
    }

    // ===== 调用 =====

    /// 发送实参；变量按 SendVar 传递，由被调函数决定是否按引用
    fn compile_args(
        &mut self,
        args: &[Arg],
    ) -> CompileResult<()> {
        for (position, arg) in args.iter().enumerate() {
            let position = position as u32;
            if arg.spread {
                let source = self.compile_expr(&arg.value)?;
                self.emit(
                    Instruction::new(Opcode::SendUnpack)
                        .with_op1(source)
                        .with_extended(position),
                );
                continue;
            }
            let (opcode, value) = match &arg.value {
                Expr::Variable(name) if name != "this" => (Opcode::SendVar, self.variable(name)),
                other => (Opcode::SendVal, self.compile_expr(other)?),
            };
            let name = match &arg.name {
                Some(name) => self.name_constant(name),
                None => Operand::UNUSED,
            };
            self.emit(
                Instruction::new(opcode)
                    .with_op1(value)
                    .with_op2(name)
                    .with_extended(position),
            );
        }
        Ok(())
    }

    fn emit_do_call(&mut self) -> Operand {
        let result = self.alloc_temp();
        self.emit(Instruction::new(Opcode::DoCall).with_result(result));
        result
    }

    fn compile_call(
        &mut self,
        callee: &Callee,
        args: &[Arg],
    ) -> CompileResult<Operand> {
        let argc = args.len() as u32;
        match callee {
            Callee::Name(name) => {
                let name = self.name_constant(name.trim_start_matches('\\'));
                self.emit(
                    Instruction::new(Opcode::InitFcall)
                        .with_op2(name)
                        .with_extended(argc),
                );
            }
            Callee::Expr(callable) => {
                let callable = self.compile_expr(callable)?;
                self.emit(
                    Instruction::new(Opcode::InitDynamicCall)
                        .with_op2(callable)
                        .with_extended(argc),
                );
            }
        }
        self.compile_args(args)?;
        Ok(self.emit_do_call())
    }

    fn compile_method_call(
        &mut self,
        object: &Expr,
        method: &Member,
        args: &[Arg],
        nullsafe: bool,
    ) -> CompileResult<Operand> {
        let object = self.compile_expr(object)?;
        let guard = if nullsafe {
            let result = self.alloc_temp();
            let end = self.new_label();
            self.emit_with_targets(
                Instruction::new(Opcode::JmpNull)
                    .with_op1(object)
                    .with_result(result),
                &[(OperandSlot::Op2, end)],
            );
            Some((result, end))
        } else {
            None
        };
        let method = self.compile_member(method)?;
        self.emit(
            Instruction::new(Opcode::InitMethodCall)
                .with_op1(object)
                .with_op2(method)
                .with_extended(args.len() as u32),
        );
        self.compile_args(args)?;
        let value = self.emit_do_call();
        match guard {
            Some((result, end)) => {
                self.emit(Instruction::new(Opcode::QmAssign).with_op1(value).with_result(result));
                self.place_label(end)?;
                Ok(result)
            }
            None => Ok(value),
        }
    }

    fn compile_static_call(
        &mut self,
        class: &ClassRef,
        method: &Member,
        args: &[Arg],
    ) -> CompileResult<Operand> {
        let class = self.compile_class_ref(class)?;
        let method = self.compile_member(method)?;
        self.emit(
            Instruction::new(Opcode::InitStaticMethodCall)
                .with_op1(class)
                .with_op2(method)
                .with_extended(args.len() as u32),
        );
        self.compile_args(args)?;
        Ok(self.emit_do_call())
    }

    /// `new C(...)`：New 创建对象并准备构造函数调用，DoCall 执行构造函数
    fn compile_new(
        &mut self,
        class: &ClassRef,
        args: &[Arg],
    ) -> CompileResult<Operand> {
        let class = self.compile_class_ref(class)?;
        let object = self.alloc_temp();
        self.emit(
            Instruction::new(Opcode::New)
                .with_op1(class)
                .with_result(object)
                .with_extended(args.len() as u32),
        );
        self.compile_args(args)?;
        self.emit(Instruction::new(Opcode::DoCall));
        Ok(object)
    }

    // ===== isset / empty =====

    /// `isset(a, b, ...)` 等价于 `isset(a) && isset(b) && ...`
    fn compile_isset_list(
        &mut self,
        vars: &[Expr],
    ) -> CompileResult<Operand> {
        let Some((last, init)) = vars.split_last() else {
            return Err(CompileError::structural("isset() requires at least one argument"));
        };
        if init.is_empty() {
            return self.compile_isset_one(last, IssetMode::Isset);
        }
        let result = self.alloc_temp();
        let end = self.new_label();
        for var in init {
            let value = self.compile_isset_one(var, IssetMode::Isset)?;
            self.emit(Instruction::new(Opcode::QmAssign).with_op1(value).with_result(result));
            self.emit_jump_if(Opcode::JmpIfFalse, result, end);
        }
        let value = self.compile_isset_one(last, IssetMode::Isset)?;
        self.emit(Instruction::new(Opcode::QmAssign).with_op1(value).with_result(result));
        self.place_label(end)?;
        Ok(result)
    }

    pub(crate) fn compile_isset_one(
        &mut self,
        expr: &Expr,
        mode: IssetMode,
    ) -> CompileResult<Operand> {
        let (opcode, op1, op2, extra) = match expr {
            Expr::Variable(name) => (
                Opcode::IssetIsEmptyVar,
                self.compile_variable(name),
                Operand::UNUSED,
                0,
            ),
            Expr::VariableVariable(name) => (
                Opcode::IssetIsEmptyVar,
                self.compile_expr(name)?,
                Operand::UNUSED,
                EXT_BY_NAME,
            ),
            Expr::ArrayDim { array, index } => {
                let index = index.as_deref().ok_or_else(|| {
                    CompileError::structural("Cannot use [] for reading")
                })?;
                let container = self.compile_fetch_is(array)?;
                let key = self.compile_expr(index)?;
                (Opcode::IssetIsEmptyDim, container, key, 0)
            }
            Expr::Property {
                object, property, ..
            } => {
                let object = self.compile_fetch_is(object)?;
                let name = self.compile_member(property)?;
                (Opcode::IssetIsEmptyProp, object, name, 0)
            }
            Expr::StaticProperty { class, property } => {
                let class = self.compile_class_ref(class)?;
                let name = self.name_constant(property);
                (Opcode::IssetIsEmptyStaticProp, name, class, 0)
            }
            other if mode == IssetMode::Empty => {
                // empty(expr) == !expr
                let value = self.compile_expr(other)?;
                return Ok(self.emit_to_temp(Opcode::BooleanNot, value, Operand::UNUSED));
            }
            _ => {
                return Err(CompileError::structural(
                    "Cannot use isset() on the result of an expression",
                ))
            }
        };
        let result = self.alloc_temp();
        self.emit(
            Instruction::new(opcode)
                .with_op1(op1)
                .with_op2(op2)
                .with_result(result)
                .with_extended(mode as u32 | extra),
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_table() {
        assert_eq!(binary_opcode("+"), Some((Opcode::Add, false)));
        assert_eq!(binary_opcode(">"), Some((Opcode::IsSmaller, true)));
        assert_eq!(binary_opcode("<>"), Some((Opcode::IsNotEqual, false)));
        assert_eq!(binary_opcode("XOR"), Some((Opcode::BooleanXor, false)));
        assert_eq!(binary_opcode("=>"), None);
    }

    #[test]
    fn test_unary_table() {
        assert_eq!(unary_opcode("!"), Some(Opcode::BooleanNot));
        assert_eq!(unary_opcode("-"), Some(Opcode::Negate));
        assert_eq!(unary_opcode("++"), None);
    }
}
