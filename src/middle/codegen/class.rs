//! 类声明代码生成
//!
//! 类、接口、trait、枚举与匿名类。类体分阶段构建：
//! 1. 常量与枚举 case（编译期求值，允许引用同类中后声明的常量）
//! 2. 属性
//! 3. 方法（各自独立的编译单元）
//! 4. trait 组合
//!
//! 完成的描述符经校验后注册到注册表。

use super::bytecode::{Instruction, Operand};
use super::{CodegenContext, CompileError, CompileResult, ConstSite, UnitKind};
use crate::frontend::ast::{
    ClassDef, ClassKind, ClassMember, ConstDecl, EnumCase, MethodDef, PropertyDef, TraitAdaptation,
};
use crate::frontend::const_eval::ConstEvalError;
use crate::middle::decl::{ClassConstDecl, ClassDecl, PropertyDecl};
use crate::vm::opcode::Opcode;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// 编译期求值的类成员
#[derive(Clone, Copy)]
enum ClassValue<'a> {
    Const(&'a ConstDecl),
    Case(&'a EnumCase),
}

impl<'a> ClassValue<'a> {
    fn name(&self) -> &'a str {
        match self {
            ClassValue::Const(c) => &c.name,
            ClassValue::Case(c) => &c.name,
        }
    }
}

/// 引用了同类中尚未求值的常量
fn is_forward_reference(err: &CompileError) -> bool {
    matches!(
        err,
        CompileError::ConstEval(ConstEvalError::UndefinedClassConstant { .. })
    )
}

impl CodegenContext<'_> {
    /// 具名类声明
    pub(crate) fn compile_class_decl(
        &mut self,
        def: &ClassDef,
    ) -> CompileResult<()> {
        let name = def.name.trim_start_matches('\\').to_string();
        let kind = kind_name(def.kind);
        let decl = self
            .build_class(def, &name, false)
            .map_err(|e| e.in_declaration(kind, name.as_str()))?;
        self.register_class(decl)
            .map_err(|e| e.in_declaration(kind, name.as_str()))
    }

    /// `new class (...) { ... }`：以生成的名称注册，运行期由 DeclareAnonClass 取得
    pub(crate) fn compile_anonymous_class(
        &mut self,
        def: &ClassDef,
    ) -> CompileResult<Operand> {
        // 注册表可能已有先前编译留下的匿名类，编号跳过已占用的名称
        let name = loop {
            let candidate = format!("class@anonymous#{}", self.anonymous_classes);
            self.anonymous_classes += 1;
            if self.registry.class(&candidate).is_none() {
                break candidate;
            }
        };
        let decl = self
            .build_class(def, &name, true)
            .map_err(|e| e.in_declaration("class", name.as_str()))?;
        self.register_class(decl)
            .map_err(|e| e.in_declaration("class", name.as_str()))?;

        let name = self.name_constant(&name);
        let result = self.alloc_temp();
        self.emit(
            Instruction::new(Opcode::DeclareAnonClass)
                .with_op1(name)
                .with_result(result),
        );
        Ok(result)
    }

    fn register_class(
        &mut self,
        decl: ClassDecl,
    ) -> CompileResult<()> {
        debug!(
            "{} {}: {} constants, {} properties, {} methods",
            decl.kind_name(),
            decl.name,
            decl.constants.len(),
            decl.properties.len(),
            decl.methods.len()
        );
        let name = decl.name.clone();
        self.registry.register_class(decl)?;
        self.classes.push(name);
        Ok(())
    }

    /// 压入类上下文并构建类体；无论成功与否都弹出
    fn build_class(
        &mut self,
        def: &ClassDef,
        name: &str,
        is_anonymous: bool,
    ) -> CompileResult<ClassDecl> {
        if def.modifiers.is_abstract && def.modifiers.is_final {
            return Err(CompileError::structural(
                "Cannot use the final modifier on an abstract class",
            ));
        }
        if def.backing_type.is_some() && def.kind != ClassKind::Enum {
            return Err(CompileError::structural(format!(
                "{} {} cannot have a backing type",
                kind_name(def.kind),
                name
            )));
        }

        let mut decl = ClassDecl::new(name, def.kind);
        decl.modifiers = def.modifiers;
        decl.is_anonymous = is_anonymous;
        decl.backing_type = def.backing_type.clone();
        decl.interfaces = def
            .implements
            .iter()
            .map(|i| i.trim_start_matches('\\').to_string())
            .collect();
        decl.parent = match (def.kind, &def.extends) {
            (ClassKind::Class, Some(parent)) => Some(parent.trim_start_matches('\\').to_string()),
            (_, Some(_)) => {
                return Err(CompileError::structural(format!(
                    "{} {} cannot extend a class",
                    kind_name(def.kind),
                    name
                )))
            }
            (_, None) => None,
        };

        self.decls.enter_class(decl);
        let built = self.build_class_body(def);
        let finished = self.decls.leave_class();
        built?;
        finished
    }

    fn build_class_body(
        &mut self,
        def: &ClassDef,
    ) -> CompileResult<()> {
        self.compile_class_values(def)?;

        for member in &def.members {
            if let ClassMember::Property(property) = member {
                self.compile_property(def, property)?;
            }
        }
        for member in &def.members {
            if let ClassMember::Method(method) = member {
                self.compile_method(def, method)?;
            }
        }
        self.compose_traits(def)
    }

    /// 常量与枚举 case
    ///
    /// 引用同类中后声明的常量时先推迟，直到一轮求值没有任何进展为止。
    /// 完成后按声明顺序重排常量表。
    fn compile_class_values(
        &mut self,
        def: &ClassDef,
    ) -> CompileResult<()> {
        let class_name = self.decls.current_mut()?.name.clone();
        let mut pending = Vec::new();
        let mut seen = HashSet::new();
        for member in &def.members {
            let value = match member {
                ClassMember::Const(c) => ClassValue::Const(c),
                ClassMember::EnumCase(c) => ClassValue::Case(c),
                _ => continue,
            };
            if !seen.insert(value.name()) {
                let kind = match value {
                    ClassValue::Const(_) => "constant",
                    ClassValue::Case(_) => "enum case",
                };
                return Err(CompileError::redeclaration(
                    kind,
                    format!("{}::{}", class_name, value.name()),
                ));
            }
            pending.push(value);
        }
        let order: HashMap<String, usize> = pending
            .iter()
            .enumerate()
            .map(|(i, v)| (v.name().to_string(), i))
            .collect();

        while !pending.is_empty() {
            let before = pending.len();
            let mut deferred = Vec::new();
            let mut first_error = None;
            for value in pending {
                match self.compile_class_value(def, value) {
                    Ok(()) => {}
                    Err(err) if is_forward_reference(&err) => {
                        if first_error.is_none() {
                            first_error = Some(err);
                        }
                        deferred.push(value);
                    }
                    Err(err) => return Err(err),
                }
            }
            if deferred.len() == before {
                return Err(first_error.unwrap_or_else(|| {
                    CompileError::internal("class constant evaluation made no progress")
                }));
            }
            pending = deferred;
        }

        let position = |name: &str| order.get(name).copied().unwrap_or(usize::MAX);
        let decl = self.decls.current_mut()?;
        decl.constants
            .sort_by(|a, _, b, _| position(a).cmp(&position(b)));
        decl.enum_cases.sort_by_key(|name| position(name));
        Ok(())
    }

    fn compile_class_value(
        &mut self,
        def: &ClassDef,
        value: ClassValue<'_>,
    ) -> CompileResult<()> {
        match value {
            ClassValue::Const(c) => {
                let evaluated =
                    self.evaluate_const(&c.value, c.type_hint.as_deref(), ConstSite::ClassBody)?;
                let mut constant = ClassConstDecl::new(&c.name, evaluated);
                constant.type_hint = c.type_hint.clone();
                constant.visibility = c.visibility;
                constant.is_final = c.is_final;
                self.decls.add_constant(constant)
            }
            ClassValue::Case(case) => {
                let class_name = self.decls.current_mut()?.name.clone();
                if def.kind != ClassKind::Enum {
                    return Err(CompileError::structural("Case can only be used in enums"));
                }
                let value = match (&def.backing_type, &case.value) {
                    (Some(backing), Some(expr)) => {
                        Some(self.evaluate_const(expr, Some(backing), ConstSite::ClassBody)?)
                    }
                    (Some(_), None) => {
                        return Err(CompileError::structural(format!(
                            "Case {} of backed enum {} must have a value",
                            case.name, class_name
                        )))
                    }
                    (None, Some(_)) => {
                        return Err(CompileError::structural(format!(
                            "Case {} of non-backed enum {} must not have a value",
                            case.name, class_name
                        )))
                    }
                    (None, None) => None,
                };
                self.decls.add_enum_case(&case.name, value)
            }
        }
    }

    fn compile_property(
        &mut self,
        def: &ClassDef,
        property: &PropertyDef,
    ) -> CompileResult<()> {
        let class_name = self.decls.current_mut()?.name.clone();
        if def.kind == ClassKind::Interface {
            return Err(CompileError::structural("Interfaces may not include properties"));
        }
        let is_readonly = property.is_readonly || def.modifiers.is_readonly;
        if is_readonly && property.type_hint.is_none() {
            return Err(CompileError::structural(format!(
                "Readonly property {}::${} must have type",
                class_name, property.name
            )));
        }
        if is_readonly && property.default.is_some() {
            return Err(CompileError::structural(format!(
                "Readonly property {}::${} cannot have default value",
                class_name, property.name
            )));
        }

        let mut decl = PropertyDecl::new(&property.name);
        decl.default = match &property.default {
            Some(expr) => Some(self.evaluate_const(expr, None, ConstSite::ClassBody)?),
            // 类型化属性没有隐式的 null 初值
            None if property.type_hint.is_some() => None,
            None => decl.default,
        };
        decl.type_hint = property.type_hint.clone();
        decl.visibility = property.visibility;
        decl.is_static = property.is_static;
        decl.is_readonly = is_readonly;
        self.decls.add_property(decl)
    }

    fn compile_method(
        &mut self,
        def: &ClassDef,
        method: &MethodDef,
    ) -> CompileResult<()> {
        let class_name = self.decls.current_mut()?.name.clone();
        let qualified = format!("{}::{}", class_name, method.name);
        self.check_method_body(def, method, &qualified)
            .map_err(|e| e.in_declaration("method", qualified.as_str()))?;

        let kind = UnitKind::Method {
            is_static: method.is_static,
        };
        let is_constructor = method.name.eq_ignore_ascii_case("__construct");
        let mut decl = self
            .compile_function_like(kind, &method.name, &method.params, is_constructor, |ctx| {
                match &method.body {
                    Some(body) => ctx.compile_block(body),
                    None => Ok(()),
                }
            })
            .map_err(|e| e.in_declaration("method", qualified.as_str()))?;
        decl.visibility = method.visibility;
        decl.is_static = method.is_static;
        decl.is_abstract = method.is_abstract || def.kind == ClassKind::Interface;
        decl.is_final = method.is_final;
        decl.return_type = method.return_type.clone();
        decl.by_ref_return = method.by_ref_return;
        debug!(
            "method {}: {} params, {} instructions",
            qualified,
            decl.params.len(),
            decl.op_array.len()
        );
        self.decls.add_method(decl)
    }

    fn check_method_body(
        &self,
        def: &ClassDef,
        method: &MethodDef,
        qualified: &str,
    ) -> CompileResult<()> {
        let has_body = method.body.is_some();
        if def.kind == ClassKind::Interface {
            if has_body {
                return Err(CompileError::structural(format!(
                    "Interface function {}() cannot contain body",
                    qualified
                )));
            }
            return Ok(());
        }
        match (method.is_abstract, has_body) {
            (true, true) => Err(CompileError::structural(format!(
                "Abstract function {}() cannot contain body",
                qualified
            ))),
            (false, false) => Err(CompileError::structural(format!(
                "Non-abstract method {}() must contain body",
                qualified
            ))),
            _ => Ok(()),
        }
    }

    /// `use A, B { ... }`：从注册表取出 trait 描述符的副本并组合
    fn compose_traits(
        &mut self,
        def: &ClassDef,
    ) -> CompileResult<()> {
        let class_name = self.decls.current_mut()?.name.clone();
        let mut traits = Vec::new();
        let mut adaptations: Vec<TraitAdaptation> = Vec::new();
        for member in &def.members {
            let ClassMember::TraitUse(used) = member else {
                continue;
            };
            for name in &used.traits {
                let found = self.registry.class(name).ok_or_else(|| {
                    CompileError::structural(format!("Trait \"{}\" not found", name))
                })?;
                if !found.is_trait() {
                    return Err(CompileError::structural(format!(
                        "{} cannot use {} - it is not a trait",
                        class_name, found.name
                    )));
                }
                traits.push(found.clone());
            }
            adaptations.extend(used.adaptations.iter().cloned());
        }
        if traits.is_empty() {
            return Ok(());
        }
        debug!("{} uses {} traits", class_name, traits.len());
        self.decls.current_mut()?.apply_traits(&traits, &adaptations)
    }
}

fn kind_name(kind: ClassKind) -> &'static str {
    match kind {
        ClassKind::Class => "class",
        ClassKind::Interface => "interface",
        ClassKind::Trait => "trait",
        ClassKind::Enum => "enum",
    }
}
