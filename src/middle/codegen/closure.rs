//! 函数、闭包与箭头函数代码生成
//!
//! 每个函数体都在独立的编译单元中生成：外层单元压栈保存，函数体结束后
//! 恢复。形参占用槽位 `0..n`，闭包的 `use` 变量紧随其后。

use super::bytecode::{Constant, Instruction, Operand, EXT_BY_REF};
use super::{CodegenContext, CompileError, CompileResult, ConstSite, UnitKind};
use crate::frontend::ast::{
    ArrowFunctionDef, Callee, ClassRef, ClosureDef, Expr, FunctionDef, Member, Param,
};
use crate::middle::decl::{CaptureDecl, FunctionDecl, ParamDecl, PropertyDecl};
use crate::vm::opcode::Opcode;
use indexmap::IndexSet;
use std::collections::HashSet;
use tracing::debug;

/// 闭包与箭头函数的名称
const CLOSURE_NAME: &str = "{closure}";

impl CodegenContext<'_> {
    /// 具名函数声明：编译函数体并注册到注册表
    pub(crate) fn compile_function_decl(
        &mut self,
        def: &FunctionDef,
    ) -> CompileResult<()> {
        let name = def.name.trim_start_matches('\\');
        let decl = self
            .compile_function_like(UnitKind::Function, name, &def.params, false, |ctx| {
                ctx.compile_block(&def.body)
            })
            .map(|mut decl| {
                decl.return_type = def.return_type.clone();
                decl.by_ref_return = def.by_ref_return;
                decl
            })
            .map_err(|e| e.in_declaration("function", name))?;

        debug!(
            "function {}: {} params, {} instructions",
            name,
            decl.params.len(),
            decl.op_array.len()
        );
        self.registry
            .register_function(decl)
            .map_err(|e| CompileError::from(e).in_declaration("function", name))?;
        self.functions.push(name.to_string());
        Ok(())
    }

    /// 在新单元中编译形参与函数体，产出描述符
    ///
    /// `body` 在形参分配完槽位之后运行。
    pub(crate) fn compile_function_like(
        &mut self,
        kind: UnitKind,
        name: &str,
        params: &[Param],
        is_constructor: bool,
        body: impl FnOnce(&mut Self) -> CompileResult<()>,
    ) -> CompileResult<FunctionDecl> {
        let (params, finished) = self.in_unit(kind, name, |ctx| {
            let params = ctx.compile_params(params, is_constructor)?;
            body(ctx)?;
            Ok(params)
        })?;
        let mut decl = FunctionDecl::new(name);
        decl.params = params;
        decl.op_array = finished.op_array;
        decl.is_generator = finished.is_generator;
        decl.static_vars = finished.static_vars;
        Ok(decl)
    }

    /// 分配形参槽位并求值默认值
    ///
    /// 构造函数的提升参数同时声明属性，并在函数体之前生成对应的属性赋值。
    fn compile_params(
        &mut self,
        params: &[Param],
        is_constructor: bool,
    ) -> CompileResult<Vec<ParamDecl>> {
        let mut seen = HashSet::new();
        let mut decls = Vec::with_capacity(params.len());
        let mut promoted = Vec::new();

        for param in params {
            if !seen.insert(param.name.as_str()) {
                return Err(CompileError::redeclaration(
                    "parameter",
                    format!("${}", param.name),
                ));
            }
            if param.name == "this" {
                return Err(CompileError::structural("Cannot use $this as parameter"));
            }
            let slot = self.variable(&param.name);

            let default = match &param.default {
                Some(_) if param.variadic => {
                    return Err(CompileError::structural(
                        "Variadic parameter cannot have a default value",
                    ));
                }
                Some(expr) => Some(self.evaluate_const(expr, None, ConstSite::Initializer)?),
                None => None,
            };

            if let Some(visibility) = param.promote {
                if !is_constructor {
                    return Err(CompileError::structural(
                        "Cannot declare promoted property outside a constructor",
                    ));
                }
                if param.variadic {
                    return Err(CompileError::structural(
                        "Cannot declare variadic promoted property",
                    ));
                }
                let mut property = PropertyDecl::new(&param.name);
                property.visibility = visibility;
                property.type_hint = param.type_hint.clone();
                // 提升属性的初值来自实参，类型化时保持未初始化
                if param.type_hint.is_some() {
                    property.default = None;
                }
                self.decls.add_property(property)?;
                promoted.push((param.name.as_str(), slot));
            }

            decls.push(ParamDecl {
                name: param.name.clone(),
                type_hint: param.type_hint.clone(),
                by_ref: param.by_ref,
                variadic: param.variadic,
                default,
                promoted: param.promote,
            });
        }

        // $this->name = $name
        for (name, slot) in promoted {
            let this = self.emit_to_temp(Opcode::FetchThis, Operand::UNUSED, Operand::UNUSED);
            let name = self.name_constant(name);
            let result = self.emit_to_temp(Opcode::AssignObj, this, name);
            self.emit(Instruction::new(Opcode::OpData).with_op1(slot));
            self.free_if_temp(result);
        }
        Ok(decls)
    }

    /// `function (...) use (...) { ... }`
    pub(crate) fn compile_closure(
        &mut self,
        def: &ClosureDef,
    ) -> CompileResult<Operand> {
        let mut seen = HashSet::new();
        for capture in &def.uses {
            if capture.name == "this" {
                return Err(CompileError::structural("Cannot use $this as lexical variable"));
            }
            if def.params.iter().any(|p| p.name == capture.name) {
                return Err(CompileError::structural(format!(
                    "Cannot use lexical variable ${} as a parameter name",
                    capture.name
                )));
            }
            if !seen.insert(capture.name.as_str()) {
                return Err(CompileError::structural(format!(
                    "Cannot use variable ${} twice",
                    capture.name
                )));
            }
        }

        let kind = UnitKind::Closure {
            is_static: def.is_static,
        };
        let mut decl = self.compile_function_like(kind, CLOSURE_NAME, &def.params, false, |ctx| {
            for capture in &def.uses {
                ctx.variable(&capture.name);
            }
            ctx.compile_block(&def.body)
        })?;
        decl.return_type = def.return_type.clone();
        decl.by_ref_return = def.by_ref_return;
        decl.is_static = def.is_static;
        decl.captures = def
            .uses
            .iter()
            .map(|u| CaptureDecl {
                name: u.name.clone(),
                by_ref: u.by_ref,
            })
            .collect();
        Ok(self.declare_closure(decl))
    }

    /// `fn (...) => expr`：按值捕获函数体读取的、外层已知的变量
    pub(crate) fn compile_arrow_function(
        &mut self,
        def: &ArrowFunctionDef,
    ) -> CompileResult<Operand> {
        let params: HashSet<&str> = def.params.iter().map(|p| p.name.as_str()).collect();
        let mut used = IndexSet::new();
        collect_variables(&def.body, &mut used);
        let captures: Vec<String> = used
            .into_iter()
            .filter(|name| name != "this" && !params.contains(name.as_str()))
            .filter(|name| self.unit.scopes.lookup(name).is_some())
            .collect();

        let kind = UnitKind::Closure {
            is_static: def.is_static,
        };
        let mut decl = self.compile_function_like(kind, CLOSURE_NAME, &def.params, false, |ctx| {
            for name in &captures {
                ctx.variable(name);
            }
            let value = ctx.compile_expr(&def.body)?;
            ctx.emit(Instruction::new(Opcode::Return).with_op1(value));
            Ok(())
        })?;
        decl.return_type = def.return_type.clone();
        decl.by_ref_return = def.by_ref_return;
        decl.is_static = def.is_static;
        decl.captures = captures
            .into_iter()
            .map(|name| CaptureDecl {
                name,
                by_ref: false,
            })
            .collect();
        Ok(self.declare_closure(decl))
    }

    /// 追加到闭包表，在外层单元生成 DeclareClosure 与 BindLexical
    fn declare_closure(
        &mut self,
        decl: FunctionDecl,
    ) -> Operand {
        let index = self.closures.len();
        let captures = decl.captures.clone();
        debug!(
            "closure #{}: {} captures, {} instructions",
            index,
            captures.len(),
            decl.op_array.len()
        );
        self.closures.push(decl);

        let index = self.constant(Constant::Int(index as i64));
        let closure = self.emit_to_temp(Opcode::DeclareClosure, index, Operand::UNUSED);
        for capture in captures {
            let outer = self.variable(&capture.name);
            let name = self.name_constant(&capture.name);
            self.emit(
                Instruction::new(Opcode::BindLexical)
                    .with_op1(closure)
                    .with_op2(outer)
                    .with_result(name)
                    .with_extended(if capture.by_ref { EXT_BY_REF } else { 0 }),
            );
        }
        closure
    }
}

/// 收集表达式中读取的变量名（按首次出现顺序）
///
/// 嵌套闭包只贡献其 `use` 列表；嵌套箭头函数贡献其函数体中除自身形参外的变量。
fn collect_variables(
    expr: &Expr,
    out: &mut IndexSet<String>,
) {
    let mut visit = |e: &Expr| collect_variables(e, out);
    match expr {
        Expr::Variable(name) => {
            out.insert(name.clone());
        }
        Expr::Null
        | Expr::Bool(_)
        | Expr::Int(_)
        | Expr::Float(_)
        | Expr::String(_)
        | Expr::Constant(_)
        | Expr::MagicConst(_) => {}
        Expr::Interpolated(parts) => parts.iter().for_each(visit),
        Expr::Array(items) => {
            for item in items {
                if let Some(key) = &item.key {
                    visit(key);
                }
                visit(&item.value);
            }
        }
        Expr::List(items) => {
            for item in items.iter().flatten() {
                if let Some(key) = &item.key {
                    visit(key);
                }
                visit(&item.target);
            }
        }
        Expr::Isset(exprs) => exprs.iter().for_each(visit),
        Expr::VariableVariable(e)
        | Expr::Empty(e)
        | Expr::Clone(e)
        | Expr::Print(e)
        | Expr::Silence(e)
        | Expr::YieldFrom(e)
        | Expr::Throw(e)
        | Expr::Unary { operand: e, .. }
        | Expr::Cast { expr: e, .. }
        | Expr::Include { expr: e, .. }
        | Expr::IncDec { target: e, .. } => visit(e),
        Expr::Binary { left, right, .. } => {
            visit(left);
            visit(right);
        }
        Expr::Assign { target, value, .. } => {
            visit(target);
            visit(value);
        }
        Expr::AssignRef { target, source } => {
            visit(target);
            visit(source);
        }
        Expr::Ternary {
            condition,
            then,
            otherwise,
        } => {
            visit(condition);
            if let Some(then) = then {
                visit(then);
            }
            visit(otherwise);
        }
        Expr::ArrayDim { array, index } => {
            visit(array);
            if let Some(index) = index {
                visit(index);
            }
        }
        Expr::Property {
            object, property, ..
        } => {
            visit(object);
            collect_member(property, out);
        }
        Expr::StaticProperty { class, .. } | Expr::ClassConst { class, .. } => {
            collect_class_ref(class, out);
        }
        Expr::Call { callee, args } => {
            if let Callee::Expr(callee) = callee {
                collect_variables(callee, out);
            }
            args.iter().for_each(|a| collect_variables(&a.value, out));
        }
        Expr::MethodCall {
            object,
            method,
            args,
            ..
        } => {
            collect_variables(object, out);
            collect_member(method, out);
            args.iter().for_each(|a| collect_variables(&a.value, out));
        }
        Expr::StaticCall {
            class,
            method,
            args,
        } => {
            collect_class_ref(class, out);
            collect_member(method, out);
            args.iter().for_each(|a| collect_variables(&a.value, out));
        }
        Expr::New { class, args } => {
            collect_class_ref(class, out);
            args.iter().for_each(|a| collect_variables(&a.value, out));
        }
        Expr::InstanceOf { expr, class } => {
            collect_variables(expr, out);
            collect_class_ref(class, out);
        }
        Expr::Exit(status) => {
            if let Some(status) = status {
                visit(status);
            }
        }
        Expr::Yield { key, value } => {
            if let Some(key) = key {
                collect_variables(key, out);
            }
            if let Some(value) = value {
                collect_variables(value, out);
            }
        }
        Expr::Closure(def) => {
            for capture in &def.uses {
                out.insert(capture.name.clone());
            }
        }
        Expr::ArrowFunction(def) => {
            let mut inner = IndexSet::new();
            collect_variables(&def.body, &mut inner);
            for name in inner {
                if !def.params.iter().any(|p| p.name == name) {
                    out.insert(name);
                }
            }
        }
        Expr::Match { subject, arms } => {
            collect_variables(subject, out);
            for arm in arms {
                for condition in arm.conditions.iter().flatten() {
                    collect_variables(condition, out);
                }
                collect_variables(&arm.body, out);
            }
        }
    }
}

fn collect_member(
    member: &Member,
    out: &mut IndexSet<String>,
) {
    if let Member::Dynamic(expr) = member {
        collect_variables(expr, out);
    }
}

fn collect_class_ref(
    class: &ClassRef,
    out: &mut IndexSet<String>,
) {
    if let ClassRef::Dynamic(expr) = class {
        collect_variables(expr, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::ast::{ArrowFunctionDef, ClosureUse, Param};

    fn arrow(
        params: &[&str],
        body: Expr,
    ) -> Expr {
        Expr::ArrowFunction(ArrowFunctionDef {
            params: params.iter().map(|p| Param::new(p)).collect(),
            body: Box::new(body),
            by_ref_return: false,
            is_static: false,
            return_type: None,
        })
    }

    #[test]
    fn test_collect_variables_in_order() {
        let expr = Expr::binary(
            "+",
            Expr::var("b"),
            Expr::binary("*", Expr::var("a"), Expr::var("b")),
        );
        let mut out = IndexSet::new();
        collect_variables(&expr, &mut out);
        assert_eq!(out.into_iter().collect::<Vec<_>>(), vec!["b", "a"]);
    }

    #[test]
    fn test_nested_arrow_hides_its_params() {
        let expr = arrow(&["x"], Expr::binary("+", Expr::var("x"), Expr::var("y")));
        let mut out = IndexSet::new();
        collect_variables(&expr, &mut out);
        assert_eq!(out.into_iter().collect::<Vec<_>>(), vec!["y"]);
    }

    #[test]
    fn test_nested_closure_contributes_uses_only() {
        let expr = Expr::Closure(ClosureDef {
            params: vec![],
            uses: vec![ClosureUse {
                name: "total".to_string(),
                by_ref: true,
            }],
            body: vec![crate::frontend::ast::Stmt::Expr(Expr::var("hidden"))],
            by_ref_return: false,
            is_static: false,
            return_type: None,
        });
        let mut out = IndexSet::new();
        collect_variables(&expr, &mut out);
        assert_eq!(out.into_iter().collect::<Vec<_>>(), vec!["total"]);
    }
}
