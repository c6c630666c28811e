//! 代码生成器
//!
//! 将语法树翻译为三地址字节码与常量池。
//! 核心设计原则：
//! 1. 显式数据流：每个表达式翻译函数都返回存放结果的操作数
//! 2. 统一回填：所有前向跳转（含异常处理器地址）都走同一个 fix-up 列表
//! 3. 严格栈式：嵌套函数/方法/闭包的编译状态压栈保存，后进先出恢复
//!
//! 职责划分：
//! - BytecodeBuffer：常量池和指令序列
//! - ScopeStack：变量槽位与 break/continue 目标
//! - FlowManager：临时值、标签、跳转回填
//! - DeclarationBuilder：类上下文与描述符

pub mod buffer;
pub mod bytecode;
pub mod error;
pub mod flow;

mod assign;
mod class;
mod closure;
mod control_flow;
mod expr;
mod loop_gen;
mod stmt;
mod switch;

#[cfg(test)]
mod tests;

pub use error::{CompileError, CompileResult};

use crate::frontend::ast::{Expr, Program};
use crate::frontend::const_eval::{ClassFrame, ConstEvalEnv, ConstEvaluator};
use crate::middle::decl::{ClassDecl, DeclarationBuilder, FunctionDecl};
use crate::middle::registry::Registry;
use crate::util::config::CodegenConfig;
use crate::vm::opcode::Opcode;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use self::buffer::BytecodeBuffer;
use self::bytecode::{Constant, Instruction, Label, OpArray, Operand, OperandSlot};
use self::flow::{FlowManager, Fixup, ScopeStack};

/// 编译单元种类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnitKind {
    /// 顶层脚本
    Script,
    Function,
    Method { is_static: bool },
    /// 闭包与箭头函数
    Closure { is_static: bool },
}

/// 一个编译单元的全部可变状态
#[derive(Debug)]
pub(crate) struct UnitState {
    buffer: BytecodeBuffer,
    scopes: ScopeStack,
    flow: FlowManager,
    kind: UnitKind,
    /// `__FUNCTION__`（顶层为空）
    function: String,
    /// 方法体及其内部闭包处于类作用域
    in_class: bool,
    is_generator: bool,
    static_vars: IndexMap<String, Constant>,
}

impl UnitState {
    fn new(
        kind: UnitKind,
        function: &str,
        in_class: bool,
        temp_base: u32,
    ) -> Self {
        UnitState {
            buffer: BytecodeBuffer::new(),
            scopes: ScopeStack::new(),
            flow: FlowManager::new(temp_base),
            kind,
            function: function.to_string(),
            in_class,
            is_generator: false,
            static_vars: IndexMap::new(),
        }
    }

    /// 末尾能否继续向下执行（最后一条不是 Return，或有标签指向末尾）
    fn falls_off_end(&self) -> bool {
        let len = self.buffer.len() as u32;
        let ends_with_return = self
            .buffer
            .last()
            .is_some_and(|i| i.opcode == Opcode::Return);
        !ends_with_return || self.flow.has_label_at(len)
    }

    /// 结束单元：检查标签，产出 op array
    fn finish(
        self,
        config: &CodegenConfig,
    ) -> CompileResult<FinishedUnit> {
        if let Some(label) = self.flow.unresolved_labels().into_iter().next() {
            return Err(match self.flow.goto_name(label) {
                Some(name) => {
                    CompileError::structural(format!("'goto' to undefined label '{}'", name))
                }
                None => CompileError::internal(format!("unresolved label {}", label)),
            });
        }

        let var_names = self.scopes.var_names();
        let temp_count = self.flow.temp_count();
        let (instructions, constants) = self.buffer.into_parts();
        let op_array = OpArray {
            instructions,
            constants,
            var_names,
            temp_count,
        };
        debug!(
            "unit `{}` compiled: {} instructions, {} constants, {} vars, {} temps",
            display_unit_name(&self.function),
            op_array.len(),
            op_array.constants.len(),
            op_array.var_names.len(),
            op_array.temp_count
        );
        if config.dump_units {
            debug!("{}:\n{}", display_unit_name(&self.function), op_array);
        }
        Ok(FinishedUnit {
            op_array,
            is_generator: self.is_generator,
            static_vars: self.static_vars,
        })
    }
}

fn display_unit_name(name: &str) -> &str {
    if name.is_empty() {
        "{main}"
    } else {
        name
    }
}

/// 已结束的编译单元
#[derive(Debug)]
pub(crate) struct FinishedUnit {
    pub(crate) op_array: OpArray,
    pub(crate) is_generator: bool,
    pub(crate) static_vars: IndexMap<String, Constant>,
}

/// 常量求值发生的位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConstSite {
    /// 类体（类常量、属性默认值、枚举 case）
    ClassBody,
    /// 初始化器（参数默认值、static 变量、全局 const），允许 `new`
    Initializer,
}

/// 编译产物
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledScript {
    /// 顶层脚本
    pub main: OpArray,
    /// 闭包表（`DeclareClosure` 以下标引用）
    pub closures: Vec<FunctionDecl>,
    /// 本次注册的函数（按声明顺序）
    pub functions: Vec<String>,
    /// 本次注册的类、接口、trait、枚举
    pub classes: Vec<String>,
    /// 全局 const 声明
    pub constants: IndexMap<String, Constant>,
}

impl CompiledScript {
    pub fn closure(
        &self,
        index: usize,
    ) -> Option<&FunctionDecl> {
        self.closures.get(index)
    }

    /// 以 JSON 导出
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// 代码生成器
///
/// 注册表由调用方持有并注入；一个上下文只翻译一棵语法树。
pub struct CodegenContext<'r> {
    registry: &'r mut Registry,
    config: CodegenConfig,

    /// 当前编译单元
    unit: UnitState,

    /// 被挂起的外层单元
    saved_units: Vec<UnitState>,

    /// 类上下文栈
    decls: DeclarationBuilder,

    /// 已声明的全局常量
    globals: IndexMap<String, Constant>,

    closures: Vec<FunctionDecl>,
    functions: Vec<String>,
    classes: Vec<String>,
    anonymous_classes: u32,
}

impl<'r> CodegenContext<'r> {
    /// 创建新的代码生成上下文
    pub fn new(registry: &'r mut Registry) -> Self {
        Self::with_config(registry, CodegenConfig::default())
    }

    pub fn with_config(
        registry: &'r mut Registry,
        config: CodegenConfig,
    ) -> Self {
        let unit = UnitState::new(UnitKind::Script, "", false, config.temp_base);
        CodegenContext {
            registry,
            config,
            unit,
            saved_units: Vec::new(),
            decls: DeclarationBuilder::new(),
            globals: IndexMap::new(),
            closures: Vec::new(),
            functions: Vec::new(),
            classes: Vec::new(),
            anonymous_classes: 0,
        }
    }

    pub fn config(&self) -> &CodegenConfig {
        &self.config
    }

    /// 翻译整个程序
    pub fn generate(
        mut self,
        program: &Program,
    ) -> CompileResult<CompiledScript> {
        debug!(
            "codegen start: {} top-level statements",
            program.statements.len()
        );
        for stmt in &program.statements {
            self.compile_stmt(stmt)?;
        }
        if !self.saved_units.is_empty() || self.decls.in_class() {
            return Err(CompileError::internal(
                "unit or class context left open at end of script",
            ));
        }
        self.seal_unit()?;
        let main = self.unit.finish(&self.config)?.op_array;
        debug!(
            "codegen complete: {} functions, {} classes, {} closures",
            self.functions.len(),
            self.classes.len(),
            self.closures.len()
        );
        Ok(CompiledScript {
            main,
            closures: self.closures,
            functions: self.functions,
            classes: self.classes,
            constants: self.globals,
        })
    }

    // ===== 指令发射 =====

    pub(crate) fn emit(
        &mut self,
        instr: Instruction,
    ) -> usize {
        self.unit.buffer.emit(instr)
    }

    /// 发射带跳转目标的指令
    ///
    /// 已放置的标签直接写入地址；否则写入占位地址并登记 fix-up。
    pub(crate) fn emit_with_targets(
        &mut self,
        mut instr: Instruction,
        targets: &[(OperandSlot, Label)],
    ) -> usize {
        let mut pending = Vec::new();
        for &(slot, label) in targets {
            let addr = self.unit.flow.address_of(label);
            *instr.operand_mut(slot) = Operand::address(addr.unwrap_or(Operand::UNRESOLVED));
            if addr.is_none() {
                pending.push((slot, label));
            }
        }
        let addr = self.emit(instr);
        for (slot, label) in pending {
            trace!("fix-up {} at {} ({:?})", label, addr, slot);
            self.unit.flow.add_fixup(label, Fixup { addr, slot });
        }
        addr
    }

    /// 无条件跳转
    pub(crate) fn emit_jump(
        &mut self,
        label: Label,
    ) -> usize {
        self.emit_with_targets(Instruction::new(Opcode::Jmp), &[(OperandSlot::Op1, label)])
    }

    /// 条件跳转（JmpIfFalse / JmpIfTrue）
    pub(crate) fn emit_jump_if(
        &mut self,
        opcode: Opcode,
        condition: Operand,
        label: Label,
    ) -> usize {
        self.emit_with_targets(
            Instruction::new(opcode).with_op1(condition),
            &[(OperandSlot::Op2, label)],
        )
    }

    pub(crate) fn new_label(&mut self) -> Label {
        self.unit.flow.new_label()
    }

    /// 放置标签并回填所有前向引用
    pub(crate) fn place_label(
        &mut self,
        label: Label,
    ) -> CompileResult<()> {
        let addr = self.unit.buffer.len() as u32;
        let fixups = self
            .unit
            .flow
            .place(label, addr)
            .ok_or_else(|| CompileError::internal(format!("label {} placed twice", label)))?;
        trace!("place {} at {} ({} fix-ups)", label, addr, fixups.len());
        for fixup in fixups {
            if !self.unit.buffer.patch(fixup.addr, fixup.slot, addr) {
                return Err(CompileError::internal(format!(
                    "fix-up for {} points outside the unit ({})",
                    label, fixup.addr
                )));
            }
        }
        Ok(())
    }

    // ===== 操作数 =====

    pub(crate) fn alloc_temp(&mut self) -> Operand {
        self.unit.flow.alloc_temp()
    }

    /// 追加常量，返回常量操作数
    pub(crate) fn constant(
        &mut self,
        value: Constant,
    ) -> Operand {
        Operand::constant(self.unit.buffer.add_constant(value))
    }

    /// 名称常量（去重）
    pub(crate) fn name_constant(
        &mut self,
        name: &str,
    ) -> Operand {
        Operand::constant(self.unit.buffer.intern(name))
    }

    /// 字面量：追加一个常量并加载到新的临时值
    pub(crate) fn load_literal(
        &mut self,
        value: Constant,
    ) -> Operand {
        let index = self.constant(value);
        let result = self.alloc_temp();
        self.emit(
            Instruction::new(Opcode::LoadConst)
                .with_op1(index)
                .with_result(result),
        );
        result
    }

    /// 变量槽位（不存在则分配）
    pub(crate) fn variable(
        &mut self,
        name: &str,
    ) -> Operand {
        Operand::var(self.unit.scopes.resolve_or_create(name))
    }

    /// 发射 `opcode op1, op2 -> 新临时值`
    pub(crate) fn emit_to_temp(
        &mut self,
        opcode: Opcode,
        op1: Operand,
        op2: Operand,
    ) -> Operand {
        let result = self.alloc_temp();
        self.emit(
            Instruction::new(opcode)
                .with_op1(op1)
                .with_op2(op2)
                .with_result(result),
        );
        result
    }

    /// 丢弃不再使用的临时值
    pub(crate) fn free_if_temp(
        &mut self,
        value: Operand,
    ) {
        if value.is_temp() {
            self.emit(Instruction::new(Opcode::Free).with_op1(value));
        }
    }

    // ===== 单元栈 =====

    /// 挂起当前单元，开始一个新单元
    pub(crate) fn push_unit(
        &mut self,
        kind: UnitKind,
        function: &str,
    ) {
        let in_class = match kind {
            UnitKind::Method { .. } => true,
            UnitKind::Closure { .. } => self.unit.in_class,
            UnitKind::Script | UnitKind::Function => false,
        };
        let fresh = UnitState::new(kind, function, in_class, self.config.temp_base);
        let outer = std::mem::replace(&mut self.unit, fresh);
        self.saved_units.push(outer);
        debug!(
            "enter unit `{}` (depth {})",
            function,
            self.saved_units.len()
        );
    }

    /// 补隐式返回，再为向前的 goto 生成跳板
    ///
    /// 跳板位于返回指令之后，正常执行流不会落入。
    fn seal_unit(&mut self) -> CompileResult<()> {
        let gotos = self.unit.flow.take_pending_gotos();
        let has_trampoline = gotos.iter().any(|g| g.trampoline.is_some());
        if (self.config.implicit_return || has_trampoline) && self.unit.falls_off_end() {
            let null = self.constant(Constant::Null);
            self.emit(Instruction::new(Opcode::Return).with_op1(null));
        }
        for goto in gotos {
            self.resolve_goto(goto)?;
        }
        Ok(())
    }

    /// 结束当前单元并恢复外层单元
    pub(crate) fn pop_unit(&mut self) -> CompileResult<FinishedUnit> {
        let sealed = self.seal_unit();
        let outer = self
            .saved_units
            .pop()
            .ok_or_else(|| CompileError::internal("unit save stack underflow"))?;
        let finished = std::mem::replace(&mut self.unit, outer);
        sealed?;
        finished.finish(&self.config)
    }

    /// 在新单元中运行 `f`；无论成功与否都恢复外层单元
    pub(crate) fn in_unit<T>(
        &mut self,
        kind: UnitKind,
        function: &str,
        f: impl FnOnce(&mut Self) -> CompileResult<T>,
    ) -> CompileResult<(T, FinishedUnit)> {
        self.push_unit(kind, function);
        let compiled = f(self);
        let finished = self.pop_unit();
        let value = compiled?;
        Ok((value, finished?))
    }

    pub(crate) fn unit_kind(&self) -> UnitKind {
        self.unit.kind
    }

    // ===== 类作用域 =====

    /// 当前单元可见的类（方法体及其闭包内）
    pub(crate) fn class_scope(&self) -> Option<&ClassDecl> {
        if self.unit.in_class {
            self.decls.current()
        } else {
            None
        }
    }

    fn frame_of(decl: &ClassDecl) -> ClassFrame<'_> {
        ClassFrame {
            name: &decl.name,
            parent: decl.parent.as_deref(),
            interfaces: &decl.interfaces,
            is_trait: decl.is_trait(),
            constants: &decl.constants,
        }
    }

    /// 编译期求值（可选声明类型检查）
    pub(crate) fn evaluate_const(
        &self,
        expr: &Expr,
        declared: Option<&str>,
        site: ConstSite,
    ) -> CompileResult<Constant> {
        let class = match site {
            ConstSite::ClassBody => self.decls.current(),
            ConstSite::Initializer => self.class_scope(),
        };
        let mut env = ConstEvalEnv::new()
            .with_max_depth(self.config.max_const_depth)
            .with_globals(&self.globals)
            .with_registry(&*self.registry)
            .allow_new(site == ConstSite::Initializer);
        if !self.unit.function.is_empty() {
            env = env.with_function(&self.unit.function);
        }
        if let Some(decl) = class {
            env = env.with_class(Self::frame_of(decl));
        }
        let value = ConstEvaluator::with_env(env).evaluate_typed(expr, declared)?;
        Ok(value)
    }
}
