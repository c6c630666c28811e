//! 字节码缓冲区
//!
//! 每个编译单元拥有一个缓冲区：只追加的指令序列 + 常量池。
//! 指令序列的长度就是下一条指令的地址。

use super::bytecode::{Constant, Instruction, OperandSlot};
use std::collections::HashMap;

/// 常量池
///
/// 字面量按出现顺序追加；标识符（函数名、类名、属性名）经 `intern` 去重。
#[derive(Debug, Clone, Default)]
pub struct ConstantPool {
    entries: Vec<Constant>,
    interned: HashMap<String, u32>,
}

impl ConstantPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一个常量，返回其索引
    pub fn add(
        &mut self,
        value: Constant,
    ) -> u32 {
        let index = self.entries.len() as u32;
        self.entries.push(value);
        index
    }

    /// 追加或复用一个字符串常量
    pub fn intern(
        &mut self,
        name: &str,
    ) -> u32 {
        if let Some(&index) = self.interned.get(name) {
            return index;
        }
        let index = self.add(Constant::String(name.to_string()));
        self.interned.insert(name.to_string(), index);
        index
    }

    pub fn get(
        &self,
        index: u32,
    ) -> Option<&Constant> {
        self.entries.get(index as usize)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Constant> {
        self.entries.iter()
    }

    pub fn into_vec(self) -> Vec<Constant> {
        self.entries
    }
}

/// 字节码缓冲区（指令序列 + 常量池）
#[derive(Debug, Clone, Default)]
pub struct BytecodeBuffer {
    instructions: Vec<Instruction>,
    constants: ConstantPool,
}

impl BytecodeBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加指令，返回其地址
    pub fn emit(
        &mut self,
        instr: Instruction,
    ) -> usize {
        self.instructions.push(instr);
        self.instructions.len() - 1
    }

    /// 下一条指令的地址
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn last(&self) -> Option<&Instruction> {
        self.instructions.last()
    }

    pub fn get(
        &self,
        addr: usize,
    ) -> Option<&Instruction> {
        self.instructions.get(addr)
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// 改写指令的某个操作数载荷（用于跳转回填）
    ///
    /// 地址越界返回 false。
    pub fn patch(
        &mut self,
        addr: usize,
        slot: OperandSlot,
        value: u32,
    ) -> bool {
        match self.instructions.get_mut(addr) {
            Some(instr) => {
                instr.operand_mut(slot).value = value;
                true
            }
            None => false,
        }
    }

    pub fn add_constant(
        &mut self,
        value: Constant,
    ) -> u32 {
        self.constants.add(value)
    }

    pub fn intern(
        &mut self,
        name: &str,
    ) -> u32 {
        self.constants.intern(name)
    }

    pub fn constants(&self) -> &ConstantPool {
        &self.constants
    }

    /// 取出指令与常量
    pub fn into_parts(self) -> (Vec<Instruction>, Vec<Constant>) {
        (self.instructions, self.constants.into_vec())
    }
}
