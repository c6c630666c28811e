//! Bytecode data types
//!
//! This module defines the output format of the translator: fixed-width
//! three-address instructions, tagged operands, the constant values they
//! reference, and the per-unit op array that bundles them. It is the
//! interface between the code generator and the (external) virtual machine.

use crate::frontend::ast::CastKind;
use crate::vm::opcode::Opcode;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Label for jump targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Label(pub u32);

impl Label {
    /// Create a new label
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the label id
    pub fn id(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for Label {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// Operand kind tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum OperandKind {
    /// Operand slot not used by this instruction
    #[default]
    Unused,
    /// Constant pool index
    Const,
    /// Named variable slot
    Var,
    /// Temporary value
    Temp,
    /// Resolved instruction address (jump target)
    Address,
}

/// A tagged 32-bit operand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Operand {
    pub kind: OperandKind,
    pub value: u32,
}

impl Operand {
    /// The unused operand
    pub const UNUSED: Operand = Operand {
        kind: OperandKind::Unused,
        value: 0,
    };

    /// Payload of an address operand whose label is not placed yet
    pub const UNRESOLVED: u32 = u32::MAX;

    #[inline]
    pub fn constant(index: u32) -> Self {
        Self {
            kind: OperandKind::Const,
            value: index,
        }
    }

    #[inline]
    pub fn var(slot: u32) -> Self {
        Self {
            kind: OperandKind::Var,
            value: slot,
        }
    }

    #[inline]
    pub fn temp(index: u32) -> Self {
        Self {
            kind: OperandKind::Temp,
            value: index,
        }
    }

    #[inline]
    pub fn address(addr: u32) -> Self {
        Self {
            kind: OperandKind::Address,
            value: addr,
        }
    }

    #[inline]
    pub fn is_unused(&self) -> bool {
        self.kind == OperandKind::Unused
    }

    #[inline]
    pub fn is_const(&self) -> bool {
        self.kind == OperandKind::Const
    }

    #[inline]
    pub fn is_var(&self) -> bool {
        self.kind == OperandKind::Var
    }

    #[inline]
    pub fn is_temp(&self) -> bool {
        self.kind == OperandKind::Temp
    }

    #[inline]
    pub fn is_address(&self) -> bool {
        self.kind == OperandKind::Address
    }
}

impl fmt::Display for Operand {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self.kind {
            OperandKind::Unused => write!(f, "_"),
            OperandKind::Const => write!(f, "#{}", self.value),
            OperandKind::Var => write!(f, "${}", self.value),
            OperandKind::Temp => write!(f, "~{}", self.value),
            OperandKind::Address if self.value == Operand::UNRESOLVED => write!(f, "@?"),
            OperandKind::Address => write!(f, "@{}", self.value),
        }
    }
}

/// Position of an operand inside an instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperandSlot {
    Op1,
    Op2,
    Result,
}

/// A single three-address instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub opcode: Opcode,
    pub op1: Operand,
    pub op2: Operand,
    pub result: Operand,
    /// Embedded tag: compound sub-opcode, argument count/position, fetch
    /// mode, by-ref flag, cast kind
    pub extended: u32,
}

impl Instruction {
    /// Create an instruction with every operand unused
    pub fn new(opcode: Opcode) -> Self {
        Self {
            opcode,
            op1: Operand::UNUSED,
            op2: Operand::UNUSED,
            result: Operand::UNUSED,
            extended: 0,
        }
    }

    pub fn with_op1(
        mut self,
        op: Operand,
    ) -> Self {
        self.op1 = op;
        self
    }

    pub fn with_op2(
        mut self,
        op: Operand,
    ) -> Self {
        self.op2 = op;
        self
    }

    pub fn with_result(
        mut self,
        op: Operand,
    ) -> Self {
        self.result = op;
        self
    }

    pub fn with_extended(
        mut self,
        extended: u32,
    ) -> Self {
        self.extended = extended;
        self
    }

    pub fn operand(
        &self,
        slot: OperandSlot,
    ) -> Operand {
        match slot {
            OperandSlot::Op1 => self.op1,
            OperandSlot::Op2 => self.op2,
            OperandSlot::Result => self.result,
        }
    }

    pub fn operand_mut(
        &mut self,
        slot: OperandSlot,
    ) -> &mut Operand {
        match slot {
            OperandSlot::Op1 => &mut self.op1,
            OperandSlot::Op2 => &mut self.op2,
            OperandSlot::Result => &mut self.result,
        }
    }

    /// Jump target carried by this instruction, if any
    pub fn jump_targets(&self) -> impl Iterator<Item = u32> + '_ {
        [self.op1, self.op2, self.result]
            .into_iter()
            .filter(|op| op.is_address())
            .map(|op| op.value)
    }
}

impl fmt::Display for Instruction {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(
            f,
            "{:<22} {:<6} {:<6}",
            self.opcode.name(),
            self.op1.to_string(),
            self.op2.to_string()
        )?;
        if !self.result.is_unused() {
            write!(f, " -> {}", self.result)?;
        }
        if self.extended != 0 {
            write!(f, " [{}]", self.extended)?;
        }
        Ok(())
    }
}

/// Constant pool value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constant {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    /// Ordered key/value pairs; keys are `Int` or `String`
    Array(Vec<(Constant, Constant)>),
    /// Object template (`new Foo(...)` in a parameter default)
    Object {
        class: String,
        args: Vec<Constant>,
    },
}

impl Constant {
    pub fn string(s: impl Into<String>) -> Self {
        Constant::String(s.into())
    }

    /// Runtime type name
    pub fn type_name(&self) -> &'static str {
        match self {
            Constant::Null => "null",
            Constant::Bool(_) => "bool",
            Constant::Int(_) => "int",
            Constant::Float(_) => "float",
            Constant::String(_) => "string",
            Constant::Array(_) => "array",
            Constant::Object { .. } => "object",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Constant::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Constant::Int(n) => Some(*n),
            _ => None,
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            Constant::Null => write!(f, "null"),
            Constant::Bool(b) => write!(f, "{}", b),
            Constant::Int(n) => write!(f, "{}", n),
            Constant::Float(x) => write!(f, "{:?}", x),
            Constant::String(s) => write!(f, "{:?}", s),
            Constant::Array(items) => {
                write!(f, "[")?;
                for (i, (k, v)) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} => {}", k, v)?;
                }
                write!(f, "]")
            }
            Constant::Object { class, args } => write!(f, "new {}({} args)", class, args.len()),
        }
    }
}

/// `FetchClass` / `FetchClassName` reference kind (stored in `extended`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u32)]
pub enum ClassFetchKind {
    SelfRef = 1,
    Parent = 2,
    Static = 3,
}

/// isset/empty mode (stored in `extended`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u32)]
pub enum IssetMode {
    Isset = 0,
    Empty = 1,
}

/// `extended` flag: the operand is taken by reference
pub const EXT_BY_REF: u32 = 1;

/// `extended` flag: op1 holds a variable name rather than the variable
/// (`isset($$name)`, `unset($$name)`)
pub const EXT_BY_NAME: u32 = 2;

/// Encode a cast kind for the `extended` field
pub fn cast_ext(kind: CastKind) -> u32 {
    kind as u32
}

/// A compiled unit: top-level script, function, method or closure body
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OpArray {
    pub instructions: Vec<Instruction>,
    pub constants: Vec<Constant>,
    /// Slot index → variable name
    pub var_names: Vec<String>,
    /// Number of temporaries allocated
    pub temp_count: u32,
}

impl OpArray {
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Slot of a named variable
    pub fn slot_of(
        &self,
        name: &str,
    ) -> Option<u32> {
        self.var_names
            .iter()
            .position(|n| n == name)
            .map(|i| i as u32)
    }

    /// Constant referenced by an operand
    pub fn constant(
        &self,
        op: Operand,
    ) -> Option<&Constant> {
        if op.is_const() {
            self.constants.get(op.value as usize)
        } else {
            None
        }
    }

    /// Instructions with the given opcode
    pub fn find(
        &self,
        opcode: Opcode,
    ) -> impl Iterator<Item = (usize, &Instruction)> + '_ {
        self.instructions
            .iter()
            .enumerate()
            .filter(move |(_, i)| i.opcode == opcode)
    }

    /// Number of instructions with the given opcode
    pub fn count(
        &self,
        opcode: Opcode,
    ) -> usize {
        self.find(opcode).count()
    }
}

impl fmt::Display for OpArray {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        for (addr, instr) in self.instructions.iter().enumerate() {
            writeln!(f, "{:04} {}", addr, instr)?;
        }
        if !self.constants.is_empty() {
            writeln!(f, "constants:")?;
            for (i, c) in self.constants.iter().enumerate() {
                writeln!(f, "  #{} = {}", i, c)?;
            }
        }
        if !self.var_names.is_empty() {
            writeln!(f, "vars:")?;
            for (i, name) in self.var_names.iter().enumerate() {
                writeln!(f, "  ${} = ${}", i, name)?;
            }
        }
        Ok(())
    }
}
