//! Virtual machine instruction set
//!
//! The translator only emits opcodes; executing them is out of scope.

pub mod opcode;

pub use opcode::Opcode;
