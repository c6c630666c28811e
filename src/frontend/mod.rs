//! Frontend data consumed by the translator
//!
//! The syntax tree comes from an external parser; this module only defines it
//! and evaluates the constant expressions the translator must fold.

pub mod ast;
pub mod const_eval;
