//! Const求值错误

use thiserror::Error;

/// Const求值错误
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConstEvalError {
    /// 除零
    #[error("Division by zero")]
    DivisionByZero,

    /// 取模除零
    #[error("Modulo by zero")]
    ModuloByZero,

    /// 负数位移
    #[error("Bit shift by negative number")]
    NegativeShift,

    /// 常量上下文中出现非常量表达式
    #[error("Constant expression contains invalid operations: {construct}")]
    NonConstant { construct: String },

    /// 未定义的全局常量
    #[error("Undefined constant \"{name}\"")]
    UndefinedConstant { name: String },

    /// 未定义的类常量
    #[error("Undefined constant {class}::{name}")]
    UndefinedClassConstant { class: String, name: String },

    /// 未知的类
    #[error("Class \"{name}\" not found")]
    UnknownClass { name: String },

    /// 类作用域之外使用 self/parent
    #[error("Cannot use \"{keyword}\" when no class scope is active")]
    NoClassScope { keyword: &'static str },

    /// 类没有父类时使用 parent
    #[error("Cannot use \"parent\" when current class scope has no parent")]
    NoParent,

    /// 编译期常量中使用 static::
    #[error("\"static::\" is not allowed in compile-time constants")]
    StaticReference,

    /// 非数字字符串参与算术
    #[error("Unsupported operand types: {left} {op} {right}")]
    UnsupportedOperands {
        op: String,
        left: &'static str,
        right: &'static str,
    },

    /// 非法数组键
    #[error("Illegal offset type: {ty}")]
    IllegalOffset { ty: &'static str },

    /// 下一个整数键溢出
    #[error("Cannot add element to the array as the next element is already occupied")]
    ArrayFull,

    /// 数组键不存在
    #[error("Undefined array key {key}")]
    UndefinedKey { key: String },

    /// 字符串偏移越界
    #[error("Uninitialized string offset {offset}")]
    StringOffset { offset: i64 },

    /// 对非数组/字符串取下标
    #[error("Cannot use a scalar value of type {ty} as an array")]
    NotIndexable { ty: &'static str },

    /// 值不满足声明的类型
    #[error("Cannot use {found} as value of type {expected}")]
    TypeMismatch { expected: String, found: &'static str },

    /// 未知运算符
    #[error("Unknown operator `{op}` in constant expression")]
    UnknownOperator { op: String },

    /// 递归过深
    #[error("Constant expression nested too deeply: depth {depth} exceeds {max_depth}")]
    RecursionTooDeep { depth: usize, max_depth: usize },
}
