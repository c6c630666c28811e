//! Const求值模块
//!
//! 编译期常量表达式求值：类常量、属性/参数默认值、static 变量初值、
//! 全局 const 与回退枚举的 case 值都必须在翻译时得到确定的值。

pub mod const_evaluator;
pub mod error;
pub mod value;


// 导出主要类型
pub use const_evaluator::{builtin_constant, ClassFrame, ConstEvalEnv, ConstEvaluator};

// 导出错误类型
pub use error::ConstEvalError;
