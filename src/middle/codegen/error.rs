//! 代码生成错误
//!
//! 第一个错误即中止整个编译单元，不产出部分字节码。

use crate::frontend::const_eval::ConstEvalError;
use crate::middle::registry::RegistryError;
use thiserror::Error;

/// 代码生成错误
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CompileError {
    /// 语法树中存在翻译器不支持的结构
    #[error("Unsupported construct: {construct}")]
    Unsupported { construct: String },

    /// 结构性误用（循环外 break、读上下文中的 `[]` 等）
    #[error("{message}")]
    Structural { message: String },

    /// 重复声明（方法、属性、常量、参数）
    #[error("Cannot redeclare {kind} {name}")]
    Redeclaration { kind: &'static str, name: String },

    /// 未知运算符记号
    #[error("Unknown operator `{op}`")]
    UnknownOperator { op: String },

    /// 常量求值失败
    #[error(transparent)]
    ConstEval(#[from] ConstEvalError),

    /// 注册表拒绝（重复的函数/类，覆盖内建）
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// 翻译器内部不变量被破坏
    #[error("Internal compiler error: {message}")]
    Internal { message: String },

    /// 附带所在声明的错误
    #[error("{kind} {name}: {source}")]
    InDeclaration {
        kind: &'static str,
        name: String,
        source: Box<CompileError>,
    },
}

/// 代码生成结果
pub type CompileResult<T> = Result<T, CompileError>;

impl CompileError {
    pub fn unsupported(construct: impl Into<String>) -> Self {
        CompileError::Unsupported {
            construct: construct.into(),
        }
    }

    pub fn structural(message: impl Into<String>) -> Self {
        CompileError::Structural {
            message: message.into(),
        }
    }

    pub fn redeclaration(
        kind: &'static str,
        name: impl Into<String>,
    ) -> Self {
        CompileError::Redeclaration {
            kind,
            name: name.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        CompileError::Internal {
            message: message.into(),
        }
    }

    /// 标注所在声明；只有最内层的声明会被记录
    pub fn in_declaration(
        self,
        kind: &'static str,
        name: impl Into<String>,
    ) -> Self {
        match self {
            CompileError::InDeclaration { .. } => self,
            other => CompileError::InDeclaration {
                kind,
                name: name.into(),
                source: Box::new(other),
            },
        }
    }

    /// 去掉声明标注后的错误
    pub fn root(&self) -> &CompileError {
        match self {
            CompileError::InDeclaration { source, .. } => source.root(),
            other => other,
        }
    }

    /// 所在声明的名称
    pub fn declaration(&self) -> Option<&str> {
        match self {
            CompileError::InDeclaration { name, .. } => Some(name),
            _ => None,
        }
    }

    pub fn is_structural(&self) -> bool {
        matches!(self.root(), CompileError::Structural { .. })
    }

    /// 本地重复声明或注册表拒绝的重复注册
    pub fn is_redeclaration(&self) -> bool {
        matches!(
            self.root(),
            CompileError::Redeclaration { .. } | CompileError::Registry(_)
        )
    }
}
