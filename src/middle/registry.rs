//! 函数 / 类注册表
//!
//! 由调用方持有，以 `&mut Registry` 注入翻译器。键为小写名称，
//! 保持注册顺序。内建条目不可被用户声明覆盖。
//! 运行时的方法解析不在这里：注册表只保存描述符。

use crate::middle::codegen::bytecode::Constant;
use crate::middle::decl::{ClassDecl, FunctionDecl};
use indexmap::IndexMap;
use std::collections::HashSet;
use thiserror::Error;
use tracing::debug;

/// 注册错误
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RegistryError {
    #[error("Cannot redeclare {kind} {name}")]
    Duplicate { kind: &'static str, name: String },

    #[error("Cannot redeclare built-in {kind} {name}")]
    Builtin { kind: &'static str, name: String },
}

#[derive(Debug, Clone)]
struct Entry<T> {
    decl: T,
    builtin: bool,
}

/// 注册表
#[derive(Debug, Clone, Default)]
pub struct Registry {
    functions: IndexMap<String, Entry<FunctionDecl>>,
    classes: IndexMap<String, Entry<ClassDecl>>,
}

/// 规范化的查找键
fn key_of(name: &str) -> String {
    name.trim_start_matches('\\').to_ascii_lowercase()
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert<T>(
        table: &mut IndexMap<String, Entry<T>>,
        kind: &'static str,
        name: &str,
        decl: T,
        builtin: bool,
    ) -> Result<(), RegistryError> {
        let key = key_of(name);
        if let Some(existing) = table.get(&key) {
            let name = name.to_string();
            return Err(if existing.builtin {
                RegistryError::Builtin { kind, name }
            } else {
                RegistryError::Duplicate { kind, name }
            });
        }
        table.insert(key, Entry { decl, builtin });
        Ok(())
    }

    // 函数
    pub fn register_function(
        &mut self,
        decl: FunctionDecl,
    ) -> Result<(), RegistryError> {
        debug!("register function {}", decl.name);
        let name = decl.name.clone();
        Self::insert(&mut self.functions, "function", &name, decl, false)
    }

    pub fn register_builtin_function(
        &mut self,
        decl: FunctionDecl,
    ) -> Result<(), RegistryError> {
        let name = decl.name.clone();
        Self::insert(&mut self.functions, "function", &name, decl, true)
    }

    pub fn function(
        &self,
        name: &str,
    ) -> Option<&FunctionDecl> {
        self.functions.get(&key_of(name)).map(|e| &e.decl)
    }

    pub fn is_builtin_function(
        &self,
        name: &str,
    ) -> bool {
        self.functions
            .get(&key_of(name))
            .is_some_and(|e| e.builtin)
    }

    /// 按注册顺序列出函数
    pub fn functions(&self) -> impl Iterator<Item = &FunctionDecl> {
        self.functions.values().map(|e| &e.decl)
    }

    // 类
    pub fn register_class(
        &mut self,
        decl: ClassDecl,
    ) -> Result<(), RegistryError> {
        debug!("register {} {}", decl.kind_name(), decl.name);
        let name = decl.name.clone();
        let kind = decl.kind_name();
        Self::insert(&mut self.classes, kind, &name, decl, false)
    }

    pub fn register_builtin_class(
        &mut self,
        decl: ClassDecl,
    ) -> Result<(), RegistryError> {
        let name = decl.name.clone();
        let kind = decl.kind_name();
        Self::insert(&mut self.classes, kind, &name, decl, true)
    }

    pub fn class(
        &self,
        name: &str,
    ) -> Option<&ClassDecl> {
        self.classes.get(&key_of(name)).map(|e| &e.decl)
    }

    pub fn is_builtin_class(
        &self,
        name: &str,
    ) -> bool {
        self.classes.get(&key_of(name)).is_some_and(|e| e.builtin)
    }

    /// 按注册顺序列出类、接口、trait、枚举
    pub fn classes(&self) -> impl Iterator<Item = &ClassDecl> {
        self.classes.values().map(|e| &e.decl)
    }

    /// 类常量（依次查找类本身、父类链、接口）
    pub fn class_constant(
        &self,
        class: &str,
        name: &str,
    ) -> Option<&Constant> {
        let mut pending = vec![class.to_string()];
        let mut seen = HashSet::new();
        while let Some(current) = pending.pop() {
            if !seen.insert(key_of(&current)) {
                continue;
            }
            let Some(decl) = self.class(&current) else {
                continue;
            };
            if let Some(constant) = decl.constants.get(name) {
                return Some(&constant.value);
            }
            pending.extend(decl.interfaces.iter().rev().cloned());
            if let Some(parent) = &decl.parent {
                pending.push(parent.clone());
            }
        }
        None
    }

    /// 类自身声明（或经 trait 组合得到）的方法
    pub fn method(
        &self,
        class: &str,
        method: &str,
    ) -> Option<&FunctionDecl> {
        self.class(class)?.method(method)
    }
}
