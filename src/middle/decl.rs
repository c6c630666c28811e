//! 声明描述符与声明构建器
//!
//! 函数、方法、闭包的编译结果收集为 `FunctionDecl`；类、接口、trait、枚举
//! 收集为 `ClassDecl`。类体翻译期间，当前类上下文位于 `DeclarationBuilder`
//! 的栈顶（匿名类可以嵌套在方法体内），成员都挂到栈顶的描述符上。
//!
//! trait 组合直接 `clone` trait 已编译的方法/属性描述符，每个使用者
//! 拥有独立的指令与常量缓冲区。

use crate::frontend::ast::{ClassKind, ClassModifiers, TraitAdaptation, Visibility};
use crate::middle::codegen::bytecode::{Constant, OpArray};
use crate::middle::codegen::error::{CompileError, CompileResult};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// 形参描述
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamDecl {
    pub name: String,
    pub type_hint: Option<String>,
    pub by_ref: bool,
    pub variadic: bool,
    /// 编译期求值的默认值
    pub default: Option<Constant>,
    /// 构造函数属性提升
    pub promoted: Option<Visibility>,
}

impl ParamDecl {
    pub fn new(name: &str) -> Self {
        ParamDecl {
            name: name.to_string(),
            type_hint: None,
            by_ref: false,
            variadic: false,
            default: None,
            promoted: None,
        }
    }

    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }
}

/// 闭包捕获的外部变量
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureDecl {
    pub name: String,
    pub by_ref: bool,
}

/// 函数 / 方法 / 闭包描述符
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDecl {
    /// 闭包为 `{closure}`
    pub name: String,
    pub params: Vec<ParamDecl>,
    pub op_array: OpArray,
    pub return_type: Option<String>,
    pub by_ref_return: bool,
    /// 函数体含有 yield
    pub is_generator: bool,
    pub visibility: Visibility,
    pub is_static: bool,
    pub is_abstract: bool,
    pub is_final: bool,
    pub captures: Vec<CaptureDecl>,
    /// static 变量及其初值
    pub static_vars: IndexMap<String, Constant>,
}

impl FunctionDecl {
    pub fn new(name: &str) -> Self {
        FunctionDecl {
            name: name.to_string(),
            params: Vec::new(),
            op_array: OpArray::default(),
            return_type: None,
            by_ref_return: false,
            is_generator: false,
            visibility: Visibility::Public,
            is_static: false,
            is_abstract: false,
            is_final: false,
            captures: Vec::new(),
            static_vars: IndexMap::new(),
        }
    }

    pub fn param(
        &self,
        name: &str,
    ) -> Option<&ParamDecl> {
        self.params.iter().find(|p| p.name == name)
    }

    /// 没有默认值、非可变参数的形参个数
    pub fn required_params(&self) -> usize {
        self.params
            .iter()
            .filter(|p| !p.has_default() && !p.variadic)
            .count()
    }
}

/// 属性描述符
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDecl {
    pub name: String,
    /// None 表示类型化属性未初始化
    pub default: Option<Constant>,
    pub type_hint: Option<String>,
    pub visibility: Visibility,
    pub is_static: bool,
    pub is_readonly: bool,
}

impl PropertyDecl {
    pub fn new(name: &str) -> Self {
        PropertyDecl {
            name: name.to_string(),
            default: Some(Constant::Null),
            type_hint: None,
            visibility: Visibility::Public,
            is_static: false,
            is_readonly: false,
        }
    }

    /// trait 组合时同名属性是否兼容
    pub fn compatible_with(
        &self,
        other: &PropertyDecl,
    ) -> bool {
        self.visibility == other.visibility
            && self.is_static == other.is_static
            && self.is_readonly == other.is_readonly
            && self.type_hint == other.type_hint
            && self.default == other.default
    }
}

/// 类常量描述符
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassConstDecl {
    pub name: String,
    pub value: Constant,
    pub type_hint: Option<String>,
    pub visibility: Visibility,
    pub is_final: bool,
    pub is_enum_case: bool,
}

impl ClassConstDecl {
    pub fn new(
        name: &str,
        value: Constant,
    ) -> Self {
        ClassConstDecl {
            name: name.to_string(),
            value,
            type_hint: None,
            visibility: Visibility::Public,
            is_final: false,
            is_enum_case: false,
        }
    }
}

/// 类 / 接口 / trait / 枚举描述符
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassDecl {
    pub name: String,
    pub kind: ClassKind,
    pub modifiers: ClassModifiers,
    pub parent: Option<String>,
    pub interfaces: Vec<String>,
    pub properties: IndexMap<String, PropertyDecl>,
    /// 键为小写方法名
    pub methods: IndexMap<String, FunctionDecl>,
    pub constants: IndexMap<String, ClassConstDecl>,
    pub enum_cases: Vec<String>,
    pub backing_type: Option<String>,
    pub traits: Vec<String>,
    pub is_anonymous: bool,
}

impl ClassDecl {
    pub fn new(
        name: &str,
        kind: ClassKind,
    ) -> Self {
        ClassDecl {
            name: name.to_string(),
            kind,
            modifiers: ClassModifiers::default(),
            parent: None,
            interfaces: Vec::new(),
            properties: IndexMap::new(),
            methods: IndexMap::new(),
            constants: IndexMap::new(),
            enum_cases: Vec::new(),
            backing_type: None,
            traits: Vec::new(),
            is_anonymous: false,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            ClassKind::Class => "class",
            ClassKind::Interface => "interface",
            ClassKind::Trait => "trait",
            ClassKind::Enum => "enum",
        }
    }

    pub fn is_trait(&self) -> bool {
        self.kind == ClassKind::Trait
    }

    pub fn method(
        &self,
        name: &str,
    ) -> Option<&FunctionDecl> {
        self.methods.get(&name.to_ascii_lowercase())
    }

    pub fn add_method(
        &mut self,
        method: FunctionDecl,
    ) -> CompileResult<()> {
        let key = method.name.to_ascii_lowercase();
        if self.methods.contains_key(&key) {
            return Err(CompileError::redeclaration(
                "method",
                format!("{}::{}()", self.name, method.name),
            ));
        }
        self.methods.insert(key, method);
        Ok(())
    }

    pub fn add_property(
        &mut self,
        property: PropertyDecl,
    ) -> CompileResult<()> {
        if self.properties.contains_key(&property.name) {
            return Err(CompileError::redeclaration(
                "property",
                format!("{}::${}", self.name, property.name),
            ));
        }
        self.properties.insert(property.name.clone(), property);
        Ok(())
    }

    pub fn add_constant(
        &mut self,
        constant: ClassConstDecl,
    ) -> CompileResult<()> {
        if self.constants.contains_key(&constant.name) {
            let kind = if constant.is_enum_case {
                "enum case"
            } else {
                "constant"
            };
            return Err(CompileError::redeclaration(
                kind,
                format!("{}::{}", self.name, constant.name),
            ));
        }
        if constant.is_enum_case {
            self.enum_cases.push(constant.name.clone());
        }
        self.constants.insert(constant.name.clone(), constant);
        Ok(())
    }

    /// 组合 trait
    ///
    /// 调用前类自身的方法、属性必须已经加入：类自身的（非抽象）方法优先于
    /// trait 方法。`traits` 与 `use` 子句中的顺序一致。
    pub fn apply_traits(
        &mut self,
        traits: &[ClassDecl],
        adaptations: &[TraitAdaptation],
    ) -> CompileResult<()> {
        let find_trait = |name: &str| -> CompileResult<&ClassDecl> {
            traits
                .iter()
                .find(|t| t.name.eq_ignore_ascii_case(name.trim_start_matches('\\')))
                .ok_or_else(|| {
                    CompileError::structural(format!(
                        "Required trait {} wasn't added to {}",
                        name, self.name
                    ))
                })
        };

        // insteadof 排除的 (trait, 方法)
        let mut excluded: HashSet<(String, String)> = HashSet::new();
        for adaptation in adaptations {
            if let TraitAdaptation::Precedence {
                trait_name,
                method,
                insteadof,
            } = adaptation
            {
                let winner = find_trait(trait_name)?;
                if winner.method(method).is_none() {
                    return Err(CompileError::structural(format!(
                        "A precedence rule was defined for {}::{} but this method does not exist",
                        winner.name, method
                    )));
                }
                for loser in insteadof {
                    let loser = find_trait(loser)?;
                    excluded.insert((
                        loser.name.to_ascii_lowercase(),
                        method.to_ascii_lowercase(),
                    ));
                }
            }
        }

        // 候选方法：小写名 → (来源 trait, 描述符)
        let mut imported: IndexMap<String, (String, FunctionDecl)> = IndexMap::new();
        for t in traits {
            let trait_key = t.name.to_ascii_lowercase();
            for (key, method) in &t.methods {
                if excluded.contains(&(trait_key.clone(), key.clone())) {
                    continue;
                }
                match imported.get(key) {
                    None => {
                        imported.insert(key.clone(), (t.name.clone(), method.clone()));
                    }
                    Some(_) if method.is_abstract => {}
                    Some((_, existing)) if existing.is_abstract => {
                        imported.insert(key.clone(), (t.name.clone(), method.clone()));
                    }
                    Some(_) if self.overrides(key) => {}
                    Some((other, _)) => {
                        return Err(CompileError::structural(format!(
                            "Trait method {}::{} has not been applied as {}::{}, because of collision with {}::{}",
                            t.name, method.name, self.name, method.name, other, method.name
                        )));
                    }
                }
            }
        }

        // as：别名与可见性修改
        let mut aliases: Vec<FunctionDecl> = Vec::new();
        for adaptation in adaptations {
            let TraitAdaptation::Alias {
                trait_name,
                method,
                alias,
                visibility,
            } = adaptation
            else {
                continue;
            };
            let source = match trait_name {
                Some(name) => find_trait(name)?.method(method).ok_or_else(|| {
                    CompileError::structural(format!(
                        "An alias was defined for {}::{} but this method does not exist",
                        name, method
                    ))
                })?,
                None => {
                    let owners: Vec<&ClassDecl> =
                        traits.iter().filter(|t| t.method(method).is_some()).collect();
                    match owners.as_slice() {
                        [only] => only.method(method).ok_or_else(|| {
                            CompileError::internal("trait method vanished during aliasing")
                        })?,
                        [] => {
                            return Err(CompileError::structural(format!(
                                "An alias ({}) was defined for method {}(), but this method does not exist",
                                alias.as_deref().unwrap_or(method),
                                method
                            )))
                        }
                        [first, second, ..] => {
                            return Err(CompileError::structural(format!(
                                "An alias was defined for method {}(), which exists in both {} and {}. Use {}::{} or {}::{} to resolve the ambiguity",
                                method, first.name, second.name, first.name, method, second.name, method
                            )))
                        }
                    }
                }
            };
            match alias {
                Some(alias) => {
                    let mut copy = source.clone();
                    copy.name = alias.clone();
                    if let Some(v) = visibility {
                        copy.visibility = *v;
                    }
                    aliases.push(copy);
                }
                None => {
                    if let (Some(v), Some((_, imported))) =
                        (visibility, imported.get_mut(&method.to_ascii_lowercase()))
                    {
                        imported.visibility = *v;
                    }
                }
            }
        }

        let incoming = imported
            .into_values()
            .map(|(_, m)| m)
            .chain(aliases);
        for method in incoming {
            let key = method.name.to_ascii_lowercase();
            if self.overrides(&key) {
                continue;
            }
            self.methods.insert(key, method);
        }

        for t in traits {
            for (name, property) in &t.properties {
                match self.properties.get(name) {
                    Some(existing) if existing.compatible_with(property) => {}
                    Some(_) => {
                        return Err(CompileError::structural(format!(
                            "{} and {} define the same property (${}) in the composition of {}. However, the definition differs and is considered incompatible",
                            self.name, t.name, name, self.name
                        )));
                    }
                    None => {
                        self.properties.insert(name.clone(), property.clone());
                    }
                }
            }
            for (name, constant) in &t.constants {
                match self.constants.get(name) {
                    Some(existing) if existing.value == constant.value => {}
                    Some(_) => {
                        return Err(CompileError::structural(format!(
                            "{} and {} define the same constant ({}) in the composition of {}. However, the definition differs and is considered incompatible",
                            self.name, t.name, name, self.name
                        )));
                    }
                    None => {
                        self.constants.insert(name.clone(), constant.clone());
                    }
                }
            }
            self.traits.push(t.name.clone());
        }
        Ok(())
    }

    /// 类自身有同名的非抽象方法
    fn overrides(
        &self,
        key: &str,
    ) -> bool {
        self.methods.get(key).is_some_and(|m| !m.is_abstract)
    }

    /// 类体结束时的检查
    pub fn validate(&self) -> CompileResult<()> {
        if self.kind == ClassKind::Class && !self.modifiers.is_abstract {
            if let Some(method) = self.methods.values().find(|m| m.is_abstract) {
                return Err(CompileError::structural(format!(
                    "Class {} contains abstract method ({}) and must therefore be declared abstract",
                    self.name, method.name
                )));
            }
        }
        if self.kind == ClassKind::Enum {
            if let Some(property) = self.properties.values().next() {
                return Err(CompileError::structural(format!(
                    "Enum {} cannot include properties (${})",
                    self.name, property.name
                )));
            }
        }
        Ok(())
    }
}

/// 声明构建器：类上下文栈
#[derive(Debug, Default)]
pub struct DeclarationBuilder {
    classes: Vec<ClassDecl>,
}

impl DeclarationBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter_class(
        &mut self,
        decl: ClassDecl,
    ) {
        self.classes.push(decl);
    }

    pub fn current(&self) -> Option<&ClassDecl> {
        self.classes.last()
    }

    pub fn current_mut(&mut self) -> CompileResult<&mut ClassDecl> {
        self.classes
            .last_mut()
            .ok_or_else(|| CompileError::internal("no class context is active"))
    }

    pub fn in_class(&self) -> bool {
        !self.classes.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.classes.len()
    }

    pub fn add_method(
        &mut self,
        method: FunctionDecl,
    ) -> CompileResult<()> {
        self.current_mut()?.add_method(method)
    }

    pub fn add_property(
        &mut self,
        property: PropertyDecl,
    ) -> CompileResult<()> {
        self.current_mut()?.add_property(property)
    }

    pub fn add_constant(
        &mut self,
        constant: ClassConstDecl,
    ) -> CompileResult<()> {
        self.current_mut()?.add_constant(constant)
    }

    /// 枚举 case 作为类常量，值为回退值或 case 名
    pub fn add_enum_case(
        &mut self,
        name: &str,
        value: Option<Constant>,
    ) -> CompileResult<()> {
        let mut constant =
            ClassConstDecl::new(name, value.unwrap_or_else(|| Constant::string(name)));
        constant.is_enum_case = true;
        constant.is_final = true;
        self.current_mut()?.add_constant(constant)
    }

    /// 离开类体，返回校验后的描述符
    pub fn leave_class(&mut self) -> CompileResult<ClassDecl> {
        let decl = self
            .classes
            .pop()
            .ok_or_else(|| CompileError::internal("class context stack underflow"))?;
        decl.validate()?;
        Ok(decl)
    }
}
