//! 语法树定义
//!
//! 解析器（外部组件）产出的语法树。翻译器只读取它，不做修改。
//! 所有节点都实现 serde，前端可以把语法树以 JSON 形式交给翻译器。
//!
//! 运算符以源码中的记号文本保存（如 `"+"`、`"??="`），由翻译器查表映射为操作码。

use serde::{Deserialize, Serialize};

/// 语句块
pub type Block = Vec<Stmt>;

/// 一个完整的编译单元
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Program {
    pub statements: Vec<Stmt>,
}

impl Program {
    pub fn new(statements: Vec<Stmt>) -> Self {
        Self { statements }
    }
}

/// 语句
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Stmt {
    /// 表达式语句
    Expr(Expr),
    /// echo a, b;
    Echo(Vec<Expr>),
    /// 模板外的原样文本
    InlineHtml(String),
    Return(Option<Expr>),
    If {
        condition: Expr,
        then_branch: Block,
        elseif_branches: Vec<(Expr, Block)>,
        else_branch: Option<Block>,
        /// `if (): ... endif;`
        alternative: bool,
    },
    While {
        condition: Expr,
        body: Block,
        alternative: bool,
    },
    DoWhile {
        body: Block,
        condition: Expr,
    },
    For {
        init: Vec<Expr>,
        condition: Vec<Expr>,
        update: Vec<Expr>,
        body: Block,
        alternative: bool,
    },
    Foreach {
        subject: Expr,
        key: Option<Expr>,
        /// 变量、属性、数组元素或 list 解构
        value: Expr,
        by_ref: bool,
        body: Block,
        alternative: bool,
    },
    Switch {
        subject: Expr,
        cases: Vec<SwitchCase>,
        alternative: bool,
    },
    /// break N;（None 表示 1）
    Break(Option<u32>),
    Continue(Option<u32>),
    Block(Block),
    Try {
        body: Block,
        catches: Vec<CatchClause>,
        finally: Option<Block>,
    },
    Throw(Expr),
    Global(Vec<String>),
    Static(Vec<StaticVar>),
    Unset(Vec<Expr>),
    /// 顶层 const A = 1, B = 2;
    Const(Vec<ConstDecl>),
    Function(FunctionDef),
    Class(ClassDef),
    Goto(String),
    Label(String),
    Nop,
}

/// 表达式
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    /// 插值字符串 "a $b c"
    Interpolated(Vec<Expr>),
    Array(Vec<ArrayItem>),
    /// $name（不含 `$`）
    Variable(String),
    /// $$expr
    VariableVariable(Box<Expr>),
    /// 裸标识符：true / false / null / FOO
    Constant(String),
    MagicConst(MagicConst),
    Binary {
        op: String,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: String,
        operand: Box<Expr>,
    },
    /// `=`、`+=`、`??=` ...
    Assign {
        op: String,
        target: Box<Expr>,
        value: Box<Expr>,
    },
    /// $a = &$b
    AssignRef {
        target: Box<Expr>,
        source: Box<Expr>,
    },
    IncDec {
        increment: bool,
        prefix: bool,
        target: Box<Expr>,
    },
    /// `then` 为 None 时是短三元 `a ?: b`
    Ternary {
        condition: Box<Expr>,
        then: Option<Box<Expr>>,
        otherwise: Box<Expr>,
    },
    /// $a[k]；index 为 None 表示 `$a[]`
    ArrayDim {
        array: Box<Expr>,
        index: Option<Box<Expr>>,
    },
    Property {
        object: Box<Expr>,
        property: Member,
        nullsafe: bool,
    },
    StaticProperty {
        class: ClassRef,
        property: String,
    },
    ClassConst {
        class: ClassRef,
        name: String,
    },
    Call {
        callee: Callee,
        args: Vec<Arg>,
    },
    MethodCall {
        object: Box<Expr>,
        method: Member,
        args: Vec<Arg>,
        nullsafe: bool,
    },
    StaticCall {
        class: ClassRef,
        method: Member,
        args: Vec<Arg>,
    },
    New {
        class: ClassRef,
        args: Vec<Arg>,
    },
    /// list(...) / [...] 解构目标；None 表示跳过的位置
    List(Vec<Option<ListItem>>),
    Isset(Vec<Expr>),
    Empty(Box<Expr>),
    Cast {
        kind: CastKind,
        expr: Box<Expr>,
    },
    InstanceOf {
        expr: Box<Expr>,
        class: ClassRef,
    },
    Clone(Box<Expr>),
    Print(Box<Expr>),
    Exit(Option<Box<Expr>>),
    Include {
        kind: IncludeKind,
        expr: Box<Expr>,
    },
    /// @expr
    Silence(Box<Expr>),
    Yield {
        key: Option<Box<Expr>>,
        value: Option<Box<Expr>>,
    },
    YieldFrom(Box<Expr>),
    /// PHP 8 throw 表达式
    Throw(Box<Expr>),
    Closure(ClosureDef),
    ArrowFunction(ArrowFunctionDef),
    Match {
        subject: Box<Expr>,
        arms: Vec<MatchArm>,
    },
}

impl Expr {
    /// 便捷构造：变量
    pub fn var(name: &str) -> Self {
        Expr::Variable(name.to_string())
    }

    /// 便捷构造：字符串字面量
    pub fn string(s: &str) -> Self {
        Expr::String(s.to_string())
    }

    /// 便捷构造：二元运算
    pub fn binary(
        op: &str,
        left: Expr,
        right: Expr,
    ) -> Self {
        Expr::Binary {
            op: op.to_string(),
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// 便捷构造：赋值
    pub fn assign(
        target: Expr,
        value: Expr,
    ) -> Self {
        Expr::Assign {
            op: "=".to_string(),
            target: Box::new(target),
            value: Box::new(value),
        }
    }

    /// 便捷构造：按名称调用函数
    pub fn call(
        name: &str,
        args: Vec<Expr>,
    ) -> Self {
        Expr::Call {
            callee: Callee::Name(name.to_string()),
            args: args.into_iter().map(Arg::positional).collect(),
        }
    }

    /// 节点种类名称（用于诊断）
    pub fn kind_name(&self) -> &'static str {
        match self {
            Expr::Null | Expr::Bool(_) | Expr::Int(_) | Expr::Float(_) | Expr::String(_) => {
                "literal"
            }
            Expr::Interpolated(_) => "interpolated string",
            Expr::Array(_) => "array literal",
            Expr::Variable(_) => "variable",
            Expr::VariableVariable(_) => "variable variable",
            Expr::Constant(_) => "constant",
            Expr::MagicConst(_) => "magic constant",
            Expr::Binary { .. } => "binary operation",
            Expr::Unary { .. } => "unary operation",
            Expr::Assign { .. } => "assignment",
            Expr::AssignRef { .. } => "reference assignment",
            Expr::IncDec { .. } => "increment/decrement",
            Expr::Ternary { .. } => "ternary",
            Expr::ArrayDim { .. } => "array access",
            Expr::Property { .. } => "property access",
            Expr::StaticProperty { .. } => "static property access",
            Expr::ClassConst { .. } => "class constant",
            Expr::Call { .. } => "function call",
            Expr::MethodCall { .. } => "method call",
            Expr::StaticCall { .. } => "static method call",
            Expr::New { .. } => "new",
            Expr::List(_) => "list()",
            Expr::Isset(_) => "isset",
            Expr::Empty(_) => "empty",
            Expr::Cast { .. } => "cast",
            Expr::InstanceOf { .. } => "instanceof",
            Expr::Clone(_) => "clone",
            Expr::Print(_) => "print",
            Expr::Exit(_) => "exit",
            Expr::Include { .. } => "include",
            Expr::Silence(_) => "@",
            Expr::Yield { .. } => "yield",
            Expr::YieldFrom(_) => "yield from",
            Expr::Throw(_) => "throw",
            Expr::Closure(_) => "closure",
            Expr::ArrowFunction(_) => "arrow function",
            Expr::Match { .. } => "match",
        }
    }
}

/// 魔术常量（编译期可解析的部分）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MagicConst {
    Class,
    Function,
    Method,
    Trait,
}

/// 类引用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClassRef {
    Named(String),
    SelfRef,
    Parent,
    Static,
    /// $className::...
    Dynamic(Box<Expr>),
    /// new class { ... }
    Anonymous(Box<ClassDef>),
}

/// 属性名或方法名
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Member {
    Name(String),
    Dynamic(Box<Expr>),
}

impl Member {
    pub fn name(name: &str) -> Self {
        Member::Name(name.to_string())
    }
}

/// 被调用者
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Callee {
    Name(String),
    Expr(Box<Expr>),
}

/// 调用实参
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Arg {
    pub value: Expr,
    /// 命名参数
    pub name: Option<String>,
    /// ...$args
    pub spread: bool,
}

impl Arg {
    pub fn positional(value: Expr) -> Self {
        Arg {
            value,
            name: None,
            spread: false,
        }
    }
}

/// 数组字面量元素
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayItem {
    pub key: Option<Expr>,
    pub value: Expr,
    pub by_ref: bool,
    pub spread: bool,
}

impl ArrayItem {
    pub fn value(value: Expr) -> Self {
        ArrayItem {
            key: None,
            value,
            by_ref: false,
            spread: false,
        }
    }

    pub fn keyed(
        key: Expr,
        value: Expr,
    ) -> Self {
        ArrayItem {
            key: Some(key),
            value,
            by_ref: false,
            spread: false,
        }
    }
}

/// 解构元素
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListItem {
    pub key: Option<Expr>,
    pub target: Expr,
    pub by_ref: bool,
}

impl ListItem {
    pub fn target(target: Expr) -> Self {
        ListItem {
            key: None,
            target,
            by_ref: false,
        }
    }
}

/// 类型转换种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u32)]
pub enum CastKind {
    Int = 0,
    Float = 1,
    String = 2,
    Bool = 3,
    Array = 4,
    Object = 5,
    Unset = 6,
}

/// include/require/eval 种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u32)]
pub enum IncludeKind {
    Include = 0,
    IncludeOnce = 1,
    Require = 2,
    RequireOnce = 3,
    Eval = 4,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchCase {
    /// None 表示 default
    pub condition: Option<Expr>,
    pub body: Block,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchArm {
    /// None 表示 default
    pub conditions: Option<Vec<Expr>>,
    pub body: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatchClause {
    /// catch (A | B $e)
    pub types: Vec<String>,
    /// PHP 8 允许省略变量
    pub variable: Option<String>,
    pub body: Block,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticVar {
    pub name: String,
    pub default: Option<Expr>,
}

/// 常量声明（顶层 const 与类常量共用）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstDecl {
    pub name: String,
    pub value: Expr,
    /// PHP 8.3 类型化常量
    pub type_hint: Option<String>,
    pub visibility: Visibility,
    pub is_final: bool,
}

impl ConstDecl {
    pub fn new(
        name: &str,
        value: Expr,
    ) -> Self {
        ConstDecl {
            name: name.to_string(),
            value,
            type_hint: None,
            visibility: Visibility::Public,
            is_final: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Visibility {
    #[default]
    Public,
    Protected,
    Private,
}

/// 形参
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub type_hint: Option<String>,
    pub default: Option<Expr>,
    pub by_ref: bool,
    pub variadic: bool,
    /// 构造函数属性提升
    pub promote: Option<Visibility>,
}

impl Param {
    pub fn new(name: &str) -> Self {
        Param {
            name: name.to_string(),
            type_hint: None,
            default: None,
            by_ref: false,
            variadic: false,
            promote: None,
        }
    }
}

/// 具名函数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDef {
    pub name: String,
    pub params: Vec<Param>,
    pub body: Block,
    pub by_ref_return: bool,
    pub return_type: Option<String>,
}

/// 闭包 function () use (...) {}
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosureDef {
    pub params: Vec<Param>,
    pub uses: Vec<ClosureUse>,
    pub body: Block,
    pub by_ref_return: bool,
    pub is_static: bool,
    pub return_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosureUse {
    pub name: String,
    pub by_ref: bool,
}

/// 箭头函数 fn ($x) => expr
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrowFunctionDef {
    pub params: Vec<Param>,
    pub body: Box<Expr>,
    pub by_ref_return: bool,
    pub is_static: bool,
    pub return_type: Option<String>,
}

/// 类、接口、trait、枚举
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClassKind {
    Class,
    Interface,
    Trait,
    Enum,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClassModifiers {
    pub is_abstract: bool,
    pub is_final: bool,
    pub is_readonly: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassDef {
    /// 匿名类为空字符串
    pub name: String,
    pub kind: ClassKind,
    pub modifiers: ClassModifiers,
    pub extends: Option<String>,
    /// 类的 implements 列表；接口的 extends 列表
    pub implements: Vec<String>,
    /// 回退枚举的底层类型（int / string）
    pub backing_type: Option<String>,
    pub members: Vec<ClassMember>,
}

impl ClassDef {
    pub fn new(
        name: &str,
        kind: ClassKind,
    ) -> Self {
        ClassDef {
            name: name.to_string(),
            kind,
            modifiers: ClassModifiers::default(),
            extends: None,
            implements: Vec::new(),
            backing_type: None,
            members: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClassMember {
    Property(PropertyDef),
    Method(MethodDef),
    Const(ConstDecl),
    TraitUse(TraitUse),
    EnumCase(EnumCase),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDef {
    pub name: String,
    pub default: Option<Expr>,
    pub type_hint: Option<String>,
    pub visibility: Visibility,
    pub is_static: bool,
    pub is_readonly: bool,
}

impl PropertyDef {
    pub fn new(name: &str) -> Self {
        PropertyDef {
            name: name.to_string(),
            default: None,
            type_hint: None,
            visibility: Visibility::Public,
            is_static: false,
            is_readonly: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodDef {
    pub name: String,
    pub params: Vec<Param>,
    /// 抽象方法与接口方法没有方法体
    pub body: Option<Block>,
    pub visibility: Visibility,
    pub is_static: bool,
    pub is_abstract: bool,
    pub is_final: bool,
    pub by_ref_return: bool,
    pub return_type: Option<String>,
}

impl MethodDef {
    pub fn new(
        name: &str,
        params: Vec<Param>,
        body: Block,
    ) -> Self {
        MethodDef {
            name: name.to_string(),
            params,
            body: Some(body),
            visibility: Visibility::Public,
            is_static: false,
            is_abstract: false,
            is_final: false,
            by_ref_return: false,
            return_type: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraitUse {
    pub traits: Vec<String>,
    pub adaptations: Vec<TraitAdaptation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TraitAdaptation {
    /// A::foo insteadof B, C;
    Precedence {
        trait_name: String,
        method: String,
        insteadof: Vec<String>,
    },
    /// [A::]foo as [visibility] [alias];
    Alias {
        trait_name: Option<String>,
        method: String,
        alias: Option<String>,
        visibility: Option<Visibility>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumCase {
    pub name: String,
    pub value: Option<Expr>,
}
