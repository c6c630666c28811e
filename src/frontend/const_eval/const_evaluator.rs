//! Const求值引擎
//!
//! 在编译期求值常量表达式（类常量、类型化常量、属性默认值、参数默认值、
//! static 变量初值、全局 const、回退枚举的 case 值），支持：
//! - 字面量、数组字面量（含键、常量数组展开）
//! - 算术 / 位 / 比较 / 逻辑 / 字符串连接运算
//! - 三元、短三元、空合并
//! - 内建常量与已声明的全局常量
//! - `self::X`、`parent::X`、`Other::X`、`Foo::class`
//! - 常量数组下标
//! - 参数默认值中的 `new Foo(...)`
//! - 递归深度限制

use super::error::ConstEvalError;
use super::value;
use crate::frontend::ast::{ArrayItem, ClassRef, Expr, MagicConst};
use crate::middle::codegen::bytecode::Constant;
use crate::middle::decl::ClassConstDecl;
use crate::middle::registry::Registry;
use indexmap::IndexMap;

/// 正在声明的类（常量求值时 `self::` 的指向）
#[derive(Debug, Clone, Copy)]
pub struct ClassFrame<'a> {
    pub name: &'a str,
    pub parent: Option<&'a str>,
    pub interfaces: &'a [String],
    pub is_trait: bool,
    /// 到目前为止已求值的常量
    pub constants: &'a IndexMap<String, ClassConstDecl>,
}

/// Const求值环境
#[derive(Debug, Clone)]
pub struct ConstEvalEnv<'a> {
    globals: Option<&'a IndexMap<String, Constant>>,
    registry: Option<&'a Registry>,
    class: Option<ClassFrame<'a>>,
    function: Option<&'a str>,
    allow_new: bool,
    /// 最大递归深度
    max_depth: usize,
}

impl Default for ConstEvalEnv<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> ConstEvalEnv<'a> {
    /// 创建新的求值环境
    pub fn new() -> Self {
        ConstEvalEnv {
            globals: None,
            registry: None,
            class: None,
            function: None,
            allow_new: false,
            max_depth: 256,
        }
    }

    /// 设置最大递归深度
    pub fn with_max_depth(
        mut self,
        max_depth: usize,
    ) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// 已声明的全局常量
    pub fn with_globals(
        mut self,
        globals: &'a IndexMap<String, Constant>,
    ) -> Self {
        self.globals = Some(globals);
        self
    }

    /// 用于 `Other::X` 的注册表
    pub fn with_registry(
        mut self,
        registry: &'a Registry,
    ) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_class(
        mut self,
        frame: ClassFrame<'a>,
    ) -> Self {
        self.class = Some(frame);
        self
    }

    /// 当前函数名（`__FUNCTION__` / `__METHOD__`）
    pub fn with_function(
        mut self,
        name: &'a str,
    ) -> Self {
        self.function = Some(name);
        self
    }

    /// 允许 `new Foo(...)`（仅参数默认值）
    pub fn allow_new(
        mut self,
        allow: bool,
    ) -> Self {
        self.allow_new = allow;
        self
    }
}

/// 内建常量
pub fn builtin_constant(name: &str) -> Option<Constant> {
    let value = match name {
        "PHP_INT_MAX" => Constant::Int(i64::MAX),
        "PHP_INT_MIN" => Constant::Int(i64::MIN),
        "PHP_INT_SIZE" => Constant::Int(8),
        "PHP_FLOAT_EPSILON" => Constant::Float(f64::EPSILON),
        "PHP_FLOAT_MAX" => Constant::Float(f64::MAX),
        "PHP_FLOAT_MIN" => Constant::Float(f64::MIN_POSITIVE),
        "PHP_FLOAT_DIG" => Constant::Int(15),
        "PHP_EOL" => Constant::string("\n"),
        "M_PI" => Constant::Float(std::f64::consts::PI),
        "M_E" => Constant::Float(std::f64::consts::E),
        "NAN" => Constant::Float(f64::NAN),
        "INF" => Constant::Float(f64::INFINITY),
        "E_ERROR" => Constant::Int(1),
        "E_WARNING" => Constant::Int(2),
        "E_NOTICE" => Constant::Int(8),
        "E_DEPRECATED" => Constant::Int(8192),
        "E_ALL" => Constant::Int(32767),
        _ => {
            return match name.to_ascii_lowercase().as_str() {
                "true" => Some(Constant::Bool(true)),
                "false" => Some(Constant::Bool(false)),
                "null" => Some(Constant::Null),
                _ => None,
            }
        }
    };
    Some(value)
}

/// 类常量引用的目标
enum ClassTarget<'n> {
    Current,
    Named(&'n str),
}

/// Const求值器
pub struct ConstEvaluator<'a> {
    /// 求值环境
    env: ConstEvalEnv<'a>,
}

impl Default for ConstEvaluator<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> ConstEvaluator<'a> {
    /// 创建新的Const求值器
    pub fn new() -> Self {
        ConstEvaluator {
            env: ConstEvalEnv::new(),
        }
    }

    /// 创建新的Const求值器（带环境）
    pub fn with_env(env: ConstEvalEnv<'a>) -> Self {
        ConstEvaluator { env }
    }

    /// 求值Const表达式
    pub fn evaluate(
        &self,
        expr: &Expr,
    ) -> Result<Constant, ConstEvalError> {
        self.eval(expr, 0)
    }

    /// 求值并按声明类型检查
    pub fn evaluate_typed(
        &self,
        expr: &Expr,
        declared: Option<&str>,
    ) -> Result<Constant, ConstEvalError> {
        let value = self.evaluate(expr)?;
        match declared {
            Some(ty) => value::check_declared_type(ty, value),
            None => Ok(value),
        }
    }

    fn eval(
        &self,
        expr: &Expr,
        depth: usize,
    ) -> Result<Constant, ConstEvalError> {
        // 检查递归深度
        if depth > self.env.max_depth {
            return Err(ConstEvalError::RecursionTooDeep {
                depth,
                max_depth: self.env.max_depth,
            });
        }

        match expr {
            Expr::Null => Ok(Constant::Null),
            Expr::Bool(b) => Ok(Constant::Bool(*b)),
            Expr::Int(n) => Ok(Constant::Int(*n)),
            Expr::Float(x) => Ok(Constant::Float(*x)),
            Expr::String(s) => Ok(Constant::String(s.clone())),
            Expr::Interpolated(parts) => {
                let mut out = String::new();
                for part in parts {
                    let v = self.eval(part, depth + 1)?;
                    out.push_str(&value::to_php_string(&v)?);
                }
                Ok(Constant::String(out))
            }
            Expr::Array(items) => self.eval_array(items, depth),
            Expr::Constant(name) => self.lookup_constant(name),
            Expr::MagicConst(magic) => self.magic_constant(*magic),
            Expr::Binary { op, left, right } => self.eval_binary(op, left, right, depth),
            Expr::Unary { op, operand } => {
                let v = self.eval(operand, depth + 1)?;
                match op.as_str() {
                    // -x 即 x * -1（PHP_INT_MIN 取反溢出为浮点）
                    "-" => value::arithmetic("*", &v, &Constant::Int(-1)),
                    "+" => value::arithmetic("*", &v, &Constant::Int(1)),
                    "!" => Ok(Constant::Bool(!value::to_bool(&v))),
                    "~" => value::bitwise_not(&v),
                    _ => Err(ConstEvalError::UnknownOperator { op: op.clone() }),
                }
            }
            Expr::Ternary {
                condition,
                then,
                otherwise,
            } => {
                let cond = self.eval(condition, depth + 1)?;
                match then {
                    Some(then) if value::to_bool(&cond) => self.eval(then, depth + 1),
                    None if value::to_bool(&cond) => Ok(cond),
                    _ => self.eval(otherwise, depth + 1),
                }
            }
            Expr::ArrayDim {
                array,
                index: Some(index),
            } => {
                let base = self.eval(array, depth + 1)?;
                let key = self.eval(index, depth + 1)?;
                match fetch_dim(&base, &key)? {
                    Some(v) => Ok(v),
                    None => Err(ConstEvalError::UndefinedKey {
                        key: value::to_php_string(&key)?,
                    }),
                }
            }
            Expr::ClassConst { class, name } => self.class_constant(class, name),
            Expr::New { class, args } if self.env.allow_new => {
                let class = match class {
                    ClassRef::Named(name) => name.trim_start_matches('\\').to_string(),
                    ClassRef::SelfRef => self.current_frame("self")?.name.to_string(),
                    _ => {
                        return Err(ConstEvalError::NonConstant {
                            construct: "new with a non-literal class".to_string(),
                        })
                    }
                };
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    if arg.spread || arg.name.is_some() {
                        return Err(ConstEvalError::NonConstant {
                            construct: "named or unpacked constructor argument".to_string(),
                        });
                    }
                    values.push(self.eval(&arg.value, depth + 1)?);
                }
                Ok(Constant::Object {
                    class,
                    args: values,
                })
            }
            other => Err(ConstEvalError::NonConstant {
                construct: other.kind_name().to_string(),
            }),
        }
    }

    fn eval_array(
        &self,
        items: &[ArrayItem],
        depth: usize,
    ) -> Result<Constant, ConstEvalError> {
        let mut entries: Vec<(Constant, Constant)> = Vec::with_capacity(items.len());
        for item in items {
            if item.by_ref {
                return Err(ConstEvalError::NonConstant {
                    construct: "reference in array literal".to_string(),
                });
            }
            let v = self.eval(&item.value, depth + 1)?;
            if item.spread {
                // 整数键重新编号，字符串键保留
                let Constant::Array(spread) = v else {
                    return Err(ConstEvalError::TypeMismatch {
                        expected: "array".to_string(),
                        found: v.type_name(),
                    });
                };
                for (k, v) in spread {
                    match k {
                        Constant::Int(_) => {
                            let next = value::next_index(&entries)?;
                            entries.push((Constant::Int(next), v));
                        }
                        key => value::array_insert(&mut entries, key, v),
                    }
                }
                continue;
            }
            let key = match &item.key {
                Some(key) => value::normalize_key(&self.eval(key, depth + 1)?)?,
                None => Constant::Int(value::next_index(&entries)?),
            };
            value::array_insert(&mut entries, key, v);
        }
        Ok(Constant::Array(entries))
    }

    fn eval_binary(
        &self,
        op: &str,
        left: &Expr,
        right: &Expr,
        depth: usize,
    ) -> Result<Constant, ConstEvalError> {
        match op {
            "&&" | "and" => {
                let l = value::to_bool(&self.eval(left, depth + 1)?);
                Ok(Constant::Bool(l && value::to_bool(&self.eval(right, depth + 1)?)))
            }
            "||" | "or" => {
                let l = value::to_bool(&self.eval(left, depth + 1)?);
                Ok(Constant::Bool(l || value::to_bool(&self.eval(right, depth + 1)?)))
            }
            "??" => match self.eval_coalesce_operand(left, depth + 1)? {
                Some(v) if v != Constant::Null => Ok(v),
                _ => self.eval(right, depth + 1),
            },
            _ => {
                let l = self.eval(left, depth + 1)?;
                let r = self.eval(right, depth + 1)?;
                match op {
                    "+" | "-" | "*" | "/" | "%" | "**" => value::arithmetic(op, &l, &r),
                    "&" | "|" | "^" | "<<" | ">>" => value::bitwise(op, &l, &r),
                    "." => Ok(Constant::String(
                        value::to_php_string(&l)? + &value::to_php_string(&r)?,
                    )),
                    "xor" => Ok(Constant::Bool(value::to_bool(&l) ^ value::to_bool(&r))),
                    _ => value::comparison(op, &l, &r),
                }
            }
        }
    }

    /// `??` 的左侧：缺失的数组键视为 null
    fn eval_coalesce_operand(
        &self,
        expr: &Expr,
        depth: usize,
    ) -> Result<Option<Constant>, ConstEvalError> {
        match expr {
            Expr::ArrayDim {
                array,
                index: Some(index),
            } => {
                let Some(base) = self.eval_coalesce_operand(array, depth + 1)? else {
                    return Ok(None);
                };
                if base == Constant::Null {
                    return Ok(None);
                }
                let key = self.eval(index, depth + 1)?;
                fetch_dim(&base, &key)
            }
            _ => self.eval(expr, depth).map(Some),
        }
    }

    fn lookup_constant(
        &self,
        name: &str,
    ) -> Result<Constant, ConstEvalError> {
        let name = name.trim_start_matches('\\');
        if let Some(v) = builtin_constant(name) {
            return Ok(v);
        }
        if let Some(globals) = self.env.globals {
            if let Some(v) = globals.get(name) {
                return Ok(v.clone());
            }
            // 命名空间内的非限定常量回退到全局
            if let Some((_, short)) = name.rsplit_once('\\') {
                if let Some(v) = builtin_constant(short).or_else(|| globals.get(short).cloned()) {
                    return Ok(v);
                }
            }
        }
        Err(ConstEvalError::UndefinedConstant {
            name: name.to_string(),
        })
    }

    fn magic_constant(
        &self,
        magic: MagicConst,
    ) -> Result<Constant, ConstEvalError> {
        let frame = self.env.class;
        let value = match magic {
            MagicConst::Class => match frame {
                Some(f) if f.is_trait => {
                    return Err(ConstEvalError::NonConstant {
                        construct: "__CLASS__ inside a trait".to_string(),
                    })
                }
                Some(f) => f.name.to_string(),
                None => String::new(),
            },
            MagicConst::Trait => match frame {
                Some(f) if f.is_trait => f.name.to_string(),
                _ => String::new(),
            },
            MagicConst::Function => self.env.function.unwrap_or_default().to_string(),
            MagicConst::Method => match (frame, self.env.function) {
                (Some(f), Some(func)) => format!("{}::{}", f.name, func),
                (Some(f), None) => f.name.to_string(),
                (None, func) => func.unwrap_or_default().to_string(),
            },
        };
        Ok(Constant::String(value))
    }

    fn current_frame(
        &self,
        keyword: &'static str,
    ) -> Result<ClassFrame<'a>, ConstEvalError> {
        self.env
            .class
            .ok_or(ConstEvalError::NoClassScope { keyword })
    }

    fn class_constant(
        &self,
        class: &ClassRef,
        name: &str,
    ) -> Result<Constant, ConstEvalError> {
        let target = match class {
            ClassRef::SelfRef => {
                self.current_frame("self")?;
                ClassTarget::Current
            }
            ClassRef::Parent => {
                let frame = self.current_frame("parent")?;
                ClassTarget::Named(frame.parent.ok_or(ConstEvalError::NoParent)?)
            }
            ClassRef::Static => return Err(ConstEvalError::StaticReference),
            ClassRef::Named(n) => {
                let n = n.trim_start_matches('\\');
                match self.env.class {
                    Some(f) if f.name.eq_ignore_ascii_case(n) => ClassTarget::Current,
                    _ => ClassTarget::Named(n),
                }
            }
            ClassRef::Dynamic(_) | ClassRef::Anonymous(_) => {
                return Err(ConstEvalError::NonConstant {
                    construct: "dynamic class reference".to_string(),
                })
            }
        };

        if name.eq_ignore_ascii_case("class") {
            return match target {
                ClassTarget::Current => {
                    let frame = self.current_frame("self")?;
                    if frame.is_trait {
                        return Err(ConstEvalError::NonConstant {
                            construct: "self::class inside a trait".to_string(),
                        });
                    }
                    Ok(Constant::string(frame.name))
                }
                ClassTarget::Named(n) => Ok(Constant::string(n)),
            };
        }

        match target {
            ClassTarget::Current => {
                let frame = self.current_frame("self")?;
                if let Some(decl) = frame.constants.get(name) {
                    return Ok(decl.value.clone());
                }
                let inherited = frame
                    .parent
                    .into_iter()
                    .chain(frame.interfaces.iter().map(String::as_str))
                    .find_map(|owner| self.registry_constant(owner, name).ok());
                inherited.ok_or_else(|| ConstEvalError::UndefinedClassConstant {
                    class: frame.name.to_string(),
                    name: name.to_string(),
                })
            }
            ClassTarget::Named(n) => self.registry_constant(n, name),
        }
    }

    fn registry_constant(
        &self,
        class: &str,
        name: &str,
    ) -> Result<Constant, ConstEvalError> {
        let registry = self.env.registry.ok_or_else(|| ConstEvalError::UnknownClass {
            name: class.to_string(),
        })?;
        if registry.class(class).is_none() {
            return Err(ConstEvalError::UnknownClass {
                name: class.to_string(),
            });
        }
        registry
            .class_constant(class, name)
            .cloned()
            .ok_or_else(|| ConstEvalError::UndefinedClassConstant {
                class: class.to_string(),
                name: name.to_string(),
            })
    }
}

/// 常量下标取值；键不存在返回 None
fn fetch_dim(
    base: &Constant,
    key: &Constant,
) -> Result<Option<Constant>, ConstEvalError> {
    match base {
        Constant::Array(items) => {
            let key = value::normalize_key(key)?;
            Ok(value::array_get(items, &key).cloned())
        }
        Constant::String(s) => {
            let offset = match value::normalize_key(key)? {
                Constant::Int(n) => n,
                _ => {
                    return Err(ConstEvalError::IllegalOffset { ty: "string" });
                }
            };
            let bytes = s.as_bytes();
            let index = if offset < 0 {
                bytes.len() as i64 + offset
            } else {
                offset
            };
            if index < 0 || index >= bytes.len() as i64 {
                return Err(ConstEvalError::StringOffset { offset });
            }
            let byte = bytes[index as usize];
            Ok(Some(Constant::String(
                String::from_utf8_lossy(&[byte]).into_owned(),
            )))
        }
        Constant::Null => Ok(None),
        other => Err(ConstEvalError::NotIndexable {
            ty: other.type_name(),
        }),
    }
}
