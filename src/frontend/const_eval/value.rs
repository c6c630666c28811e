//! 常量值语义
//!
//! 编译期求值必须与运行时的结果一致：数字字符串、整数溢出提升为浮点、
//! 浮点数的字符串形式、数组键规范化、宽松/严格比较都在这里实现。

use super::error::ConstEvalError;
use crate::middle::codegen::bytecode::Constant;
use std::cmp::Ordering;

/// 算术运算的数值
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    pub fn as_f64(self) -> f64 {
        match self {
            Number::Int(n) => n as f64,
            Number::Float(x) => x,
        }
    }

    pub fn into_constant(self) -> Constant {
        match self {
            Number::Int(n) => Constant::Int(n),
            Number::Float(x) => Constant::Float(x),
        }
    }
}

// ===== 类型转换 =====

/// 转换为布尔值
pub fn to_bool(value: &Constant) -> bool {
    match value {
        Constant::Null => false,
        Constant::Bool(b) => *b,
        Constant::Int(n) => *n != 0,
        Constant::Float(x) => *x != 0.0,
        Constant::String(s) => !(s.is_empty() || s == "0"),
        Constant::Array(items) => !items.is_empty(),
        Constant::Object { .. } => true,
    }
}

/// 转换为字符串（与运行时的字符串转换一致）
pub fn to_php_string(value: &Constant) -> Result<String, ConstEvalError> {
    Ok(match value {
        Constant::Null | Constant::Bool(false) => String::new(),
        Constant::Bool(true) => "1".to_string(),
        Constant::Int(n) => n.to_string(),
        Constant::Float(x) => format_float(*x),
        Constant::String(s) => s.clone(),
        Constant::Array(_) => "Array".to_string(),
        Constant::Object { .. } => {
            return Err(ConstEvalError::TypeMismatch {
                expected: "string".to_string(),
                found: "object",
            })
        }
    })
}

/// 浮点数的字符串形式
///
/// 最短往返表示；十进制小数点位置超出 [-3, 15] 时使用 `1.5E+20` 形式，
/// 整数值不带小数部分。
pub fn format_float(x: f64) -> String {
    if x.is_nan() {
        return "NAN".to_string();
    }
    if x.is_infinite() {
        return if x > 0.0 { "INF" } else { "-INF" }.to_string();
    }
    if x == 0.0 {
        return if x.is_sign_negative() { "-0" } else { "0" }.to_string();
    }

    let sci = format!("{:e}", x.abs());
    let (mantissa, exp) = match sci.split_once('e') {
        Some((m, e)) => (m, e.parse::<i32>().unwrap_or(0)),
        None => (sci.as_str(), 0),
    };
    let digits: String = mantissa.chars().filter(|c| *c != '.').collect();
    let decpt = exp + 1;

    let mut out = String::new();
    if x < 0.0 {
        out.push('-');
    }
    if !(-3..=15).contains(&decpt) {
        out.push_str(&digits[..1]);
        out.push('.');
        if digits.len() > 1 {
            out.push_str(&digits[1..]);
        } else {
            out.push('0');
        }
        out.push('E');
        out.push(if exp < 0 { '-' } else { '+' });
        out.push_str(&exp.abs().to_string());
    } else if decpt <= 0 {
        out.push_str("0.");
        out.push_str(&"0".repeat((-decpt) as usize));
        out.push_str(&digits);
    } else if decpt as usize >= digits.len() {
        out.push_str(&digits);
        out.push_str(&"0".repeat(decpt as usize - digits.len()));
    } else {
        out.push_str(&digits[..decpt as usize]);
        out.push('.');
        out.push_str(&digits[decpt as usize..]);
    }
    out
}

fn is_ws(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | b'\r' | 0x0b | 0x0c)
}

/// 从字符串开头扫描一个数字，返回数值和结束位置
fn scan_number(s: &str) -> Option<(Number, usize)> {
    let bytes = s.as_bytes();
    let len = bytes.len();
    let mut i = 0;
    while i < len && is_ws(bytes[i]) {
        i += 1;
    }
    let start = i;
    if i < len && (bytes[i] == b'+' || bytes[i] == b'-') {
        i += 1;
    }
    let int_start = i;
    while i < len && bytes[i].is_ascii_digit() {
        i += 1;
    }
    let int_digits = i - int_start;
    let mut frac_digits = 0;
    let mut is_float = false;
    if i < len && bytes[i] == b'.' {
        let save = i;
        i += 1;
        let frac_start = i;
        while i < len && bytes[i].is_ascii_digit() {
            i += 1;
        }
        frac_digits = i - frac_start;
        if int_digits == 0 && frac_digits == 0 {
            i = save;
        } else {
            is_float = true;
        }
    }
    if int_digits == 0 && frac_digits == 0 {
        return None;
    }
    if i < len && (bytes[i] == b'e' || bytes[i] == b'E') {
        let save = i;
        i += 1;
        if i < len && (bytes[i] == b'+' || bytes[i] == b'-') {
            i += 1;
        }
        let exp_start = i;
        while i < len && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if i == exp_start {
            i = save;
        } else {
            is_float = true;
        }
    }

    let text = &s[start..i];
    let number = if is_float {
        Number::Float(text.parse().ok()?)
    } else {
        match text.parse::<i64>() {
            Ok(n) => Number::Int(n),
            Err(_) => Number::Float(text.parse().ok()?),
        }
    };
    Some((number, i))
}

/// 整个字符串是否为数字字符串（允许首尾空白）
pub fn parse_numeric(s: &str) -> Option<Number> {
    let (number, end) = scan_number(s)?;
    if s.as_bytes()[end..].iter().all(|b| is_ws(*b)) {
        Some(number)
    } else {
        None
    }
}

fn float_to_int(x: f64) -> i64 {
    if x.is_finite() && x >= i64::MIN as f64 && x < i64::MAX as f64 {
        x as i64
    } else {
        0
    }
}

fn to_number(
    value: &Constant,
    op: &str,
    left: &Constant,
    right: &Constant,
) -> Result<Number, ConstEvalError> {
    let unsupported = || ConstEvalError::UnsupportedOperands {
        op: op.to_string(),
        left: left.type_name(),
        right: right.type_name(),
    };
    match value {
        Constant::Null => Ok(Number::Int(0)),
        Constant::Bool(b) => Ok(Number::Int(*b as i64)),
        Constant::Int(n) => Ok(Number::Int(*n)),
        Constant::Float(x) => Ok(Number::Float(*x)),
        // 前缀数字（"12abc"）按前缀取值，完全非数字时报错
        Constant::String(s) => scan_number(s).map(|(n, _)| n).ok_or_else(unsupported),
        Constant::Array(_) | Constant::Object { .. } => Err(unsupported()),
    }
}

fn to_int_operand(
    value: &Constant,
    op: &str,
    left: &Constant,
    right: &Constant,
) -> Result<i64, ConstEvalError> {
    Ok(match to_number(value, op, left, right)? {
        Number::Int(n) => n,
        Number::Float(x) => float_to_int(x),
    })
}

// ===== 数组 =====

/// 规范化数组键
pub fn normalize_key(key: &Constant) -> Result<Constant, ConstEvalError> {
    match key {
        Constant::Int(_) => Ok(key.clone()),
        Constant::String(s) => Ok(match canonical_int(s) {
            Some(n) => Constant::Int(n),
            None => key.clone(),
        }),
        Constant::Bool(b) => Ok(Constant::Int(*b as i64)),
        Constant::Float(x) => Ok(Constant::Int(float_to_int(x.trunc()))),
        Constant::Null => Ok(Constant::String(String::new())),
        Constant::Array(_) | Constant::Object { .. } => Err(ConstEvalError::IllegalOffset {
            ty: key.type_name(),
        }),
    }
}

/// "0"、"-12" 这类十进制整数字符串（不含前导零、正号）
fn canonical_int(s: &str) -> Option<i64> {
    let digits = s.strip_prefix('-').unwrap_or(s);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if digits.len() > 1 && digits.starts_with('0') {
        return None;
    }
    if s == "-0" {
        return None;
    }
    s.parse().ok()
}

/// 按（已规范化的）键查找
pub fn array_get<'a>(
    items: &'a [(Constant, Constant)],
    key: &Constant,
) -> Option<&'a Constant> {
    items.iter().find(|(k, _)| k == key).map(|(_, v)| v)
}

/// 写入元素；键已存在时原位覆盖
pub fn array_insert(
    items: &mut Vec<(Constant, Constant)>,
    key: Constant,
    value: Constant,
) {
    match items.iter_mut().find(|(k, _)| *k == key) {
        Some(entry) => entry.1 = value,
        None => items.push((key, value)),
    }
}

/// 下一个自动整数键
pub fn next_index(items: &[(Constant, Constant)]) -> Result<i64, ConstEvalError> {
    match items.iter().filter_map(|(k, _)| k.as_int()).max() {
        Some(max) => max.checked_add(1).ok_or(ConstEvalError::ArrayFull),
        None => Ok(0),
    }
}

// ===== 运算 =====

/// 算术运算：+ - * / % **
pub fn arithmetic(
    op: &str,
    left: &Constant,
    right: &Constant,
) -> Result<Constant, ConstEvalError> {
    if op == "+" {
        if let (Constant::Array(l), Constant::Array(r)) = (left, right) {
            let mut items = l.clone();
            for (k, v) in r {
                if array_get(&items, k).is_none() {
                    items.push((k.clone(), v.clone()));
                }
            }
            return Ok(Constant::Array(items));
        }
    }

    if op == "%" {
        let a = to_int_operand(left, op, left, right)?;
        let b = to_int_operand(right, op, left, right)?;
        if b == 0 {
            return Err(ConstEvalError::ModuloByZero);
        }
        return Ok(Constant::Int(a.checked_rem(b).unwrap_or(0)));
    }

    let a = to_number(left, op, left, right)?;
    let b = to_number(right, op, left, right)?;
    let result = match (op, a, b) {
        ("+", Number::Int(x), Number::Int(y)) => {
            x.checked_add(y).map(Number::Int).unwrap_or(Number::Float(x as f64 + y as f64))
        }
        ("-", Number::Int(x), Number::Int(y)) => {
            x.checked_sub(y).map(Number::Int).unwrap_or(Number::Float(x as f64 - y as f64))
        }
        ("*", Number::Int(x), Number::Int(y)) => {
            x.checked_mul(y).map(Number::Int).unwrap_or(Number::Float(x as f64 * y as f64))
        }
        ("+", _, _) => Number::Float(a.as_f64() + b.as_f64()),
        ("-", _, _) => Number::Float(a.as_f64() - b.as_f64()),
        ("*", _, _) => Number::Float(a.as_f64() * b.as_f64()),
        ("/", _, _) => {
            if b.as_f64() == 0.0 {
                return Err(ConstEvalError::DivisionByZero);
            }
            match (a, b) {
                (Number::Int(x), Number::Int(y)) if x.checked_rem(y) == Some(0) => {
                    x.checked_div(y).map(Number::Int).unwrap_or(Number::Float(x as f64 / y as f64))
                }
                _ => Number::Float(a.as_f64() / b.as_f64()),
            }
        }
        ("**", Number::Int(x), Number::Int(y)) if y >= 0 => int_pow(x, y)
            .map(Number::Int)
            .unwrap_or(Number::Float((x as f64).powf(y as f64))),
        ("**", _, _) => Number::Float(a.as_f64().powf(b.as_f64())),
        _ => {
            return Err(ConstEvalError::UnknownOperator { op: op.to_string() });
        }
    };
    Ok(result.into_constant())
}

fn int_pow(
    base: i64,
    exp: i64,
) -> Option<i64> {
    let mut result: i64 = 1;
    let mut base = base;
    let mut exp = exp;
    while exp > 0 {
        if exp & 1 == 1 {
            result = result.checked_mul(base)?;
        }
        exp >>= 1;
        if exp > 0 {
            base = base.checked_mul(base)?;
        }
    }
    Some(result)
}

/// 位运算：& | ^ << >>
pub fn bitwise(
    op: &str,
    left: &Constant,
    right: &Constant,
) -> Result<Constant, ConstEvalError> {
    if let (Constant::String(l), Constant::String(r)) = (left, right) {
        if matches!(op, "&" | "|" | "^") {
            return bytewise(op, l.as_bytes(), r.as_bytes());
        }
    }

    let a = to_int_operand(left, op, left, right)?;
    let b = to_int_operand(right, op, left, right)?;
    let n = match op {
        "&" => a & b,
        "|" => a | b,
        "^" => a ^ b,
        "<<" | ">>" if b < 0 => return Err(ConstEvalError::NegativeShift),
        "<<" if b >= 64 => 0,
        "<<" => a.wrapping_shl(b as u32),
        ">>" if b >= 64 => {
            if a < 0 {
                -1
            } else {
                0
            }
        }
        ">>" => a >> b,
        _ => return Err(ConstEvalError::UnknownOperator { op: op.to_string() }),
    };
    Ok(Constant::Int(n))
}

fn bytewise(
    op: &str,
    l: &[u8],
    r: &[u8],
) -> Result<Constant, ConstEvalError> {
    let bytes: Vec<u8> = match op {
        "|" => {
            let (long, short) = if l.len() >= r.len() { (l, r) } else { (r, l) };
            long.iter()
                .enumerate()
                .map(|(i, b)| b | short.get(i).copied().unwrap_or(0))
                .collect()
        }
        "&" => l.iter().zip(r).map(|(a, b)| a & b).collect(),
        _ => l.iter().zip(r).map(|(a, b)| a ^ b).collect(),
    };
    String::from_utf8(bytes)
        .map(Constant::String)
        .map_err(|_| ConstEvalError::NonConstant {
            construct: "bitwise operation producing a binary string".to_string(),
        })
}

/// 按位取反
pub fn bitwise_not(value: &Constant) -> Result<Constant, ConstEvalError> {
    match value {
        Constant::Int(n) => Ok(Constant::Int(!n)),
        Constant::Float(x) => Ok(Constant::Int(!float_to_int(*x))),
        _ => Err(ConstEvalError::TypeMismatch {
            expected: "int".to_string(),
            found: value.type_name(),
        }),
    }
}

// ===== 比较 =====

fn compare_numbers(
    a: Number,
    b: Number,
) -> Option<Ordering> {
    match (a, b) {
        (Number::Int(x), Number::Int(y)) => Some(x.cmp(&y)),
        _ => a.as_f64().partial_cmp(&b.as_f64()),
    }
}

fn number_of(value: &Constant) -> Option<Number> {
    match value {
        Constant::Int(n) => Some(Number::Int(*n)),
        Constant::Float(x) => Some(Number::Float(*x)),
        _ => None,
    }
}

/// 宽松比较；None 表示不可比较（NAN、键集不同的数组）
pub fn loose_compare(
    a: &Constant,
    b: &Constant,
) -> Option<Ordering> {
    use Constant::*;
    match (a, b) {
        (Null, Null) => Some(Ordering::Equal),
        (Bool(_), _) | (_, Bool(_)) => Some(to_bool(a).cmp(&to_bool(b))),
        (Null, String(s)) => Some("".cmp(s.as_str())),
        (String(s), Null) => Some(s.as_str().cmp("")),
        (Null, _) | (_, Null) => Some(to_bool(a).cmp(&to_bool(b))),
        (Int(_) | Float(_), Int(_) | Float(_)) => compare_numbers(number_of(a)?, number_of(b)?),
        (String(s), Int(_) | Float(_)) => match parse_numeric(s) {
            Some(n) => compare_numbers(n, number_of(b)?),
            None => Some(s.as_str().cmp(to_php_string(b).ok()?.as_str())),
        },
        (Int(_) | Float(_), String(s)) => match parse_numeric(s) {
            Some(n) => compare_numbers(number_of(a)?, n),
            None => Some(to_php_string(a).ok()?.as_str().cmp(s.as_str())),
        },
        (String(x), String(y)) => match (parse_numeric(x), parse_numeric(y)) {
            (Some(m), Some(n)) => compare_numbers(m, n),
            _ => Some(x.as_bytes().cmp(y.as_bytes())),
        },
        (Array(x), Array(y)) => {
            if x.len() != y.len() {
                return Some(x.len().cmp(&y.len()));
            }
            for (k, v) in x {
                let other = array_get(y, k)?;
                match loose_compare(v, other)? {
                    Ordering::Equal => continue,
                    ord => return Some(ord),
                }
            }
            Some(Ordering::Equal)
        }
        (Array(_), _) => Some(Ordering::Greater),
        (_, Array(_)) => Some(Ordering::Less),
        (
            Object {
                class: c1,
                args: a1,
            },
            Object {
                class: c2,
                args: a2,
            },
        ) => {
            let same = c1.eq_ignore_ascii_case(c2)
                && a1.len() == a2.len()
                && a1.iter().zip(a2).all(|(x, y)| loose_equals(x, y));
            if same {
                Some(Ordering::Equal)
            } else {
                None
            }
        }
        (Object { .. }, _) => Some(Ordering::Greater),
        (_, Object { .. }) => Some(Ordering::Less),
    }
}

pub fn loose_equals(
    a: &Constant,
    b: &Constant,
) -> bool {
    loose_compare(a, b) == Some(Ordering::Equal)
}

/// 严格比较（===）
pub fn strict_equals(
    a: &Constant,
    b: &Constant,
) -> bool {
    use Constant::*;
    match (a, b) {
        (Null, Null) => true,
        (Bool(x), Bool(y)) => x == y,
        (Int(x), Int(y)) => x == y,
        (Float(x), Float(y)) => x == y,
        (String(x), String(y)) => x == y,
        (Array(x), Array(y)) => {
            x.len() == y.len()
                && x.iter()
                    .zip(y)
                    .all(|((k1, v1), (k2, v2))| k1 == k2 && strict_equals(v1, v2))
        }
        (
            Object {
                class: c1,
                args: a1,
            },
            Object {
                class: c2,
                args: a2,
            },
        ) => {
            c1.eq_ignore_ascii_case(c2)
                && a1.len() == a2.len()
                && a1.iter().zip(a2).all(|(x, y)| strict_equals(x, y))
        }
        _ => false,
    }
}

/// 比较运算：== != <> === !== < <= > >= <=>
pub fn comparison(
    op: &str,
    left: &Constant,
    right: &Constant,
) -> Result<Constant, ConstEvalError> {
    let value = match op {
        "==" => Constant::Bool(loose_equals(left, right)),
        "!=" | "<>" => Constant::Bool(!loose_equals(left, right)),
        "===" => Constant::Bool(strict_equals(left, right)),
        "!==" => Constant::Bool(!strict_equals(left, right)),
        "<" => Constant::Bool(loose_compare(left, right) == Some(Ordering::Less)),
        "<=" => Constant::Bool(matches!(
            loose_compare(left, right),
            Some(Ordering::Less | Ordering::Equal)
        )),
        // a > b 即 b < a
        ">" => Constant::Bool(loose_compare(right, left) == Some(Ordering::Less)),
        ">=" => Constant::Bool(matches!(
            loose_compare(right, left),
            Some(Ordering::Less | Ordering::Equal)
        )),
        "<=>" => Constant::Int(match loose_compare(left, right) {
            Some(Ordering::Less) => -1,
            Some(Ordering::Equal) => 0,
            Some(Ordering::Greater) | None => 1,
        }),
        _ => return Err(ConstEvalError::UnknownOperator { op: op.to_string() }),
    };
    Ok(value)
}

// ===== 声明类型检查 =====

fn matches_type(
    ty: &str,
    value: &Constant,
) -> bool {
    match (ty, value) {
        ("mixed", _) => true,
        ("null", Constant::Null) => true,
        ("int", Constant::Int(_)) => true,
        ("float", Constant::Float(_)) => true,
        ("string", Constant::String(_)) => true,
        ("bool", Constant::Bool(_)) => true,
        ("true", Constant::Bool(true)) => true,
        ("false", Constant::Bool(false)) => true,
        ("array" | "iterable", Constant::Array(_)) => true,
        ("object" | "self" | "static", Constant::Object { .. }) => true,
        (name, Constant::Object { class, .. }) => {
            name.trim_start_matches('\\').eq_ignore_ascii_case(class.trim_start_matches('\\'))
        }
        _ => false,
    }
}

/// 检查值是否满足声明类型（`?T`、`A|B`、`mixed`），必要时把 int 放宽为 float
pub fn check_declared_type(
    declared: &str,
    value: Constant,
) -> Result<Constant, ConstEvalError> {
    let declared_trimmed = declared.trim();
    let (nullable, body) = match declared_trimmed.strip_prefix('?') {
        Some(rest) => (true, rest),
        None => (false, declared_trimmed),
    };
    let members: Vec<String> = body
        .split('|')
        .map(|t| t.trim().to_ascii_lowercase())
        .collect();

    if nullable && value == Constant::Null {
        return Ok(value);
    }
    if members.iter().any(|t| matches_type(t, &value)) {
        return Ok(value);
    }
    if let Constant::Int(n) = value {
        if members.iter().any(|t| t == "float") {
            return Ok(Constant::Float(n as f64));
        }
    }
    Err(ConstEvalError::TypeMismatch {
        expected: declared_trimmed.to_string(),
        found: value.type_name(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_float() {
        assert_eq!(format_float(1.5), "1.5");
        assert_eq!(format_float(2.0), "2");
        assert_eq!(format_float(-0.25), "-0.25");
        assert_eq!(format_float(0.1 + 0.2), "0.30000000000000004");
        assert_eq!(format_float(1e15), "1.0E+15");
        assert_eq!(format_float(1e14), "100000000000000");
        assert_eq!(format_float(0.0001), "0.0001");
        assert_eq!(format_float(0.00001), "1.0E-5");
        assert_eq!(format_float(1.25e20), "1.25E+20");
        assert_eq!(format_float(f64::INFINITY), "INF");
        assert_eq!(format_float(f64::NEG_INFINITY), "-INF");
        assert_eq!(format_float(f64::NAN), "NAN");
        assert_eq!(format_float(-0.0), "-0");
    }

    #[test]
    fn test_numeric_strings() {
        assert_eq!(parse_numeric("42"), Some(Number::Int(42)));
        assert_eq!(parse_numeric(" 1.5 "), Some(Number::Float(1.5)));
        assert_eq!(parse_numeric("1e3"), Some(Number::Float(1000.0)));
        assert_eq!(parse_numeric(".5"), Some(Number::Float(0.5)));
        assert_eq!(parse_numeric("12abc"), None);
        assert_eq!(parse_numeric("abc"), None);
        assert_eq!(parse_numeric(""), None);
        assert_eq!(
            parse_numeric("99999999999999999999"),
            Some(Number::Float(1e20))
        );
    }

    #[test]
    fn test_normalize_key() {
        assert_eq!(normalize_key(&Constant::string("7")).unwrap(), Constant::Int(7));
        assert_eq!(normalize_key(&Constant::string("-3")).unwrap(), Constant::Int(-3));
        assert_eq!(
            normalize_key(&Constant::string("07")).unwrap(),
            Constant::string("07")
        );
        assert_eq!(
            normalize_key(&Constant::string("-0")).unwrap(),
            Constant::string("-0")
        );
        assert_eq!(normalize_key(&Constant::Bool(true)).unwrap(), Constant::Int(1));
        assert_eq!(normalize_key(&Constant::Float(2.9)).unwrap(), Constant::Int(2));
        assert_eq!(normalize_key(&Constant::Null).unwrap(), Constant::string(""));
        assert!(normalize_key(&Constant::Array(vec![])).is_err());
    }

    #[test]
    fn test_arithmetic_promotion() {
        assert_eq!(
            arithmetic("+", &Constant::Int(i64::MAX), &Constant::Int(1)).unwrap(),
            Constant::Float(i64::MAX as f64 + 1.0)
        );
        assert_eq!(
            arithmetic("/", &Constant::Int(6), &Constant::Int(3)).unwrap(),
            Constant::Int(2)
        );
        assert_eq!(
            arithmetic("/", &Constant::Int(7), &Constant::Int(2)).unwrap(),
            Constant::Float(3.5)
        );
        assert_eq!(
            arithmetic("**", &Constant::Int(2), &Constant::Int(10)).unwrap(),
            Constant::Int(1024)
        );
        assert_eq!(
            arithmetic("**", &Constant::Int(2), &Constant::Int(-1)).unwrap(),
            Constant::Float(0.5)
        );
        assert_eq!(
            arithmetic("%", &Constant::Int(i64::MIN), &Constant::Int(-1)).unwrap(),
            Constant::Int(0)
        );
        assert_eq!(
            arithmetic("+", &Constant::string("5"), &Constant::Null).unwrap(),
            Constant::Int(5)
        );
    }

    #[test]
    fn test_arithmetic_errors() {
        assert_eq!(
            arithmetic("/", &Constant::Int(1), &Constant::Float(0.0)),
            Err(ConstEvalError::DivisionByZero)
        );
        assert_eq!(
            arithmetic("%", &Constant::Int(1), &Constant::Int(0)),
            Err(ConstEvalError::ModuloByZero)
        );
        assert!(matches!(
            arithmetic("*", &Constant::string("abc"), &Constant::Int(1)),
            Err(ConstEvalError::UnsupportedOperands { .. })
        ));
        assert_eq!(
            bitwise("<<", &Constant::Int(1), &Constant::Int(-1)),
            Err(ConstEvalError::NegativeShift)
        );
    }

    #[test]
    fn test_array_union() {
        let left = Constant::Array(vec![(Constant::Int(0), Constant::string("a"))]);
        let right = Constant::Array(vec![
            (Constant::Int(0), Constant::string("x")),
            (Constant::Int(1), Constant::string("b")),
        ]);
        assert_eq!(
            arithmetic("+", &left, &right).unwrap(),
            Constant::Array(vec![
                (Constant::Int(0), Constant::string("a")),
                (Constant::Int(1), Constant::string("b")),
            ])
        );
    }

    #[test]
    fn test_loose_comparison() {
        assert!(loose_equals(&Constant::string("1e3"), &Constant::string("1000")));
        assert!(!loose_equals(&Constant::string("abc"), &Constant::Int(0)));
        assert!(loose_equals(&Constant::Null, &Constant::Bool(false)));
        assert!(loose_equals(&Constant::Null, &Constant::string("")));
        assert!(loose_equals(&Constant::Int(1), &Constant::Float(1.0)));
        assert!(!loose_equals(&Constant::Float(f64::NAN), &Constant::Float(f64::NAN)));
        assert_eq!(
            comparison("<=>", &Constant::Int(2), &Constant::Int(1)).unwrap(),
            Constant::Int(1)
        );
    }

    #[test]
    fn test_strict_comparison() {
        assert!(!strict_equals(&Constant::Int(1), &Constant::Float(1.0)));
        assert!(strict_equals(&Constant::string("a"), &Constant::string("a")));
        let a = Constant::Array(vec![
            (Constant::Int(0), Constant::Int(1)),
            (Constant::Int(1), Constant::Int(2)),
        ]);
        let b = Constant::Array(vec![
            (Constant::Int(1), Constant::Int(2)),
            (Constant::Int(0), Constant::Int(1)),
        ]);
        assert!(loose_equals(&a, &b));
        assert!(!strict_equals(&a, &b));
    }

    #[test]
    fn test_declared_types() {
        assert_eq!(
            check_declared_type("float", Constant::Int(3)).unwrap(),
            Constant::Float(3.0)
        );
        assert!(check_declared_type("?int", Constant::Null).is_ok());
        assert!(check_declared_type("int|string", Constant::string("x")).is_ok());
        assert!(check_declared_type("mixed", Constant::Array(vec![])).is_ok());
        assert_eq!(
            check_declared_type("int", Constant::string("1")),
            Err(ConstEvalError::TypeMismatch {
                expected: "int".to_string(),
                found: "string",
            })
        );
    }
}
