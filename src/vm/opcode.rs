//! 字节码操作码定义
//!
//! 三地址指令设计：每条指令携带 op1、op2、result 三个操作数，
//! 外加一个 32 位扩展字段（复合赋值子操作、参数计数、取值模式等）。
//!
//! 指令编码空间规划：
//! - 0x00-0x0F：控制流与异常处理
//! - 0x10-0x1F：加载、转换与杂项
//! - 0x20-0x3F：算术、位运算与逻辑运算
//! - 0x40-0x4F：比较运算
//! - 0x50-0x5F：赋值
//! - 0x60-0x7F：读取、isset/empty 与 unset
//! - 0x80-0x8F：数组构造
//! - 0x90-0x9F：函数调用与对象创建
//! - 0xA0-0xAF：闭包与变量绑定
//! - 0xB0-0xBF：foreach 迭代

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! opcodes {
    (
        $(
            $(#[$meta:meta])*
            $name:ident = $value:expr,
        )*
    ) => {
        /// 字节码操作码
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[repr(u8)]
        pub enum Opcode {
            $(
                $(#[$meta])*
                $name = $value,
            )*
        }

        impl Opcode {
            /// 获取指令名称
            pub fn name(&self) -> &'static str {
                match self {
                    $(Opcode::$name => stringify!($name),)*
                }
            }

            /// 全部操作码（按编码顺序）
            pub const ALL: &'static [Opcode] = &[$(Opcode::$name,)*];
        }

        /// 从字节值创建 Opcode
        impl TryFrom<u8> for Opcode {
            type Error = u8;

            fn try_from(value: u8) -> Result<Self, Self::Error> {
                match value {
                    $(v if v == $value => Ok(Opcode::$name),)*
                    other => Err(other),
                }
            }
        }
    };
}

opcodes! {
    // =====================
    // 控制流与异常处理 (0x00-0x0F)
    // =====================
    /// 空操作（宽松模式下未知运算符也降级为它）
    Nop = 0x00,

    /// 返回：op1 = 返回值
    Return = 0x01,

    /// 无条件跳转：op1 = 目标地址
    Jmp = 0x02,

    /// 条件为假时跳转：op1 = 条件，op2 = 目标地址
    JmpIfFalse = 0x03,

    /// 条件为真时跳转：op1 = 条件，op2 = 目标地址
    JmpIfTrue = 0x04,

    /// 值为 null 时写入 null 并跳转（nullsafe 链）：op1 = 值，op2 = 目标地址，result = 结果
    JmpNull = 0x05,

    /// 值已设置且非 null 时复制并跳转（`??`）：op1 = 值，op2 = 目标地址，result = 结果
    Coalesce = 0x06,

    /// 终止脚本：op1 = 状态
    Exit = 0x07,

    /// 生成器产出：op1 = 值，op2 = 键，result = 发送回来的值
    Yield = 0x08,

    /// 委托生成器：op1 = 可迭代对象，result = 委托返回值
    YieldFrom = 0x09,

    /// match 无匹配分支：op1 = 被匹配的值
    MatchError = 0x0A,

    /// 抛出异常：op1 = 异常对象
    Throw = 0x0B,

    /// 安装异常处理器：op1 = 第一个 catch 地址，op2 = finally 地址
    InstallHandler = 0x0C,

    /// 卸载最近安装的异常处理器
    PopHandler = 0x0D,

    /// 捕获异常：op1 = 类名，op2 = 下一个 catch 地址，result = 异常变量
    Catch = 0x0E,

    /// finally 结束：op1 = 返回地址临时值
    ///
    /// 经 `FastCall` 进入时清空该临时值并跳回；否则重新抛出挂起的异常，
    /// 没有挂起的异常则继续向下执行。
    FinallyEnd = 0x0F,

    // =====================
    // 加载、转换与杂项 (0x10-0x1F)
    // =====================
    /// 加载常量：op1 = 常量，result = 临时值
    LoadConst = 0x10,

    /// 复制到临时值：op1 = 值，result = 临时值
    QmAssign = 0x11,

    /// 读取 `$this`
    FetchThis = 0x12,

    /// 按名称读取变量（可变变量）：op1 = 名称
    FetchVarR = 0x13,

    /// 按名称以写模式取得变量引用：op1 = 名称
    FetchVarW = 0x14,

    /// 转换为布尔值：op1 = 值
    Bool = 0x15,

    /// 类型转换：op1 = 值，extended = CastKind
    Cast = 0x16,

    /// `@` 开始抑制错误：result = 保存的错误级别
    BeginSilence = 0x17,

    /// `@` 结束抑制错误：op1 = 保存的错误级别
    EndSilence = 0x18,

    /// 三输入指令的附加数据：op1 = 值
    OpData = 0x19,

    /// 输出：op1 = 值
    Echo = 0x1A,

    /// include/require/eval：op1 = 路径或代码，extended = IncludeKind
    IncludeOrEval = 0x1B,

    /// 声明全局常量：op1 = 名称，op2 = 值
    DeclareConst = 0x1C,

    /// 释放未使用的临时值：op1 = 临时值
    Free = 0x1D,

    /// 提前离开 try 时执行 finally：op1 = finally 地址，result = 返回地址临时值
    FastCall = 0x1E,

    // =====================
    // 算术、位运算与逻辑运算 (0x20-0x3F)
    // =====================
    /// 加法：result = op1 + op2
    Add = 0x20,

    /// 减法：result = op1 - op2
    Sub = 0x21,

    /// 乘法：result = op1 * op2
    Mul = 0x22,

    /// 除法：result = op1 / op2
    Div = 0x23,

    /// 取模：result = op1 % op2
    Mod = 0x24,

    /// 乘方：result = op1 ** op2
    Pow = 0x25,

    /// 字符串连接：result = op1 . op2
    Concat = 0x26,

    /// 左移：result = op1 << op2
    ShiftLeft = 0x27,

    /// 右移：result = op1 >> op2
    ShiftRight = 0x28,

    /// 按位与
    BitwiseAnd = 0x29,

    /// 按位或
    BitwiseOr = 0x2A,

    /// 按位异或
    BitwiseXor = 0x2B,

    /// 按位取反：result = ~op1
    BitwiseNot = 0x2C,

    /// 逻辑非：result = !op1
    BooleanNot = 0x2D,

    /// 逻辑异或（`xor`）
    BooleanXor = 0x2E,

    /// 取负：result = -op1
    Negate = 0x2F,

    /// 一元加：result = +op1
    UnaryPlus = 0x30,

    // =====================
    // 比较运算 (0x40-0x4F)
    // =====================
    /// 严格相等 `===`
    IsIdentical = 0x40,

    /// 严格不等 `!==`
    IsNotIdentical = 0x41,

    /// 宽松相等 `==`
    IsEqual = 0x42,

    /// 宽松不等 `!=`
    IsNotEqual = 0x43,

    /// 小于 `<`（`>` 通过交换操作数实现）
    IsSmaller = 0x44,

    /// 小于等于 `<=`（`>=` 通过交换操作数实现）
    IsSmallerOrEqual = 0x45,

    /// 三向比较 `<=>`
    Spaceship = 0x46,

    /// switch 分支比较（宽松相等，不消耗 op1）
    Case = 0x47,

    /// instanceof：op1 = 对象，op2 = 类
    InstanceOf = 0x48,

    // =====================
    // 赋值 (0x50-0x5F)
    // =====================
    /// 赋值：op1 = 值，result = 目标变量（或写模式临时引用）
    Assign = 0x50,

    /// 引用赋值：op1 = 源（写模式），result = 目标
    AssignRef = 0x51,

    /// 原地复合赋值：op1 = 值，result = 目标变量，extended = 子操作码
    AssignOp = 0x52,

    /// 数组元素赋值：op1 = 容器，op2 = 键（未使用表示追加），随后 OpData
    AssignDim = 0x53,

    /// 数组元素复合赋值：同 AssignDim，extended = 子操作码
    AssignDimOp = 0x54,

    /// 属性赋值：op1 = 对象，op2 = 属性名，随后 OpData
    AssignObj = 0x55,

    /// 属性复合赋值：同 AssignObj，extended = 子操作码
    AssignObjOp = 0x56,

    /// 静态属性赋值：op1 = 属性名，op2 = 类，随后 OpData
    AssignStaticProp = 0x57,

    /// 静态属性复合赋值：同 AssignStaticProp，extended = 子操作码
    AssignStaticPropOp = 0x58,

    // =====================
    // 读取 (0x60-0x7F)
    // =====================
    /// 读取数组元素：op1 = 容器，op2 = 键
    FetchDimR = 0x60,

    /// 以写模式取得数组元素引用（嵌套写入的中间层级）
    FetchDimW = 0x61,

    /// 以 isset 模式读取数组元素（不产生警告）
    FetchDimIs = 0x62,

    /// 解构读取：op1 = 源数组，op2 = 键
    FetchListR = 0x63,

    /// 解构引用读取：op1 = 源数组（写模式），op2 = 键
    FetchListW = 0x64,

    /// 读取属性：op1 = 对象，op2 = 属性名
    FetchObjR = 0x65,

    /// 以写模式取得属性引用
    FetchObjW = 0x66,

    /// 以 isset 模式读取属性
    FetchObjIs = 0x67,

    /// 读取静态属性：op1 = 属性名，op2 = 类
    FetchStaticPropR = 0x68,

    /// 以写模式取得静态属性引用
    FetchStaticPropW = 0x69,

    /// 以 isset 模式读取静态属性
    FetchStaticPropIs = 0x6A,

    /// 读取类常量：op1 = 类，op2 = 常量名
    FetchClassConstant = 0x6B,

    /// 读取全局常量：op1 = 常量名
    FetchConstant = 0x6C,

    /// 运行期解析类引用：extended = ClassFetchKind
    FetchClass = 0x6D,

    /// 运行期取得类名：extended = ClassFetchKind
    FetchClassName = 0x6E,

    /// isset/empty 变量：op1 = 变量，extended = IssetMode
    IssetIsEmptyVar = 0x6F,

    /// isset/empty 数组元素：op1 = 容器，op2 = 键
    IssetIsEmptyDim = 0x70,

    /// isset/empty 属性：op1 = 对象，op2 = 属性名
    IssetIsEmptyProp = 0x71,

    /// isset/empty 静态属性：op1 = 属性名，op2 = 类
    IssetIsEmptyStaticProp = 0x72,

    /// unset 变量：op1 = 变量
    UnsetVar = 0x73,

    /// unset 数组元素：op1 = 容器（写模式），op2 = 键
    UnsetDim = 0x74,

    /// unset 属性：op1 = 对象，op2 = 属性名
    UnsetObj = 0x75,

    // =====================
    // 数组构造 (0x80-0x8F)
    // =====================
    /// 创建空数组：result = 数组
    InitArray = 0x80,

    /// 追加元素：op1 = 值，op2 = 键（可选），result = 数组，extended = 是否引用
    AddArrayElement = 0x81,

    /// 展开追加：op1 = 可迭代对象，result = 数组
    AddArrayUnpack = 0x82,

    // =====================
    // 函数调用与对象创建 (0x90-0x9F)
    // =====================
    /// 按名称准备调用：op2 = 函数名，extended = 参数个数
    InitFcall = 0x90,

    /// 按值准备调用（闭包、字符串、数组回调）：op2 = 可调用值
    InitDynamicCall = 0x91,

    /// 准备方法调用：op1 = 对象，op2 = 方法名
    InitMethodCall = 0x92,

    /// 准备静态方法调用：op1 = 类，op2 = 方法名
    InitStaticMethodCall = 0x93,

    /// 创建对象并准备构造函数调用：op1 = 类，result = 对象
    New = 0x94,

    /// 按值传参：op1 = 值，op2 = 参数名（命名参数），extended = 位置
    SendVal = 0x95,

    /// 传递变量（由被调函数决定是否按引用）：op1 = 变量
    SendVar = 0x96,

    /// 展开传参：op1 = 可迭代对象
    SendUnpack = 0x97,

    /// 执行已准备的调用：result = 返回值
    DoCall = 0x98,

    /// 克隆对象
    Clone = 0x99,

    // =====================
    // 闭包与变量绑定 (0xA0-0xAF)
    // =====================
    /// 创建闭包：op1 = 闭包表索引，result = 闭包
    DeclareClosure = 0xA0,

    /// 绑定捕获变量：op1 = 闭包，op2 = 外层变量，result = 变量名，extended = 是否引用
    BindLexical = 0xA1,

    /// 绑定静态变量：op1 = 变量，op2 = 初始值
    BindStatic = 0xA2,

    /// 绑定全局变量：op1 = 变量，op2 = 全局名
    BindGlobal = 0xA3,

    /// 声明匿名类：op1 = 生成的类名，result = 类
    DeclareAnonClass = 0xA4,

    // =====================
    // foreach 迭代 (0xB0-0xBF)
    // =====================
    /// 初始化迭代器：op1 = 被遍历值，result = 迭代器，extended = 是否引用
    FeReset = 0xB0,

    /// 取下一个值：op1 = 迭代器，op2 = 结束地址，result = 值，extended = 是否引用
    FeFetch = 0xB1,

    /// 取当前键：op1 = 迭代器，result = 键
    FeKey = 0xB2,

    /// 释放迭代器：op1 = 迭代器
    FeFree = 0xB3,
}

impl Opcode {
    /// 检查是否是跳转指令（携带地址操作数）
    pub fn is_jump_op(&self) -> bool {
        matches!(
            self,
            Opcode::Jmp
                | Opcode::JmpIfFalse
                | Opcode::JmpIfTrue
                | Opcode::JmpNull
                | Opcode::Coalesce
                | Opcode::FeFetch
                | Opcode::InstallHandler
                | Opcode::Catch
                | Opcode::FastCall
        )
    }

    /// 检查是否终止当前执行路径
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Opcode::Return | Opcode::Jmp | Opcode::Throw | Opcode::Exit | Opcode::MatchError
        )
    }

    /// 检查是否是二元算术/位运算（可用作复合赋值子操作）
    pub fn is_binary_arith(&self) -> bool {
        matches!(
            self,
            Opcode::Add
                | Opcode::Sub
                | Opcode::Mul
                | Opcode::Div
                | Opcode::Mod
                | Opcode::Pow
                | Opcode::Concat
                | Opcode::ShiftLeft
                | Opcode::ShiftRight
                | Opcode::BitwiseAnd
                | Opcode::BitwiseOr
                | Opcode::BitwiseXor
        )
    }

    /// 检查是否是赋值指令
    pub fn is_assign_op(&self) -> bool {
        (*self as u8) & 0xF0 == 0x50
    }

    /// 检查后面是否必须紧跟 OpData
    pub fn takes_op_data(&self) -> bool {
        matches!(
            self,
            Opcode::AssignDim
                | Opcode::AssignDimOp
                | Opcode::AssignObj
                | Opcode::AssignObjOp
                | Opcode::AssignStaticProp
                | Opcode::AssignStaticPropOp
        )
    }
}

impl fmt::Display for Opcode {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
