//! 流状态管理
//!
//! 整合临时值分配、标签生成与跳转回填、符号表/作用域管理。
//! 每个编译单元（顶层脚本、函数、方法、闭包）各自拥有一份。

use super::bytecode::{Label, Operand, OperandSlot};
use indexmap::IndexMap;
use std::collections::HashMap;

// ===== 临时值 =====

/// 临时值分配器
///
/// 编号单调递增，从 `base` 开始，不回收。
#[derive(Debug, Clone)]
pub struct TempAllocator {
    base: u32,
    next: u32,
}

impl TempAllocator {
    pub fn new(base: u32) -> Self {
        TempAllocator { base, next: base }
    }

    pub fn alloc(&mut self) -> Operand {
        let id = self.next;
        self.next += 1;
        Operand::temp(id)
    }

    /// 已分配的临时值数量
    pub fn count(&self) -> u32 {
        self.next - self.base
    }

    pub fn reset(&mut self) {
        self.next = self.base;
    }
}

// ===== 标签与跳转回填 =====

/// 待回填的操作数位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fixup {
    pub addr: usize,
    pub slot: OperandSlot,
}

/// 控制流管理器
///
/// 标签在放置前被引用时，引用处登记为 `Fixup`；放置时一次性回填。
#[derive(Debug, Clone)]
pub struct FlowManager {
    temps: TempAllocator,
    /// 标签 → 已放置的地址
    labels: Vec<Option<u32>>,
    pending: HashMap<Label, Vec<Fixup>>,
    /// goto 标签名 → 标签
    goto_labels: IndexMap<String, Label>,
    /// 已放置的 goto 标签 → 放置处所在的 try 区域
    goto_regions: HashMap<Label, Vec<TryRegion>>,
    /// 目标标签尚未放置的 goto
    pending_gotos: Vec<PendingGoto>,
}

/// 前向 goto：单元结束时检查目标位置，必要时生成跳板
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingGoto {
    pub target: Label,
    /// 跳转处所在的 try 区域（由外向内）
    pub regions: Vec<TryRegion>,
    /// 跨出 try 区域时，goto 先跳到这里执行清理
    pub trampoline: Option<Label>,
}

impl FlowManager {
    pub fn new(temp_base: u32) -> Self {
        FlowManager {
            temps: TempAllocator::new(temp_base),
            labels: Vec::new(),
            pending: HashMap::new(),
            goto_labels: IndexMap::new(),
            goto_regions: HashMap::new(),
            pending_gotos: Vec::new(),
        }
    }

    // 临时值
    pub fn alloc_temp(&mut self) -> Operand {
        self.temps.alloc()
    }

    pub fn temp_count(&self) -> u32 {
        self.temps.count()
    }

    // 标签生成
    pub fn new_label(&mut self) -> Label {
        let label = Label::new(self.labels.len() as u32);
        self.labels.push(None);
        label
    }

    pub fn address_of(
        &self,
        label: Label,
    ) -> Option<u32> {
        self.labels.get(label.id() as usize).copied().flatten()
    }

    /// 放置标签，返回需要回填的位置
    ///
    /// 标签已放置或不存在时返回 None。
    pub fn place(
        &mut self,
        label: Label,
        addr: u32,
    ) -> Option<Vec<Fixup>> {
        let entry = self.labels.get_mut(label.id() as usize)?;
        if entry.is_some() {
            return None;
        }
        *entry = Some(addr);
        Some(self.pending.remove(&label).unwrap_or_default())
    }

    /// 登记一个前向引用
    pub fn add_fixup(
        &mut self,
        label: Label,
        fixup: Fixup,
    ) {
        self.pending.entry(label).or_default().push(fixup);
    }

    /// 仍有前向引用未回填的标签
    pub fn unresolved_labels(&self) -> Vec<Label> {
        let mut labels: Vec<Label> = self
            .pending
            .iter()
            .filter(|(_, fixups)| !fixups.is_empty())
            .map(|(label, _)| *label)
            .collect();
        labels.sort();
        labels
    }

    /// 是否有标签放置在该地址
    pub fn has_label_at(
        &self,
        addr: u32,
    ) -> bool {
        self.labels.iter().any(|l| *l == Some(addr))
    }

    // goto 标签
    pub fn goto_label(
        &mut self,
        name: &str,
    ) -> Label {
        if let Some(label) = self.goto_labels.get(name) {
            return *label;
        }
        let label = self.new_label();
        self.goto_labels.insert(name.to_string(), label);
        label
    }

    pub fn goto_name(
        &self,
        label: Label,
    ) -> Option<&str> {
        self.goto_labels
            .iter()
            .find(|(_, l)| **l == label)
            .map(|(name, _)| name.as_str())
    }

    /// 记录 goto 标签放置处的 try 区域
    pub fn set_goto_regions(
        &mut self,
        label: Label,
        regions: Vec<TryRegion>,
    ) {
        self.goto_regions.insert(label, regions);
    }

    pub fn goto_regions(
        &self,
        label: Label,
    ) -> Option<&[TryRegion]> {
        self.goto_regions.get(&label).map(Vec::as_slice)
    }

    pub fn add_pending_goto(
        &mut self,
        goto: PendingGoto,
    ) {
        self.pending_gotos.push(goto);
    }

    pub fn take_pending_gotos(&mut self) -> Vec<PendingGoto> {
        std::mem::take(&mut self.pending_gotos)
    }
}

// ===== 符号表和作用域 =====

/// break/continue 目标的种类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopKind {
    Loop,
    Foreach,
    Switch,
}

/// 一层循环（或 switch）的 break/continue 目标
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopLabels {
    pub kind: LoopKind,
    pub break_label: Label,
    pub continue_label: Label,
    /// foreach 的迭代器，提前跳出时需要释放
    pub iterator: Option<Operand>,
}

/// try 语句当前所处的部分
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryPhase {
    /// 受保护区域，处理器已安装
    Body,
    Catch,
    Finally,
}

/// 一层 try 区域
///
/// 提前离开（return、break、continue、goto）时按阶段清理：受保护区域内
/// 先卸载处理器，有 finally 时经 `FastCall` 执行 finally 再继续。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TryRegion {
    pub id: u32,
    pub phase: TryPhase,
    /// finally 入口及其返回地址临时值
    pub finally: Option<(Label, Operand)>,
    /// 进入时可见的循环层数
    pub loop_depth: usize,
}

impl TryRegion {
    /// 同一个 try 的同一部分
    pub fn same_part(
        &self,
        other: &TryRegion,
    ) -> bool {
        self.id == other.id && self.phase == other.phase
    }
}

/// 提前离开时途经的一层
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    Loop(LoopLabels),
    Try(TryRegion),
}

/// 作用域
#[derive(Debug, Clone, Default)]
pub struct Scope {
    vars: IndexMap<String, u32>,
    next_slot: u32,
    function_boundary: bool,
    loops: Vec<LoopLabels>,
}

impl Scope {
    pub fn new(function_boundary: bool) -> Self {
        Scope {
            function_boundary,
            ..Default::default()
        }
    }

    pub fn is_function_boundary(&self) -> bool {
        self.function_boundary
    }

    pub fn get(
        &self,
        name: &str,
    ) -> Option<u32> {
        self.vars.get(name).copied()
    }
}

/// 作用域管理器
///
/// 栈底总是函数边界作用域；替代语法块压入普通作用域。
/// 变量槽位由最近的函数边界作用域统一分配，不跨函数边界查找，槽位不复用。
#[derive(Debug, Clone)]
pub struct ScopeStack {
    scopes: Vec<Scope>,
    tries: Vec<TryRegion>,
    next_try: u32,
}

impl Default for ScopeStack {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeStack {
    pub fn new() -> Self {
        ScopeStack {
            scopes: vec![Scope::new(true)],
            tries: Vec::new(),
            next_try: 0,
        }
    }

    pub fn push(
        &mut self,
        function_boundary: bool,
    ) {
        self.scopes.push(Scope::new(function_boundary));
    }

    pub fn pop(&mut self) -> Option<Scope> {
        if self.scopes.len() > 1 {
            self.scopes.pop()
        } else {
            None
        }
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    /// 最近的函数边界作用域下标
    fn function_index(&self) -> usize {
        self.scopes
            .iter()
            .rposition(|s| s.function_boundary)
            .unwrap_or(0)
    }

    /// 查找变量槽位（不跨越函数边界）
    pub fn lookup(
        &self,
        name: &str,
    ) -> Option<u32> {
        let boundary = self.function_index();
        self.scopes[boundary..].iter().rev().find_map(|s| s.get(name))
    }

    /// 查找变量槽位，不存在则分配下一个空闲槽位
    pub fn resolve_or_create(
        &mut self,
        name: &str,
    ) -> u32 {
        if let Some(slot) = self.lookup(name) {
            return slot;
        }
        let boundary = self.function_index();
        let scope = &mut self.scopes[boundary];
        let slot = scope.next_slot;
        scope.next_slot += 1;
        scope.vars.insert(name.to_string(), slot);
        slot
    }

    /// 槽位 → 变量名
    pub fn var_names(&self) -> Vec<String> {
        let scope = &self.scopes[self.function_index()];
        let mut names = vec![String::new(); scope.next_slot as usize];
        for (name, slot) in &scope.vars {
            names[*slot as usize] = name.clone();
        }
        names
    }

    /// 登记 break/continue 目标，离开时调用 `leave_loop` 恢复外层目标
    pub fn enter_loop(
        &mut self,
        labels: LoopLabels,
    ) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.loops.push(labels);
        }
    }

    pub fn leave_loop(&mut self) -> Option<LoopLabels> {
        self.scopes.last_mut().and_then(|s| s.loops.pop())
    }

    /// 当前可见的循环层级（由内向外）
    pub fn active_loops(&self) -> Vec<LoopLabels> {
        let boundary = self.function_index();
        self.scopes[boundary..]
            .iter()
            .rev()
            .flat_map(|s| s.loops.iter().rev().copied())
            .collect()
    }

    /// 第 depth 层（从 1 开始）的目标
    pub fn loop_target(
        &self,
        depth: u32,
    ) -> Option<LoopLabels> {
        if depth == 0 {
            return None;
        }
        self.active_loops().get(depth as usize - 1).copied()
    }

    /// 进入 try 的受保护区域
    pub fn enter_try(
        &mut self,
        finally: Option<(Label, Operand)>,
    ) -> TryRegion {
        let region = TryRegion {
            id: self.next_try,
            phase: TryPhase::Body,
            finally,
            loop_depth: self.active_loops().len(),
        };
        self.next_try += 1;
        self.tries.push(region);
        region
    }

    /// 当前 try 进入 catch 或 finally 部分
    pub fn set_try_phase(
        &mut self,
        phase: TryPhase,
    ) {
        if let Some(region) = self.tries.last_mut() {
            region.phase = phase;
        }
    }

    pub fn leave_try(&mut self) -> Option<TryRegion> {
        self.tries.pop()
    }

    /// 当前所在的 try 区域（由外向内）
    pub fn active_tries(&self) -> &[TryRegion] {
        &self.tries
    }

    /// 离开到只剩外层 `keep_loops` 层循环时途经的各层（由内向外）
    ///
    /// `keep_loops` 为 0 即离开整个函数体（return）。
    pub fn exits(
        &self,
        keep_loops: usize,
    ) -> Vec<Exit> {
        let loops = self.active_loops();
        let mut tries = self
            .tries
            .iter()
            .rev()
            .filter(|t| t.loop_depth >= keep_loops)
            .peekable();
        let mut exits = Vec::new();
        for (index, labels) in loops.iter().enumerate() {
            let position = loops.len() - index;
            if position <= keep_loops {
                break;
            }
            while let Some(region) = tries.next_if(|t| t.loop_depth >= position) {
                exits.push(Exit::Try(*region));
            }
            exits.push(Exit::Loop(*labels));
        }
        exits.extend(tries.map(|t| Exit::Try(*t)));
        exits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(
        flow: &mut FlowManager,
        kind: LoopKind,
    ) -> LoopLabels {
        LoopLabels {
            kind,
            break_label: flow.new_label(),
            continue_label: flow.new_label(),
            iterator: None,
        }
    }

    #[test]
    fn test_temp_allocator() {
        let mut temps = TempAllocator::new(100);
        assert_eq!(temps.alloc(), Operand::temp(100));
        assert_eq!(temps.alloc(), Operand::temp(101));
        assert_eq!(temps.count(), 2);
        temps.reset();
        assert_eq!(temps.count(), 0);
    }

    #[test]
    fn test_label_place_and_fixup() {
        let mut flow = FlowManager::new(0);
        let label = flow.new_label();
        flow.add_fixup(
            label,
            Fixup {
                addr: 2,
                slot: OperandSlot::Op1,
            },
        );
        assert_eq!(flow.unresolved_labels(), vec![label]);
        let fixups = flow.place(label, 7).unwrap();
        assert_eq!(fixups.len(), 1);
        assert_eq!(flow.address_of(label), Some(7));
        assert!(flow.unresolved_labels().is_empty());
        // 重复放置
        assert!(flow.place(label, 8).is_none());
        assert!(flow.has_label_at(7));
    }

    #[test]
    fn test_goto_labels() {
        let mut flow = FlowManager::new(0);
        let a = flow.goto_label("retry");
        assert_eq!(flow.goto_label("retry"), a);
        assert_eq!(flow.goto_name(a), Some("retry"));
    }

    #[test]
    fn test_scope_slots_are_sequential() {
        let mut scopes = ScopeStack::new();
        assert_eq!(scopes.resolve_or_create("a"), 0);
        assert_eq!(scopes.resolve_or_create("b"), 1);
        assert_eq!(scopes.resolve_or_create("a"), 0);
        assert_eq!(scopes.var_names(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_block_scope_shares_function_slots() {
        let mut scopes = ScopeStack::new();
        scopes.resolve_or_create("x");
        scopes.push(false);
        assert_eq!(scopes.lookup("x"), Some(0));
        assert_eq!(scopes.resolve_or_create("y"), 1);
        scopes.pop();
        // 块内创建的变量在块外依旧可见
        assert_eq!(scopes.lookup("y"), Some(1));
        // 栈底不可弹出
        assert!(scopes.pop().is_none());
    }

    #[test]
    fn test_function_boundary_hides_outer() {
        let mut scopes = ScopeStack::new();
        scopes.resolve_or_create("outer");
        scopes.push(true);
        assert_eq!(scopes.lookup("outer"), None);
        assert_eq!(scopes.resolve_or_create("inner"), 0);
    }

    #[test]
    fn test_loop_nesting_restores_outer() {
        let mut flow = FlowManager::new(0);
        let mut scopes = ScopeStack::new();
        let outer = labels(&mut flow, LoopKind::Loop);
        let inner = labels(&mut flow, LoopKind::Foreach);
        scopes.enter_loop(outer);
        scopes.enter_loop(inner);
        assert_eq!(scopes.loop_target(2), Some(outer));
        assert_eq!(scopes.exits(1), vec![Exit::Loop(inner)]);
        scopes.leave_loop();
        assert_eq!(scopes.loop_target(1), Some(outer));
        scopes.leave_loop();
        assert!(scopes.loop_target(1).is_none());
        assert!(scopes.loop_target(0).is_none());
    }

    #[test]
    fn test_exits_interleave_loops_and_tries() {
        // foreach { try { while { try { ... } } } }
        let mut flow = FlowManager::new(0);
        let mut scopes = ScopeStack::new();
        let outer = labels(&mut flow, LoopKind::Foreach);
        let inner = labels(&mut flow, LoopKind::Loop);
        scopes.enter_loop(outer);
        let first = scopes.enter_try(None);
        scopes.enter_loop(inner);
        let second = scopes.enter_try(Some((flow.new_label(), flow.alloc_temp())));
        assert_eq!(first.loop_depth, 1);
        assert_eq!(second.loop_depth, 2);

        assert_eq!(
            scopes.exits(0),
            vec![
                Exit::Try(second),
                Exit::Loop(inner),
                Exit::Try(first),
                Exit::Loop(outer),
            ]
        );
        // break 1 / continue 1：只离开内层 try
        assert_eq!(scopes.exits(2), vec![Exit::Try(second)]);
        // break 2：离开到外层 foreach 为止
        assert_eq!(
            scopes.exits(1),
            vec![Exit::Try(second), Exit::Loop(inner), Exit::Try(first)]
        );

        scopes.set_try_phase(TryPhase::Catch);
        assert_eq!(scopes.active_tries()[1].phase, TryPhase::Catch);
        assert_eq!(scopes.leave_try().map(|t| t.id), Some(second.id));
        assert_eq!(scopes.active_tries(), &[first]);
    }
}
