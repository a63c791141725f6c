//! 单条能力记录

use core::ops::Range;

use uapi::cap::{CapAccess, CapType, ResourceType};
use uapi::types::{CapId, TaskId};

/// 一条能力：对某个内核资源的有界、带类型的授权。
///
/// 区间型能力（物理内存、虚拟内存）使用 `[start, end)` 描述可访问范围，
/// `size` 为可消耗容量；数量型能力（线程数、空间数）只有 `size`/`used`。
///
/// 边界不变量：`used <= size`，区间型能力还要求 `size <= end - start`。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capability {
    /// 能力标识
    pub capid: CapId,
    /// 持有者
    pub owner: TaskId,
    /// 资源标识（线程号、空间号、容器号……）
    pub resid: usize,
    /// 能力类型
    pub ctype: CapType,
    /// 资源类型
    pub rtype: ResourceType,
    /// 访问权限
    pub access: CapAccess,
    /// 区间起点（含）
    pub start: usize,
    /// 区间终点（不含）
    pub end: usize,
    /// 容量
    pub size: usize,
    /// 已消耗容量
    pub used: usize,
    /// 是否已共享给容器内所有任务
    pub shared: bool,
}

impl Capability {
    /// 创建一条区间型能力，容量等于区间长度
    pub fn range(
        owner: TaskId,
        resid: usize,
        ctype: CapType,
        rtype: ResourceType,
        access: CapAccess,
        range: Range<usize>,
    ) -> Self {
        Self {
            capid: 0,
            owner,
            resid,
            ctype,
            rtype,
            access,
            start: range.start,
            size: range.end.saturating_sub(range.start),
            end: range.end,
            used: 0,
            shared: false,
        }
    }

    /// 创建一条数量型能力
    pub fn quantity(owner: TaskId, resid: usize, rtype: ResourceType, access: CapAccess, size: usize) -> Self {
        Self {
            capid: 0,
            owner,
            resid,
            ctype: CapType::QUANTITY,
            rtype,
            access,
            start: 0,
            end: 0,
            size,
            used: 0,
            shared: false,
        }
    }

    /// 是否为区间型能力
    pub fn is_range(&self) -> bool {
        self.end > self.start
    }

    /// 是否为数量型能力
    pub fn is_quantity(&self) -> bool {
        self.ctype.contains(CapType::QUANTITY)
    }

    /// 未消耗的容量
    pub fn available(&self) -> usize {
        self.size - self.used
    }

    /// 检查边界不变量
    pub fn bounds_ok(&self) -> bool {
        if self.used > self.size {
            return false;
        }
        !self.is_range() || self.size <= self.end - self.start
    }

    /// `range` 是否完全落在 `[start, end)` 内
    pub fn covers(&self, range: &Range<usize>) -> bool {
        range.start >= self.start && range.end <= self.end && range.start <= range.end
    }

    /// 对 `subject` 是否可见
    pub fn visible_to(&self, subject: TaskId) -> bool {
        self.owner == subject || self.shared
    }

    /// 区间
    pub fn span(&self) -> Range<usize> {
        self.start..self.end
    }
}

/// SPLIT / DEDUCE 的参数：新的权限、区间与容量。
///
/// 区间为空（`start == end`）表示不涉及区间；`size == 0` 表示不涉及容量。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapDiff {
    /// 权限
    pub access: CapAccess,
    /// 区间起点
    pub start: usize,
    /// 区间终点
    pub end: usize,
    /// 容量
    pub size: usize,
}

impl CapDiff {
    /// 只涉及权限
    pub fn rights(access: CapAccess) -> Self {
        Self {
            access,
            start: 0,
            end: 0,
            size: 0,
        }
    }

    /// 涉及权限与区间，容量取区间长度
    pub fn range(access: CapAccess, range: Range<usize>) -> Self {
        Self {
            access,
            start: range.start,
            end: range.end,
            size: range.end.saturating_sub(range.start),
        }
    }

    /// 是否带区间
    pub fn has_range(&self) -> bool {
        self.end > self.start
    }
}
