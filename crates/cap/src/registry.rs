//! 能力注册表
//!
//! 能力列表按 capid 递增排列；所有修改都经由注册表自身的方法完成，
//! 调用方通过 [`SharedRegistry`] 的锁串行化访问。

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::ops::Range;

use sync::SpinLock;
use uapi::cap::{CapAccess, ResourceType};
use uapi::types::{CapId, ContainerId, TaskId};

use crate::capability::Capability;
use crate::error::{CapError, CapResult};

/// 进程级共享的注册表句柄
pub type SharedRegistry = Arc<SpinLock<CapabilityRegistry>>;

/// 能力注册表
#[derive(Debug)]
pub struct CapabilityRegistry {
    container: ContainerId,
    pub(crate) caps: Vec<Capability>,
    next_capid: CapId,
}

impl CapabilityRegistry {
    /// 创建空注册表
    pub fn new(container: ContainerId) -> Self {
        Self {
            container,
            caps: Vec::new(),
            next_capid: 1,
        }
    }

    /// 用内核报告的资源清单初始化。
    ///
    /// 清单中的 capid 会被保留；任何一条违反边界不变量都会导致整体失败。
    pub fn from_inventory<I>(container: ContainerId, inventory: I) -> CapResult<Self>
    where
        I: IntoIterator<Item = Capability>,
    {
        let mut reg = Self::new(container);
        for cap in inventory {
            if !cap.bounds_ok() {
                log::error!("cap: inventory entry {} violates bounds", cap.capid);
                return Err(CapError::OutOfBounds);
            }
            if cap.capid == 0 || reg.get(cap.capid).is_some() {
                reg.insert(cap);
            } else {
                reg.next_capid = reg.next_capid.max(cap.capid + 1);
                reg.caps.push(cap);
            }
        }
        Ok(reg)
    }

    /// 包装为共享句柄
    pub fn into_shared(self) -> SharedRegistry {
        Arc::new(SpinLock::new(self))
    }

    /// 所属容器
    pub fn container(&self) -> ContainerId {
        self.container
    }

    /// 插入一条能力并分配新的 capid
    pub fn insert(&mut self, mut cap: Capability) -> CapId {
        cap.capid = self.next_capid;
        self.next_capid += 1;
        let id = cap.capid;
        self.caps.push(cap);
        id
    }

    /// 按 capid 查找
    pub fn get(&self, capid: CapId) -> Option<&Capability> {
        self.caps.iter().find(|c| c.capid == capid)
    }

    pub(crate) fn get_mut(&mut self, capid: CapId) -> Option<&mut Capability> {
        self.caps.iter_mut().find(|c| c.capid == capid)
    }

    /// 查找 `subject` 自己持有的能力
    pub(crate) fn owned_mut(&mut self, subject: TaskId, capid: CapId) -> CapResult<&mut Capability> {
        let cap = self.get_mut(capid).ok_or(CapError::NotFound)?;
        if cap.owner != subject {
            return Err(CapError::PermissionDenied);
        }
        Ok(cap)
    }

    /// `subject` 可见的全部能力
    pub fn visible(&self, subject: TaskId) -> impl Iterator<Item = &Capability> {
        self.caps.iter().filter(move |c| c.visible_to(subject))
    }

    /// 注册表中的能力总数
    pub fn len(&self) -> usize {
        self.caps.len()
    }

    /// 注册表是否为空
    pub fn is_empty(&self) -> bool {
        self.caps.is_empty()
    }

    /// 查找 `subject` 可见、指定资源类型的第一条能力
    pub fn find_by_type(&self, subject: TaskId, rtype: ResourceType) -> Option<&Capability> {
        self.visible(subject).find(|c| c.rtype == rtype)
    }

    /// 校验 `subject` 能否对资源执行 `op`。
    ///
    /// `range` 为 `None` 时不检查区间（数量型资源或整体操作）。
    /// 返回允许该操作的能力的 capid。
    ///
    /// # 错误
    /// - 没有该资源的能力：`NotFound`
    /// - 有覆盖区间的能力但权限不足：`PermissionDenied`
    /// - 有权限足够的能力但区间越界：`OutOfBounds`
    pub fn check(
        &self,
        subject: TaskId,
        rtype: ResourceType,
        resid: usize,
        op: CapAccess,
        range: Option<Range<usize>>,
    ) -> CapResult<CapId> {
        let mut found = false;
        let mut rights_ok = false;
        for cap in self
            .visible(subject)
            .filter(|c| c.rtype == rtype && c.resid == resid)
        {
            found = true;
            let has_rights = cap.access.contains(op);
            let in_range = range.as_ref().is_none_or(|r| cap.covers(r));
            if has_rights && in_range {
                return Ok(cap.capid);
            }
            rights_ok |= has_rights;
        }
        match (found, rights_ok) {
            (false, _) => Err(CapError::NotFound),
            (true, true) => Err(CapError::OutOfBounds),
            (true, false) => Err(CapError::PermissionDenied),
        }
    }

    /// 从 `parent` 派生一条只收窄、不放宽的新能力。
    ///
    /// 权限取交集后必须等于 `rights`，区间必须落在父能力内；
    /// 父能力本身不变。数量型能力不能派生。
    pub fn derive(
        &mut self,
        subject: TaskId,
        parent: CapId,
        range: Range<usize>,
        rights: CapAccess,
    ) -> CapResult<CapId> {
        let parent_cap = self.get(parent).ok_or(CapError::NotFound)?;
        if !parent_cap.visible_to(subject) {
            return Err(CapError::NotFound);
        }
        if parent_cap.is_quantity() {
            return Err(CapError::NotReplicable);
        }
        if parent_cap.access & rights != rights {
            return Err(CapError::PermissionDenied);
        }
        if range.start >= range.end || !parent_cap.covers(&range) {
            return Err(CapError::OutOfBounds);
        }

        let mut child = parent_cap.clone();
        child.owner = subject;
        child.access = rights;
        child.size = range.end - range.start;
        child.start = range.start;
        child.end = range.end;
        child.used = 0;
        child.shared = false;
        let id = self.insert(child);
        log::debug!("cap: derived {} from {} for task {}", id, parent, subject);
        Ok(id)
    }

    /// 消耗 `amount` 单位容量，超出 `size` 时拒绝
    pub fn consume(&mut self, capid: CapId, amount: usize) -> CapResult<()> {
        let cap = self.get_mut(capid).ok_or(CapError::NotFound)?;
        if cap.available() < amount {
            return Err(CapError::PermissionDenied);
        }
        cap.used += amount;
        Ok(())
    }

    /// 归还 `amount` 单位容量
    pub fn release(&mut self, capid: CapId, amount: usize) -> CapResult<()> {
        let cap = self.get_mut(capid).ok_or(CapError::NotFound)?;
        if cap.used < amount {
            return Err(CapError::InvalidArgument);
        }
        cap.used -= amount;
        Ok(())
    }

    /// 全部能力是否都满足边界不变量
    pub fn bounds_consistent(&self) -> bool {
        self.caps.iter().all(Capability::bounds_ok)
    }
}
