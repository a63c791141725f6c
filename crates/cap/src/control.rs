//! `capability_control` 请求处理
//!
//! 对应内核的同名系统调用：读取能力、共享、转授、复制、拆分与收窄。

use alloc::vec::Vec;

use uapi::cap::{CapAccess, CapControlRequest, GrantFlags, ShareScope};
use uapi::types::{CapId, TaskId};

use crate::capability::{CapDiff, Capability};
use crate::error::{CapError, CapResult};
use crate::registry::CapabilityRegistry;

/// `capability_control` 的请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapControl {
    /// 调用者可见的能力数量
    Ncaps,
    /// 读出调用者可见的能力
    Read,
    /// 共享给容器
    Share {
        /// 目标能力（`ShareScope::All` 时忽略）
        capid: CapId,
        /// 范围
        scope: ShareScope,
    },
    /// 转授给另一个任务
    Grant {
        /// 目标能力
        capid: CapId,
        /// 接收者
        target: TaskId,
        /// 附加标志
        flags: GrantFlags,
    },
    /// 复制
    Replicate {
        /// 目标能力
        capid: CapId,
    },
    /// 从原能力中拆出 `diff`
    Split {
        /// 原能力
        capid: CapId,
        /// 拆出的部分
        diff: CapDiff,
    },
    /// 原地收窄为 `new`
    Deduce {
        /// 原能力
        capid: CapId,
        /// 收窄后的权限/区间/容量
        new: CapDiff,
    },
}

impl CapControl {
    /// 对应的请求码
    pub fn request(&self) -> CapControlRequest {
        match self {
            CapControl::Ncaps => CapControlRequest::Ncaps,
            CapControl::Read => CapControlRequest::Read,
            CapControl::Share { .. } => CapControlRequest::Share,
            CapControl::Grant { .. } => CapControlRequest::Grant,
            CapControl::Replicate { .. } => CapControlRequest::Replicate,
            CapControl::Split { .. } => CapControlRequest::Split,
            CapControl::Deduce { .. } => CapControlRequest::Deduce,
        }
    }
}

/// `capability_control` 的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapReply {
    /// 数量
    Count(usize),
    /// 能力列表
    Caps(Vec<Capability>),
    /// 新建的能力
    New(CapId),
    /// 完成
    Done,
}

impl CapabilityRegistry {
    /// 处理一次 `capability_control` 请求
    pub fn capability_control(&mut self, caller: TaskId, req: CapControl) -> CapResult<CapReply> {
        log::trace!("cap: task {} {:?}", caller, req.request());
        match req {
            CapControl::Ncaps => Ok(CapReply::Count(self.visible(caller).count())),
            CapControl::Read => Ok(CapReply::Caps(self.visible(caller).cloned().collect())),
            CapControl::Share { capid, scope } => self.share(caller, capid, scope),
            CapControl::Grant {
                capid,
                target,
                flags,
            } => self.grant(caller, capid, target, flags).map(|_| CapReply::Done),
            CapControl::Replicate { capid } => self.replicate(caller, capid).map(CapReply::New),
            CapControl::Split { capid, diff } => self.split(caller, capid, diff).map(CapReply::New),
            CapControl::Deduce { capid, new } => self.deduce(caller, capid, new).map(|_| CapReply::Done),
        }
    }

    fn share(&mut self, caller: TaskId, capid: CapId, scope: ShareScope) -> CapResult<CapReply> {
        match scope {
            ShareScope::Single => {
                let cap = self.owned_mut(caller, capid)?;
                if !cap.access.contains(CapAccess::CAP_SHARE) {
                    return Err(CapError::PermissionDenied);
                }
                cap.shared = true;
                Ok(CapReply::Count(1))
            }
            ShareScope::All => {
                let mut count = 0;
                for cap in self
                    .caps
                    .iter_mut()
                    .filter(|c| c.owner == caller && c.access.contains(CapAccess::CAP_SHARE))
                {
                    cap.shared = true;
                    count += 1;
                }
                if count == 0 {
                    return Err(CapError::PermissionDenied);
                }
                Ok(CapReply::Count(count))
            }
        }
    }

    fn grant(&mut self, caller: TaskId, capid: CapId, target: TaskId, flags: GrantFlags) -> CapResult<()> {
        if target == caller {
            return Err(CapError::InvalidArgument);
        }
        let cap = self.owned_mut(caller, capid)?;
        if !cap.access.contains(CapAccess::CAP_GRANT) {
            return Err(CapError::PermissionDenied);
        }
        // 已被消耗的能力不能整体转手
        if cap.used != 0 {
            return Err(CapError::Busy);
        }
        cap.owner = target;
        cap.shared = false;
        if flags.contains(GrantFlags::IMMUTABLE) {
            cap.access.remove(CapAccess::CAP_MODIFY | CapAccess::CAP_GRANT);
        }
        log::debug!("cap: {} granted {} -> {}", capid, caller, target);
        Ok(())
    }

    fn replicate(&mut self, caller: TaskId, capid: CapId) -> CapResult<CapId> {
        let cap = self.owned_mut(caller, capid)?;
        if cap.is_quantity() {
            return Err(CapError::NotReplicable);
        }
        if !cap.access.contains(CapAccess::CAP_REPLICATE) {
            return Err(CapError::PermissionDenied);
        }
        let mut copy = cap.clone();
        copy.used = 0;
        copy.shared = false;
        Ok(self.insert(copy))
    }

    /// 拆分：新能力取得 `diff` 描述的权限、区间与容量，原能力保留剩余部分。
    ///
    /// 只拆权限（不带区间与容量）时，原能力失去这些权限且不得被拆空。
    fn split(&mut self, caller: TaskId, capid: CapId, diff: CapDiff) -> CapResult<CapId> {
        let orig = self.owned_mut(caller, capid)?;
        if !orig.access.contains(CapAccess::CAP_SPLIT) {
            return Err(CapError::PermissionDenied);
        }
        if !orig.access.contains(diff.access) {
            return Err(CapError::PermissionDenied);
        }

        let mut remain = orig.clone();
        let mut child = orig.clone();
        child.access = diff.access;
        child.used = 0;
        child.shared = false;

        if diff.has_range() {
            if !orig.is_range() || !orig.covers(&(diff.start..diff.end)) {
                return Err(CapError::OutOfBounds);
            }
            // 只能切掉头部或尾部，剩余部分必须保持连续且非空
            if diff.start == orig.start && diff.end < orig.end {
                remain.start = diff.end;
            } else if diff.end == orig.end && diff.start > orig.start {
                remain.end = diff.start;
            } else {
                return Err(CapError::InvalidArgument);
            }
            child.start = diff.start;
            child.end = diff.end;
        }

        if diff.size != 0 {
            if diff.size > orig.available() {
                return Err(CapError::OutOfBounds);
            }
            remain.size -= diff.size;
            child.size = diff.size;
        } else if diff.has_range() {
            return Err(CapError::InvalidArgument);
        } else {
            // 纯权限拆分
            remain.access.remove(diff.access);
            if remain.access.is_empty() || diff.access.is_empty() {
                return Err(CapError::InvalidArgument);
            }
        }

        if !remain.bounds_ok() || !child.bounds_ok() {
            return Err(CapError::OutOfBounds);
        }

        *orig = remain;
        let id = self.insert(child);
        log::debug!("cap: split {} -> {}", capid, id);
        Ok(id)
    }

    /// 收窄：权限只能减少，区间只能缩小，容量只能减少且不低于已用量。
    fn deduce(&mut self, caller: TaskId, capid: CapId, new: CapDiff) -> CapResult<()> {
        let cap = self.owned_mut(caller, capid)?;
        if !cap.access.contains(CapAccess::CAP_DEDUCE) {
            return Err(CapError::PermissionDenied);
        }
        if !cap.access.contains(new.access) {
            return Err(CapError::PermissionDenied);
        }

        let mut narrowed = cap.clone();
        narrowed.access = new.access;
        if new.has_range() {
            if !cap.covers(&(new.start..new.end)) {
                return Err(CapError::OutOfBounds);
            }
            narrowed.start = new.start;
            narrowed.end = new.end;
        }
        if new.size != 0 {
            if new.size > cap.size {
                return Err(CapError::OutOfBounds);
            }
            narrowed.size = new.size;
        }
        if narrowed.is_range() && narrowed.size > narrowed.end - narrowed.start {
            narrowed.size = narrowed.end - narrowed.start;
        }
        if !narrowed.bounds_ok() {
            return Err(CapError::OutOfBounds);
        }
        *cap = narrowed;
        Ok(())
    }
}
