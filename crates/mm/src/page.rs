//! 物理帧描述符
//!
//! 每个受管物理帧对应一个 [`Page`]，下标由帧号隐式计算。
//! 描述符数组独占所有 `Page` 记录；`owner` 只是弱引用（对象 ID），
//! 不会让对象保持存活。

use alloc::vec::Vec;

use bitflags::bitflags;
use sync::{SpinLock, SpinLockGuard};

use crate::address::{PageNum, Ppn, PpnRange};
use crate::error::{invariant, MmResult};
use crate::vm_object::ObjectId;

bitflags! {
    /// 帧标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PageFlags: u32 {
        /// 通过共享映射被写过，释放前需要写回
        const DIRTY = 1 << 0;
    }
}

/// 物理帧描述符
///
/// `refcount` = 页缓存持有的 1 次 + 每个已安装的任务映射 1 次。
/// 为 0 时帧归分配器所有。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Page {
    /// 引用计数
    pub refcount: usize,
    /// 所属 VM 对象（弱引用）
    pub owner: Option<ObjectId>,
    /// 在所属对象中的页偏移
    pub offset: usize,
    /// 标志
    pub flags: PageFlags,
}

impl Page {
    /// 是否空闲
    pub fn is_free(&self) -> bool {
        self.refcount == 0
    }
}

/// 与物理帧平行的描述符数组
///
/// 每个描述符各有一把短时锁，只在修改引用计数 / 属主时持有。
pub struct PageArray {
    base: Ppn,
    pages: Vec<SpinLock<Page>>,
}

impl PageArray {
    /// 为 `span` 中的每一帧建立空描述符
    pub fn new(span: PpnRange) -> Self {
        let mut pages = Vec::with_capacity(span.len());
        pages.resize_with(span.len(), || SpinLock::new(Page::default()));
        Self {
            base: span.start(),
            pages,
        }
    }

    /// 锁定并返回 `ppn` 的描述符
    pub fn get(&self, ppn: Ppn) -> MmResult<SpinLockGuard<'_, Page>> {
        if ppn < self.base {
            return Err(invariant("page descriptor out of range"));
        }
        self.pages
            .get(ppn - self.base)
            .map(|p| p.lock())
            .ok_or_else(|| invariant("page descriptor out of range"))
    }

    /// 描述符数量
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// 遍历 `(帧号, 描述符快照)`
    pub fn snapshot(&self) -> impl Iterator<Item = (Ppn, Page)> + '_ {
        self.pages
            .iter()
            .enumerate()
            .map(|(i, p)| (Ppn::from_usize(self.base.as_usize() + i), p.lock().clone()))
    }
}
