//! 物理内存：帧分配器、帧描述符与帧内容访问的组合
//!
//! 位图由一把自旋锁保护；描述符各自加锁。
//! 任何锁都只在本模块的方法内部短暂持有，不会跨越后备存储调用。

use alloc::sync::Arc;

use sync::SpinLock;

use crate::address::{PageNum, Ppn, PpnRange};
use crate::error::{invariant, MmResult};
use crate::frame_allocator::{FrameAllocator, FrameState};
use crate::frame_memory::FrameMemory;
use crate::page::{Page, PageArray, PageFlags};
use crate::vm_object::ObjectId;

/// 分配器统计
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameStats {
    /// 总帧数
    pub total: usize,
    /// 已占用帧数（含启动保留）
    pub allocated: usize,
    /// 空闲帧数
    pub free: usize,
}

/// 物理内存管理
pub struct PhysicalMemory {
    allocator: SpinLock<FrameAllocator>,
    pages: PageArray,
    frames: Arc<dyn FrameMemory>,
}

impl PhysicalMemory {
    /// 管理 `span` 范围内的物理帧
    pub fn new(span: PpnRange, frames: Arc<dyn FrameMemory>) -> Self {
        Self {
            allocator: SpinLock::new(FrameAllocator::new(span)),
            pages: PageArray::new(span),
            frames,
        }
    }

    /// 跟踪的帧范围
    pub fn span(&self) -> PpnRange {
        self.allocator.lock().span()
    }

    /// 帧内容访问接口
    pub fn frames(&self) -> &dyn FrameMemory {
        self.frames.as_ref()
    }

    /// 启动期保留 / 归还一段帧
    pub fn mark(&self, range: PpnRange, state: FrameState) -> MmResult<()> {
        self.allocator.lock().mark(range, state)
    }

    /// 分配一帧，引用计数保持为 0，等待插入页缓存
    pub fn alloc_page(&self) -> MmResult<Ppn> {
        let ppn = self.allocator.lock().alloc_frame()?;
        let page = self.pages.get(ppn)?;
        if !page.is_free() {
            return Err(invariant("allocated frame has live descriptor"));
        }
        Ok(ppn)
    }

    /// 分配一帧并清零
    pub fn alloc_zeroed(&self) -> MmResult<Ppn> {
        let ppn = self.alloc_page()?;
        self.frames.zero(ppn);
        Ok(ppn)
    }

    /// 分配一帧并复制 `src` 的内容
    pub fn alloc_copy(&self, src: Ppn) -> MmResult<Ppn> {
        let ppn = self.alloc_page()?;
        self.frames.copy(src, ppn);
        Ok(ppn)
    }

    /// 归还一个尚未插入任何页缓存的帧
    pub fn free_unowned(&self, ppn: Ppn) -> MmResult<()> {
        if !self.pages.get(ppn)?.is_free() {
            return Err(invariant("freeing a referenced frame"));
        }
        self.allocator.lock().free(ppn, 1)
    }

    /// 将帧交给 `owner` 的页缓存：设置属主与偏移，引用计数置 1
    pub(crate) fn adopt(&self, ppn: Ppn, owner: ObjectId, offset: usize) -> MmResult<()> {
        let mut page = self.pages.get(ppn)?;
        if !page.is_free() || page.owner.is_some() {
            return Err(invariant("adopting a frame that already has an owner"));
        }
        page.refcount = 1;
        page.owner = Some(owner);
        page.offset = offset;
        page.flags = PageFlags::empty();
        Ok(())
    }

    /// 在对象之间转移页（合并影子对象时使用）
    pub(crate) fn reassign(&self, ppn: Ppn, from: ObjectId, to: ObjectId) -> MmResult<()> {
        let mut page = self.pages.get(ppn)?;
        if page.owner != Some(from) {
            return Err(invariant("page owner mismatch on reassign"));
        }
        page.owner = Some(to);
        Ok(())
    }

    /// 增加一次映射引用
    pub fn get_page(&self, ppn: Ppn) -> MmResult<()> {
        let mut page = self.pages.get(ppn)?;
        if page.is_free() {
            return Err(invariant("mapping a free frame"));
        }
        page.refcount += 1;
        Ok(())
    }

    /// 释放一次引用；降到 0 时清空描述符并把帧还给分配器。
    ///
    /// 返回帧是否已被回收。
    pub fn put_page(&self, ppn: Ppn) -> MmResult<bool> {
        let freed = {
            let mut page = self.pages.get(ppn)?;
            if page.is_free() {
                return Err(invariant("releasing a free frame"));
            }
            page.refcount -= 1;
            if page.refcount == 0 {
                *page = Page::default();
                true
            } else {
                false
            }
        };
        if freed {
            self.allocator.lock().free(ppn, 1)?;
        }
        Ok(freed)
    }

    /// 释放页缓存持有的最后一次引用；帧必须随之回收，否则说明仍有映射残留
    pub(crate) fn release_cached(&self, ppn: Ppn) -> MmResult<()> {
        if self.put_page(ppn)? {
            Ok(())
        } else {
            log::error!("frame {:#x} still mapped when its owner released it", ppn.as_usize());
            Err(invariant("releasing a page that is still mapped"))
        }
    }

    /// 描述符快照
    pub fn page(&self, ppn: Ppn) -> MmResult<Page> {
        Ok(self.pages.get(ppn)?.clone())
    }

    /// 设置 / 清除帧标志
    pub fn set_flags(&self, ppn: Ppn, flags: PageFlags, on: bool) -> MmResult<()> {
        let mut page = self.pages.get(ppn)?;
        page.flags.set(flags, on);
        Ok(())
    }

    /// 帧是否在位图中被标记为占用
    pub fn is_allocated(&self, ppn: Ppn) -> bool {
        self.allocator.lock().is_allocated(ppn)
    }

    /// 所有描述符的快照
    pub(crate) fn pages(&self) -> &PageArray {
        &self.pages
    }

    /// 分配器统计
    pub fn stats(&self) -> FrameStats {
        let (total, allocated, free) = self.allocator.lock().get_stats();
        FrameStats {
            total,
            allocated,
            free,
        }
    }
}
