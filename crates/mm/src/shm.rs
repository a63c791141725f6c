//! System V 风格的共享内存段
//!
//! 每个段对应一个 `(FileKind::Shm, shmid)` 文件对象，由零填充 pager 供页，
//! 挂接时以共享方式映射进任务，写入直接落到这个对象的页缓存中。
//! 段的虚拟地址从全局地址池分配，所有任务中同一段的地址相同。
//!
//! 注册表自身为段对象持有一条链接：删除段只释放这条链接，
//! 最后一个挂接者卸下之后对象才被回收。

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use uapi::mm::{ShmFlags, VmFlags};
use uapi::types::{TaskId, Vnum};

use crate::address::{PageNum, Vpn, VpnRange};
use crate::config::{PAGE_SIZE, SHM_AREA_BASE, SHM_AREA_END, SHM_MAX_PAGES};
use crate::error::{MmError, MmResult};
use crate::manager::MemoryManager;
use crate::pager::FileKind;
use crate::vm_object::ObjectId;

/// 共享内存段标识
pub type ShmId = usize;

/// 共享内存段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShmSegment {
    /// 标识
    pub id: ShmId,
    /// 键；`None` 表示私有段
    pub key: Option<usize>,
    /// 在每个任务中的地址
    pub range: VpnRange,
    /// 段对象
    pub object: ObjectId,
    /// 已被删除，等待最后一个挂接者卸下
    pub removed: bool,
}

/// 共享内存段注册表
#[derive(Debug)]
pub struct ShmRegistry {
    segments: BTreeMap<ShmId, ShmSegment>,
    next_id: ShmId,
}

impl ShmRegistry {
    /// 空注册表
    pub fn new() -> Self {
        Self {
            segments: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// 按标识查找
    pub fn get(&self, id: ShmId) -> Option<&ShmSegment> {
        self.segments.get(&id)
    }

    /// 所有段（含已删除但仍被挂接的段）
    pub fn segments(&self) -> impl Iterator<Item = &ShmSegment> {
        self.segments.values()
    }

    fn find_key(&self, key: usize) -> Option<&ShmSegment> {
        self.segments
            .values()
            .find(|seg| !seg.removed && seg.key == Some(key))
    }

    fn find_addr(&self, vpn: Vpn) -> Option<&ShmSegment> {
        self.segments.values().find(|seg| seg.range.start() == vpn)
    }

    /// 在地址池中为 `npages` 页找第一段空闲地址
    fn alloc_range(&self, npages: usize) -> Option<VpnRange> {
        let mut taken: Vec<VpnRange> = self.segments.values().map(|seg| seg.range).collect();
        taken.sort_by_key(|range| range.start());
        let end = Vpn::from_addr_floor(SHM_AREA_END);
        let mut current = Vpn::from_addr_floor(SHM_AREA_BASE);
        for range in taken {
            let fits = VpnRange::checked_from_start_len(current, npages)
                .is_some_and(|candidate| candidate.end() <= range.start());
            if fits {
                break;
            }
            current = current.max(range.end());
        }
        VpnRange::checked_from_start_len(current, npages).filter(|range| range.end() <= end)
    }
}

impl Default for ShmRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryManager {
    /// 共享内存段注册表
    pub fn shm(&self) -> &ShmRegistry {
        &self.shm
    }

    /// 按键取得（或创建）共享内存段，返回段标识。
    ///
    /// - `key` 为 `None`：总是新建私有段
    /// - 键已存在：带 `CREAT | EXCL` 时返回 [`MmError::AlreadyExists`]，
    ///   段小于请求的页数时返回 [`MmError::InvalidArgument`]
    /// - 键不存在：带 `CREAT` 时新建，否则返回 [`MmError::NotFound`]
    pub fn shm_get(&mut self, key: Option<usize>, npages: usize, flags: ShmFlags) -> MmResult<ShmId> {
        if npages == 0 || npages > SHM_MAX_PAGES {
            return Err(MmError::InvalidArgument);
        }
        self.shm_purge();

        if let Some(key) = key {
            if let Some(seg) = self.shm.find_key(key) {
                if flags.contains(ShmFlags::CREAT | ShmFlags::EXCL) {
                    return Err(MmError::AlreadyExists);
                }
                if seg.range.len() < npages {
                    return Err(MmError::InvalidArgument);
                }
                return Ok(seg.id);
            }
            if !flags.contains(ShmFlags::CREAT) {
                return Err(MmError::NotFound);
            }
        }

        let range = self.shm.alloc_range(npages).ok_or(MmError::OutOfMemory)?;
        let id = self.shm.next_id;
        let devzero = self.devzero();
        let object = self.open_file(FileKind::Shm, id as Vnum, npages * PAGE_SIZE, devzero)?;
        self.objects.link(object)?;
        self.shm.next_id += 1;
        self.shm.segments.insert(
            id,
            ShmSegment {
                id,
                key,
                range,
                object,
                removed: false,
            },
        );
        log::info!(
            "shm: segment {} key {:?} at [{:#x}, {:#x})",
            id,
            key,
            range.start().start_addr(),
            range.end().start_addr()
        );
        Ok(id)
    }

    /// 把段挂接进任务，返回段地址
    pub fn shm_attach(&mut self, tid: TaskId, id: ShmId) -> MmResult<VpnRange> {
        let seg = *self
            .shm
            .get(id)
            .filter(|seg| !seg.removed)
            .ok_or(MmError::NotFound)?;
        self.vma_insert(
            tid,
            seg.range,
            VmFlags::READ | VmFlags::WRITE | VmFlags::SHARED,
            0,
            seg.object,
        )?;
        log::debug!("shm: task {} attached segment {}", tid, id);
        Ok(seg.range)
    }

    /// 卸下任务在 `vaddr` 处挂接的段
    pub fn shm_detach(&mut self, tid: TaskId, vaddr: usize) -> MmResult<()> {
        if vaddr % PAGE_SIZE != 0 {
            return Err(MmError::InvalidArgument);
        }
        let vpn = Vpn::from_addr_floor(vaddr);
        let seg = *self.shm.find_addr(vpn).ok_or(MmError::InvalidArgument)?;
        let attached = self
            .task(tid)?
            .space
            .find_area(vpn)
            .is_some_and(|area| area.head() == seg.object && area.range() == seg.range);
        if !attached {
            return Err(MmError::InvalidArgument);
        }
        self.vma_remove(tid, seg.range)?;
        log::debug!("shm: task {} detached segment {}", tid, seg.id);
        self.shm_purge();
        Ok(())
    }

    /// 删除段：不再能被取得或挂接，最后一个挂接者卸下后回收
    pub fn shm_remove(&mut self, id: ShmId) -> MmResult<()> {
        let seg = self
            .shm
            .segments
            .get_mut(&id)
            .filter(|seg| !seg.removed)
            .ok_or(MmError::NotFound)?;
        seg.removed = true;
        let object = seg.object;
        log::info!("shm: segment {} removed", id);
        let released = self.objects.unlink(&self.phys, object);
        self.shm_purge();
        released
    }

    /// 丢弃对象已被回收的已删除段，释放其地址
    fn shm_purge(&mut self) {
        let objects = &self.objects;
        self.shm
            .segments
            .retain(|_, seg| !seg.removed || objects.contains(seg.object));
    }
}
