//! 任务级操作
//!
//! 任务创建 / fork / 退出、mmap / munmap / msync，以及供 IPC 参数校验用的
//! 地址查询。fork 时私有区域的链顶被两个新影子对象盖住，父子各持一个，
//! 父任务已有的可写私有映射被降为只读，之后的写入通过缺页重新分叉。

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use uapi::mm::{MapFlags, VmFlags};
use uapi::types::{CapId, TaskId};

use crate::address::{PageNum, Ppn, Vpn, VpnRange};
use crate::config::{MAX_MAP_PAGES, PAGE_SHIFT, PAGE_SIZE, USER_MMAP_BASE, USER_MMAP_END};
use crate::error::{defer_backing, finish_deferred, MmError, MmResult};
use crate::fault::FaultInfo;
use crate::file_io::{Fd, OpenFile};
use crate::manager::MemoryManager;
use crate::page::PageFlags;
use crate::vm_area::{AccessReason, AddressSpace, VmArea};
use crate::vm_object::ObjectId;

/// 受 pager 管理的任务
#[derive(Debug)]
pub struct Task {
    tid: TaskId,
    pub(crate) space: AddressSpace,
    pub(crate) files: BTreeMap<Fd, OpenFile>,
    quota: CapId,
}

impl Task {
    /// 任务号
    pub fn tid(&self) -> TaskId {
        self.tid
    }

    /// 地址空间
    pub fn space(&self) -> &AddressSpace {
        &self.space
    }

    /// 打开的文件
    pub fn files(&self) -> &BTreeMap<Fd, OpenFile> {
        &self.files
    }

    /// 为该任务消耗的线程配额能力
    pub fn quota(&self) -> CapId {
        self.quota
    }
}

/// mmap 的后备
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backing {
    /// 新建匿名对象
    Anonymous,
    /// 已打开的文件对象
    Object(ObjectId),
}

/// mmap 请求
#[derive(Debug, Clone, Copy)]
pub struct MmapRequest {
    /// 期望地址；带 [`VmFlags::FIXED`] 时必须使用该地址
    pub addr: Option<usize>,
    /// 页数
    pub npages: usize,
    /// 保护位与映射类型（SHARED / PRIVATE 二选一）
    pub flags: VmFlags,
    /// 后备
    pub backing: Backing,
    /// 对象内的起始页偏移
    pub file_offset: usize,
}

impl MemoryManager {
    // ========================================================================
    // 任务生命周期
    // ========================================================================

    /// 登记一个新任务，地址空间为空
    pub fn task_create(&mut self, tid: TaskId) -> MmResult<()> {
        if self.tasks.contains_key(&tid) {
            return Err(MmError::InvalidArgument);
        }
        let quota = self.charge_task()?;
        self.tasks.insert(
            tid,
            Task {
                tid,
                space: AddressSpace::new(),
                files: BTreeMap::new(),
                quota,
            },
        );
        log::info!("task: created task {}", tid);
        Ok(())
    }

    /// 复制 `parent` 的地址空间给新任务 `child`
    pub fn fork(&mut self, parent: TaskId, child: TaskId) -> MmResult<()> {
        if self.tasks.contains_key(&child) {
            return Err(MmError::InvalidArgument);
        }
        if !self.tasks.contains_key(&parent) {
            return Err(MmError::NotFound);
        }
        let quota = self.charge_task()?;

        let mut child_space = AddressSpace::new();
        if let Err(err) = self.fork_areas(parent, &mut child_space) {
            for area in child_space.take_all() {
                self.release_area(child, area)?;
            }
            self.uncharge_task(quota)?;
            return Err(err);
        }
        let files = self.fork_files(parent)?;

        log::info!(
            "task: forked {} -> {} ({} areas)",
            parent,
            child,
            child_space.len()
        );
        self.tasks.insert(
            child,
            Task {
                tid: child,
                space: child_space,
                files,
                quota,
            },
        );
        Ok(())
    }

    fn fork_areas(&mut self, parent: TaskId, child_space: &mut AddressSpace) -> MmResult<()> {
        let task = self.tasks.get_mut(&parent).ok_or(MmError::NotFound)?;
        for area in task.space.areas_mut() {
            let old = area.head();
            let child_head = if area.is_shared() {
                self.objects.link(old)?;
                old
            } else {
                let parent_head = self.objects.shadow_create(old)?;
                self.objects.link(parent_head)?;
                let child_head = self.objects.shadow_create(old)?;
                self.objects.link(child_head)?;
                area.set_head(parent_head);
                self.objects.unlink(&self.phys, old)?;

                let prot = area.flags();
                for (vpn, mapping) in area.mapped_mut().iter_mut().filter(|(_, m)| m.writable) {
                    self.kernel.map(mapping.ppn, *vpn, 1, MapFlags::for_prot(prot, false), parent)?;
                    mapping.writable = false;
                }
                child_head
            };
            child_space.insert_area(VmArea::new(area.range(), area.flags(), area.file_offset(), child_head))?;
        }
        Ok(())
    }

    /// 子任务继承父任务的打开文件，各自持有一条对象链接
    fn fork_files(&mut self, parent: TaskId) -> MmResult<BTreeMap<Fd, OpenFile>> {
        let files = self.task(parent)?.files.clone();
        for file in files.values() {
            self.objects.link(file.object)?;
        }
        Ok(files)
    }

    /// 任务退出：关闭文件、释放全部区域并归还线程配额。
    ///
    /// 脏页写回失败时任务照样被完整回收，之后返回该后备存储错误。
    pub fn exit(&mut self, tid: TaskId) -> MmResult<()> {
        let mut task = self.tasks.remove(&tid).ok_or(MmError::NotFound)?;
        let mut pending = None;
        for file in core::mem::take(&mut task.files).into_values() {
            defer_backing(&mut pending, self.objects.unlink(&self.phys, file.object))?;
        }
        let areas = task.space.take_all();
        let count = areas.len();
        for area in areas {
            defer_backing(&mut pending, self.release_area(tid, area))?;
        }
        self.uncharge_task(task.quota)?;
        log::info!("task: task {} exited, released {} areas", tid, count);
        finish_deferred(pending)
    }

    // ========================================================================
    // VM 区域目录
    // ========================================================================

    /// 在任务地址空间中插入区域，并为链顶增加一条链接
    pub fn vma_insert(
        &mut self,
        tid: TaskId,
        range: VpnRange,
        flags: VmFlags,
        file_offset: usize,
        head: ObjectId,
    ) -> MmResult<()> {
        self.objects.get(head)?;
        let task = self.tasks.get_mut(&tid).ok_or(MmError::NotFound)?;
        task.space
            .insert_area(VmArea::new(range, flags, file_offset, head))?;
        self.objects.link(head)
    }

    /// 移除 `range` 覆盖的部分：被部分覆盖的区域会被切开，
    /// 完全覆盖的区域释放其链接，落在其中的映射被撤销
    pub fn vma_remove(&mut self, tid: TaskId, range: VpnRange) -> MmResult<()> {
        let task = self.tasks.get(&tid).ok_or(MmError::NotFound)?;
        let starts: Vec<Vpn> = task
            .space
            .overlapping(&range)
            .map(|area| area.range().start())
            .collect();

        let mut pending = None;
        for start in starts {
            let task = self.tasks.get_mut(&tid).ok_or(MmError::NotFound)?;
            let Some(area) = task.space.take_area(start) else {
                continue;
            };
            let head = area.head();
            let (left, right, removed) = area.carve(range);
            let kept = usize::from(left.is_some()) + usize::from(right.is_some());
            for piece in left.into_iter().chain(right) {
                task.space.insert_area(piece)?;
            }
            self.release_mappings(tid, removed)?;
            match kept {
                0 => defer_backing(&mut pending, self.objects.unlink(&self.phys, head))?,
                2 => self.objects.link(head)?,
                _ => {}
            }
        }
        finish_deferred(pending)
    }

    /// 按地址查找区域
    pub fn vma_find(&self, tid: TaskId, vaddr: usize) -> Option<&VmArea> {
        self.tasks.get(&tid)?.space.find_area(Vpn::from_addr_floor(vaddr))
    }

    // ========================================================================
    // mmap / munmap / msync
    // ========================================================================

    /// 建立映射，返回所占的虚拟页区间
    pub fn mmap(&mut self, tid: TaskId, req: MmapRequest) -> MmResult<VpnRange> {
        if req.npages == 0 || req.npages > MAX_MAP_PAGES {
            return Err(MmError::InvalidArgument);
        }
        // 对象内的结束页及其字节偏移都必须可表示
        let end_page = req
            .file_offset
            .checked_add(req.npages)
            .filter(|end| end.checked_mul(PAGE_SIZE).is_some())
            .ok_or(MmError::InvalidArgument)?;
        if req.flags.contains(VmFlags::SHARED) == req.flags.contains(VmFlags::PRIVATE) {
            return Err(MmError::InvalidArgument);
        }
        if !self.tasks.contains_key(&tid) {
            return Err(MmError::NotFound);
        }

        let range = if req.flags.contains(VmFlags::FIXED) {
            let addr = req.addr.ok_or(MmError::InvalidArgument)?;
            if addr % PAGE_SIZE != 0 {
                return Err(MmError::InvalidArgument);
            }
            let range = user_pages(addr, req.npages)?;
            self.vma_remove(tid, range)?;
            range
        } else {
            let space = &self.task(tid)?.space;
            let hint = req
                .addr
                .map(Vpn::from_addr_floor)
                .unwrap_or(Vpn::from_addr_floor(USER_MMAP_BASE));
            let end = Vpn::from_addr_floor(USER_MMAP_END);
            space
                .find_free_area(hint, end, req.npages)
                .or_else(|| space.find_free_area(Vpn::from_addr_floor(USER_MMAP_BASE), end, req.npages))
                .ok_or(MmError::OutOfMemory)?
        };

        let mut flags = req.flags - VmFlags::FIXED;
        let head = match req.backing {
            Backing::Anonymous => {
                flags |= VmFlags::ANONYMOUS;
                self.create_anonymous(end_page)?
            }
            Backing::Object(id) => {
                self.objects.get(id)?.as_file().ok_or(MmError::InvalidArgument)?;
                id
            }
        };

        if let Err(err) = self.vma_insert(tid, range, flags, req.file_offset, head) {
            if req.backing == Backing::Anonymous {
                self.objects.object_delete(head)?;
            }
            return Err(err);
        }
        log::debug!(
            "task: mmap task {} [{:#x}, {:#x}) {:?} -> {}",
            tid,
            range.start().start_addr(),
            range.end().start_addr(),
            flags,
            head
        );
        Ok(range)
    }

    /// 解除 `[vaddr, vaddr + npages 页)` 的映射
    pub fn munmap(&mut self, tid: TaskId, vaddr: usize, npages: usize) -> MmResult<()> {
        if npages == 0 || vaddr % PAGE_SIZE != 0 {
            return Err(MmError::InvalidArgument);
        }
        self.vma_remove(tid, user_pages(vaddr, npages)?)
    }

    /// 把共享文件映射中的脏页写回后备存储，返回写回的页数。
    ///
    /// 写回的页被重新映射为只读，下一次写入会再次缺页并重新标脏。
    pub fn msync(&mut self, tid: TaskId, vaddr: usize, npages: usize) -> MmResult<usize> {
        let range = user_pages(vaddr, npages)?;
        let task = self.tasks.get_mut(&tid).ok_or(MmError::NotFound)?;
        let mut written = 0;

        for area in task.space.areas_mut() {
            if !area.is_shared() || !area.range().overlaps(&range) {
                continue;
            }
            let Some(file) = self.objects.get(area.head())?.as_file().cloned() else {
                continue;
            };
            let prot = area.flags();
            for (vpn, mapping) in area.mapped_mut().range_mut(range.start()..range.end()) {
                let page = self.phys.page(mapping.ppn)?;
                if !page.flags.contains(PageFlags::DIRTY) {
                    continue;
                }
                file.pager()
                    .page_out(file.vnum, page.offset, mapping.ppn, self.phys.frames())?;
                self.phys.set_flags(mapping.ppn, PageFlags::DIRTY, false)?;
                if mapping.writable {
                    self.kernel.map(mapping.ppn, *vpn, 1, MapFlags::for_prot(prot, false), tid)?;
                    mapping.writable = false;
                }
                written += 1;
            }
        }
        log::debug!("task: msync task {} wrote back {} pages", tid, written);
        Ok(written)
    }

    // ========================================================================
    // 地址查询
    // ========================================================================

    /// 预先解决一段地址的缺页；写访问先按读解决，再升级为写
    pub fn prefault(&mut self, tid: TaskId, vaddr: usize, len: usize, reason: AccessReason) -> MmResult<()> {
        for vpn in user_bytes(vaddr, len)? {
            let addr = vpn.start_addr();
            let area = self.vma_find(tid, addr);
            let mapped = area.and_then(|area| area.mapped().get(&vpn).copied());
            let readable = area.is_some_and(|area| area.permits(AccessReason::Read));
            match (reason, mapped) {
                (AccessReason::Read, Some(_)) => {}
                (AccessReason::Write, Some(m)) if m.writable => {}
                (AccessReason::Write, None) if readable => {
                    self.handle_fault(FaultInfo::read(tid, addr))?;
                    self.handle_fault(FaultInfo::write(tid, addr))?;
                }
                _ => {
                    self.handle_fault(FaultInfo { task: tid, vaddr: addr, reason })?;
                }
            }
        }
        Ok(())
    }

    /// 校验任务在 `[vaddr, vaddr + len)` 上具有 `prot` 权限
    pub fn validate_task_range(&self, tid: TaskId, vaddr: usize, len: usize, prot: VmFlags) -> MmResult<()> {
        let task = self.task(tid)?;
        for vpn in user_bytes(vaddr, len)? {
            match task.space.find_area(vpn) {
                Some(area) if area.allows(prot) => {}
                _ => return Err(MmError::SegmentationFault),
            }
        }
        Ok(())
    }

    /// 地址当前在链中对应的帧；只查找，不触发缺页
    pub fn task_virt_to_page(&self, tid: TaskId, vaddr: usize) -> MmResult<Ppn> {
        let vpn = Vpn::from_addr_floor(vaddr);
        let area = self
            .task(tid)?
            .space
            .find_area(vpn)
            .ok_or(MmError::SegmentationFault)?;
        self.objects
            .shadow_chain_lookup(area.head(), area.offset_of(vpn))?
            .map(|(ppn, _)| ppn)
            .ok_or(MmError::NotFound)
    }

    /// 读取任务内存：必要时先解决读缺页
    pub fn read_task_memory(&mut self, tid: TaskId, vaddr: usize, buf: &mut [u8]) -> MmResult<()> {
        self.prefault(tid, vaddr, buf.len(), AccessReason::Read)?;
        let mut done = 0;
        for (ppn, offset, len) in self.task_chunks(tid, vaddr, buf.len())? {
            self.phys.frames().read(ppn, offset, &mut buf[done..done + len]);
            done += len;
        }
        Ok(())
    }

    /// 写入任务内存：必要时先解决写缺页（私有区域会在此分叉）
    pub fn write_task_memory(&mut self, tid: TaskId, vaddr: usize, data: &[u8]) -> MmResult<()> {
        self.prefault(tid, vaddr, data.len(), AccessReason::Write)?;
        let mut done = 0;
        for (ppn, offset, len) in self.task_chunks(tid, vaddr, data.len())? {
            self.phys.frames().write(ppn, offset, &data[done..done + len]);
            done += len;
        }
        Ok(())
    }

    /// 把 `[vaddr, vaddr + len)` 拆成 (帧, 帧内偏移, 长度)，使用已安装的映射
    fn task_chunks(&self, tid: TaskId, vaddr: usize, len: usize) -> MmResult<Vec<(Ppn, usize, usize)>> {
        let mut chunks = Vec::new();
        let mut addr = vaddr;
        let end = vaddr.checked_add(len).ok_or(MmError::InvalidArgument)?;
        while addr < end {
            let vpn = Vpn::from_addr_floor(addr);
            let ppn = self
                .vma_find(tid, addr)
                .and_then(|area| area.mapped().get(&vpn))
                .map(|m| m.ppn)
                .ok_or(MmError::SegmentationFault)?;
            let offset = addr - vpn.start_addr();
            let n = (vpn.end_addr() - addr).min(end - addr);
            chunks.push((ppn, offset, n));
            addr += n;
        }
        Ok(chunks)
    }
}

/// 客户端给出的 `[vaddr, vaddr + npages 页)`。
///
/// 页数超过 mmap 窗口，或结束地址无法表示时视为非法参数。
pub(crate) fn user_pages(vaddr: usize, npages: usize) -> MmResult<VpnRange> {
    if npages > MAX_MAP_PAGES {
        return Err(MmError::InvalidArgument);
    }
    VpnRange::checked_from_start_len(Vpn::from_addr_floor(vaddr), npages)
        .filter(|range| range.end().as_usize() <= usize::MAX >> PAGE_SHIFT)
        .ok_or(MmError::InvalidArgument)
}

/// 客户端给出的字节区间 `[vaddr, vaddr + len)` 所覆盖的页
pub(crate) fn user_bytes(vaddr: usize, len: usize) -> MmResult<VpnRange> {
    let end = vaddr
        .checked_add(len)
        .and_then(Vpn::checked_from_addr_ceil)
        .ok_or(MmError::InvalidArgument)?;
    let range = VpnRange::new(Vpn::from_addr_floor(vaddr), end);
    if range.len() > MAX_MAP_PAGES {
        return Err(MmError::InvalidArgument);
    }
    Ok(range)
}
