//! 内存管理上下文
//!
//! [`MemoryManager`] 把物理内存、对象表、任务目录、能力注册表和内核接口
//! 收拢在一起，作为显式上下文沿调用链传递，而不是散落为全局单例。
//! pager 任务一次只处理一个请求，因此这里的可变借用即可串行化所有 VM 修改。

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use cap::{CapAccess, ResourceType, SharedRegistry};
use uapi::types::{CapId, ContainerId, TaskId, Vnum};

use crate::address::{PageNum, Ppn, PpnRange, Vpn};
use crate::config::PAGE_SIZE;
use crate::error::{MmError, MmResult};
use crate::frame_allocator::FrameState;
use crate::frame_memory::FrameMemory;
use crate::kernel::KernelOps;
use crate::pager::{BootFilePager, DevZeroPager, FileKind, Pager};
use crate::phys::{FrameStats, PhysicalMemory};
use crate::shm::ShmRegistry;
use crate::task::Task;
use crate::vm_area::{Mapping, VmArea};
use crate::vm_object::{FileObject, ObjectFlags, ObjectId, ObjectKind, ObjectStats, ObjectTable};

/// 构造 [`MemoryManager`] 所需的资源
pub struct MmParams {
    /// pager 自身的任务号（能力校验的主体）
    pub pager_tid: TaskId,
    /// 所属容器（物理内存能力的资源号）
    pub container: ContainerId,
    /// 受管理的物理帧范围
    pub span: PpnRange,
    /// 帧内容访问
    pub frames: Arc<dyn FrameMemory>,
    /// 内核系统调用
    pub kernel: Arc<dyn KernelOps>,
    /// 能力注册表
    pub caps: SharedRegistry,
}

/// 启动镜像
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootImage {
    /// 名称
    pub name: String,
    /// 所在物理帧
    pub range: PpnRange,
}

/// 全局统计
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MmStats {
    /// 物理帧
    pub frames: FrameStats,
    /// VM 对象
    pub objects: ObjectStats,
    /// 任务数
    pub tasks: usize,
}

/// 内存管理上下文
pub struct MemoryManager {
    pub(crate) pager_tid: TaskId,
    pub(crate) container: ContainerId,
    pub(crate) phys: PhysicalMemory,
    pub(crate) objects: ObjectTable,
    pub(crate) tasks: BTreeMap<TaskId, Task>,
    pub(crate) caps: SharedRegistry,
    pub(crate) kernel: Arc<dyn KernelOps>,
    pub(crate) shm: ShmRegistry,
    devzero: Arc<dyn Pager>,
    boot_images: Vec<BootImage>,
    next_anon_vnum: Vnum,
}

impl MemoryManager {
    /// 创建上下文；所有帧初始为空闲
    pub fn new(params: MmParams) -> Self {
        log::info!(
            "mm: managing frames [{:#x}, {:#x})",
            params.span.start().as_usize(),
            params.span.end().as_usize()
        );
        Self {
            pager_tid: params.pager_tid,
            container: params.container,
            phys: PhysicalMemory::new(params.span, params.frames),
            objects: ObjectTable::new(),
            tasks: BTreeMap::new(),
            caps: params.caps,
            kernel: params.kernel,
            shm: ShmRegistry::new(),
            devzero: Arc::new(DevZeroPager),
            boot_images: Vec::new(),
            next_anon_vnum: 1,
        }
    }

    /// pager 任务号
    pub fn pager_tid(&self) -> TaskId {
        self.pager_tid
    }

    /// 物理内存
    pub fn phys(&self) -> &PhysicalMemory {
        &self.phys
    }

    /// 对象表
    pub fn objects(&self) -> &ObjectTable {
        &self.objects
    }

    /// 能力注册表
    pub fn caps(&self) -> &SharedRegistry {
        &self.caps
    }

    /// 内核接口
    pub fn kernel(&self) -> &Arc<dyn KernelOps> {
        &self.kernel
    }

    /// 按任务号取任务
    pub fn task(&self, tid: TaskId) -> MmResult<&Task> {
        self.tasks.get(&tid).ok_or(MmError::NotFound)
    }

    /// 所有任务
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    /// 全局统计
    pub fn stats(&self) -> MmStats {
        MmStats {
            frames: self.phys.stats(),
            objects: self.objects.stats(),
            tasks: self.tasks.len(),
        }
    }

    // ========================================================================
    // 启动期
    // ========================================================================

    /// 启动期保留一段帧（镜像、内核占用区等）
    pub fn reserve(&mut self, range: PpnRange) -> MmResult<()> {
        self.phys.mark(range, FrameState::Used)
    }

    /// 登记一个启动镜像，并保留其所在帧
    pub fn register_boot_image(&mut self, name: &str, range: PpnRange) -> MmResult<()> {
        self.reserve(range)?;
        log::info!(
            "mm: boot image '{}' at [{:#x}, {:#x})",
            name,
            range.start().as_usize(),
            range.end().as_usize()
        );
        self.boot_images.push(BootImage {
            name: String::from(name),
            range,
        });
        Ok(())
    }

    /// 已登记的启动镜像
    pub fn boot_images(&self) -> &[BootImage] {
        &self.boot_images
    }

    // ========================================================================
    // 文件对象
    // ========================================================================

    /// 打开（或复用）一个文件对象。同一 `(kind, vnum)` 只对应一个对象。
    pub fn open_file(&mut self, kind: FileKind, vnum: Vnum, length: usize, pager: Arc<dyn Pager>) -> MmResult<ObjectId> {
        if let Some(id) = self.objects.find_file(kind, vnum) {
            self.objects.grow_file(id, length)?;
            return Ok(id);
        }
        let file = FileObject::new(kind, vnum, length, pager);
        Ok(self.objects.object_create(ObjectKind::File(file), ObjectFlags::READ))
    }

    /// 打开启动镜像对应的文件对象
    pub fn open_boot_file(&mut self, name: &str) -> MmResult<ObjectId> {
        let (idx, image) = self
            .boot_images
            .iter()
            .enumerate()
            .find(|(_, img)| img.name == name)
            .ok_or(MmError::NotFound)?;
        let range = image.range;
        self.open_file(
            FileKind::BootFile,
            idx as Vnum,
            range.len() * PAGE_SIZE,
            Arc::new(BootFilePager::new(range)),
        )
    }

    /// 新建一个 `npages` 页的匿名（零填充）对象
    pub fn create_anonymous(&mut self, npages: usize) -> MmResult<ObjectId> {
        let length = npages.checked_mul(PAGE_SIZE).ok_or(MmError::InvalidArgument)?;
        let vnum = self.next_anon_vnum;
        self.next_anon_vnum += 1;
        let file = FileObject::new(FileKind::DevZero, vnum, length, self.devzero.clone());
        Ok(self.objects.object_create(
            ObjectKind::File(file),
            ObjectFlags::READ | ObjectFlags::WRITE | ObjectFlags::ANONYMOUS,
        ))
    }

    /// 零填充 pager，匿名对象与共享内存段共用
    pub(crate) fn devzero(&self) -> Arc<dyn Pager> {
        self.devzero.clone()
    }

    // ========================================================================
    // 能力
    // ========================================================================

    /// 校验 pager 能否把 `ppn` 以给定权限映射给任务
    pub(crate) fn check_map(&self, ppn: Ppn, writable: bool) -> MmResult<()> {
        let mut op = CapAccess::MAP_READ;
        if writable {
            op |= CapAccess::MAP_WRITE;
        }
        let pfn = ppn.as_usize();
        self.caps
            .lock()
            .check(self.pager_tid, ResourceType::Physmem, self.container, op, Some(pfn..pfn + 1))?;
        Ok(())
    }

    /// 为新任务消耗一个线程配额
    pub(crate) fn charge_task(&self) -> MmResult<CapId> {
        let mut caps = self.caps.lock();
        let capid = caps.check(
            self.pager_tid,
            ResourceType::ThreadPool,
            self.container,
            CapAccess::TCTRL_CREATE,
            None,
        )?;
        caps.consume(capid, 1)?;
        Ok(capid)
    }

    /// 归还线程配额
    pub(crate) fn uncharge_task(&self, capid: CapId) -> MmResult<()> {
        self.caps.lock().release(capid, 1)?;
        Ok(())
    }

    // ========================================================================
    // 映射回收
    // ========================================================================

    /// 撤销一组已安装的映射，并释放它们持有的帧引用
    pub(crate) fn release_mappings(&self, task: TaskId, mapped: BTreeMap<Vpn, Mapping>) -> MmResult<()> {
        for (vpn, mapping) in mapped {
            if let Err(err) = self.kernel.unmap(vpn, 1, task) {
                log::warn!("mm: unmap {:#x} in task {} failed: {}", vpn.start_addr(), task, err);
            }
            self.phys.put_page(mapping.ppn)?;
        }
        Ok(())
    }

    /// 释放整个区域：撤销映射，再释放它对链顶的链接
    pub(crate) fn release_area(&mut self, task: TaskId, mut area: VmArea) -> MmResult<()> {
        let mapped = core::mem::take(area.mapped_mut());
        self.release_mappings(task, mapped)?;
        self.objects.unlink(&self.phys, area.head())
    }
}
