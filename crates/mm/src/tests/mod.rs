// Unit tests for the VM subsystem.
//
// The pager's environment (kernel, physical memory, backing store) is provided by the mocks in
// `test-support`; the trait impls that glue them to this crate live here.

extern crate std;

use alloc::sync::Arc;
use alloc::vec::Vec;

use cap::{CapAccess, CapControl, CapReply, CapType, Capability, CapabilityRegistry, ResourceType};
use test_support::mock::mm::{MockBackingStore, MockFrameMemory, MockKernel};
use uapi::errno::EIO;
use uapi::mm::{MapFlags, VmFlags};
use uapi::types::{ContainerId, TaskId, Vnum};

use crate::address::{PageNum, Ppn, PpnRange, Vpn};
use crate::config::PAGE_SIZE;
use crate::error::{MmError, MmResult};
use crate::frame_memory::FrameMemory;
use crate::kernel::KernelOps;
use crate::manager::{MemoryManager, MmParams};
use crate::pager::{FileKind, Pager};
use crate::task::{Backing, MmapRequest};
use crate::vm_object::ObjectId;

mod fork;
mod object;
mod teardown;

pub(crate) type MockMem = MockFrameMemory;

impl FrameMemory for MockFrameMemory {
    fn read(&self, ppn: Ppn, offset: usize, buf: &mut [u8]) {
        self.read_bytes(ppn.as_usize(), offset, buf);
    }

    fn write(&self, ppn: Ppn, offset: usize, data: &[u8]) {
        self.write_bytes(ppn.as_usize(), offset, data);
    }
}

impl KernelOps for MockKernel {
    fn map(&self, phys: Ppn, virt: Vpn, npages: usize, flags: MapFlags, task: TaskId) -> MmResult<()> {
        if self.record_map(task, virt.as_usize(), npages, phys.as_usize(), flags.bits()) {
            Ok(())
        } else {
            Err(MmError::PermissionDenied)
        }
    }

    fn unmap(&self, virt: Vpn, npages: usize, task: TaskId) -> MmResult<()> {
        self.record_unmap(task, virt.as_usize(), npages);
        Ok(())
    }

    fn capability_control(&self, _caller: TaskId, _req: CapControl) -> MmResult<CapReply> {
        Err(MmError::PermissionDenied)
    }
}

impl Pager for MockBackingStore {
    fn page_in(&self, vnum: Vnum, page_offset: usize, frame: Ppn, mem: &dyn FrameMemory) -> MmResult<()> {
        let page = self
            .read_page(vnum, page_offset)
            .ok_or(MmError::BackingStore(-EIO))?;
        mem.write(frame, 0, &page);
        Ok(())
    }

    fn page_out(&self, vnum: Vnum, page_offset: usize, frame: Ppn, mem: &dyn FrameMemory) -> MmResult<()> {
        let mut page = [0u8; PAGE_SIZE];
        mem.read(frame, 0, &mut page);
        if self.write_page(vnum, page_offset, &page) {
            Ok(())
        } else {
            Err(MmError::BackingStore(-EIO))
        }
    }

    fn release_pages(&self, vnum: Vnum) -> MmResult<()> {
        self.release(vnum);
        Ok(())
    }
}

pub(crate) const PAGER_TID: TaskId = 1;
pub(crate) const CONTAINER: ContainerId = 0;
pub(crate) const FRAME_BASE: usize = 0x100;
pub(crate) const TASK: TaskId = 10;
pub(crate) const CHILD: TaskId = 11;

/// 可读写的私有映射
pub(crate) fn rw_private() -> VmFlags {
    VmFlags::READ | VmFlags::WRITE | VmFlags::PRIVATE
}

/// 可读写的共享映射
pub(crate) fn rw_shared() -> VmFlags {
    VmFlags::READ | VmFlags::WRITE | VmFlags::SHARED
}

pub(crate) struct TestEnv {
    pub mm: MemoryManager,
    pub kernel: Arc<MockKernel>,
    pub mem: Arc<MockMem>,
    pub store: Arc<MockBackingStore>,
}

/// 管理 `nframes` 帧、已创建任务 [`TASK`] 的环境
pub(crate) fn env(nframes: usize) -> TestEnv {
    let mut env = bare_env(nframes, 16);
    env.mm.task_create(TASK).unwrap();
    env
}

/// 不创建任何任务；线程配额为 `threads`
pub(crate) fn bare_env(nframes: usize, threads: usize) -> TestEnv {
    custom_env(nframes, threads, CapAccess::MAP_ALL)
}

/// 物理内存能力只授予 `physmem` 权限
pub(crate) fn custom_env(nframes: usize, threads: usize, physmem: CapAccess) -> TestEnv {
    let kernel = Arc::new(MockKernel::new());
    let mem = Arc::new(MockMem::new());
    let store = Arc::new(MockBackingStore::new());

    let mut caps = CapabilityRegistry::new(CONTAINER);
    caps.insert(Capability::range(
        PAGER_TID,
        CONTAINER,
        CapType::MAP,
        ResourceType::Physmem,
        physmem,
        FRAME_BASE..FRAME_BASE + nframes,
    ));
    caps.insert(Capability::quantity(
        PAGER_TID,
        CONTAINER,
        ResourceType::ThreadPool,
        CapAccess::TCTRL_CREATE | CapAccess::TCTRL_DESTROY,
        threads,
    ));

    let mm = MemoryManager::new(MmParams {
        pager_tid: PAGER_TID,
        container: CONTAINER,
        span: PpnRange::from_start_len(Ppn(FRAME_BASE), nframes),
        frames: mem.clone(),
        kernel: kernel.clone(),
        caps: caps.into_shared(),
    });
    TestEnv { mm, kernel, mem, store }
}

impl TestEnv {
    /// 为 `tid` 建立 `npages` 页的匿名映射，返回起始地址
    pub fn map_anon(&mut self, tid: TaskId, npages: usize, flags: VmFlags) -> usize {
        self.mm
            .mmap(
                tid,
                MmapRequest {
                    addr: None,
                    npages,
                    flags,
                    backing: Backing::Anonymous,
                    file_offset: 0,
                },
            )
            .unwrap()
            .start()
            .start_addr()
    }

    /// 把 `data` 放入后备存储并打开为 VFS 文件对象
    pub fn open_store_file(&mut self, vnum: Vnum, data: Vec<u8>) -> ObjectId {
        let len = data.len();
        self.store.insert_file(vnum, data);
        self.mm
            .open_file(FileKind::Vfs, vnum, len, self.store.clone())
            .unwrap()
    }

    /// 把文件对象整个映射给 `tid`，返回起始地址
    pub fn map_file(&mut self, tid: TaskId, obj: ObjectId, npages: usize, flags: VmFlags) -> usize {
        self.mm
            .mmap(
                tid,
                MmapRequest {
                    addr: None,
                    npages,
                    flags,
                    backing: Backing::Object(obj),
                    file_offset: 0,
                },
            )
            .unwrap()
            .start()
            .start_addr()
    }

    /// 已分配的帧数
    pub fn frames_used(&self) -> usize {
        self.mm.stats().frames.allocated
    }

    /// 帧的第一个字节
    pub fn byte_at(&self, ppn: Ppn) -> u8 {
        self.mem.first_byte(ppn.as_usize())
    }

    /// 任务视角下 `vaddr` 处的一个字节（必要时触发读缺页）
    pub fn read_byte(&mut self, tid: TaskId, vaddr: usize) -> u8 {
        let mut b = [0u8; 1];
        self.mm.read_task_memory(tid, vaddr, &mut b).unwrap();
        b[0]
    }

    pub fn assert_consistent(&self) {
        let report = self.mm.check_integrity();
        assert!(report.is_ok(), "integrity violations: {:?}", report.violations);
    }
}

/// 每页首字节依次为 1, 2, 3 ... 的文件内容
pub(crate) fn patterned(npages: usize) -> Vec<u8> {
    let mut data = alloc::vec![0u8; npages * PAGE_SIZE];
    for page in 0..npages {
        data[page * PAGE_SIZE] = page as u8 + 1;
    }
    data
}
