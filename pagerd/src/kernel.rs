//! 宿主内核模型
//!
//! [`HostKernel`] 扮演微内核在 pager 眼中的那一面：持有内核侧的能力表，
//! 记录每个任务的页表项，并在安装映射前独立校验 pager 的物理内存能力。
//! 每个系统调用入口按 [`Syscall`] 偏移计数，便于观察 pager 的调用模式。

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use cap::{CapAccess, CapControl, CapReply, CapabilityRegistry, ResourceType};
use mm::{KernelOps, MmError, MmResult, PageNum, Ppn, Vpn};
use sync::SpinLock;
use uapi::mm::MapFlags;
use uapi::syscall::{SYSCALLS_TOTAL, Syscall};
use uapi::types::{ContainerId, TaskId};

/// 一个页表项
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pte {
    /// 物理帧
    pub ppn: Ppn,
    /// 映射标志
    pub flags: MapFlags,
}

/// 宿主内核
pub struct HostKernel {
    pager_tid: TaskId,
    container: ContainerId,
    caps: SpinLock<CapabilityRegistry>,
    page_table: SpinLock<BTreeMap<(TaskId, Vpn), Pte>>,
    calls: [AtomicUsize; SYSCALLS_TOTAL],
}

impl HostKernel {
    /// 以启动时下发的能力表创建内核；`pager_tid` 为唯一允许调用 `map` 的任务
    pub fn new(pager_tid: TaskId, caps: CapabilityRegistry) -> Self {
        Self {
            pager_tid,
            container: caps.container(),
            caps: SpinLock::new(caps),
            page_table: SpinLock::new(BTreeMap::new()),
            calls: std::array::from_fn(|_| AtomicUsize::new(0)),
        }
    }

    fn count(&self, call: Syscall) {
        self.calls[call.offset() / 4].fetch_add(1, Ordering::Relaxed);
    }

    /// 某个系统调用被调用的次数
    pub fn syscall_count(&self, call: Syscall) -> usize {
        self.calls[call.offset() / 4].load(Ordering::Relaxed)
    }

    /// 查询任务 `task` 中 `vpn` 的页表项
    pub fn translate(&self, task: TaskId, vpn: Vpn) -> Option<Pte> {
        self.page_table.lock().get(&(task, vpn)).copied()
    }

    /// 任务 `task` 当前的映射数
    pub fn mappings(&self, task: TaskId) -> usize {
        self.page_table
            .lock()
            .range((task, Vpn(0))..=(task, Vpn(usize::MAX)))
            .count()
    }

    /// 全部页表项数
    pub fn total_mappings(&self) -> usize {
        self.page_table.lock().len()
    }
}

impl KernelOps for HostKernel {
    fn map(&self, phys: Ppn, virt: Vpn, npages: usize, flags: MapFlags, task: TaskId) -> MmResult<()> {
        self.count(Syscall::Map);
        let mut op = CapAccess::MAP_READ;
        if flags.contains(MapFlags::WRITE) {
            op |= CapAccess::MAP_WRITE;
        }
        if flags.contains(MapFlags::EXEC) {
            op |= CapAccess::MAP_EXEC;
        }
        let pfn = phys.as_usize();
        self.caps
            .lock()
            .check(self.pager_tid, ResourceType::Physmem, self.container, op, Some(pfn..pfn + npages))
            .inspect_err(|err| {
                log::warn!(
                    "kernel: map {:#x} -> {:#x} for task {} refused: {}",
                    pfn,
                    virt.start_addr(),
                    task,
                    err
                )
            })?;

        let mut table = self.page_table.lock();
        for i in 0..npages {
            table.insert((task, virt + i), Pte { ppn: phys + i, flags });
        }
        Ok(())
    }

    fn unmap(&self, virt: Vpn, npages: usize, task: TaskId) -> MmResult<()> {
        self.count(Syscall::Unmap);
        let mut table = self.page_table.lock();
        let mut missing = 0;
        for i in 0..npages {
            if table.remove(&(task, virt + i)).is_none() {
                missing += 1;
            }
        }
        if missing == npages && npages > 0 {
            return Err(MmError::NotFound);
        }
        Ok(())
    }

    fn capability_control(&self, caller: TaskId, req: CapControl) -> MmResult<CapReply> {
        self.count(Syscall::CapabilityControl);
        Ok(self.caps.lock().capability_control(caller, req)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cap::{CapType, Capability};

    fn kernel() -> HostKernel {
        let mut caps = CapabilityRegistry::new(0);
        caps.insert(Capability::range(
            1,
            0,
            CapType::MAP,
            ResourceType::Physmem,
            CapAccess::MAP_READ | CapAccess::MAP_WRITE,
            0x80..0x90,
        ));
        HostKernel::new(1, caps)
    }

    #[test]
    fn test_map_records_page_table() {
        let kernel = kernel();
        kernel.map(Ppn(0x80), Vpn(0x10), 2, MapFlags::USR_RW, 5).unwrap();
        assert_eq!(
            kernel.translate(5, Vpn(0x11)),
            Some(Pte {
                ppn: Ppn(0x81),
                flags: MapFlags::USR_RW
            })
        );
        assert_eq!(kernel.mappings(5), 2);
        assert_eq!(kernel.mappings(6), 0);

        kernel.unmap(Vpn(0x10), 1, 5).unwrap();
        assert_eq!(kernel.translate(5, Vpn(0x10)), None);
        assert_eq!(kernel.unmap(Vpn(0x10), 1, 5), Err(MmError::NotFound));
        assert_eq!(kernel.syscall_count(Syscall::Map), 1);
        assert_eq!(kernel.syscall_count(Syscall::Unmap), 2);
    }

    #[test]
    fn test_map_checks_physmem_capability() {
        let kernel = kernel();
        assert_eq!(
            kernel.map(Ppn(0x8f), Vpn(0x10), 2, MapFlags::USR_RO, 5),
            Err(MmError::PermissionDenied)
        );
        assert_eq!(
            kernel.map(Ppn(0x80), Vpn(0x10), 1, MapFlags::USR_RX, 5),
            Err(MmError::PermissionDenied)
        );
        assert_eq!(kernel.total_mappings(), 0);
    }

    #[test]
    fn test_capability_control_reads_inventory() {
        let kernel = kernel();
        assert!(matches!(
            kernel.capability_control(1, CapControl::Ncaps),
            Ok(CapReply::Count(1))
        ));
        assert!(matches!(
            kernel.capability_control(7, CapControl::Ncaps),
            Ok(CapReply::Count(0))
        ));
        assert_eq!(kernel.syscall_count(Syscall::CapabilityControl), 2);
    }
}
