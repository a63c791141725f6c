//! 缺页处理状态机
//!
//! 每次缺页从 `Idle` 出发，依次经过：
//!
//! ```text
//! Idle -> Resolving -> Hit ----------------------------> Mapped
//!                   -> CopyOnWrite --------------------> Mapped
//!                   -> BackingFetch -> (CopyOnWrite) --> Mapped
//!                   -> Failed
//! ```
//!
//! 任何步骤出错都进入 `Failed`，错误原样返回给调用方。
//! `BackingFetch` 会调用 pager 的 `page_in`，可能等待 IPC，
//! 此时不持有帧分配器、描述符或注册表的锁。

use uapi::mm::{MapFlags, VmFlags};
use uapi::types::TaskId;

use crate::address::{PageNum, Ppn, Vpn};
use crate::error::{invariant, MmError, MmResult};
use crate::manager::MemoryManager;
use crate::page::PageFlags;
use crate::vm_area::{AccessReason, Mapping};
use crate::vm_object::{ObjectFlags, ObjectId};

/// 一次缺页
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultInfo {
    /// 发生缺页的任务
    pub task: TaskId,
    /// 缺页地址
    pub vaddr: usize,
    /// 访问类型
    pub reason: AccessReason,
}

impl FaultInfo {
    /// 读缺页
    pub fn read(task: TaskId, vaddr: usize) -> Self {
        Self {
            task,
            vaddr,
            reason: AccessReason::Read,
        }
    }

    /// 写缺页
    pub fn write(task: TaskId, vaddr: usize) -> Self {
        Self {
            task,
            vaddr,
            reason: AccessReason::Write,
        }
    }
}

/// 缺页是如何被满足的
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultPath {
    /// 页已在链中，直接映射
    Hit,
    /// 复制（或零填充）到链顶
    CopyOnWrite,
    /// 从后备存储取页
    BackingFetch,
}

/// 缺页处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    /// 缺页所在虚拟页
    pub vpn: Vpn,
    /// 最终映射的帧
    pub ppn: Ppn,
    /// 是否以可写方式映射
    pub writable: bool,
    /// 满足路径
    pub path: FaultPath,
}

#[derive(Debug)]
enum FaultState {
    Hit { ppn: Ppn },
    CopyOnWrite { src: Option<Ppn> },
    BackingFetch { terminal: ObjectId },
    Mapped { ppn: Ppn, writable: bool },
    Failed(MmError),
}

/// Resolving 阶段确定下来的上下文
#[derive(Debug)]
struct FaultCtx {
    task: TaskId,
    vpn: Vpn,
    reason: AccessReason,
    head: ObjectId,
    offset: usize,
    prot: VmFlags,
    shared: bool,
    path: FaultPath,
}

impl MemoryManager {
    /// 处理一次缺页：把所需页放进正确的对象并映射给任务。
    ///
    /// 对同一地址重复调用是幂等的：已解决的缺页再来一次只会重新映射同一帧。
    pub fn handle_fault(&mut self, fault: FaultInfo) -> MmResult<Resolution> {
        log::trace!(
            "fault: task {} {:#x} {:?}: Idle -> Resolving",
            fault.task,
            fault.vaddr,
            fault.reason
        );
        let (mut ctx, mut state) = match self.fault_resolve(&fault) {
            Ok(resolved) => resolved,
            Err(err) => return Err(fault_failed(&fault, err)),
        };

        loop {
            log::trace!("fault: task {} {:#x}: -> {:?}", fault.task, fault.vaddr, state);
            let next = match state {
                FaultState::Hit { ppn } => Ok(FaultState::Mapped {
                    ppn,
                    writable: ctx.reason == AccessReason::Write,
                }),
                FaultState::CopyOnWrite { src } => self.fault_copy(&mut ctx, src),
                FaultState::BackingFetch { terminal } => self.fault_fetch(&mut ctx, terminal),
                FaultState::Mapped { ppn, writable } => match self.fault_finish(&ctx, ppn, writable) {
                    Ok(()) => {
                        return Ok(Resolution {
                            vpn: ctx.vpn,
                            ppn,
                            writable,
                            path: ctx.path,
                        });
                    }
                    Err(err) => Err(err),
                },
                FaultState::Failed(err) => return Err(fault_failed(&fault, err)),
            };
            state = next.unwrap_or_else(FaultState::Failed);
        }
    }

    /// Resolving：定位区域、校验权限，必要时在私有链顶插入影子，再沿链查找
    fn fault_resolve(&mut self, fault: &FaultInfo) -> MmResult<(FaultCtx, FaultState)> {
        let vpn = Vpn::from_addr_floor(fault.vaddr);
        let task = self.tasks.get_mut(&fault.task).ok_or(MmError::NotFound)?;
        let area = task
            .space
            .find_area_mut(vpn)
            .ok_or(MmError::SegmentationFault)?;
        if !area.permits(fault.reason) {
            return Err(MmError::SegmentationFault);
        }

        let shared = area.is_shared();
        let mut head = area.head();
        // 私有区域的链顶不可原地写入（文件对象）：先盖一层影子
        if fault.reason == AccessReason::Write
            && !shared
            && !self.objects.get(head)?.flags().contains(ObjectFlags::WRITE)
        {
            let shadow = self.objects.shadow_create(head)?;
            self.objects.link(shadow)?;
            area.set_head(shadow);
            self.objects.unlink(&self.phys, head)?;
            log::debug!("fault: task {} private write, {} shadows {}", fault.task, shadow, head);
            head = shadow;
        }

        let mut ctx = FaultCtx {
            task: fault.task,
            vpn,
            reason: fault.reason,
            head,
            offset: area.offset_of(vpn),
            prot: area.flags(),
            shared,
            path: FaultPath::Hit,
        };

        let state = match self.objects.shadow_chain_lookup(head, ctx.offset)? {
            Some((ppn, owner)) if owner == head || fault.reason == AccessReason::Read => FaultState::Hit { ppn },
            Some((ppn, _)) => FaultState::CopyOnWrite { src: Some(ppn) },
            None => {
                let terminal = self.objects.terminal(head)?;
                let zero_fill = self
                    .objects
                    .get(terminal)?
                    .as_file()
                    .is_some_and(|file| file.pager().zero_fill());
                if fault.reason == AccessReason::Write && terminal != head && zero_fill {
                    FaultState::CopyOnWrite { src: None }
                } else {
                    ctx.path = FaultPath::BackingFetch;
                    FaultState::BackingFetch { terminal }
                }
            }
        };
        Ok((ctx, state))
    }

    /// CopyOnWrite：在链顶放一份私有副本（或零页）
    fn fault_copy(&mut self, ctx: &mut FaultCtx, src: Option<Ppn>) -> MmResult<FaultState> {
        let ppn = match src {
            Some(src) => self.phys.alloc_copy(src)?,
            None => self.phys.alloc_zeroed()?,
        };
        if let Err(err) = self.objects.page_insert(&self.phys, ctx.head, ctx.offset, ppn) {
            self.phys.free_unowned(ppn)?;
            return Err(err);
        }
        ctx.path = FaultPath::CopyOnWrite;
        Ok(FaultState::Mapped { ppn, writable: true })
    }

    /// BackingFetch：向链底文件对象的 pager 取页
    fn fault_fetch(&mut self, ctx: &mut FaultCtx, terminal: ObjectId) -> MmResult<FaultState> {
        let file = self
            .objects
            .get(terminal)?
            .as_file()
            .ok_or_else(|| invariant("chain terminal is not a file object"))?
            .clone();
        if ctx.offset >= file.npages() {
            return Err(MmError::SegmentationFault);
        }

        let ppn = self.phys.alloc_page()?;
        if let Err(err) = file.pager().page_in(file.vnum, ctx.offset, ppn, self.phys.frames()) {
            log::warn!(
                "fault: page_in of {:?} vnum {} page {} failed: {}",
                file.kind,
                file.vnum,
                ctx.offset,
                err
            );
            self.phys.free_unowned(ppn)?;
            return Err(err);
        }
        if let Err(err) = self.objects.page_insert(&self.phys, terminal, ctx.offset, ppn) {
            self.phys.free_unowned(ppn)?;
            return Err(err);
        }

        if ctx.reason == AccessReason::Write && terminal != ctx.head {
            Ok(FaultState::CopyOnWrite { src: Some(ppn) })
        } else {
            Ok(FaultState::Mapped {
                ppn,
                writable: ctx.reason == AccessReason::Write,
            })
        }
    }

    /// Mapped：安装映射；写时复制后再尝试让链顶越过已被完全覆盖的下层影子。
    ///
    /// 越过可能回收下层的页，必须等任务对旧页的映射被替换之后进行。
    fn fault_finish(&mut self, ctx: &FaultCtx, ppn: Ppn, writable: bool) -> MmResult<()> {
        self.fault_install(ctx, ppn, writable)?;
        if ctx.path == FaultPath::CopyOnWrite {
            self.objects.try_bypass(&self.phys, ctx.head)?;
        }
        Ok(())
    }

    /// 能力校验后让内核安装映射，并更新区域的映射表与帧引用
    fn fault_install(&mut self, ctx: &FaultCtx, ppn: Ppn, writable: bool) -> MmResult<()> {
        self.check_map(ppn, writable)?;
        self.kernel
            .map(ppn, ctx.vpn, 1, MapFlags::for_prot(ctx.prot, writable), ctx.task)?;

        let area = self
            .tasks
            .get_mut(&ctx.task)
            .and_then(|task| task.space.find_area_mut(ctx.vpn))
            .ok_or_else(|| invariant("faulting area vanished"))?;
        match area.mapped_mut().insert(ctx.vpn, Mapping { ppn, writable }) {
            Some(old) if old.ppn == ppn => {}
            Some(old) => {
                self.phys.get_page(ppn)?;
                self.phys.put_page(old.ppn)?;
            }
            None => self.phys.get_page(ppn)?,
        }
        if writable && ctx.shared {
            self.phys.set_flags(ppn, PageFlags::DIRTY, true)?;
        }
        log::debug!(
            "fault: task {} {:#x} -> frame {:#x} ({})",
            ctx.task,
            ctx.vpn.start_addr(),
            ppn.as_usize(),
            if writable { "rw" } else { "ro" }
        );
        Ok(())
    }
}

fn fault_failed(fault: &FaultInfo, err: MmError) -> MmError {
    if err.is_fatal() {
        log::error!("fault: task {} {:#x} {:?}: {}", fault.task, fault.vaddr, fault.reason, err);
    } else {
        log::warn!("fault: task {} {:#x} {:?}: {}", fault.task, fault.vaddr, fault.reason, err);
    }
    err
}
