//! pager 服务循环
//!
//! 单线程、逐个处理请求：一个请求完全处理完（包括等待后备存储的回复）
//! 才会接收下一个。回复的 `mr[0]` 为 0 或负的 errno，`mr[1]` 携带
//! 请求相关的结果（缺页的帧号、mmap 的起始地址、msync 写回的页数、
//! 共享内存段标识、文件读写的字节数）。
//!
//! 不变量被破坏时先回复请求方，然后停止服务。

use std::sync::Arc;

use mm::config::{MAX_FILE_SIZE, MAX_MAP_PAGES, PAGE_SIZE};
use mm::{
    AccessReason, Backing, FaultInfo, FileKind, MemoryManager, MmError, MmResult, MmapRequest, ObjectId,
    PageNum,
};
use uapi::errno::errno_to_reg;
use uapi::ipc::{FAULT_READ, FAULT_WRITE, IpcTag, MR_UNUSED_TOTAL, Message};
use uapi::mm::{IPC_PRIVATE, MMAP_KIND_BOOTFILE, MMAP_KIND_VFS, ShmFlags, VmFlags};
use uapi::types::{TaskId, Vnum};

use crate::error::PagerResult;
use crate::ipc::IpcReceiver;
use crate::logging::set_current_task;
use crate::vfs::{VfsClient, VfsPager};

/// pager 服务
pub struct PagerServer {
    mm: MemoryManager,
    vfs: Arc<VfsClient>,
    rx: IpcReceiver,
    served: usize,
}

impl PagerServer {
    /// 创建服务；`vfs` 用于文件页的读写与 fork / 退出通知
    pub fn new(mm: MemoryManager, vfs: Arc<VfsClient>, rx: IpcReceiver) -> Self {
        Self {
            mm,
            vfs,
            rx,
            served: 0,
        }
    }

    /// 内存管理上下文
    pub fn mm(&self) -> &MemoryManager {
        &self.mm
    }

    /// 已处理的请求数
    pub fn served(&self) -> usize {
        self.served
    }

    /// 服务直到所有请求方关闭，或遇到不可恢复的错误
    pub fn run(mut self) -> PagerResult<Self> {
        log::info!("pager: serving requests");
        while let Ok(req) = self.rx.recv() {
            set_current_task(req.msg.sender);
            let result = self.handle(&req.msg, &req.payload);
            self.served += 1;

            let mut reply = Message::reply(self.mm.pager_tid(), 0);
            match result {
                Ok(value) => reply.mr[1] = value,
                Err(err) => reply.mr[0] = errno_to_reg(err.to_errno()),
            }
            if req.reply(reply).is_err() {
                log::warn!("pager: requester went away before reply");
            }
            set_current_task(0);

            if let Err(err) = result {
                if err.is_fatal() {
                    log::error!("pager: halting after {} requests: {}", self.served, err);
                    return Err(err.into());
                }
            }
        }
        log::info!("pager: all requesters gone after {} requests", self.served);
        Ok(self)
    }

    /// 处理一个请求，返回回复 `mr[1]` 的值
    pub fn handle(&mut self, msg: &Message, _payload: &[u8]) -> MmResult<usize> {
        let mr = &msg.mr;
        let result = match msg.tag {
            IpcTag::PageFault => self.page_fault(msg.sender, mr[0], mr[1]),
            IpcTag::TaskCreate => self.mm.task_create(mr[0]).map(|_| 0),
            IpcTag::Mmap => self.mmap(msg.sender, mr),
            IpcTag::Munmap => self.mm.munmap(msg.sender, mr[0], mr[1]).map(|_| 0),
            IpcTag::Msync => self.mm.msync(msg.sender, mr[0], mr[1]),
            IpcTag::Fork => self.fork(mr[0], mr[1]),
            IpcTag::Exit => self.exit(mr[0], mr[1]),
            IpcTag::ShmGet => self.shm_get(mr[0], mr[1], mr[2]),
            IpcTag::ShmAt => self
                .mm
                .shm_attach(msg.sender, mr[0])
                .map(|range| range.start().start_addr()),
            IpcTag::ShmDt => self.mm.shm_detach(msg.sender, mr[0]).map(|_| 0),
            IpcTag::ShmRemove => self.mm.shm_remove(mr[0]).map(|_| 0),
            IpcTag::FileOpen => self.file_open(msg.sender, mr[0], mr[1] as Vnum),
            IpcTag::FileRead => self.mm.file_read(msg.sender, mr[0], mr[1], mr[2]),
            IpcTag::FileWrite => self.file_write(msg.sender, mr[0], mr[1], mr[2]),
            IpcTag::FileSeek => self.mm.file_seek(msg.sender, mr[0], mr[1], mr[2]),
            IpcTag::FileClose => self.mm.fd_close(msg.sender, mr[0]).map(|_| 0),
            other => {
                log::warn!("pager: unexpected request {:?} from task {}", other, msg.sender);
                Err(MmError::InvalidArgument)
            }
        };
        if let Err(err) = &result {
            if !err.is_fatal() {
                log::debug!("pager: {:?} from task {} failed: {}", msg.tag, msg.sender, err);
            }
        }
        result
    }

    fn page_fault(&mut self, task: TaskId, vaddr: usize, reason: usize) -> MmResult<usize> {
        let reason = match reason {
            FAULT_READ => AccessReason::Read,
            FAULT_WRITE => AccessReason::Write,
            _ => return Err(MmError::InvalidArgument),
        };
        let res = self.mm.handle_fault(FaultInfo { task, vaddr, reason })?;
        Ok(res.ppn.as_usize())
    }

    fn mmap(&mut self, task: TaskId, mr: &[usize; MR_UNUSED_TOTAL]) -> MmResult<usize> {
        let [addr, npages, flags, vnum, file_offset, kind] = *mr;
        let flags = VmFlags::from_bits(flags as u32).ok_or(MmError::InvalidArgument)?;
        if npages == 0 || npages > MAX_MAP_PAGES {
            return Err(MmError::InvalidArgument);
        }
        let end_page = file_offset.checked_add(npages).ok_or(MmError::InvalidArgument)?;
        self.mm.task(task)?;

        let backing = if flags.contains(VmFlags::ANONYMOUS) {
            Backing::Anonymous
        } else {
            Backing::Object(self.open_backing(kind, vnum as Vnum, flags, end_page)?)
        };
        let addr = (addr != 0 || flags.contains(VmFlags::FIXED)).then_some(addr);
        let range = self.mm.mmap(
            task,
            MmapRequest {
                addr,
                npages,
                flags,
                backing,
                file_offset,
            },
        )?;
        Ok(range.start().start_addr())
    }

    /// 打开映射的后备文件；可写共享映射越过文件末尾时先把文件扩展到映射末尾
    fn open_backing(&mut self, kind: usize, vnum: Vnum, flags: VmFlags, end_page: usize) -> MmResult<ObjectId> {
        match kind {
            MMAP_KIND_VFS => {
                let needed = end_page.checked_mul(PAGE_SIZE).ok_or(MmError::InvalidArgument)?;
                let mut length = self.vfs.open(vnum)?;
                if flags.contains(VmFlags::SHARED | VmFlags::WRITE) && needed > length {
                    if needed > MAX_FILE_SIZE {
                        return Err(MmError::InvalidArgument);
                    }
                    self.vfs.update_stats(vnum, needed)?;
                    length = needed;
                }
                let pager = Arc::new(VfsPager::new(self.vfs.clone()));
                self.mm.open_file(FileKind::Vfs, vnum, length, pager)
            }
            MMAP_KIND_BOOTFILE => {
                let name = self
                    .mm
                    .boot_images()
                    .get(vnum as usize)
                    .map(|image| image.name.clone())
                    .ok_or(MmError::NotFound)?;
                self.mm.open_boot_file(&name)
            }
            _ => Err(MmError::InvalidArgument),
        }
    }

    fn shm_get(&mut self, key: usize, npages: usize, flags: usize) -> MmResult<usize> {
        let flags = u32::try_from(flags)
            .ok()
            .and_then(ShmFlags::from_bits)
            .ok_or(MmError::InvalidArgument)?;
        let key = (key != IPC_PRIVATE).then_some(key);
        self.mm.shm_get(key, npages, flags)
    }

    /// 打开 VFS 文件并装入描述符槽位，返回文件长度
    fn file_open(&mut self, task: TaskId, fd: usize, vnum: Vnum) -> MmResult<usize> {
        let length = self.vfs.open(vnum)?;
        let pager = Arc::new(VfsPager::new(self.vfs.clone()));
        self.mm.file_open(task, fd, FileKind::Vfs, vnum, length, pager)
    }

    /// 写越过文件末尾时先让 VFS 扩展文件，之后的写回才不会被截断
    fn file_write(&mut self, task: TaskId, fd: usize, buf: usize, count: usize) -> MmResult<usize> {
        let (open, file) = self.mm.fd_get(task, fd)?;
        let end = open
            .cursor
            .checked_add(count)
            .filter(|&end| end <= MAX_FILE_SIZE)
            .ok_or(MmError::InvalidArgument)?;
        if file.kind == FileKind::Vfs && end > file.length {
            let vnum = file.vnum;
            self.mm.validate_task_range(task, buf, count, VmFlags::READ)?;
            self.vfs.update_stats(vnum, end)?;
        }
        self.mm.file_write(task, fd, buf, count)
    }

    fn fork(&mut self, parent: TaskId, child: TaskId) -> MmResult<usize> {
        self.mm.fork(parent, child)?;
        if let Err(err) = self.vfs.notify_fork(parent, child) {
            log::warn!("pager: fork notification {} -> {} failed: {}", parent, child, err);
        }
        self.mm.assert_integrity()?;
        Ok(0)
    }

    /// 写回失败不影响回收：任务照样被移除、VFS 照样收到通知，之后再报告该错误
    fn exit(&mut self, tid: TaskId, status: usize) -> MmResult<usize> {
        let released = match self.mm.exit(tid) {
            Err(err @ MmError::BackingStore(_)) => {
                log::error!("pager: task {} exited with lost writeback: {}", tid, err);
                Err(err)
            }
            other => {
                other?;
                Ok(())
            }
        };
        if let Err(err) = self.vfs.notify_exit(tid, status) {
            log::warn!("pager: exit notification for {} failed: {}", tid, err);
        }
        self.mm.assert_integrity()?;
        released.map(|_| 0)
    }
}
