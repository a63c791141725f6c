//! 以任务身份访问 pager
//!
//! [`PagerClient`] 模拟一个用户任务：内存访问先查内核页表，
//! 缺页时向 pager 发送 `PAGE_FAULT` 再重试，与真实硬件陷入后的流程一致。
//! 所有方法的错误都是负的 errno。

use mm::config::PAGE_SIZE;
use mm::{FrameMemory, PageNum, Ppn, Vpn};
use uapi::errno::{EFAULT, EIO};
use uapi::ipc::{FAULT_READ, FAULT_WRITE, IpcTag, Message};
use uapi::mm::{MapFlags, ShmFlags, VmFlags};
use uapi::types::{TaskId, Vnum};

use crate::frames::HeapFrames;
use crate::ipc::{Endpoint, IpcSender};
use crate::kernel::{HostKernel, Pte};

/// errno 结果
pub type Errno<T> = Result<T, isize>;

/// `MMAP` 参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MmapArgs {
    /// 地址提示（带 `FIXED` 时为固定地址）
    pub addr: usize,
    /// 页数
    pub npages: usize,
    /// 保护位与映射类型
    pub flags: VmFlags,
    /// 文件
    pub vnum: Vnum,
    /// 文件内页偏移
    pub file_offset: usize,
    /// 后备种类
    pub kind: usize,
}

impl MmapArgs {
    /// 匿名映射
    pub fn anonymous(npages: usize, flags: VmFlags) -> Self {
        Self {
            addr: 0,
            npages,
            flags: flags | VmFlags::ANONYMOUS,
            vnum: 0,
            file_offset: 0,
            kind: 0,
        }
    }

    /// 文件映射
    pub fn file(kind: usize, vnum: Vnum, npages: usize, flags: VmFlags) -> Self {
        Self {
            addr: 0,
            npages,
            flags,
            vnum,
            file_offset: 0,
            kind,
        }
    }

    /// 固定在 `addr`
    pub fn fixed(mut self, addr: usize) -> Self {
        self.addr = addr;
        self.flags |= VmFlags::FIXED;
        self
    }

    /// 从文件第 `offset` 页开始
    pub fn offset(mut self, offset: usize) -> Self {
        self.file_offset = offset;
        self
    }
}

/// 任务侧客户端
pub struct PagerClient<'a> {
    tid: TaskId,
    pager: &'a IpcSender,
    kernel: &'a HostKernel,
    frames: &'a HeapFrames,
}

impl<'a> PagerClient<'a> {
    /// 以任务 `tid` 的身份访问
    pub fn new(tid: TaskId, pager: &'a IpcSender, kernel: &'a HostKernel, frames: &'a HeapFrames) -> Self {
        Self {
            tid,
            pager,
            kernel,
            frames,
        }
    }

    /// 任务号
    pub fn tid(&self) -> TaskId {
        self.tid
    }

    /// 发送请求，成功时返回回复的 `mr[1]`
    pub fn call(&self, msg: Message) -> Errno<usize> {
        let reply = self.pager.call(msg, Vec::new()).map_err(|_| -EIO)?;
        reply.msg.retval()?;
        Ok(reply.msg.mr[1])
    }

    fn request(&self, tag: IpcTag) -> Message {
        Message::new(tag, self.tid)
    }

    /// 为自己登记地址空间
    pub fn task_create(&self) -> Errno<()> {
        self.call(self.request(IpcTag::TaskCreate).with(0, self.tid))?;
        Ok(())
    }

    /// 建立映射，返回起始地址
    pub fn mmap(&self, args: MmapArgs) -> Errno<usize> {
        self.call(
            self.request(IpcTag::Mmap)
                .with(0, args.addr)
                .with(1, args.npages)
                .with(2, args.flags.bits() as usize)
                .with(3, args.vnum as usize)
                .with(4, args.file_offset)
                .with(5, args.kind),
        )
    }

    /// 解除映射
    pub fn munmap(&self, addr: usize, npages: usize) -> Errno<()> {
        self.call(self.request(IpcTag::Munmap).with(0, addr).with(1, npages))?;
        Ok(())
    }

    /// 写回共享映射，返回写回的页数
    pub fn msync(&self, addr: usize, npages: usize) -> Errno<usize> {
        self.call(self.request(IpcTag::Msync).with(0, addr).with(1, npages))
    }

    /// fork 出 `child`
    pub fn fork(&self, child: TaskId) -> Errno<()> {
        self.call(self.request(IpcTag::Fork).with(0, self.tid).with(1, child))?;
        Ok(())
    }

    /// 退出
    pub fn exit(&self, status: usize) -> Errno<()> {
        self.call(self.request(IpcTag::Exit).with(0, self.tid).with(1, status))?;
        Ok(())
    }

    /// 按键取得共享内存段，返回段标识；`key` 为 `IPC_PRIVATE` 时总是新建
    pub fn shm_get(&self, key: usize, npages: usize, flags: ShmFlags) -> Errno<usize> {
        self.call(
            self.request(IpcTag::ShmGet)
                .with(0, key)
                .with(1, npages)
                .with(2, flags.bits() as usize),
        )
    }

    /// 挂接共享内存段，返回段地址
    pub fn shm_at(&self, shmid: usize) -> Errno<usize> {
        self.call(self.request(IpcTag::ShmAt).with(0, shmid))
    }

    /// 卸下 `addr` 处的共享内存段
    pub fn shm_dt(&self, addr: usize) -> Errno<()> {
        self.call(self.request(IpcTag::ShmDt).with(0, addr))?;
        Ok(())
    }

    /// 删除共享内存段
    pub fn shm_remove(&self, shmid: usize) -> Errno<()> {
        self.call(self.request(IpcTag::ShmRemove).with(0, shmid))?;
        Ok(())
    }

    /// 在 `fd` 上打开文件，返回文件长度
    pub fn file_open(&self, fd: usize, vnum: Vnum) -> Errno<usize> {
        self.call(self.request(IpcTag::FileOpen).with(0, fd).with(1, vnum as usize))
    }

    /// 从 `fd` 读到 `buf` 处，返回读取的字节数
    pub fn file_read(&self, fd: usize, buf: usize, count: usize) -> Errno<usize> {
        self.call(self.request(IpcTag::FileRead).with(0, fd).with(1, buf).with(2, count))
    }

    /// 把 `buf` 处的 `count` 字节写到 `fd`
    pub fn file_write(&self, fd: usize, buf: usize, count: usize) -> Errno<usize> {
        self.call(self.request(IpcTag::FileWrite).with(0, fd).with(1, buf).with(2, count))
    }

    /// 移动 `fd` 的读写位置，返回新位置
    pub fn file_seek(&self, fd: usize, offset: usize, whence: usize) -> Errno<usize> {
        self.call(self.request(IpcTag::FileSeek).with(0, fd).with(1, offset).with(2, whence))
    }

    /// 关闭 `fd`
    pub fn file_close(&self, fd: usize) -> Errno<()> {
        self.call(self.request(IpcTag::FileClose).with(0, fd))?;
        Ok(())
    }

    /// 显式缺页，返回映射的帧
    pub fn fault(&self, vaddr: usize, write: bool) -> Errno<Ppn> {
        let reason = if write { FAULT_WRITE } else { FAULT_READ };
        self.call(self.request(IpcTag::PageFault).with(0, vaddr).with(1, reason))
            .map(Ppn)
    }

    /// 访问 `vaddr` 所在页；页表项缺失或权限不够时缺页一次再查
    fn access(&self, vaddr: usize, write: bool) -> Errno<Pte> {
        let vpn = Vpn::from_addr_floor(vaddr);
        let needed = if write { MapFlags::WRITE } else { MapFlags::READ };
        if let Some(pte) = self.kernel.translate(self.tid, vpn).filter(|p| p.flags.contains(needed)) {
            return Ok(pte);
        }
        self.fault(vaddr, write)?;
        self.kernel
            .translate(self.tid, vpn)
            .filter(|p| p.flags.contains(needed))
            .ok_or(-EFAULT)
    }

    /// 读 `buf.len()` 字节，可跨页
    pub fn read(&self, vaddr: usize, buf: &mut [u8]) -> Errno<()> {
        let mut done = 0;
        while done < buf.len() {
            let addr = vaddr + done;
            let offset = addr % PAGE_SIZE;
            let len = (PAGE_SIZE - offset).min(buf.len() - done);
            let pte = self.access(addr, false)?;
            self.frames.read(pte.ppn, offset, &mut buf[done..done + len]);
            done += len;
        }
        Ok(())
    }

    /// 写 `data`，可跨页
    pub fn write(&self, vaddr: usize, data: &[u8]) -> Errno<()> {
        let mut done = 0;
        while done < data.len() {
            let addr = vaddr + done;
            let offset = addr % PAGE_SIZE;
            let len = (PAGE_SIZE - offset).min(data.len() - done);
            let pte = self.access(addr, true)?;
            self.frames.write(pte.ppn, offset, &data[done..done + len]);
            done += len;
        }
        Ok(())
    }

    /// 读一个字节
    pub fn load(&self, vaddr: usize) -> Errno<u8> {
        let mut byte = [0u8];
        self.read(vaddr, &mut byte)?;
        Ok(byte[0])
    }

    /// 写一个字节
    pub fn store(&self, vaddr: usize, value: u8) -> Errno<()> {
        self.write(vaddr, &[value])
    }
}
