//! VFS 协作者的客户端与 VFS 文件 pager
//!
//! pager 通过 `PAGER_*` 标签请求 VFS 读写文件页。页内容不走消息本身：
//! pager 在消息中给出目标帧号，VFS 直接读写该帧。
//! 任何 IPC 失败或负的返回值都折算为 [`MmError::BackingStore`]。

use std::sync::Arc;

use mm::{FrameMemory, MmError, MmResult, PageNum, Pager, Ppn};
use uapi::errno::EIO;
use uapi::ipc::{IpcTag, Message};
use uapi::types::{TaskId, Vnum};

use crate::ipc::{Endpoint, Reply};

/// VFS 客户端
pub struct VfsClient {
    tid: TaskId,
    endpoint: Arc<dyn Endpoint>,
}

impl VfsClient {
    /// 以任务 `tid` 的身份访问 `endpoint` 背后的 VFS
    pub fn new(tid: TaskId, endpoint: Arc<dyn Endpoint>) -> Self {
        Self { tid, endpoint }
    }

    fn call(&self, msg: Message, payload: Vec<u8>) -> MmResult<Reply> {
        let tag = msg.tag;
        let reply = self.endpoint.call(msg, payload).map_err(|err| {
            log::warn!("vfs: {:?} failed: {}", tag, err);
            MmError::BackingStore(-EIO)
        })?;
        if let Err(errno) = reply.msg.retval() {
            log::debug!("vfs: {:?} returned {}", tag, errno);
            return Err(MmError::BackingStore(errno));
        }
        Ok(reply)
    }

    fn request(&self, tag: IpcTag) -> Message {
        Message::new(tag, self.tid)
    }

    /// 按 vnum 打开，返回文件长度（字节）
    pub fn open(&self, vnum: Vnum) -> MmResult<usize> {
        let reply = self.call(self.request(IpcTag::PagerOpen).with(0, vnum as usize), Vec::new())?;
        Ok(reply.msg.mr[1])
    }

    /// 按路径打开，返回 `(vnum, 长度)`
    pub fn open_by_path(&self, path: &str) -> MmResult<(Vnum, usize)> {
        let reply = self.call(self.request(IpcTag::PagerOpenByPath), path.as_bytes().to_vec())?;
        Ok((reply.msg.mr[1] as Vnum, reply.msg.mr[2]))
    }

    /// 读 `npages` 页到 `ppn` 起的帧
    pub fn read(&self, vnum: Vnum, page_offset: usize, npages: usize, ppn: Ppn) -> MmResult<()> {
        self.call(self.page_request(IpcTag::PagerRead, vnum, page_offset, npages, ppn), Vec::new())?;
        Ok(())
    }

    /// 把 `ppn` 起的 `npages` 帧写回文件
    pub fn write(&self, vnum: Vnum, page_offset: usize, npages: usize, ppn: Ppn) -> MmResult<()> {
        self.call(self.page_request(IpcTag::PagerWrite, vnum, page_offset, npages, ppn), Vec::new())?;
        Ok(())
    }

    fn page_request(&self, tag: IpcTag, vnum: Vnum, page_offset: usize, npages: usize, ppn: Ppn) -> Message {
        self.request(tag)
            .with(0, vnum as usize)
            .with(1, page_offset)
            .with(2, npages)
            .with(3, ppn.as_usize())
    }

    /// 关闭
    pub fn close(&self, vnum: Vnum) -> MmResult<()> {
        self.call(self.request(IpcTag::PagerClose).with(0, vnum as usize), Vec::new())?;
        Ok(())
    }

    /// 报告新的文件长度
    pub fn update_stats(&self, vnum: Vnum, length: usize) -> MmResult<()> {
        self.call(
            self.request(IpcTag::PagerUpdateStats).with(0, vnum as usize).with(1, length),
            Vec::new(),
        )?;
        Ok(())
    }

    /// 通知 fork
    pub fn notify_fork(&self, parent: TaskId, child: TaskId) -> MmResult<()> {
        self.call(self.request(IpcTag::NotifyFork).with(0, parent).with(1, child), Vec::new())?;
        Ok(())
    }

    /// 通知退出
    pub fn notify_exit(&self, tid: TaskId, status: usize) -> MmResult<()> {
        self.call(self.request(IpcTag::NotifyExit).with(0, tid).with(1, status), Vec::new())?;
        Ok(())
    }
}

/// VFS 文件的 pager
pub struct VfsPager {
    client: Arc<VfsClient>,
}

impl VfsPager {
    /// 经由 `client` 访问文件
    pub fn new(client: Arc<VfsClient>) -> Self {
        Self { client }
    }
}

impl Pager for VfsPager {
    fn page_in(&self, vnum: Vnum, page_offset: usize, frame: Ppn, _mem: &dyn FrameMemory) -> MmResult<()> {
        self.client.read(vnum, page_offset, 1, frame)
    }

    fn page_out(&self, vnum: Vnum, page_offset: usize, frame: Ppn, _mem: &dyn FrameMemory) -> MmResult<()> {
        self.client.write(vnum, page_offset, 1, frame)
    }

    fn release_pages(&self, vnum: Vnum) -> MmResult<()> {
        self.client.close(vnum)
    }
}
