//! IPC 标签与消息寄存器约定
//!
//! 所有 IPC 都是同步的 send/receive：发送方在固定数量的机器字
//! “消息寄存器”中放入标签和参数，并阻塞直到收到同样格式的回复。

use crate::types::TaskId;

/// 消息寄存器总数
pub const MR_TOTAL: usize = 8;
/// 标签所在寄存器
pub const MR_TAG: usize = 0;
/// 发送者所在寄存器
pub const MR_SENDER: usize = 1;
/// 第一个可用于负载的寄存器
pub const MR_UNUSED_START: usize = 2;
/// 负载寄存器数量
pub const MR_UNUSED_TOTAL: usize = MR_TOTAL - MR_UNUSED_START;
/// 回复中返回值所在的负载寄存器下标
pub const MR_RETURN: usize = 0;

/// IPC 操作码
#[repr(usize)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IpcTag {
    // ====================
    // 由 pager 处理
    // ====================
    /// 缺页：`mr = [vaddr, reason]`，`sender` 为出错任务，回复 `[ret, ppn]`
    PageFault = 2,
    /// 回复
    Reply = 3,
    /// 创建空地址空间：`mr = [tid]`
    TaskCreate = 8,
    /// 映射：`mr = [addr, npages, prot|flags, vnum, file_offset_pages, kind]`，
    /// 回复 `[ret, start]`。带 `ANONYMOUS` 时忽略 `vnum` 与 `kind`。
    Mmap = 9,
    /// 解除映射：`mr = [addr, npages]`
    Munmap = 10,
    /// 写回共享文件映射：`mr = [addr, npages]`，回复 `[ret, 写回页数]`
    Msync = 11,
    /// fork：`mr = [parent, child]`
    Fork = 12,
    /// 退出：`mr = [tid, status]`
    Exit = 13,
    /// 取共享内存段：`mr = [key, npages, flags]`，回复 `[ret, shmid]`
    ShmGet = 14,
    /// 挂接共享内存段：`mr = [shmid]`，回复 `[ret, addr]`
    ShmAt = 15,
    /// 卸下共享内存段：`mr = [addr]`
    ShmDt = 16,
    /// 删除共享内存段，最后一个挂接者卸下后回收：`mr = [shmid]`
    ShmRemove = 17,
    /// 为发送者打开文件：`mr = [fd, vnum]`，回复 `[ret, length]`
    FileOpen = 30,
    /// 经页缓存读文件到发送者的缓冲区：`mr = [fd, buf, count]`，回复 `[ret, 读到的字节数]`
    FileRead = 31,
    /// 经页缓存把发送者缓冲区写入文件：`mr = [fd, buf, count]`，回复 `[ret, 写入的字节数]`
    FileWrite = 32,
    /// 移动读写位置：`mr = [fd, offset, whence]`，回复 `[ret, 新位置]`
    FileSeek = 33,
    /// 关闭文件：`mr = [fd]`
    FileClose = 34,

    // ====================
    // 由后备存储（VFS）处理
    // ====================
    /// 按 vnum 打开：`mr = [vnum]`，回复 `[ret, length]`
    PagerOpen = 20,
    /// 读页：`mr = [vnum, page_offset, npages, ppn]`
    PagerRead = 21,
    /// 写页：`mr = [vnum, page_offset, npages, ppn]`
    PagerWrite = 22,
    /// 关闭：`mr = [vnum]`
    PagerClose = 23,
    /// 更新文件长度：`mr = [vnum, length]`
    PagerUpdateStats = 24,
    /// 通知 fork：`mr = [parent, child]`
    NotifyFork = 25,
    /// 通知退出：`mr = [tid, status]`
    NotifyExit = 26,
    /// 按路径打开（路径在扩展负载中），回复 `[ret, vnum, length]`
    PagerOpenByPath = 27,
}

impl TryFrom<usize> for IpcTag {
    type Error = usize;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        Ok(match value {
            2 => IpcTag::PageFault,
            3 => IpcTag::Reply,
            8 => IpcTag::TaskCreate,
            9 => IpcTag::Mmap,
            10 => IpcTag::Munmap,
            11 => IpcTag::Msync,
            12 => IpcTag::Fork,
            13 => IpcTag::Exit,
            14 => IpcTag::ShmGet,
            15 => IpcTag::ShmAt,
            16 => IpcTag::ShmDt,
            17 => IpcTag::ShmRemove,
            20 => IpcTag::PagerOpen,
            21 => IpcTag::PagerRead,
            22 => IpcTag::PagerWrite,
            23 => IpcTag::PagerClose,
            24 => IpcTag::PagerUpdateStats,
            25 => IpcTag::NotifyFork,
            26 => IpcTag::NotifyExit,
            27 => IpcTag::PagerOpenByPath,
            30 => IpcTag::FileOpen,
            31 => IpcTag::FileRead,
            32 => IpcTag::FileWrite,
            33 => IpcTag::FileSeek,
            34 => IpcTag::FileClose,
            other => return Err(other),
        })
    }
}

/// 缺页原因（`PageFault` 的 `mr[1]`）
pub const FAULT_READ: usize = 1;
/// 写缺页
pub const FAULT_WRITE: usize = 2;

/// 一条 IPC 消息
///
/// 对应消息寄存器 `MR0..MR7`：`MR0` 为标签，`MR1` 为发送者，其余为负载。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Message {
    /// 操作码
    pub tag: IpcTag,
    /// 发送者
    pub sender: TaskId,
    /// 负载寄存器
    pub mr: [usize; MR_UNUSED_TOTAL],
}

impl Message {
    /// 创建一条空负载消息
    pub const fn new(tag: IpcTag, sender: TaskId) -> Self {
        Self {
            tag,
            sender,
            mr: [0; MR_UNUSED_TOTAL],
        }
    }

    /// 设置第 `idx` 个负载寄存器
    pub const fn with(mut self, idx: usize, value: usize) -> Self {
        self.mr[idx] = value;
        self
    }

    /// 构造回复
    pub const fn reply(sender: TaskId, ret: usize) -> Self {
        Self::new(IpcTag::Reply, sender).with(MR_RETURN, ret)
    }

    /// 回复中的返回值
    pub fn retval(&self) -> Result<usize, isize> {
        crate::errno::result_from_reg(self.mr[MR_RETURN])
    }

    /// 按原始寄存器布局导出
    pub fn to_regs(&self) -> [usize; MR_TOTAL] {
        let mut regs = [0; MR_TOTAL];
        regs[MR_TAG] = self.tag as usize;
        regs[MR_SENDER] = self.sender;
        regs[MR_UNUSED_START..].copy_from_slice(&self.mr);
        regs
    }

    /// 从原始寄存器布局解析；标签未知时返回原值
    pub fn from_regs(regs: &[usize; MR_TOTAL]) -> Result<Self, usize> {
        let tag = IpcTag::try_from(regs[MR_TAG])?;
        let mut mr = [0; MR_UNUSED_TOTAL];
        mr.copy_from_slice(&regs[MR_UNUSED_START..]);
        Ok(Self {
            tag,
            sender: regs[MR_SENDER],
            mr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_regs_layout() {
        let msg = Message::new(IpcTag::PagerRead, 7).with(0, 42).with(3, 0x80);
        let regs = msg.to_regs();
        assert_eq!(regs[MR_TAG], 21);
        assert_eq!(regs[MR_SENDER], 7);
        assert_eq!(regs[MR_UNUSED_START], 42);
        assert_eq!(regs[MR_UNUSED_START + 3], 0x80);
        assert_eq!(Message::from_regs(&regs), Ok(msg));
    }

    #[test]
    fn test_unknown_tag_rejected() {
        let mut regs = [0; MR_TOTAL];
        regs[MR_TAG] = 999;
        assert_eq!(Message::from_regs(&regs), Err(999));
    }

    #[test]
    fn test_reply_retval() {
        let ok = Message::reply(1, 5);
        assert_eq!(ok.retval(), Ok(5));
        let err = Message::reply(1, crate::errno::errno_to_reg(-crate::errno::ENOMEM));
        assert_eq!(err.retval(), Err(-crate::errno::ENOMEM));
    }
}
