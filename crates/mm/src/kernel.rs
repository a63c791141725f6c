//! 内核资源系统调用
//!
//! pager 通过这些调用让内核安装 / 撤销映射，以及读取、派生能力。
//! 具体实现由运行环境注入（真实内核的系统调用桩或宿主模型）。

use cap::{CapControl, CapReply};
use uapi::mm::MapFlags;
use uapi::types::TaskId;

use crate::address::{Ppn, Vpn};
use crate::error::MmResult;

/// 内核资源系统调用接口
pub trait KernelOps: Send + Sync {
    /// 将 `phys` 起的 `npages` 帧映射到任务 `task` 的 `virt`
    fn map(&self, phys: Ppn, virt: Vpn, npages: usize, flags: MapFlags, task: TaskId) -> MmResult<()>;

    /// 撤销任务 `task` 中 `virt` 起的 `npages` 页映射
    fn unmap(&self, virt: Vpn, npages: usize, task: TaskId) -> MmResult<()>;

    /// `capability_control` 系统调用
    fn capability_control(&self, caller: TaskId, req: CapControl) -> MmResult<CapReply>;
}
