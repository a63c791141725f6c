//! 虚拟内存子系统
//!
//! 运行在用户态 pager 任务中，为其它任务提供按需分页：
//!
//! - [`frame_allocator`]、[`phys`]：位图帧分配器与帧描述符
//! - [`vm_object`]：文件对象 / 影子对象与写时复制链
//! - [`vm_area`]：任务地址空间中的 VM 区域
//! - [`fault`]：缺页处理状态机
//! - [`task`]：fork / exit / mmap / munmap / msync
//! - [`shm`]：共享内存段
//! - [`file_io`]：经页缓存的文件读写
//!
//! 所有可变状态都挂在 [`MemoryManager`] 上，由调用方显式传递。
//! 内核、帧内容访问与后备存储通过 [`KernelOps`]、[`FrameMemory`]、[`Pager`]
//! 三个 trait 注入，便于在宿主环境或测试中替换。

#![no_std]

extern crate alloc;

pub mod address;
pub mod config;
pub mod error;
pub mod fault;
pub mod file_io;
pub mod frame_allocator;
pub mod frame_memory;
pub mod integrity;
pub mod kernel;
pub mod manager;
pub mod page;
pub mod pager;
pub mod phys;
pub mod shm;
pub mod task;
pub mod vm_area;
pub mod vm_object;

#[cfg(test)]
mod tests;

pub use address::{PageNum, Ppn, PpnRange, Vpn, VpnRange};
pub use config::{PAGE_SHIFT, PAGE_SIZE};
pub use error::{MmError, MmResult};
pub use fault::{FaultInfo, FaultPath, Resolution};
pub use file_io::{Fd, OpenFile};
pub use frame_allocator::{FrameAllocator, FrameState};
pub use frame_memory::FrameMemory;
pub use integrity::IntegrityReport;
pub use kernel::KernelOps;
pub use manager::{BootImage, MemoryManager, MmParams, MmStats};
pub use page::{Page, PageFlags};
pub use pager::{BootFilePager, DevZeroPager, FileKind, Pager};
pub use phys::{FrameStats, PhysicalMemory};
pub use shm::{ShmId, ShmRegistry, ShmSegment};
pub use task::{Backing, MmapRequest, Task};
pub use vm_area::{AccessReason, AddressSpace, Mapping, VmArea};
pub use vm_object::{FileObject, ObjectFlags, ObjectId, ObjectKind, ObjectStats, ObjectTable};
