//! pagerd：用户态 pager 服务
//!
//! 把 `mm` 的虚拟内存子系统接到 IPC 上：其它任务发来缺页、mmap、fork、
//! 退出等请求，pager 逐个处理并回复。文件页经由 VFS 协作者读写。
//!
//! 宿主上运行时，内核、物理内存和 VFS 都由本 crate 中的模型扮演：
//!
//! - [`kernel::HostKernel`]：页表与内核侧能力表
//! - [`frames::HeapFrames`]：模拟物理内存
//! - [`ramfs::RamFs`]：内存中的 VFS
//! - [`host::System`]：把以上部分与 [`server::PagerServer`] 装配起来

pub mod bootdesc;
pub mod client;
pub mod config;
pub mod error;
pub mod frames;
pub mod host;
pub mod init;
pub mod ipc;
pub mod kernel;
pub mod logging;
pub mod ramfs;
pub mod selftest;
pub mod server;
pub mod vfs;

pub use config::PagerConfig;
pub use error::{PagerError, PagerResult};
pub use host::{Host, Shutdown, System};
