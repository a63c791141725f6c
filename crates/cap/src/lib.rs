//! 能力（capability）注册表
//!
//! 记录内核在启动时下发的资源授权，并在每次涉及物理内存区间、
//! 线程或地址空间的特权操作前进行校验。
//!
//! # 模块组成
//!
//! - [`Capability`]：单条能力记录及其边界不变量。
//! - [`CapabilityRegistry`]：能力列表、`check` / `derive` / 用量记账。
//! - [`CapControl`]：`capability_control` 的请求集合（NCAPS、READ、SHARE、
//!   GRANT、REPLICATE、SPLIT、DEDUCE）。
//! - [`SharedRegistry`]：进程级单例，由一把自旋锁保护。

#![no_std]

extern crate alloc;

mod capability;
mod control;
mod error;
mod registry;

pub use capability::{CapDiff, Capability};
pub use control::{CapControl, CapReply};
pub use error::{CapError, CapResult};
pub use registry::{CapabilityRegistry, SharedRegistry};

pub use uapi::cap::{CapAccess, CapControlRequest, CapType, GrantFlags, ResourceType, ShareScope};
