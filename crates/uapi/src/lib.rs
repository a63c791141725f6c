//! 与各服务任务共用的定义和声明
//!
//! 包含 IPC 标签、消息寄存器约定、系统调用偏移表、能力（capability）常量
//! 以及 VM 标志位，确保内核、pager 与其它服务任务之间的一致性。

#![no_std]
#![allow(dead_code)]
// uapi 中包含大量协议常量；逐项补 `///` 噪声较大。
#![allow(missing_docs)]

pub mod cap;
pub mod errno;
pub mod ipc;
pub mod mm;
pub mod syscall;
pub mod types;
