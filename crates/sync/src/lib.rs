//! 同步原语
//!
//! 向 pager 的各个子系统提供基本的锁原语。
//!
//! pager 运行在用户态，单个请求处理期间不会被中断打断，
//! 因此这里的自旋锁只负责跨线程互斥，不做中断屏蔽。
//! 锁的外壳（guard、`Deref` 等）由 `lock_api` 提供，
//! 本 crate 只实现底层的 [`RawSpinLock`]。

#![no_std]

mod raw_spin_lock;
mod spin_lock;

pub use raw_spin_lock::*;
pub use spin_lock::*;
