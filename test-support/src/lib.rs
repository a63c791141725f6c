//! 测试支持 crate
//!
//! 提供 pager 运行环境的 Mock 实现。这里的 Mock 不依赖 `mm`，
//! 由被测 crate 在 `cfg(test)` 下为它们实现自己的 trait。

#![no_std]

extern crate alloc;

pub mod mock;
