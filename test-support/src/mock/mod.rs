//! Mock 实现模块
//!
//! 提供 pager 运行环境（内核、物理内存、后备存储）的 Mock 实现，用于测试

pub mod mm;
