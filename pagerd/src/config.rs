//! pagerd 配置
//!
//! 编译期默认值集中在这里；部分取值可以通过环境变量覆盖：
//!
//! - `PAGERD_LOG`：日志级别（`error` / `warn` / `info` / `debug` / `trace` / `off`）
//! - `PAGERD_PHYS_PAGES`：模拟物理内存的帧数

use std::env;

use log::LevelFilter;
use uapi::types::{ContainerId, TaskId};

use crate::error::PagerError;

/// pager 自身的任务号
pub const PAGER_TID: TaskId = 1;

/// VFS 协作者的任务号
pub const VFS_TID: TaskId = 2;

/// 所属容器
pub const CONTAINER_ID: ContainerId = 0;

/// 模拟物理内存起始帧号（对应物理地址 0x8000_0000）
pub const FRAME_BASE: usize = 0x80000;

/// 默认物理帧数（4 MiB）
pub const DEFAULT_PHYS_PAGES: usize = 1024;

/// 默认线程配额
pub const DEFAULT_THREAD_QUOTA: usize = 64;

/// 默认日志级别
pub const DEFAULT_LOG_LEVEL: LevelFilter = LevelFilter::Info;

/// 日志级别环境变量
pub const ENV_LOG: &str = "PAGERD_LOG";

/// 物理帧数环境变量
pub const ENV_PHYS_PAGES: &str = "PAGERD_PHYS_PAGES";

/// 运行配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagerConfig {
    /// pager 任务号
    pub pager_tid: TaskId,
    /// VFS 任务号
    pub vfs_tid: TaskId,
    /// 容器号
    pub container: ContainerId,
    /// 物理内存起始帧号
    pub frame_base: usize,
    /// 物理帧数
    pub phys_pages: usize,
    /// 线程配额
    pub thread_quota: usize,
    /// 日志级别
    pub log_level: LevelFilter,
}

impl Default for PagerConfig {
    fn default() -> Self {
        Self {
            pager_tid: PAGER_TID,
            vfs_tid: VFS_TID,
            container: CONTAINER_ID,
            frame_base: FRAME_BASE,
            phys_pages: DEFAULT_PHYS_PAGES,
            thread_quota: DEFAULT_THREAD_QUOTA,
            log_level: DEFAULT_LOG_LEVEL,
        }
    }
}

impl PagerConfig {
    /// 默认值叠加环境变量
    pub fn from_env() -> Result<Self, PagerError> {
        Self::default().with_overrides(
            env::var(ENV_LOG).ok().as_deref(),
            env::var(ENV_PHYS_PAGES).ok().as_deref(),
        )
    }

    /// 应用覆盖值；空字符串视为未设置
    pub fn with_overrides(mut self, log: Option<&str>, phys_pages: Option<&str>) -> Result<Self, PagerError> {
        if let Some(level) = log.map(str::trim).filter(|s| !s.is_empty()) {
            self.log_level = level
                .parse()
                .map_err(|_| PagerError::Config(format!("{}: unknown log level '{}'", ENV_LOG, level)))?;
        }
        if let Some(pages) = phys_pages.map(str::trim).filter(|s| !s.is_empty()) {
            let pages: usize = pages
                .parse()
                .map_err(|_| PagerError::Config(format!("{}: not a number '{}'", ENV_PHYS_PAGES, pages)))?;
            if pages < 16 {
                return Err(PagerError::Config(format!(
                    "{}: at least 16 frames required, got {}",
                    ENV_PHYS_PAGES, pages
                )));
            }
            self.phys_pages = pages;
        }
        Ok(self)
    }
}
