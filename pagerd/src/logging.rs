//! 日志后端
//!
//! 库 crate 只通过 `log` 门面打日志；pagerd 在启动时安装 [`PagerLogger`]，
//! 按内核日志的格式输出到 stderr：
//!
//! ```text
//! [LEVEL] [task N] message
//! ```
//!
//! 其中 `N` 是当前正在服务的请求所属任务，由服务循环通过
//! [`set_current_task`] 设置；0 表示 pager 自身。

use std::io::{IsTerminal, Write};
use std::sync::atomic::{AtomicUsize, Ordering};

use log::{Level, LevelFilter, Log, Metadata, Record};
use uapi::types::TaskId;

use crate::error::PagerError;

/// 当前正在服务的任务
static CURRENT_TASK: AtomicUsize = AtomicUsize::new(0);

/// 记录当前正在服务的任务
pub fn set_current_task(tid: TaskId) {
    CURRENT_TASK.store(tid, Ordering::Relaxed);
}

/// 当前正在服务的任务
pub fn current_task() -> TaskId {
    CURRENT_TASK.load(Ordering::Relaxed)
}

fn level_str(level: Level) -> &'static str {
    match level {
        Level::Error => "ERR",
        Level::Warn => "WARN",
        Level::Info => "INFO",
        Level::Debug => "DEBUG",
        Level::Trace => "TRACE",
    }
}

fn color_code(level: Level) -> &'static str {
    match level {
        Level::Error => "\x1b[31m",
        Level::Warn => "\x1b[93m",
        Level::Info => "\x1b[37m",
        Level::Debug => "\x1b[32m",
        Level::Trace => "\x1b[90m",
    }
}

/// 格式化一行日志
///
/// # 示例输出
/// ```text
/// [INFO] [task  10] mm: managing frames [0x80000, 0x80400)
/// ```
pub fn format_line(level: Level, task: TaskId, msg: &str, color: bool) -> String {
    let (start, reset) = if color { (color_code(level), "\x1b[0m") } else { ("", "") };
    format!("{}[{}] [task {:3}] {}{}", start, level_str(level), task, msg, reset)
}

/// stderr 日志后端
pub struct PagerLogger {
    level: LevelFilter,
    color: bool,
}

impl PagerLogger {
    /// 创建后端；只有 stderr 是终端时才输出颜色
    pub fn new(level: LevelFilter) -> Self {
        Self {
            level,
            color: std::io::stderr().is_terminal(),
        }
    }
}

impl Log for PagerLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format_line(record.level(), current_task(), &record.args().to_string(), self.color);
        let _ = writeln!(std::io::stderr().lock(), "{}", line);
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

/// 安装日志后端；只能调用一次
pub fn init(level: LevelFilter) -> Result<(), PagerError> {
    log::set_logger(Box::leak(Box::new(PagerLogger::new(level))))
        .map_err(|_| PagerError::Config(String::from("logger already installed")))?;
    log::set_max_level(level);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_line_plain() {
        assert_eq!(
            format_line(Level::Info, 10, "mm: ready", false),
            "[INFO] [task  10] mm: ready"
        );
        assert_eq!(format_line(Level::Error, 0, "x", false), "[ERR] [task   0] x");
    }

    #[test]
    fn test_format_line_colored() {
        let line = format_line(Level::Warn, 3, "short read", true);
        assert!(line.starts_with("\x1b[93m[WARN]"));
        assert!(line.ends_with("short read\x1b[0m"));
    }

    #[test]
    fn test_current_task_hook() {
        set_current_task(42);
        assert_eq!(current_task(), 42);
        set_current_task(0);
    }
}
