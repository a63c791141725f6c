//! 内存管理错误类型

use core::fmt;

use cap::CapError;
use uapi::errno::{EACCES, EBADF, EEXIST, EFAULT, EINVAL, ENOENT, ENOMEM};

/// 内存管理错误
///
/// 除 [`MmError::InvariantViolation`] 外都可以返回给请求方；
/// 不变量被破坏意味着上游已经出现内存安全问题，调用方必须停止服务。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MmError {
    /// 能力校验失败
    PermissionDenied,
    /// 物理帧耗尽
    OutOfMemory,
    /// 任务或对象不存在
    NotFound,
    /// 地址没有被任何 VM 区域覆盖，或访问类型不被允许
    SegmentationFault,
    /// 引用计数 / 链接计数 / 页缓存不一致
    InvariantViolation(&'static str),
    /// 后备存储（IPC 或协作者）失败，携带其 errno
    BackingStore(isize),
    /// 区间已被占用
    AlreadyMapped,
    /// 参数非法
    InvalidArgument,
    /// 以独占方式创建的键已存在
    AlreadyExists,
    /// 文件描述符未打开或越界
    BadFd,
}

impl MmError {
    /// 转换为负的 errno
    pub fn to_errno(self) -> isize {
        match self {
            MmError::PermissionDenied => -EACCES,
            MmError::OutOfMemory => -ENOMEM,
            MmError::NotFound => -ENOENT,
            MmError::SegmentationFault => -EFAULT,
            MmError::InvariantViolation(_) => -EFAULT,
            MmError::BackingStore(errno) => errno,
            MmError::AlreadyMapped => -EEXIST,
            MmError::InvalidArgument => -EINVAL,
            MmError::AlreadyExists => -EEXIST,
            MmError::BadFd => -EBADF,
        }
    }

    /// 是否为不可恢复的错误
    pub fn is_fatal(&self) -> bool {
        matches!(self, MmError::InvariantViolation(_))
    }
}

impl fmt::Display for MmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MmError::PermissionDenied => f.write_str("permission denied"),
            MmError::OutOfMemory => f.write_str("out of memory"),
            MmError::NotFound => f.write_str("not found"),
            MmError::SegmentationFault => f.write_str("segmentation fault"),
            MmError::InvariantViolation(what) => write!(f, "invariant violated: {}", what),
            MmError::BackingStore(errno) => write!(f, "backing store error {}", errno),
            MmError::AlreadyMapped => f.write_str("range already mapped"),
            MmError::InvalidArgument => f.write_str("invalid argument"),
            MmError::AlreadyExists => f.write_str("already exists"),
            MmError::BadFd => f.write_str("bad file descriptor"),
        }
    }
}

impl From<CapError> for MmError {
    fn from(err: CapError) -> Self {
        match err {
            CapError::InvalidArgument => MmError::InvalidArgument,
            _ => MmError::PermissionDenied,
        }
    }
}

/// 内存管理操作结果
pub type MmResult<T> = Result<T, MmError>;

/// 记录并构造一个不变量错误
pub(crate) fn invariant(what: &'static str) -> MmError {
    log::error!("mm: invariant violated: {}", what);
    MmError::InvariantViolation(what)
}

/// 回收路径上的错误归并：后备存储错误先记下、回收继续进行，
/// 其余错误立即返回
pub(crate) fn defer_backing(pending: &mut Option<MmError>, result: MmResult<()>) -> MmResult<()> {
    match result {
        Err(err @ MmError::BackingStore(_)) => {
            pending.get_or_insert(err);
            Ok(())
        }
        other => other,
    }
}

/// 把归并的后备存储错误转换为最终结果
pub(crate) fn finish_deferred(pending: Option<MmError>) -> MmResult<()> {
    pending.map_or(Ok(()), Err)
}
