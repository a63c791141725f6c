//! 能力校验错误类型

use core::fmt;

use uapi::errno::{EACCES, EBUSY, EINVAL, ENOENT, EPERM, ERANGE};

/// 能力操作错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapError {
    /// 找不到对应资源的能力
    NotFound,
    /// 权限位不满足请求
    PermissionDenied,
    /// 请求区间越出能力范围
    OutOfBounds,
    /// 参数非法（例如拆分后区间不连续）
    InvalidArgument,
    /// 能力正在被使用，不能转授
    Busy,
    /// 数量型能力不能复制
    NotReplicable,
}

impl CapError {
    /// 转换为负的 errno
    pub fn to_errno(self) -> isize {
        match self {
            CapError::NotFound => -ENOENT,
            CapError::PermissionDenied => -EACCES,
            CapError::OutOfBounds => -ERANGE,
            CapError::InvalidArgument => -EINVAL,
            CapError::Busy => -EBUSY,
            CapError::NotReplicable => -EPERM,
        }
    }
}

impl fmt::Display for CapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            CapError::NotFound => "capability not found",
            CapError::PermissionDenied => "permission denied",
            CapError::OutOfBounds => "range out of bounds",
            CapError::InvalidArgument => "invalid argument",
            CapError::Busy => "capability in use",
            CapError::NotReplicable => "capability not replicable",
        };
        f.write_str(msg)
    }
}

/// 能力操作结果
pub type CapResult<T> = Result<T, CapError>;
