//! 错误码定义
//!
//! IPC 回复在 `mr[0]` 中携带 `0` 或负的 errno。

pub const EPERM: isize = 1;
pub const ENOENT: isize = 2;
pub const ESRCH: isize = 3;
pub const EIO: isize = 5;
pub const ENOEXEC: isize = 8;
pub const EBADF: isize = 9;
pub const EAGAIN: isize = 11;
pub const ENOMEM: isize = 12;
pub const EACCES: isize = 13;
pub const EFAULT: isize = 14;
pub const EBUSY: isize = 16;
pub const EEXIST: isize = 17;
pub const EINVAL: isize = 22;
pub const ENOSPC: isize = 28;
pub const ERANGE: isize = 34;
pub const ENOSYS: isize = 38;

/// 将回复寄存器中的返回值解释为 `Result`
///
/// 非负值视为成功，负值视为 `-errno`。
pub fn result_from_reg(ret: usize) -> Result<usize, isize> {
    let val = ret as isize;
    if val < 0 { Err(val) } else { Ok(ret) }
}

/// 将 `-errno` 编码进回复寄存器
pub fn errno_to_reg(errno: isize) -> usize {
    errno as usize
}
