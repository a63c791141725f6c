//! pagerd 错误类型

use std::fmt;

use cap::CapError;
use mm::MmError;

use crate::bootdesc::BootDescError;
use crate::ipc::IpcError;

/// pagerd 顶层错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PagerError {
    /// 内存管理
    Mm(MmError),
    /// 能力
    Cap(CapError),
    /// 启动描述符
    BootDesc(BootDescError),
    /// IPC 传输
    Ipc(IpcError),
    /// 配置
    Config(String),
    /// 启动失败
    Boot(String),
    /// 自检结果不符
    SelfTest(String),
}

impl PagerError {
    /// 是否必须停止服务
    pub fn is_fatal(&self) -> bool {
        match self {
            PagerError::Mm(err) => err.is_fatal(),
            _ => false,
        }
    }
}

impl fmt::Display for PagerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PagerError::Mm(err) => write!(f, "mm: {}", err),
            PagerError::Cap(err) => write!(f, "cap: {}", err),
            PagerError::BootDesc(err) => write!(f, "boot descriptor: {}", err),
            PagerError::Ipc(err) => write!(f, "ipc: {}", err),
            PagerError::Config(msg) => write!(f, "config: {}", msg),
            PagerError::Boot(msg) => write!(f, "boot: {}", msg),
            PagerError::SelfTest(msg) => write!(f, "selftest: {}", msg),
        }
    }
}

impl std::error::Error for PagerError {}

impl From<MmError> for PagerError {
    fn from(err: MmError) -> Self {
        PagerError::Mm(err)
    }
}

impl From<CapError> for PagerError {
    fn from(err: CapError) -> Self {
        PagerError::Cap(err)
    }
}

impl From<BootDescError> for PagerError {
    fn from(err: BootDescError) -> Self {
        PagerError::BootDesc(err)
    }
}

impl From<IpcError> for PagerError {
    fn from(err: IpcError) -> Self {
        PagerError::Ipc(err)
    }
}

/// pagerd 操作结果
pub type PagerResult<T> = Result<T, PagerError>;
