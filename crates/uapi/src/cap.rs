//! 能力（capability）相关常量
//!
//! 能力类型占低 16 位，资源类型从第 16 位开始编码。

use bitflags::bitflags;

/// `capability_control` 的请求码
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapControlRequest {
    /// 查询调用者可见的能力数量
    Ncaps = 0,
    /// 读出调用者可见的全部能力
    Read = 1,
    /// 共享给容器
    Share = 2,
    /// 转移所有权
    Grant = 3,
    /// 复制
    Replicate = 4,
    /// 拆分
    Split = 5,
    /// 收窄
    Deduce = 6,
}

impl TryFrom<u32> for CapControlRequest {
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::Ncaps,
            1 => Self::Read,
            2 => Self::Share,
            3 => Self::Grant,
            4 => Self::Replicate,
            5 => Self::Split,
            6 => Self::Deduce,
            other => return Err(other),
        })
    }
}

bitflags! {
    /// 能力类型（低 16 位）
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CapType: u32 {
        /// 线程控制
        const TCTRL = 1 << 0;
        /// 寄存器交换
        const EXREGS = 1 << 1;
        /// 内存映射
        const MAP = 1 << 2;
        /// IPC
        const IPC = 1 << 3;
        /// 调度
        const SCHED = 1 << 4;
        /// 用户态互斥量
        const UMUTEX = 1 << 5;
        /// 数量型资源（线程数、空间数等）
        const QUANTITY = 1 << 6;
        /// 能力本身的操作权
        const CAP = 1 << 7;
    }
}

/// 资源类型（第 16 位起）
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceType {
    Thread = 1 << 16,
    Tgroup = 2 << 16,
    Space = 3 << 16,
    Container = 4 << 16,
    Umutex = 5 << 16,
    Virtmem = 6 << 16,
    Physmem = 7 << 16,
    ThreadPool = 8 << 16,
    SpacePool = 9 << 16,
    MutexPool = 10 << 16,
    MapPool = 11 << 16,
    CapPool = 12 << 16,
}

/// 资源类型在原始类型字中的掩码
pub const CAP_RTYPE_MASK: u32 = 0xffff_0000;

impl ResourceType {
    /// 从原始类型字中解析资源类型
    pub fn from_raw(raw: u32) -> Option<Self> {
        Some(match (raw & CAP_RTYPE_MASK) >> 16 {
            1 => Self::Thread,
            2 => Self::Tgroup,
            3 => Self::Space,
            4 => Self::Container,
            5 => Self::Umutex,
            6 => Self::Virtmem,
            7 => Self::Physmem,
            8 => Self::ThreadPool,
            9 => Self::SpacePool,
            10 => Self::MutexPool,
            11 => Self::MapPool,
            12 => Self::CapPool,
            _ => return None,
        })
    }
}

bitflags! {
    /// 访问权限位
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CapAccess: u32 {
        const MAP_READ = 1 << 0;
        const MAP_WRITE = 1 << 1;
        const MAP_EXEC = 1 << 2;
        const MAP_CACHED = 1 << 3;
        const MAP_UNCACHED = 1 << 4;
        const MAP_UNMAP = 1 << 5;
        const MAP_UTCB = 1 << 6;

        const TCTRL_CREATE = 1 << 8;
        const TCTRL_DESTROY = 1 << 9;
        const TCTRL_RUN = 1 << 10;
        const TCTRL_SUSPEND = 1 << 11;

        const CAP_MODIFY = 1 << 16;
        const CAP_GRANT = 1 << 17;
        const CAP_READ = 1 << 18;
        const CAP_SHARE = 1 << 19;
        const CAP_REPLICATE = 1 << 20;
        const CAP_SPLIT = 1 << 21;
        const CAP_DEDUCE = 1 << 22;

        /// 映射类权限的全集
        const MAP_ALL = Self::MAP_READ.bits() | Self::MAP_WRITE.bits()
            | Self::MAP_EXEC.bits() | Self::MAP_CACHED.bits()
            | Self::MAP_UNCACHED.bits() | Self::MAP_UNMAP.bits()
            | Self::MAP_UTCB.bits();
        /// 对能力本身的操作权全集
        const CAP_ALL = Self::CAP_MODIFY.bits() | Self::CAP_GRANT.bits()
            | Self::CAP_READ.bits() | Self::CAP_SHARE.bits()
            | Self::CAP_REPLICATE.bits() | Self::CAP_SPLIT.bits()
            | Self::CAP_DEDUCE.bits();
    }
}

/// SHARE 的范围
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareScope {
    /// 只共享指定能力
    Single = 0,
    /// 共享调用者的全部能力
    All = 1,
}

bitflags! {
    /// GRANT 的附加标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct GrantFlags: u32 {
        /// 接收方不得再修改、转授该能力
        const IMMUTABLE = 1 << 0;
    }
}
