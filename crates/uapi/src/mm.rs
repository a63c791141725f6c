//! 虚拟内存相关标志
//!
//! VM 区域的保护与属性位，以及 pager 请求内核安装映射时使用的映射标志。

use bitflags::bitflags;

bitflags! {
    /// VM 区域 / VM 对象标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct VmFlags: u32 {
        /// 不可访问
        const NONE = 1 << 0;
        /// 可读
        const READ = 1 << 1;
        /// 可写
        const WRITE = 1 << 2;
        /// 可执行
        const EXEC = 1 << 3;
        /// 共享映射：写入直接落到文件对象
        const SHARED = 1 << 4;
        /// 匿名映射（零填充）
        const ANONYMOUS = 1 << 5;
        /// 私有映射：写入触发写时复制
        const PRIVATE = 1 << 6;
        /// 固定地址
        const FIXED = 1 << 7;
        /// 向下增长（栈）
        const GROWSDOWN = 1 << 8;
        /// 页面已被写脏
        const DIRTY = 1 << 9;

        /// 保护位掩码
        const PROT_MASK = Self::READ.bits() | Self::WRITE.bits() | Self::EXEC.bits();
    }
}

/// `Mmap` 请求中的后备种类（`mr[5]`）：VFS 文件
pub const MMAP_KIND_VFS: usize = 2;
/// `Mmap` 请求中的后备种类：启动镜像，`vnum` 为镜像序号
pub const MMAP_KIND_BOOTFILE: usize = 3;

/// `ShmGet` 的键：不关联任何键，总是新建段
pub const IPC_PRIVATE: usize = 0;

bitflags! {
    /// `ShmGet` 标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ShmFlags: u32 {
        /// 键不存在时创建
        const CREAT = 1 << 9;
        /// 与 `CREAT` 同用：键已存在时失败
        const EXCL = 1 << 10;
    }
}

/// `FileSeek`：相对文件开头
pub const SEEK_SET: usize = 0;
/// `FileSeek`：相对当前位置
pub const SEEK_CUR: usize = 1;
/// `FileSeek`：相对文件末尾
pub const SEEK_END: usize = 2;

bitflags! {
    /// 内核 `map` 系统调用的映射标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MapFlags: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXEC = 1 << 2;
        const USER = 1 << 3;
        const CACHED = 1 << 4;

        /// 用户只读
        const USR_RO = Self::READ.bits() | Self::USER.bits() | Self::CACHED.bits();
        /// 用户读写
        const USR_RW = Self::USR_RO.bits() | Self::WRITE.bits();
        /// 用户读执行
        const USR_RX = Self::USR_RO.bits() | Self::EXEC.bits();
        /// 用户读写执行
        const USR_RWX = Self::USR_RW.bits() | Self::EXEC.bits();
    }
}

impl MapFlags {
    /// 根据区域保护位与是否可写，得到内核映射标志
    pub fn for_prot(prot: VmFlags, writable: bool) -> Self {
        let mut flags = Self::USR_RO;
        if writable && prot.contains(VmFlags::WRITE) {
            flags |= Self::WRITE;
        }
        if prot.contains(VmFlags::EXEC) {
            flags |= Self::EXEC;
        }
        flags
    }
}
