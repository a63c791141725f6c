//! 内核系统调用偏移表
//!
//! 内核在固定页中导出系统调用入口，用户任务按偏移量调用。
//! pager 只使用其中的 `Map` / `Unmap` / `CapabilityControl`。

/// 系统调用在导出页中的偏移
#[repr(usize)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syscall {
    /// 同步 IPC
    Ipc = 0x00,
    /// 让出处理器
    ThreadSwitch = 0x04,
    /// 线程创建 / 销毁
    ThreadControl = 0x08,
    /// 读写线程寄存器
    ExchangeRegisters = 0x0c,
    /// 调度参数
    Schedule = 0x10,
    /// 撤销映射
    Unmap = 0x14,
    /// 地址空间控制
    SpaceControl = 0x18,
    /// 处理器控制
    ProcessorControl = 0x1c,
    /// 内存控制
    MemoryControl = 0x20,
    /// 查询线程号
    Getid = 0x24,
    /// 内核接口页
    KernelInterface = 0x28,
    /// 安装映射
    Map = 0x2c,
    /// 读取内核数据
    Kread = 0x30,
    /// 能力操作
    CapabilityControl = 0x34,
    /// 容器控制
    ContainerControl = 0x38,
    /// 时间
    Time = 0x3c,
    /// 用户态互斥量
    MutexControl = 0x40,
    /// 缓存维护
    CacheControl = 0x44,
}

impl Syscall {
    /// 偏移量（字节）
    pub const fn offset(self) -> usize {
        self as usize
    }
}

/// 导出页中系统调用入口的总数
pub const SYSCALLS_TOTAL: usize = 18;
