//! 内存管理配置常量

/// 页大小的位移
pub const PAGE_SHIFT: usize = 12;

/// 页大小（字节）
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;

/// 非固定地址 mmap 的搜索窗口起点
pub const USER_MMAP_BASE: usize = 0x1000_0000;

/// 非固定地址 mmap 的搜索窗口终点（不含）
pub const USER_MMAP_END: usize = 0x8000_0000;

/// 单个请求可涉及的最大页数：整个 mmap 窗口
pub const MAX_MAP_PAGES: usize = (USER_MMAP_END - USER_MMAP_BASE) / PAGE_SIZE;

/// 共享内存段地址池起点；各任务中同一段的地址相同
pub const SHM_AREA_BASE: usize = 0x8000_0000;

/// 共享内存段地址池终点（不含）
pub const SHM_AREA_END: usize = 0x9000_0000;

/// 单个共享内存段的最大页数
pub const SHM_MAX_PAGES: usize = (SHM_AREA_END - SHM_AREA_BASE) / PAGE_SIZE;

/// 经文件描述符读写时文件可达到的最大长度（字节）
pub const MAX_FILE_SIZE: usize = MAX_MAP_PAGES * PAGE_SIZE;

/// 每个任务可打开的文件数
pub const TASK_OFILES_MAX: usize = 32;

/// 字节长度向上取整为页数
pub const fn bytes_to_pages(bytes: usize) -> usize {
    (bytes >> PAGE_SHIFT) + (bytes & (PAGE_SIZE - 1) != 0) as usize
}
