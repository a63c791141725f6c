//! 内存管理运行环境的 Mock 实现
//!
//! 注意：这里不直接依赖 `mm` crate（避免循环依赖），帧号、页号都用 `usize`。
//! `mm` crate 在 `cfg(test)` 下为这些类型实现其 trait
//! （`FrameMemory` / `KernelOps` / `Pager`）。

use alloc::collections::BTreeMap;
use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use sync::SpinLock;

/// Mock 的页大小
pub const MOCK_PAGE_SIZE: usize = 4096;

/// Mock 的物理内存：帧在第一次访问时按零页分配
pub struct MockFrameMemory {
    frames: SpinLock<BTreeMap<usize, Vec<u8>>>,
}

impl MockFrameMemory {
    pub const fn new() -> Self {
        Self {
            frames: SpinLock::new(BTreeMap::new()),
        }
    }

    /// 从帧 `ppn` 的 `offset` 处读出 `buf.len()` 字节
    pub fn read_bytes(&self, ppn: usize, offset: usize, buf: &mut [u8]) {
        let mut frames = self.frames.lock();
        let frame = frames.entry(ppn).or_insert_with(|| vec![0u8; MOCK_PAGE_SIZE]);
        buf.copy_from_slice(&frame[offset..offset + buf.len()]);
    }

    /// 向帧 `ppn` 的 `offset` 处写入 `data`
    pub fn write_bytes(&self, ppn: usize, offset: usize, data: &[u8]) {
        let mut frames = self.frames.lock();
        let frame = frames.entry(ppn).or_insert_with(|| vec![0u8; MOCK_PAGE_SIZE]);
        frame[offset..offset + data.len()].copy_from_slice(data);
    }

    /// 帧的第一个字节（测试里常用来标记内容）
    pub fn first_byte(&self, ppn: usize) -> u8 {
        let mut b = [0u8; 1];
        self.read_bytes(ppn, 0, &mut b);
        b[0]
    }
}

impl Default for MockFrameMemory {
    fn default() -> Self {
        Self::new()
    }
}

/// Mock 的内核：记录每个任务的映射
///
/// 映射表键为 `(任务号, 虚拟页号)`，值为 `(物理帧号, 映射标志位)`。
pub struct MockKernel {
    maps: SpinLock<BTreeMap<(usize, usize), (usize, u32)>>,
    map_calls: AtomicUsize,
    unmap_calls: AtomicUsize,
    fail_map: AtomicBool,
}

impl MockKernel {
    pub const fn new() -> Self {
        Self {
            maps: SpinLock::new(BTreeMap::new()),
            map_calls: AtomicUsize::new(0),
            unmap_calls: AtomicUsize::new(0),
            fail_map: AtomicBool::new(false),
        }
    }

    /// 记录一次 map；注入失败时返回 `false`
    pub fn record_map(&self, task: usize, vpn: usize, npages: usize, ppn: usize, flags: u32) -> bool {
        self.map_calls.fetch_add(1, Ordering::Relaxed);
        if self.fail_map.load(Ordering::Relaxed) {
            return false;
        }
        let mut maps = self.maps.lock();
        for i in 0..npages {
            maps.insert((task, vpn + i), (ppn + i, flags));
        }
        true
    }

    /// 记录一次 unmap
    pub fn record_unmap(&self, task: usize, vpn: usize, npages: usize) {
        self.unmap_calls.fetch_add(1, Ordering::Relaxed);
        let mut maps = self.maps.lock();
        for i in 0..npages {
            maps.remove(&(task, vpn + i));
        }
    }

    /// 查询映射
    pub fn lookup(&self, task: usize, vpn: usize) -> Option<(usize, u32)> {
        self.maps.lock().get(&(task, vpn)).copied()
    }

    /// 任务当前的映射数
    pub fn mapping_count(&self, task: usize) -> usize {
        self.maps.lock().keys().filter(|(t, _)| *t == task).count()
    }

    /// 所有任务的映射总数
    pub fn total_mappings(&self) -> usize {
        self.maps.lock().len()
    }

    /// map 调用次数
    pub fn map_calls(&self) -> usize {
        self.map_calls.load(Ordering::Relaxed)
    }

    /// unmap 调用次数
    pub fn unmap_calls(&self) -> usize {
        self.unmap_calls.load(Ordering::Relaxed)
    }

    /// 之后的 map 调用是否失败
    pub fn set_fail_map(&self, fail: bool) {
        self.fail_map.store(fail, Ordering::Relaxed);
    }
}

impl Default for MockKernel {
    fn default() -> Self {
        Self::new()
    }
}

/// Mock 的后备存储：以节点号索引的字节数组
pub struct MockBackingStore {
    files: SpinLock<BTreeMap<u64, Vec<u8>>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
    releases: AtomicUsize,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MockBackingStore {
    pub const fn new() -> Self {
        Self {
            files: SpinLock::new(BTreeMap::new()),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// 放入一个文件
    pub fn insert_file(&self, vnum: u64, data: Vec<u8>) {
        self.files.lock().insert(vnum, data);
    }

    /// 取出文件当前内容
    pub fn file(&self, vnum: u64) -> Option<Vec<u8>> {
        self.files.lock().get(&vnum).cloned()
    }

    /// 读取一页；文件不存在或注入失败时返回 `None`。不足一页的部分补零。
    pub fn read_page(&self, vnum: u64, page_offset: usize) -> Option<Vec<u8>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        if self.fail_reads.load(Ordering::Relaxed) {
            return None;
        }
        let files = self.files.lock();
        let data = files.get(&vnum)?;
        let mut page = vec![0u8; MOCK_PAGE_SIZE];
        let start = page_offset * MOCK_PAGE_SIZE;
        if start < data.len() {
            let end = (start + MOCK_PAGE_SIZE).min(data.len());
            page[..end - start].copy_from_slice(&data[start..end]);
        }
        Some(page)
    }

    /// 写回一页，必要时扩展文件
    pub fn write_page(&self, vnum: u64, page_offset: usize, page: &[u8]) -> bool {
        self.writes.fetch_add(1, Ordering::Relaxed);
        if self.fail_writes.load(Ordering::Relaxed) {
            return false;
        }
        let mut files = self.files.lock();
        let Some(data) = files.get_mut(&vnum) else {
            return false;
        };
        let start = page_offset * MOCK_PAGE_SIZE;
        let end = start + page.len();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(page);
        true
    }

    /// 记录一次 release_pages
    pub fn release(&self, _vnum: u64) {
        self.releases.fetch_add(1, Ordering::Relaxed);
    }

    /// 让之后的读取失败
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::Relaxed);
    }

    /// 让之后的写入失败
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    /// 读取次数
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }

    /// 写回次数
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }

    /// release_pages 次数
    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::Relaxed)
    }
}

impl Default for MockBackingStore {
    fn default() -> Self {
        Self::new()
    }
}
