//! 宿主上的模拟物理内存
//!
//! 一段连续的堆内存按帧切分，帧号从 `base` 开始。pager 与宿主上的
//! VFS 共享同一个 [`HeapFrames`]，后者通过帧号直接读写页内容。

use mm::config::PAGE_SIZE;
use mm::{FrameMemory, PageNum, Ppn, PpnRange};
use sync::SpinLock;

/// 堆上的物理帧
pub struct HeapFrames {
    span: PpnRange,
    bytes: SpinLock<Vec<u8>>,
}

impl HeapFrames {
    /// 创建从 `base` 起、共 `npages` 帧的内存，内容全零
    pub fn new(base: Ppn, npages: usize) -> Self {
        Self {
            span: PpnRange::from_start_len(base, npages),
            bytes: SpinLock::new(vec![0u8; npages * PAGE_SIZE]),
        }
    }

    /// 帧范围
    pub fn span(&self) -> PpnRange {
        self.span
    }

    /// 帧 `ppn` 内 `[offset, offset + len)` 对应的字节下标
    fn locate(&self, ppn: Ppn, offset: usize, len: usize) -> Option<usize> {
        if !self.span.contains(ppn) || offset + len > PAGE_SIZE {
            log::error!(
                "frames: access to {:#x}+{:#x} ({} bytes) outside [{:#x}, {:#x})",
                ppn.as_usize(),
                offset,
                len,
                self.span.start().as_usize(),
                self.span.end().as_usize()
            );
            return None;
        }
        Some((ppn - self.span.start()) * PAGE_SIZE + offset)
    }
}

impl FrameMemory for HeapFrames {
    fn read(&self, ppn: Ppn, offset: usize, buf: &mut [u8]) {
        match self.locate(ppn, offset, buf.len()) {
            Some(at) => buf.copy_from_slice(&self.bytes.lock()[at..at + buf.len()]),
            None => buf.fill(0),
        }
    }

    fn write(&self, ppn: Ppn, offset: usize, data: &[u8]) {
        if let Some(at) = self.locate(ppn, offset, data.len()) {
            self.bytes.lock()[at..at + data.len()].copy_from_slice(data);
        }
    }
}
